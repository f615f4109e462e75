pub mod config;
pub mod error;

pub use config::{default_config_path, Backend, DevrtConfig, DriverConfig, SimConfig};
pub use error::CoreError;
