pub mod logging;
pub mod platform;

pub use logging::init_logging;

/// Memory of a simulated device when the configuration does not say.
pub const DEFAULT_SIM_CAPACITY: usize = 256 * 1024 * 1024;
