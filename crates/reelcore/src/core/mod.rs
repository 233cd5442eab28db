//! Core utilities, configuration, and common functionality

pub mod config;
pub mod error;
pub mod logging;
pub mod process;
pub mod retry;
pub mod utils;

// Re-exports for convenience
pub use config::Settings;
pub use error::{ConfigError, TransportError};
pub use logging::init_logger;
pub use utils::format_size;
