//! Shared basic library for the bridge services
//!
//! Provides the functions every service binary needs before its own logic runs:
//! - logging initialisation
//! - layered configuration loading
//! - startup banner and development environment
//! - shutdown signal handling

pub mod config_loader;
pub mod logging;
pub mod service_bootstrap;
pub mod shutdown;

pub use config_loader::load_layered;
pub use logging::LogConfig;
pub use service_bootstrap::ServiceInfo;
pub use shutdown::{wait_for_shutdown, ShutdownSignal};

// Re-export common dependencies
pub use anyhow;
pub use tokio;
