//! Shared error handling for the genset bridge services
//!
//! Services keep their own domain error enums and expose a common surface
//! through [`ServiceErrorTrait`]. [`ServiceError`] is the type returned from
//! service entry points once domain errors have been lifted.

use thiserror::Error;

// ============================================================================
// ServiceError - Main error type
// ============================================================================

/// Main error type returned by service entry points
#[derive(Debug, Error)]
pub enum ServiceError {
    // ======================================
    // Configuration Errors
    // ======================================
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid register layout: {0}")]
    Layout(String),

    // ======================================
    // Device & Transport Errors
    // ======================================
    #[error("Protocol error: {protocol}: {message}")]
    Protocol { protocol: String, message: String },

    #[error("Connection failed: {endpoint}: {reason}")]
    ConnectionFailed { endpoint: String, reason: String },

    #[error("Timeout waiting for response from {0}")]
    Timeout(String),

    // ======================================
    // Messaging Errors
    // ======================================
    #[error("Messaging error: {0}")]
    Messaging(String),

    // ======================================
    // File & Serialization Errors
    // ======================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    // ======================================
    // Service Lifecycle Errors
    // ======================================
    #[error("Service startup failed: {0}")]
    StartupFailed(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    /// Process exit code used when the error terminates a service
    pub fn exit_code(&self) -> i32 {
        match self.category() {
            ErrorCategory::Configuration => 78,
            ErrorCategory::Connection | ErrorCategory::Network | ErrorCategory::Timeout => 69,
            _ => 1,
        }
    }
}

impl From<serde_json::Error> for ServiceError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for ServiceError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Result alias over [`ServiceError`]
pub type ServiceResult<T> = Result<T, ServiceError>;

/// Build a [`ServiceError::Configuration`] with format arguments
#[macro_export]
macro_rules! config_error {
    ($msg:expr) => {
        $crate::ServiceError::Configuration($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::ServiceError::Configuration(format!($fmt, $($arg)*))
    };
}

impl ServiceErrorTrait for ServiceError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "CONFIGURATION_ERROR",
            Self::Layout(_) => "INVALID_LAYOUT",
            Self::Protocol { .. } => "PROTOCOL_ERROR",
            Self::ConnectionFailed { .. } => "CONNECTION_FAILED",
            Self::Timeout(_) => "TIMEOUT",
            Self::Messaging(_) => "MESSAGING_ERROR",
            Self::Io(_) => "IO_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::StartupFailed(_) => "STARTUP_FAILED",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Configuration(_) | Self::Layout(_) => ErrorCategory::Configuration,
            Self::Protocol { .. } => ErrorCategory::Protocol,
            Self::ConnectionFailed { .. } => ErrorCategory::Connection,
            Self::Timeout(_) => ErrorCategory::Timeout,
            Self::Messaging(_) => ErrorCategory::Network,
            Self::Io(_) | Self::Serialization(_) | Self::StartupFailed(_) | Self::Internal(_) => {
                ErrorCategory::Internal
            },
        }
    }
}

// ============================================================================
// Error trait - shared by all service error types
// ============================================================================

/// Error category, used for classification and log routing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Network,
    Timeout,
    Protocol,
    Connection,
    Internal,
}

/// Common capability surface for service error types
///
/// Each service keeps its own error enum and gains a logging policy by
/// implementing the two required methods.
pub trait ServiceErrorTrait: std::error::Error + Send + Sync + 'static {
    /// Stable error code for logs
    fn error_code(&self) -> &'static str;

    fn category(&self) -> ErrorCategory;

    /// Severity to log at; faults the next cycle may clear stay below ERROR
    fn log_level(&self) -> tracing::Level {
        use tracing::Level;
        match self.category() {
            ErrorCategory::Internal | ErrorCategory::Configuration => Level::ERROR,
            ErrorCategory::Network
            | ErrorCategory::Timeout
            | ErrorCategory::Connection
            | ErrorCategory::Protocol => Level::WARN,
        }
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_device_faults_log_as_warnings() {
        let err = ServiceError::Timeout("slave 1".into());
        assert_eq!(err.log_level(), tracing::Level::WARN);
        assert_eq!(err.exit_code(), 69);

        let err = ServiceError::ConnectionFailed {
            endpoint: "/dev/ttyUSB0".into(),
            reason: "busy".into(),
        };
        assert_eq!(err.category(), ErrorCategory::Connection);
        assert_eq!(err.log_level(), tracing::Level::WARN);

        let err = ServiceError::Protocol {
            protocol: "modbus".into(),
            message: "illegal data address".into(),
        };
        assert_eq!(err.log_level(), tracing::Level::WARN);
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn test_error_codes_and_levels() {
        let err = ServiceError::Layout("bit claimed twice".into());
        assert_eq!(err.error_code(), "INVALID_LAYOUT");
        assert_eq!(err.category(), ErrorCategory::Configuration);
        assert_eq!(err.log_level(), tracing::Level::ERROR);
        assert_eq!(err.exit_code(), 78);

        let err = ServiceError::Internal("x".into());
        assert_eq!(err.log_level(), tracing::Level::ERROR);
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn test_from_serde_errors() {
        let yaml_err = serde_yaml::from_str::<u16>("not a number").unwrap_err();
        let err: ServiceError = yaml_err.into();
        assert_eq!(err.error_code(), "SERIALIZATION_ERROR");

        let err = config_error!("missing {}", "layout_file");
        assert_eq!(err.to_string(), "Configuration error: missing layout_file");
    }
}
