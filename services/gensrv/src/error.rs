//! Error handling for the genset bridge service

use errors::{ErrorCategory, ServiceError, ServiceErrorTrait};
use thiserror::Error;

/// Genset bridge error type
#[derive(Error, Debug, Clone)]
pub enum GenSrvError {
    /// Service configuration errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Register layout errors, fatal at startup
    #[error("Layout error: {0}")]
    LayoutError(String),

    #[error("IO error: {0}")]
    IoError(String),

    /// Modbus exception responses and malformed replies
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    /// Serial port or TCP gateway unavailable
    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Timeout error: {0}")]
    TimeoutError(String),

    /// MQTT client errors
    #[error("Messaging error: {0}")]
    MessagingError(String),

    /// Snapshot serialization errors
    #[error("Data error: {0}")]
    DataError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Result type alias for the genset bridge
pub type Result<T> = std::result::Result<T, GenSrvError>;

/// Log an error at the level its category calls for
macro_rules! log_at_level {
    ($err:expr, $($arg:tt)+) => {
        match errors::ServiceErrorTrait::log_level(&$err) {
            tracing::Level::ERROR => tracing::error!($($arg)+),
            tracing::Level::WARN => tracing::warn!($($arg)+),
            tracing::Level::INFO => tracing::info!($($arg)+),
            _ => tracing::debug!($($arg)+),
        }
    };
}
pub(crate) use log_at_level;

impl GenSrvError {
    pub fn config(msg: impl Into<String>) -> Self {
        GenSrvError::ConfigError(msg.into())
    }

    pub fn layout(msg: impl Into<String>) -> Self {
        GenSrvError::LayoutError(msg.into())
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        GenSrvError::ProtocolError(msg.into())
    }

    pub fn connection(msg: impl Into<String>) -> Self {
        GenSrvError::ConnectionError(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        GenSrvError::TimeoutError(msg.into())
    }

    pub fn messaging(msg: impl Into<String>) -> Self {
        GenSrvError::MessagingError(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        GenSrvError::InternalError(msg.into())
    }
}

impl From<std::io::Error> for GenSrvError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::TimedOut => GenSrvError::TimeoutError(err.to_string()),
            std::io::ErrorKind::NotConnected
            | std::io::ErrorKind::ConnectionRefused
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::NotFound => GenSrvError::ConnectionError(err.to_string()),
            _ => GenSrvError::IoError(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for GenSrvError {
    fn from(err: serde_json::Error) -> Self {
        GenSrvError::DataError(err.to_string())
    }
}

impl From<serde_yaml::Error> for GenSrvError {
    fn from(err: serde_yaml::Error) -> Self {
        GenSrvError::LayoutError(err.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for GenSrvError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        GenSrvError::TimeoutError("operation timed out".to_string())
    }
}

impl From<tokio_serial::Error> for GenSrvError {
    fn from(err: tokio_serial::Error) -> Self {
        GenSrvError::ConnectionError(format!("serial port: {}", err))
    }
}

impl From<tokio_modbus::Error> for GenSrvError {
    fn from(err: tokio_modbus::Error) -> Self {
        match err {
            tokio_modbus::Error::Transport(io) => io.into(),
            other => GenSrvError::ProtocolError(other.to_string()),
        }
    }
}

impl From<rumqttc::ClientError> for GenSrvError {
    fn from(err: rumqttc::ClientError) -> Self {
        GenSrvError::MessagingError(err.to_string())
    }
}

impl From<GenSrvError> for ServiceError {
    fn from(err: GenSrvError) -> Self {
        match err {
            GenSrvError::ConfigError(msg) => ServiceError::Configuration(msg),
            GenSrvError::LayoutError(msg) => ServiceError::Layout(msg),
            GenSrvError::IoError(msg) => ServiceError::Io(std::io::Error::other(msg)),
            GenSrvError::ProtocolError(msg) => ServiceError::Protocol {
                protocol: "modbus".to_string(),
                message: msg,
            },
            GenSrvError::ConnectionError(msg) => ServiceError::ConnectionFailed {
                endpoint: "device".to_string(),
                reason: msg,
            },
            GenSrvError::TimeoutError(msg) => ServiceError::Timeout(msg),
            GenSrvError::MessagingError(msg) => ServiceError::Messaging(msg),
            GenSrvError::DataError(msg) => ServiceError::Serialization(msg),
            GenSrvError::InternalError(msg) => ServiceError::Internal(msg),
        }
    }
}

impl ServiceErrorTrait for GenSrvError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::ConfigError(_) => "GENSRV_CONFIG_ERROR",
            Self::LayoutError(_) => "GENSRV_LAYOUT_ERROR",
            Self::IoError(_) => "GENSRV_IO_ERROR",
            Self::ProtocolError(_) => "GENSRV_PROTOCOL_ERROR",
            Self::ConnectionError(_) => "GENSRV_CONNECTION_ERROR",
            Self::TimeoutError(_) => "GENSRV_TIMEOUT",
            Self::MessagingError(_) => "GENSRV_MESSAGING_ERROR",
            Self::DataError(_) => "GENSRV_DATA_ERROR",
            Self::InternalError(_) => "GENSRV_INTERNAL_ERROR",
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::ConfigError(_) | Self::LayoutError(_) => ErrorCategory::Configuration,
            Self::IoError(_) | Self::DataError(_) | Self::InternalError(_) => {
                ErrorCategory::Internal
            },
            Self::ProtocolError(_) => ErrorCategory::Protocol,
            Self::ConnectionError(_) => ErrorCategory::Connection,
            Self::TimeoutError(_) => ErrorCategory::Timeout,
            Self::MessagingError(_) => ErrorCategory::Network,
        }
    }
}
