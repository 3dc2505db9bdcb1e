//! Error handling for the polling service
//!
//! Timeouts and short reads are not errors here: they are poll outcomes
//! and flow through the state machine. These variants cover configuration,
//! bus lifecycle and transport construction.

use errors::VoltageError;
use thiserror::Error;

/// Polling service error type
#[derive(Error, Debug, Clone)]
pub enum StsError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Validation errors (bad address, duplicate device, bad parameter)
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Transport construction or release failures
    #[error("Transport error: {0}")]
    TransportError(String),

    /// Bus lifecycle errors (not found, already running, stopped)
    #[error("Bus error: {0}")]
    BusError(String),
}

/// Result type alias for the polling service
pub type Result<T> = std::result::Result<T, StsError>;

impl StsError {
    pub fn config(msg: impl Into<String>) -> Self {
        StsError::ConfigError(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        StsError::ValidationError(msg.into())
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        StsError::TransportError(msg.into())
    }

    pub fn bus(msg: impl Into<String>) -> Self {
        StsError::BusError(msg.into())
    }
}

impl From<figment::Error> for StsError {
    fn from(err: figment::Error) -> Self {
        StsError::ConfigError(err.to_string())
    }
}

impl From<StsError> for VoltageError {
    fn from(err: StsError) -> Self {
        match err {
            StsError::ConfigError(msg) => VoltageError::Configuration(msg),
            StsError::ValidationError(msg) => VoltageError::Validation(msg),
            StsError::TransportError(msg) => VoltageError::Transport(msg),
            StsError::BusError(msg) => VoltageError::Bus(msg),
        }
    }
}
