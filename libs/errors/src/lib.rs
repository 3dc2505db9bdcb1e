//! Unified error handling for stsmon services
//!
//! Process-level error type shared by the service binary and its support
//! libraries. Library code inside a service keeps its own narrower error
//! type and converts into [`VoltageError`] at the process boundary.

use thiserror::Error;

// ============================================================================
// VoltageError - Main error type
// ============================================================================

/// Main error type for all stsmon services
#[derive(Debug, Error)]
pub enum VoltageError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Transport error: {0}")]
    Transport(String),

    /// Bus lifecycle misuse (duplicate, unknown or stopped bus)
    #[error("Bus error: {0}")]
    Bus(String),

    #[error("Service startup failed: {0}")]
    StartupFailed(String),
}

/// Result type alias using VoltageError
pub type VoltageResult<T> = Result<T, VoltageError>;

impl VoltageError {
    /// Process exit code for this error (sysexits.h values)
    pub fn exit_code(&self) -> i32 {
        match self {
            // EX_DATAERR
            Self::Validation(_) => 65,

            // EX_UNAVAILABLE
            Self::Transport(_) | Self::Bus(_) => 69,

            // EX_CONFIG
            Self::Configuration(_) | Self::StartupFailed(_) => 78,
        }
    }

    /// Stable machine-readable error code
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "CONFIGURATION_ERROR",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Transport(_) => "TRANSPORT_ERROR",
            Self::Bus(_) => "BUS_ERROR",
            Self::StartupFailed(_) => "STARTUP_FAILED",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_exit_codes() {
        assert_eq!(VoltageError::Configuration("x".into()).exit_code(), 78);
        assert_eq!(VoltageError::Validation("x".into()).exit_code(), 65);
        assert_eq!(VoltageError::Transport("port busy".into()).exit_code(), 69);
        assert_eq!(VoltageError::Bus("bus-a".into()).exit_code(), 69);
        assert_eq!(VoltageError::StartupFailed("x".into()).exit_code(), 78);
    }

    #[test]
    fn test_error_codes_and_display() {
        let err = VoltageError::StartupFailed("no bus could be started".into());
        assert_eq!(err.error_code(), "STARTUP_FAILED");
        assert_eq!(
            err.to_string(),
            "Service startup failed: no bus could be started"
        );
        assert_eq!(
            VoltageError::Transport("bus-a: cannot open".into()).to_string(),
            "Transport error: bus-a: cannot open"
        );
    }
}
