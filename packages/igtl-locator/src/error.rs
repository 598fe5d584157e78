use crate::config::ConfigError;
use thiserror::Error;

/// Result type for locator operations
pub type LocatorResult<T> = Result<T, LocatorError>;

/// Failures while bringing the device link up
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("Device at {host}:{port} unreachable after {attempts} attempts")]
    Unreachable {
        host: String,
        port: u16,
        attempts: u32,
    },

    #[error("Invalid connection target: {0}")]
    InvalidTarget(String),
}

/// Coarse classification used by control surfaces to decide how to recover
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Unreachable,
    NoStreamSelected,
    DuplicateActivation,
    ChannelOutOfRange,
    MarkerNotFound,
    DisplayNotFound,
    StreamNotFound,
    NotConnected,
    Protocol,
    Io,
    Config,
}

#[derive(Debug, Error)]
pub enum LocatorError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error("Channel {0} has no stream selected")]
    NoStreamSelected(usize),

    #[error("Channel {0} is already active")]
    DuplicateActivation(usize),

    #[error("Channel index {index} out of range (capacity {capacity})")]
    ChannelOutOfRange { index: usize, capacity: usize },

    #[error("Marker not found: {0}")]
    MarkerNotFound(String),

    #[error("Display not found for marker: {0}")]
    DisplayNotFound(String),

    #[error("Stream not found: {0}")]
    StreamNotFound(String),

    #[error("Device link is not connected")]
    NotConnected,

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl LocatorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LocatorError::Connection(ConnectionError::Unreachable { .. }) => ErrorKind::Unreachable,
            LocatorError::Connection(ConnectionError::InvalidTarget(_)) => ErrorKind::Config,
            LocatorError::NoStreamSelected(_) => ErrorKind::NoStreamSelected,
            LocatorError::DuplicateActivation(_) => ErrorKind::DuplicateActivation,
            LocatorError::ChannelOutOfRange { .. } => ErrorKind::ChannelOutOfRange,
            LocatorError::MarkerNotFound(_) => ErrorKind::MarkerNotFound,
            LocatorError::DisplayNotFound(_) => ErrorKind::DisplayNotFound,
            LocatorError::StreamNotFound(_) => ErrorKind::StreamNotFound,
            LocatorError::NotConnected => ErrorKind::NotConnected,
            LocatorError::Protocol(_) => ErrorKind::Protocol,
            LocatorError::Io(_) => ErrorKind::Io,
            LocatorError::Config(_) => ErrorKind::Config,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        let err: LocatorError = ConnectionError::Unreachable {
            host: "localhost".to_string(),
            port: 18944,
            attempts: 10,
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::Unreachable);
        assert_eq!(
            err.to_string(),
            "Device at localhost:18944 unreachable after 10 attempts"
        );

        assert_eq!(LocatorError::NoStreamSelected(3).kind(), ErrorKind::NoStreamSelected);
        assert_eq!(LocatorError::from(ConfigError::InvalidPort).kind(), ErrorKind::Config);

        // A bad target is a configuration problem, not retry exhaustion
        let err: LocatorError = ConnectionError::InvalidTarget("empty host".to_string()).into();
        assert_eq!(err.kind(), ErrorKind::Config);
    }
}
