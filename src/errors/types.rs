//! Custom error types for homelink

use std::fmt;

/// Main error type for homelink operations
#[derive(Debug)]
pub enum HomelinkError {
    /// Configuration related errors
    Config(String),
    /// Malformed user input such as an unparsable server URL
    InvalidInput(String),
    /// DNS, socket, TLS or HTTP level failures talking to a server
    NetworkUnreachable(String),
    /// The host refused to let the worker run in the background
    PlatformRestricted(String),
    /// A notification acknowledgement could not be delivered
    TransientAck(String),
    /// WebSocket protocol errors reported by or about the remote server
    Remote(String),
    /// The server rejected our credentials
    Auth(String),
    /// General I/O errors
    Io(std::io::Error),
    /// Serialization errors
    Serialization(String),
}

impl HomelinkError {
    /// Whether the operation could succeed if simply tried again later
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            HomelinkError::NetworkUnreachable(_)
                | HomelinkError::TransientAck(_)
                | HomelinkError::Remote(_)
        )
    }
}

impl fmt::Display for HomelinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HomelinkError::Config(msg) => write!(f, "Configuration error: {}", msg),
            HomelinkError::InvalidInput(msg) => write!(f, "Invalid input: {}", msg),
            HomelinkError::NetworkUnreachable(msg) => write!(f, "Network unreachable: {}", msg),
            HomelinkError::PlatformRestricted(msg) => {
                write!(f, "Background execution restricted: {}", msg)
            }
            HomelinkError::TransientAck(msg) => write!(f, "Acknowledgement failed: {}", msg),
            HomelinkError::Remote(msg) => write!(f, "Remote server error: {}", msg),
            HomelinkError::Auth(msg) => write!(f, "Authentication error: {}", msg),
            HomelinkError::Io(err) => write!(f, "I/O error: {}", err),
            HomelinkError::Serialization(msg) => write!(f, "Serialization error: {}", msg),
        }
    }
}

impl std::error::Error for HomelinkError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            HomelinkError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for HomelinkError {
    fn from(err: std::io::Error) -> Self {
        HomelinkError::Io(err)
    }
}

impl From<serde_json::Error> for HomelinkError {
    fn from(err: serde_json::Error) -> Self {
        HomelinkError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for HomelinkError {
    fn from(err: toml::de::Error) -> Self {
        HomelinkError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for HomelinkError {
    fn from(err: toml::ser::Error) -> Self {
        HomelinkError::Serialization(err.to_string())
    }
}

impl From<url::ParseError> for HomelinkError {
    fn from(err: url::ParseError) -> Self {
        HomelinkError::InvalidInput(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for HomelinkError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        HomelinkError::Remote(err.to_string())
    }
}

impl From<reqwest::Error> for HomelinkError {
    fn from(err: reqwest::Error) -> Self {
        HomelinkError::NetworkUnreachable(err.to_string())
    }
}

/// Result type alias for homelink operations
pub type Result<T> = std::result::Result<T, HomelinkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_prefixes() {
        let err = HomelinkError::InvalidInput("bad url".to_string());
        assert_eq!(err.to_string(), "Invalid input: bad url");

        let err = HomelinkError::PlatformRestricted("lock held".to_string());
        assert!(err.to_string().starts_with("Background execution restricted"));
    }

    #[test]
    fn test_transient_classification() {
        assert!(HomelinkError::TransientAck("x".into()).is_transient());
        assert!(HomelinkError::NetworkUnreachable("x".into()).is_transient());
        assert!(!HomelinkError::Config("x".into()).is_transient());
        assert!(!HomelinkError::Auth("x".into()).is_transient());
    }

    #[test]
    fn test_io_source_is_preserved() {
        let err: HomelinkError =
            std::io::Error::new(std::io::ErrorKind::NotFound, "missing").into();
        assert!(std::error::Error::source(&err).is_some());
    }
}
