//! Error types for Waypoint

use thiserror::Error;

/// Main error type for Waypoint
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration source missing, unreadable or empty
    #[error("Configuration read error: {0}")]
    ConfigRead(String),

    /// Configuration present but structurally malformed
    #[error("Configuration parse error: {0}")]
    ConfigParse(String),

    #[error("Interface not found: {0}")]
    InterfaceNotFound(String),

    #[error("No {family} address available on interface {interface}")]
    AddressFamilyUnavailable {
        interface: String,
        family: &'static str,
    },

    #[error("Unsupported network kind: {0}")]
    UnsupportedNetworkKind(String),

    /// A default capability stub was invoked on an adapter that does not implement it
    #[error("{capability} not supported by {adapter}")]
    CapabilityUnsupported {
        adapter: String,
        capability: &'static str,
    },

    #[error("DNS error: {0}")]
    Dns(String),

    #[error("Proxy error: {0}")]
    Proxy(String),

    #[error("Timeout")]
    Timeout,
}

/// Result type alias for Waypoint
pub type Result<T> = std::result::Result<T, Error>;
