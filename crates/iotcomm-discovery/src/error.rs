//! Error types for the discovery engine

use iotcomm_plugin_api::PluginError;
use std::sync::Arc;
use thiserror::Error;

/// Result type alias for discovery operations
pub type Result<T> = std::result::Result<T, DiscoveryError>;

/// Errors that can occur while advertising or discovering services.
///
/// Errors raised inside an advertise/discover loop are handed to the delivery callback
/// before the loop decides whether to keep going, so the type is cheap to clone.
#[derive(Debug, Clone, Error)]
pub enum DiscoveryError {
    /// mDNS service daemon failed to initialize
    #[error("Failed to initialize mDNS daemon: {0}")]
    MdnsInitFailed(String),

    /// Failed to browse for services
    #[error("Failed to browse for service type '{service_type}': {reason}")]
    BrowseFailed { service_type: String, reason: String },

    /// Failed to register/announce a service
    #[error("Failed to register service '{service_name}': {reason}")]
    RegisterFailed {
        service_name: String,
        reason: String,
    },

    /// Another host already owns the instance name
    #[error("Service name already in use: {0}")]
    NameConflict(String),

    /// Host name could not be resolved to an address
    #[error("Failed to resolve host '{host}': {reason}")]
    AddressResolution { host: String, reason: String },

    /// The query cannot be turned into filters
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// Invalid engine configuration
    #[error("Invalid discovery configuration: {0}")]
    InvalidConfig(String),

    /// The mDNS engine reported an error
    #[error("mDNS protocol error: {0}")]
    Protocol(String),

    /// The wait was interrupted; the loop retries
    #[error("Interrupted: {0}")]
    Interrupted(String),

    /// The mDNS event source went away
    #[error("mDNS event channel closed")]
    ChannelClosed,

    /// Transport plugin could not be resolved
    #[error("Plugin error: {0}")]
    Plugin(#[from] PluginError),

    /// IO error
    #[error("IO error: {0}")]
    Io(Arc<std::io::Error>),
}

impl DiscoveryError {
    /// Numeric code handed to delivery callbacks.
    pub fn code(&self) -> i32 {
        match self {
            DiscoveryError::MdnsInitFailed(_) => 1,
            DiscoveryError::BrowseFailed { .. } => 2,
            DiscoveryError::RegisterFailed { .. } => 3,
            DiscoveryError::NameConflict(_) => 4,
            DiscoveryError::AddressResolution { .. } => 5,
            DiscoveryError::InvalidQuery(_) => 6,
            DiscoveryError::InvalidConfig(_) => 7,
            DiscoveryError::Protocol(_) => 8,
            DiscoveryError::Interrupted(_) => 9,
            DiscoveryError::ChannelClosed => 10,
            DiscoveryError::Plugin(_) => 11,
            DiscoveryError::Io(_) => 12,
        }
    }

    /// Returns true if the loop should keep waiting after this error.
    pub fn is_transient(&self) -> bool {
        matches!(self, DiscoveryError::Interrupted(_))
    }
}

impl From<std::io::Error> for DiscoveryError {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::Interrupted {
            DiscoveryError::Interrupted(err.to_string())
        } else {
            DiscoveryError::Io(Arc::new(err))
        }
    }
}
