use std::sync::Arc;
use thiserror::Error;

/// Plugin system error types
#[derive(Debug, Clone, Error)]
pub enum PluginError {
    #[error("Plugin not found: {module} (searched: {searched})")]
    NotFound { module: String, searched: String },

    #[error("Failed to load plugin: {0}")]
    LoadError(String),

    #[error("Plugin {0} does not export an interface identifier")]
    MissingInterface(String),

    #[error("Interface descriptor not found: {interface} (searched: {searched})")]
    InterfaceNotFound { interface: String, searched: String },

    #[error("Invalid interface descriptor: {0}")]
    InvalidInterface(String),

    #[error("Plugin {module} does not export '{symbol}'")]
    UnresolvedSymbol { module: String, symbol: String },

    #[error("Plugin initialization failed: {0}")]
    InitFailed(String),

    #[error("Operation not found: {0}")]
    OperationNotFound(String),

    #[error("Handle has been released")]
    HandleReleased,

    #[error("Invalid arguments for '{operation}': {reason}")]
    InvalidArguments { operation: String, reason: String },

    #[error("Operation failed: {0}")]
    OperationFailed(String),

    #[error("IO error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("Serialization error: {0}")]
    Serialization(Arc<serde_json::Error>),
}

impl PluginError {
    /// Creates an invalid arguments error.
    pub fn invalid_arguments(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidArguments {
            operation: operation.into(),
            reason: reason.into(),
        }
    }
}

impl From<std::io::Error> for PluginError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}

impl From<serde_json::Error> for PluginError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(Arc::new(err))
    }
}

pub type PluginResult<T> = Result<T, PluginError>;
