use serde::Serialize;

use crate::dispatcher::UnitOutcome;

/// A parameter that failed schema validation. `field` is the dotted/indexed
/// path into the params object (`renames[1].name`), or `params` for the root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        let field = field.into();
        Self {
            field: if field.is_empty() {
                "params".to_string()
            } else {
                field
            },
            message: message.into(),
        }
    }
}

/// Structured error type for the bridge. Serialized as `{ code, detail }` so
/// tool-calling clients can match on the error kind.
#[derive(Debug, Clone, Serialize, thiserror::Error)]
#[serde(tag = "code", content = "detail")]
pub enum BridgeError {
    #[error("Invalid params: {0}")]
    Validation(ValidationError),

    #[error("Unknown command: {name}")]
    UnknownCommand { name: String },

    #[error("Command already registered: {name}")]
    DuplicateCommand { name: String },

    #[error("Schema of {name} does not compile: {message}")]
    InvalidSchema { name: String, message: String },

    #[error("{command} failed: {message}")]
    Execution { command: String, message: String },

    /// The host did not answer in time. Whatever the host was doing may still
    /// complete on its side.
    #[error("{command} timed out after {after_ms} ms (request {id}); the host may still apply it")]
    Timeout {
        command: String,
        id: String,
        after_ms: u64,
    },

    #[error("{command}: {message}")]
    BatchFailed {
        command: String,
        message: String,
        results: Vec<UnitOutcome>,
    },

    #[error("No design host connected")]
    NotConnected,

    #[error("Host connection closed")]
    Disconnected,

    #[error("Channel error: {message}")]
    Channel { message: String },

    #[error("I/O error: {message}")]
    Io { message: String },

    #[error("Settings error: {message}")]
    Settings { message: String },
}

impl BridgeError {
    /// Stable short code, matching the serialized `code` tag.
    pub fn code(&self) -> &'static str {
        match self {
            BridgeError::Validation(_) => "Validation",
            BridgeError::UnknownCommand { .. } => "UnknownCommand",
            BridgeError::DuplicateCommand { .. } => "DuplicateCommand",
            BridgeError::InvalidSchema { .. } => "InvalidSchema",
            BridgeError::Execution { .. } => "Execution",
            BridgeError::Timeout { .. } => "Timeout",
            BridgeError::BatchFailed { .. } => "BatchFailed",
            BridgeError::NotConnected => "NotConnected",
            BridgeError::Disconnected => "Disconnected",
            BridgeError::Channel { .. } => "Channel",
            BridgeError::Io { .. } => "Io",
            BridgeError::Settings { .. } => "Settings",
        }
    }

    /// Whether the failure happened before anything was sent to the host.
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            BridgeError::Validation(_)
                | BridgeError::UnknownCommand { .. }
                | BridgeError::DuplicateCommand { .. }
                | BridgeError::InvalidSchema { .. }
                | BridgeError::NotConnected
        )
    }
}

impl From<ValidationError> for BridgeError {
    fn from(e: ValidationError) -> Self {
        BridgeError::Validation(e)
    }
}

impl From<std::io::Error> for BridgeError {
    fn from(e: std::io::Error) -> Self {
        BridgeError::Io {
            message: e.to_string(),
        }
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(e: serde_json::Error) -> Self {
        BridgeError::Channel {
            message: e.to_string(),
        }
    }
}

/// Allow converting BridgeError to String for CLI output and HTTP bodies.
impl From<BridgeError> for String {
    fn from(e: BridgeError) -> String {
        e.to_string()
    }
}
