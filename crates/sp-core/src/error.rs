use thiserror::Error;

/// Error carried across every layer of the player. `code` is a stable
/// machine-readable tag, `message` is display text, `details` is an optional
/// structured payload (e.g. the property names of a required-data failure).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{code}: {message}")]
pub struct ScriptPlayError {
    pub code: String,
    pub message: String,
    pub details: Vec<String>,
}

impl ScriptPlayError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: Vec::new(),
        }
    }

    pub fn with_details(
        code: impl Into<String>,
        message: impl Into<String>,
        details: Vec<String>,
    ) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details,
        }
    }
}
