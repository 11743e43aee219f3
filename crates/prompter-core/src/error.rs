use thiserror::Error;

/// Wire-safe text published for failures that must not leak internals.
pub const GENERIC_ERROR_MESSAGE: &str = "Something went wrong. Please try again.";

/// Failure of a tool handler.
///
/// Only validation messages cross the wire verbatim; everything else is
/// flattened to a fixed message so internal detail stays in the logs.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Domain validation failed; the message is safe to show the client.
    #[error("{0}")]
    Validation(String),

    /// A pending input request was cancelled by the client.
    #[error("Input request was cancelled.")]
    InputCancelled,

    /// Anything else. The detail is logged, never published.
    #[error("{0}")]
    Internal(String),
}

impl HandlerError {
    pub fn validation(message: impl Into<String>) -> Self {
        HandlerError::Validation(message.into())
    }

    pub fn internal(error: impl std::fmt::Display) -> Self {
        HandlerError::Internal(error.to_string())
    }

    /// Human-readable text published as TOOL_ERROR.
    pub fn wire_message(&self) -> String {
        match self {
            HandlerError::Validation(message) => message.clone(),
            HandlerError::InputCancelled => self.to_string(),
            HandlerError::Internal(_) => GENERIC_ERROR_MESSAGE.to_string(),
        }
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(error: serde_json::Error) -> Self {
        HandlerError::internal(error)
    }
}
