//! Session error kinds
//!
//! Everything fatal bubbles up to the session controller, which stops the
//! session and reports one consolidated outcome. Benign recognizer restarts
//! are absorbed inside the local engine and never appear here.

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum SessionError {
    /// Microphone or recognition permission was denied by the host.
    /// Not retryable without an external settings change.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The duplex socket failed while connected. Never reconnected
    /// mid-session.
    #[error("transport failure: {0}")]
    Transport(String),

    /// The remote backend reported task-failed. The message is surfaced
    /// verbatim from `header.error_message`.
    #[error("recognition task failed: {0}")]
    Protocol(String),

    /// The on-device recognizer terminated with a code outside the known
    /// benign set.
    #[error("recognizer error {code}: {message}")]
    Engine { code: i32, message: String },

    /// Unusable audio device or format, detected at session start.
    #[error("audio configuration error: {0}")]
    Configuration(String),
}

impl SessionError {
    pub fn engine(code: i32, message: impl Into<String>) -> Self {
        Self::Engine {
            code,
            message: message.into(),
        }
    }
}
