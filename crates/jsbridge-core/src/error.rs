//! Core error types for the bridge
//!
//! Every operation that crosses the native/host boundary reports failure
//! through [`BridgeError`] instead of status codes with out-parameters.

use std::fmt;

use thiserror::Error;

/// Result type alias for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;

/// An uncaught script error as seen by the diagnostic sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorReport {
    pub filename: String,
    pub line: u32,
    pub message: String,
}

impl ErrorReport {
    pub fn new(filename: impl Into<String>, line: u32, message: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            line,
            message: message.into(),
        }
    }
}

impl fmt::Display for ErrorReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} {}", self.filename, self.line, self.message)
    }
}

/// Structured error types for bridge operations
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Uncaught exception (syntax or runtime) raised by evaluated source
    #[error("{0}")]
    Script(ErrorReport),

    /// JSON could not be produced or parsed on one side of a crossing
    #[error("Codec error: {0}")]
    Codec(String),

    /// Host-side JSON (de)serialization failure
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// An identity did not resolve to a live object
    #[error("Identity {id} is invalid: {reason}")]
    Identity { id: u32, reason: String },

    /// The object carries no identity marker
    #[error("Object was never registered with the identity registry")]
    UnregisteredObject,

    /// Identity 0 belongs to the global object
    #[error("Identity {0} is reserved for the global object")]
    ReservedIdentity(u32),

    /// Identity already occupied in this context
    #[error("Identity {0} is already registered in this context")]
    IdentityInUse(u32),

    /// The engine ran out of memory; the owning context must not be reused
    #[error("Engine ran out of memory")]
    OutOfMemory,

    /// The calling thread does not own the context
    #[error("Context is owned by another thread")]
    WrongThread,

    /// Non-exception failure reported by the engine
    #[error("Engine error: {0}")]
    Engine(String),

    /// Internal/unexpected error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl BridgeError {
    /// Create a script error with location
    pub fn script(filename: impl Into<String>, line: u32, message: impl Into<String>) -> Self {
        Self::Script(ErrorReport::new(filename, line, message))
    }

    /// Create a codec error
    pub fn codec(message: impl Into<String>) -> Self {
        Self::Codec(message.into())
    }

    /// Create an identity error
    pub fn identity(id: u32, reason: impl Into<String>) -> Self {
        Self::Identity {
            id,
            reason: reason.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Check if this is a user-facing script error
    pub fn is_script_error(&self) -> bool {
        matches!(self, Self::Script(_))
    }

    /// Identity failures indicate a registration bug rather than a user error
    pub fn is_identity_error(&self) -> bool {
        matches!(
            self,
            Self::Identity { .. }
                | Self::UnregisteredObject
                | Self::ReservedIdentity(_)
                | Self::IdentityInUse(_)
        )
    }

    /// Get the error report for script errors
    pub fn report(&self) -> Option<&ErrorReport> {
        match self {
            Self::Script(report) => Some(report),
            _ => None,
        }
    }
}

impl From<rquickjs::Error> for BridgeError {
    fn from(e: rquickjs::Error) -> Self {
        match e {
            rquickjs::Error::Allocation => Self::OutOfMemory,
            other => Self::Engine(other.to_string()),
        }
    }
}
