//! Error types for jsbridge-runtime
//!
//! Re-exports core errors from jsbridge-core and adds runtime-specific errors.

use thiserror::Error;

use crate::context::ContextId;
use crate::worker::WorkerId;

// Re-export core error types
pub use jsbridge_core::{BridgeError as CoreError, BridgeResult as CoreResult, ErrorReport};

/// Errors that can occur during runtime operations
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Codec, identity, script or engine error
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("Engine is not initialized, call jsbridge_runtime::init first")]
    NotInitialized,

    #[error("Engine is already initialized")]
    AlreadyInitialized,

    #[error("Engine initialization failed: {0}")]
    EngineInit(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    /// The context ran out of memory earlier and refuses further work
    #[error("Context {0} ran out of memory and can no longer be used")]
    ContextPoisoned(ContextId),

    /// The context was entered again from inside one of its own host callbacks
    #[error("Context is already executing, use the scope handed to the host callback")]
    Reentrant,

    /// A host callback reported failure; the message is what the script sees
    #[error("{0}")]
    Host(String),

    #[error("Failed to spawn worker {id}: {message}")]
    WorkerSpawn { id: WorkerId, message: String },

    /// Worker context could not be created
    #[error("worker {id}: {message}")]
    WorkerInit { id: WorkerId, message: String },

    #[error("Worker {0} panicked")]
    WorkerPanicked(WorkerId),

    #[error("Worker {0} has stopped")]
    WorkerStopped(WorkerId),

    #[error("Context pool is shut down")]
    PoolClosed,

    #[error("Job was dropped before it completed")]
    JobDropped,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RuntimeError {
    /// Create a host failure
    pub fn host(message: impl Into<String>) -> Self {
        Self::Host(message.into())
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Core(CoreError::internal(message))
    }

    /// Did a script throw?
    pub fn is_script_error(&self) -> bool {
        matches!(self, Self::Core(e) if e.is_script_error())
    }

    pub fn is_identity_error(&self) -> bool {
        matches!(self, Self::Core(e) if e.is_identity_error())
    }

    pub fn is_out_of_memory(&self) -> bool {
        matches!(
            self,
            Self::Core(CoreError::OutOfMemory) | Self::ContextPoisoned(_)
        )
    }

    /// The script error report, if this error came from a script
    pub fn report(&self) -> Option<&ErrorReport> {
        match self {
            Self::Core(e) => e.report(),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for RuntimeError {
    fn from(e: serde_json::Error) -> Self {
        Self::Core(CoreError::Json(e))
    }
}

impl From<rquickjs::Error> for RuntimeError {
    fn from(e: rquickjs::Error) -> Self {
        Self::Core(CoreError::from(e))
    }
}

/// Result type alias for runtime operations
pub type RuntimeResult<T> = Result<T, RuntimeError>;
