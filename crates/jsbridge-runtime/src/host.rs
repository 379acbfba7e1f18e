//! Host callback table
//!
//! Everything the engine needs from the host goes through [`HostCallbacks`].
//! One table is attached to each [`Context`] when it is built and shared by
//! every bridge on that context. Callbacks run synchronously on the context's
//! thread while script execution is suspended.

use jsbridge_core::{Identity, Payload};
use tracing::{debug, error, trace, warn};

use crate::context::{Context, ContextId};
use crate::scope::Scope;
use crate::worker::WorkerId;

/// Host answer to a call or property access.
///
/// `Ok(json)` is decoded as the result (empty text means `undefined`).
/// `Err(message)` is thrown into the script as an `Error` with that message.
pub type HostReply = Result<String, String>;

/// The host side of the boundary protocol.
pub trait HostCallbacks: Send + Sync {
    /// A script called the function registered as `callee`.
    ///
    /// `args` is the JSON array of the call's positional arguments.
    fn on_call(&self, scope: &Scope<'_>, callee: Identity, name: &str, args: &Payload)
    -> HostReply;

    /// An uncaught script error, or `("__fatal__", 0, ..)` when the engine ran
    /// out of memory.
    fn on_error(&self, context: ContextId, filename: &str, line: u32, message: &str) {
        warn!(context = %context, filename, line, error = message, "uncaught script error");
    }

    /// A script read the host property `name` of `owner`.
    fn on_get(&self, _scope: &Scope<'_>, owner: Identity, name: &str) -> HostReply {
        Err(format!("property {name} of {owner} is not readable"))
    }

    /// A script assigned `value` to the host property `name` of `owner`.
    ///
    /// The reply is the value the property accepted.
    fn on_set(&self, _scope: &Scope<'_>, owner: Identity, name: &str, _value: &Payload) -> HostReply {
        Err(format!("property {name} of {owner} is not writable"))
    }

    /// A worker finished building its context.
    ///
    /// The worker thread blocks here; the host drives the context from inside
    /// this call. The context is destroyed once it returns.
    fn on_worker_ready(&self, worker: WorkerId, context: &mut Context) {
        debug!(worker, context = %context.id(), "worker ready, nothing to run");
    }

    /// A worker could not build its context and is exiting.
    fn on_worker_failed(&self, worker: WorkerId, message: &str) {
        error!(worker, error = message, "worker failed to start");
    }

    /// A script worker finished one run of its source.
    fn on_result(&self, name: &str, outcome: Result<&Payload, &str>) {
        match outcome {
            Ok(payload) => trace!(name, bytes = payload.byte_len(), "script result"),
            Err(message) => warn!(name, error = message, "script run failed"),
        }
    }
}
