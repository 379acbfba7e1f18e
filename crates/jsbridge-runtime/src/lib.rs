//! jsbridge-runtime - embed a JavaScript engine in a host program.
//!
//! The host evaluates source in isolated contexts and exposes functions,
//! properties and objects into each context's global namespace. Script calls
//! into the host are marshaled synchronously as JSON; objects the host knows
//! about are addressed by small integer [`Identity`] values instead of raw
//! engine handles.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use jsbridge_runtime::{Bindings, Context, EngineConfig, Identity, init};
//! use serde_json::json;
//!
//! init(EngineConfig::default()).unwrap();
//!
//! let bindings = Arc::new(Bindings::new());
//! let ctx = Context::new(bindings.clone()).unwrap();
//!
//! let math = bindings.define_object(&ctx, Identity::GLOBAL, "math").unwrap();
//! bindings
//!     .define_function(&ctx, math, "twice", |_, args| {
//!         Ok(json!(args[0].as_f64().unwrap_or(0.0) * 2.0))
//!     })
//!     .unwrap();
//!
//! let payload = ctx.eval_json("math.twice(21)").unwrap();
//! assert_eq!(payload.as_str(), "42");
//! ctx.destroy();
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │ ContextPool / spawn_worker / spawn_script_worker         │
//! │   one OS thread per Context, blocking host callbacks     │
//! └──────────────────────────────────────────────────────────┘
//!                            ↓
//! ┌──────────────────────────────────────────────────────────┐
//! │ Context (thread-affine)                                  │
//! │   eval / eval_json / define_* → Scope                    │
//! └──────────────────────────────────────────────────────────┘
//!                            ↓
//! ┌──────────────────────────────────────────────────────────┐
//! │ call / property bridges → HostCallbacks (e.g. Bindings)  │
//! │   JSON codec + root table (jsbridge-core)                │
//! └──────────────────────────────────────────────────────────┘
//! ```

pub mod bindings;
pub mod call;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod host;
pub mod pool;
pub mod property;
pub mod scope;
pub mod worker;

pub use bindings::{Bindings, HostFnResult, PropertyCell, ScriptResult};
pub use config::EngineConfig;
pub use context::{Context, ContextBuilder, ContextId, DEFAULT_SOURCE_NAME};
pub use engine::{
    Engine, EngineStats, EngineStatsSnapshot, engine, init, init_default, is_initialized,
};
pub use error::{CoreError, ErrorReport, RuntimeError, RuntimeResult};
pub use host::{HostCallbacks, HostReply};
pub use pool::ContextPool;
pub use scope::{Definer, Scope};
pub use worker::{
    ScriptWorker, WorkerHandle, WorkerId, spawn_script_worker, spawn_worker, spawn_worker_with,
};

pub use jsbridge_core::{FATAL_FILENAME, Identity, OUT_OF_MEMORY_MESSAGE, Payload};

pub mod prelude {
    pub use crate::bindings::{Bindings, PropertyCell};
    pub use crate::config::EngineConfig;
    pub use crate::context::{Context, ContextId};
    pub use crate::engine::{init, init_default};
    pub use crate::error::{RuntimeError, RuntimeResult};
    pub use crate::host::{HostCallbacks, HostReply};
    pub use crate::pool::ContextPool;
    pub use crate::scope::{Definer, Scope};
    pub use jsbridge_core::{Identity, Payload};
}
