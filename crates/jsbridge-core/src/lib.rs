//! Engine-facing primitives for jsbridge.
//!
//! This crate holds the pieces of the boundary protocol that only need an
//! engine context and no host: the JSON value codec, the identity registry
//! (root table + identity markers), exception extraction and the thread
//! affinity check.
//!
//! # Example
//!
//! ```
//! use jsbridge_core::{Identity, RootHandle, codec};
//! use rquickjs::{Context, Runtime};
//!
//! let rt = Runtime::new().unwrap();
//! let ctx = Context::full(&rt).unwrap();
//! ctx.with(|ctx| {
//!     let handle = RootHandle::install(&ctx).unwrap();
//!     let roots = handle.open(&ctx).unwrap();
//!     roots.define_object(Identity::GLOBAL, "math", Identity::new(1)).unwrap();
//!
//!     let value = codec::decode(&ctx, r#"{"answer":42}"#).unwrap();
//!     ctx.globals().set("config", value).unwrap();
//!     let json = codec::encode(&ctx, ctx.eval("config").unwrap()).unwrap();
//!     assert_eq!(json.as_str(), r#"{"answer":42}"#);
//! });
//! ```
//!
//! # Thread Safety
//!
//! Engine values (`rquickjs::Value<'js>` and friends) are bound to the
//! closure passed to `Context::with` and cannot escape it. Contexts
//! themselves are checked at runtime with [`ThreadAffinity`].

mod affinity;
pub mod codec;
mod error;
pub mod exception;
pub mod identity;

pub use affinity::ThreadAffinity;
pub use codec::Payload;
pub use error::{BridgeError, BridgeResult, ErrorReport};
pub use exception::{FATAL_FILENAME, OUT_OF_MEMORY_MESSAGE, Thrown};
pub use identity::{Identity, IdentityAllocator, RootHandle, RootTable, next_identity};

// Re-export the engine for direct access when needed
pub use rquickjs;
