//! Execution contexts
//!
//! A [`Context`] owns one engine runtime with one global object, the root
//! table of host-visible objects and the host callback table. It is bound to
//! the thread that built it: every public operation checks the caller's
//! thread first and fails with `WrongThread` otherwise.

use std::fmt;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use jsbridge_core::{
    FATAL_FILENAME, Identity, OUT_OF_MEMORY_MESSAGE, Payload, RootHandle, ThreadAffinity,
};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::engine::{self, Engine, EngineStats};
use crate::error::{ErrorReport, RuntimeError, RuntimeResult};
use crate::host::HostCallbacks;
use crate::scope::{Definer, Scope};
use crate::worker::WorkerId;

/// Source name used when the caller does not give one
pub const DEFAULT_SOURCE_NAME: &str = "<eval>";

/// Host-chosen or engine-allocated context number, passed back in `on_error`
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextId(u32);

impl ContextId {
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// State shared between a context and the host functions installed in it
pub(crate) struct ContextShared {
    pub(crate) id: ContextId,
    pub(crate) worker: Option<WorkerId>,
    pub(crate) host: Arc<dyn HostCallbacks>,
    pub(crate) engine: &'static Engine,
    /// Emptied when the context is dropped, before its runtime goes away
    pub(crate) roots: Mutex<Option<RootHandle>>,
    busy: AtomicBool,
    poisoned: AtomicBool,
}

impl ContextShared {
    pub(crate) fn stats(&self) -> &EngineStats {
        self.engine.stats()
    }

    pub(crate) fn report_error(&self, report: &ErrorReport) {
        self.host
            .on_error(self.id, &report.filename, report.line, &report.message);
    }

    /// Poison the context and tell the host, once
    pub(crate) fn report_out_of_memory(&self) {
        if self.poisoned.swap(true, Ordering::AcqRel) {
            return;
        }
        error!(context = %self.id, "engine ran out of memory, context poisoned");
        self.host
            .on_error(self.id, FATAL_FILENAME, 0, OUT_OF_MEMORY_MESSAGE);
    }

    pub(crate) fn is_poisoned(&self) -> bool {
        self.poisoned.load(Ordering::Acquire)
    }
}

/// Builder for [`Context`]
#[derive(Debug, Default, Clone)]
pub struct ContextBuilder {
    id: Option<ContextId>,
    worker: Option<WorkerId>,
    memory_limit: Option<Option<usize>>,
}

impl ContextBuilder {
    /// Use a host-chosen id instead of allocating one
    pub fn id(mut self, id: ContextId) -> Self {
        self.id = Some(id);
        self
    }

    /// Mark the context as owned by a worker; it gets the worker heap ceiling
    pub fn worker(mut self, worker: WorkerId) -> Self {
        self.worker = Some(worker);
        self
    }

    /// Override the configured heap ceiling (`None` removes the limit)
    pub fn memory_limit(mut self, bytes: Option<usize>) -> Self {
        self.memory_limit = Some(bytes);
        self
    }

    /// Create the context on the calling thread
    pub fn build(self, host: Arc<dyn HostCallbacks>) -> RuntimeResult<Context> {
        let engine = engine::engine()?;
        let id = self.id.unwrap_or_else(|| engine.next_context_id());
        let limit = self.memory_limit.unwrap_or(match self.worker {
            Some(_) => engine.config().worker_memory_limit,
            None => engine.config().memory_limit,
        });

        let runtime = engine.new_runtime(limit)?;
        let js = rquickjs::Context::full(&runtime)?;
        let roots = js.with(|ctx| RootHandle::install(&ctx))?;

        let shared = Arc::new(ContextShared {
            id,
            worker: self.worker,
            host,
            engine,
            roots: Mutex::new(Some(roots)),
            busy: AtomicBool::new(false),
            poisoned: AtomicBool::new(false),
        });

        EngineStats::bump(&engine.stats().contexts_created);
        debug!(context = %id, worker = ?self.worker, memory_limit = ?limit, "context created");

        Ok(Context {
            js,
            runtime,
            shared,
            affinity: ThreadAffinity::current(),
        })
    }
}

/// A JavaScript execution context bound to its creating thread
pub struct Context {
    js: rquickjs::Context,
    runtime: rquickjs::Runtime,
    shared: Arc<ContextShared>,
    affinity: ThreadAffinity,
}

impl Context {
    /// Create a context with an engine-allocated id
    pub fn new(host: Arc<dyn HostCallbacks>) -> RuntimeResult<Self> {
        Self::builder().build(host)
    }

    /// Create a context with a host-chosen id
    pub fn with_id(id: ContextId, host: Arc<dyn HostCallbacks>) -> RuntimeResult<Self> {
        Self::builder().id(id).build(host)
    }

    pub fn builder() -> ContextBuilder {
        ContextBuilder::default()
    }

    pub fn id(&self) -> ContextId {
        self.shared.id
    }

    pub fn worker_id(&self) -> Option<WorkerId> {
        self.shared.worker
    }

    /// Whether the calling thread may use this context
    pub fn thread_can_access(&self) -> bool {
        self.affinity.can_access()
    }

    /// True once the engine has run out of memory in this context
    pub fn is_poisoned(&self) -> bool {
        self.shared.is_poisoned()
    }

    /// Run `f` with a [`Scope`] on this context.
    ///
    /// Fails with `WrongThread` off the owning thread, `ContextPoisoned` after
    /// an out-of-memory, and `Reentrant` when called from inside one of this
    /// context's own host callbacks.
    pub fn with_scope<F, R>(&self, f: F) -> RuntimeResult<R>
    where
        F: for<'js> FnOnce(&Scope<'js>) -> RuntimeResult<R> + Send,
        R: Send,
    {
        self.affinity.check()?;
        if self.shared.is_poisoned() {
            return Err(RuntimeError::ContextPoisoned(self.shared.id));
        }
        if self.shared.busy.swap(true, Ordering::Acquire) {
            warn!(context = %self.shared.id, "context entered from its own host callback");
            return Err(RuntimeError::Reentrant);
        }
        let _busy = scopeguard::guard(&self.shared.busy, |busy| {
            busy.store(false, Ordering::Release)
        });

        let shared = self.shared.clone();
        self.js.with(move |ctx| f(&Scope::new(ctx, shared)))
    }

    /// Evaluate source for its side effects
    pub fn eval(&self, source: &str) -> RuntimeResult<()> {
        self.eval_with_source(source, DEFAULT_SOURCE_NAME)
    }

    /// Evaluate source; `source_name` is used in error reports
    pub fn eval_with_source(&self, source: &str, source_name: &str) -> RuntimeResult<()> {
        self.with_scope(|scope| scope.eval_with_source(source, source_name))
    }

    /// Evaluate source and return the completion value as JSON.
    ///
    /// A completion value JSON cannot represent (e.g. `undefined`) yields the
    /// empty payload.
    pub fn eval_json(&self, source: &str) -> RuntimeResult<Payload> {
        self.eval_json_with_source(source, DEFAULT_SOURCE_NAME)
    }

    pub fn eval_json_with_source(&self, source: &str, source_name: &str) -> RuntimeResult<Payload> {
        self.with_scope(|scope| scope.eval_json_with_source(source, source_name))
    }

    /// Evaluate source and deserialize the completion value
    pub fn eval_as<T: DeserializeOwned>(&self, source: &str) -> RuntimeResult<T> {
        let payload = self.eval_json(source)?;
        if payload.is_undefined() {
            return Ok(serde_json::from_str("null")?);
        }
        Ok(payload.deserialize()?)
    }

    /// Read a file and evaluate it with its path as source name
    pub fn exec_file(&self, path: impl AsRef<Path>) -> RuntimeResult<()> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)?;
        self.eval_with_source(&source, &path.display().to_string())
    }

    /// Drain a reader and evaluate its contents
    pub fn exec_reader(&self, mut reader: impl Read, source_name: &str) -> RuntimeResult<()> {
        let mut source = String::new();
        reader.read_to_string(&mut source)?;
        self.eval_with_source(&source, source_name)
    }

    /// True when `id` is registered in this context
    pub fn contains(&self, id: Identity) -> RuntimeResult<bool> {
        self.with_scope(|scope| Ok(scope.roots()?.contains(id)?))
    }

    /// Force a garbage collection cycle
    pub fn run_gc(&self) -> RuntimeResult<()> {
        self.affinity.check()?;
        self.runtime.run_gc();
        Ok(())
    }

    /// Release the runtime and everything rooted in it
    pub fn destroy(self) {
        debug!(context = %self.shared.id, "context destroy requested");
        drop(self);
    }
}

impl Definer for Context {
    fn define_function(&self, parent: Identity, name: &str, id: Identity) -> RuntimeResult<()> {
        self.with_scope(|scope| scope.define_function(parent, name, id))
    }

    fn define_object(&self, parent: Identity, name: &str, id: Identity) -> RuntimeResult<()> {
        self.with_scope(|scope| scope.define_object(parent, name, id))
    }

    fn define_property(&self, owner: Identity, name: &str) -> RuntimeResult<()> {
        self.with_scope(|scope| scope.define_property(owner, name))
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("id", &self.shared.id)
            .field("worker", &self.shared.worker)
            .field("poisoned", &self.shared.is_poisoned())
            .finish()
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        if !self.affinity.can_access() {
            warn!(context = %self.shared.id, "context dropped off its owning thread");
        }
        // Host functions in the heap keep `shared` alive, so the table has to
        // be released here or the runtime would never be empty.
        self.shared.roots.lock().take();
        EngineStats::bump(&self.shared.stats().contexts_destroyed);
        debug!(context = %self.shared.id, "context destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::init_default;
    use crate::scope::Scope;

    struct NullHost;

    impl HostCallbacks for NullHost {
        fn on_call(&self, _: &Scope<'_>, _: Identity, name: &str, _: &Payload) -> crate::HostReply {
            Err(format!("{name} is not implemented"))
        }
    }

    fn context() -> Context {
        init_default().unwrap();
        Context::new(Arc::new(NullHost)).unwrap()
    }

    #[test]
    fn test_eval_json() {
        let ctx = context();
        assert_eq!(ctx.eval_json("1 + 1").unwrap().as_str(), "2");
        assert_eq!(
            ctx.eval_json("({a: [1, 'x']})").unwrap().as_str(),
            r#"{"a":[1,"x"]}"#
        );
        assert!(ctx.eval_json("undefined").unwrap().is_undefined());
    }

    #[test]
    fn test_state_persists_between_evals() {
        let ctx = context();
        ctx.eval("var counter = 41").unwrap();
        let n: i64 = ctx.eval_as("++counter").unwrap();
        assert_eq!(n, 42);
    }

    #[test]
    fn test_script_error() {
        let ctx = context();
        let err = ctx
            .eval_with_source("throw new Error('ERROR1')", "boot.js")
            .unwrap_err();
        let report = err.report().unwrap();
        assert_eq!(report.message, "Error: ERROR1");
        assert_eq!(report.filename, "boot.js");

        let err = ctx.eval("this is not javascript").unwrap_err();
        assert!(err.is_script_error());
        assert!(err.report().unwrap().message.starts_with("SyntaxError"));
    }

    #[test]
    fn test_with_id() {
        init_default().unwrap();
        let ctx = Context::with_id(ContextId::new(77), Arc::new(NullHost)).unwrap();
        assert_eq!(ctx.id(), ContextId::new(77));
        assert_eq!(ctx.worker_id(), None);
    }

    #[test]
    fn test_wrong_thread_is_rejected() {
        let ctx = context();
        let err = std::thread::scope(|s| s.spawn(|| ctx.eval("1")).join().unwrap()).unwrap_err();
        assert!(matches!(
            err,
            RuntimeError::Core(jsbridge_core::BridgeError::WrongThread)
        ));
        assert!(ctx.eval("1").is_ok());
    }

    #[test]
    fn test_exec_reader() {
        let ctx = context();
        ctx.exec_reader("var fromReader = 'yes'".as_bytes(), "reader.js")
            .unwrap();
        let value: String = ctx.eval_as("fromReader").unwrap();
        assert_eq!(value, "yes");
    }

    #[test]
    fn test_exec_missing_file() {
        let ctx = context();
        let err = ctx.exec_file("/definitely/not/here.js").unwrap_err();
        assert!(matches!(err, RuntimeError::Io(_)));
    }

    #[test]
    fn test_contains_global() {
        let ctx = context();
        assert!(ctx.contains(Identity::GLOBAL).unwrap());
        assert!(!ctx.contains(Identity::new(1234)).unwrap());
    }
}
