//! Typed host bindings
//!
//! [`Bindings`] is a ready-made [`HostCallbacks`] table: functions are Rust
//! closures over `serde_json::Value` arguments, properties are shared value
//! cells. One `Bindings` can back many contexts because identities come from
//! a process-wide allocator.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use jsbridge_runtime::{Bindings, Context, Identity, init_default};
//! use serde_json::json;
//!
//! init_default().unwrap();
//! let bindings = Arc::new(Bindings::new());
//! let ctx = Context::new(bindings.clone()).unwrap();
//!
//! bindings
//!     .define_function(&ctx, Identity::GLOBAL, "greet", |_, args| {
//!         let who = args.first().and_then(|v| v.as_str()).unwrap_or("world");
//!         Ok(json!(format!("hello {who}")))
//!     })
//!     .unwrap();
//! let greeting: String = ctx.eval_as("greet('host')").unwrap();
//! assert_eq!(greeting, "hello host");
//! ```

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use crossbeam_channel::Sender;
use dashmap::DashMap;
use jsbridge_core::{Identity, Payload, next_identity};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tracing::{debug, error, trace, warn};

use crate::context::{Context, ContextId};
use crate::error::{ErrorReport, RuntimeResult};
use crate::host::{HostCallbacks, HostReply};
use crate::scope::{Definer, Scope};
use crate::worker::{WorkerId, panic_message};

/// Result of a host function: the return value, or the message thrown into the script
pub type HostFnResult = Result<Value, String>;

type HostFn = Arc<dyn Fn(&Scope<'_>, Vec<Value>) -> HostFnResult + Send + Sync>;
type ReadyFn = Arc<dyn Fn(WorkerId, &mut Context) + Send + Sync>;

/// Completion of one script worker run, as delivered to a result sink
#[derive(Debug, Clone)]
pub struct ScriptResult {
    pub name: String,
    pub outcome: Result<Payload, String>,
}

/// Shared value behind a host property
#[derive(Debug, Clone)]
pub struct PropertyCell {
    value: Arc<RwLock<Value>>,
    read_only: bool,
}

impl PropertyCell {
    pub fn new(initial: Value) -> Self {
        Self {
            value: Arc::new(RwLock::new(initial)),
            read_only: false,
        }
    }

    /// A cell scripts can read but not assign
    pub fn read_only(initial: Value) -> Self {
        Self {
            read_only: true,
            ..Self::new(initial)
        }
    }

    pub fn get(&self) -> Value {
        self.value.read().clone()
    }

    /// Set from the host side; ignores the read-only flag
    pub fn set(&self, value: Value) {
        *self.value.write() = value;
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }
}

#[derive(Clone)]
struct FunctionBinding {
    name: String,
    handler: HostFn,
}

/// Host callback table backed by Rust closures and value cells
#[derive(Default)]
pub struct Bindings {
    functions: DashMap<Identity, FunctionBinding>,
    properties: DashMap<(Identity, String), PropertyCell>,
    errors: Mutex<Vec<(ContextId, ErrorReport)>>,
    results: Option<Sender<ScriptResult>>,
    ready: Option<ReadyFn>,
}

impl Bindings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forward script worker results to `sink`
    pub fn with_result_sink(mut self, sink: Sender<ScriptResult>) -> Self {
        self.results = Some(sink);
        self
    }

    /// Run `f` on every worker started with these bindings
    pub fn with_worker_ready<F>(mut self, f: F) -> Self
    where
        F: Fn(WorkerId, &mut Context) + Send + Sync + 'static,
    {
        self.ready = Some(Arc::new(f));
        self
    }

    /// Add a handler under a fresh identity without installing it anywhere.
    ///
    /// Install it later with [`Definer::define_function`] on each context
    /// that should see it.
    pub fn register_function<F>(&self, name: &str, handler: F) -> RuntimeResult<Identity>
    where
        F: Fn(&Scope<'_>, Vec<Value>) -> HostFnResult + Send + Sync + 'static,
    {
        let id = next_identity()?;
        self.functions.insert(
            id,
            FunctionBinding {
                name: name.to_owned(),
                handler: Arc::new(handler),
            },
        );
        trace!(identity = id.get(), name, "function registered");
        Ok(id)
    }

    /// Register `handler` and install it as `parent[name]`
    pub fn define_function<D, F>(
        &self,
        definer: &D,
        parent: Identity,
        name: &str,
        handler: F,
    ) -> RuntimeResult<Identity>
    where
        D: Definer + ?Sized,
        F: Fn(&Scope<'_>, Vec<Value>) -> HostFnResult + Send + Sync + 'static,
    {
        let id = self.register_function(name, handler)?;
        if let Err(e) = definer.define_function(parent, name, id) {
            self.functions.remove(&id);
            return Err(e);
        }
        Ok(id)
    }

    /// Create an empty object as `parent[name]` under a fresh identity
    pub fn define_object<D>(&self, definer: &D, parent: Identity, name: &str) -> RuntimeResult<Identity>
    where
        D: Definer + ?Sized,
    {
        let id = next_identity()?;
        definer.define_object(parent, name, id)?;
        Ok(id)
    }

    /// Back `owner[name]` with `cell` without installing it
    pub fn register_property(&self, owner: Identity, name: &str, cell: PropertyCell) {
        self.properties.insert((owner, name.to_owned()), cell);
    }

    /// Install `owner[name]` backed by a new cell holding `initial`
    pub fn define_property<D>(
        &self,
        definer: &D,
        owner: Identity,
        name: &str,
        initial: Value,
    ) -> RuntimeResult<PropertyCell>
    where
        D: Definer + ?Sized,
    {
        let cell = PropertyCell::new(initial);
        self.define_property_cell(definer, owner, name, cell.clone())?;
        Ok(cell)
    }

    /// Install `owner[name]` backed by an existing cell
    pub fn define_property_cell<D>(
        &self,
        definer: &D,
        owner: Identity,
        name: &str,
        cell: PropertyCell,
    ) -> RuntimeResult<()>
    where
        D: Definer + ?Sized,
    {
        let key = (owner, name.to_owned());
        let previous = self.properties.insert(key.clone(), cell);
        if let Err(e) = definer.define_property(owner, name) {
            match previous {
                Some(previous) => self.properties.insert(key, previous),
                None => self.properties.remove(&key).map(|(_, cell)| cell),
            };
            return Err(e);
        }
        Ok(())
    }

    /// Drop the handler for `id`; later calls fail in the script
    pub fn remove_function(&self, id: Identity) -> bool {
        self.functions.remove(&id).is_some()
    }

    /// Reports collected from `on_error`, oldest first
    pub fn take_errors(&self) -> Vec<(ContextId, ErrorReport)> {
        std::mem::take(&mut *self.errors.lock())
    }

    /// Most recent report for `context`
    pub fn last_error(&self, context: ContextId) -> Option<ErrorReport> {
        self.errors
            .lock()
            .iter()
            .rev()
            .find(|(id, _)| *id == context)
            .map(|(_, report)| report.clone())
    }
}

impl HostCallbacks for Bindings {
    fn on_call(&self, scope: &Scope<'_>, callee: Identity, name: &str, args: &Payload) -> HostReply {
        // Clone out so the table is not locked while the handler runs; handlers
        // may register more functions.
        let binding = self
            .functions
            .get(&callee)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| format!("attempt to call function {name} that is not bound"))?;

        let args: Vec<Value> = match args.as_str() {
            "" => Vec::new(),
            text => serde_json::from_str(text).map_err(|e| format!("{name}: {e}"))?,
        };

        match catch_unwind(AssertUnwindSafe(|| (binding.handler)(scope, args))) {
            Ok(Ok(value)) => Ok(value.to_string()),
            Ok(Err(message)) => Err(message),
            Err(panic) => {
                let message = format!("{}: {}", binding.name, panic_message(panic.as_ref()));
                error!(function = %binding.name, panic = %message, "host function panicked");
                Err(message)
            }
        }
    }

    fn on_error(&self, context: ContextId, filename: &str, line: u32, message: &str) {
        warn!(context = %context, filename, line, error = message, "script error");
        self.errors
            .lock()
            .push((context, ErrorReport::new(filename, line, message)));
    }

    fn on_get(&self, _scope: &Scope<'_>, owner: Identity, name: &str) -> HostReply {
        let cell = self
            .properties
            .get(&(owner, name.to_owned()))
            .map(|entry| entry.value().clone())
            .ok_or_else(|| format!("attempt to get property {name} that is not bound"))?;
        Ok(cell.get().to_string())
    }

    fn on_set(&self, _scope: &Scope<'_>, owner: Identity, name: &str, value: &Payload) -> HostReply {
        let cell = self
            .properties
            .get(&(owner, name.to_owned()))
            .map(|entry| entry.value().clone())
            .ok_or_else(|| format!("attempt to set property {name} that is not bound"))?;
        if cell.is_read_only() {
            return Err(format!("property {name} is read-only"));
        }

        let value: Value = match value.as_str() {
            "" => Value::Null,
            text => serde_json::from_str(text).map_err(|e| format!("{name}: {e}"))?,
        };
        let reply = value.to_string();
        cell.set(value);
        Ok(reply)
    }

    fn on_worker_ready(&self, worker: WorkerId, context: &mut Context) {
        match &self.ready {
            Some(ready) => ready(worker, context),
            None => debug!(worker, "worker ready, nothing to run"),
        }
    }

    fn on_worker_failed(&self, worker: WorkerId, message: &str) {
        error!(worker, error = message, "worker failed to start");
        self.errors.lock().push((
            ContextId::new(0),
            ErrorReport::new(format!("worker {worker}"), 0, message),
        ));
    }

    fn on_result(&self, name: &str, outcome: Result<&Payload, &str>) {
        let Some(sink) = &self.results else {
            trace!(name, "script result dropped, no sink");
            return;
        };
        let result = ScriptResult {
            name: name.to_owned(),
            outcome: outcome.map(Clone::clone).map_err(str::to_owned),
        };
        if sink.send(result).is_err() {
            warn!(name, "script result sink is closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::init_default;
    use serde_json::json;

    fn setup() -> (Arc<Bindings>, Context) {
        init_default().unwrap();
        let bindings = Arc::new(Bindings::new());
        let ctx = Context::new(bindings.clone()).unwrap();
        (bindings, ctx)
    }

    #[test]
    fn test_function_gets_json_arguments() {
        let (bindings, ctx) = setup();
        bindings
            .define_function(&ctx, Identity::GLOBAL, "add", |_, args| {
                let sum: f64 = args.iter().filter_map(Value::as_f64).sum();
                Ok(json!(sum))
            })
            .unwrap();
        let sum: f64 = ctx.eval_as("add(1, 2, 3.5)").unwrap();
        assert_eq!(sum, 6.5);
    }

    #[test]
    fn test_error_is_thrown_with_name() {
        let (bindings, ctx) = setup();
        bindings
            .define_function(&ctx, Identity::GLOBAL, "raise", |_, args| {
                Err(format!("raise: {}", args[0].as_str().unwrap_or_default()))
            })
            .unwrap();
        let err = ctx.eval("raise('BANG')").unwrap_err();
        assert_eq!(err.report().unwrap().message, "Error: raise: BANG");

        let errors = bindings.take_errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].0, ctx.id());
        assert_eq!(errors[0].1.message, "Error: raise: BANG");
        assert!(bindings.take_errors().is_empty());
    }

    #[test]
    fn test_panic_becomes_script_error() {
        let (bindings, ctx) = setup();
        bindings
            .define_function(&ctx, Identity::GLOBAL, "explode", |_, _| panic!("BANG"))
            .unwrap();
        let message: String = ctx
            .eval_as("try { explode() } catch (e) { e.message }")
            .unwrap();
        assert_eq!(message, "explode: BANG");
    }

    #[test]
    fn test_removed_function_fails() {
        let (bindings, ctx) = setup();
        let id = bindings
            .define_function(&ctx, Identity::GLOBAL, "gone", |_, _| Ok(Value::Null))
            .unwrap();
        assert!(bindings.remove_function(id));
        let err = ctx.eval("gone()").unwrap_err();
        assert!(err.report().unwrap().message.contains("not bound"));
    }

    #[test]
    fn test_property_cell() {
        let (bindings, ctx) = setup();
        let obj = bindings
            .define_object(&ctx, Identity::GLOBAL, "settings")
            .unwrap();
        let cell = bindings
            .define_property(&ctx, obj, "level", json!(3))
            .unwrap();

        let level: i64 = ctx.eval_as("settings.level").unwrap();
        assert_eq!(level, 3);

        ctx.eval("settings.level = {deep: [true]}").unwrap();
        assert_eq!(cell.get(), json!({"deep": [true]}));

        cell.set(json!("from host"));
        let level: String = ctx.eval_as("settings.level").unwrap();
        assert_eq!(level, "from host");
    }

    #[test]
    fn test_read_only_cell() {
        let (bindings, ctx) = setup();
        bindings
            .define_property_cell(
                &ctx,
                Identity::GLOBAL,
                "version",
                PropertyCell::read_only(json!("1.0")),
            )
            .unwrap();
        let message: String = ctx
            .eval_as("try { version = '2.0'; 'changed' } catch (e) { e.message }")
            .unwrap();
        assert_eq!(message, "property version is read-only");
        let version: String = ctx.eval_as("version").unwrap();
        assert_eq!(version, "1.0");
    }

    #[test]
    fn test_define_from_inside_a_call() {
        let (bindings, ctx) = setup();
        let inner = bindings.clone();
        bindings
            .define_function(&ctx, Identity::GLOBAL, "mkfun", move |scope, _| {
                inner
                    .define_function(scope, Identity::GLOBAL, "made", |_, _| Ok(json!("made it")))
                    .map_err(|e| e.to_string())?;
                Ok(Value::Null)
            })
            .unwrap();
        let result: String = ctx.eval_as("mkfun(); made()").unwrap();
        assert_eq!(result, "made it");
    }

    #[test]
    fn test_failed_install_unregisters() {
        let (bindings, ctx) = setup();
        let err = bindings
            .define_function(&ctx, Identity::new(9999), "orphan", |_, _| Ok(Value::Null))
            .unwrap_err();
        assert!(err.is_identity_error());
        assert!(bindings.functions.is_empty());
    }
}
