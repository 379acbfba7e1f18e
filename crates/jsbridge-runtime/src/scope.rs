//! Scoped access to a running context
//!
//! A [`Scope`] is the capability to touch a context's engine state. Host
//! callbacks receive one for the context that called them, which is how they
//! re-enter it (evaluate more source, define functions) while the outer
//! evaluation is suspended.

use std::sync::Arc;

use jsbridge_core::{BridgeError, Identity, Payload, RootTable, Thrown, codec};
use rquickjs::{Ctx, Exception, Object, Value};
use serde::de::DeserializeOwned;
use tracing::{debug_span, error, trace};

use crate::context::{ContextId, ContextShared, DEFAULT_SOURCE_NAME};
use crate::error::{RuntimeError, RuntimeResult};
use crate::worker::WorkerId;
use crate::{call, property};

/// Registration of host-backed names, shared by [`crate::Context`] and [`Scope`]
pub trait Definer {
    /// Install a host function as property `name` of `parent`, registered as `id`
    fn define_function(&self, parent: Identity, name: &str, id: Identity) -> RuntimeResult<()>;

    /// Install an empty object as property `name` of `parent`, registered as `id`
    fn define_object(&self, parent: Identity, name: &str, id: Identity) -> RuntimeResult<()>;

    /// Install a host getter/setter pair as property `name` of `owner`
    fn define_property(&self, owner: Identity, name: &str) -> RuntimeResult<()>;
}

pub struct Scope<'js> {
    ctx: Ctx<'js>,
    shared: Arc<ContextShared>,
    /// Created for a host callback rather than by the host itself
    in_callback: bool,
}

impl<'js> Scope<'js> {
    pub(crate) fn new(ctx: Ctx<'js>, shared: Arc<ContextShared>) -> Self {
        Self {
            ctx,
            shared,
            in_callback: false,
        }
    }

    /// Scope handed to a host callback while a script is suspended in it
    pub(crate) fn for_callback(ctx: Ctx<'js>, shared: Arc<ContextShared>) -> Self {
        Self {
            ctx,
            shared,
            in_callback: true,
        }
    }

    /// True inside a host callback
    pub fn in_callback(&self) -> bool {
        self.in_callback
    }

    /// The underlying engine context
    pub fn ctx(&self) -> &Ctx<'js> {
        &self.ctx
    }

    pub fn context_id(&self) -> ContextId {
        self.shared.id
    }

    pub fn worker_id(&self) -> Option<WorkerId> {
        self.shared.worker
    }

    pub(crate) fn shared(&self) -> &Arc<ContextShared> {
        &self.shared
    }

    pub fn roots(&self) -> RuntimeResult<RootTable<'js>> {
        let roots = self.shared.roots.lock();
        let handle = roots
            .as_ref()
            .ok_or_else(|| RuntimeError::internal("context is being destroyed"))?;
        Ok(handle.open(&self.ctx)?)
    }

    /// The object registered as `id`
    pub fn resolve(&self, id: Identity) -> RuntimeResult<Object<'js>> {
        Ok(self.roots()?.resolve(id)?)
    }

    /// The identity `object` was registered under
    pub fn identity_of(&self, object: &Object<'js>) -> RuntimeResult<Identity> {
        Ok(self.roots()?.identity_of(object)?)
    }

    pub fn eval(&self, source: &str) -> RuntimeResult<()> {
        self.eval_with_source(source, DEFAULT_SOURCE_NAME)
    }

    pub fn eval_with_source(&self, source: &str, source_name: &str) -> RuntimeResult<()> {
        self.eval_value(source, source_name).map(|_| ())
    }

    pub fn eval_json(&self, source: &str) -> RuntimeResult<Payload> {
        self.eval_json_with_source(source, DEFAULT_SOURCE_NAME)
    }

    pub fn eval_json_with_source(&self, source: &str, source_name: &str) -> RuntimeResult<Payload> {
        let value = self.eval_value(source, source_name)?;
        codec::encode(&self.ctx, value).map_err(|e| self.absorb(e.into()))
    }

    pub fn eval_as<T: DeserializeOwned>(&self, source: &str) -> RuntimeResult<T> {
        let payload = self.eval_json(source)?;
        if payload.is_undefined() {
            return Ok(serde_json::from_str("null")?);
        }
        Ok(payload.deserialize()?)
    }

    /// Evaluate and keep the completion value as an engine value
    pub fn eval_value(&self, source: &str, source_name: &str) -> RuntimeResult<Value<'js>> {
        let _span = debug_span!("eval", context = %self.shared.id, source = source_name).entered();
        trace!(bytes = source.len(), "evaluating");
        self.ctx
            .eval::<Value<'js>, _>(source)
            .map_err(|e| self.eval_failed(e, source_name))
    }

    /// Turn an evaluation failure into an error, reporting it to the host
    fn eval_failed(&self, err: rquickjs::Error, source_name: &str) -> RuntimeError {
        match err {
            rquickjs::Error::Exception => {
                let thrown = Thrown::take(&self.ctx);
                if thrown.is_out_of_memory() {
                    self.shared.report_out_of_memory();
                    return BridgeError::OutOfMemory.into();
                }
                let report = thrown.into_report(source_name);
                // Errors inside a callback go back to the host; only the
                // outermost evaluation reports.
                if self.in_callback {
                    trace!(error = %report, "nested evaluation failed");
                } else {
                    self.shared.report_error(&report);
                }
                BridgeError::Script(report).into()
            }
            other => self.absorb(other.into()),
        }
    }

    /// Poison the context if `err` is an out-of-memory
    pub(crate) fn absorb(&self, err: RuntimeError) -> RuntimeError {
        if matches!(err, RuntimeError::Core(BridgeError::OutOfMemory)) {
            self.shared.report_out_of_memory();
        }
        err
    }

    /// Convert a bridge failure into a pending script exception.
    ///
    /// Host failures keep their message verbatim. Identity failures are also
    /// reported through `on_error` since they mean host and engine disagree.
    pub(crate) fn throw(&self, err: RuntimeError, what: &str) -> rquickjs::Error {
        match self.absorb(err) {
            RuntimeError::Host(message) => Exception::throw_message(&self.ctx, &message),
            RuntimeError::Core(BridgeError::OutOfMemory) => rquickjs::Error::Allocation,
            RuntimeError::Core(BridgeError::Codec(detail)) => {
                trace!(what, detail = %detail, "host reply could not be decoded");
                Exception::throw_message(&self.ctx, &format!("{what}: invalid value from host"))
            }
            RuntimeError::Core(BridgeError::Script(report)) => {
                Exception::throw_message(&self.ctx, &report.message)
            }
            err if err.is_identity_error() => {
                let message = format!("{what}: {err}");
                error!(context = %self.shared.id, failure = %message, "identity failure in bridge");
                self.shared
                    .report_error(&jsbridge_core::ErrorReport::new(what, 0, message.clone()));
                Exception::throw_internal(&self.ctx, &message)
            }
            err => Exception::throw_internal(&self.ctx, &format!("{what}: {err}")),
        }
    }
}

impl Definer for Scope<'_> {
    fn define_function(&self, parent: Identity, name: &str, id: Identity) -> RuntimeResult<()> {
        call::install(self, parent, name, id)
    }

    fn define_object(&self, parent: Identity, name: &str, id: Identity) -> RuntimeResult<()> {
        self.roots()?.define_object(parent, name, id)?;
        trace!(parent = parent.get(), name, identity = id.get(), "object defined");
        Ok(())
    }

    fn define_property(&self, owner: Identity, name: &str) -> RuntimeResult<()> {
        property::install(self, owner, name)
    }
}
