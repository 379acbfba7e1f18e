//! Call bridge
//!
//! Script calls to host functions are marshaled as a JSON array of the
//! positional arguments, handed to [`HostCallbacks::on_call`] synchronously,
//! and the reply is decoded back into the call's return value.
//!
//! [`HostCallbacks::on_call`]: crate::HostCallbacks::on_call

use std::sync::Arc;

use jsbridge_core::{Identity, Payload, codec};
use rquickjs::function::Rest;
use rquickjs::{Ctx, Function, Value};
use tracing::{trace, warn};

use crate::context::ContextShared;
use crate::engine::EngineStats;
use crate::error::{RuntimeError, RuntimeResult};
use crate::scope::Scope;

/// Install a host function as `parent[name]`, registered as `id`
pub(crate) fn install(
    scope: &Scope<'_>,
    parent: Identity,
    name: &str,
    id: Identity,
) -> RuntimeResult<()> {
    let roots = scope.roots()?;
    let parent_object = roots.resolve(parent)?;
    if id.is_global() {
        return Err(jsbridge_core::BridgeError::ReservedIdentity(id.get()).into());
    }
    if roots.contains(id)? {
        return Err(jsbridge_core::BridgeError::IdentityInUse(id.get()).into());
    }

    let function = host_function(scope.ctx(), scope.shared().clone(), id, name.to_owned())?;
    let object = function
        .into_value()
        .into_object()
        .ok_or_else(|| RuntimeError::internal("host function is not an object"))?;
    roots.register(id, &object)?;
    parent_object.set(name, object)?;

    trace!(parent = parent.get(), name, identity = id.get(), "function defined");
    Ok(())
}

/// Engine function that forwards every call to the host
fn host_function<'js>(
    ctx: &Ctx<'js>,
    shared: Arc<ContextShared>,
    callee: Identity,
    name: String,
) -> rquickjs::Result<Function<'js>> {
    Function::new(
        ctx.clone(),
        move |ctx: Ctx<'js>, args: Rest<Value<'js>>| -> rquickjs::Result<Value<'js>> {
            let scope = Scope::for_callback(ctx, shared.clone());
            let json = match codec::encode_args(scope.ctx(), &args.0) {
                Ok(json) => json,
                Err(e) => return Err(scope.throw(e.into(), &name)),
            };
            invoke(&scope, callee, &name, &json).map_err(|e| scope.throw(e, &name))
        },
    )
}

/// Hand one call to the host and decode its reply.
///
/// An `Ok` reply with empty text yields `undefined`. An `Err` reply becomes
/// [`RuntimeError::Host`] carrying the host's message unchanged.
pub fn invoke<'js>(
    scope: &Scope<'js>,
    callee: Identity,
    name: &str,
    args: &Payload,
) -> RuntimeResult<Value<'js>> {
    // The callee must still be rooted in this context.
    scope.resolve(callee)?;

    let shared = scope.shared();
    EngineStats::bump(&shared.stats().host_calls);
    trace!(
        context = %shared.id,
        callee = callee.get(),
        name,
        bytes = args.byte_len(),
        "host call"
    );

    match shared.host.on_call(scope, callee, name, args) {
        Ok(reply) => codec::decode(scope.ctx(), &reply).map_err(|e| {
            EngineStats::bump(&shared.stats().host_call_failures);
            warn!(name, error = %e, "host returned undecodable JSON");
            scope.absorb(e.into())
        }),
        Err(message) => {
            EngineStats::bump(&shared.stats().host_call_failures);
            trace!(name, error = %message, "host call failed");
            Err(RuntimeError::Host(message))
        }
    }
}
