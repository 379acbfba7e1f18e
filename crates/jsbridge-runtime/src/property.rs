//! Property bridge
//!
//! Host properties are accessor pairs on a registered owner object. Reads
//! call [`HostCallbacks::on_get`]; writes serialize the assigned value first
//! and call [`HostCallbacks::on_set`]. Replies decode like call results.
//!
//! [`HostCallbacks::on_get`]: crate::HostCallbacks::on_get
//! [`HostCallbacks::on_set`]: crate::HostCallbacks::on_set

use jsbridge_core::{Identity, codec};
use rquickjs::object::Accessor;
use rquickjs::{Ctx, Value};
use tracing::trace;

use crate::engine::EngineStats;
use crate::error::{RuntimeError, RuntimeResult};
use crate::scope::Scope;

/// Install an enumerable, configurable getter/setter pair as `owner[name]`
pub(crate) fn install<'js>(scope: &Scope<'js>, owner: Identity, name: &str) -> RuntimeResult<()> {
    let owner_object = scope.resolve(owner)?;

    let get_shared = scope.shared().clone();
    let get_name = name.to_owned();
    let getter = move |ctx: Ctx<'js>| -> rquickjs::Result<Value<'js>> {
        let scope = Scope::for_callback(ctx, get_shared.clone());
        get(&scope, owner, &get_name).map_err(|e| scope.throw(e, &get_name))
    };

    let set_shared = scope.shared().clone();
    let set_name = name.to_owned();
    // The accessor has no slot of its own: the accepted value lives on the
    // host side and the next read asks the host for it again.
    let setter = move |ctx: Ctx<'js>, value: Value<'js>| -> rquickjs::Result<()> {
        let scope = Scope::for_callback(ctx, set_shared.clone());
        match set(&scope, owner, &set_name, value) {
            Ok(accepted) => {
                trace!(owner = owner.get(), name = %set_name, accepted = ?accepted.type_of(), "property stored by host");
                Ok(())
            }
            Err(e) => Err(scope.throw(e, &set_name)),
        }
    };

    owner_object.prop(name, Accessor::new(getter, setter).enumerable().configurable())?;
    trace!(owner = owner.get(), name, "property defined");
    Ok(())
}

/// Read `owner[name]` from the host
pub fn get<'js>(scope: &Scope<'js>, owner: Identity, name: &str) -> RuntimeResult<Value<'js>> {
    scope.resolve(owner)?;

    let shared = scope.shared();
    EngineStats::bump(&shared.stats().property_accesses);
    trace!(context = %shared.id, owner = owner.get(), name, "property get");

    match shared.host.on_get(scope, owner, name) {
        Ok(reply) => codec::decode(scope.ctx(), &reply).map_err(|e| scope.absorb(e.into())),
        Err(message) => Err(RuntimeError::Host(message)),
    }
}

/// Write `value` to `owner[name]` through the host; returns the accepted value
pub fn set<'js>(
    scope: &Scope<'js>,
    owner: Identity,
    name: &str,
    value: Value<'js>,
) -> RuntimeResult<Value<'js>> {
    scope.resolve(owner)?;
    let json = codec::encode(scope.ctx(), value).map_err(|e| scope.absorb(e.into()))?;

    let shared = scope.shared();
    EngineStats::bump(&shared.stats().property_accesses);
    trace!(
        context = %shared.id,
        owner = owner.get(),
        name,
        bytes = json.byte_len(),
        "property set"
    );

    match shared.host.on_set(scope, owner, name, &json) {
        Ok(reply) => codec::decode(scope.ctx(), &reply).map_err(|e| scope.absorb(e.into())),
        Err(message) => Err(RuntimeError::Host(message)),
    }
}
