//! Identity registry
//!
//! Objects exposed to the host are addressed by small integers. Each context
//! keeps a root table (a JS array) whose index `n` holds the object with
//! identity `n`. Slot 0 is always the global object. The table is held by a
//! [`RootHandle`] outside the script-visible object graph: scripts cannot
//! reach it, and the engine keeps every registered object alive for as long
//! as the handle exists without the host ever holding a raw pointer.
//!
//! Each registered object also carries a read-only, non-enumerable marker
//! property with its identity so the reverse lookup is a property read.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

use rquickjs::object::Property;
use rquickjs::{Array, Ctx, Object, Persistent, Value};
use serde::{Deserialize, Serialize};
use tracing::{error, trace};

use crate::error::{BridgeError, BridgeResult};

/// Key of the identity marker on registered objects
pub const IDENTITY_MARKER_KEY: &str = "__jsbridge_id__";

/// Identity of a script-visible object within one context
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(u32);

impl Identity {
    /// The context's global object
    pub const GLOBAL: Identity = Identity(0);

    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u32 {
        self.0
    }

    pub const fn is_global(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl From<u32> for Identity {
    fn from(raw: u32) -> Self {
        Self(raw)
    }
}

/// Monotonic identity source; never hands out [`Identity::GLOBAL`]
#[derive(Debug)]
pub struct IdentityAllocator {
    next: AtomicU32,
}

impl Default for IdentityAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl IdentityAllocator {
    pub const fn new() -> Self {
        Self::starting_at(1)
    }

    /// Allocator whose first identity is `first` (0 is bumped to 1)
    pub const fn starting_at(first: u32) -> Self {
        let first = if first == 0 { 1 } else { first };
        Self {
            next: AtomicU32::new(first),
        }
    }

    /// Next free identity, or `None` once the `u32` space is used up
    pub fn next(&self) -> Option<Identity> {
        self.next
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_add(1))
            .ok()
            .map(Identity)
    }
}

static PROCESS_IDENTITIES: IdentityAllocator = IdentityAllocator::new();

/// Allocate an identity unique within the whole process.
///
/// Identities only need to be unique per context, but a process-wide source
/// lets one host table serve many contexts (e.g. every worker in a pool).
pub fn next_identity() -> BridgeResult<Identity> {
    PROCESS_IDENTITIES
        .next()
        .ok_or_else(|| BridgeError::internal("identity space exhausted"))
}

/// Owner of a context's root table
///
/// Keeps the table rooted from the host side instead of from the global
/// object. Must be dropped before the runtime it was created in.
pub struct RootHandle {
    table: Persistent<Array<'static>>,
}

// SAFETY: the table is only restored inside a `Ctx` of its own runtime
// (checked by `Persistent::restore`), and the runtime lock serializes that.
unsafe impl Send for RootHandle {}

impl RootHandle {
    /// Create the table and seed slot 0 with the global object.
    ///
    /// Must run once per context before any other registry operation.
    pub fn install(ctx: &Ctx<'_>) -> BridgeResult<Self> {
        let globals = ctx.globals();
        if globals.contains_key(IDENTITY_MARKER_KEY)? {
            return Err(BridgeError::internal("root table already installed"));
        }

        let table = Array::new(ctx.clone())?;
        globals.prop(IDENTITY_MARKER_KEY, Property::from(Identity::GLOBAL.get()))?;
        table.set(Identity::GLOBAL.get() as usize, globals)?;

        trace!("root table installed");
        Ok(Self {
            table: Persistent::save(ctx, table),
        })
    }

    /// Open the table for use inside `ctx`
    pub fn open<'js>(&self, ctx: &Ctx<'js>) -> BridgeResult<RootTable<'js>> {
        let table = self.table.clone().restore(ctx)?;
        Ok(RootTable {
            ctx: ctx.clone(),
            table,
        })
    }
}

impl fmt::Debug for RootHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RootHandle")
    }
}

/// View of a context's root table
pub struct RootTable<'js> {
    ctx: Ctx<'js>,
    table: Array<'js>,
}

impl<'js> RootTable<'js> {
    /// True when `id` currently holds an object
    pub fn contains(&self, id: Identity) -> BridgeResult<bool> {
        let slot: Value<'js> = self.table.get(id.get() as usize)?;
        Ok(slot.is_object())
    }

    /// Root `object` under `id` and tag it with the identity marker
    pub fn register(&self, id: Identity, object: &Object<'js>) -> BridgeResult<()> {
        if id.is_global() {
            return Err(BridgeError::ReservedIdentity(id.get()));
        }
        if self.contains(id)? {
            return Err(BridgeError::IdentityInUse(id.get()));
        }
        if object.contains_key(IDENTITY_MARKER_KEY)? {
            return Err(BridgeError::internal(format!(
                "object is already registered, refusing to register it again as {}",
                id
            )));
        }

        object.prop(IDENTITY_MARKER_KEY, Property::from(id.get()))?;
        self.table.set(id.get() as usize, object.clone())?;
        trace!(identity = id.get(), "object registered");
        Ok(())
    }

    /// Create an empty object as property `name` of `parent`, registered as `id`
    pub fn define_object(
        &self,
        parent: Identity,
        name: &str,
        id: Identity,
    ) -> BridgeResult<Object<'js>> {
        let parent = self.resolve(parent)?;
        if id.is_global() {
            return Err(BridgeError::ReservedIdentity(id.get()));
        }
        if self.contains(id)? {
            return Err(BridgeError::IdentityInUse(id.get()));
        }

        let object = Object::new(self.ctx.clone())?;
        self.register(id, &object)?;
        parent.set(name, object.clone())?;
        Ok(object)
    }

    /// Look up the object rooted at `id`.
    ///
    /// An empty or non-object slot means the host and the engine disagree
    /// about what was registered; the caller must abort the operation.
    pub fn resolve(&self, id: Identity) -> BridgeResult<Object<'js>> {
        let slot: Value<'js> = self.table.get(id.get() as usize)?;
        if slot.is_undefined() || slot.is_null() {
            error!(identity = id.get(), "identity resolves to an empty slot");
            return Err(BridgeError::identity(id.get(), "slot is empty"));
        }
        let kind = slot.type_of();
        slot.into_object().ok_or_else(|| {
            error!(identity = id.get(), kind = ?kind, "identity resolves to a non-object");
            BridgeError::identity(id.get(), format!("slot holds {:?}, not an object", kind))
        })
    }

    /// Read the identity marker of `object`
    ///
    /// The marker is checked against the table so an object that merely
    /// inherits a marker through its prototype is not mistaken for the
    /// registered one.
    pub fn identity_of(&self, object: &Object<'js>) -> BridgeResult<Identity> {
        let marker: Option<u32> = object.get(IDENTITY_MARKER_KEY)?;
        let id = Identity(marker.ok_or(BridgeError::UnregisteredObject)?);
        let slot: Value<'js> = self.table.get(id.get() as usize)?;
        if slot != *object.as_value() {
            return Err(BridgeError::UnregisteredObject);
        }
        Ok(id)
    }
}
