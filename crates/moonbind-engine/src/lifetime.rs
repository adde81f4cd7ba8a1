//! Object identity and lifetime bridge
//!
//! Host objects reach scripts as wrapper tables:
//!
//! ```text
//! wrapper = { __udata = <HostHandle userdata> }   -- metatable: class metatable
//! ```
//!
//! The [`HostHandle`] userdata is the only thing that ties a wrapper to a host
//! object. For ref-counted objects it owns one count: the count is taken
//! before the wrapper exists and given back from the handle's `Drop`, which
//! the interpreter runs when it collects the userdata. Manual objects are
//! never owned; their handle holds a generation-checked id and every access
//! goes back through the host's liveness table, so a destroyed object reads
//! as nil instead of dangling.
//!
//! Ref-counted wrappers are canonical: a weak-valued table maps each id to
//! its live wrapper, so wrapping the same object twice returns the same
//! table and takes one count, not two. A ref-counted object with a script
//! instance is fronted by a proxy wrapper instead:
//!
//! ```text
//! proxy = { __udata = <owning handle> }   -- metatable: { __index = self, __newindex = self }
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use mlua::{Function, Lua, Table, UserData, Value};
use moonbind_sdk::{HostReflection, Lifetime, ObjectId};
use tracing::trace;

use crate::class;
use crate::context::{slots, BridgeContext};

/// Field holding the handle userdata in wrapper and instance tables
pub(crate) const UDATA_KEY: &str = "__udata";

/// Counts of counted references taken and given back by guest wrappers
#[derive(Debug, Default)]
pub(crate) struct HandleLedger {
    acquired: AtomicU64,
    released: AtomicU64,
}

impl HandleLedger {
    pub fn stats(&self) -> HandleStats {
        HandleStats {
            acquired: self.acquired.load(Ordering::Acquire),
            released: self.released.load(Ordering::Acquire),
        }
    }
}

/// Snapshot of the wrapper reference ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HandleStats {
    /// Counts taken when ref-counted wrappers were created
    pub acquired: u64,
    /// Counts given back when wrappers were collected
    pub released: u64,
}

impl HandleStats {
    /// Counts currently held by live wrappers
    pub fn live(&self) -> u64 {
        self.acquired.saturating_sub(self.released)
    }
}

/// Guest-side handle to a host object
pub(crate) struct HostHandle {
    id: ObjectId,
    lifetime: Lifetime,
    owned: bool,
    host: Arc<dyn HostReflection>,
    ledger: Arc<HandleLedger>,
}

impl HostHandle {
    /// Take a counted reference. `None` if the host refuses (object gone).
    pub(crate) fn acquire(ctx: &BridgeContext, id: ObjectId) -> Option<Self> {
        if !ctx.host.reference(id) {
            return None;
        }
        ctx.ledger.acquired.fetch_add(1, Ordering::AcqRel);
        trace!(object = %id, "acquired wrapper reference");
        Some(Self {
            id,
            lifetime: Lifetime::RefCounted,
            owned: true,
            host: Arc::clone(&ctx.host),
            ledger: Arc::clone(&ctx.ledger),
        })
    }

    /// Non-owning handle, re-resolved on every access
    pub fn borrowed(ctx: &BridgeContext, id: ObjectId, lifetime: Lifetime) -> Self {
        Self {
            id,
            lifetime,
            owned: false,
            host: Arc::clone(&ctx.host),
            ledger: Arc::clone(&ctx.ledger),
        }
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn lifetime(&self) -> Lifetime {
        self.lifetime
    }
}

impl UserData for HostHandle {}

impl Drop for HostHandle {
    fn drop(&mut self) {
        if self.owned {
            self.ledger.released.fetch_add(1, Ordering::AcqRel);
            let freed = self.host.unreference(self.id);
            trace!(object = %self.id, freed, "released wrapper reference");
        }
    }
}

/// Cache key for an id in the wrapper table
fn id_key(id: ObjectId) -> i64 {
    id.to_bits() as i64
}

/// Wrap a host object for the guest.
///
/// Manual objects with a script instance come back as their pinned instance
/// table. Ref-counted objects always come back as their canonical counted
/// wrapper; when the object has an instance that wrapper is a proxy whose
/// reads and writes go to the instance table, so dropping the last guest
/// reference still releases the object. Manual objects without an instance
/// get a fresh wrapper, and a destroyed object is nil.
pub(crate) fn wrap_object(lua: &Lua, ctx: &Arc<BridgeContext>, id: ObjectId) -> mlua::Result<Value> {
    let instance = match ctx.instance(id) {
        Some(state) => Some(state.self_table(lua)?),
        None => None,
    };
    let Some(info) = ctx.host.object_info(id) else {
        return Ok(instance.map(Value::Table).unwrap_or(Value::Nil));
    };

    if !info.lifetime.is_ref_counted() {
        if let Some(this) = instance {
            return Ok(Value::Table(this));
        }
        let wrapper = lua.create_table()?;
        wrapper.raw_set(UDATA_KEY, lua.create_userdata(HostHandle::borrowed(ctx, id, info.lifetime))?)?;
        wrapper.set_metatable(Some(class::import(lua, ctx, &info.class)?));
        return Ok(Value::Table(wrapper));
    }

    let cache: Table = lua.named_registry_value(slots::WRAPPERS)?;
    if let Value::Table(existing) = cache.raw_get::<Value>(id_key(id))? {
        if fronts(&existing, instance.as_ref())? {
            return Ok(Value::Table(existing));
        }
    }
    let Some(handle) = HostHandle::acquire(ctx, id) else {
        return Ok(Value::Nil);
    };

    let wrapper = lua.create_table()?;
    wrapper.raw_set(UDATA_KEY, lua.create_userdata(handle)?)?;
    let metatable = match instance {
        Some(this) => {
            let proxy = lua.create_table()?;
            proxy.raw_set("__index", this.clone())?;
            proxy.raw_set("__newindex", this)?;
            proxy.raw_set("__tostring", lua.named_registry_value::<Function>(slots::TOSTRING)?)?;
            proxy.raw_set("__eq", lua.named_registry_value::<Function>(slots::EQ)?)?;
            proxy
        }
        None => class::import(lua, ctx, &info.class)?,
    };
    wrapper.set_metatable(Some(metatable));
    cache.raw_set(id_key(id), wrapper.clone())?;
    Ok(Value::Table(wrapper))
}

/// Whether a cached wrapper still matches the object's current binding:
/// a proxy for `this` when there is an instance, a plain wrapper otherwise.
/// Attaching or detaching a script leaves the old wrapper valid but stale.
fn fronts(wrapper: &Table, instance: Option<&Table>) -> mlua::Result<bool> {
    let Some(metatable) = wrapper.metatable() else {
        return Ok(false);
    };
    match instance {
        Some(this) => Ok(matches!(metatable.raw_get::<Value>("__index")?, Value::Table(target) if target == *this)),
        None => class::is_host_class(&metatable),
    }
}

/// Raw handle facts stored in a guest value, live or not
pub(crate) fn handle_of(value: &Value) -> mlua::Result<Option<(ObjectId, Lifetime)>> {
    match value {
        Value::Table(table) => match table.raw_get::<Value>(UDATA_KEY)? {
            Value::UserData(ud) => handle_of(&Value::UserData(ud)),
            _ => Ok(None),
        },
        Value::UserData(ud) => match ud.borrow::<HostHandle>() {
            Ok(handle) => Ok(Some((handle.id(), handle.lifetime()))),
            Err(_) => Ok(None),
        },
        _ => Ok(None),
    }
}

/// Whether a table is an object wrapper or instance table
pub(crate) fn is_object_table(table: &Table) -> mlua::Result<bool> {
    Ok(matches!(table.raw_get::<Value>(UDATA_KEY)?, Value::UserData(_)))
}

/// Resolve a guest value to a live host object
pub(crate) fn resolve_object(ctx: &BridgeContext, value: &Value) -> mlua::Result<Option<ObjectId>> {
    Ok(handle_of(value)?.filter(|(id, _)| ctx.host.object_info(*id).is_some()).map(|(id, _)| id))
}

/// Ledger counts for the engine facade
pub(crate) fn stats(ctx: &BridgeContext) -> HandleStats {
    ctx.ledger.stats()
}

/// Create the weak-valued wrapper cache
pub(crate) fn install(lua: &Lua) -> mlua::Result<()> {
    let cache = lua.create_table()?;
    let mode = lua.create_table()?;
    mode.raw_set("__mode", "v")?;
    cache.set_metatable(Some(mode));
    lua.set_named_registry_value(slots::WRAPPERS, cache)
}
