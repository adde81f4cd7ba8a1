//! Script instances
//!
//! An instance pairs one host object with one published definition. Its
//! guest side is a table pinned in the interpreter registry for as long as
//! the binding exists:
//!
//! ```text
//! self = { __udata = <borrowed handle>, ...fields }   -- metatable: class table
//! ```
//!
//! The handle inside `self` never owns a count, so the pin does not keep a
//! ref-counted object alive. The host's references and the guest's counted
//! proxy wrappers do, and destroying the object releases the pin through
//! the bridge.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use mlua::{Lua, RegistryKey, Table, Value};
use moonbind_sdk::{HostValue, ObjectId};
use tracing::{debug, warn};

use super::definition::ScriptDefinition;
use crate::class::{self, Resolution};
use crate::context::{slots, BridgeContext};
use crate::dispatch;
use crate::error::{ScriptError, ScriptResult};
use crate::lifetime::{self, HostHandle, UDATA_KEY};
use crate::marshal;

/// Live binding of a host object to a script definition
pub(crate) struct InstanceState {
    pub object: ObjectId,
    pub definition: Arc<ScriptDefinition>,
    pin: RegistryKey,
    property_locked: AtomicBool,
}

impl InstanceState {
    /// The pinned `self` table
    pub fn self_table(&self, lua: &Lua) -> mlua::Result<Table> {
        lua.registry_value(&self.pin)
    }

    pub fn is_locked(&self) -> bool {
        self.property_locked.load(Ordering::Acquire)
    }

    /// Suppress guest property interception until the guard drops
    pub fn lock(&self) -> PropertyLock<'_> {
        let previous = self.property_locked.swap(true, Ordering::AcqRel);
        PropertyLock {
            state: self,
            previous,
        }
    }
}

/// Restores the previous `property_locked` value on drop
pub(crate) struct PropertyLock<'a> {
    state: &'a InstanceState,
    previous: bool,
}

impl Drop for PropertyLock<'_> {
    fn drop(&mut self) {
        self.state
            .property_locked
            .store(self.previous, Ordering::Release);
    }
}

/// Look up `key` on a script table without metamethods: the table itself,
/// then each script class up the chain, stopping at the host class.
pub(crate) fn script_member(table: &Table, key: &str) -> mlua::Result<Value> {
    let mut current = Some(table.clone());
    while let Some(t) = current {
        if class::is_host_class(&t)? {
            break;
        }
        let value = t.raw_get::<Value>(key)?;
        if !value.is_nil() {
            return Ok(value);
        }
        current = t.metatable();
    }
    Ok(Value::Nil)
}

/// Bind a new instance of the script at `path` to `object` and run `_init`
pub(crate) fn create(
    lua: &Lua,
    ctx: &Arc<BridgeContext>,
    object: ObjectId,
    path: &str,
    args: Vec<Value>,
) -> ScriptResult<Table> {
    let Some((definition, class)) = ctx.script_entry(lua, path)? else {
        return Err(ScriptError::NotFound(path.to_string()));
    };
    if !ctx.options.scripting_enabled && !definition.is_tool() {
        return Err(ScriptError::ScriptingDisabled(path.to_string()));
    }
    let info = ctx.host.object_info(object).ok_or(ScriptError::ObjectFreed)?;
    if !ctx.host.is_class(&info.class, definition.host_base()) {
        return Err(ScriptError::IncompatibleBase {
            path: path.to_string(),
            base: definition.host_base().to_string(),
            class: info.class,
        });
    }

    if destroy(ctx, object) {
        debug!(%object, script = path, "replaced existing instance");
    }

    let this = lua.create_table()?;
    let handle = HostHandle::borrowed(ctx, object, info.lifetime);
    this.raw_set(UDATA_KEY, lua.create_userdata(handle)?)?;
    this.set_metatable(Some(class));
    let pin = lua.create_registry_value(this.clone())?;

    definition.instances.lock().insert(object);
    ctx.bind_instance(Arc::new(InstanceState {
        object,
        definition: Arc::clone(&definition),
        pin,
        property_locked: AtomicBool::new(false),
    }));
    debug!(%object, script = path, version = definition.version(), "created script instance");

    if let Value::Function(init) = script_member(&this, "_init")? {
        let mut init_args = Vec::with_capacity(args.len() + 1);
        init_args.push(Value::Table(this.clone()));
        init_args.extend(args);
        if let Err(err) = dispatch::protected_call(lua, ctx, &init, init_args) {
            destroy(ctx, object);
            return Err(ScriptError::Runtime(err));
        }
    }
    Ok(this)
}

/// Unbind the instance of `object`, releasing its pin. `false` if none.
pub(crate) fn destroy(ctx: &BridgeContext, object: ObjectId) -> bool {
    let Some(state) = ctx.unbind_instance(object) else {
        return false;
    };
    state.definition.instances.lock().remove(&object);
    debug!(%object, script = state.definition.path(), "destroyed script instance");
    true
}

/// Host-facing property read. `None` means "not handled".
pub(crate) fn get(
    lua: &Lua,
    ctx: &Arc<BridgeContext>,
    object: ObjectId,
    name: &str,
) -> mlua::Result<Option<HostValue>> {
    let Some(state) = ctx.instance(object) else {
        return Ok(None);
    };
    if state.is_locked() {
        return Ok(None);
    }
    let this = state.self_table(lua)?;

    match script_member(&this, name)? {
        Value::Nil | Value::Function(_) => {}
        value => return Ok(host_value(ctx, object, name, &value)),
    }

    if let Value::Function(getter) = script_member(&this, "_get")? {
        let name_value = Value::String(lua.create_string(name)?);
        let _lock = state.lock();
        if let Ok(results) = dispatch::protected_call(lua, ctx, &getter, vec![Value::Table(this), name_value]) {
            match results.into_iter().next() {
                None | Some(Value::Nil) => {}
                Some(value) => return Ok(host_value(ctx, object, name, &value)),
            }
        }
    }
    Ok(None)
}

/// Convert a property read for the host; an unconvertible value reads as
/// unhandled
fn host_value(ctx: &BridgeContext, object: ObjectId, name: &str, value: &Value) -> Option<HostValue> {
    match marshal::to_host(ctx, value, None) {
        Ok(value) => Some(value),
        Err(err) => {
            warn!(%object, property = name, error = %err, "script property not convertible");
            None
        }
    }
}

/// Host-facing property write. `false` means "not handled".
pub(crate) fn set(
    lua: &Lua,
    ctx: &Arc<BridgeContext>,
    object: ObjectId,
    name: &str,
    value: &HostValue,
) -> mlua::Result<bool> {
    let Some(state) = ctx.instance(object) else {
        return Ok(false);
    };
    if state.is_locked() {
        return Ok(false);
    }
    let this = state.self_table(lua)?;

    match script_member(&this, name)? {
        Value::Nil | Value::Function(_) => {}
        _ => {
            this.raw_set(name, marshal::to_guest(lua, ctx, value)?)?;
            return Ok(true);
        }
    }

    if let Value::Function(setter) = script_member(&this, "_set")? {
        let args = vec![
            Value::Table(this),
            Value::String(lua.create_string(name)?),
            marshal::to_guest(lua, ctx, value)?,
        ];
        let _lock = state.lock();
        if let Ok(results) = dispatch::protected_call(lua, ctx, &setter, args) {
            let handled = results.into_iter().next().map(|v| !matches!(v, Value::Nil | Value::Boolean(false)));
            return Ok(handled.unwrap_or(false));
        }
    }
    Ok(false)
}

/// Deliver a host notification to `_notification`, if defined
pub(crate) fn notification(
    lua: &Lua,
    ctx: &Arc<BridgeContext>,
    object: ObjectId,
    what: i64,
) -> mlua::Result<()> {
    let Some(state) = ctx.instance(object) else {
        return Ok(());
    };
    let this = state.self_table(lua)?;
    drop(state);
    if let Value::Function(handler) = script_member(&this, "_notification")? {
        if let Err(err) = dispatch::protected_call(lua, ctx, &handler, vec![Value::Table(this), Value::Integer(what)]) {
            warn!(%object, what, error = %err.message, "_notification failed");
        }
    }
    Ok(())
}

// ============================================================================
// Script Class Metamethods
// ============================================================================

/// `__index` of script class tables (and so of instances)
fn script_index(lua: &Lua, ctx: &Arc<BridgeContext>, this: Table, key: Value) -> mlua::Result<Value> {
    let Value::String(key) = key else {
        return Ok(Value::Nil);
    };
    let key = String::from(key.to_string_lossy());
    let is_instance = lifetime::is_object_table(&this)?;

    if key == "super" {
        let class = if is_instance { this.metatable() } else { Some(this.clone()) };
        return Ok(class
            .and_then(|class| class.metatable())
            .map(Value::Table)
            .unwrap_or(Value::Nil));
    }

    // Script chain first; the instance itself was checked raw by the VM
    let mut current = this.metatable();
    while let Some(table) = current {
        if class::is_host_class(&table)? {
            break;
        }
        let value = table.raw_get::<Value>(key.as_str())?;
        if !value.is_nil() {
            return Ok(value);
        }
        current = table.metatable();
    }
    if !is_instance {
        if let Some(start) = class::receiver_class(&this)? {
            return Ok(class::resolve_member(lua, ctx, &start, &key)?
                .into_value()
                .unwrap_or(Value::Nil));
        }
        return Ok(Value::Nil);
    }

    // Host side: the object's actual class, then its properties
    let object = Value::Table(this);
    let Some(id) = lifetime::resolve_object(ctx, &object)? else {
        return Ok(Value::Nil);
    };
    let Some(info) = ctx.host.object_info(id) else {
        return Ok(Value::Nil);
    };
    let metatable = class::import(lua, ctx, &info.class)?;
    match class::resolve_member(lua, ctx, &metatable, &key)? {
        Resolution::NotFound => class::read_property(lua, ctx, &object, &key),
        found => Ok(found.into_value().unwrap_or(Value::Nil)),
    }
}

/// `__newindex` of script class tables (and so of instances)
fn script_newindex(
    ctx: &Arc<BridgeContext>,
    this: Table,
    key: Value,
    value: Value,
) -> mlua::Result<()> {
    if !lifetime::is_object_table(&this)? || matches!(value, Value::Function(_)) {
        return this.raw_set(key, value);
    }
    let Value::String(name) = &key else {
        return this.raw_set(key, value);
    };
    let name = String::from(name.to_string_lossy());
    if !script_member(&this, &name)?.is_nil() {
        return this.raw_set(key, value);
    }

    let Some(id) = lifetime::resolve_object(ctx, &Value::Table(this.clone()))? else {
        warn!(property = %name, "assignment to a freed object ignored");
        return Ok(());
    };
    let host_value = marshal::to_host(ctx, &value, None).map_err(mlua::Error::external)?;
    let handled = match ctx.instance(id) {
        Some(state) => {
            let _lock = state.lock();
            ctx.host.set_property(id, &name, &host_value)
        }
        None => ctx.host.set_property(id, &name, &host_value),
    };
    if !handled {
        this.raw_set(key, value)?;
    }
    Ok(())
}

/// Create the shared script class metamethods
pub(crate) fn install(lua: &Lua, ctx: &Arc<BridgeContext>) -> mlua::Result<()> {
    let c = Arc::clone(ctx);
    let index = lua.create_function(move |lua, (this, key): (Table, Value)| script_index(lua, &c, this, key))?;
    let c = Arc::clone(ctx);
    let newindex = lua.create_function(move |_, (this, key, value): (Table, Value, Value)| {
        script_newindex(&c, this, key, value)
    })?;
    lua.set_named_registry_value(slots::SCRIPT_INDEX, index)?;
    lua.set_named_registry_value(slots::SCRIPT_NEWINDEX, newindex)
}
