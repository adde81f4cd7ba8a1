//! Class metatable builder
//!
//! Each host class gets one metatable, built on first use and cached for the
//! life of the engine. Metatables are chained through their own metatables
//! to mirror the host's single-inheritance tree, ending at a hand-built root
//! that carries the construction and indexing fallbacks:
//!
//! ```text
//! Node2D_mt --metatable--> Node_mt --metatable--> Object_mt --metatable--> root
//! ```
//!
//! A class metatable holds:
//! - `__name` / `__native`: the host class name
//! - `new` and `__call`: constructors
//! - integer constants declared on the class
//! - `__methods`: the method-closure cache
//! - fields installed by a pending [`ClassBinding`]
//!
//! Member lookup produces a [`Resolution`] by walking the chain in order:
//! local fields and cached closures, then a closure bound by name if the
//! host reports the method, then the parent metatable.

use std::sync::Arc;

use mlua::{Function, Lua, Table, Value, Variadic};
use tracing::{debug, warn};

use crate::context::{slots, BridgeContext};
use crate::error::ScriptError;
use crate::lifetime;
use crate::marshal;

/// Host class name of a class metatable
pub(crate) const NATIVE_KEY: &str = "__native";
/// Display name of a class metatable or script class table
pub(crate) const NAME_KEY: &str = "__name";
/// Method-closure cache of a class metatable
pub(crate) const METHODS_KEY: &str = "__methods";

/// Hand-written bindings applied to a class metatable on first import.
///
/// Used to expose specialised members (small value types, fast paths)
/// ahead of generic reflection.
pub type ClassBinding = Box<dyn Fn(&Lua, &Table) -> mlua::Result<()> + Send + Sync>;

/// Outcome of a member lookup on a class chain
#[derive(Debug, Clone)]
pub enum Resolution {
    /// A non-function field (constant or binding value)
    Field(Value),
    /// A callable member
    Method(Function),
    /// Nothing on the chain under that name
    NotFound,
}

impl Resolution {
    /// Whether the lookup found anything
    pub fn is_found(&self) -> bool {
        !matches!(self, Resolution::NotFound)
    }

    /// Convert to the guest value the indexer returns
    pub fn into_value(self) -> Option<Value> {
        match self {
            Resolution::Field(value) => Some(value),
            Resolution::Method(function) => Some(Value::Function(function)),
            Resolution::NotFound => None,
        }
    }
}

/// Return the metatable for a host class, building it and its ancestors on
/// first use.
pub(crate) fn import(lua: &Lua, ctx: &Arc<BridgeContext>, class: &str) -> mlua::Result<Table> {
    if let Some(metatable) = ctx.cached_class(lua, class)? {
        return Ok(metatable);
    }
    if !ctx.host.class_exists(class) {
        return Err(mlua::Error::external(ScriptError::UnknownClass(class.to_string())));
    }

    let parent = match ctx.host.parent_class(class) {
        Some(parent) => import(lua, ctx, &parent)?,
        None => lua.named_registry_value::<Table>(slots::ROOT_CLASS)?,
    };

    let metatable = lua.create_table()?;
    metatable.raw_set(NAME_KEY, class)?;
    metatable.raw_set(NATIVE_KEY, class)?;
    metatable.raw_set(METHODS_KEY, lua.create_table()?)?;
    install_metamethods(lua, &metatable)?;
    metatable.raw_set("new", constructor(lua, ctx, class)?)?;
    for (name, value) in ctx.host.integer_constants(class) {
        metatable.raw_set(name, value)?;
    }
    if let Some(binding) = ctx.take_binding(class) {
        binding(lua, &metatable)?;
    }
    metatable.set_metatable(Some(parent));

    ctx.cache_class(lua, class, &metatable)?;
    debug!(class, "imported host class");
    Ok(metatable)
}

/// Queue a binding for a class, or apply it now if already imported
pub(crate) fn register_binding(
    lua: &Lua,
    ctx: &BridgeContext,
    class: &str,
    binding: ClassBinding,
) -> mlua::Result<()> {
    match ctx.cached_class(lua, class)? {
        Some(metatable) => binding(lua, &metatable),
        None => {
            ctx.add_binding(class, binding);
            Ok(())
        }
    }
}

/// Resolve `key` starting at a class metatable and walking to the root
pub(crate) fn resolve_member(
    lua: &Lua,
    ctx: &Arc<BridgeContext>,
    metatable: &Table,
    key: &str,
) -> mlua::Result<Resolution> {
    let mut current = Some(metatable.clone());
    while let Some(table) = current {
        let Value::String(class) = table.raw_get::<Value>(NATIVE_KEY)? else {
            break;
        };
        let class = String::from(class.to_string_lossy());

        match table.raw_get::<Value>(key)? {
            Value::Nil => {}
            Value::Function(function) => return Ok(Resolution::Method(function)),
            value => return Ok(Resolution::Field(value)),
        }
        let cache: Table = table.raw_get(METHODS_KEY)?;
        if let Value::Function(function) = cache.raw_get::<Value>(key)? {
            return Ok(Resolution::Method(function));
        }

        if ctx.host.has_method(&class, key) {
            let function = method_closure(lua, ctx, key)?;
            cache.raw_set(key, function.clone())?;
            return Ok(Resolution::Method(function));
        }

        current = table.metatable();
    }
    Ok(Resolution::NotFound)
}

/// First host class metatable at or above the receiver.
///
/// Object tables start at their metatable; class tables (host or script)
/// start at themselves.
pub(crate) fn receiver_class(this: &Table) -> mlua::Result<Option<Table>> {
    let mut current = if lifetime::is_object_table(this)? {
        this.metatable()
    } else {
        Some(this.clone())
    };
    while let Some(table) = current {
        if is_host_class(&table)? {
            return Ok(Some(table));
        }
        current = table.metatable();
    }
    Ok(None)
}

/// Whether a table is a host class metatable
pub(crate) fn is_host_class(table: &Table) -> mlua::Result<bool> {
    Ok(matches!(table.raw_get::<Value>(NATIVE_KEY)?, Value::String(_)))
}

/// Read a host property through an object value; nil if the object is gone
pub(crate) fn read_property(
    lua: &Lua,
    ctx: &Arc<BridgeContext>,
    object: &Value,
    key: &str,
) -> mlua::Result<Value> {
    let Some(id) = lifetime::resolve_object(ctx, object)? else {
        return Ok(Value::Nil);
    };
    match ctx.host.get_property(id, key) {
        Some(value) => marshal::to_guest(lua, ctx, &value),
        None => Ok(Value::Nil),
    }
}

fn install_metamethods(lua: &Lua, table: &Table) -> mlua::Result<()> {
    let entries = [
        ("__index", slots::CLASS_INDEX),
        ("__newindex", slots::CLASS_NEWINDEX),
        ("__tostring", slots::TOSTRING),
        ("__eq", slots::EQ),
        ("__call", slots::CONSTRUCT),
    ];
    for (field, slot) in entries {
        table.raw_set(field, lua.named_registry_value::<Function>(slot)?)?;
    }
    Ok(())
}

/// `Class.new()` for one host class
fn constructor(lua: &Lua, ctx: &Arc<BridgeContext>, class: &str) -> mlua::Result<Function> {
    let ctx = Arc::clone(ctx);
    let class = class.to_string();
    lua.create_function(move |lua, _args: Variadic<Value>| instantiate(lua, &ctx, &class))
}

fn instantiate(lua: &Lua, ctx: &Arc<BridgeContext>, class: &str) -> mlua::Result<Value> {
    let id = ctx.host.instantiate(class).map_err(mlua::Error::external)?;
    lifetime::wrap_object(lua, ctx, id)
}

/// Closure calling a host method by name on its first argument
fn method_closure(lua: &Lua, ctx: &Arc<BridgeContext>, name: &str) -> mlua::Result<Function> {
    let ctx = Arc::clone(ctx);
    let name = name.to_string();
    lua.create_function(move |lua, (this, args): (Value, Variadic<Value>)| {
        if lifetime::handle_of(&this)?.is_none() {
            return Err(mlua::Error::RuntimeError(format!(
                "method '{}' called without an object (use ':' instead of '.')",
                name
            )));
        }
        let Some(id) = lifetime::resolve_object(&ctx, &this)? else {
            warn!(method = %name, "call on a freed object ignored");
            return Ok(Value::Nil);
        };
        let mut host_args = Vec::with_capacity(args.len());
        for arg in args.iter() {
            host_args.push(marshal::to_host(&ctx, arg, None).map_err(mlua::Error::external)?);
        }
        let result = ctx
            .host
            .call_method(id, &name, &host_args)
            .map_err(mlua::Error::external)?;
        marshal::to_guest(lua, &ctx, &result)
    })
}

// ============================================================================
// Shared Metamethods
// ============================================================================

fn class_index(lua: &Lua, ctx: &Arc<BridgeContext>, this: Table, key: Value) -> mlua::Result<Value> {
    let Value::String(key) = key else {
        return Ok(Value::Nil);
    };
    let key = String::from(key.to_string_lossy());

    if let Some(start) = receiver_class(&this)? {
        if let Some(value) = resolve_member(lua, ctx, &start, &key)?.into_value() {
            return Ok(value);
        }
    }
    if lifetime::is_object_table(&this)? {
        return read_property(lua, ctx, &Value::Table(this), &key);
    }
    Ok(Value::Nil)
}

fn class_newindex(
    ctx: &Arc<BridgeContext>,
    this: Table,
    key: Value,
    value: Value,
) -> mlua::Result<()> {
    if !lifetime::is_object_table(&this)? {
        return this.raw_set(key, value);
    }
    let Value::String(name) = key else {
        return Err(mlua::Error::RuntimeError(
            "object properties must be indexed by name".to_string(),
        ));
    };
    let name = String::from(name.to_string_lossy());
    let Some(id) = lifetime::resolve_object(ctx, &Value::Table(this))? else {
        warn!(property = %name, "assignment to a freed object ignored");
        return Ok(());
    };
    let host_value = marshal::to_host(ctx, &value, None).map_err(mlua::Error::external)?;
    if !ctx.host.set_property(id, &name, &host_value) {
        warn!(object = %id, property = %name, "unknown property; assignment ignored");
    }
    Ok(())
}

fn tostring(ctx: &Arc<BridgeContext>, this: Table) -> mlua::Result<String> {
    if lifetime::is_object_table(&this)? {
        let handle = lifetime::handle_of(&Value::Table(this))?;
        return Ok(match handle.and_then(|(id, _)| ctx.host.object_info(id).map(|info| (id, info))) {
            Some((id, info)) => format!("[{}:{}]", info.class, id),
            None => "[Object:null]".to_string(),
        });
    }
    match this.raw_get::<Value>(NAME_KEY)? {
        Value::String(name) => Ok(String::from(name.to_string_lossy())),
        _ => Ok("[class]".to_string()),
    }
}

fn equals(a: Value, b: Value) -> mlua::Result<bool> {
    match (lifetime::handle_of(&a)?, lifetime::handle_of(&b)?) {
        (Some((left, _)), Some((right, _))) => Ok(left == right),
        _ => Ok(a == b),
    }
}

/// `Class(...)`: construct the receiver's class
fn construct(lua: &Lua, ctx: &Arc<BridgeContext>, this: Table, args: Variadic<Value>) -> mlua::Result<Value> {
    if !is_host_class(&this)? {
        if let Value::Function(new) = this.raw_get::<Value>("new")? {
            return new.call::<Value>(args);
        }
    }
    let Some(class) = receiver_class(&this)? else {
        return Err(mlua::Error::RuntimeError("attempt to construct a non-class value".to_string()));
    };
    let name: String = class.raw_get(NATIVE_KEY)?;
    instantiate(lua, ctx, &name)
}

/// Create the shared metamethods and the root metatable
pub(crate) fn install(lua: &Lua, ctx: &Arc<BridgeContext>) -> mlua::Result<()> {
    let c = Arc::clone(ctx);
    let index = lua.create_function(move |lua, (this, key): (Table, Value)| class_index(lua, &c, this, key))?;
    let c = Arc::clone(ctx);
    let newindex = lua.create_function(move |_, (this, key, value): (Table, Value, Value)| {
        class_newindex(&c, this, key, value)
    })?;
    let c = Arc::clone(ctx);
    let to_string = lua.create_function(move |_, this: Table| tostring(&c, this))?;
    let eq = lua.create_function(|_, (a, b): (Value, Value)| equals(a, b))?;
    let c = Arc::clone(ctx);
    let call = lua.create_function(move |lua, (this, args): (Table, Variadic<Value>)| {
        construct(lua, &c, this, args)
    })?;

    lua.set_named_registry_value(slots::CLASS_INDEX, index)?;
    lua.set_named_registry_value(slots::CLASS_NEWINDEX, newindex)?;
    lua.set_named_registry_value(slots::TOSTRING, to_string)?;
    lua.set_named_registry_value(slots::EQ, eq)?;
    lua.set_named_registry_value(slots::CONSTRUCT, call)?;

    let root = lua.create_table()?;
    install_metamethods(lua, &root)?;
    lua.set_named_registry_value(slots::ROOT_CLASS, root)
}
