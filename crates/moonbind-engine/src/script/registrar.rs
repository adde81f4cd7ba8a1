//! Script compiler and registrar
//!
//! ```text
//! Source → Compiled(chunk) → Executed(class table) → Registered(path)
//! ```
//!
//! A chunk must return a class table. Tables created by the prelude's
//! `class()` carry a transient `__compiling` marker; any marked table found
//! in a class's fields is a nested class and registers first, at
//! `outer::Name`, before the outer class is published. A failure in a
//! later nested class leaves the earlier ones registered.
//!
//! Publishing replaces the registry entry for the path. Instances bound to
//! the old class table keep it as their metatable.

use std::collections::BTreeMap;
use std::sync::Arc;

use mlua::{ChunkMode, Function, Lua, Table, Value};
use tracing::{debug, error};

use super::definition::{MethodInfo, ScriptBase, ScriptDefinition, SignalInfo};
use super::{instance, path};
use crate::class::{self, NAME_KEY, NATIVE_KEY};
use crate::context::{slots, BridgeContext, ProgressGuard, ScriptEntry};
use crate::dispatch;
use crate::error::{CompileError, ScriptError, ScriptResult};
use crate::language;
use crate::lifetime;
use crate::marshal;

/// Transient marker on class tables that are not yet registered
pub(crate) const COMPILING_KEY: &str = "__compiling";
const EXTENDS_KEY: &str = "__extends";
const TOOL_KEY: &str = "__tool";
const SIGNALS_KEY: &str = "__signals";
const CLASS_KEY: &str = "__class";
const ICON_KEY: &str = "__icon";

/// Keys never reported as methods or property defaults
const RESERVED_KEYS: &[&str] = &[
    NAME_KEY,
    EXTENDS_KEY,
    TOOL_KEY,
    SIGNALS_KEY,
    CLASS_KEY,
    ICON_KEY,
    NATIVE_KEY,
    lifetime::UDATA_KEY,
    class::METHODS_KEY,
    COMPILING_KEY,
];

/// Signature at the start of a precompiled chunk
const CHUNK_SIGNATURE: &[u8] = b"\x1bLua";

/// Compile a source text or precompiled chunk into a function
pub(crate) fn load_chunk(lua: &Lua, key: &str, source: &[u8]) -> Result<Function, CompileError> {
    let mode = if source.starts_with(CHUNK_SIGNATURE) {
        ChunkMode::Binary
    } else {
        ChunkMode::Text
    };
    lua.load(source)
        .set_name(format!("@{}", key))
        .set_mode(mode)
        .into_function()
        .map_err(|err| language::compile_error(key, &err))
}

/// Compile, run and register a script under its registration key
pub(crate) fn compile(
    lua: &Lua,
    ctx: &Arc<BridgeContext>,
    path: &str,
    source: &[u8],
) -> ScriptResult<Arc<ScriptDefinition>> {
    let key = path::registration_key(&ctx.options, path);
    let _progress = ProgressGuard::enter(ctx, &key)?;

    let chunk = load_chunk(lua, &key, source).map_err(|err| {
        error!(script = %key, line = err.line, "{}", err.message);
        err
    })?;
    let results = dispatch::protected_call(lua, ctx, &chunk, Vec::new())?;
    let class = match results.into_iter().next() {
        Some(Value::Table(class)) => class,
        other => {
            return Err(ScriptError::NotAClass {
                path: key,
                got: other.map(|v| v.type_name()).unwrap_or("nil").to_string(),
            })
        }
    };

    let text = if source.starts_with(CHUNK_SIGNATURE) {
        None
    } else {
        Some(String::from_utf8_lossy(source).into_owned())
    };
    register(lua, ctx, &key, class, text)
}

/// Load a script from the source store and register it.
///
/// Tries the path as given, then its source key, then its chunk form.
pub(crate) fn load(lua: &Lua, ctx: &Arc<BridgeContext>, path: &str) -> ScriptResult<Arc<ScriptDefinition>> {
    let key = path::registration_key(&ctx.options, path);
    let mut candidates = vec![path.to_string()];
    if key != path {
        candidates.push(key.clone());
    }
    if let Some(chunk) = path::chunk_path(&ctx.options, &key) {
        if chunk != path {
            candidates.push(chunk);
        }
    }

    for candidate in candidates {
        if ctx.store.exists(&candidate) {
            let bytes = ctx.store.load_source(&candidate)?;
            return compile(lua, ctx, &key, &bytes);
        }
    }
    Err(ScriptError::NotFound(key))
}

/// Recompile every top-level script from the store, in path order.
/// Returns the failures; successful reloads are republished.
pub(crate) fn reload_all(lua: &Lua, ctx: &Arc<BridgeContext>) -> Vec<(String, ScriptError)> {
    let mut failures = Vec::new();
    for key in ctx.script_paths() {
        if path::is_nested(&key) {
            continue;
        }
        if let Err(err) = load(lua, ctx, &key) {
            failures.push((key, err));
        }
    }
    failures
}

/// Register an executed class table at `path`
fn register(
    lua: &Lua,
    ctx: &Arc<BridgeContext>,
    path: &str,
    class: Table,
    source: Option<String>,
) -> ScriptResult<Arc<ScriptDefinition>> {
    class.raw_set(COMPILING_KEY, Value::Nil)?;

    // Nested classes, depth-first, in name order
    let mut inner = Vec::new();
    for pair in class.clone().pairs::<Value, Value>() {
        let (key, value) = pair?;
        if let (Value::String(name), Value::Table(table)) = (key, value) {
            if matches!(table.raw_get::<Value>(COMPILING_KEY)?, Value::Boolean(true)) {
                inner.push((String::from(name.to_string_lossy()), table));
            }
        }
    }
    inner.sort_by(|a, b| a.0.cmp(&b.0));
    let mut nested = Vec::with_capacity(inner.len());
    for (name, table) in inner {
        let inner_path = path::nested_path(path, &name);
        let _progress = ProgressGuard::enter(ctx, &inner_path)?;
        register(lua, ctx, &inner_path, table, None)?;
        nested.push((name, inner_path));
    }

    let (prototype, base, host_base) = resolve_base(lua, ctx, path, class.raw_get::<Value>(EXTENDS_KEY)?)?;

    let nested_names: Vec<&str> = nested.iter().map(|(name, _)| name.as_str()).collect();
    let (methods, defaults) = members(ctx, &class, &nested_names)?;
    let definition = Arc::new(ScriptDefinition {
        path: path.to_string(),
        source,
        version: ctx.next_version(),
        base,
        host_base,
        tool: matches!(class.raw_get::<Value>(TOOL_KEY)?, Value::Boolean(true)),
        global_name: string_field(&class, CLASS_KEY)?,
        icon: string_field(&class, ICON_KEY)?,
        nested: nested.into_iter().map(|(_, path)| path).collect(),
        methods,
        signals: signals(&class)?,
        defaults,
        instances: Default::default(),
    });

    class.raw_set(NAME_KEY, path)?;
    let entries = [
        ("__index", slots::SCRIPT_INDEX),
        ("__newindex", slots::SCRIPT_NEWINDEX),
        ("__tostring", slots::TOSTRING),
        ("__eq", slots::EQ),
        ("__call", slots::CONSTRUCT),
    ];
    for (field, slot) in entries {
        class.raw_set(field, lua.named_registry_value::<Function>(slot)?)?;
    }
    if class.raw_get::<Value>("new")?.is_nil() {
        class.raw_set("new", constructor(lua, ctx, path)?)?;
    }
    class.set_metatable(Some(prototype));

    let class_key = Arc::new(lua.create_registry_value(class)?);
    let entry = ScriptEntry {
        definition: Arc::clone(&definition),
        class_key,
    };
    match ctx.publish(path, entry) {
        Some(previous) => debug!(
            script = path,
            version = definition.version(),
            previous = previous.definition.version(),
            live = previous.definition.instance_count(),
            "republished script"
        ),
        None => debug!(script = path, version = definition.version(), "registered script"),
    }
    Ok(definition)
}

/// Prototype table, declared base and host base of a class
fn resolve_base(
    lua: &Lua,
    ctx: &Arc<BridgeContext>,
    path: &str,
    extends: Value,
) -> ScriptResult<(Table, ScriptBase, String)> {
    match extends {
        Value::Nil => host_base(lua, ctx, &ctx.options.default_base),
        Value::String(name) => {
            let name = String::from(name.to_string_lossy());
            if ctx.host.class_exists(&name) {
                host_base(lua, ctx, &name)
            } else {
                let key = path::resolve_base(&ctx.options, Some(path), &name);
                script_base(lua, ctx, path, &key)
            }
        }
        Value::Table(table) => {
            if class::is_host_class(&table)? {
                let name: String = table.raw_get(NATIVE_KEY)?;
                return host_base(lua, ctx, &name);
            }
            match table.raw_get::<Value>(NAME_KEY)? {
                Value::String(name) => script_base(lua, ctx, path, &String::from(name.to_string_lossy())),
                _ => Err(ScriptError::BaseNotFound {
                    path: path.to_string(),
                    base: "<unregistered class>".to_string(),
                }),
            }
        }
        other => Err(ScriptError::BaseNotFound {
            path: path.to_string(),
            base: format!("<{}>", other.type_name()),
        }),
    }
}

fn host_base(lua: &Lua, ctx: &Arc<BridgeContext>, name: &str) -> ScriptResult<(Table, ScriptBase, String)> {
    if !ctx.host.class_exists(name) {
        return Err(ScriptError::UnknownClass(name.to_string()));
    }
    let metatable = class::import(lua, ctx, name)?;
    Ok((metatable, ScriptBase::Host(name.to_string()), name.to_string()))
}

fn script_base(
    lua: &Lua,
    ctx: &Arc<BridgeContext>,
    path: &str,
    key: &str,
) -> ScriptResult<(Table, ScriptBase, String)> {
    // Nothing under a script still compiling resolves, nested classes included
    if key == path || ctx.is_in_progress(key) || ctx.is_in_progress(path::outer_path(key)) {
        return Err(ScriptError::CyclicBase(key.to_string()));
    }
    if ctx.script_entry(lua, key)?.is_none() {
        if path::is_nested(key) {
            return Err(ScriptError::BaseNotFound {
                path: path.to_string(),
                base: key.to_string(),
            });
        }
        match load(lua, ctx, key) {
            Ok(_) => {}
            Err(ScriptError::NotFound(_)) => {
                return Err(ScriptError::BaseNotFound {
                    path: path.to_string(),
                    base: key.to_string(),
                })
            }
            Err(err) => return Err(err),
        }
    }
    match ctx.script_entry(lua, key)? {
        Some((definition, class)) => Ok((
            class,
            ScriptBase::Script(key.to_string()),
            definition.host_base().to_string(),
        )),
        None => Err(ScriptError::BaseNotFound {
            path: path.to_string(),
            base: key.to_string(),
        }),
    }
}

/// `Class.new(...)` for a script class
fn constructor(lua: &Lua, ctx: &Arc<BridgeContext>, path: &str) -> mlua::Result<Function> {
    let ctx = Arc::clone(ctx);
    let path = path.to_string();
    lua.create_function(move |lua, args: mlua::Variadic<Value>| {
        let mut args = args.to_vec();
        // `Class:new(...)` passes the class table first
        if let Some(Value::Table(first)) = args.first() {
            if is_script_class(first)? {
                args.remove(0);
            }
        }
        let definition = ctx
            .script(&path)
            .ok_or_else(|| mlua::Error::external(ScriptError::NotFound(path.clone())))?;
        let object = ctx
            .host
            .instantiate(definition.host_base())
            .map_err(mlua::Error::external)?;
        // Counted across `_init`; a failed init frees a ref-counted object
        let guard = ctx
            .host
            .object_info(object)
            .filter(|info| info.lifetime.is_ref_counted())
            .and_then(|_| lifetime::HostHandle::acquire(&ctx, object));
        instance::create(lua, &ctx, object, &path, args).map_err(mlua::Error::external)?;
        let this = lifetime::wrap_object(lua, &ctx, object)?;
        drop(guard);
        Ok(this)
    })
}

fn is_script_class(table: &Table) -> mlua::Result<bool> {
    Ok(matches!(table.raw_get::<Value>(NAME_KEY)?, Value::String(_))
        && !class::is_host_class(table)?
        && !lifetime::is_object_table(table)?)
}

fn string_field(table: &Table, key: &str) -> mlua::Result<Option<String>> {
    Ok(match table.raw_get::<Value>(key)? {
        Value::String(s) => Some(String::from(s.to_string_lossy())),
        _ => None,
    })
}

/// Line a function is defined on, 0 if unknown
fn function_line(function: &Function) -> u32 {
    function.info().line_defined.map(|line| line as u32).unwrap_or(0)
}

type Members = (Vec<MethodInfo>, BTreeMap<String, moonbind_sdk::HostValue>);

/// Declared functions and field defaults of a class table
fn members(ctx: &BridgeContext, class: &Table, nested: &[&str]) -> mlua::Result<Members> {
    let mut methods = Vec::new();
    let mut defaults = BTreeMap::new();
    for pair in class.clone().pairs::<Value, Value>() {
        let (key, value) = pair?;
        let Value::String(name) = key else { continue };
        let name = String::from(name.to_string_lossy());
        if RESERVED_KEYS.contains(&name.as_str()) || nested.contains(&name.as_str()) {
            continue;
        }
        match value {
            Value::Function(function) => methods.push(MethodInfo {
                line: function_line(&function),
                name,
            }),
            other => {
                if let Ok(value) = marshal::to_host(ctx, &other, None) {
                    defaults.insert(name, value);
                }
            }
        }
    }
    methods.sort_by(|a, b| a.name.cmp(&b.name));
    Ok((methods, defaults))
}

/// Signals declared through the prelude's `signal()`
fn signals(class: &Table) -> mlua::Result<Vec<SignalInfo>> {
    let Value::Table(list) = class.raw_get::<Value>(SIGNALS_KEY)? else {
        return Ok(Vec::new());
    };
    let mut signals = Vec::new();
    for i in 1..=list.raw_len() {
        let Value::Table(entry) = list.raw_get::<Value>(i)? else { continue };
        let Some(name) = string_field(&entry, "name")? else { continue };
        let mut args = Vec::new();
        if let Value::Table(arg_list) = entry.raw_get::<Value>("args")? {
            for j in 1..=arg_list.raw_len() {
                if let Value::String(arg) = arg_list.raw_get::<Value>(j)? {
                    args.push(String::from(arg.to_string_lossy()));
                }
            }
        }
        signals.push(SignalInfo { name, args });
    }
    Ok(signals)
}
