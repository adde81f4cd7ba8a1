//! Guest globals
//!
//! - `print` / `printerr` / `push_error` log under the `moonbind::guest` target
//! - `require(name)` loads and registers a script, returning its class table
//! - `to_json` / `parse_json` convert through host values
//! - `is_instance(object, class)` checks host class or script ancestry
//! - unknown globals resolve to host classes

use std::sync::Arc;

use mlua::{Function, Lua, MultiValue, Table, Value, Variadic};
use moonbind_sdk::HostValue;
use tracing::{error, info};

use crate::class;
use crate::context::{slots, BridgeContext};
use crate::lifetime;
use crate::marshal;
use crate::script::{path, registrar};

/// Target of guest log output
pub(crate) const GUEST_TARGET: &str = "moonbind::guest";

const PRELUDE: &str = include_str!("prelude.lua");

/// Load the prelude and keep its locals helper
pub(crate) fn load_prelude(lua: &Lua) -> mlua::Result<()> {
    let exports: Table = lua.load(PRELUDE).set_name("@moonbind/prelude").eval()?;
    let locals: Function = exports.get("locals")?;
    lua.set_named_registry_value(slots::LOCALS, locals)
}

fn render(tostring: &Function, args: Variadic<Value>) -> mlua::Result<String> {
    let mut parts = Vec::with_capacity(args.len());
    for arg in args.iter() {
        parts.push(tostring.call::<String>(arg.clone())?);
    }
    Ok(parts.join(" "))
}

pub(crate) fn install(lua: &Lua, ctx: &Arc<BridgeContext>) -> mlua::Result<()> {
    let globals = lua.globals();
    let tostring: Function = globals.get("tostring")?;

    let to_text = tostring.clone();
    globals.set(
        "print",
        lua.create_function(move |_, args: Variadic<Value>| {
            info!(target: GUEST_TARGET, "{}", render(&to_text, args)?);
            Ok(())
        })?,
    )?;
    for name in ["printerr", "push_error"] {
        let to_text = tostring.clone();
        globals.set(
            name,
            lua.create_function(move |_, args: Variadic<Value>| {
                error!(target: GUEST_TARGET, "{}", render(&to_text, args)?);
                Ok(())
            })?,
        )?;
    }

    let c = Arc::clone(ctx);
    globals.set(
        "require",
        lua.create_function(move |lua, name: String| require(lua, &c, &name))?,
    )?;

    let c = Arc::clone(ctx);
    globals.set(
        "to_json",
        lua.create_function(move |_, value: Value| {
            let host = marshal::to_host(&c, &value, None).map_err(mlua::Error::external)?;
            Ok(host.to_json().to_string())
        })?,
    )?;

    let c = Arc::clone(ctx);
    globals.set(
        "parse_json",
        lua.create_function(move |lua, text: String| {
            match serde_json::from_str::<serde_json::Value>(&text) {
                Ok(json) => {
                    let value = marshal::to_guest(lua, &c, &HostValue::from(json))?;
                    Ok(MultiValue::from_vec(vec![value]))
                }
                Err(err) => Ok(MultiValue::from_vec(vec![
                    Value::Nil,
                    Value::String(lua.create_string(err.to_string())?),
                ])),
            }
        })?,
    )?;

    let c = Arc::clone(ctx);
    globals.set(
        "is_instance",
        lua.create_function(move |_, (object, name): (Value, String)| is_instance(&c, &object, &name))?,
    )?;

    // Unknown globals resolve to host classes
    let c = Arc::clone(ctx);
    let index = lua.create_function(move |lua, (_, key): (Table, Value)| {
        let Value::String(key) = key else {
            return Ok(Value::Nil);
        };
        let name = String::from(key.to_string_lossy());
        if !c.host.class_exists(&name) {
            return Ok(Value::Nil);
        }
        class::import(lua, &c, &name).map(Value::Table)
    })?;
    let metatable = lua.create_table()?;
    metatable.raw_set("__index", index)?;
    globals.set_metatable(Some(metatable));
    Ok(())
}

fn require(lua: &Lua, ctx: &Arc<BridgeContext>, name: &str) -> mlua::Result<Table> {
    let key = path::resolve_base(&ctx.options, None, name);
    if let Some(class) = ctx.script_class(lua, &key)? {
        return Ok(class);
    }
    registrar::load(lua, ctx, &key).map_err(mlua::Error::external)?;
    ctx.script_class(lua, &key)?.ok_or_else(|| {
        mlua::Error::RuntimeError(format!("module '{}' did not register", name))
    })
}

fn is_instance(ctx: &BridgeContext, object: &Value, name: &str) -> mlua::Result<bool> {
    let Some(id) = lifetime::resolve_object(ctx, object)? else {
        return Ok(false);
    };
    if let Some(state) = ctx.instance(id) {
        let key = path::resolve_base(&ctx.options, None, name);
        if ctx
            .script_chain(state.definition.path())
            .iter()
            .any(|def| def.path() == key || def.path() == name)
        {
            return Ok(true);
        }
    }
    Ok(ctx
        .host
        .object_info(id)
        .is_some_and(|info| ctx.host.is_class(&info.class, name)))
}
