//! Call dispatcher
//!
//! Every guest call made on behalf of the host runs through
//! [`protected_call`]: the callee runs under `xpcall` with an error handler
//! that snapshots the guest stack before it unwinds, and a depth guard
//! restores the protected-call depth on every exit path.
//!
//! Object calls resolve in order:
//! 1. a callable field on the instance table
//! 2. a function on the script class chain (called with `self`)
//! 3. a host method bound by name on the object's class

use std::sync::Arc;

use mlua::{Function, Lua, MultiValue, Value};
use moonbind_sdk::{HostValue, ObjectId};
use tracing::error;

use crate::context::{slots, BridgeContext, DepthGuard};
use crate::debug::{self, PauseReason};
use crate::error::{describe_lua_error, CallError, RuntimeError};
use crate::marshal;
use crate::script::instance;

/// Call a guest function under `xpcall`, returning its results
pub(crate) fn protected_call(
    lua: &Lua,
    ctx: &Arc<BridgeContext>,
    callee: &Function,
    args: Vec<Value>,
) -> Result<Vec<Value>, RuntimeError> {
    let _depth = DepthGuard::enter(ctx);

    let (xpcall, handler) = match (
        lua.named_registry_value::<Function>(slots::XPCALL),
        lua.named_registry_value::<Function>(slots::ERROR_HANDLER),
    ) {
        (Ok(xpcall), Ok(handler)) => (xpcall, handler),
        (Err(err), _) | (_, Err(err)) => return Err(RuntimeError::from_lua(&err)),
    };

    let mut call_args = Vec::with_capacity(args.len() + 2);
    call_args.push(Value::Function(callee.clone()));
    call_args.push(Value::Function(handler));
    call_args.extend(args);

    let results = match xpcall.call::<MultiValue>(MultiValue::from_vec(call_args)) {
        Ok(results) => results.into_vec(),
        Err(err) => {
            let err = RuntimeError::from_lua(&err);
            error!(error = %err.message, "protected call failed");
            return Err(err);
        }
    };

    let mut results = results.into_iter();
    match results.next() {
        Some(Value::Boolean(true)) => Ok(results.collect()),
        _ => {
            let message = match results.next() {
                Some(Value::String(s)) => String::from(s.to_string_lossy()),
                Some(Value::Error(err)) => describe_lua_error(&err),
                Some(other) => format!("{:?}", other),
                None => "unknown error".to_string(),
            };
            let err = RuntimeError {
                message,
                traceback: ctx.take_traceback(),
            };
            error!(
                error = %err.message,
                "script runtime error\n{}",
                err.format_traceback()
            );
            Err(err)
        }
    }
}

/// Message handler passed to `xpcall`.
///
/// Runs before the stack unwinds: records the guest frames for the
/// traceback and stops in the debugger when one is attached.
pub(crate) fn error_handler(lua: &Lua, ctx: &Arc<BridgeContext>, err: Value) -> String {
    let message = match &err {
        Value::String(s) => String::from(s.to_string_lossy()),
        Value::Error(err) => describe_lua_error(err),
        Value::Nil => "nil".to_string(),
        other => match other.to_string() {
            Ok(text) => text,
            Err(_) => format!("({} error object)", other.type_name()),
        },
    };
    let frames = debug::capture_stack(lua);
    ctx.stash_traceback(frames);
    if ctx.debug.is_attached() && !ctx.debug.is_paused() {
        debug::pause(lua, ctx, PauseReason::Error(message.clone()));
    }
    message
}

fn first_to_host(ctx: &BridgeContext, results: Vec<Value>) -> Result<HostValue, CallError> {
    let value = results.into_iter().next().unwrap_or(Value::Nil);
    Ok(marshal::to_host(ctx, &value, None)?)
}

fn host_call(
    ctx: &BridgeContext,
    object: ObjectId,
    method: &str,
    args: &[HostValue],
) -> Result<HostValue, CallError> {
    ctx.host
        .call_method(object, method, args)
        .map_err(|err| CallError::InvalidArgument(err.to_string()))
}

/// Host method fallthrough for an object without a script member
fn host_fallback(
    ctx: &BridgeContext,
    object: ObjectId,
    method: &str,
    args: &[HostValue],
) -> Result<HostValue, CallError> {
    let Some(info) = ctx.host.object_info(object) else {
        return Err(CallError::InstanceIsNull);
    };
    if ctx.host.has_method(&info.class, method) {
        return host_call(ctx, object, method, args);
    }
    Err(CallError::InvalidMethod(method.to_string()))
}

/// Whether the object's script defines a callable member `method`
pub(crate) fn has_script_method(lua: &Lua, ctx: &BridgeContext, object: ObjectId, method: &str) -> bool {
    let Some(state) = ctx.instance(object) else {
        return false;
    };
    let Ok(this) = state.self_table(lua) else {
        return false;
    };
    matches!(instance::script_member(&this, method), Ok(Value::Function(_)))
}

/// Call `method` on a host object, script members first
pub(crate) fn call(
    lua: &Lua,
    ctx: &Arc<BridgeContext>,
    object: ObjectId,
    method: &str,
    args: &[HostValue],
) -> Result<HostValue, CallError> {
    let Some(state) = ctx.instance(object) else {
        return host_fallback(ctx, object, method, args);
    };
    let this = state.self_table(lua)?;
    drop(state);

    if let Value::Function(field) = this.raw_get::<Value>(method)? {
        let guest_args = marshal::to_guest_args(lua, ctx, args)?;
        return first_to_host(ctx, protected_call(lua, ctx, &field, guest_args)?);
    }
    if let Value::Function(function) = instance::script_member(&this, method)? {
        let mut guest_args = Vec::with_capacity(args.len() + 1);
        guest_args.push(Value::Table(this));
        guest_args.extend(marshal::to_guest_args(lua, ctx, args)?);
        return first_to_host(ctx, protected_call(lua, ctx, &function, guest_args)?);
    }
    host_fallback(ctx, object, method, args)
}

/// Call a class-level function of a script with the class table as `self`.
/// A function missing on the class falls back to its base scripts.
pub(crate) fn call_script(
    lua: &Lua,
    ctx: &Arc<BridgeContext>,
    path: &str,
    method: &str,
    args: &[HostValue],
) -> Result<HostValue, CallError> {
    let Some(class) = ctx.script_class(lua, path)? else {
        return Err(CallError::InstanceIsNull);
    };
    let Value::Function(function) = instance::script_member(&class, method)? else {
        return Err(CallError::InvalidMethod(method.to_string()));
    };
    let mut guest_args = Vec::with_capacity(args.len() + 1);
    guest_args.push(Value::Table(class));
    guest_args.extend(marshal::to_guest_args(lua, ctx, args)?);
    first_to_host(ctx, protected_call(lua, ctx, &function, guest_args)?)
}

/// Capture `xpcall` and create the error handler
pub(crate) fn install(lua: &Lua, ctx: &Arc<BridgeContext>) -> mlua::Result<()> {
    let xpcall: Function = lua.globals().raw_get("xpcall")?;
    lua.set_named_registry_value(slots::XPCALL, xpcall)?;

    let ctx = Arc::clone(ctx);
    let handler = lua.create_function(move |lua, err: Value| Ok(error_handler(lua, &ctx, err)))?;
    lua.set_named_registry_value(slots::ERROR_HANDLER, handler)
}
