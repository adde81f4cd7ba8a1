//! Stack and frame introspection
//!
//! Levels count guest (non-C) frames only, innermost first, so the same
//! level means the same frame whether it is read from the hook, from the
//! error handler or through the prelude's locals helper.

use std::sync::Arc;

use mlua::{Function, Lua, Table, Value};
use moonbind_sdk::{HostValue, ObjectId};

use super::{StackFrame, Variable};
use crate::context::{slots, BridgeContext};
use crate::lifetime::{self, UDATA_KEY};
use crate::marshal;

/// Guest frames currently on the stack, innermost first
pub(crate) fn capture_stack(lua: &Lua) -> Vec<StackFrame> {
    let mut frames = Vec::new();
    let mut level = 0;
    while let Some(debug) = lua.inspect_stack(level) {
        level += 1;
        let source = debug.source();
        if source.what == "C" {
            continue;
        }
        let function = match debug.names().name {
            Some(name) => name.to_string(),
            None if source.what == "main" => "main chunk".to_string(),
            None => "?".to_string(),
        };
        frames.push(StackFrame {
            source: source
                .source
                .as_deref()
                .map(chunk_source)
                .unwrap_or_else(|| "?".to_string()),
            line: debug.curr_line().max(0) as u32,
            function,
        });
    }
    frames
}

/// Number of guest frames on the stack
pub(crate) fn stack_depth(lua: &Lua) -> usize {
    let mut depth = 0;
    let mut level = 0;
    while let Some(debug) = lua.inspect_stack(level) {
        if debug.source().what != "C" {
            depth += 1;
        }
        level += 1;
    }
    depth
}

/// Script key from a chunk name (`@res://a.lua` → `res://a.lua`)
pub(crate) fn chunk_source(name: &str) -> String {
    name.strip_prefix('@')
        .or_else(|| name.strip_prefix('='))
        .unwrap_or(name)
        .to_string()
}

/// Raw `(name, value)` locals of a frame through the prelude helper
fn frame_locals(lua: &Lua, level: usize) -> mlua::Result<Vec<(String, Value)>> {
    let helper: Function = lua.named_registry_value(slots::LOCALS)?;
    let Value::Table(list) = helper.call::<Value>(level as i64)? else {
        return Ok(Vec::new());
    };
    let mut out = Vec::new();
    for i in 1..=list.raw_len() {
        let pair: Table = list.raw_get(i)?;
        let name: String = pair.raw_get(1)?;
        let value: Value = pair.raw_get(2)?;
        out.push((name, value));
    }
    Ok(out)
}

fn to_variable(ctx: &BridgeContext, name: String, value: &Value) -> Variable {
    let value = marshal::to_host(ctx, value, None)
        .unwrap_or_else(|_| HostValue::String(format!("<{}>", value.type_name())));
    Variable { name, value }
}

fn instance_object(ctx: &BridgeContext, value: &Value) -> Option<ObjectId> {
    let (id, _) = lifetime::handle_of(value).ok().flatten()?;
    ctx.has_instance(id).then_some(id)
}

pub(crate) fn locals(lua: &Lua, ctx: &Arc<BridgeContext>, level: usize) -> Vec<Variable> {
    let Ok(raw) = frame_locals(lua, level) else {
        return Vec::new();
    };
    raw.into_iter()
        .enumerate()
        .filter(|(i, (name, value))| {
            if name.starts_with('(') {
                return false;
            }
            !(*i == 0 && name == "self" && instance_object(ctx, value).is_some())
        })
        .map(|(_, (name, value))| to_variable(ctx, name, &value))
        .collect()
}

pub(crate) fn instance_at(lua: &Lua, ctx: &Arc<BridgeContext>, level: usize) -> Option<ObjectId> {
    let raw = frame_locals(lua, level).ok()?;
    let (name, value) = raw.first()?;
    if name != "self" {
        return None;
    }
    instance_object(ctx, value)
}

pub(crate) fn members(lua: &Lua, ctx: &Arc<BridgeContext>, level: usize) -> Vec<Variable> {
    let Some(object) = instance_at(lua, ctx, level) else {
        return Vec::new();
    };
    let Some(state) = ctx.instance(object) else {
        return Vec::new();
    };
    let Ok(table) = state.self_table(lua) else {
        return Vec::new();
    };
    let mut fields = Vec::new();
    for pair in table.pairs::<Value, Value>() {
        let Ok((key, value)) = pair else { break };
        let Value::String(key) = key else { continue };
        let key = String::from(key.to_string_lossy());
        if key == UDATA_KEY || matches!(value, Value::Function(_)) {
            continue;
        }
        fields.push(to_variable(ctx, key, &value));
    }
    fields.sort_by(|a, b| a.name.cmp(&b.name));
    fields
}
