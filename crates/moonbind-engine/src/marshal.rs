//! Value marshaller
//!
//! Converts between interpreter values and [`HostValue`]s.
//!
//! Host to guest:
//! - primitives map directly
//! - lists become sequences, maps become string-keyed tables
//! - objects go through the lifetime bridge (pinned instance, canonical
//!   wrapper, or nil for a destroyed object)
//!
//! Guest to host:
//! - object wrappers and instance tables become [`HostValue::Object`], or
//!   nil if the object is gone
//! - a table whose first key is the integer 1 is a list, any other table a
//!   map with stringified keys
//! - functions, threads and foreign userdata become nil
//!
//! Table traversal keeps an identity-keyed guard of the tables on the
//! current path, so a self-referencing table fails with
//! [`MarshalError::Cycle`] while shared substructure is fine.

use std::collections::BTreeMap;
use std::sync::Arc;

use mlua::{Lua, Table, Value};
use moonbind_sdk::{HostValue, ValueKind};
use rustc_hash::FxHashSet;

use crate::context::BridgeContext;
use crate::error::MarshalError;
use crate::lifetime;

/// Convert a host value into a guest value
pub(crate) fn to_guest(lua: &Lua, ctx: &Arc<BridgeContext>, value: &HostValue) -> mlua::Result<Value> {
    Ok(match value {
        HostValue::Nil => Value::Nil,
        HostValue::Bool(b) => Value::Boolean(*b),
        HostValue::Int(i) => Value::Integer(*i),
        HostValue::Float(f) => Value::Number(*f),
        HostValue::String(s) => Value::String(lua.create_string(s)?),
        HostValue::List(items) => {
            let table = lua.create_table_with_capacity(items.len(), 0)?;
            for (i, item) in items.iter().enumerate() {
                table.raw_set(i as i64 + 1, to_guest(lua, ctx, item)?)?;
            }
            Value::Table(table)
        }
        HostValue::Map(map) => {
            let table = lua.create_table_with_capacity(0, map.len())?;
            for (key, item) in map {
                table.raw_set(key.as_str(), to_guest(lua, ctx, item)?)?;
            }
            Value::Table(table)
        }
        HostValue::Object(id) => lifetime::wrap_object(lua, ctx, *id)?,
    })
}

/// Convert a sequence of host values into call arguments
pub(crate) fn to_guest_args(
    lua: &Lua,
    ctx: &Arc<BridgeContext>,
    values: &[HostValue],
) -> mlua::Result<Vec<Value>> {
    values.iter().map(|value| to_guest(lua, ctx, value)).collect()
}

/// Convert a guest value into a host value, optionally coercing to `expected`
pub(crate) fn to_host(
    ctx: &BridgeContext,
    value: &Value,
    expected: Option<ValueKind>,
) -> Result<HostValue, MarshalError> {
    let mut guard = CycleGuard::default();
    let converted = convert(ctx, value, &mut guard)?;
    match expected {
        Some(kind) => coerce(converted, kind),
        None => Ok(converted),
    }
}

/// Tables on the current traversal path, by identity
#[derive(Default)]
struct CycleGuard {
    active: FxHashSet<usize>,
}

impl CycleGuard {
    fn enter(&mut self, table: &Table) -> Result<usize, MarshalError> {
        let id = table.to_pointer() as usize;
        if !self.active.insert(id) {
            return Err(MarshalError::Cycle);
        }
        Ok(id)
    }

    fn leave(&mut self, id: usize) {
        self.active.remove(&id);
    }
}

fn convert(ctx: &BridgeContext, value: &Value, guard: &mut CycleGuard) -> Result<HostValue, MarshalError> {
    Ok(match value {
        Value::Nil => HostValue::Nil,
        Value::Boolean(b) => HostValue::Bool(*b),
        Value::Integer(i) => HostValue::Int(*i),
        Value::Number(n) => HostValue::Float(*n),
        Value::String(s) => HostValue::String(String::from(s.to_string_lossy())),
        Value::Table(table) => {
            if lifetime::is_object_table(table)? {
                return Ok(object_value(ctx, value)?);
            }
            let id = guard.enter(table)?;
            let converted = table_to_host(ctx, table, guard);
            guard.leave(id);
            converted?
        }
        Value::UserData(_) => object_value(ctx, value)?,
        _ => HostValue::Nil,
    })
}

fn object_value(ctx: &BridgeContext, value: &Value) -> Result<HostValue, MarshalError> {
    Ok(match lifetime::resolve_object(ctx, value)? {
        Some(id) => HostValue::Object(id),
        None => HostValue::Nil,
    })
}

fn table_to_host(ctx: &BridgeContext, table: &Table, guard: &mut CycleGuard) -> Result<HostValue, MarshalError> {
    let first_key = match table.clone().pairs::<Value, Value>().next() {
        Some(pair) => Some(pair?.0),
        None => None,
    };

    if matches!(first_key, Some(Value::Integer(1))) {
        let len = table.raw_len();
        let mut items = Vec::with_capacity(len);
        for i in 1..=len {
            let item: Value = table.raw_get(i as i64)?;
            items.push(convert(ctx, &item, guard)?);
        }
        return Ok(HostValue::List(items));
    }

    let mut map = BTreeMap::new();
    for pair in table.clone().pairs::<Value, Value>() {
        let (key, item) = pair?;
        let Some(key) = key_string(&key) else {
            continue;
        };
        map.insert(key, convert(ctx, &item, guard)?);
    }
    Ok(HostValue::Map(map))
}

fn key_string(key: &Value) -> Option<String> {
    match key {
        Value::String(s) => Some(String::from(s.to_string_lossy())),
        Value::Integer(i) => Some(i.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Boolean(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Coerce a converted value to the expected kind
fn coerce(value: HostValue, expected: ValueKind) -> Result<HostValue, MarshalError> {
    match (value, expected) {
        (value, kind) if value.kind() == kind => Ok(value),
        (HostValue::Int(i), ValueKind::Float) => Ok(HostValue::Float(i as f64)),
        (HostValue::Float(f), ValueKind::Int) if f.fract() == 0.0 => Ok(HostValue::Int(f as i64)),
        (HostValue::Nil, ValueKind::Object) => Ok(HostValue::Nil),
        (HostValue::Map(map), ValueKind::List) if map.is_empty() => Ok(HostValue::List(Vec::new())),
        (value, kind) => Err(MarshalError::TypeMismatch {
            expected: kind,
            got: value.kind(),
        }),
    }
}
