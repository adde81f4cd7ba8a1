//! Value conversion between guest and host

use std::collections::BTreeMap;

use moonbind_engine::{HostValue, MarshalError, ScriptError, ValueKind};

use crate::harness::{float, int, string, Harness};

// ============================================================================
// Primitives
// ============================================================================

#[test]
fn test_primitive_results() {
    let h = Harness::new();
    let values = h.exec("return 1, 2.5, 'hi', true");
    assert_eq!(values, vec![int(1), float(2.5), string("hi"), HostValue::Bool(true)]);
}

#[test]
fn test_integer_and_float_stay_distinct() {
    let h = Harness::new();
    assert_eq!(h.eval("return 3"), int(3));
    assert_eq!(h.eval("return 3.0"), float(3.0));
    assert_eq!(h.eval("return 7 // 2"), int(3));
}

#[test]
fn test_functions_become_nil() {
    let h = Harness::new();
    assert_eq!(h.eval("return function() end"), HostValue::Nil);
    assert_eq!(h.eval("return coroutine.create(function() end)"), HostValue::Nil);
}

// ============================================================================
// Tables
// ============================================================================

#[test]
fn test_sequence_becomes_list() {
    let h = Harness::new();
    assert_eq!(
        h.eval("return {10, 'x', {1}}"),
        HostValue::List(vec![int(10), string("x"), HostValue::List(vec![int(1)])])
    );
}

#[test]
fn test_keyed_table_becomes_map() {
    let h = Harness::new();
    let mut expected = BTreeMap::new();
    expected.insert("name".to_string(), string("slime"));
    expected.insert("hp".to_string(), int(3));
    assert_eq!(h.eval("return {name = 'slime', hp = 3}"), HostValue::Map(expected));
}

#[test]
fn test_empty_table_is_map() {
    let h = Harness::new();
    assert_eq!(h.eval("return {}"), HostValue::Map(BTreeMap::new()));
}

#[test]
fn test_empty_table_coerces_to_list() {
    let h = Harness::new();
    let value = h
        .rt
        .engine()
        .with_lua(|lua| lua.create_table().map(moonbind_engine::mlua::Value::Table))
        .unwrap();
    assert_eq!(
        h.rt.engine().to_host(&value, Some(ValueKind::List)),
        Ok(HostValue::List(Vec::new()))
    );
}

#[test]
fn test_host_list_roundtrips_through_guest() {
    let h = Harness::new();
    h.set_global("items", HostValue::List(vec![int(1), int(2), int(3)]));
    assert_eq!(h.eval("return #items, items[3]"), int(3));
    assert_eq!(h.exec("return #items, items[3]")[1], int(3));
}

#[test]
fn test_self_reference_is_cycle_error() {
    let h = Harness::new();
    let err = h
        .rt
        .engine()
        .exec("local t = {} t.me = t return t", "cycle")
        .unwrap_err();
    assert!(matches!(err, ScriptError::Marshal(MarshalError::Cycle)));
}

#[test]
fn test_shared_subtable_is_not_a_cycle() {
    let h = Harness::new();
    let value = h.eval("local s = {1, 2} return {a = s, b = s}");
    let HostValue::Map(map) = value else {
        panic!("expected a map, got {:?}", value);
    };
    assert_eq!(map["a"], map["b"]);
}

#[test]
fn test_cycle_error_inside_host_call_is_guest_error() {
    let h = Harness::new();
    let values = h.exec(
        r#"
        local n = Node.new()
        local t = {}
        t.me = t
        local ok, err = pcall(function() n:set_name(t) end)
        n:free()
        return ok, tostring(err)
        "#,
    );
    assert_eq!(values[0], HostValue::Bool(false));
    assert!(values[1].as_str().unwrap().contains("cycle"));
}

// ============================================================================
// JSON Globals
// ============================================================================

#[test]
fn test_to_json() {
    let h = Harness::new();
    assert_eq!(h.eval("return to_json({1, 2, 3})"), string("[1,2,3]"));
    assert_eq!(h.eval("return to_json({a = true})"), string(r#"{"a":true}"#));
}

#[test]
fn test_parse_json() {
    let h = Harness::new();
    assert_eq!(h.eval(r#"return parse_json('{"a": [1, 2]}').a[2]"#), int(2));
    let values = h.exec("return parse_json('{broken')");
    assert_eq!(values[0], HostValue::Nil);
    assert!(values[1].as_str().is_some());
}

// ============================================================================
// Objects
// ============================================================================

#[test]
fn test_object_identity_roundtrip() {
    let h = Harness::new();
    let node = h.rt.host().create("Node").unwrap();
    h.set_global("node", node);
    assert_eq!(h.eval("return node"), HostValue::Object(node));
}

#[test]
fn test_freed_object_marshals_to_nil() {
    let h = Harness::new();
    let node = h.rt.host().create("Node").unwrap();
    h.rt.host().destroy(node);
    h.set_global("node", node);
    assert_eq!(h.eval("return node == nil"), HostValue::Bool(true));
}

#[test]
fn test_wrapper_of_freed_object_converts_to_nil() {
    let h = Harness::new();
    let node = h.rt.host().create("Node").unwrap();
    h.set_global("node", node);
    h.rt.host().destroy(node);
    assert_eq!(h.eval("return node"), HostValue::Nil);
    assert_eq!(h.eval("return tostring(node)"), string("[Object:null]"));
}
