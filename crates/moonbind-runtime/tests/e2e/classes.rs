//! Host class metatables seen from the guest

use moonbind_engine::mlua::{Lua, Table, Value};
use moonbind_engine::{HostValue, Resolution, ScriptError};
use moonbind_runtime::ClassBuilder;

use crate::harness::{float, int, string, Harness};

// ============================================================================
// Import
// ============================================================================

#[test]
fn test_import_is_cached() {
    let h = Harness::new();
    let first = h.rt.engine().import_class("Node2D").unwrap();
    let second = h.rt.engine().import_class("Node2D").unwrap();
    assert_eq!(first.to_pointer(), second.to_pointer());
    assert_eq!(h.eval("return rawequal(Node2D, Node2D)"), HostValue::Bool(true));
}

#[test]
fn test_import_builds_ancestors() {
    let h = Harness::new();
    h.rt.engine().import_class("Node2D").unwrap();
    assert_eq!(
        h.rt.engine().imported_classes(),
        vec!["Node".to_string(), "Node2D".to_string(), "Object".to_string()]
    );
    assert_eq!(h.eval("return rawequal(getmetatable(Node2D), Node)"), HostValue::Bool(true));
}

#[test]
fn test_unknown_class() {
    let h = Harness::new();
    assert!(matches!(
        h.rt.engine().import_class("Spaceship"),
        Err(ScriptError::UnknownClass(_))
    ));
    assert_eq!(h.eval("return Spaceship"), HostValue::Nil);
}

// ============================================================================
// Member Resolution
// ============================================================================

#[test]
fn test_resolve_member_kinds() {
    let h = Harness::new();
    let engine = h.rt.engine();
    assert!(matches!(
        engine.resolve_member("Node2D", "get_name").unwrap(),
        Resolution::Method(_)
    ));
    match engine.resolve_member("Node2D", "NOTIFICATION_PREDELETE").unwrap() {
        Resolution::Field(Value::Integer(1)) => {}
        other => panic!("unexpected resolution {:?}", other),
    }
    assert!(!engine.resolve_member("Node2D", "fly").unwrap().is_found());
}

#[test]
fn test_constants_visible_through_subclasses() {
    let h = Harness::new();
    assert_eq!(
        h.exec("return Object.NOTIFICATION_PREDELETE, Node2D.NOTIFICATION_POSTINITIALIZE"),
        vec![int(1), int(0)]
    );
}

#[test]
fn test_method_closures_are_cached() {
    let h = Harness::new();
    let same = h.eval(
        r#"
        local a, b = Node.new(), Node.new()
        local same = rawequal(a.get_name, b.get_name)
        a:free() b:free()
        return same
        "#,
    );
    assert_eq!(same, HostValue::Bool(true));
}

#[test]
fn test_binding_applied_on_import() {
    let h = Harness::new();
    h.rt.host()
        .register_class(ClassBuilder::new("Sprite").parent("Node2D"))
        .unwrap();
    h.rt.engine()
        .register_binding(
            "Sprite",
            Box::new(|lua: &Lua, metatable: &Table| {
                metatable.raw_set("FRAMES", 8)?;
                metatable.raw_set(
                    "frame_name",
                    lua.create_function(|_, i: i64| Ok(format!("frame_{}", i)))?,
                )
            }),
        )
        .unwrap();
    assert_eq!(h.exec("return Sprite.FRAMES, Sprite.frame_name(3)"), vec![int(8), string("frame_3")]);
}

#[test]
fn test_binding_applied_to_imported_class() {
    let h = Harness::new();
    h.rt.engine().import_class("Node").unwrap();
    h.rt.engine()
        .register_binding("Node", Box::new(|_: &Lua, metatable: &Table| metatable.raw_set("TAG", "bound")))
        .unwrap();
    assert_eq!(h.eval("return Node2D.TAG"), string("bound"));
}

// ============================================================================
// Objects
// ============================================================================

#[test]
fn test_construct_and_call() {
    let h = Harness::new();
    let values = h.exec(
        r#"
        local n = Node2D.new()
        n:translate(1, 2)
        local result = { n.x, n.y, n:get_class(), n:is_class("Node") }
        n:free()
        return table.unpack(result)
        "#,
    );
    assert_eq!(values, vec![float(1.0), float(2.0), string("Node2D"), HostValue::Bool(true)]);
}

#[test]
fn test_call_syntax_constructs() {
    let h = Harness::new();
    assert_eq!(
        h.eval("local n = Node2D() local c = n:get_class() n:free() return c"),
        string("Node2D")
    );
}

#[test]
fn test_property_assignment() {
    let h = Harness::new();
    assert_eq!(
        h.eval("local n = Node.new() n.name = 'hero' local name = n:get_name() n:free() return name"),
        string("hero")
    );
}

#[test]
fn test_unknown_property_assignment_is_ignored() {
    let h = Harness::new();
    assert_eq!(
        h.eval("local n = Node.new() n.wings = 2 local w = n.wings n:free() return w"),
        HostValue::Nil
    );
}

#[test]
fn test_dot_call_is_an_error() {
    let h = Harness::new();
    let err = h
        .rt
        .engine()
        .exec("local n = Node.new() return n.get_name()", "dot")
        .unwrap_err();
    assert!(err.to_string().contains("use ':'"), "{}", err);
}

#[test]
fn test_host_error_surfaces_in_guest() {
    let h = Harness::new();
    let values = h.exec(
        r#"
        local n = Node2D.new()
        local ok, err = pcall(n.translate, n, "left")
        n:free()
        return ok, tostring(err)
        "#,
    );
    assert_eq!(values[0], HostValue::Bool(false));
    assert!(values[1].as_str().unwrap().contains("Type mismatch"));
}

#[test]
fn test_tostring() {
    let h = Harness::new();
    let values = h.exec("local n = Node.new() local s = tostring(n) n:free() return tostring(Node), s");
    assert_eq!(values[0], string("Node"));
    assert!(values[1].as_str().unwrap().starts_with("[Node:#"));
}

#[test]
fn test_equality_by_identity() {
    let h = Harness::new();
    let node = h.rt.host().create("Node").unwrap();
    h.set_global("a", node);
    h.set_global("b", node);
    assert_eq!(
        h.exec("return a == b, rawequal(a, b)"),
        vec![HostValue::Bool(true), HostValue::Bool(false)]
    );
}

#[test]
fn test_abstract_class_cannot_be_constructed() {
    let h = Harness::new();
    h.rt.host()
        .register_class(ClassBuilder::new("Shape").parent("RefCounted").abstract_class())
        .unwrap();
    let values = h.exec("local ok, err = pcall(Shape.new) return ok, tostring(err)");
    assert_eq!(values[0], HostValue::Bool(false));
    assert!(values[1].as_str().unwrap().contains("cannot be instantiated"));
}
