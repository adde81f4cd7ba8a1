//! Script instances bound to host objects

use moonbind_engine::{EngineOptions, HostValue, ScriptError};
use moonbind_runtime::{ClassBuilder, RuntimeError};
use moonbind_sdk::HostReflection;

use crate::harness::{float, int, string, Harness};

const PLAYER: &str = r#"local Player = class("Node2D")
Player.speed = 10

function Player:_init(hp)
    self.hp = hp or 100
end

function Player:get_hp()
    return self.hp
end

function Player:hurt(amount)
    self.hp = self.hp - amount
    return self.hp
end

function Player:walk()
    self:translate(self.speed, 0)
    self.name = "walker"
    return self.x
end

return Player
"#;

fn player() -> Harness {
    let h = Harness::new();
    h.compile("res://player.lua", PLAYER);
    h
}

// ============================================================================
// Lifecycle
// ============================================================================

#[test]
fn test_init_receives_arguments() {
    let h = player();
    let object = h.spawn("res://player.lua", &[int(5)]);
    assert!(h.rt.engine().has_instance(object));
    assert_eq!(h.call(object, "get_hp", &[]), int(5));
}

#[test]
fn test_instance_fields_are_isolated() {
    let h = player();
    let a = h.spawn("res://player.lua", &[int(10)]);
    let b = h.spawn("res://player.lua", &[int(10)]);
    h.call(a, "hurt", &[int(3)]);
    assert_eq!(h.call(a, "get_hp", &[]), int(7));
    assert_eq!(h.call(b, "get_hp", &[]), int(10));
    assert_eq!(h.rt.engine().instance_count(), 2);
}

#[test]
fn test_instance_create_on_existing_object() {
    let h = player();
    let object = h.rt.host().create("Node2D").unwrap();
    h.rt.engine()
        .instance_create(object, "res://player.lua", &[int(1)])
        .unwrap();
    assert_eq!(
        h.rt.engine().instance_script(object).map(|d| d.path().to_string()),
        Some("res://player.lua".to_string())
    );
    assert_eq!(
        h.rt.engine().script("res://player.lua").unwrap().instances(),
        vec![object]
    );
}

#[test]
fn test_incompatible_host_base() {
    let h = player();
    let object = h.rt.host().create("RefCounted").unwrap();
    let err = h
        .rt
        .engine()
        .instance_create(object, "res://player.lua", &[])
        .unwrap_err();
    assert!(matches!(
        err,
        ScriptError::IncompatibleBase { ref base, ref class, .. } if base == "Node2D" && class == "RefCounted"
    ));
    assert!(!h.rt.engine().has_instance(object));
}

#[test]
fn test_instance_on_freed_object() {
    let h = player();
    let object = h.rt.host().create("Node2D").unwrap();
    h.rt.host().destroy(object);
    assert!(matches!(
        h.rt.engine().instance_create(object, "res://player.lua", &[]),
        Err(ScriptError::ObjectFreed)
    ));
}

#[test]
fn test_init_failure_leaves_no_instance() {
    let h = Harness::new();
    h.compile(
        "res://broken.lua",
        "local B = class('Node')\nfunction B:_init() error('nope') end\nreturn B",
    );
    let err = h.rt.spawn("res://broken.lua", &[]).unwrap_err();
    assert!(matches!(err, RuntimeError::Script(ScriptError::Runtime(_))));
    assert_eq!(h.rt.engine().instance_count(), 0);
    assert_eq!(h.rt.host().object_count(), 0);
}

#[test]
fn test_replacing_an_instance() {
    let h = player();
    h.compile("res://other.lua", "local O = class('Node')\nfunction O:who() return 'other' end\nreturn O");
    let object = h.spawn("res://player.lua", &[]);
    h.rt.engine().instance_create(object, "res://other.lua", &[]).unwrap();
    assert_eq!(h.call(object, "who", &[]), string("other"));
    assert_eq!(h.rt.engine().instance_count(), 1);
    assert_eq!(h.rt.engine().script("res://player.lua").unwrap().instance_count(), 0);
}

#[test]
fn test_destroying_object_releases_instance() {
    let h = player();
    let object = h.spawn("res://player.lua", &[]);
    assert!(h.rt.host().destroy(object));
    assert!(!h.rt.engine().has_instance(object));
    assert_eq!(h.rt.engine().instance_count(), 0);
}

#[test]
fn test_instance_destroy_keeps_object() {
    let h = player();
    let object = h.spawn("res://player.lua", &[]);
    assert!(h.rt.engine().instance_destroy(object));
    assert!(!h.rt.engine().instance_destroy(object));
    assert!(h.rt.host().is_alive(object));
    assert_eq!(h.call(object, "get_class", &[]), string("Node2D"));
}

#[test]
fn test_ref_counted_instance_freed_with_last_host_reference() {
    let h = Harness::new();
    h.compile("res://data.lua", "local D = class()\nD.value = 3\nreturn D");
    let object = h.spawn("res://data.lua", &[]);
    assert_eq!(h.rt.host().refcount(object), Some(1));
    h.collect();
    assert!(h.rt.host().is_alive(object));

    h.rt.release(object);
    assert!(!h.rt.host().is_alive(object));
    assert!(!h.rt.engine().has_instance(object));
}

#[test]
fn test_scripting_disabled_allows_tools_only() {
    let h = Harness::with_options(EngineOptions {
        scripting_enabled: false,
        ..EngineOptions::default()
    });
    h.compile("res://game.lua", "return class('Node')");
    h.compile("res://editor.lua", "return tool(class('Node'))");
    assert!(matches!(
        h.rt.spawn("res://game.lua", &[]),
        Err(RuntimeError::Script(ScriptError::ScriptingDisabled(_)))
    ));
    assert!(h.rt.spawn("res://editor.lua", &[]).is_ok());
}

#[test]
fn test_spawn_loads_from_store() {
    let h = Harness::new();
    h.store_source("res://lazy.lua", "local L = class('Node')\nfunction L:hi() return 'hi' end\nreturn L");
    let object = h.spawn("res://lazy.lua", &[]);
    assert_eq!(h.call(object, "hi", &[]), string("hi"));
}

// ============================================================================
// Property Access
// ============================================================================

#[test]
fn test_host_reads_script_fields() {
    let h = player();
    let object = h.spawn("res://player.lua", &[int(42)]);
    assert_eq!(h.rt.host().get(object, "hp"), Some(int(42)));
    assert_eq!(h.rt.host().get(object, "speed"), Some(int(10)));
    assert_eq!(h.rt.host().get(object, "x"), Some(float(0.0)));
    assert_eq!(h.rt.host().get(object, "nothing"), None);
}

#[test]
fn test_host_writes_script_fields() {
    let h = player();
    let object = h.spawn("res://player.lua", &[]);
    assert!(h.rt.host().set(object, "hp", &int(9)));
    assert_eq!(h.call(object, "get_hp", &[]), int(9));
    assert!(h.rt.host().set(object, "speed", &int(2)));
    assert_eq!(h.call(object, "walk", &[]), float(2.0));

    let other = h.spawn("res://player.lua", &[]);
    assert_eq!(h.rt.host().get(other, "speed"), Some(int(10)));
}

#[test]
fn test_script_reaches_host_members() {
    let h = player();
    let object = h.spawn("res://player.lua", &[]);
    assert_eq!(h.call(object, "walk", &[]), float(10.0));
    assert_eq!(h.rt.host().get_property(object, "name"), Some(string("walker")));
    assert_eq!(h.rt.host().get_property(object, "hp"), None);
}

#[test]
fn test_virtual_properties() {
    let h = Harness::new();
    h.compile(
        "res://virtual.lua",
        r#"local V = class("Node")
function V:_init()
    self.store = {}
end
function V:_get(name)
    if name == "answer" then return 42 end
    return self.store[name]
end
function V:_set(name, value)
    if name == "name" then return false end
    self.store[name] = value
    return true
end
return V
"#,
    );
    let object = h.spawn("res://virtual.lua", &[]);
    let host = h.rt.host();
    assert_eq!(host.get(object, "answer"), Some(int(42)));
    assert!(host.set(object, "color", &string("red")));
    assert_eq!(host.get(object, "color"), Some(string("red")));
    assert!(host.set(object, "name", &string("native")));
    assert_eq!(host.get_property(object, "name"), Some(string("native")));
}

#[test]
fn test_property_lock_prevents_recursion() {
    let h = Harness::new();
    h.rt.host()
        .register_class(ClassBuilder::new("Probe").parent("Node").method(
            "probe",
            |host, id, args| {
                let name = args.first().and_then(|v| v.as_str()).unwrap_or_default();
                Ok(host.get(id, name).unwrap_or(HostValue::Nil))
            },
        ))
        .unwrap();
    h.compile(
        "res://probed.lua",
        r#"local P = class("Probe")
function P:_get(name)
    if name == "deep" then
        return self:probe("deep") or "locked"
    end
end
return P
"#,
    );
    let object = h.spawn("res://probed.lua", &[]);
    assert_eq!(h.rt.host().get(object, "deep"), Some(string("locked")));
}

#[test]
fn test_notification() {
    let h = Harness::new();
    h.compile(
        "res://listener.lua",
        "local L = class('Node')\nfunction L:_notification(what) self.last = what end\nreturn L",
    );
    let object = h.spawn("res://listener.lua", &[]);
    h.rt.engine().notification(object, 7);
    assert_eq!(h.rt.host().get(object, "last"), Some(int(7)));

    let plain = h.rt.host().create("Node").unwrap();
    h.rt.engine().notification(plain, 7);
}

#[test]
fn test_unconvertible_field_reads_as_unhandled() {
    let h = Harness::new();
    h.compile(
        "res://looped.lua",
        r#"local L = class("Node")
function L:_init()
    self.loop = {}
    self.loop.next = self.loop
    self.plain = { 1, 2 }
end
function L:_get(name)
    if name == "computed" then
        local t = {}
        t[1] = t
        return t
    end
end
return L
"#,
    );
    let object = h.spawn("res://looped.lua", &[]);
    let host = h.rt.host();
    assert_eq!(host.get(object, "loop"), None);
    assert_eq!(host.get(object, "computed"), None);
    assert_eq!(host.get(object, "plain"), Some(HostValue::List(vec![int(1), int(2)])));
}

#[test]
fn test_failing_notification_handler() {
    let h = Harness::new();
    h.compile(
        "res://fragile.lua",
        r#"local F = class("Node")
function F:_notification(what)
    self.seen = what
    if what == 13 then error("unlucky") end
end
return F
"#,
    );
    let object = h.spawn("res://fragile.lua", &[]);
    h.rt.engine().notification(object, 13);
    assert_eq!(h.rt.host().get(object, "seen"), Some(int(13)));
    h.rt.engine().notification(object, 2);
    assert_eq!(h.rt.host().get(object, "seen"), Some(int(2)));
}

// ============================================================================
// Guest-side Construction
// ============================================================================

#[test]
fn test_script_class_constructors() {
    let h = player();
    let values = h.exec(
        r#"
        local Player = require("player")
        local a = Player.new(3)
        local b = Player(4)
        local c = Player:new(5)
        return a:get_hp(), b:get_hp(), c:get_hp(), tostring(Player)
        "#,
    );
    assert_eq!(values, vec![int(3), int(4), int(5), string("res://player.lua")]);
    assert_eq!(h.rt.engine().instance_count(), 3);
}

#[test]
fn test_super_calls_base_implementation() {
    let h = Harness::new();
    h.store_source(
        "res://base.lua",
        "local B = class('Node')\nfunction B:value() return 1 end\nreturn B",
    );
    h.compile(
        "res://derived.lua",
        "local D = class('res://base.lua')\nfunction D:value() return self.super.value(self) + 10 end\nreturn D",
    );
    let object = h.spawn("res://derived.lua", &[]);
    assert_eq!(h.call(object, "value", &[]), int(11));
    assert_eq!(h.rt.engine().instance_base_type("res://derived.lua").as_deref(), Some("Node"));
}

#[test]
fn test_is_instance() {
    let h = player();
    let object = h.spawn("res://player.lua", &[]);
    h.set_global("p", object);
    assert_eq!(
        h.exec("return is_instance(p, 'player'), is_instance(p, 'res://player.lua'), is_instance(p, 'Node'), is_instance(p, 'RefCounted')"),
        vec![
            HostValue::Bool(true),
            HostValue::Bool(true),
            HostValue::Bool(true),
            HostValue::Bool(false),
        ]
    );
}

#[test]
fn test_instance_table_is_the_object() {
    let h = player();
    let object = h.spawn("res://player.lua", &[int(8)]);
    h.set_global("p", object);
    assert_eq!(h.eval("return p.hp"), int(8));
    assert_eq!(h.eval("return p"), HostValue::Object(object));
    assert!(h
        .eval("return tostring(p)")
        .as_str()
        .unwrap()
        .starts_with("[Node2D:#"));
}
