//! Object identity and lifetime across the bridge

use moonbind_engine::HostValue;
use moonbind_sdk::HostReflection;

use crate::harness::{string, Harness};

// ============================================================================
// Ref-counted Objects
// ============================================================================

#[test]
fn test_wrapper_holds_one_reference() {
    let h = Harness::new();
    let host = h.rt.host();
    let object = host.create("RefCounted").unwrap();
    host.reference(object);

    h.set_global("a", object);
    h.set_global("b", object);
    assert_eq!(host.refcount(object), Some(2));
    assert_eq!(h.eval("return rawequal(a, b)"), HostValue::Bool(true));

    h.exec("a = nil b = nil");
    h.collect();
    assert_eq!(host.refcount(object), Some(1));
    assert_eq!(h.rt.engine().handle_stats().live(), 0);
}

#[test]
fn test_balanced_reference_counts() {
    let h = Harness::new();
    let host = h.rt.host();
    let object = host.create("RefCounted").unwrap();
    host.reference(object);

    for _ in 0..50 {
        h.set_global("held", object);
        assert_eq!(host.refcount(object), Some(2));
        h.exec("held = nil");
        h.collect();
    }
    let stats = h.rt.engine().handle_stats();
    assert_eq!(stats.acquired, 50);
    assert_eq!(stats.released, 50);
    assert_eq!(host.refcount(object), Some(1));
}

#[test]
fn test_guest_created_object_freed_by_collection() {
    let h = Harness::new();
    let object = h
        .eval("return RefCounted.new()")
        .as_object()
        .expect("constructor returns an object");
    assert!(h.rt.host().is_alive(object));

    h.collect();
    assert!(!h.rt.host().is_alive(object));
}

#[test]
fn test_guest_reference_keeps_object_alive() {
    let h = Harness::new();
    h.exec("keep = RefCounted.new()");
    h.collect();
    assert_eq!(h.eval("return keep:get_reference_count()"), HostValue::Int(1));
    assert_eq!(h.rt.host().object_count(), 1);

    h.exec("keep = nil");
    h.collect();
    assert_eq!(h.rt.host().object_count(), 0);
}

// ============================================================================
// Scripted Ref-counted Objects
// ============================================================================

const COUNTER: &str = r#"local Counter = class("RefCounted")

function Counter:_init(start)
    self.n = start or 0
end

function Counter:bump()
    self.n = self.n + 1
    return self.n
end

return Counter
"#;

#[test]
fn test_script_constructed_object_freed_by_collection() {
    let h = Harness::new();
    h.store_source("res://counter.lua", COUNTER);
    let values = h.exec("local C = require('counter') local c = C.new(1) local n = c:bump() c = nil return n");
    assert_eq!(values, vec![HostValue::Int(2)]);

    h.collect();
    h.collect();
    assert_eq!(h.rt.host().object_count(), 0);
    assert_eq!(h.rt.engine().instance_count(), 0);
    let stats = h.rt.engine().handle_stats();
    assert_eq!(stats.acquired, stats.released);
}

#[test]
fn test_script_constructed_object_kept_while_held() {
    let h = Harness::new();
    h.store_source("res://counter.lua", COUNTER);
    h.exec("keep = require('counter').new(5)");
    h.collect();
    assert_eq!(h.rt.host().object_count(), 1);
    assert_eq!(h.eval("return keep:bump()"), HostValue::Int(6));
    assert_eq!(h.eval("return keep:get_reference_count()"), HostValue::Int(1));
    assert_eq!(h.eval("return keep == keep and tostring(keep):sub(1, 12)"), string("[RefCounted:"));

    h.exec("keep = nil");
    h.collect();
    h.collect();
    assert_eq!(h.rt.host().object_count(), 0);
    assert_eq!(h.rt.engine().instance_count(), 0);
}

#[test]
fn test_host_spawned_script_object_wrapped_with_count() {
    let h = Harness::new();
    h.compile("res://counter.lua", COUNTER);
    let object = h.spawn("res://counter.lua", &[HostValue::Int(2)]);
    let host = h.rt.host();
    let held = host.refcount(object).unwrap_or(0);

    h.set_global("c", object);
    assert_eq!(host.refcount(object), Some(held + 1));
    assert_eq!(h.eval("return c:bump()"), HostValue::Int(3));
    assert_eq!(h.call(object, "bump", &[]), HostValue::Int(4));

    h.exec("c = nil");
    h.collect();
    assert_eq!(host.refcount(object), Some(held));
    assert_eq!(h.rt.engine().instance_count(), 1);
}

// ============================================================================
// Manual Objects
// ============================================================================

#[test]
fn test_manual_wrapper_does_not_own() {
    let h = Harness::new();
    let host = h.rt.host();
    let node = host.create("Node").unwrap();
    h.set_global("n", node);
    assert_eq!(host.refcount(node), Some(0));
    h.exec("n = nil");
    h.collect();
    assert!(host.is_alive(node));
}

#[test]
fn test_destroyed_manual_object_degrades_to_nil() {
    let h = Harness::new();
    let host = h.rt.host();
    let node = host.create("Node").unwrap();
    h.set_global("n", node);
    host.destroy(node);

    assert_eq!(h.eval("return n:get_name()"), HostValue::Nil);
    assert_eq!(h.eval("return n.name"), HostValue::Nil);
    h.exec("n.name = 'ghost'");
    assert_eq!(h.eval("return tostring(n)"), string("[Object:null]"));
}

#[test]
fn test_free_from_guest() {
    let h = Harness::new();
    let values = h.exec("local n = Node.new() local id = n n:free() return id, n:get_name()");
    assert_eq!(values[0], HostValue::Nil);
    assert_eq!(values[1], HostValue::Nil);
    assert_eq!(h.rt.host().object_count(), 0);
}

#[test]
fn test_stale_handles_never_alias() {
    let h = Harness::new();
    let host = h.rt.host();
    for i in 0..1000 {
        let old = host.create("Node").unwrap();
        h.set_global("stale", old);
        host.destroy(old);

        let fresh = host.create("Node").unwrap();
        host.set_property(fresh, "name", &HostValue::from(format!("live-{}", i)));
        assert_eq!(old.index(), fresh.index());
        assert_eq!(h.eval("return stale.name"), HostValue::Nil);
        assert_eq!(h.eval("return stale == nil or stale:get_name()"), HostValue::Nil);
        host.destroy(fresh);
    }
}
