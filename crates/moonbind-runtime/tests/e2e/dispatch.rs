//! Call dispatch, protected calls and error kinds

use moonbind_engine::{CallError, CallErrorKind, EngineOptions, HostValue};
use moonbind_runtime::ClassBuilder;
use moonbind_sdk::{FromHostValue, HostReflection};

use crate::harness::{float, int, string, Harness};

const MOVER: &str = r#"local Mover = class("Node2D")

function Mover:_init()
    self.greet = function() return "field" end
end

function Mover:greet()
    return "method"
end

function Mover:explode(reason)
    local detail = "because " .. reason
    error("boom " .. detail)
end

function Mover:sum(a, b)
    return a + b
end

function Mover:spin()
    while true do end
end

return Mover
"#;

fn mover() -> (Harness, moonbind_engine::ObjectId) {
    let h = Harness::new();
    h.compile("res://mover.lua", MOVER);
    let object = h.spawn("res://mover.lua", &[]);
    (h, object)
}

// ============================================================================
// Resolution Order
// ============================================================================

#[test]
fn test_instance_field_wins_over_class_method() {
    let (h, object) = mover();
    assert_eq!(h.call(object, "greet", &[]), string("field"));
}

#[test]
fn test_script_method_with_arguments() {
    let (h, object) = mover();
    assert_eq!(h.call(object, "sum", &[int(2), int(3)]), int(5));
    assert_eq!(h.call(object, "sum", &[float(0.5), int(1)]), float(1.5));
}

#[test]
fn test_falls_through_to_host_method() {
    let (h, object) = mover();
    assert_eq!(h.call(object, "translate", &[float(1.0), float(2.0)]), HostValue::Nil);
    assert_eq!(h.rt.host().get_property(object, "y"), Some(float(2.0)));
}

#[test]
fn test_host_call_tries_script_first() {
    let (h, object) = mover();
    assert_eq!(h.rt.host().call(object, "sum", &[int(1), int(1)]), Ok(int(2)));
    assert_eq!(h.rt.host().call(object, "get_class", &[]), Ok(string("Node2D")));
}

// ============================================================================
// Error Kinds
// ============================================================================

#[test]
fn test_invalid_method() {
    let (h, object) = mover();
    let err = h.rt.engine().call(object, "fly", &[]).unwrap_err();
    assert_eq!(err.kind(), CallErrorKind::InvalidMethod);
    assert_eq!(err, CallError::InvalidMethod("fly".to_string()));
}

#[test]
fn test_host_rejects_arguments() {
    let (h, object) = mover();
    let err = h
        .rt
        .engine()
        .call(object, "translate", &[string("left")])
        .unwrap_err();
    assert_eq!(err.kind(), CallErrorKind::InvalidArgument);
}

#[test]
fn test_freed_object_is_null() {
    let (h, object) = mover();
    h.rt.host().destroy(object);
    let err = h.rt.engine().call(object, "sum", &[int(1), int(2)]).unwrap_err();
    assert_eq!(err.kind(), CallErrorKind::InstanceIsNull);
}

#[test]
fn test_runtime_error_carries_traceback() {
    let (h, object) = mover();
    let err = h
        .rt
        .engine()
        .call(object, "explode", &[string("tests")])
        .unwrap_err();
    assert_eq!(err.kind(), CallErrorKind::InvalidArgument);
    let CallError::Runtime(runtime) = err else {
        panic!("expected a runtime error, got {:?}", err);
    };
    assert!(runtime.message.contains("boom because tests"));
    let top = runtime.traceback.first().expect("traceback has frames");
    assert_eq!(top.source, "res://mover.lua");
    assert_eq!(top.line, 13);
    assert!(runtime.format_traceback().starts_with("stack traceback:\n\tres://mover.lua:13:"));
}

#[test]
fn test_stack_restored_after_error() {
    let (h, object) = mover();
    let engine = h.rt.engine();
    let depth = engine.stack_depth();
    for _ in 0..20 {
        assert!(engine.call(object, "explode", &[string("again")]).is_err());
        assert_eq!(engine.stack_depth(), depth);
        assert_eq!(engine.call_depth(), 0);
    }
    assert_eq!(h.call(object, "sum", &[int(1), int(1)]), int(2));
}

#[test]
fn test_argument_conversion_failure() {
    let (h, object) = mover();
    let err = h
        .rt
        .engine()
        .call(object, "sum", &[int(1), HostValue::Nil])
        .unwrap_err();
    assert_eq!(err.kind(), CallErrorKind::InvalidArgument);
}

// ============================================================================
// Class-level Calls
// ============================================================================

#[test]
fn test_call_script() {
    let h = Harness::new();
    h.compile(
        "res://util.lua",
        "local U = class()\nU.factor = 3\nfunction U:scale(x) return x * self.factor end\nreturn U",
    );
    let engine = h.rt.engine();
    assert_eq!(engine.call_script("res://util.lua", "scale", &[int(4)]), Ok(int(12)));
    assert_eq!(
        engine.call_script("res://util.lua", "missing", &[]).unwrap_err().kind(),
        CallErrorKind::InvalidMethod
    );
    assert_eq!(
        engine.call_script("res://nothing.lua", "scale", &[]).unwrap_err().kind(),
        CallErrorKind::InstanceIsNull
    );
}

// ============================================================================
// Re-entry
// ============================================================================

#[test]
fn test_guest_host_guest_reentry() {
    let h = Harness::new();
    h.rt.host()
        .register_class(ClassBuilder::new("Relay").parent("Node").method(
            "relay",
            |host, id, args| {
                let depth = i64::from_host_arg(args, 0)?;
                host.call(id, "on_relay", &[HostValue::Int(depth + 1)])
            },
        ))
        .unwrap();
    h.compile(
        "res://relay.lua",
        r#"local R = class("Relay")
function R:start()
    return self:relay(0)
end
function R:on_relay(depth)
    if depth < 5 then
        return self:relay(depth)
    end
    return depth
end
return R
"#,
    );
    let object = h.spawn("res://relay.lua", &[]);
    assert_eq!(h.call(object, "start", &[]), int(5));
    assert_eq!(h.rt.engine().call_depth(), 0);
}

#[test]
fn test_reentry_from_other_thread_waits() {
    let (h, object) = mover();
    let engine = h.rt.engine();
    std::thread::scope(|scope| {
        let workers: Vec<_> = (0..4)
            .map(|i| scope.spawn(move || engine.call(object, "sum", &[int(i), int(i)])))
            .collect();
        for (i, worker) in workers.into_iter().enumerate() {
            assert_eq!(worker.join().unwrap(), Ok(int(2 * i as i64)));
        }
    });
}

// ============================================================================
// Watchdog
// ============================================================================

#[test]
fn test_watchdog_aborts_runaway_call() {
    let h = Harness::with_options(EngineOptions {
        instruction_limit: Some(100_000),
        ..EngineOptions::default()
    });
    h.compile("res://mover.lua", MOVER);
    let object = h.spawn("res://mover.lua", &[]);

    let err = h.rt.engine().call(object, "spin", &[]).unwrap_err();
    let CallError::Runtime(runtime) = err else {
        panic!("expected a runtime error, got {:?}", err);
    };
    assert!(runtime.message.contains("instruction limit"));
    assert_eq!(h.call(object, "sum", &[int(2), int(2)]), int(4));
}

#[test]
fn test_watchdog_off_by_default() {
    let h = Harness::new();
    assert_eq!(h.rt.engine().options().instruction_limit, None);
    h.compile(
        "res://busy.lua",
        "local B = class()\nfunction B:work() local n = 0 for i = 1, 200000 do n = n + i end return n end\nreturn B",
    );
    assert_eq!(
        h.rt.engine().call_script("res://busy.lua", "work", &[]),
        Ok(int(20000100000))
    );
}
