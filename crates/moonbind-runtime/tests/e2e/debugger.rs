//! Breakpoints, stepping and frame introspection

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use moonbind_engine::{
    remote_debugger, BreakContext, DebugHandler, HostValue, PauseReason, ResumeMode, Variable,
};
use parking_lot::Mutex;

use crate::harness::{int, string, Harness};

const CALC: &str = r#"local Calc = class()

function Calc:compute(a)
    local doubled = a * 2
    self.total = self.total + doubled
    return self.total
end

function Calc:_init()
    self.total = 0
end

function Calc:explode()
    local detail = "bad input"
    error("boom: " .. detail)
end

return Calc
"#;

const STEPS: &str = r#"local Steps = class()
function Steps:run()
    local a = 1
    local b = a + 1
    return a + b
end
return Steps
"#;

/// A pause as recorded by [`recorder`]
#[derive(Debug, Clone, PartialEq)]
struct Pause {
    reason: PauseReason,
    source: String,
    line: u32,
    locals: Vec<Variable>,
}

fn handler<F>(f: F) -> Arc<dyn DebugHandler>
where
    F: Fn(&mut BreakContext<'_>) -> ResumeMode + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Handler that records every pause and answers with `modes` in order,
/// then [`ResumeMode::Continue`]
fn recorder(modes: Vec<ResumeMode>) -> (Arc<dyn DebugHandler>, Arc<Mutex<Vec<Pause>>>) {
    let pauses = Arc::new(Mutex::new(Vec::new()));
    let log = pauses.clone();
    let handler = handler(move |context| {
        let (source, line) = context
            .frames()
            .first()
            .map(|frame| (frame.source.clone(), frame.line))
            .unwrap_or_default();
        let locals = context.locals(0);
        let mut log = log.lock();
        log.push(Pause {
            reason: context.reason().clone(),
            source,
            line,
            locals,
        });
        modes.get(log.len() - 1).copied().unwrap_or_default()
    });
    (handler, pauses)
}

fn names(vars: &[Variable]) -> Vec<&str> {
    vars.iter().map(|var| var.name.as_str()).collect()
}

// ============================================================================
// Breakpoints
// ============================================================================

#[test]
fn test_breakpoint_with_remote_client() {
    let h = Harness::new();
    h.compile("res://calc.lua", CALC);
    let object = h.spawn("res://calc.lua", &[]);

    let (remote, client) = remote_debugger();
    let engine = h.rt.engine();
    engine.attach_debugger(Arc::new(remote), false);
    let bp = engine.add_breakpoint("res://calc.lua", 5);

    let inspector = thread::spawn(move || {
        let event = client
            .wait_for_pause_timeout(Duration::from_secs(10))
            .expect("interpreter should pause");
        let locals = client.locals(0);
        let members = client.members(0);
        let instance = client.instance(0);
        client.resume(ResumeMode::Continue);
        (event, locals, members, instance)
    });

    assert_eq!(h.call(object, "compute", &[int(3)]), int(6));
    let (event, locals, members, instance) = inspector.join().unwrap();

    assert_eq!(event.reason, PauseReason::Breakpoint(bp));
    assert_eq!(event.frames[0].source, "res://calc.lua");
    assert_eq!(event.frames[0].line, 5);
    assert_eq!(
        locals,
        vec![
            Variable {
                name: "a".to_string(),
                value: int(3)
            },
            Variable {
                name: "doubled".to_string(),
                value: int(6)
            },
        ]
    );
    assert_eq!(names(&members), vec!["total"]);
    assert_eq!(members[0].value, int(0));
    assert_eq!(instance, Some(object));

    assert_eq!(engine.breakpoints()[0].hit_count, 1);
    let snapshot = engine.last_stack_snapshot();
    assert_eq!(snapshot[0].line, 5);
    assert_eq!(snapshot[0].source, "res://calc.lua");
}

#[test]
fn test_breakpoint_hits_every_pass() {
    let h = Harness::new();
    h.compile("res://calc.lua", CALC);
    let object = h.spawn("res://calc.lua", &[]);
    let (handler, pauses) = recorder(Vec::new());
    let engine = h.rt.engine();
    engine.attach_debugger(handler, false);
    engine.add_breakpoint("res://calc.lua", 5);

    h.call(object, "compute", &[int(1)]);
    h.call(object, "compute", &[int(2)]);
    assert_eq!(h.call(object, "compute", &[int(3)]), int(12));

    let pauses = pauses.lock();
    assert_eq!(pauses.len(), 3);
    assert!(pauses.iter().all(|pause| pause.line == 5));
    assert_eq!(engine.breakpoints()[0].hit_count, 3);
}

#[test]
fn test_remove_breakpoint_and_detach() {
    let h = Harness::new();
    h.compile("res://calc.lua", CALC);
    let object = h.spawn("res://calc.lua", &[]);
    let (handler, pauses) = recorder(Vec::new());
    let engine = h.rt.engine();
    engine.attach_debugger(handler, false);

    let bp = engine.add_breakpoint("res://calc.lua", 5);
    h.call(object, "compute", &[int(1)]);
    assert_eq!(pauses.lock().len(), 1);

    assert!(engine.remove_breakpoint(bp));
    assert!(!engine.remove_breakpoint(bp));
    assert!(engine.breakpoints().is_empty());
    h.call(object, "compute", &[int(1)]);
    assert_eq!(pauses.lock().len(), 1);

    engine.add_breakpoint("res://calc.lua", 5);
    engine.detach_debugger();
    h.call(object, "compute", &[int(1)]);
    assert_eq!(pauses.lock().len(), 1);
}

// ============================================================================
// Errors
// ============================================================================

#[test]
fn test_pause_on_error_before_unwind() {
    let h = Harness::new();
    h.compile("res://calc.lua", CALC);
    let object = h.spawn("res://calc.lua", &[]);
    let (handler, pauses) = recorder(Vec::new());
    h.rt.engine().attach_debugger(handler, false);

    assert!(h.rt.engine().call(object, "explode", &[]).is_err());

    let pauses = pauses.lock();
    assert_eq!(pauses.len(), 1);
    let PauseReason::Error(message) = &pauses[0].reason else {
        panic!("expected an error pause, got {:?}", pauses[0].reason);
    };
    assert!(message.contains("boom: bad input"));
    assert_eq!(pauses[0].line, 15);
    assert_eq!(
        pauses[0].locals,
        vec![Variable {
            name: "detail".to_string(),
            value: string("bad input")
        }]
    );
}

#[test]
fn test_errors_do_not_pause_when_detached() {
    let h = Harness::new();
    h.compile("res://calc.lua", CALC);
    let object = h.spawn("res://calc.lua", &[]);
    let (handler, pauses) = recorder(Vec::new());
    h.rt.engine().attach_debugger(handler, false);
    h.rt.engine().detach_debugger();

    assert!(h.rt.engine().call(object, "explode", &[]).is_err());
    assert!(pauses.lock().is_empty());
}

// ============================================================================
// Stepping
// ============================================================================

#[test]
fn test_step_over() {
    let h = Harness::new();
    h.compile("res://steps.lua", STEPS);
    let object = h.spawn("res://steps.lua", &[]);
    let (handler, pauses) = recorder(vec![ResumeMode::StepOver]);
    let engine = h.rt.engine();
    engine.attach_debugger(handler, false);
    let bp = engine.add_breakpoint("res://steps.lua", 3);

    assert_eq!(h.call(object, "run", &[]), int(3));

    let pauses = pauses.lock();
    let stops: Vec<(PauseReason, u32)> = pauses
        .iter()
        .map(|pause| (pause.reason.clone(), pause.line))
        .collect();
    assert_eq!(
        stops,
        vec![(PauseReason::Breakpoint(bp), 3), (PauseReason::Step, 4)]
    );
    assert_eq!(names(&pauses[1].locals), vec!["a"]);
}

#[test]
fn test_break_at_entry() {
    let h = Harness::new();
    h.compile("res://steps.lua", STEPS);
    let object = h.spawn("res://steps.lua", &[]);
    let (handler, pauses) = recorder(Vec::new());
    h.rt.engine().attach_debugger(handler, true);

    h.call(object, "run", &[]);

    let pauses = pauses.lock();
    assert_eq!(pauses.len(), 1);
    assert_eq!(pauses[0].reason, PauseReason::Step);
}

#[test]
fn test_inspection_does_not_disturb_results() {
    let h = Harness::new();
    h.compile("res://calc.lua", CALC);
    let object = h.spawn("res://calc.lua", &[]);
    let engine = h.rt.engine();
    let seen = Arc::new(Mutex::new(None));
    let slot = seen.clone();
    engine.attach_debugger(
        handler(move |context| {
            *slot.lock() = Some((context.members(0), context.instance(0)));
            ResumeMode::Continue
        }),
        false,
    );
    engine.add_breakpoint("res://calc.lua", 6);

    assert_eq!(h.call(object, "compute", &[int(4)]), int(8));
    let (members, instance) = seen.lock().clone().expect("breakpoint should hit");
    assert_eq!(
        members,
        vec![Variable {
            name: "total".to_string(),
            value: HostValue::Int(8)
        }]
    );
    assert_eq!(instance, Some(object));
    assert_eq!(engine.call_depth(), 0);
}
