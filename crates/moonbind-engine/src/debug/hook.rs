//! Interpreter hook
//!
//! One hook serves both the debugger (line/call/return events) and the
//! instruction watchdog (count events). It is installed only while one of
//! them needs it.

use std::sync::Arc;

use mlua::{Debug, DebugEvent, HookTriggers, Lua, VmState};
use tracing::info;

use super::introspect::{capture_stack, chunk_source};
use super::{BreakContext, PauseReason};
use crate::context::BridgeContext;

/// Install or remove the hook to match the debugger and watchdog state
pub(crate) fn refresh(lua: &Lua, ctx: &Arc<BridgeContext>) {
    let attached = ctx.debug.is_attached();
    let watchdog = ctx.watchdog.is_enabled();
    if !attached && !watchdog {
        lua.remove_hook();
        return;
    }

    let mut triggers = HookTriggers::new();
    if watchdog {
        triggers = triggers.every_nth_instruction(ctx.options.watchdog_interval.max(1));
    }
    if attached {
        triggers = triggers.on_calls().on_returns().every_line();
    }
    let ctx = Arc::clone(ctx);
    lua.set_hook(triggers, move |lua, debug| on_event(lua, &ctx, debug));
}

fn on_event(lua: &Lua, ctx: &Arc<BridgeContext>, debug: Debug<'_>) -> mlua::Result<VmState> {
    if ctx.debug.is_paused() {
        return Ok(VmState::Continue);
    }
    match debug.event() {
        DebugEvent::Count => {
            if ctx.call_depth() > 0 {
                ctx.watchdog
                    .tick(ctx.options.watchdog_interval)
                    .map_err(|err| mlua::Error::RuntimeError(err.message))?;
            }
        }
        DebugEvent::Call if ctx.debug.is_attached() => ctx.debug.on_call(),
        DebugEvent::Ret if ctx.debug.is_attached() => ctx.debug.on_return(),
        DebugEvent::Line if ctx.debug.is_attached() => {
            let line = debug.curr_line();
            if line <= 0 {
                return Ok(VmState::Continue);
            }
            let source = match debug.source().source {
                Some(name) => chunk_source(&name),
                None => return Ok(VmState::Continue),
            };
            drop(debug);
            if let Some(reason) = ctx.debug.should_break(&source, line as u32) {
                pause(lua, ctx, reason);
            }
        }
        _ => {}
    }
    Ok(VmState::Continue)
}

/// Capture the stack and hand control to the attached handler until it
/// resumes. No-op when no handler is attached.
pub(crate) fn pause(lua: &Lua, ctx: &Arc<BridgeContext>, reason: PauseReason) {
    let Some(handler) = ctx.debug.handler() else {
        return;
    };
    let frames = capture_stack(lua);
    ctx.debug.set_snapshot(frames.clone());
    let line = frames.first().map(|frame| frame.line).unwrap_or(0);
    info!(?reason, frame = ?frames.first(), "execution paused");

    ctx.debug.set_paused(true);
    let mut context = BreakContext::new(lua, ctx, reason, frames);
    let mode = handler.on_break(&mut context);
    ctx.debug.set_paused(false);

    ctx.debug.resume(mode, line);
    info!(?mode, "execution resumed");
}
