//! Debug and introspection hooks
//!
//! While a debugger is attached, a single interpreter hook receives line,
//! call and return events. A line matching a breakpoint, or a completed
//! step, captures the call stack and invokes the attached
//! [`DebugHandler`] synchronously on the interpreter thread; execution
//! continues when the handler returns a [`ResumeMode`].
//!
//! Runtime errors raised while attached stop with [`PauseReason::Error`]
//! before the stack unwinds, so locals at the raise point are still
//! readable.
//!
//! For a debugger living on another thread, [`remote_debugger`] returns a
//! handler/client pair connected by channels.

mod hook;
mod introspect;
mod remote;
mod state;

use std::fmt;
use std::sync::Arc;

use mlua::Lua;
use moonbind_sdk::{HostValue, ObjectId};

use crate::context::BridgeContext;

pub(crate) use hook::{pause, refresh};
pub(crate) use introspect::{capture_stack, stack_depth};
pub use remote::{remote_debugger, DebugClient, PauseEvent, RemoteDebugger};
pub(crate) use state::DebugState;

/// One guest frame of a call-stack snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackFrame {
    /// Registration key of the script (or chunk name)
    pub source: String,
    /// Current line, 0 if unknown
    pub line: u32,
    /// Function name, `?` when the interpreter can't name it
    pub function: String,
}

impl fmt::Display for StackFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}: in function '{}'",
            self.source, self.line, self.function
        )
    }
}

/// Why execution paused
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PauseReason {
    /// Hit a breakpoint (with its ID)
    Breakpoint(u32),
    /// Step completed
    Step,
    /// A runtime error is about to unwind
    Error(String),
}

/// How to continue after a pause
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResumeMode {
    /// Run until the next breakpoint
    #[default]
    Continue,
    /// Stop at the next line, entering calls
    StepInto,
    /// Stop at the next line in this frame or a caller
    StepOver,
    /// Stop once this frame returns
    StepOut,
}

/// A named value read from a frame or an instance
#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    /// Local or field name
    pub name: String,
    /// Converted value; objects keep their host identity
    pub value: HostValue,
}

/// Registered breakpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Breakpoint {
    /// Breakpoint ID
    pub id: u32,
    /// Script key
    pub source: String,
    /// 1-based line
    pub line: u32,
    /// Times this breakpoint stopped execution
    pub hit_count: u32,
}

/// Receives pauses on the interpreter thread.
///
/// The interpreter is blocked for as long as `on_break` runs; the
/// [`BreakContext`] is only valid during the call.
pub trait DebugHandler: Send + Sync {
    /// Inspect the paused interpreter and choose how to resume
    fn on_break(&self, context: &mut BreakContext<'_>) -> ResumeMode;
}

impl<F> DebugHandler for F
where
    F: Fn(&mut BreakContext<'_>) -> ResumeMode + Send + Sync,
{
    fn on_break(&self, context: &mut BreakContext<'_>) -> ResumeMode {
        self(context)
    }
}

/// View of a paused interpreter.
///
/// Frame levels index [`frames`](Self::frames): level 0 is the innermost
/// guest frame.
pub struct BreakContext<'a> {
    lua: &'a Lua,
    ctx: &'a Arc<BridgeContext>,
    reason: PauseReason,
    frames: Vec<StackFrame>,
}

impl<'a> BreakContext<'a> {
    pub(crate) fn new(
        lua: &'a Lua,
        ctx: &'a Arc<BridgeContext>,
        reason: PauseReason,
        frames: Vec<StackFrame>,
    ) -> Self {
        Self {
            lua,
            ctx,
            reason,
            frames,
        }
    }

    /// Why execution paused
    pub fn reason(&self) -> &PauseReason {
        &self.reason
    }

    /// Captured call stack, innermost first
    pub fn frames(&self) -> &[StackFrame] {
        &self.frames
    }

    /// Locals of the frame at `level`, without compiler temporaries and
    /// without a leading `self` that is a script instance
    pub fn locals(&mut self, level: usize) -> Vec<Variable> {
        introspect::locals(self.lua, self.ctx, level)
    }

    /// Fields of the script instance running at `level`
    pub fn members(&mut self, level: usize) -> Vec<Variable> {
        introspect::members(self.lua, self.ctx, level)
    }

    /// Object whose script instance is running at `level`
    pub fn instance(&mut self, level: usize) -> Option<ObjectId> {
        introspect::instance_at(self.lua, self.ctx, level)
    }
}
