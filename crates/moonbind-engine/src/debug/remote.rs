//! Cross-thread debugger
//!
//! [`RemoteDebugger`] is a [`DebugHandler`] that forwards each pause to a
//! [`DebugClient`] over channels and serves the client's inspection
//! requests until it resumes. The interpreter thread stays blocked inside
//! the hook for the whole exchange, which is what keeps the paused frames
//! valid.

use std::time::Duration;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use moonbind_sdk::ObjectId;

use super::{BreakContext, DebugHandler, PauseReason, ResumeMode, StackFrame, Variable};

/// A pause as seen by the client
#[derive(Debug, Clone, PartialEq)]
pub struct PauseEvent {
    /// Why execution paused
    pub reason: PauseReason,
    /// Captured call stack, innermost first
    pub frames: Vec<StackFrame>,
}

enum Request {
    Locals(usize),
    Members(usize),
    Instance(usize),
    Resume(ResumeMode),
}

enum Reply {
    Variables(Vec<Variable>),
    Instance(Option<ObjectId>),
}

/// Handler half, attached to the engine
pub struct RemoteDebugger {
    events: Sender<PauseEvent>,
    requests: Receiver<Request>,
    replies: Sender<Reply>,
}

/// Client half, driven from the debugger thread
pub struct DebugClient {
    events: Receiver<PauseEvent>,
    requests: Sender<Request>,
    replies: Receiver<Reply>,
}

/// Create a connected handler/client pair
pub fn remote_debugger() -> (RemoteDebugger, DebugClient) {
    let (event_tx, event_rx) = channel::unbounded();
    let (request_tx, request_rx) = channel::unbounded();
    let (reply_tx, reply_rx) = channel::unbounded();
    (
        RemoteDebugger {
            events: event_tx,
            requests: request_rx,
            replies: reply_tx,
        },
        DebugClient {
            events: event_rx,
            requests: request_tx,
            replies: reply_rx,
        },
    )
}

impl DebugHandler for RemoteDebugger {
    fn on_break(&self, context: &mut BreakContext<'_>) -> ResumeMode {
        let event = PauseEvent {
            reason: context.reason().clone(),
            frames: context.frames().to_vec(),
        };
        // A dropped client resumes execution
        if self.events.send(event).is_err() {
            return ResumeMode::Continue;
        }
        loop {
            let reply = match self.requests.recv() {
                Ok(Request::Locals(level)) => Reply::Variables(context.locals(level)),
                Ok(Request::Members(level)) => Reply::Variables(context.members(level)),
                Ok(Request::Instance(level)) => Reply::Instance(context.instance(level)),
                Ok(Request::Resume(mode)) => return mode,
                Err(_) => return ResumeMode::Continue,
            };
            if self.replies.send(reply).is_err() {
                return ResumeMode::Continue;
            }
        }
    }
}

impl DebugClient {
    /// Block until the interpreter pauses. `None` once the handler is gone.
    pub fn wait_for_pause(&self) -> Option<PauseEvent> {
        self.events.recv().ok()
    }

    /// Like [`wait_for_pause`](Self::wait_for_pause) with a timeout
    pub fn wait_for_pause_timeout(&self, timeout: Duration) -> Option<PauseEvent> {
        match self.events.recv_timeout(timeout) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Locals of a paused frame
    pub fn locals(&self, level: usize) -> Vec<Variable> {
        match self.request(Request::Locals(level)) {
            Some(Reply::Variables(vars)) => vars,
            _ => Vec::new(),
        }
    }

    /// Instance fields of a paused frame
    pub fn members(&self, level: usize) -> Vec<Variable> {
        match self.request(Request::Members(level)) {
            Some(Reply::Variables(vars)) => vars,
            _ => Vec::new(),
        }
    }

    /// Object whose script instance runs at a paused frame
    pub fn instance(&self, level: usize) -> Option<ObjectId> {
        match self.request(Request::Instance(level)) {
            Some(Reply::Instance(id)) => id,
            _ => None,
        }
    }

    /// Resume the interpreter
    pub fn resume(&self, mode: ResumeMode) {
        let _ = self.requests.send(Request::Resume(mode));
    }

    fn request(&self, request: Request) -> Option<Reply> {
        self.requests.send(request).ok()?;
        self.replies.recv().ok()
    }
}
