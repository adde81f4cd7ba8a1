//! Debug state shared between the interpreter hook and the debugger.
//!
//! The hook checks `attached` first, so a detached engine pays one atomic
//! load per hook event.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use rustc_hash::{FxHashMap, FxHashSet};

use super::{Breakpoint, DebugHandler, PauseReason, ResumeMode, StackFrame};

/// Stepping mode, set on resume and checked on every line event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StepMode {
    /// Only break at breakpoints
    None,
    /// Same or lower depth and line changed
    Over { target_depth: i64, start_line: u32 },
    /// Any depth and line changed
    Into { start_line: u32 },
    /// Depth below target
    Out { target_depth: i64 },
}

pub(crate) struct DebugState {
    /// Fast check: false means the hook does nothing for line events
    attached: AtomicBool,

    /// Set while the handler runs, so introspection does not re-enter the hook
    paused: AtomicBool,

    /// Breakpoints: source → set of lines
    breakpoints: RwLock<FxHashMap<String, FxHashSet<u32>>>,

    /// Breakpoint registry: bp_id → entry (for listing/removal)
    bp_registry: RwLock<FxHashMap<u32, Breakpoint>>,

    /// Next breakpoint ID counter
    next_bp_id: AtomicU32,

    step_mode: Mutex<StepMode>,

    /// Frame depth tracked from call/return events, relative to attach
    depth: AtomicI64,

    /// Stack captured at the last pause
    snapshot: Mutex<Vec<StackFrame>>,

    handler: RwLock<Option<Arc<dyn DebugHandler>>>,
}

impl Default for DebugState {
    fn default() -> Self {
        Self::new()
    }
}

impl DebugState {
    pub fn new() -> Self {
        Self {
            attached: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            breakpoints: RwLock::new(FxHashMap::default()),
            bp_registry: RwLock::new(FxHashMap::default()),
            next_bp_id: AtomicU32::new(1),
            step_mode: Mutex::new(StepMode::None),
            depth: AtomicI64::new(0),
            snapshot: Mutex::new(Vec::new()),
            handler: RwLock::new(None),
        }
    }

    // ========================================================================
    // Session
    // ========================================================================

    pub fn attach(&self, handler: Arc<dyn DebugHandler>, break_at_entry: bool) {
        *self.handler.write() = Some(handler);
        *self.step_mode.lock() = if break_at_entry {
            StepMode::Into { start_line: 0 }
        } else {
            StepMode::None
        };
        self.depth.store(0, Ordering::Release);
        self.attached.store(true, Ordering::Release);
    }

    pub fn detach(&self) {
        self.attached.store(false, Ordering::Release);
        *self.handler.write() = None;
        *self.step_mode.lock() = StepMode::None;
    }

    pub fn is_attached(&self) -> bool {
        self.attached.load(Ordering::Acquire)
    }

    pub fn handler(&self) -> Option<Arc<dyn DebugHandler>> {
        self.handler.read().clone()
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::Release);
    }

    // ========================================================================
    // Breakpoints
    // ========================================================================

    /// Add a breakpoint. Returns the breakpoint ID.
    pub fn add_breakpoint(&self, source: &str, line: u32) -> u32 {
        let bp_id = self.next_bp_id.fetch_add(1, Ordering::Relaxed);

        self.breakpoints
            .write()
            .entry(source.to_string())
            .or_default()
            .insert(line);

        self.bp_registry.write().insert(
            bp_id,
            Breakpoint {
                id: bp_id,
                source: source.to_string(),
                line,
                hit_count: 0,
            },
        );

        bp_id
    }

    /// Remove a breakpoint by ID.
    pub fn remove_breakpoint(&self, bp_id: u32) -> bool {
        let mut registry = self.bp_registry.write();
        let Some(entry) = registry.remove(&bp_id) else {
            return false;
        };
        // Another id may still cover the same line
        if registry
            .values()
            .any(|bp| bp.source == entry.source && bp.line == entry.line)
        {
            return true;
        }
        let mut bps = self.breakpoints.write();
        if let Some(lines) = bps.get_mut(&entry.source) {
            lines.remove(&entry.line);
            if lines.is_empty() {
                bps.remove(&entry.source);
            }
        }
        true
    }

    pub fn breakpoints(&self) -> Vec<Breakpoint> {
        let mut list: Vec<Breakpoint> = self.bp_registry.read().values().cloned().collect();
        list.sort_by_key(|bp| bp.id);
        list
    }

    fn hit(&self, source: &str, line: u32) -> Option<u32> {
        let mut registry = self.bp_registry.write();
        let entry = registry
            .values_mut()
            .filter(|bp| bp.source == source && bp.line == line)
            .min_by_key(|bp| bp.id)?;
        entry.hit_count += 1;
        Some(entry.id)
    }

    // ========================================================================
    // Stepping
    // ========================================================================

    /// Called by the hook on each line event.
    ///
    /// Returns `Some(reason)` if execution should pause, `None` to continue.
    pub fn should_break(&self, source: &str, line: u32) -> Option<PauseReason> {
        let has_bp = self
            .breakpoints
            .read()
            .get(source)
            .is_some_and(|lines| lines.contains(&line));
        if has_bp {
            if let Some(id) = self.hit(source, line) {
                return Some(PauseReason::Breakpoint(id));
            }
        }

        let depth = self.depth();
        let step = *self.step_mode.lock();
        let stepped = match step {
            StepMode::None => false,
            StepMode::Over {
                target_depth,
                start_line,
            } => depth <= target_depth && line != start_line,
            StepMode::Into { start_line } => line != start_line,
            StepMode::Out { target_depth } => depth < target_depth,
        };
        stepped.then_some(PauseReason::Step)
    }

    /// Set the step mode from the debugger's resume choice
    pub fn resume(&self, mode: ResumeMode, line: u32) {
        let depth = self.depth();
        *self.step_mode.lock() = match mode {
            ResumeMode::Continue => StepMode::None,
            ResumeMode::StepInto => StepMode::Into { start_line: line },
            ResumeMode::StepOver => StepMode::Over {
                target_depth: depth,
                start_line: line,
            },
            ResumeMode::StepOut => StepMode::Out {
                target_depth: depth,
            },
        };
    }

    pub(crate) fn step_mode(&self) -> StepMode {
        *self.step_mode.lock()
    }

    pub fn on_call(&self) {
        self.depth.fetch_add(1, Ordering::AcqRel);
    }

    pub fn on_return(&self) {
        self.depth.fetch_sub(1, Ordering::AcqRel);
    }

    pub fn depth(&self) -> i64 {
        self.depth.load(Ordering::Acquire)
    }

    // ========================================================================
    // Snapshot
    // ========================================================================

    pub fn set_snapshot(&self, frames: Vec<StackFrame>) {
        *self.snapshot.lock() = frames;
    }

    pub fn snapshot(&self) -> Vec<StackFrame> {
        self.snapshot.lock().clone()
    }
}
