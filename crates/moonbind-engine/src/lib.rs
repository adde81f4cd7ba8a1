//! Moonbind Engine
//!
//! Drives a reflected host object model from Lua scripts and lets scripts
//! extend host objects. This crate provides:
//! - Value marshalling between Lua values and [`HostValue`]s
//! - Object identity and lifetime bridging (ref-counted and manual objects)
//! - Lazily built class metatables mirroring the host class hierarchy
//! - Script compilation, registration and republishing
//! - Script instances bound to host objects
//! - Call dispatch under a protected, depth-restoring call wrapper
//! - Debug hooks with breakpoints, stepping and frame introspection
//!
//! [`HostValue`]: moonbind_sdk::HostValue

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod class;
pub mod debug;
pub mod engine;
pub mod error;
pub mod language;
pub mod options;
pub mod script;

mod context;
mod dispatch;
mod globals;
mod lifetime;
mod marshal;

pub use class::{ClassBinding, Resolution};
pub use debug::{
    remote_debugger, BreakContext, Breakpoint, DebugClient, DebugHandler, PauseEvent,
    PauseReason, RemoteDebugger, ResumeMode, StackFrame, Variable,
};
pub use engine::ScriptEngine;
pub use error::{
    CallError, CallErrorKind, CompileError, MarshalError, RuntimeError, ScriptError,
    ScriptResult,
};
pub use language::Validation;
pub use lifetime::HandleStats;
pub use options::EngineOptions;
pub use script::{MethodInfo, ScriptBase, ScriptDefinition, SignalInfo};

pub use moonbind_sdk::{
    HostError, HostReflection, HostResult, HostValue, Lifetime, ObjectId, ObjectInfo,
    ScriptBridge, SourceStore, ValueKind,
};

/// Re-export of the embedded interpreter crate
pub use mlua;
