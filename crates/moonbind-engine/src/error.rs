//! Error types for the engine
//!
//! One enum per boundary:
//! - [`ScriptError`] for registration and instance lifecycle
//! - [`CallError`] for the call dispatcher (typed, never unwinding)
//! - [`MarshalError`] for value conversion
//!
//! Compile and runtime failures carry structured payloads
//! ([`CompileError`], [`RuntimeError`]) so editors and debuggers can point
//! at a line or walk a traceback.

use std::fmt::Write as _;

use moonbind_sdk::{HostError, ValueKind};

use crate::debug::StackFrame;

/// Result type for script registration and lifecycle operations
pub type ScriptResult<T> = Result<T, ScriptError>;

/// A source failed to compile. The previous registration is kept.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{path}:{line}:{column}: {message}")]
pub struct CompileError {
    /// Registration path of the script
    pub path: String,
    /// 1-based line, 0 if unknown
    pub line: u32,
    /// 1-based column (the interpreter reports lines only, so this is 1)
    pub column: u32,
    /// Interpreter message without the location prefix
    pub message: String,
}

/// A guest error raised during a protected call
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{message}")]
pub struct RuntimeError {
    /// Error message
    pub message: String,
    /// Guest frames at the raise point, innermost first
    pub traceback: Vec<StackFrame>,
}

impl RuntimeError {
    /// Create an error without a traceback
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            traceback: Vec::new(),
        }
    }

    /// Render the traceback the way the interpreter prints one
    pub fn format_traceback(&self) -> String {
        let mut out = String::from("stack traceback:");
        for frame in &self.traceback {
            let _ = write!(out, "\n\t{}", frame);
        }
        out
    }

    pub(crate) fn from_lua(err: &mlua::Error) -> Self {
        Self::new(describe_lua_error(err))
    }
}

/// Value conversion failure
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MarshalError {
    /// A table contains itself along some path
    #[error("cycle detected while converting table to host value")]
    Cycle,

    /// Converted value doesn't match the requested kind
    #[error("Type mismatch: expected {expected}, got {got}")]
    TypeMismatch {
        /// Requested kind
        expected: ValueKind,
        /// Converted kind
        got: ValueKind,
    },

    /// The interpreter failed while reading the value
    #[error("{0}")]
    Guest(String),
}

impl From<mlua::Error> for MarshalError {
    fn from(err: mlua::Error) -> Self {
        MarshalError::Guest(describe_lua_error(&err))
    }
}

/// Kind of a [`CallError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallErrorKind {
    /// Nothing callable under that name
    InvalidMethod,
    /// Arguments rejected, or the callee raised
    InvalidArgument,
    /// Target object is gone or has no instance
    InstanceIsNull,
}

/// Typed call failure, distinct from a successful nil result
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CallError {
    /// Nothing callable under that name
    #[error("Invalid method '{0}'")]
    InvalidMethod(String),

    /// Arguments rejected by the host or failed to convert
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Target object is gone
    #[error("Instance is null")]
    InstanceIsNull,

    /// The callee raised a guest error
    #[error("Runtime error: {0}")]
    Runtime(#[from] RuntimeError),
}

impl CallError {
    /// Kind of this error. Guest errors report as [`CallErrorKind::InvalidArgument`].
    pub fn kind(&self) -> CallErrorKind {
        match self {
            CallError::InvalidMethod(_) => CallErrorKind::InvalidMethod,
            CallError::InvalidArgument(_) | CallError::Runtime(_) => {
                CallErrorKind::InvalidArgument
            }
            CallError::InstanceIsNull => CallErrorKind::InstanceIsNull,
        }
    }
}

impl From<MarshalError> for CallError {
    fn from(err: MarshalError) -> Self {
        CallError::Runtime(RuntimeError::new(err.to_string()))
    }
}

impl From<mlua::Error> for CallError {
    fn from(err: mlua::Error) -> Self {
        CallError::Runtime(RuntimeError::from_lua(&err))
    }
}

/// Registration and lifecycle errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum ScriptError {
    /// Source failed to compile
    #[error("Compile error: {0}")]
    Compile(#[from] CompileError),

    /// Guest code raised while running the chunk or `_init`
    #[error("Runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    /// The chunk returned something other than a table
    #[error("{path}: table expected, got {got}")]
    NotAClass {
        /// Script path
        path: String,
        /// Guest type name of the returned value
        got: String,
    },

    /// The base chain loops back to a script being compiled
    #[error("Cyclic base: '{0}' is already being compiled")]
    CyclicBase(String),

    /// Declared base is neither a host class nor a loadable script
    #[error("Base '{base}' of '{path}' not found")]
    BaseNotFound {
        /// Script path
        path: String,
        /// Declared base
        base: String,
    },

    /// No script is registered at the path
    #[error("Script not found: {0}")]
    NotFound(String),

    /// Host class name is not registered
    #[error("Unknown host class: {0}")]
    UnknownClass(String),

    /// Scripting is disabled and the script is not a tool script
    #[error("Scripting is disabled: '{0}' is not a tool script")]
    ScriptingDisabled(String),

    /// Object's class does not derive from the script's host base
    #[error("Script '{path}' requires an object deriving from '{base}', got '{class}'")]
    IncompatibleBase {
        /// Script path
        path: String,
        /// Host base required by the script
        base: String,
        /// Object's class
        class: String,
    },

    /// The target object is gone
    #[error("Object is null")]
    ObjectFreed,

    /// Value conversion failed
    #[error("Marshal error: {0}")]
    Marshal(#[from] MarshalError),

    /// Host collaborator failed
    #[error("Host error: {0}")]
    Host(#[from] HostError),

    /// Interpreter failure outside a protected call
    #[error("Lua error: {0}")]
    Lua(#[from] mlua::Error),
}

/// Human-readable message for an interpreter error, unwrapping callback
/// layers and dropping the `runtime error: ` prefix.
pub(crate) fn describe_lua_error(err: &mlua::Error) -> String {
    match err {
        mlua::Error::RuntimeError(message) => message.clone(),
        mlua::Error::SyntaxError { message, .. } => message.clone(),
        mlua::Error::CallbackError { cause, .. } => describe_lua_error(cause),
        mlua::Error::ExternalError(inner) => inner.to_string(),
        other => other.to_string(),
    }
}
