//! Script classes and instances
//!
//! - [`definition`]: immutable metadata of a published script
//! - [`path`]: registration keys and base-name resolution
//! - registrar: compile, execute, register nested classes, publish
//! - instance: host objects bound to script definitions

pub mod definition;
pub mod path;

pub(crate) mod instance;
pub(crate) mod registrar;

pub use definition::{MethodInfo, ScriptBase, ScriptDefinition, SignalInfo};
pub(crate) use instance::InstanceState;
