//! Published script metadata

use std::collections::BTreeMap;

use moonbind_sdk::{HostValue, ObjectId};
use parking_lot::Mutex;
use rustc_hash::FxHashSet;

/// Declared base of a script class
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptBase {
    /// A host class name
    Host(String),
    /// Another script, by registration key
    Script(String),
}

/// A function declared on a script class
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodInfo {
    /// Function name
    pub name: String,
    /// Line the function is defined on, 0 if unknown
    pub line: u32,
}

/// A signal declared with `signal(cls, name, ...)`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalInfo {
    /// Signal name
    pub name: String,
    /// Argument names
    pub args: Vec<String>,
}

/// A compiled and published script class.
///
/// Definitions are immutable snapshots: republishing a path creates a new
/// definition and leaves the old one (and the instances bound to it)
/// untouched. Only the live-instance set changes after publication.
#[derive(Debug)]
pub struct ScriptDefinition {
    pub(crate) path: String,
    pub(crate) source: Option<String>,
    pub(crate) version: u64,
    pub(crate) base: ScriptBase,
    pub(crate) host_base: String,
    pub(crate) tool: bool,
    pub(crate) global_name: Option<String>,
    pub(crate) icon: Option<String>,
    pub(crate) nested: Vec<String>,
    pub(crate) methods: Vec<MethodInfo>,
    pub(crate) signals: Vec<SignalInfo>,
    pub(crate) defaults: BTreeMap<String, HostValue>,
    pub(crate) instances: Mutex<FxHashSet<ObjectId>>,
}

impl ScriptDefinition {
    /// Registration key
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Source text, `None` for nested classes and precompiled chunks
    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    /// Publication counter; later publications have larger versions
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Declared base
    pub fn base(&self) -> &ScriptBase {
        &self.base
    }

    /// Base script key, if the base is a script
    pub fn base_script(&self) -> Option<&str> {
        match &self.base {
            ScriptBase::Script(path) => Some(path),
            ScriptBase::Host(_) => None,
        }
    }

    /// Host class the script ultimately extends
    pub fn host_base(&self) -> &str {
        &self.host_base
    }

    /// Whether the script runs while scripting is disabled
    pub fn is_tool(&self) -> bool {
        self.tool
    }

    /// Global class name from `global_class`
    pub fn global_name(&self) -> Option<&str> {
        self.global_name.as_deref()
    }

    /// Icon path from `global_class`
    pub fn icon(&self) -> Option<&str> {
        self.icon.as_deref()
    }

    /// Keys of classes nested directly in this one
    pub fn nested(&self) -> &[String] {
        &self.nested
    }

    /// Functions declared directly on this class, sorted by name
    pub fn methods(&self) -> &[MethodInfo] {
        &self.methods
    }

    /// Signals declared directly on this class
    pub fn signals(&self) -> &[SignalInfo] {
        &self.signals
    }

    /// Default values of fields declared directly on this class
    pub fn defaults(&self) -> &BTreeMap<String, HostValue> {
        &self.defaults
    }

    /// Declared function by name, not searching bases
    pub fn method(&self, name: &str) -> Option<&MethodInfo> {
        self.methods.iter().find(|m| m.name == name)
    }

    /// Declared signal by name, not searching bases
    pub fn signal(&self, name: &str) -> Option<&SignalInfo> {
        self.signals.iter().find(|s| s.name == name)
    }

    /// Objects currently bound to this definition
    pub fn instances(&self) -> Vec<ObjectId> {
        let mut ids: Vec<ObjectId> = self.instances.lock().iter().copied().collect();
        ids.sort_by_key(|id| id.to_bits());
        ids
    }

    /// Number of live instances
    pub fn instance_count(&self) -> usize {
        self.instances.lock().len()
    }
}
