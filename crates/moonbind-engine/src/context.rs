//! Bridge context
//!
//! All mutable bridge state for one interpreter lives here: the class
//! metatable cache, pending class bindings, the script registry, the
//! pinned-instance table and the debug state. One context is created with
//! each [`ScriptEngine`](crate::ScriptEngine) and dropped with it, so
//! several engines can coexist in one process.
//!
//! Lock discipline: no context lock is ever held across a call into the
//! interpreter. Allocating in the interpreter can run finalizers, and
//! finalizers can re-enter the context (a freed ref-counted object fires the
//! destruction hook). Entries that carry interpreter references are kept
//! behind `Arc` so they can be cloned out before use.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use mlua::{Lua, RegistryKey, Table};
use moonbind_sdk::{HostReflection, ObjectId, SourceStore};
use parking_lot::{Mutex, RwLock};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::class::ClassBinding;
use crate::debug::{DebugState, StackFrame};
use crate::error::{RuntimeError, ScriptError, ScriptResult};
use crate::lifetime::HandleLedger;
use crate::options::EngineOptions;
use crate::script::{InstanceState, ScriptDefinition};

/// Named registry slots for interpreter-side singletons
pub(crate) mod slots {
    /// Weak-valued table of canonical ref-counted wrappers
    pub const WRAPPERS: &str = "moonbind.wrappers";
    /// Root class metatable
    pub const ROOT_CLASS: &str = "moonbind.root_class";
    /// Shared `__index` of host class metatables
    pub const CLASS_INDEX: &str = "moonbind.class_index";
    /// Shared `__newindex` of host class metatables
    pub const CLASS_NEWINDEX: &str = "moonbind.class_newindex";
    /// Shared `__index` of script class tables
    pub const SCRIPT_INDEX: &str = "moonbind.script_index";
    /// Shared `__newindex` of script class tables
    pub const SCRIPT_NEWINDEX: &str = "moonbind.script_newindex";
    /// Shared `__tostring`
    pub const TOSTRING: &str = "moonbind.tostring";
    /// Shared `__eq`
    pub const EQ: &str = "moonbind.eq";
    /// Shared `__call` constructor
    pub const CONSTRUCT: &str = "moonbind.construct";
    /// Captured `xpcall`
    pub const XPCALL: &str = "moonbind.xpcall";
    /// Error handler passed to `xpcall`
    pub const ERROR_HANDLER: &str = "moonbind.error_handler";
    /// Prelude helper reading frame locals
    pub const LOCALS: &str = "moonbind.locals";
}

/// A published script: its metadata and its class table
pub(crate) struct ScriptEntry {
    pub definition: Arc<ScriptDefinition>,
    pub class_key: Arc<RegistryKey>,
}

/// Per-interpreter bridge state
pub(crate) struct BridgeContext {
    pub host: Arc<dyn HostReflection>,
    pub store: Arc<dyn SourceStore>,
    pub options: EngineOptions,
    pub ledger: Arc<HandleLedger>,
    pub debug: DebugState,
    pub watchdog: Watchdog,

    classes: Mutex<FxHashMap<String, Arc<RegistryKey>>>,
    bindings: Mutex<FxHashMap<String, ClassBinding>>,
    scripts: RwLock<FxHashMap<String, ScriptEntry>>,
    in_progress: Mutex<FxHashSet<String>>,
    instances: Mutex<FxHashMap<ObjectId, Arc<InstanceState>>>,
    call_depth: AtomicUsize,
    next_version: AtomicU64,
    last_traceback: Mutex<Vec<StackFrame>>,
}

impl BridgeContext {
    pub fn new(
        host: Arc<dyn HostReflection>,
        store: Arc<dyn SourceStore>,
        options: EngineOptions,
    ) -> Self {
        let watchdog = Watchdog::new(options.instruction_limit);
        Self {
            host,
            store,
            options,
            ledger: Arc::new(HandleLedger::default()),
            debug: DebugState::new(),
            watchdog,
            classes: Mutex::new(FxHashMap::default()),
            bindings: Mutex::new(FxHashMap::default()),
            scripts: RwLock::new(FxHashMap::default()),
            in_progress: Mutex::new(FxHashSet::default()),
            instances: Mutex::new(FxHashMap::default()),
            call_depth: AtomicUsize::new(0),
            next_version: AtomicU64::new(1),
            last_traceback: Mutex::new(Vec::new()),
        }
    }

    // ========================================================================
    // Class Cache
    // ========================================================================

    pub fn cached_class(&self, lua: &Lua, class: &str) -> mlua::Result<Option<Table>> {
        let key = self.classes.lock().get(class).cloned();
        match key {
            Some(key) => Ok(Some(lua.registry_value(&key)?)),
            None => Ok(None),
        }
    }

    pub fn cache_class(&self, lua: &Lua, class: &str, metatable: &Table) -> mlua::Result<()> {
        let key = Arc::new(lua.create_registry_value(metatable.clone())?);
        self.classes.lock().insert(class.to_string(), key);
        Ok(())
    }

    pub fn imported_classes(&self) -> Vec<String> {
        let mut names: Vec<String> = self.classes.lock().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn add_binding(&self, class: &str, binding: ClassBinding) {
        self.bindings.lock().insert(class.to_string(), binding);
    }

    /// Remove and return the pending binding for a class
    pub fn take_binding(&self, class: &str) -> Option<ClassBinding> {
        self.bindings.lock().remove(class)
    }

    // ========================================================================
    // Script Registry
    // ========================================================================

    pub fn script(&self, path: &str) -> Option<Arc<ScriptDefinition>> {
        self.scripts
            .read()
            .get(path)
            .map(|entry| Arc::clone(&entry.definition))
    }

    pub fn script_class(&self, lua: &Lua, path: &str) -> mlua::Result<Option<Table>> {
        let key = self
            .scripts
            .read()
            .get(path)
            .map(|entry| Arc::clone(&entry.class_key));
        match key {
            Some(key) => Ok(Some(lua.registry_value(&key)?)),
            None => Ok(None),
        }
    }

    /// Current definition and class table of a script, read together
    pub fn script_entry(
        &self,
        lua: &Lua,
        path: &str,
    ) -> mlua::Result<Option<(Arc<ScriptDefinition>, Table)>> {
        let entry = self
            .scripts
            .read()
            .get(path)
            .map(|entry| (Arc::clone(&entry.definition), Arc::clone(&entry.class_key)));
        match entry {
            Some((definition, key)) => Ok(Some((definition, lua.registry_value(&key)?))),
            None => Ok(None),
        }
    }

    /// Publish a script, returning the entry it replaced
    pub fn publish(&self, path: &str, entry: ScriptEntry) -> Option<ScriptEntry> {
        self.scripts.write().insert(path.to_string(), entry)
    }

    pub fn script_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.scripts.read().keys().cloned().collect();
        paths.sort();
        paths
    }

    /// Definitions from `path` up through its script bases
    pub fn script_chain(&self, path: &str) -> Vec<Arc<ScriptDefinition>> {
        let scripts = self.scripts.read();
        let mut chain = Vec::new();
        let mut current = scripts.get(path);
        while let Some(entry) = current {
            chain.push(Arc::clone(&entry.definition));
            current = entry
                .definition
                .base_script()
                .and_then(|base| scripts.get(base));
            if chain.len() > scripts.len() {
                break;
            }
        }
        chain
    }

    pub fn next_version(&self) -> u64 {
        self.next_version.fetch_add(1, Ordering::Relaxed)
    }

    pub fn is_in_progress(&self, path: &str) -> bool {
        self.in_progress.lock().contains(path)
    }

    // ========================================================================
    // Instances
    // ========================================================================

    pub fn instance(&self, object: ObjectId) -> Option<Arc<InstanceState>> {
        self.instances.lock().get(&object).cloned()
    }

    pub fn has_instance(&self, object: ObjectId) -> bool {
        self.instances.lock().contains_key(&object)
    }

    pub fn bind_instance(&self, state: Arc<InstanceState>) -> Option<Arc<InstanceState>> {
        self.instances.lock().insert(state.object, state)
    }

    pub fn unbind_instance(&self, object: ObjectId) -> Option<Arc<InstanceState>> {
        self.instances.lock().remove(&object)
    }

    pub fn instance_count(&self) -> usize {
        self.instances.lock().len()
    }

    // ========================================================================
    // Protected Calls
    // ========================================================================

    pub fn call_depth(&self) -> usize {
        self.call_depth.load(Ordering::Acquire)
    }

    pub fn stash_traceback(&self, frames: Vec<StackFrame>) {
        *self.last_traceback.lock() = frames;
    }

    pub fn take_traceback(&self) -> Vec<StackFrame> {
        std::mem::take(&mut *self.last_traceback.lock())
    }
}

/// Marks a script path as being compiled for as long as the guard lives.
///
/// Entering a path that is already in progress is a cyclic base.
pub(crate) struct ProgressGuard<'a> {
    ctx: &'a BridgeContext,
    path: String,
}

impl<'a> ProgressGuard<'a> {
    pub fn enter(ctx: &'a BridgeContext, path: &str) -> ScriptResult<Self> {
        if !ctx.in_progress.lock().insert(path.to_string()) {
            return Err(ScriptError::CyclicBase(path.to_string()));
        }
        Ok(Self {
            ctx,
            path: path.to_string(),
        })
    }
}

impl Drop for ProgressGuard<'_> {
    fn drop(&mut self) {
        self.ctx.in_progress.lock().remove(&self.path);
    }
}

/// Restores the protected-call depth on every exit path.
pub(crate) struct DepthGuard<'a> {
    ctx: &'a BridgeContext,
    depth: usize,
}

impl<'a> DepthGuard<'a> {
    pub fn enter(ctx: &'a BridgeContext) -> Self {
        let depth = ctx.call_depth.fetch_add(1, Ordering::AcqRel);
        if depth == 0 {
            ctx.watchdog.reset();
        }
        Self { ctx, depth }
    }
}

impl Drop for DepthGuard<'_> {
    fn drop(&mut self) {
        self.ctx.call_depth.store(self.depth, Ordering::Release);
    }
}

/// Instruction budget for top-level calls
pub(crate) struct Watchdog {
    limit: Option<u64>,
    spent: AtomicU64,
}

impl Watchdog {
    pub fn new(limit: Option<u64>) -> Self {
        Self {
            limit,
            spent: AtomicU64::new(0),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.limit.is_some()
    }

    pub fn reset(&self) {
        self.spent.store(0, Ordering::Relaxed);
    }

    /// Account for `instructions`; fails once the budget is exhausted
    pub fn tick(&self, instructions: u32) -> Result<(), RuntimeError> {
        let Some(limit) = self.limit else {
            return Ok(());
        };
        let spent = self.spent.fetch_add(instructions as u64, Ordering::Relaxed)
            + instructions as u64;
        if spent > limit {
            return Err(RuntimeError::new(format!(
                "instruction limit of {} exceeded",
                limit
            )));
        }
        Ok(())
    }
}
