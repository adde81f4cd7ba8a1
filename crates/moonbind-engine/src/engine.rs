//! Script engine facade
//!
//! [`ScriptEngine`] owns one interpreter and its bridge context. Every entry
//! point takes the execution lock, a reentrant mutex: a guest call that
//! re-enters the host, which re-enters the engine on the same thread,
//! proceeds, while other threads wait for the outermost call to finish.
//!
//! The engine also implements [`ScriptBridge`] so a host can route
//! property access, calls and destruction of scripted objects back into
//! it. Hosts hold the bridge weakly through [`ScriptEngine::bridge`].

use std::sync::{Arc, Weak};

use mlua::{Lua, LuaOptions, StdLib, Table, Value};
use moonbind_sdk::{
    HostError, HostReflection, HostResult, HostValue, ObjectId, ScriptBridge, SourceStore,
    ValueKind,
};
use parking_lot::ReentrantMutex;
use tracing::{debug, info};

use crate::class::{self, ClassBinding, Resolution};
use crate::context::BridgeContext;
use crate::debug::{self, Breakpoint, DebugHandler, StackFrame};
use crate::dispatch;
use crate::error::{CallError, CompileError, MarshalError, ScriptError, ScriptResult};
use crate::globals;
use crate::language::{self, Validation};
use crate::lifetime::{self, HandleStats};
use crate::marshal;
use crate::options::EngineOptions;
use crate::script::{instance, path, registrar, MethodInfo, ScriptDefinition, SignalInfo};

struct EngineShared {
    exec: ReentrantMutex<()>,
    lua: Lua,
    ctx: Arc<BridgeContext>,
}

/// A guest interpreter bridged to a host object model
pub struct ScriptEngine {
    shared: Arc<EngineShared>,
}

impl ScriptEngine {
    /// Create an interpreter with the base libraries, the debug library and
    /// the class prelude, bridged to `host` and loading from `store`.
    pub fn new(
        host: Arc<dyn HostReflection>,
        store: Arc<dyn SourceStore>,
        options: EngineOptions,
    ) -> ScriptResult<Self> {
        // SAFETY: the debug library is required for frame introspection and
        // precompiled chunks come from the host's own source store.
        let lua = unsafe {
            Lua::unsafe_new_with(StdLib::ALL_SAFE | StdLib::DEBUG, LuaOptions::new())
        };
        let ctx = Arc::new(BridgeContext::new(host, store, options));

        lifetime::install(&lua)?;
        class::install(&lua, &ctx)?;
        instance::install(&lua, &ctx)?;
        dispatch::install(&lua, &ctx)?;
        globals::load_prelude(&lua)?;
        globals::install(&lua, &ctx)?;
        debug::refresh(&lua, &ctx);

        info!(
            script_root = %ctx.options.script_root,
            instruction_limit = ?ctx.options.instruction_limit,
            "script engine ready"
        );
        Ok(Self {
            shared: Arc::new(EngineShared {
                exec: ReentrantMutex::new(()),
                lua,
                ctx,
            }),
        })
    }

    /// Options the engine was created with
    pub fn options(&self) -> &EngineOptions {
        &self.shared.ctx.options
    }

    /// Weak bridge handle for the host
    pub fn bridge(&self) -> Weak<dyn ScriptBridge> {
        let weak: Weak<EngineShared> = Arc::downgrade(&self.shared);
        weak
    }

    /// Run `f` with the interpreter under the execution lock
    pub fn with_lua<R>(&self, f: impl FnOnce(&Lua) -> R) -> R {
        let _exec = self.shared.exec.lock();
        f(&self.shared.lua)
    }

    fn parts(&self) -> (&Lua, &Arc<BridgeContext>) {
        (&self.shared.lua, &self.shared.ctx)
    }

    fn key(&self, path: &str) -> String {
        path::registration_key(&self.shared.ctx.options, path)
    }

    // ========================================================================
    // Classes and Values
    // ========================================================================

    /// Metatable of a host class, built on first use
    pub fn import_class(&self, class: &str) -> ScriptResult<Table> {
        let _exec = self.shared.exec.lock();
        let (lua, ctx) = self.parts();
        if !ctx.host.class_exists(class) {
            return Err(ScriptError::UnknownClass(class.to_string()));
        }
        Ok(class::import(lua, ctx, class)?)
    }

    /// Host classes imported so far, sorted
    pub fn imported_classes(&self) -> Vec<String> {
        self.shared.ctx.imported_classes()
    }

    /// Look up a member on a host class chain
    pub fn resolve_member(&self, class: &str, key: &str) -> ScriptResult<Resolution> {
        let metatable = self.import_class(class)?;
        let _exec = self.shared.exec.lock();
        let (lua, ctx) = self.parts();
        Ok(class::resolve_member(lua, ctx, &metatable, key)?)
    }

    /// Install hand-written members on a class, at first import or now
    pub fn register_binding(&self, class: &str, binding: ClassBinding) -> ScriptResult<()> {
        let _exec = self.shared.exec.lock();
        let (lua, ctx) = self.parts();
        Ok(class::register_binding(lua, ctx, class, binding)?)
    }

    /// Convert a host value for the guest
    pub fn to_guest(&self, value: &HostValue) -> ScriptResult<Value> {
        let _exec = self.shared.exec.lock();
        let (lua, ctx) = self.parts();
        Ok(marshal::to_guest(lua, ctx, value)?)
    }

    /// Convert a guest value for the host
    pub fn to_host(&self, value: &Value, expected: Option<ValueKind>) -> Result<HostValue, MarshalError> {
        let _exec = self.shared.exec.lock();
        marshal::to_host(&self.shared.ctx, value, expected)
    }

    /// Set a guest global
    pub fn set_global(&self, name: &str, value: &HostValue) -> ScriptResult<()> {
        let _exec = self.shared.exec.lock();
        let (lua, ctx) = self.parts();
        let value = marshal::to_guest(lua, ctx, value)?;
        lua.globals().set(name, value)?;
        Ok(())
    }

    /// Run a free chunk and convert its results
    pub fn exec(&self, source: &str, name: &str) -> ScriptResult<Vec<HostValue>> {
        let _exec = self.shared.exec.lock();
        let (lua, ctx) = self.parts();
        let chunk = registrar::load_chunk(lua, name, source.as_bytes())?;
        let results = dispatch::protected_call(lua, ctx, &chunk, Vec::new())?;
        let mut values = Vec::with_capacity(results.len());
        for value in &results {
            values.push(marshal::to_host(ctx, value, None)?);
        }
        Ok(values)
    }

    // ========================================================================
    // Scripts
    // ========================================================================

    /// Compile and register `source` at `path`. On failure the previous
    /// registration at `path` stays in place.
    pub fn compile_script(&self, path: &str, source: &str) -> ScriptResult<Arc<ScriptDefinition>> {
        let _exec = self.shared.exec.lock();
        let (lua, ctx) = self.parts();
        registrar::compile(lua, ctx, path, source.as_bytes())
    }

    /// Load a script (source or precompiled chunk) from the store
    pub fn load_script(&self, path: &str) -> ScriptResult<Arc<ScriptDefinition>> {
        let _exec = self.shared.exec.lock();
        let (lua, ctx) = self.parts();
        registrar::load(lua, ctx, path)
    }

    /// Compile a source to a precompiled chunk without registering it
    pub fn precompile(&self, path: &str, source: &str) -> Result<Vec<u8>, CompileError> {
        let _exec = self.shared.exec.lock();
        let key = self.key(path);
        let chunk = registrar::load_chunk(&self.shared.lua, &key, source.as_bytes())?;
        Ok(chunk.dump(false))
    }

    /// Write a source through the store and register it
    pub fn save_script(&self, path: &str, source: &str) -> ScriptResult<Arc<ScriptDefinition>> {
        let _exec = self.shared.exec.lock();
        self.shared.ctx.store.save_source(path, source)?;
        self.compile_script(path, source)
    }

    /// Recompile every top-level script from the store
    pub fn reload_all(&self) -> Vec<(String, ScriptError)> {
        let _exec = self.shared.exec.lock();
        let (lua, ctx) = self.parts();
        let failures = registrar::reload_all(lua, ctx);
        info!(failed = failures.len(), "reloaded scripts");
        failures
    }

    /// Published definition at a path
    pub fn script(&self, path: &str) -> Option<Arc<ScriptDefinition>> {
        self.shared.ctx.script(&self.key(path))
    }

    /// Registered script keys, sorted
    pub fn scripts(&self) -> Vec<String> {
        self.shared.ctx.script_paths()
    }

    /// Load and run `source` without registering it
    pub fn validate(&self, path: &str, source: &str) -> Validation {
        let _exec = self.shared.exec.lock();
        let (lua, ctx) = self.parts();
        language::validate(lua, ctx, path, source)
    }

    /// Reserved words of the guest language
    pub fn reserved_words(&self) -> &'static [&'static str] {
        &language::RESERVED_WORDS
    }

    // ========================================================================
    // Script Metadata
    // ========================================================================

    /// Whether the script or one of its base scripts declares `method`
    pub fn has_method(&self, path: &str, method: &str) -> bool {
        self.member_line(path, method).is_some()
    }

    /// Functions of the script and its base scripts; a derived declaration
    /// hides a base one of the same name
    pub fn method_list(&self, path: &str) -> Vec<MethodInfo> {
        let mut methods: Vec<MethodInfo> = Vec::new();
        for definition in self.shared.ctx.script_chain(&self.key(path)) {
            for method in definition.methods() {
                if !methods.iter().any(|m| m.name == method.name) {
                    methods.push(method.clone());
                }
            }
        }
        methods
    }

    /// Whether the script or one of its base scripts declares `signal`
    pub fn has_signal(&self, path: &str, signal: &str) -> bool {
        self.shared
            .ctx
            .script_chain(&self.key(path))
            .iter()
            .any(|definition| definition.signal(signal).is_some())
    }

    /// Signals of the script and its base scripts
    pub fn signal_list(&self, path: &str) -> Vec<SignalInfo> {
        let mut signals: Vec<SignalInfo> = Vec::new();
        for definition in self.shared.ctx.script_chain(&self.key(path)) {
            for signal in definition.signals() {
                if !signals.iter().any(|s| s.name == signal.name) {
                    signals.push(signal.clone());
                }
            }
        }
        signals
    }

    /// Default of a field declared on the script or a base script
    pub fn property_default(&self, path: &str, name: &str) -> Option<HostValue> {
        self.shared
            .ctx
            .script_chain(&self.key(path))
            .iter()
            .find_map(|definition| definition.defaults().get(name).cloned())
    }

    /// Line a method is defined on, searching base scripts
    pub fn member_line(&self, path: &str, name: &str) -> Option<u32> {
        self.shared
            .ctx
            .script_chain(&self.key(path))
            .iter()
            .find_map(|definition| definition.method(name).map(|m| m.line))
    }

    /// Whether `path` is `other` or derives from it
    pub fn inherits_script(&self, path: &str, other: &str) -> bool {
        let other = self.key(other);
        self.shared
            .ctx
            .script_chain(&self.key(path))
            .iter()
            .any(|definition| definition.path() == other)
    }

    /// Host class a script ultimately extends
    pub fn instance_base_type(&self, path: &str) -> Option<String> {
        self.shared
            .ctx
            .script_chain(&self.key(path))
            .last()
            .map(|definition| definition.host_base().to_string())
    }

    // ========================================================================
    // Instances
    // ========================================================================

    /// Bind a new instance of the script at `path` to `object` and run
    /// `_init(args...)`. Loads the script from the store if needed.
    pub fn instance_create(&self, object: ObjectId, path: &str, args: &[HostValue]) -> ScriptResult<()> {
        let _exec = self.shared.exec.lock();
        let (lua, ctx) = self.parts();
        let key = self.key(path);
        if ctx.script(&key).is_none() {
            registrar::load(lua, ctx, &key)?;
        }
        let args = marshal::to_guest_args(lua, ctx, args)?;
        instance::create(lua, ctx, object, &key, args)?;
        Ok(())
    }

    /// Unbind the instance of `object`. `false` if it had none.
    pub fn instance_destroy(&self, object: ObjectId) -> bool {
        instance::destroy(&self.shared.ctx, object)
    }

    /// Whether `object` has a script instance
    pub fn has_instance(&self, object: ObjectId) -> bool {
        self.shared.ctx.has_instance(object)
    }

    /// Definition bound to `object`
    pub fn instance_script(&self, object: ObjectId) -> Option<Arc<ScriptDefinition>> {
        self.shared
            .ctx
            .instance(object)
            .map(|state| Arc::clone(&state.definition))
    }

    /// Number of live script instances
    pub fn instance_count(&self) -> usize {
        self.shared.ctx.instance_count()
    }

    /// Call `method` on an object: instance field, script chain, then host
    pub fn call(&self, object: ObjectId, method: &str, args: &[HostValue]) -> Result<HostValue, CallError> {
        let _exec = self.shared.exec.lock();
        let (lua, ctx) = self.parts();
        dispatch::call(lua, ctx, object, method, args)
    }

    /// Call a class-level function of a script
    pub fn call_script(&self, path: &str, method: &str, args: &[HostValue]) -> Result<HostValue, CallError> {
        let _exec = self.shared.exec.lock();
        let (lua, ctx) = self.parts();
        dispatch::call_script(lua, ctx, &self.key(path), method, args)
    }

    /// Script-level property read. `None` means "not handled".
    pub fn get(&self, object: ObjectId, name: &str) -> Option<HostValue> {
        let _exec = self.shared.exec.lock();
        let (lua, ctx) = self.parts();
        instance::get(lua, ctx, object, name).ok().flatten()
    }

    /// Script-level property write. `false` means "not handled".
    pub fn set(&self, object: ObjectId, name: &str, value: &HostValue) -> bool {
        let _exec = self.shared.exec.lock();
        let (lua, ctx) = self.parts();
        instance::set(lua, ctx, object, name, value).unwrap_or(false)
    }

    /// Deliver a host notification to the instance's `_notification`
    pub fn notification(&self, object: ObjectId, what: i64) {
        let _exec = self.shared.exec.lock();
        let (lua, ctx) = self.parts();
        if let Err(err) = instance::notification(lua, ctx, object, what) {
            debug!(%object, what, error = %err, "notification not delivered");
        }
    }

    // ========================================================================
    // Debugging
    // ========================================================================

    /// Attach a debugger. With `break_at_entry` the next guest line pauses.
    pub fn attach_debugger(&self, handler: Arc<dyn DebugHandler>, break_at_entry: bool) {
        let _exec = self.shared.exec.lock();
        let (lua, ctx) = self.parts();
        ctx.debug.attach(handler, break_at_entry);
        debug::refresh(lua, ctx);
        info!(break_at_entry, "debugger attached");
    }

    /// Detach the debugger; breakpoints are kept
    pub fn detach_debugger(&self) {
        let _exec = self.shared.exec.lock();
        let (lua, ctx) = self.parts();
        ctx.debug.detach();
        debug::refresh(lua, ctx);
        info!("debugger detached");
    }

    /// Add a breakpoint at a script line. Returns its ID.
    pub fn add_breakpoint(&self, path: &str, line: u32) -> u32 {
        self.shared.ctx.debug.add_breakpoint(&self.key(path), line)
    }

    /// Remove a breakpoint by ID
    pub fn remove_breakpoint(&self, id: u32) -> bool {
        self.shared.ctx.debug.remove_breakpoint(id)
    }

    /// Registered breakpoints, by ID
    pub fn breakpoints(&self) -> Vec<Breakpoint> {
        self.shared.ctx.debug.breakpoints()
    }

    /// Stack captured at the last pause
    pub fn last_stack_snapshot(&self) -> Vec<StackFrame> {
        self.shared.ctx.debug.snapshot()
    }

    /// Guest frames currently on the interpreter stack
    pub fn stack_depth(&self) -> usize {
        let _exec = self.shared.exec.lock();
        debug::stack_depth(&self.shared.lua)
    }

    /// Nesting of protected calls currently running
    pub fn call_depth(&self) -> usize {
        self.shared.ctx.call_depth()
    }

    /// Wrapper reference counts taken and released
    pub fn handle_stats(&self) -> HandleStats {
        lifetime::stats(&self.shared.ctx)
    }

    /// Run a full collection so unreachable wrappers release their objects
    pub fn collect_garbage(&self) -> ScriptResult<()> {
        let _exec = self.shared.exec.lock();
        let lua = &self.shared.lua;
        lua.gc_collect()?;
        lua.gc_collect()?;
        lua.expire_registry_values();
        Ok(())
    }
}

impl ScriptBridge for EngineShared {
    fn instance_get(&self, object: ObjectId, name: &str) -> Option<HostValue> {
        let _exec = self.exec.lock();
        instance::get(&self.lua, &self.ctx, object, name).ok().flatten()
    }

    fn instance_set(&self, object: ObjectId, name: &str, value: &HostValue) -> bool {
        let _exec = self.exec.lock();
        instance::set(&self.lua, &self.ctx, object, name, value).unwrap_or(false)
    }

    fn instance_call(&self, object: ObjectId, method: &str, args: &[HostValue]) -> Option<HostResult<HostValue>> {
        let _exec = self.exec.lock();
        if !dispatch::has_script_method(&self.lua, &self.ctx, object, method) {
            return None;
        }
        Some(
            dispatch::call(&self.lua, &self.ctx, object, method, args)
                .map_err(|err| HostError::Other(err.to_string())),
        )
    }

    fn object_destroyed(&self, object: ObjectId) {
        instance::destroy(&self.ctx, object);
    }
}
