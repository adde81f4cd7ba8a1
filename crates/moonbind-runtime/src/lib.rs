//! Moonbind Runtime
//!
//! Reference host for the Moonbind engine: an in-memory reflected object
//! model ([`MemoryHost`]), source stores, `moonbind.toml` configuration and
//! the [`Runtime`] facade that wires host, store and engine together.

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod host;
pub mod store;

use std::sync::Arc;

use moonbind_engine::{HostValue, ObjectId, ScriptEngine, SourceStore};
use moonbind_sdk::HostReflection;
use tracing::{debug, warn};

pub use config::{ProjectConfig, RuntimeConfig};
pub use error::{RuntimeError, RuntimeResult};
pub use host::{core_classes, ClassBuilder, ClassDef, HostMethod, HostStats, MemoryHost};
pub use store::{FsSourceStore, MemorySourceStore};

/// A host, a source store and an engine bridged together
pub struct Runtime {
    config: RuntimeConfig,
    host: Arc<MemoryHost>,
    store: Arc<dyn SourceStore>,
    engine: ScriptEngine,
}

impl Runtime {
    /// Runtime over the project directory named by `config`
    pub fn new(config: RuntimeConfig) -> RuntimeResult<Self> {
        let store = Arc::new(FsSourceStore::new(
            config.project.root.clone(),
            config.engine.script_root.clone(),
        ));
        Self::with_store(config, store)
    }

    /// Runtime loading scripts from `store`
    pub fn with_store(config: RuntimeConfig, store: Arc<dyn SourceStore>) -> RuntimeResult<Self> {
        Self::with_host(config, Arc::new(MemoryHost::new()), store)
    }

    /// Runtime over a prepared host
    pub fn with_host(
        config: RuntimeConfig,
        host: Arc<MemoryHost>,
        store: Arc<dyn SourceStore>,
    ) -> RuntimeResult<Self> {
        config.validate()?;
        let reflection: Arc<dyn HostReflection> = host.clone();
        let engine = ScriptEngine::new(reflection, Arc::clone(&store), config.engine.clone())?;
        host.attach_bridge(engine.bridge());
        Ok(Self {
            config,
            host,
            store,
            engine,
        })
    }

    /// Runtime with default options over an empty in-memory store
    pub fn in_memory() -> RuntimeResult<Self> {
        Self::with_store(RuntimeConfig::default(), Arc::new(MemorySourceStore::new()))
    }

    /// Configuration the runtime was built from
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Host object model
    pub fn host(&self) -> &Arc<MemoryHost> {
        &self.host
    }

    /// Source store
    pub fn store(&self) -> &Arc<dyn SourceStore> {
        &self.store
    }

    /// Script engine
    pub fn engine(&self) -> &ScriptEngine {
        &self.engine
    }

    /// Create an object of the script's host base type and bind a new
    /// instance of the script to it. Ref-counted objects come back holding
    /// one host reference, which [`Runtime::release`] gives back.
    pub fn spawn(&self, script: &str, args: &[HostValue]) -> RuntimeResult<ObjectId> {
        let definition = match self.engine.script(script) {
            Some(definition) => definition,
            None => self.engine.load_script(script)?,
        };
        let base = definition.host_base().to_string();
        let object = self.host.create(&base)?;
        let ref_counted = self
            .host
            .object_info(object)
            .map(|info| info.lifetime.is_ref_counted())
            .unwrap_or(false);
        if ref_counted {
            self.host.reference(object);
        }

        if let Err(err) = self.engine.instance_create(object, script, args) {
            warn!(script, error = %err, "failed to spawn script instance");
            self.host.destroy(object);
            return Err(err.into());
        }
        debug!(script, %object, base = %base, "spawned script instance");
        Ok(object)
    }

    /// Give back the object from [`Runtime::spawn`]: one reference for
    /// ref-counted objects, destruction for manual ones.
    pub fn release(&self, object: ObjectId) {
        match self.host.object_info(object) {
            Some(info) if info.lifetime.is_ref_counted() => {
                self.host.unreference(object);
            }
            Some(_) => {
                self.host.destroy(object);
            }
            None => {}
        }
    }

    /// Spawn `script`, call `method` on it and release the object
    pub fn run_script(&self, script: &str, method: &str, args: &[HostValue]) -> RuntimeResult<HostValue> {
        let object = self.spawn(script, &[])?;
        let result = self.engine.call(object, method, args);
        self.release(object);
        Ok(result?)
    }
}
