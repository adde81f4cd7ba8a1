//! In-memory reflected object model
//!
//! [`MemoryHost`] is a complete [`HostReflection`] implementation: a class
//! database with single inheritance, natively bound methods, typed-default
//! properties and integer constants, plus an object table of ref-counted and
//! manually managed objects addressed by generation-checked ids.
//!
//! Method bodies run with no host lock held, so a method may call back into
//! the host (or, through the bridge, into scripts) freely.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use moonbind_sdk::{
    FromHostValue, HandleArena, HostError, HostReflection, HostResult, HostValue, Lifetime,
    ObjectId, ObjectInfo, ScriptBridge,
};
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use tracing::{debug, trace, warn};

/// Natively bound method body
pub type HostMethod =
    Arc<dyn Fn(&MemoryHost, ObjectId, &[HostValue]) -> HostResult<HostValue> + Send + Sync>;

/// Names of the classes every [`MemoryHost`] starts with
pub mod core_classes {
    /// Root of the hierarchy (manual lifetime)
    pub const OBJECT: &str = "Object";
    /// Ref-counted base
    pub const REF_COUNTED: &str = "RefCounted";
    /// Manual scene object with a name and children
    pub const NODE: &str = "Node";
    /// Node with a 2D position
    pub const NODE_2D: &str = "Node2D";
}

/// Notification sent right after an object is constructed
pub const NOTIFICATION_POSTINITIALIZE: i64 = 0;
/// Notification sent right before an object is freed
pub const NOTIFICATION_PREDELETE: i64 = 1;

// ============================================================================
// Class Database
// ============================================================================

/// A registered class
pub struct ClassDef {
    name: String,
    parent: Option<String>,
    lifetime: Lifetime,
    instantiable: bool,
    methods: FxHashMap<String, HostMethod>,
    constants: Vec<(String, i64)>,
    properties: Vec<(String, HostValue)>,
}

impl ClassDef {
    /// Class name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Parent class name
    pub fn parent(&self) -> Option<&str> {
        self.parent.as_deref()
    }

    /// Ownership model of objects of this class
    pub fn lifetime(&self) -> Lifetime {
        self.lifetime
    }
}

impl fmt::Debug for ClassDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassDef")
            .field("name", &self.name)
            .field("parent", &self.parent)
            .field("lifetime", &self.lifetime)
            .field("methods", &self.methods.len())
            .finish()
    }
}

/// Builder for a [`ClassDef`]
///
/// Lifetime and instantiability are inherited from the parent unless set.
pub struct ClassBuilder {
    name: String,
    parent: Option<String>,
    lifetime: Option<Lifetime>,
    instantiable: bool,
    methods: FxHashMap<String, HostMethod>,
    constants: Vec<(String, i64)>,
    properties: Vec<(String, HostValue)>,
}

impl ClassBuilder {
    /// Start a class definition
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parent: None,
            lifetime: None,
            instantiable: true,
            methods: FxHashMap::default(),
            constants: Vec::new(),
            properties: Vec::new(),
        }
    }

    /// Derive from `parent`
    pub fn parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    /// Objects of this class are reference counted
    pub fn ref_counted(mut self) -> Self {
        self.lifetime = Some(Lifetime::RefCounted);
        self
    }

    /// Objects of this class are freed explicitly
    pub fn manual(mut self) -> Self {
        self.lifetime = Some(Lifetime::Manual);
        self
    }

    /// Refuse `instantiate` for this class
    pub fn abstract_class(mut self) -> Self {
        self.instantiable = false;
        self
    }

    /// Bind a native method
    pub fn method<F>(mut self, name: impl Into<String>, body: F) -> Self
    where
        F: Fn(&MemoryHost, ObjectId, &[HostValue]) -> HostResult<HostValue> + Send + Sync + 'static,
    {
        self.methods.insert(name.into(), Arc::new(body));
        self
    }

    /// Declare an integer constant
    pub fn constant(mut self, name: impl Into<String>, value: i64) -> Self {
        self.constants.push((name.into(), value));
        self
    }

    /// Declare a property and its default value
    pub fn property(mut self, name: impl Into<String>, default: impl Into<HostValue>) -> Self {
        self.properties.push((name.into(), default.into()));
        self
    }
}

// ============================================================================
// Object Table
// ============================================================================

struct ObjectEntry {
    class: Arc<ClassDef>,
    refcount: i64,
    properties: BTreeMap<String, HostValue>,
    children: Vec<ObjectId>,
}

/// Object table counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HostStats {
    /// Objects constructed
    pub created: u64,
    /// Objects freed
    pub destroyed: u64,
}

impl HostStats {
    /// Objects currently alive
    pub fn live(&self) -> u64 {
        self.created.saturating_sub(self.destroyed)
    }
}

/// In-memory host object model
pub struct MemoryHost {
    classes: RwLock<FxHashMap<String, Arc<ClassDef>>>,
    objects: Mutex<HandleArena<ObjectEntry>>,
    bridge: RwLock<Option<Weak<dyn ScriptBridge>>>,
    created: AtomicU64,
    destroyed: AtomicU64,
}

impl MemoryHost {
    /// Create a host with the core classes registered
    pub fn new() -> Self {
        let host = Self::empty();
        for class in core_class_defs() {
            if let Err(err) = host.register_class(class) {
                warn!(error = %err, "failed to register core class");
            }
        }
        host
    }

    /// Create a host with no classes at all
    pub fn empty() -> Self {
        Self {
            classes: RwLock::new(FxHashMap::default()),
            objects: Mutex::new(HandleArena::new()),
            bridge: RwLock::new(None),
            created: AtomicU64::new(0),
            destroyed: AtomicU64::new(0),
        }
    }

    /// Register a class. The parent, if any, must already be registered.
    pub fn register_class(&self, builder: ClassBuilder) -> HostResult<()> {
        let mut classes = self.classes.write();
        let inherited = match &builder.parent {
            Some(parent) => {
                let parent = classes
                    .get(parent)
                    .ok_or_else(|| HostError::ClassNotFound(parent.clone()))?;
                Some(parent.lifetime)
            }
            None => None,
        };
        let lifetime = builder
            .lifetime
            .or(inherited)
            .unwrap_or(Lifetime::Manual);
        debug!(class = %builder.name, parent = ?builder.parent, ?lifetime, "registered host class");
        classes.insert(
            builder.name.clone(),
            Arc::new(ClassDef {
                name: builder.name,
                parent: builder.parent,
                lifetime,
                instantiable: builder.instantiable,
                methods: builder.methods,
                constants: builder.constants,
                properties: builder.properties,
            }),
        );
        Ok(())
    }

    /// Look up a class definition
    pub fn class(&self, name: &str) -> Option<Arc<ClassDef>> {
        self.classes.read().get(name).cloned()
    }

    /// Registered class names, sorted
    pub fn class_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.classes.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Route script-level access through `bridge`
    pub fn attach_bridge(&self, bridge: Weak<dyn ScriptBridge>) {
        *self.bridge.write() = Some(bridge);
    }

    /// Stop consulting the bridge
    pub fn detach_bridge(&self) {
        *self.bridge.write() = None;
    }

    fn bridge(&self) -> Option<Arc<dyn ScriptBridge>> {
        self.bridge.read().as_ref().and_then(Weak::upgrade)
    }

    // ========================================================================
    // Object Lifecycle
    // ========================================================================

    /// Construct an object. Ref-counted objects start with no references.
    pub fn create(&self, class: &str) -> HostResult<ObjectId> {
        let def = self
            .class(class)
            .ok_or_else(|| HostError::ClassNotFound(class.to_string()))?;
        if !def.instantiable {
            return Err(HostError::NotInstantiable(class.to_string()));
        }

        let mut properties = BTreeMap::new();
        for ancestor in self.chain(class).iter().rev() {
            for (name, default) in &ancestor.properties {
                properties.insert(name.clone(), default.clone());
            }
        }

        let id = self.objects.lock().insert(ObjectEntry {
            class: def,
            refcount: 0,
            properties,
            children: Vec::new(),
        });
        self.created.fetch_add(1, Ordering::AcqRel);
        trace!(object = %id, class, "created object");
        Ok(id)
    }

    /// Free an object regardless of its reference count.
    /// Returns `false` if it was already gone.
    pub fn destroy(&self, id: ObjectId) -> bool {
        if !self.objects.lock().contains(id) {
            return false;
        }
        if let Some(bridge) = self.bridge() {
            bridge.object_destroyed(id);
        }
        let removed = self.objects.lock().remove(id);
        if removed.is_some() {
            self.destroyed.fetch_add(1, Ordering::AcqRel);
            trace!(object = %id, "destroyed object");
        }
        removed.is_some()
    }

    /// Whether `id` still names a live object
    pub fn is_alive(&self, id: ObjectId) -> bool {
        self.objects.lock().contains(id)
    }

    /// Current reference count of a live object
    pub fn refcount(&self, id: ObjectId) -> Option<i64> {
        self.objects.lock().get(id).map(|entry| entry.refcount)
    }

    /// Number of live objects
    pub fn object_count(&self) -> usize {
        self.objects.lock().len()
    }

    /// Object table counters
    pub fn stats(&self) -> HostStats {
        HostStats {
            created: self.created.load(Ordering::Acquire),
            destroyed: self.destroyed.load(Ordering::Acquire),
        }
    }

    // ========================================================================
    // Script-aware Access
    // ========================================================================

    /// Call a method the way host code does: the script instance first,
    /// then the native binding.
    pub fn call(&self, id: ObjectId, method: &str, args: &[HostValue]) -> HostResult<HostValue> {
        if let Some(bridge) = self.bridge() {
            if let Some(result) = bridge.instance_call(id, method, args) {
                return result;
            }
        }
        self.call_method(id, method, args)
    }

    /// Read a property: the script instance first, then the native value
    pub fn get(&self, id: ObjectId, name: &str) -> Option<HostValue> {
        if let Some(bridge) = self.bridge() {
            if let Some(value) = bridge.instance_get(id, name) {
                return Some(value);
            }
        }
        self.get_property(id, name)
    }

    /// Write a property: the script instance first, then the native value
    pub fn set(&self, id: ObjectId, name: &str, value: &HostValue) -> bool {
        if let Some(bridge) = self.bridge() {
            if bridge.instance_set(id, name, value) {
                return true;
            }
        }
        self.set_property(id, name, value)
    }

    // ========================================================================
    // Scene Tree
    // ========================================================================

    /// Children of a node, in insertion order
    pub fn children(&self, id: ObjectId) -> Vec<ObjectId> {
        let objects = self.objects.lock();
        match objects.get(id) {
            Some(entry) => entry
                .children
                .iter()
                .copied()
                .filter(|child| objects.contains(*child))
                .collect(),
            None => Vec::new(),
        }
    }

    fn add_child(&self, parent: ObjectId, child: ObjectId) -> HostResult<()> {
        let mut objects = self.objects.lock();
        if !objects.contains(child) {
            return Err(HostError::ObjectFreed);
        }
        let entry = objects.get_mut(parent).ok_or(HostError::ObjectFreed)?;
        entry.children.push(child);
        Ok(())
    }

    fn class_of(&self, id: ObjectId) -> HostResult<Arc<ClassDef>> {
        self.objects
            .lock()
            .get(id)
            .map(|entry| Arc::clone(&entry.class))
            .ok_or(HostError::ObjectFreed)
    }

    /// `class` and its ancestors, most-derived first
    fn chain(&self, class: &str) -> Vec<Arc<ClassDef>> {
        let classes = self.classes.read();
        let mut chain = Vec::new();
        let mut current = classes.get(class);
        while let Some(def) = current {
            chain.push(Arc::clone(def));
            current = def.parent.as_ref().and_then(|parent| classes.get(parent));
        }
        chain
    }

    fn find_method(&self, class: &str, method: &str) -> Option<HostMethod> {
        self.chain(class)
            .iter()
            .find_map(|def| def.methods.get(method).cloned())
    }
}

impl Default for MemoryHost {
    fn default() -> Self {
        Self::new()
    }
}

impl HostReflection for MemoryHost {
    fn class_exists(&self, class: &str) -> bool {
        self.classes.read().contains_key(class)
    }

    fn parent_class(&self, class: &str) -> Option<String> {
        self.classes.read().get(class)?.parent.clone()
    }

    fn instantiate(&self, class: &str) -> HostResult<ObjectId> {
        self.create(class)
    }

    fn has_method(&self, class: &str, method: &str) -> bool {
        self.find_method(class, method).is_some()
    }

    fn integer_constants(&self, class: &str) -> Vec<(String, i64)> {
        self.classes
            .read()
            .get(class)
            .map(|def| def.constants.clone())
            .unwrap_or_default()
    }

    fn call_method(&self, object: ObjectId, method: &str, args: &[HostValue]) -> HostResult<HostValue> {
        let class = self.class_of(object)?;
        let body = self
            .find_method(&class.name, method)
            .ok_or_else(|| HostError::MethodNotFound {
                class: class.name.clone(),
                method: method.to_string(),
            })?;
        body(self, object, args)
    }

    fn get_property(&self, object: ObjectId, name: &str) -> Option<HostValue> {
        self.objects.lock().get(object)?.properties.get(name).cloned()
    }

    fn set_property(&self, object: ObjectId, name: &str, value: &HostValue) -> bool {
        let mut objects = self.objects.lock();
        let Some(slot) = objects
            .get_mut(object)
            .and_then(|entry| entry.properties.get_mut(name))
        else {
            return false;
        };
        *slot = value.clone();
        true
    }

    fn object_info(&self, object: ObjectId) -> Option<ObjectInfo> {
        let objects = self.objects.lock();
        let entry = objects.get(object)?;
        Some(ObjectInfo::new(entry.class.name.clone(), entry.class.lifetime))
    }

    fn reference(&self, object: ObjectId) -> bool {
        match self.objects.lock().get_mut(object) {
            Some(entry) => {
                entry.refcount += 1;
                true
            }
            None => false,
        }
    }

    fn unreference(&self, object: ObjectId) -> bool {
        {
            let mut objects = self.objects.lock();
            let Some(entry) = objects.get_mut(object) else {
                return false;
            };
            entry.refcount -= 1;
            if entry.refcount > 0 || !entry.class.lifetime.is_ref_counted() {
                return false;
            }
        }
        self.destroy(object)
    }
}

// ============================================================================
// Core Classes
// ============================================================================

fn core_class_defs() -> Vec<ClassBuilder> {
    vec![
        ClassBuilder::new(core_classes::OBJECT)
            .manual()
            .constant("NOTIFICATION_POSTINITIALIZE", NOTIFICATION_POSTINITIALIZE)
            .constant("NOTIFICATION_PREDELETE", NOTIFICATION_PREDELETE)
            .method("get_class", |host, id, _args| {
                Ok(HostValue::from(host.class_of(id)?.name.clone()))
            })
            .method("is_class", |host, id, args| {
                let ancestor = String::from_host_arg(args, 0)?;
                let class = host.class_of(id)?;
                Ok(HostValue::Bool(host.is_class(&class.name, &ancestor)))
            })
            .method("get_instance_id", |_host, id, _args| {
                Ok(HostValue::Int(id.to_bits() as i64))
            })
            .method("free", |host, id, _args| {
                if host.class_of(id)?.lifetime.is_ref_counted() {
                    return Err(HostError::ArgumentError(
                        "ref-counted objects cannot be freed explicitly".to_string(),
                    ));
                }
                host.destroy(id);
                Ok(HostValue::Nil)
            }),
        ClassBuilder::new(core_classes::REF_COUNTED)
            .parent(core_classes::OBJECT)
            .ref_counted()
            .method("get_reference_count", |host, id, _args| {
                host.refcount(id).map(HostValue::Int).ok_or(HostError::ObjectFreed)
            }),
        ClassBuilder::new(core_classes::NODE)
            .parent(core_classes::OBJECT)
            .manual()
            .property("name", "")
            .method("get_name", |host, id, _args| {
                Ok(host.get_property(id, "name").unwrap_or(HostValue::Nil))
            })
            .method("set_name", |host, id, args| {
                let name = String::from_host_arg(args, 0)?;
                host.set_property(id, "name", &HostValue::String(name));
                Ok(HostValue::Nil)
            })
            .method("add_child", |host, id, args| {
                let child = ObjectId::from_host_arg(args, 0)?;
                host.add_child(id, child)?;
                Ok(HostValue::Nil)
            })
            .method("get_child_count", |host, id, _args| {
                Ok(HostValue::Int(host.children(id).len() as i64))
            })
            .method("get_child", |host, id, args| {
                let index = i64::from_host_arg(args, 0)?;
                let children = host.children(id);
                usize::try_from(index)
                    .ok()
                    .and_then(|i| children.get(i).copied())
                    .map(HostValue::Object)
                    .ok_or_else(|| HostError::ArgumentError(format!("child index {} out of range", index)))
            }),
        ClassBuilder::new(core_classes::NODE_2D)
            .parent(core_classes::NODE)
            .property("x", 0.0)
            .property("y", 0.0)
            .method("translate", |host, id, args| {
                let dx = f64::from_host_arg(args, 0)?;
                let dy = f64::from_host_arg(args, 1)?;
                let read = |axis: &str| {
                    host.get_property(id, axis)
                        .and_then(|value| value.as_float())
                        .unwrap_or(0.0)
                };
                let (x, y) = (read("x") + dx, read("y") + dy);
                host.set_property(id, "x", &HostValue::Float(x));
                host.set_property(id, "y", &HostValue::Float(y));
                Ok(HostValue::Nil)
            }),
    ]
}
