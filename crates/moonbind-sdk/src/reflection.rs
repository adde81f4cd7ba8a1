//! HostReflection trait - the host object model as seen by the bridge
//!
//! The engine never inspects host objects directly. Every class lookup,
//! construction, method call and property access goes through this trait,
//! and every object is named by a generation-checked [`ObjectId`].

use crate::error::HostResult;
use crate::object::{ObjectId, ObjectInfo};
use crate::value::HostValue;

/// Reflected host object model.
///
/// Implementations must tolerate re-entry: `call_method`, `get_property` and
/// `set_property` may run script code that calls back into the host on the
/// same thread.
pub trait HostReflection: Send + Sync {
    // ========================================================================
    // Class Database
    // ========================================================================

    /// Whether a class with this name is registered
    fn class_exists(&self, class: &str) -> bool;

    /// Parent of a class, `None` for a root class or unknown name
    fn parent_class(&self, class: &str) -> Option<String>;

    /// Construct a new object of the class
    fn instantiate(&self, class: &str) -> HostResult<ObjectId>;

    /// Whether a method is bound on the class or any ancestor
    fn has_method(&self, class: &str, method: &str) -> bool;

    /// Integer constants declared directly on the class (not inherited)
    fn integer_constants(&self, class: &str) -> Vec<(String, i64)>;

    // ========================================================================
    // Object Operations
    // ========================================================================

    /// Call a natively bound method
    fn call_method(&self, object: ObjectId, method: &str, args: &[HostValue])
        -> HostResult<HostValue>;

    /// Read a property, `None` if the object has no such property
    fn get_property(&self, object: ObjectId, name: &str) -> Option<HostValue>;

    /// Write a property, `false` if the object has no such property
    fn set_property(&self, object: ObjectId, name: &str, value: &HostValue) -> bool;

    // ========================================================================
    // Lifetime
    // ========================================================================

    /// Liveness table lookup. `None` once the object is destroyed.
    fn object_info(&self, object: ObjectId) -> Option<ObjectInfo>;

    /// Increment a ref-counted object's count. `false` if it is not live.
    fn reference(&self, object: ObjectId) -> bool;

    /// Decrement a ref-counted object's count, freeing it at zero.
    /// Returns `true` if the object was freed.
    fn unreference(&self, object: ObjectId) -> bool;

    /// Whether `class` is `ancestor` or derives from it
    fn is_class(&self, class: &str, ancestor: &str) -> bool {
        let mut current = Some(class.to_string());
        while let Some(name) = current {
            if name == ancestor {
                return true;
            }
            current = self.parent_class(&name);
        }
        false
    }
}
