//! ScriptBridge trait - hooks a host calls into the script layer
//!
//! A host that lets scripts extend its objects consults the bridge before
//! falling back to native behaviour, the same way it would consult any
//! other per-object extension:
//!
//! - property reads and writes ask the script instance first
//! - object-level calls try the script instance first
//! - destroying an object notifies the bridge so it can release the
//!   instance's pin

use crate::error::HostResult;
use crate::object::ObjectId;
use crate::value::HostValue;

/// Host-facing side of the script layer
pub trait ScriptBridge: Send + Sync {
    /// Script-level property read. `None` means "not handled".
    fn instance_get(&self, object: ObjectId, name: &str) -> Option<HostValue>;

    /// Script-level property write. `false` means "not handled".
    fn instance_set(&self, object: ObjectId, name: &str, value: &HostValue) -> bool;

    /// Script-level call. `None` means the script does not define the method
    /// and the host should dispatch natively.
    fn instance_call(
        &self,
        object: ObjectId,
        method: &str,
        args: &[HostValue],
    ) -> Option<HostResult<HostValue>>;

    /// Destruction hook: the object is about to be freed
    fn object_destroyed(&self, object: ObjectId);
}
