//! Moonbind SDK - host-side vocabulary for the Moonbind scripting bridge
//!
//! This crate provides the types and collaborator traits a host application
//! implements to expose its reflected object model to Lua scripts, without
//! depending on the full moonbind-engine.
//!
//! # Example
//!
//! ```ignore
//! use moonbind_sdk::{HostReflection, HostValue, ObjectId};
//!
//! fn greet(host: &dyn HostReflection, object: ObjectId) -> HostValue {
//!     host.call_method(object, "greet", &[HostValue::from("world")])
//!         .unwrap_or(HostValue::Nil)
//! }
//! ```

#![warn(missing_docs)]

pub mod arena;
pub mod bridge;
pub mod convert;
pub mod error;
pub mod object;
pub mod reflection;
pub mod store;
pub mod value;

pub use arena::HandleArena;
pub use bridge::ScriptBridge;
pub use convert::{FromHostValue, IntoHostValue};
pub use error::{HostError, HostResult};
pub use object::{Lifetime, ObjectId, ObjectInfo};
pub use reflection::HostReflection;
pub use store::SourceStore;
pub use value::{HostValue, ValueKind};
