//! Traits for converting between host values and Rust types.
//!
//! Host method implementations use these to unpack arguments and build
//! results without matching on [`HostValue`] by hand.
//!
//! # Example
//!
//! ```ignore
//! use moonbind_sdk::{FromHostValue, HostResult, HostValue, IntoHostValue};
//!
//! fn add(args: &[HostValue]) -> HostResult<HostValue> {
//!     let a = i64::from_host_arg(args, 0)?;
//!     let b = i64::from_host_arg(args, 1)?;
//!     Ok((a + b).into_host_value())
//! }
//! ```

use crate::error::{HostError, HostResult};
use crate::object::ObjectId;
use crate::value::{HostValue, ValueKind};

/// Convert from a HostValue to a Rust type.
pub trait FromHostValue: Sized {
    /// Kind this conversion accepts, used in error messages
    const KIND: ValueKind;

    /// Convert, returning `None` if the kind doesn't match
    fn from_host_value(value: &HostValue) -> Option<Self>;

    /// Convert positional argument `index`, reporting a typed error
    fn from_host_arg(args: &[HostValue], index: usize) -> HostResult<Self> {
        let value = args.get(index).ok_or_else(|| {
            HostError::ArgumentError(format!("missing argument {}", index + 1))
        })?;
        Self::from_host_value(value).ok_or_else(|| HostError::TypeMismatch {
            expected: Self::KIND.to_string(),
            got: value.kind().to_string(),
        })
    }
}

/// Convert from a Rust type to a HostValue.
pub trait IntoHostValue {
    /// Convert to HostValue
    fn into_host_value(self) -> HostValue;
}

impl<T: Into<HostValue>> IntoHostValue for T {
    fn into_host_value(self) -> HostValue {
        self.into()
    }
}

impl FromHostValue for bool {
    const KIND: ValueKind = ValueKind::Bool;

    fn from_host_value(value: &HostValue) -> Option<Self> {
        value.as_bool()
    }
}

impl FromHostValue for i64 {
    const KIND: ValueKind = ValueKind::Int;

    fn from_host_value(value: &HostValue) -> Option<Self> {
        match value {
            HostValue::Int(i) => Some(*i),
            HostValue::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            _ => None,
        }
    }
}

impl FromHostValue for f64 {
    const KIND: ValueKind = ValueKind::Float;

    fn from_host_value(value: &HostValue) -> Option<Self> {
        value.as_float()
    }
}

impl FromHostValue for String {
    const KIND: ValueKind = ValueKind::String;

    fn from_host_value(value: &HostValue) -> Option<Self> {
        value.as_str().map(str::to_string)
    }
}

impl FromHostValue for ObjectId {
    const KIND: ValueKind = ValueKind::Object;

    fn from_host_value(value: &HostValue) -> Option<Self> {
        value.as_object()
    }
}
