//! Object identity
//!
//! Host objects are never exposed to scripts by address. Every object is
//! named by an [`ObjectId`]: a slot index paired with the generation the
//! slot had when the object was created. Freeing an object bumps the slot's
//! generation, so any id captured earlier stops resolving instead of
//! aliasing whatever object reuses the slot.

use std::fmt;

/// Generation-checked object identifier.
///
/// Generations start at 1, so the packed form of a valid id is never zero.
/// Zero is reserved for the null object when ids are stored as integers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId {
    index: u32,
    generation: u32,
}

impl ObjectId {
    /// Create an id from its parts
    pub const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Slot index
    pub const fn index(self) -> u32 {
        self.index
    }

    /// Slot generation at creation time
    pub const fn generation(self) -> u32 {
        self.generation
    }

    /// Pack into a single integer (generation in the high half)
    pub const fn to_bits(self) -> u64 {
        ((self.generation as u64) << 32) | self.index as u64
    }

    /// Unpack from [`ObjectId::to_bits`]. Returns `None` for the null id.
    pub const fn from_bits(bits: u64) -> Option<Self> {
        if bits == 0 {
            return None;
        }
        Some(Self {
            index: bits as u32,
            generation: (bits >> 32) as u32,
        })
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}v{}", self.index, self.generation)
    }
}

/// Ownership model of a host object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lifetime {
    /// Shared ownership; every guest wrapper holds one count
    RefCounted,
    /// Host-owned; the guest only ever holds an id
    Manual,
}

impl Lifetime {
    /// Whether guest wrappers of this kind own a reference count
    pub fn is_ref_counted(self) -> bool {
        matches!(self, Lifetime::RefCounted)
    }
}

/// Live facts about an object, as reported by the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    /// Most-derived host class name
    pub class: String,
    /// Ownership model
    pub lifetime: Lifetime,
}

impl ObjectInfo {
    /// Create object info
    pub fn new(class: impl Into<String>, lifetime: Lifetime) -> Self {
        Self {
            class: class.into(),
            lifetime,
        }
    }
}
