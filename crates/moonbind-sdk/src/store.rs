//! SourceStore trait - persistence collaborator for script sources

use crate::error::HostResult;

/// Loads and saves script sources by path.
///
/// Paths are the same keys scripts are registered under (for example
/// `res://player.lua`). A store may hold precompiled chunks under the
/// matching `.luac` path; the engine maps both forms to one registration.
pub trait SourceStore: Send + Sync {
    /// Read the raw bytes at `path` (source text or a precompiled chunk)
    fn load_source(&self, path: &str) -> HostResult<Vec<u8>>;

    /// Persist source text at `path`
    fn save_source(&self, path: &str, text: &str) -> HostResult<()>;

    /// Whether anything is stored at `path`
    fn exists(&self, path: &str) -> bool;
}
