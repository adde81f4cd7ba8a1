//! Source stores
//!
//! - [`FsSourceStore`] maps `res://` paths onto a project directory
//! - [`MemorySourceStore`] keeps sources in a map, for tests and embedding

use std::fs;
use std::path::{Component, Path, PathBuf};

use moonbind_sdk::{HostError, HostResult, SourceStore};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tracing::debug;

/// Filesystem-backed store rooted at a project directory
#[derive(Debug, Clone)]
pub struct FsSourceStore {
    root: PathBuf,
    prefix: String,
}

impl FsSourceStore {
    /// Store resolving `prefix`-relative paths under `root`
    pub fn new(root: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            prefix: prefix.into(),
        }
    }

    /// Project directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Filesystem path for a script path. Rejects paths escaping the root.
    pub fn resolve(&self, path: &str) -> HostResult<PathBuf> {
        let relative = path.strip_prefix(self.prefix.as_str()).unwrap_or(path);
        let relative = Path::new(relative);
        for component in relative.components() {
            match component {
                Component::Normal(_) | Component::CurDir => {}
                _ => {
                    return Err(HostError::Io {
                        path: path.to_string(),
                        message: "path escapes the project root".to_string(),
                    })
                }
            }
        }
        Ok(self.root.join(relative))
    }
}

fn io_error(path: &str, err: std::io::Error) -> HostError {
    HostError::Io {
        path: path.to_string(),
        message: err.to_string(),
    }
}

impl SourceStore for FsSourceStore {
    fn load_source(&self, path: &str) -> HostResult<Vec<u8>> {
        let file = self.resolve(path)?;
        debug!(path, file = %file.display(), "loading source");
        fs::read(&file).map_err(|err| io_error(path, err))
    }

    fn save_source(&self, path: &str, text: &str) -> HostResult<()> {
        let file = self.resolve(path)?;
        if let Some(parent) = file.parent() {
            fs::create_dir_all(parent).map_err(|err| io_error(path, err))?;
        }
        debug!(path, file = %file.display(), "saving source");
        fs::write(&file, text).map_err(|err| io_error(path, err))
    }

    fn exists(&self, path: &str) -> bool {
        self.resolve(path).map(|file| file.is_file()).unwrap_or(false)
    }
}

/// In-memory store
#[derive(Debug, Default)]
pub struct MemorySourceStore {
    sources: RwLock<FxHashMap<String, Vec<u8>>>,
}

impl MemorySourceStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Store raw bytes (source text or a precompiled chunk) at `path`
    pub fn insert(&self, path: impl Into<String>, bytes: impl Into<Vec<u8>>) {
        self.sources.write().insert(path.into(), bytes.into());
    }

    /// Drop whatever is stored at `path`
    pub fn remove(&self, path: &str) -> bool {
        self.sources.write().remove(path).is_some()
    }

    /// Stored paths, sorted
    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.sources.read().keys().cloned().collect();
        paths.sort();
        paths
    }
}

impl SourceStore for MemorySourceStore {
    fn load_source(&self, path: &str) -> HostResult<Vec<u8>> {
        self.sources
            .read()
            .get(path)
            .cloned()
            .ok_or_else(|| HostError::Io {
                path: path.to_string(),
                message: "no such source".to_string(),
            })
    }

    fn save_source(&self, path: &str, text: &str) -> HostResult<()> {
        self.insert(path, text.as_bytes().to_vec());
        Ok(())
    }

    fn exists(&self, path: &str) -> bool {
        self.sources.read().contains_key(path)
    }
}
