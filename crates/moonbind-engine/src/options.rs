//! Engine configuration

use serde::{Deserialize, Serialize};

/// Default values for [`EngineOptions`]
pub mod defaults {
    /// Prefix of script registration paths
    pub const SCRIPT_ROOT: &str = "res://";
    /// Extension of source scripts
    pub const SOURCE_EXTENSION: &str = "lua";
    /// Extension of precompiled chunks
    pub const CHUNK_EXTENSION: &str = "luac";
    /// Host base class for scripts that declare none
    pub const DEFAULT_BASE: &str = "RefCounted";
    /// Instructions between watchdog checks
    pub const WATCHDOG_INTERVAL: u32 = 1000;
}

/// Engine options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineOptions {
    /// Prefix that dotted base names and `require` paths are resolved under
    pub script_root: String,
    /// Extension of source scripts, without the dot
    pub source_extension: String,
    /// Extension of precompiled chunks, without the dot
    pub chunk_extension: String,
    /// Host base class used when a script declares no base
    pub default_base: String,
    /// When false, only tool scripts may be instantiated
    pub scripting_enabled: bool,
    /// Abort a top-level call after this many instructions. Off by default.
    pub instruction_limit: Option<u64>,
    /// Instructions between watchdog checks
    pub watchdog_interval: u32,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            script_root: defaults::SCRIPT_ROOT.to_string(),
            source_extension: defaults::SOURCE_EXTENSION.to_string(),
            chunk_extension: defaults::CHUNK_EXTENSION.to_string(),
            default_base: defaults::DEFAULT_BASE.to_string(),
            scripting_enabled: true,
            instruction_limit: None,
            watchdog_interval: defaults::WATCHDOG_INTERVAL,
        }
    }
}
