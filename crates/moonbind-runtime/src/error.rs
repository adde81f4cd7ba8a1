//! Runtime error types.

use moonbind_engine::{CallError, ScriptError};
use moonbind_sdk::HostError;

/// Errors that can occur while configuring the runtime or running scripts.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// File I/O error
    #[error("{0}")]
    Io(#[from] std::io::Error),

    /// Configuration file failed to parse
    #[error("Config error: {0}")]
    Config(#[from] toml::de::Error),

    /// Configuration parsed but is unusable
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    /// Script registration or instance lifecycle error
    #[error("{0}")]
    Script(#[from] ScriptError),

    /// Call dispatch error
    #[error("{0}")]
    Call(#[from] CallError),

    /// Host object model error
    #[error("{0}")]
    Host(#[from] HostError),
}

/// Result type for runtime operations
pub type RuntimeResult<T> = Result<T, RuntimeError>;
