//! Error types for host collaborators

/// Result type for host reflection and persistence calls
pub type HostResult<T> = Result<T, HostError>;

/// Errors reported by the host object model or the source store
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum HostError {
    /// Type mismatch during conversion
    #[error("Type mismatch: expected {expected}, got {got}")]
    TypeMismatch {
        /// Expected kind name
        expected: String,
        /// Actual kind name
        got: String,
    },

    /// Invalid argument passed to a host method
    #[error("Argument error: {0}")]
    ArgumentError(String),

    /// Class is not known to the host
    #[error("Class not found: {0}")]
    ClassNotFound(String),

    /// Method is not bound on the object's class chain
    #[error("Method not found: {class}.{method}")]
    MethodNotFound {
        /// Class searched
        class: String,
        /// Method name
        method: String,
    },

    /// Class exists but cannot be instantiated
    #[error("Class cannot be instantiated: {0}")]
    NotInstantiable(String),

    /// Object id no longer resolves to a live object
    #[error("Object has been freed")]
    ObjectFreed,

    /// Source store failure
    #[error("I/O error on '{path}': {message}")]
    Io {
        /// Script path
        path: String,
        /// Underlying error text
        message: String,
    },

    /// Any other host-side failure
    #[error("{0}")]
    Other(String),
}

impl From<String> for HostError {
    fn from(s: String) -> Self {
        HostError::Other(s)
    }
}

impl From<&str> for HostError {
    fn from(s: &str) -> Self {
        HostError::Other(s.to_string())
    }
}
