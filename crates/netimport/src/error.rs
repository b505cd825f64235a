//! Import error taxonomy
//!
//! Every fallible operation on the import path ends in an [`ImportError`].
//! Only [`ImportError::NotFound`] and [`ImportError::ModuleNotFound`] are
//! control flow; everything else is fatal to the import that raised it.

use crate::archive::ArchiveError;
use crate::config::ConfigError;
use crate::index::IndexError;
use crate::transport::TransportError;
use thiserror::Error;

/// Errors raised while resolving or loading a module
#[derive(Debug, Error)]
pub enum ImportError {
    /// None of the candidate paths exist under a root
    #[error("Module '{name}' cannot be loaded from '{root}'")]
    NotFound { name: String, root: String },

    /// No strategy in the chain could provide the module
    #[error("No module named '{0}'")]
    ModuleNotFound(String),

    /// Malformed dotted name (empty, or with empty segments)
    #[error("Invalid module name: {0:?}")]
    InvalidName(String),

    /// Connection-level failure (DNS, refused, TLS handshake)
    #[error("Transport failure: {0}")]
    Transport(#[from] TransportError),

    /// Corrupt or undecryptable archive content
    #[error("Archive integrity failure: {0}")]
    ArchiveIntegrity(#[from] ArchiveError),

    /// A plaintext root was registered without opting in
    #[error("Plaintext URL '{0}' is not allowed; enable 'allow-plaintext' for it or insecure mode")]
    PlaintextNotAllowed(String),

    /// The fetched source failed while executing
    #[error("Execution of module '{name}' failed: {message}")]
    Execution { name: String, message: String },

    /// Profile or options could not be resolved
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Package index lookup failed
    #[error("Package index error: {0}")]
    Index(#[from] IndexError),
}

impl ImportError {
    /// Create a not-found error for a module under a root
    pub fn not_found(name: impl Into<String>, root: impl Into<String>) -> Self {
        ImportError::NotFound {
            name: name.into(),
            root: root.into(),
        }
    }

    /// Create an execution error for a module
    pub fn execution(name: impl Into<String>, message: impl Into<String>) -> Self {
        ImportError::Execution {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Whether this error only means "not here, try elsewhere"
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            ImportError::NotFound { .. } | ImportError::ModuleNotFound(_)
        )
    }
}
