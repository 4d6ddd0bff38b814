//! Error types for namespace operations.
//!
//! Every fallible operation in the kernel returns [`NamespaceError`]. Callers
//! that need to branch on the failure class use [`NamespaceError::kind`]
//! rather than inspecting messages.

use thiserror::Error;

/// Result alias used throughout the kernel.
pub type Result<T> = std::result::Result<T, NamespaceError>;

/// Boxed underlying cause for `InvalidState` failures.
pub type Cause = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Coarse classification of a [`NamespaceError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidArgument,
    NotFound,
    Conflict,
    InvalidState,
    SelfReference,
    AliasLoop,
}

/// Errors produced by the namespace engine.
#[derive(Debug, Error)]
pub enum NamespaceError {
    /// A required input was absent or malformed.
    #[error("{0}")]
    InvalidArgument(String),

    /// A name did not resolve.
    #[error("{0}")]
    NotFound(String),

    /// Creation or import collided with an existing entity.
    #[error("{0}")]
    Conflict(String),

    /// The target namespace (or the runtime) is deleted, disposed or
    /// otherwise unusable.
    #[error("{message}")]
    InvalidState {
        message: String,
        #[source]
        source: Option<Cause>,
    },

    /// An import pattern names the importing namespace itself.
    #[error("{0}")]
    SelfReference(String),

    /// Following an alias chain revisited a name or ran too long.
    #[error("{0}")]
    AliasLoop(String),
}

impl NamespaceError {
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
            source: None,
        }
    }

    /// An `InvalidState` error wrapping a lower-level cause.
    pub fn invalid_state_from(message: impl Into<String>, source: impl Into<Cause>) -> Self {
        Self::InvalidState {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// The failure class of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::InvalidState { .. } => ErrorKind::InvalidState,
            Self::SelfReference(_) => ErrorKind::SelfReference,
            Self::AliasLoop(_) => ErrorKind::AliasLoop,
        }
    }
}

/// Quote a name for inclusion in an error message.
pub(crate) fn wrap(name: &str) -> String {
    format!("\"{}\"", name)
}
