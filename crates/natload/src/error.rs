//! Error types for natload.

use thiserror::Error;

use crate::linker::describe;

/// Result type for natload operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Terminal errors reported by [`Loader`](crate::Loader).
///
/// Only the two not-found kinds are recovered internally, by moving on to the
/// next loading strategy. Whatever reaches the caller is the last error of the
/// chain.
#[derive(Debug, Error)]
pub enum Error {
    /// The logical name could not be resolved through the system search path.
    #[error("library `{name}` could not be loaded: not found in the system search path: {}", describe(.source))]
    NotFoundInSearchPath {
        name: String,
        #[source]
        source: libloading::Error,
    },

    /// The logical name could not be resolved when bound to a load context.
    #[error("library `{name}` could not be loaded: not found for context `{context}`: {}", describe(.source))]
    NotFoundInContext {
        name: String,
        context: String,
        #[source]
        source: libloading::Error,
    },

    /// The library was located but the native loader rejected it
    /// (architecture mismatch, corrupt binary, missing dependency, ...).
    #[error("failed to load native library {target}: {}", describe(.source))]
    NativeLoadFailed {
        target: String,
        #[source]
        source: libloading::Error,
    },
}

impl Error {
    /// Returns true if the root cause is a not-found condition.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::NotFoundInSearchPath { .. } | Self::NotFoundInContext { .. }
        )
    }

    /// Logical name or path the failed load was about.
    pub fn target(&self) -> &str {
        match self {
            Self::NotFoundInSearchPath { name, .. } | Self::NotFoundInContext { name, .. } => name,
            Self::NativeLoadFailed { target, .. } => target,
        }
    }
}
