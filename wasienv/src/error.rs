//! Host-facing error types
//!
//! Errors in this crate fall into two channels that must never mix:
//!
//! - [`WasiEnvError`] is raised synchronously to the host application for
//!   malformed configuration, malformed `start` input, and lifecycle misuse.
//! - [`crate::errno::Errno`] values travel to the guest through the normal
//!   WASI return channel and are invisible to the host application.

use thiserror::Error;

/// Errors surfaced to the host application.
#[derive(Debug, Error)]
pub enum WasiEnvError {
    /// Malformed construction or `start` input. Always names the offending
    /// field, the expected kind, and what was actually received.
    #[error("invalid argument '{field}': expected {expected}, got {actual}")]
    InvalidArgument {
        field: &'static str,
        expected: &'static str,
        actual: String,
    },

    /// An import touched guest memory before the bridge was resolved.
    ///
    /// Unreachable when `start` is called before any import is invoked;
    /// hitting this is a bug in the embedding, not in the guest.
    #[error("guest memory is not resolved; call start() before invoking imports")]
    MemoryUnresolved,

    /// The memory bridge was resolved a second time.
    #[error("guest memory was already resolved for this environment")]
    MemoryAlreadyResolved,

    /// `start` was called twice on the same environment.
    #[error("start() was already called on this environment")]
    AlreadyStarted,

    /// The guest's entry point trapped during `start`.
    #[error("guest entry point '{entry}' trapped")]
    StartFailed {
        entry: &'static str,
        #[source]
        source: anyhow::Error,
    },

    /// The guest called `proc_exit` with a nonzero code during `start`.
    #[error("guest exited with code {code}")]
    Exited { code: u32 },

    /// Registering the import surface on a linker failed.
    #[error("failed to register import surface")]
    Linker(#[source] anyhow::Error),

    /// `ImportSurface::replace` named an entry that is not part of the
    /// surface.
    #[error("unknown import surface entry: {0}")]
    UnknownEntry(String),
}

impl WasiEnvError {
    /// Create an invalid-argument error.
    pub fn invalid_argument(
        field: &'static str,
        expected: &'static str,
        actual: impl Into<String>,
    ) -> Self {
        Self::InvalidArgument {
            field,
            expected,
            actual: actual.into(),
        }
    }

    /// Check whether retrying the failed operation with corrected input is
    /// meaningful (construction and `start` validation failures are; the
    /// lifecycle errors are not).
    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, Self::InvalidArgument { .. })
    }
}
