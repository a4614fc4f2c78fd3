//! Guest-facing WASI error codes
//!
//! The subset of the preview 1 `errno` space this host surface emits.
//! Numbering follows the WASI snapshot ABI, the same values `wasi-libc`
//! compiles against.

use thiserror::Error;

/// WASI errno values returned to the guest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum Errno {
    /// No error.
    Success = 0,
    /// Bad file descriptor.
    BadF = 8,
    /// A guest-supplied pointer fell outside linear memory.
    Fault = 21,
    /// Invalid argument.
    Inval = 28,
    /// Host I/O error.
    Io = 29,
    /// No such file or directory.
    NoEnt = 44,
    /// Operation not implemented by this surface.
    NoSys = 52,
    /// Capability not granted. The descriptor or path is outside the
    /// environment's capability table.
    NotCapable = 76,
}

impl Errno {
    /// The raw wire value written back to the guest.
    pub fn raw(self) -> i32 {
        self as i32
    }
}

/// Raised as a host-function error when the guest calls `proc_exit`.
///
/// Propagates out of the guest invocation as a trap; [`crate::WasiEnv::start`]
/// treats code 0 as a normal command exit and reports any other code as
/// [`crate::WasiEnvError::Exited`]. Embedders invoking guest exports directly
/// can downcast for it the same way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("guest called proc_exit({0})")]
pub struct ProcExit(pub u32);
