//! Syscall backend seam
//!
//! Descriptor and path operations are not emulated here: they are
//! delegated to a [`SyscallBackend`] collaborator, which receives the
//! environment's [`CapabilityTable`] as the authorization context for
//! every descriptor-scoped request. A request against a descriptor absent
//! from the table must come back as a not-capable class [`Errno`] — the
//! guest is untrusted and its probing must never abort the host.
//!
//! The in-crate default, [`StdioBackend`], grants exactly the standard
//! streams and the clocks; everything filesystem-shaped is denied. Real
//! filesystem emulation (symlink containment, host fd management) belongs
//! to an external backend implementation.

use crate::capability::CapabilityTable;
use crate::errno::Errno;
use std::io::Write;
use std::time::{Instant, SystemTime};

/// `filetype` values from the preview 1 ABI, as reported by
/// [`SyscallBackend::fd_fdstat_get`].
pub const FILETYPE_UNKNOWN: u8 = 0;
pub const FILETYPE_CHARACTER_DEVICE: u8 = 2;
pub const FILETYPE_DIRECTORY: u8 = 3;
pub const FILETYPE_REGULAR_FILE: u8 = 4;

/// Descriptor status reported to the guest through `fd_fdstat_get`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FdStat {
    pub filetype: u8,
    pub flags: u16,
    pub rights_base: u64,
    pub rights_inheriting: u64,
}

/// The capability-checked system-call collaborator.
///
/// Implementations must be infallible from the host's point of view:
/// every failure is an [`Errno`] for the guest, never a panic. Methods
/// take `&self`; stateful backends (host file offsets, open-file tables)
/// use interior mutability.
pub trait SyscallBackend: Send + Sync {
    fn fd_fdstat_get(&self, table: &CapabilityTable, fd: u32) -> Result<FdStat, Errno>;

    /// Read up to `buf.len()` bytes from `fd`. Returns the byte count.
    fn fd_read(&self, table: &CapabilityTable, fd: u32, buf: &mut [u8]) -> Result<usize, Errno>;

    /// Write `buf` to `fd`. Returns the byte count written.
    fn fd_write(&self, table: &CapabilityTable, fd: u32, buf: &[u8]) -> Result<usize, Errno>;

    fn fd_seek(
        &self,
        table: &CapabilityTable,
        fd: u32,
        offset: i64,
        whence: u8,
    ) -> Result<u64, Errno>;

    fn fd_close(&self, table: &CapabilityTable, fd: u32) -> Result<(), Errno>;

    /// Open a path relative to a preopened directory descriptor. `dirfd`
    /// must resolve through the table; the returned value is the new guest
    /// descriptor.
    #[allow(clippy::too_many_arguments)]
    fn path_open(
        &self,
        table: &CapabilityTable,
        dirfd: u32,
        dirflags: u32,
        path: &str,
        oflags: u16,
        rights_base: u64,
        rights_inheriting: u64,
        fdflags: u16,
    ) -> Result<u32, Errno>;

    /// Nanosecond reading of `clock_id` (0 = realtime, 1 = monotonic).
    fn clock_time_get(&self, clock_id: u32) -> Result<u64, Errno>;
}

/// Deny-by-default backend: standard streams and clocks only.
///
/// stdout/stderr writes go to the host's own streams, stdin reads report
/// end-of-file, and every descriptor or path outside fds 0-2 answers
/// not-capable — including the preopens, which this backend can describe
/// (`fd_fdstat_get`) but not open into.
pub struct StdioBackend {
    monotonic_origin: Instant,
}

impl StdioBackend {
    pub fn new() -> Self {
        Self {
            monotonic_origin: Instant::now(),
        }
    }
}

impl Default for StdioBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl SyscallBackend for StdioBackend {
    fn fd_fdstat_get(&self, table: &CapabilityTable, fd: u32) -> Result<FdStat, Errno> {
        if fd <= 2 {
            return Ok(FdStat {
                filetype: FILETYPE_CHARACTER_DEVICE,
                flags: 0,
                // Rights masks are advisory here; enforcement happens in
                // the backend methods themselves.
                rights_base: u64::MAX,
                rights_inheriting: 0,
            });
        }
        if table.get(fd).is_some() {
            return Ok(FdStat {
                filetype: FILETYPE_DIRECTORY,
                flags: 0,
                rights_base: u64::MAX,
                rights_inheriting: u64::MAX,
            });
        }
        Err(Errno::NotCapable)
    }

    fn fd_read(&self, _table: &CapabilityTable, fd: u32, _buf: &mut [u8]) -> Result<usize, Errno> {
        match fd {
            // stdin is not inherited: report end-of-file.
            0 => Ok(0),
            _ => Err(Errno::NotCapable),
        }
    }

    fn fd_write(&self, _table: &CapabilityTable, fd: u32, buf: &[u8]) -> Result<usize, Errno> {
        match fd {
            1 => {
                let mut stdout = std::io::stdout().lock();
                stdout.write_all(buf).map_err(|_| Errno::Io)?;
                stdout.flush().map_err(|_| Errno::Io)?;
                Ok(buf.len())
            }
            2 => {
                let mut stderr = std::io::stderr().lock();
                stderr.write_all(buf).map_err(|_| Errno::Io)?;
                Ok(buf.len())
            }
            _ => Err(Errno::NotCapable),
        }
    }

    fn fd_seek(
        &self,
        _table: &CapabilityTable,
        _fd: u32,
        _offset: i64,
        _whence: u8,
    ) -> Result<u64, Errno> {
        // Streams are not seekable and this backend opens no files.
        Err(Errno::NotCapable)
    }

    fn fd_close(&self, _table: &CapabilityTable, fd: u32) -> Result<(), Errno> {
        match fd {
            0..=2 => Ok(()),
            _ => Err(Errno::NotCapable),
        }
    }

    fn path_open(
        &self,
        _table: &CapabilityTable,
        _dirfd: u32,
        _dirflags: u32,
        path: &str,
        _oflags: u16,
        _rights_base: u64,
        _rights_inheriting: u64,
        _fdflags: u16,
    ) -> Result<u32, Errno> {
        tracing::debug!(path, "path_open denied by stdio backend");
        Err(Errno::NotCapable)
    }

    fn clock_time_get(&self, clock_id: u32) -> Result<u64, Errno> {
        match clock_id {
            0 => {
                let now = SystemTime::now()
                    .duration_since(SystemTime::UNIX_EPOCH)
                    .map_err(|_| Errno::Io)?;
                Ok(now.as_secs() * 1_000_000_000 + u64::from(now.subsec_nanos()))
            }
            1 => {
                let elapsed = self.monotonic_origin.elapsed();
                Ok(elapsed.as_secs() * 1_000_000_000 + u64::from(elapsed.subsec_nanos()))
            }
            _ => Err(Errno::Inval),
        }
    }
}
