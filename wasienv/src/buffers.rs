//! Pre-encoded argv/environ blocks
//!
//! The `args_*` and `environ_*` imports serve from blocks encoded once at
//! construction time: a `u32` pointer list followed by NUL-terminated
//! strings, the wire shape `wasi-libc` expects from `args_get`.

use crate::errno::Errno;
use crate::memory::{write_bytes, write_u32};
use wasmtime::{AsContextMut, Memory};

/// An immutable block of NUL-terminated strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct StringBlock {
    /// Each entry carries its NUL terminator.
    entries: Vec<Vec<u8>>,
}

impl StringBlock {
    pub fn from_strings(strings: &[String]) -> Self {
        let entries = strings
            .iter()
            .map(|s| {
                let mut bytes = s.as_bytes().to_vec();
                bytes.push(0);
                bytes
            })
            .collect();
        Self { entries }
    }

    /// Number of entries, as reported by `*_sizes_get`.
    pub fn count(&self) -> u32 {
        self.entries.len() as u32
    }

    /// Total payload size including NUL terminators, as reported by
    /// `*_sizes_get`.
    pub fn bytes_len(&self) -> u32 {
        self.entries.iter().map(|e| e.len() as u32).sum()
    }

    /// Serialize into guest memory: one `u32` pointer per entry at
    /// `list_ptr`, the strings packed at `buf_ptr`. Little-endian,
    /// bounds-checked; a pointer outside linear memory yields `Fault`.
    pub fn write_into(
        &self,
        memory: &Memory,
        mut ctx: impl AsContextMut,
        list_ptr: u32,
        buf_ptr: u32,
    ) -> Result<(), Errno> {
        let mut cursor = buf_ptr;
        for (i, entry) in self.entries.iter().enumerate() {
            let slot = list_ptr
                .checked_add(i as u32 * 4)
                .ok_or(Errno::Fault)?;
            write_u32(memory, &mut ctx, slot, cursor)?;
            write_bytes(memory, &mut ctx, cursor, entry)?;
            cursor = cursor
                .checked_add(entry.len() as u32)
                .ok_or(Errno::Fault)?;
        }
        Ok(())
    }
}
