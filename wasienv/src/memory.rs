//! Memory bridge
//!
//! The indirection between the import surface and the guest's linear
//! memory. The surface is bound before the guest is instantiated, so a
//! memory reference cannot be captured directly; every memory-touching
//! import dereferences this bridge at call time instead.
//!
//! Two lifecycles resolve the bridge:
//!
//! - **eager**: the embedder supplies a `Memory` at construction and the
//!   bridge is usable immediately;
//! - **deferred**: `start` extracts `exports.memory` from the instantiated
//!   module and resolves the bridge before any entry point runs.
//!
//! Resolution policy: resolving twice **fails** in both lifecycles.
//! Construction-supplied memory is immutable for the environment's life,
//! and a second deferred resolve indicates a double `start` in the
//! embedding.
//!
//! The bridge never owns the memory; `wasmtime::Memory` is a store-scoped
//! handle and the store keeps the allocation alive.

use crate::errno::Errno;
use crate::error::WasiEnvError;
use std::sync::OnceLock;
use wasmtime::{AsContext, AsContextMut, Memory};

/// Resolve-once slot for the guest's exported linear memory.
#[derive(Debug, Default)]
pub struct MemoryBridge {
    slot: OnceLock<Memory>,
}

impl MemoryBridge {
    /// An unresolved bridge (the deferred lifecycle's starting state).
    pub(crate) fn unresolved() -> Self {
        Self {
            slot: OnceLock::new(),
        }
    }

    /// Bind the guest memory. Fails with
    /// [`WasiEnvError::MemoryAlreadyResolved`] on a second call.
    pub fn resolve(&self, memory: Memory) -> Result<(), WasiEnvError> {
        self.slot
            .set(memory)
            .map_err(|_| WasiEnvError::MemoryAlreadyResolved)
    }

    /// The resolved memory handle. Reading through an unresolved bridge is
    /// an embedding bug; inside a host function the resulting error
    /// propagates as a trap.
    pub fn memory(&self) -> Result<Memory, WasiEnvError> {
        self.slot
            .get()
            .copied()
            .ok_or(WasiEnvError::MemoryUnresolved)
    }

    pub fn is_resolved(&self) -> bool {
        self.slot.get().is_some()
    }
}

// Bounds-checked accessors used by the import surface. Guest-supplied
// pointers that fall outside linear memory surface as `Fault` to the
// guest, never as a host panic.

pub(crate) fn write_bytes(
    memory: &Memory,
    mut ctx: impl AsContextMut,
    ptr: u32,
    bytes: &[u8],
) -> Result<(), Errno> {
    memory
        .write(&mut ctx, ptr as usize, bytes)
        .map_err(|_| Errno::Fault)
}

pub(crate) fn write_u32(
    memory: &Memory,
    ctx: impl AsContextMut,
    ptr: u32,
    value: u32,
) -> Result<(), Errno> {
    write_bytes(memory, ctx, ptr, &value.to_le_bytes())
}

pub(crate) fn write_u64(
    memory: &Memory,
    ctx: impl AsContextMut,
    ptr: u32,
    value: u64,
) -> Result<(), Errno> {
    write_bytes(memory, ctx, ptr, &value.to_le_bytes())
}

pub(crate) fn read_bytes(
    memory: &Memory,
    ctx: impl AsContext,
    ptr: u32,
    len: u32,
) -> Result<Vec<u8>, Errno> {
    let mut buf = vec![0u8; len as usize];
    memory
        .read(&ctx, ptr as usize, &mut buf)
        .map_err(|_| Errno::Fault)?;
    Ok(buf)
}

pub(crate) fn read_u32(
    memory: &Memory,
    ctx: impl AsContext,
    ptr: u32,
) -> Result<u32, Errno> {
    let mut bytes = [0u8; 4];
    memory
        .read(&ctx, ptr as usize, &mut bytes)
        .map_err(|_| Errno::Fault)?;
    Ok(u32::from_le_bytes(bytes))
}
