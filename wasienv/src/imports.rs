//! Import surface binder
//!
//! Builds the fixed, named set of host functions the guest links against.
//! Every entry closes over exactly one environment's shared state — the
//! capability table, the encoded argv/environ blocks, the memory bridge
//! and the syscall backend — never over process-wide state, so two
//! environments are fully isolated from each other.
//!
//! ```text
//!  ┌────────────────────────────┐        ┌───────────────────────────┐
//!  │ served in-core             │        │ delegated to the backend  │
//!  ├────────────────────────────┤        ├───────────────────────────┤
//!  │ args_sizes_get   args_get  │        │ fd_fdstat_get   fd_read   │
//!  │ environ_sizes_get          │        │ fd_write        fd_seek   │
//!  │ environ_get                │        │ fd_close        path_open │
//!  │ fd_prestat_get             │        │ clock_time_get            │
//!  │ fd_prestat_dir_name        │        │ (capability table passed  │
//!  │ proc_exit                  │        │  as authorization context)│
//!  └────────────────────────────┘        └───────────────────────────┘
//! ```
//!
//! Entries are bound once, at construction time. [`ImportSurface::replace`]
//! may swap an entry before instantiation — an explicit testing extension
//! point, safe because no guest code has run yet.
//!
//! All guest-memory traffic flows through the [`crate::MemoryBridge`]; an
//! import invoked before the bridge is resolved traps with an embedding
//! error rather than touching stale memory.

use crate::env::EnvState;
use crate::errno::{Errno, ProcExit};
use crate::error::WasiEnvError;
use crate::memory::{read_bytes, read_u32, write_bytes, write_u32, write_u64};
use anyhow::{anyhow, Result};
use std::sync::Arc;
use wasmtime::{Caller, FuncType, Linker, Val, ValType};

/// The current snapshot namespace most toolchains import from.
pub const SNAPSHOT_PREVIEW1: &str = "wasi_snapshot_preview1";

/// The pre-snapshot namespace early toolchains imported from.
pub const UNSTABLE: &str = "wasi_unstable";

type SurfaceFn<T> = Arc<dyn Fn(Caller<'_, T>, &[Val], &mut [Val]) -> Result<()> + Send + Sync>;

struct SurfaceEntry<T> {
    name: &'static str,
    params: Vec<ValType>,
    results: Vec<ValType>,
    func: SurfaceFn<T>,
}

/// The bound WASI function table for one environment, generic over the
/// wasmtime store data `T` (the entries never touch the store data).
pub struct ImportSurface<T> {
    namespace: String,
    entries: Vec<SurfaceEntry<T>>,
}

impl<T: 'static> ImportSurface<T> {
    pub(crate) fn bind(state: Arc<EnvState>, namespace: String) -> Self {
        let mut entries: Vec<SurfaceEntry<T>> = Vec::new();

        // argv/environ queries answer from the blocks encoded at
        // construction time, written through the bridge.
        {
            let state = state.clone();
            entries.push(errno_entry(
                "args_sizes_get",
                vec![ValType::I32, ValType::I32],
                move |caller, p| {
                    let count_ptr = arg_ptr(p, 0)?;
                    let size_ptr = arg_ptr(p, 1)?;
                    let memory = state.memory.memory()?;
                    Ok(errno_of(|| {
                        write_u32(&memory, &mut *caller, count_ptr, state.args.count())?;
                        write_u32(&memory, &mut *caller, size_ptr, state.args.bytes_len())
                    }))
                },
            ));
        }
        {
            let state = state.clone();
            entries.push(errno_entry(
                "args_get",
                vec![ValType::I32, ValType::I32],
                move |caller, p| {
                    let list_ptr = arg_ptr(p, 0)?;
                    let buf_ptr = arg_ptr(p, 1)?;
                    let memory = state.memory.memory()?;
                    Ok(errno_of(|| {
                        state.args.write_into(&memory, &mut *caller, list_ptr, buf_ptr)
                    }))
                },
            ));
        }
        {
            let state = state.clone();
            entries.push(errno_entry(
                "environ_sizes_get",
                vec![ValType::I32, ValType::I32],
                move |caller, p| {
                    let count_ptr = arg_ptr(p, 0)?;
                    let size_ptr = arg_ptr(p, 1)?;
                    let memory = state.memory.memory()?;
                    Ok(errno_of(|| {
                        write_u32(&memory, &mut *caller, count_ptr, state.env.count())?;
                        write_u32(&memory, &mut *caller, size_ptr, state.env.bytes_len())
                    }))
                },
            ));
        }
        {
            let state = state.clone();
            entries.push(errno_entry(
                "environ_get",
                vec![ValType::I32, ValType::I32],
                move |caller, p| {
                    let list_ptr = arg_ptr(p, 0)?;
                    let buf_ptr = arg_ptr(p, 1)?;
                    let memory = state.memory.memory()?;
                    Ok(errno_of(|| {
                        state.env.write_into(&memory, &mut *caller, list_ptr, buf_ptr)
                    }))
                },
            ));
        }

        // Preopen discovery answers straight from the capability table.
        {
            let state = state.clone();
            entries.push(errno_entry(
                "fd_prestat_get",
                vec![ValType::I32, ValType::I32],
                move |caller, p| {
                    let fd = arg_i32(p, 0)? as u32;
                    let buf = arg_ptr(p, 1)?;
                    let Some(entry) = state.capabilities.get(fd) else {
                        return Ok(Errno::NotCapable);
                    };
                    let memory = state.memory.memory()?;
                    let name_len = entry.guest_path.len() as u32;
                    Ok(errno_of(|| {
                        let len_field = buf.checked_add(4).ok_or(Errno::Fault)?;
                        write_u32(&memory, &mut *caller, buf, 0)?; // tag: preopened dir
                        write_u32(&memory, &mut *caller, len_field, name_len)
                    }))
                },
            ));
        }
        {
            let state = state.clone();
            entries.push(errno_entry(
                "fd_prestat_dir_name",
                vec![ValType::I32, ValType::I32, ValType::I32],
                move |caller, p| {
                    let fd = arg_i32(p, 0)? as u32;
                    let path_ptr = arg_ptr(p, 1)?;
                    let path_len = arg_i32(p, 2)? as u32;
                    let Some(entry) = state.capabilities.get(fd) else {
                        return Ok(Errno::NotCapable);
                    };
                    if (path_len as usize) < entry.guest_path.len() {
                        return Ok(Errno::Inval);
                    }
                    let memory = state.memory.memory()?;
                    Ok(errno_of(|| {
                        write_bytes(&memory, &mut *caller, path_ptr, entry.guest_path.as_bytes())
                    }))
                },
            ));
        }

        // Descriptor and path operations delegate to the backend with the
        // capability table as the authorization context; this layer only
        // marshals iovecs and results through the bridge.
        {
            let state = state.clone();
            entries.push(errno_entry(
                "fd_fdstat_get",
                vec![ValType::I32, ValType::I32],
                move |caller, p| {
                    let fd = arg_i32(p, 0)? as u32;
                    let buf = arg_ptr(p, 1)?;
                    let stat = match state.backend.fd_fdstat_get(&state.capabilities, fd) {
                        Ok(stat) => stat,
                        Err(errno) => return Ok(errno),
                    };
                    let mut out = [0u8; 24];
                    out[0] = stat.filetype;
                    out[2..4].copy_from_slice(&stat.flags.to_le_bytes());
                    out[8..16].copy_from_slice(&stat.rights_base.to_le_bytes());
                    out[16..24].copy_from_slice(&stat.rights_inheriting.to_le_bytes());
                    let memory = state.memory.memory()?;
                    Ok(errno_of(|| write_bytes(&memory, &mut *caller, buf, &out)))
                },
            ));
        }
        {
            let state = state.clone();
            entries.push(errno_entry(
                "fd_read",
                vec![ValType::I32, ValType::I32, ValType::I32, ValType::I32],
                move |caller, p| {
                    let fd = arg_i32(p, 0)? as u32;
                    let iovs_ptr = arg_ptr(p, 1)?;
                    let iovs_len = arg_i32(p, 2)? as u32;
                    let nread_ptr = arg_ptr(p, 3)?;
                    let memory = state.memory.memory()?;
                    Ok(errno_of(|| {
                        let iovecs = read_iovecs(&memory, &mut *caller, iovs_ptr, iovs_len)?;
                        let total: usize = iovecs.iter().map(|&(_, len)| len as usize).sum();
                        let mut scratch = vec![0u8; total];
                        let n = state
                            .backend
                            .fd_read(&state.capabilities, fd, &mut scratch)?;
                        let mut offset = 0;
                        for &(ptr, len) in &iovecs {
                            if offset >= n {
                                break;
                            }
                            let chunk = (len as usize).min(n - offset);
                            write_bytes(&memory, &mut *caller, ptr, &scratch[offset..offset + chunk])?;
                            offset += chunk;
                        }
                        write_u32(&memory, &mut *caller, nread_ptr, n as u32)
                    }))
                },
            ));
        }
        {
            let state = state.clone();
            entries.push(errno_entry(
                "fd_write",
                vec![ValType::I32, ValType::I32, ValType::I32, ValType::I32],
                move |caller, p| {
                    let fd = arg_i32(p, 0)? as u32;
                    let iovs_ptr = arg_ptr(p, 1)?;
                    let iovs_len = arg_i32(p, 2)? as u32;
                    let nwritten_ptr = arg_ptr(p, 3)?;
                    let memory = state.memory.memory()?;
                    Ok(errno_of(|| {
                        let iovecs = read_iovecs(&memory, &mut *caller, iovs_ptr, iovs_len)?;
                        let mut gathered = Vec::new();
                        for &(ptr, len) in &iovecs {
                            gathered.extend(read_bytes(&memory, &mut *caller, ptr, len)?);
                        }
                        let n = state
                            .backend
                            .fd_write(&state.capabilities, fd, &gathered)?;
                        write_u32(&memory, &mut *caller, nwritten_ptr, n as u32)
                    }))
                },
            ));
        }
        {
            let state = state.clone();
            entries.push(errno_entry(
                "fd_seek",
                vec![ValType::I32, ValType::I64, ValType::I32, ValType::I32],
                move |caller, p| {
                    let fd = arg_i32(p, 0)? as u32;
                    let offset = arg_i64(p, 1)?;
                    let whence = arg_i32(p, 2)? as u8;
                    let newoffset_ptr = arg_ptr(p, 3)?;
                    let position = match state
                        .backend
                        .fd_seek(&state.capabilities, fd, offset, whence)
                    {
                        Ok(position) => position,
                        Err(errno) => return Ok(errno),
                    };
                    let memory = state.memory.memory()?;
                    Ok(errno_of(|| {
                        write_u64(&memory, &mut *caller, newoffset_ptr, position)
                    }))
                },
            ));
        }
        {
            let state = state.clone();
            entries.push(errno_entry(
                "fd_close",
                vec![ValType::I32],
                move |_caller, p| {
                    let fd = arg_i32(p, 0)? as u32;
                    Ok(match state.backend.fd_close(&state.capabilities, fd) {
                        Ok(()) => Errno::Success,
                        Err(errno) => errno,
                    })
                },
            ));
        }
        {
            let state = state.clone();
            entries.push(errno_entry(
                "path_open",
                vec![
                    ValType::I32,
                    ValType::I32,
                    ValType::I32,
                    ValType::I32,
                    ValType::I32,
                    ValType::I64,
                    ValType::I64,
                    ValType::I32,
                    ValType::I32,
                ],
                move |caller, p| {
                    let dirfd = arg_i32(p, 0)? as u32;
                    let dirflags = arg_i32(p, 1)? as u32;
                    let path_ptr = arg_ptr(p, 2)?;
                    let path_len = arg_i32(p, 3)? as u32;
                    let oflags = arg_i32(p, 4)? as u16;
                    let rights_base = arg_i64(p, 5)? as u64;
                    let rights_inheriting = arg_i64(p, 6)? as u64;
                    let fdflags = arg_i32(p, 7)? as u16;
                    let opened_ptr = arg_ptr(p, 8)?;
                    let memory = state.memory.memory()?;
                    Ok(errno_of(|| {
                        let raw = read_bytes(&memory, &mut *caller, path_ptr, path_len)?;
                        let path = std::str::from_utf8(&raw).map_err(|_| Errno::Inval)?;
                        let newfd = state.backend.path_open(
                            &state.capabilities,
                            dirfd,
                            dirflags,
                            path,
                            oflags,
                            rights_base,
                            rights_inheriting,
                            fdflags,
                        )?;
                        write_u32(&memory, &mut *caller, opened_ptr, newfd)
                    }))
                },
            ));
        }
        {
            let state = state.clone();
            entries.push(errno_entry(
                "clock_time_get",
                vec![ValType::I32, ValType::I64, ValType::I32],
                move |caller, p| {
                    let clock_id = arg_i32(p, 0)? as u32;
                    let _precision = arg_i64(p, 1)?;
                    let time_ptr = arg_ptr(p, 2)?;
                    let now = match state.backend.clock_time_get(clock_id) {
                        Ok(now) => now,
                        Err(errno) => return Ok(errno),
                    };
                    let memory = state.memory.memory()?;
                    Ok(errno_of(|| write_u64(&memory, &mut *caller, time_ptr, now)))
                },
            ));
        }

        // proc_exit is the one entry with no errno result: it unwinds the
        // guest as a trap the startup dispatcher knows how to interpret.
        entries.push(SurfaceEntry {
            name: "proc_exit",
            params: vec![ValType::I32],
            results: Vec::new(),
            func: Arc::new(move |_caller, p, _results| {
                let code = arg_i32(p, 0)? as u32;
                Err(anyhow::Error::new(ProcExit(code)))
            }),
        });

        Self { namespace, entries }
    }

    /// The namespace the entries are registered under.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// The fixed entry list, in binding order.
    pub fn names(&self) -> Vec<&'static str> {
        self.entries.iter().map(|e| e.name).collect()
    }

    /// Swap one entry for a custom implementation. The declared signature
    /// is kept; only the behavior changes. Intended for testing embedders,
    /// before the guest is instantiated.
    pub fn replace<F>(&mut self, name: &str, func: F) -> Result<(), WasiEnvError>
    where
        F: Fn(Caller<'_, T>, &[Val], &mut [Val]) -> Result<()> + Send + Sync + 'static,
    {
        let entry = self
            .entries
            .iter_mut()
            .find(|e| e.name == name)
            .ok_or_else(|| WasiEnvError::UnknownEntry(name.to_string()))?;
        entry.func = Arc::new(func);
        Ok(())
    }

    /// Register every entry on the linker under this surface's namespace.
    pub fn add_to_linker(&self, linker: &mut Linker<T>) -> Result<(), WasiEnvError> {
        for entry in &self.entries {
            let ty = FuncType::new(
                linker.engine(),
                entry.params.iter().cloned(),
                entry.results.iter().cloned(),
            );
            let func = entry.func.clone();
            linker
                .func_new(&self.namespace, entry.name, ty, move |caller, params, results| {
                    func(caller, params, results)
                })
                .map_err(WasiEnvError::Linker)?;
        }
        tracing::debug!(
            namespace = %self.namespace,
            entries = self.entries.len(),
            "registered import surface"
        );
        Ok(())
    }
}

fn errno_entry<T, F>(name: &'static str, params: Vec<ValType>, body: F) -> SurfaceEntry<T>
where
    F: Fn(&mut Caller<'_, T>, &[Val]) -> Result<Errno> + Send + Sync + 'static,
{
    SurfaceEntry {
        name,
        params,
        results: vec![ValType::I32],
        func: Arc::new(move |mut caller, params, results| {
            let errno = body(&mut caller, params)?;
            results[0] = Val::I32(errno.raw());
            Ok(())
        }),
    }
}

fn errno_of(body: impl FnOnce() -> Result<(), Errno>) -> Errno {
    match body() {
        Ok(()) => Errno::Success,
        Err(errno) => errno,
    }
}

fn arg_i32(params: &[Val], index: usize) -> Result<i32> {
    params
        .get(index)
        .and_then(Val::i32)
        .ok_or_else(|| anyhow!("import invoked with a malformed argument list"))
}

fn arg_i64(params: &[Val], index: usize) -> Result<i64> {
    params
        .get(index)
        .and_then(Val::i64)
        .ok_or_else(|| anyhow!("import invoked with a malformed argument list"))
}

/// Guest pointers arrive as wasm `i32`; reinterpret as unsigned so that
/// bogus negative values land out of bounds instead of near address zero.
fn arg_ptr(params: &[Val], index: usize) -> Result<u32> {
    Ok(arg_i32(params, index)? as u32)
}

/// Decode `iovs_len` (base, len) pairs from guest memory, validating each
/// range against the current memory size before anything is allocated.
/// The aggregate length is capped at the memory size as well: iovecs may
/// overlap, and the caller allocates a buffer sized by their sum, so an
/// unbounded aggregate would let the guest dictate host allocations far
/// beyond its own linear memory.
fn read_iovecs<T>(
    memory: &wasmtime::Memory,
    caller: &mut Caller<'_, T>,
    iovs_ptr: u32,
    iovs_len: u32,
) -> Result<Vec<(u32, u32)>, Errno> {
    let mem_size = memory.data_size(&mut *caller) as u64;
    let mut aggregate: u64 = 0;
    let mut iovecs = Vec::with_capacity(iovs_len.min(1024) as usize);
    for i in 0..iovs_len {
        let base = iovs_ptr
            .checked_add(i.checked_mul(8).ok_or(Errno::Fault)?)
            .ok_or(Errno::Fault)?;
        let ptr = read_u32(memory, &mut *caller, base)?;
        let len = read_u32(memory, &mut *caller, base.checked_add(4).ok_or(Errno::Fault)?)?;
        if u64::from(ptr) + u64::from(len) > mem_size {
            return Err(Errno::Fault);
        }
        aggregate += u64::from(len);
        if aggregate > mem_size {
            return Err(Errno::Inval);
        }
        iovecs.push((ptr, len));
    }
    Ok(iovecs)
}
