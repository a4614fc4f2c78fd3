//! wasienv: a WASI preview 1 host environment for wasmtime guests
//!
//! This crate builds the sandboxed system interface a Wasm guest links
//! against: it validates the host's configuration (argv, environment,
//! preopened directories), turns the preopens into a capability table,
//! binds the WASI function imports over that state, and drives the guest's
//! entry point exactly once.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                         Environment Lifecycle                        │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │                                                                      │
//! │  WasiOptions ──normalize──► NormalizedOptions                        │
//! │       │                        │                                     │
//! │       │                        ├─► StringBlock (argv, env)           │
//! │       │                        └─► CapabilityTable (fds 3..3+N)      │
//! │       ▼                                                              │
//! │  WasiEnv ──import_surface──► ImportSurface ──add_to_linker──► Linker │
//! │       │                                                              │
//! │       │            linker.instantiate(module)                        │
//! │       ▼                                                              │
//! │  start(store, instance)                                              │
//! │       ├─ resolve MemoryBridge from exports.memory (if deferred)      │
//! │       └─ invoke _start | _initialize | (nothing) exactly once        │
//! │                                                                      │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Security model
//!
//! The guest receives only what was granted: descriptors 0-2 are the
//! standard streams, descriptors 3.. map 1:1 to the declared preopens in
//! declaration order, and no other descriptor resolves to a host resource.
//! Actual syscall emulation lives behind the [`SyscallBackend`] trait; the
//! in-crate [`StdioBackend`] denies everything filesystem-shaped, so a real
//! backend must be supplied to grant more than stdio.
//!
//! Capability violations are reported to the guest as WASI errno values
//! (`ENOTCAPABLE` and friends) and never abort the host; a hostile guest
//! cannot crash its embedder by probing descriptors.
//!
//! # Example
//!
//! ```rust,ignore
//! use wasienv::{WasiEnv, WasiOptions};
//! use wasmtime::{Engine, Linker, Module, Store};
//!
//! let mut env = WasiEnv::new(
//!     WasiOptions::new()
//!         .arg("guest.wasm")
//!         .env("LANG", "C")
//!         .preopen("/sandbox", "/tmp/host-dir"),
//! )?;
//!
//! let engine = Engine::default();
//! let module = Module::from_file(&engine, "guest.wasm")?;
//! let mut linker: Linker<()> = Linker::new(&engine);
//! env.add_to_linker(&mut linker)?;
//!
//! let mut store = Store::new(&engine, ());
//! let instance = linker.instantiate(&mut store, &module)?;
//! env.start(&mut store, &instance)?;
//! ```

pub mod backend;
pub mod capability;
pub mod errno;
pub mod error;
pub mod imports;
pub mod memory;
pub mod options;

mod buffers;
mod env;

pub use backend::{FdStat, StdioBackend, SyscallBackend};
pub use capability::{CapabilityEntry, CapabilityTable, FIRST_PREOPEN_FD};
pub use errno::{Errno, ProcExit};
pub use error::WasiEnvError;
pub use env::WasiEnv;
pub use imports::ImportSurface;
pub use memory::MemoryBridge;
pub use options::{NormalizedOptions, Preopen, WasiOptions};
