//! Environment construction and startup dispatch
//!
//! [`WasiEnv`] owns one environment's state end to end: construction
//! validates and encodes the options, builds the capability table, and
//! wires the memory bridge; `start` resolves the bridge (when deferred)
//! and invokes the guest's entry point exactly once.
//!
//! Construction is all-or-nothing: any validation failure leaves no
//! partially built environment behind.

use crate::backend::{StdioBackend, SyscallBackend};
use crate::buffers::StringBlock;
use crate::capability::CapabilityTable;
use crate::errno::ProcExit;
use crate::error::WasiEnvError;
use crate::imports::ImportSurface;
use crate::memory::MemoryBridge;
use crate::options::WasiOptions;
use std::sync::Arc;
use wasmtime::{AsContextMut, Extern, Instance, Linker};

/// Entry points recognized by the startup dispatcher, in priority order:
/// command modules export `_start`; reactor modules export `_initialize`
/// (current convention) or `__wasi_unstable_reactor_start` (the name early
/// toolchains used). A module exporting none of these is a library and
/// `start` is a no-op.
const ENTRY_POINTS: [&str; 3] = ["_start", "_initialize", "__wasi_unstable_reactor_start"];

/// State shared by every import-surface entry of one environment.
pub(crate) struct EnvState {
    pub(crate) args: StringBlock,
    pub(crate) env: StringBlock,
    pub(crate) capabilities: CapabilityTable,
    pub(crate) memory: MemoryBridge,
    pub(crate) backend: Arc<dyn SyscallBackend>,
}

/// One sandboxed host environment for one guest module.
///
/// Environments constructed from independent options share no mutable
/// state; everything an import can reach hangs off this value. Memory
/// resolution is tracked by the bridge itself; this value only records
/// whether the single start has been consumed.
pub struct WasiEnv {
    state: Arc<EnvState>,
    namespace: String,
    args: Vec<String>,
    env_pairs: Vec<String>,
    started: bool,
}

impl WasiEnv {
    /// Validate the options and build the environment.
    pub fn new(mut options: WasiOptions) -> Result<Self, WasiEnvError> {
        let backend = options
            .take_backend()
            .unwrap_or_else(|| Arc::new(StdioBackend::new()));
        let eager_memory = options.eager_memory();
        let namespace = options.namespace_str().to_string();

        let normalized = options.normalize()?;

        let bridge = MemoryBridge::unresolved();
        if let Some(memory) = eager_memory {
            bridge.resolve(memory)?;
        }

        let state = Arc::new(EnvState {
            args: StringBlock::from_strings(&normalized.args),
            env: StringBlock::from_strings(&normalized.env_pairs),
            capabilities: CapabilityTable::from_preopens(&normalized.preopens),
            memory: bridge,
            backend,
        });

        tracing::debug!(
            args = normalized.args.len(),
            preopens = state.capabilities.len(),
            eager_memory = state.memory.is_resolved(),
            "constructed WASI host environment"
        );

        Ok(Self {
            state,
            namespace,
            args: normalized.args,
            env_pairs: normalized.env_pairs,
            started: false,
        })
    }

    /// Build the bound import surface for this environment. Entries close
    /// over this environment's state only.
    pub fn import_surface<T: 'static>(&self) -> ImportSurface<T> {
        ImportSurface::bind(self.state.clone(), self.namespace.clone())
    }

    /// Convenience: bind the surface and register it on `linker` in one
    /// step.
    pub fn add_to_linker<T: 'static>(&self, linker: &mut Linker<T>) -> Result<(), WasiEnvError> {
        self.import_surface().add_to_linker(linker)
    }

    /// Resolve the memory bridge (when deferred) and invoke the guest's
    /// entry point at most once.
    ///
    /// Validation failures (missing or mistyped `memory` export, an entry
    /// point with the wrong signature) abort before any guest code runs
    /// and do not consume the start, so retrying with a corrected instance
    /// is fine. Once an entry point has been dispatched — even if it traps
    /// — the environment is terminal and a second call fails with
    /// [`WasiEnvError::AlreadyStarted`].
    pub fn start<T>(
        &mut self,
        mut store: impl AsContextMut<Data = T>,
        instance: &Instance,
    ) -> Result<(), WasiEnvError> {
        if self.started {
            return Err(WasiEnvError::AlreadyStarted);
        }

        if !self.state.memory.is_resolved() {
            let memory = match instance.get_export(&mut store, "memory") {
                Some(Extern::Memory(memory)) => memory,
                Some(other) => {
                    return Err(WasiEnvError::invalid_argument(
                        "instance.exports.memory",
                        "a WebAssembly linear memory",
                        extern_kind(&other),
                    ));
                }
                None => {
                    return Err(WasiEnvError::invalid_argument(
                        "instance.exports.memory",
                        "a WebAssembly linear memory",
                        "no export named 'memory'",
                    ));
                }
            };
            self.state.memory.resolve(memory)?;
        }

        let entry = ENTRY_POINTS
            .iter()
            .find_map(|name| instance.get_func(&mut store, name).map(|f| (*name, f)));

        let Some((name, func)) = entry else {
            self.started = true;
            tracing::debug!("module exports no entry point; start is a no-op");
            return Ok(());
        };

        // Still a validation failure: a mistyped entry point does not
        // consume the start.
        let func = func.typed::<(), ()>(&store).map_err(|_| {
            WasiEnvError::invalid_argument(
                name,
                "a nullary entry point",
                "an export with a different signature",
            )
        })?;

        // Terminal before dispatch: at-most-once holds even when the
        // guest traps mid-run.
        self.started = true;

        tracing::debug!(entry = name, "invoking guest entry point");
        match func.call(&mut store, ()) {
            Ok(()) => Ok(()),
            Err(trap) => match trap.downcast_ref::<ProcExit>().copied() {
                Some(ProcExit(0)) => Ok(()),
                Some(ProcExit(code)) => Err(WasiEnvError::Exited { code }),
                None => Err(WasiEnvError::StartFailed {
                    entry: name,
                    source: trap,
                }),
            },
        }
    }

    /// Guest-visible argv, post-normalization.
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Encoded `KEY=VALUE` environment pairs, post-normalization.
    pub fn env_pairs(&self) -> &[String] {
        &self.env_pairs
    }

    /// The environment's capability table.
    pub fn capabilities(&self) -> &CapabilityTable {
        &self.state.capabilities
    }

    /// The namespace the import surface registers under.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Whether this environment already dispatched its entry point.
    pub fn started(&self) -> bool {
        self.started
    }
}

fn extern_kind(ext: &Extern) -> &'static str {
    match ext {
        Extern::Func(_) => "a function export",
        Extern::Global(_) => "a global export",
        Extern::Table(_) => "a table export",
        Extern::Memory(_) => "a memory export",
        _ => "an export of another kind",
    }
}
