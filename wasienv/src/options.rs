//! Option normalization
//!
//! Validates and canonicalizes the three inputs that configure a host
//! environment — argument vector, environment mapping, preopen mapping —
//! before anything is granted to the guest. Normalization performs no I/O;
//! it only produces the triple the rest of the environment is built from.
//!
//! Environment entries distinguish *absent* from *explicitly unset*: a key
//! recorded through [`WasiOptions::env_unset`] is remembered on the options
//! object but dropped before encoding, so it never reaches the guest.

use crate::backend::SyscallBackend;
use crate::error::WasiEnvError;
use crate::imports::SNAPSHOT_PREVIEW1;
use std::sync::Arc;
use wasmtime::Memory;

/// One declared preopen: a guest-visible path mapped to a host-visible path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Preopen {
    /// Path the guest sees (e.g. `/sandbox`).
    pub guest: String,
    /// Path on the host filesystem the syscall backend resolves against.
    pub host: String,
}

/// Construction input for a [`crate::WasiEnv`].
///
/// # Example
///
/// ```rust,ignore
/// let options = WasiOptions::new()
///     .arg("guest.wasm")
///     .arg("--verbose")
///     .env("LANG", "C")
///     .env_unset("HOME")
///     .preopen("/sandbox", "/srv/guest-data");
/// ```
pub struct WasiOptions {
    args: Vec<String>,
    envs: Vec<(String, Option<String>)>,
    preopens: Vec<(String, String)>,
    memory: Option<Memory>,
    namespace: String,
    backend: Option<Arc<dyn SyscallBackend>>,
}

/// The validated triple produced by [`WasiOptions::normalize`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedOptions {
    /// Guest-visible argv, in declaration order.
    pub args: Vec<String>,
    /// Environment encoded as `KEY=VALUE`, unset entries dropped.
    pub env_pairs: Vec<String>,
    /// Preopens in declaration order. Order is load-bearing: descriptor
    /// assignment follows it.
    pub preopens: Vec<Preopen>,
}

impl WasiOptions {
    pub fn new() -> Self {
        Self {
            args: Vec::new(),
            envs: Vec::new(),
            preopens: Vec::new(),
            memory: None,
            namespace: SNAPSHOT_PREVIEW1.to_string(),
            backend: None,
        }
    }

    /// Append one guest argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append a sequence of guest arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set an environment variable for the guest.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), Some(value.into())));
        self
    }

    /// Record a key with the unset sentinel. The pair is dropped before
    /// encoding and never appears in the guest's environment.
    pub fn env_unset(mut self, key: impl Into<String>) -> Self {
        self.envs.push((key.into(), None));
        self
    }

    /// Grant the guest a directory capability: `guest` is the path the
    /// guest addresses, `host` the directory it resolves to.
    pub fn preopen(mut self, guest: impl Into<String>, host: impl Into<String>) -> Self {
        self.preopens.push((guest.into(), host.into()));
        self
    }

    /// Supply the linear memory eagerly. The import surface is then safe to
    /// invoke as soon as the environment exists; `start` skips the export
    /// lookup.
    pub fn memory(mut self, memory: Memory) -> Self {
        self.memory = Some(memory);
        self
    }

    /// Override the import namespace (default
    /// [`SNAPSHOT_PREVIEW1`]; older toolchains expect
    /// [`crate::imports::UNSTABLE`]).
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Install a syscall backend. Defaults to [`crate::StdioBackend`],
    /// which grants nothing beyond the standard streams.
    pub fn backend(mut self, backend: Arc<dyn SyscallBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// The recorded environment entries, unset sentinels included.
    pub fn env_entries(&self) -> &[(String, Option<String>)] {
        &self.envs
    }

    /// Validate and canonicalize into the normalized triple.
    ///
    /// Fails with [`WasiEnvError::InvalidArgument`] naming the offending
    /// field; on failure nothing has been granted.
    pub fn normalize(&self) -> Result<NormalizedOptions, WasiEnvError> {
        for arg in &self.args {
            reject_nul("options.args", arg)?;
        }

        let mut env_pairs = Vec::new();
        for (key, value) in &self.envs {
            let Some(value) = value else {
                continue; // unset sentinel: dropped before encoding
            };
            if key.is_empty() {
                return Err(WasiEnvError::invalid_argument(
                    "options.env",
                    "a non-empty variable name",
                    "\"\"",
                ));
            }
            if key.contains('=') {
                return Err(WasiEnvError::invalid_argument(
                    "options.env",
                    "a variable name without '='",
                    format!("{key:?}"),
                ));
            }
            reject_nul("options.env", key)?;
            reject_nul("options.env", value)?;
            env_pairs.push(format!("{key}={value}"));
        }

        let mut preopens = Vec::new();
        for (guest, host) in &self.preopens {
            if guest.is_empty() {
                return Err(WasiEnvError::invalid_argument(
                    "options.preopens",
                    "a non-empty guest path",
                    "\"\"",
                ));
            }
            reject_nul("options.preopens", guest)?;
            reject_nul("options.preopens", host)?;
            preopens.push(Preopen {
                guest: guest.clone(),
                host: host.clone(),
            });
        }

        // Encoded blocks are addressed with 32-bit guest pointers.
        block_fits("options.args", &self.args)?;
        block_fits("options.env", &env_pairs)?;

        tracing::debug!(
            args = self.args.len(),
            env_pairs = env_pairs.len(),
            preopens = preopens.len(),
            "normalized WASI host options"
        );

        Ok(NormalizedOptions {
            args: self.args.clone(),
            env_pairs,
            preopens,
        })
    }

    pub(crate) fn eager_memory(&self) -> Option<Memory> {
        self.memory
    }

    pub(crate) fn namespace_str(&self) -> &str {
        &self.namespace
    }

    pub(crate) fn take_backend(&mut self) -> Option<Arc<dyn SyscallBackend>> {
        self.backend.take()
    }
}

impl Default for WasiOptions {
    fn default() -> Self {
        Self::new()
    }
}

fn reject_nul(field: &'static str, value: &str) -> Result<(), WasiEnvError> {
    if value.as_bytes().contains(&0) {
        return Err(WasiEnvError::invalid_argument(
            field,
            "a string without interior NUL bytes",
            format!("{value:?}"),
        ));
    }
    Ok(())
}

/// The NUL-terminated block plus its u32 pointer list must be addressable
/// in 32-bit guest memory.
fn block_fits(field: &'static str, strings: &[String]) -> Result<(), WasiEnvError> {
    let bytes: u64 = strings.iter().map(|s| s.len() as u64 + 1).sum();
    let list = strings.len() as u64 * 4;
    if bytes > u32::MAX as u64 || list > u32::MAX as u64 {
        return Err(WasiEnvError::invalid_argument(
            field,
            "an encoded block addressable with 32-bit guest pointers",
            format!("{bytes} bytes across {} entries", strings.len()),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_options_normalize_to_empty_triple() {
        let normalized = WasiOptions::new().normalize().unwrap();
        assert!(normalized.args.is_empty());
        assert!(normalized.env_pairs.is_empty());
        assert!(normalized.preopens.is_empty());
    }

    #[test]
    fn args_keep_declaration_order() {
        let normalized = WasiOptions::new()
            .arg("guest.wasm")
            .args(["--a", "--b"])
            .normalize()
            .unwrap();
        assert_eq!(normalized.args, vec!["guest.wasm", "--a", "--b"]);
    }

    #[test]
    fn env_encodes_key_value_pairs_in_order() {
        let normalized = WasiOptions::new()
            .env("A", "1")
            .env("B", "two=2") // '=' in values is fine
            .normalize()
            .unwrap();
        assert_eq!(normalized.env_pairs, vec!["A=1", "B=two=2"]);
    }

    #[test]
    fn unset_sentinel_is_recorded_but_never_encoded() {
        let options = WasiOptions::new().env("A", "1").env_unset("B");
        assert_eq!(options.env_entries().len(), 2);

        let normalized = options.normalize().unwrap();
        assert_eq!(normalized.env_pairs, vec!["A=1"]);
    }

    #[test]
    fn env_key_with_equals_is_rejected() {
        let err = WasiOptions::new().env("A=B", "x").normalize().unwrap_err();
        assert!(matches!(
            err,
            WasiEnvError::InvalidArgument { field: "options.env", .. }
        ));
    }

    #[test]
    fn empty_env_key_is_rejected() {
        let err = WasiOptions::new().env("", "x").normalize().unwrap_err();
        assert!(err.is_invalid_argument());
    }

    #[test]
    fn interior_nul_is_rejected_everywhere() {
        assert!(WasiOptions::new().arg("a\0b").normalize().is_err());
        assert!(WasiOptions::new().env("K", "a\0b").normalize().is_err());
        assert!(WasiOptions::new().preopen("/a\0", "/b").normalize().is_err());
    }

    #[test]
    fn empty_guest_preopen_path_is_rejected() {
        let err = WasiOptions::new().preopen("", "/host").normalize().unwrap_err();
        assert!(matches!(
            err,
            WasiEnvError::InvalidArgument { field: "options.preopens", .. }
        ));
    }

    #[test]
    fn preopens_keep_declaration_order() {
        let normalized = WasiOptions::new()
            .preopen("/b", "/host/b")
            .preopen("/a", "/host/a")
            .normalize()
            .unwrap();
        assert_eq!(normalized.preopens[0].guest, "/b");
        assert_eq!(normalized.preopens[1].guest, "/a");
    }
}
