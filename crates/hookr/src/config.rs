//! Engine configuration.
//!
//! [`EngineConfig`] is a consuming builder: options apply in declaration
//! order and later options override earlier ones for the same field, except
//! [`with_host_fns`](EngineConfig::with_host_fns), which appends.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::SeedableRng;
use wasmtime_wasi::pipe::MemoryOutputPipe;
use wasmtime_wasi::preview1::WasiP1Ctx;
use wasmtime_wasi::WasiCtxBuilder;

use crate::file::FileOptions;
use crate::host_fn::{CallHandler, HostFn};
use crate::invoke::CallContext;
use crate::error::BoxError;

/// Sink for guest `__log` messages.
pub type LogFn = Arc<dyn Fn(&str) + Send + Sync>;

/// Hook applied to the underlying `wasmtime::Config` before the runtime is
/// built, for callers that need to tune the engine beyond these options.
pub type RuntimeTuning = Arc<dyn Fn(&mut wasmtime::Config) + Send + Sync>;

/// Where a guest output stream goes.
#[derive(Clone, Default)]
pub enum Stdio {
    /// Forward to the host process stream.
    #[default]
    Inherit,
    /// Drop all output.
    Discard,
    /// Capture into an in-memory pipe the host can read back.
    Pipe(MemoryOutputPipe),
}

impl std::fmt::Debug for Stdio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stdio::Inherit => f.write_str("Inherit"),
            Stdio::Discard => f.write_str("Discard"),
            Stdio::Pipe(_) => f.write_str("Pipe"),
        }
    }
}

/// Source of guest-visible randomness.
#[derive(Debug, Clone, Copy, Default)]
pub enum RandSource {
    /// Operating-system entropy.
    #[default]
    Os,
    /// Deterministic stream from a fixed seed. Useful for reproducing guest
    /// behavior in tests.
    Seed(u64),
}

/// Options captured into the engine at construction time.
pub struct EngineConfig {
    pub(crate) file: Option<(PathBuf, FileOptions)>,
    pub(crate) module_name: Option<String>,
    pub(crate) logger: LogFn,
    pub(crate) stdout: Stdio,
    pub(crate) stderr: Stdio,
    pub(crate) rand: RandSource,
    pub(crate) call_handler: Option<CallHandler>,
    pub(crate) host_fns: Vec<HostFn>,
    pub(crate) call_deadline: Option<Duration>,
    pub(crate) tuning: Option<RuntimeTuning>,
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// The Wasm module to load, with its verification options.
    pub fn with_file(mut self, path: impl Into<PathBuf>, opts: FileOptions) -> Self {
        self.file = Some((path.into(), opts));
        self
    }

    /// Name used for the guest module in diagnostics. Defaults to the file
    /// stem of the module path.
    pub fn with_module_name(mut self, name: impl Into<String>) -> Self {
        self.module_name = Some(name.into());
        self
    }

    /// Sink for guest `__log` messages. The default forwards to `tracing`
    /// at info level.
    pub fn with_logger(mut self, logger: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.logger = Arc::new(logger);
        self
    }

    /// Guest stdout destination.
    pub fn with_stdout(mut self, stdout: Stdio) -> Self {
        self.stdout = stdout;
        self
    }

    /// Guest stderr destination.
    pub fn with_stderr(mut self, stderr: Stdio) -> Self {
        self.stderr = stderr;
        self
    }

    /// Source of guest-visible randomness.
    pub fn with_rand_source(mut self, rand: RandSource) -> Self {
        self.rand = rand;
        self
    }

    /// Catch-all host-call handler. When set, it receives every `__host_call`
    /// and the registry is not consulted.
    pub fn with_call_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&CallContext<'_>, &str, &[u8]) -> std::result::Result<Vec<u8>, BoxError>
            + Send
            + Sync
            + 'static,
    {
        self.call_handler = Some(Arc::new(handler));
        self
    }

    /// Host functions callable from the guest. Appends; duplicate names
    /// overwrite at registration time.
    pub fn with_host_fns(mut self, fns: impl IntoIterator<Item = HostFn>) -> Self {
        self.host_fns.extend(fns);
        self
    }

    /// Wall-clock budget for a single guest call. When set, the runtime is
    /// built with epoch interruption and a background ticker, and calls
    /// exceeding the budget trap.
    pub fn with_call_deadline(mut self, deadline: Duration) -> Self {
        self.call_deadline = Some(deadline);
        self
    }

    /// Escape hatch over the underlying runtime configuration.
    pub fn with_runtime_tuning(
        mut self,
        tuning: impl Fn(&mut wasmtime::Config) + Send + Sync + 'static,
    ) -> Self {
        self.tuning = Some(Arc::new(tuning));
        self
    }

    /// Build the WASI context from the stdio and randomness options,
    /// consuming the captured pipes.
    pub(crate) fn take_wasi(&mut self) -> WasiP1Ctx {
        let mut builder = WasiCtxBuilder::new();
        match std::mem::take(&mut self.stdout) {
            Stdio::Inherit => {
                builder.inherit_stdout();
            }
            Stdio::Discard => {}
            Stdio::Pipe(pipe) => {
                builder.stdout(pipe);
            }
        }
        match std::mem::take(&mut self.stderr) {
            Stdio::Inherit => {
                builder.inherit_stderr();
            }
            Stdio::Discard => {}
            Stdio::Pipe(pipe) => {
                builder.stderr(pipe);
            }
        }
        if let RandSource::Seed(seed) = self.rand {
            builder.secure_random(StdRng::seed_from_u64(seed));
        }
        builder.build_p1()
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            file: None,
            module_name: None,
            logger: Arc::new(|msg: &str| tracing::info!(target: "hookr::guest", "{msg}")),
            stdout: Stdio::Inherit,
            stderr: Stdio::Inherit,
            rand: RandSource::Os,
            call_handler: None,
            host_fns: Vec::new(),
            call_deadline: None,
            tuning: None,
        }
    }
}

impl std::fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineConfig")
            .field("file", &self.file)
            .field("module_name", &self.module_name)
            .field("has_call_handler", &self.call_handler.is_some())
            .field("host_fns", &self.host_fns.len())
            .field("call_deadline", &self.call_deadline)
            .finish_non_exhaustive()
    }
}
