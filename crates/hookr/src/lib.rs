//! Embed WebAssembly modules as sandboxed plugins with a bidirectional,
//! type-neutral call protocol between host and guest.
//!
//! A [`Plugin`] loads a `.wasm` (or `.wat`) file, verifies its digest,
//! compiles and instantiates it on a dedicated wasmtime runtime, and
//! dispatches named operations to the guest's `__plugin_call` export. The
//! guest can call back into host functions registered by the embedder, so a
//! single invocation may bounce host → guest → host → guest through one
//! shared invocation context.
//!
//! # Architecture
//!
//! ```text
//! caller ──▶ PluginFn / PluginFnBytes ──▶ Engine::invoke
//!                                            │  __plugin_call(op_len, pl_len)
//!                                            ▼
//!                                        WASM guest
//!                                            │  hookr imports
//!                 ┌──────────────────────────┼─────────────────────────┐
//!                 ▼                          ▼                         ▼
//!          __plugin_request           __host_call ──▶ registry   __plugin_response
//!          (pull op + payload)        (nested host fn)           / __plugin_error
//! ```
//!
//! # Basic usage
//!
//! ```no_run
//! use hookr::{EngineConfig, FileOptions, Plugin};
//!
//! # fn main() -> hookr::Result<()> {
//! let plugin = Plugin::new(
//!     EngineConfig::new().with_file("./plugin.wasm", FileOptions::new()),
//! )?;
//! let result = plugin.invoke("hello", b"world")?;
//! println!("result: {}", String::from_utf8_lossy(&result));
//! plugin.close()?;
//! # Ok(())
//! # }
//! ```
//!
//! # Integrity verification
//!
//! ```no_run
//! use hookr::{EngineConfig, FileOptions, Plugin, Sha256Hasher};
//!
//! # fn main() -> hookr::Result<()> {
//! let plugin = Plugin::new(EngineConfig::new().with_file(
//!     "./plugin.wasm",
//!     FileOptions::new()
//!         .with_hash("e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855")
//!         .with_hasher(Sha256Hasher),
//! ))?;
//! # plugin.close()?;
//! # Ok(())
//! # }
//! ```
//!
//! # Host functions and typed calls
//!
//! ```no_run
//! use hookr::{EngineConfig, FileOptions, HostFn, MsgPack, Plugin};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Default, Serialize, Deserialize)]
//! struct Greeting {
//!     msg: String,
//! }
//!
//! # fn main() -> hookr::Result<()> {
//! let hello = HostFn::typed("hello", MsgPack, |_ctx, input: Greeting| {
//!     Ok(Greeting {
//!         msg: format!("Hello {}", input.msg),
//!     })
//! });
//! let plugin = Plugin::new(
//!     EngineConfig::new()
//!         .with_file("./plugin.wasm", FileOptions::new())
//!         .with_host_fns([hello]),
//! )?;
//! let echo = plugin.function::<Greeting, Greeting>("echo")?;
//! let reply = echo.call(&Greeting { msg: "Steve".into() })?;
//! println!("{}", reply.msg);
//! # Ok(())
//! # }
//! ```
//!
//! # Guest ABI
//!
//! A guest participates by exporting its linear memory under the name
//! `memory` plus the entry point
//! `__plugin_call(operation_len: i32, payload_len: i32) -> i32`, and
//! optionally the start functions `_start`, `_initialize` or `hookr_init`
//! (run once at instantiation, in that order). Within `__plugin_call` the
//! guest allocates buffers of the two announced lengths, fills them with
//! `hookr.__plugin_request`, dispatches on the operation name, and finishes
//! with either `hookr.__plugin_response` (returning 1) or
//! `hookr.__plugin_error` (returning 0). Nested host calls go through
//! `hookr.__host_call`; the outcome is fetched with
//! `hookr.__host_response_len`/`__host_response` on success or
//! `hookr.__host_error_len`/`__host_error` on failure. `hookr.__log`
//! forwards a UTF-8 message to the host logger. How the guest manages its
//! own linear memory is invisible to the host.

mod codec;
mod config;
mod engine;
mod error;
mod file;
mod host_fn;
mod invoke;
mod memory;
mod module;
mod plugin_fn;

pub use codec::{Codec, Json, MsgPack};
pub use config::{EngineConfig, LogFn, RandSource, RuntimeTuning, Stdio};
pub use engine::{Engine, EngineState};
pub use error::{BoxError, CodecError, Error, Result};
pub use file::{FileOptions, Hasher, ModuleFile, NoopHasher, Sha256Hasher};
pub use host_fn::{CallFn, CallHandler, HostFn};
pub use invoke::{CallContext, CancelToken};
pub use plugin_fn::{PluginFn, PluginFnBytes};

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::{Arc, Mutex};

/// A loaded plugin, shareable across threads.
///
/// Wraps an [`Engine`] behind a mutex: invocations are serialized, one at a
/// time, which is the concurrency contract of the wire protocol. Clones
/// share the same engine; independent plugins run fully in parallel.
#[derive(Clone)]
pub struct Plugin {
    engine: Arc<Mutex<Engine>>,
}

impl Plugin {
    /// Load, verify, compile and instantiate the configured module.
    pub fn new(config: EngineConfig) -> Result<Self> {
        Ok(Self {
            engine: Arc::new(Mutex::new(Engine::new(config)?)),
        })
    }

    /// Invoke a guest operation with a raw byte payload.
    pub fn invoke(&self, operation: &str, payload: &[u8]) -> Result<Vec<u8>> {
        self.lock()?.invoke(operation, payload)
    }

    /// Close the underlying engine. Idempotent.
    pub fn close(&self) -> Result<()> {
        self.lock()?.close()
    }

    /// Register a byte-level host function; overwrites an existing handler
    /// under the same name.
    pub fn register_function<F>(&self, name: impl Into<String>, func: F) -> Result<()>
    where
        F: Fn(&CallContext<'_>, &[u8]) -> std::result::Result<Vec<u8>, BoxError>
            + Send
            + Sync
            + 'static,
    {
        self.lock()?.register_function(name, func);
        Ok(())
    }

    /// Register a prepared [`HostFn`] (raw or typed).
    pub fn register(&self, host_fn: HostFn) -> Result<()> {
        self.lock()?.register(host_fn);
        Ok(())
    }

    /// A typed function bound to a guest operation, using the reference
    /// MessagePack codec.
    pub fn function<In, Out>(&self, name: impl Into<String>) -> Result<PluginFn<In, Out>>
    where
        In: Serialize,
        Out: DeserializeOwned + Default,
    {
        PluginFn::new(self.engine.clone(), name, MsgPack)
    }

    /// A typed function using a caller-supplied codec.
    pub fn function_with<In, Out, C>(
        &self,
        name: impl Into<String>,
        codec: C,
    ) -> Result<PluginFn<In, Out, C>>
    where
        In: Serialize,
        Out: DeserializeOwned + Default,
        C: Codec,
    {
        PluginFn::new(self.engine.clone(), name, codec)
    }

    /// A raw byte-level function bound to a guest operation.
    pub fn function_bytes(&self, name: impl Into<String>) -> Result<PluginFnBytes> {
        PluginFnBytes::new(self.engine.clone(), name)
    }

    /// Cancellation token shared with in-flight invocations.
    pub fn cancel_token(&self) -> Result<CancelToken> {
        Ok(self.lock()?.cancel_token())
    }

    /// Size of the guest's linear memory in bytes.
    pub fn memory_size(&self) -> Result<usize> {
        Ok(self.lock()?.memory_size())
    }

    /// Current lifecycle state of the engine.
    pub fn state(&self) -> Result<EngineState> {
        Ok(self.lock()?.state())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Engine>> {
        self.engine
            .lock()
            .map_err(|_| Error::Internal("engine lock poisoned".into()))
    }
}

impl std::fmt::Debug for Plugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.engine.lock() {
            Ok(engine) => engine.fmt(f),
            Err(_) => f.write_str("Plugin(poisoned)"),
        }
    }
}
