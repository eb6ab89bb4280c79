//! The runtime engine: lifecycle, invocation, teardown.
//!
//! An [`Engine`] owns one Wasm runtime, one compiled module, and one live
//! instance. Construction walks a one-way state machine:
//!
//! ```text
//! Fresh -> RuntimeReady -> HookrReady -> Compiled -> Instantiated -> Closed
//! ```
//!
//! [`Engine::new`] performs the full chain; any stage failure releases the
//! resources acquired so far. After `Instantiated` the engine dispatches
//! [`invoke`](Engine::invoke) calls to the guest's `__plugin_call` export,
//! one at a time, until [`close`](Engine::close) retires it. `Closed` is
//! terminal.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{debug, info};
use wasmtime::{Instance, Linker, Module, Store, TypedFunc};

use crate::config::{EngineConfig, RuntimeTuning};
use crate::error::{BoxError, Error, Result};
use crate::file::ModuleFile;
use crate::host_fn::HostFn;
use crate::invoke::{CallContext, CancelToken, InvokeContext};
use crate::memory::u32_from_usize;
use crate::module::{self, HostState};

/// Entry point every guest must export:
/// `__plugin_call(operation_len: i32, payload_len: i32) -> i32`.
const PLUGIN_CALL_FN: &str = "__plugin_call";

/// Start functions called in order during instantiation, when exported.
/// `_start` is the WASI command entry point, `_initialize` the WASI reactor
/// entry point, and `hookr_init` the protocol-specific initializer.
const START_FUNCTIONS: [&str; 3] = ["_start", "_initialize", "hookr_init"];

/// Epoch ticker resolution. Call deadlines are rounded up to this grain.
const EPOCH_TICK: Duration = Duration::from_millis(10);

/// Lifecycle states of an [`Engine`]. Transitions are one-way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Options captured, nothing acquired yet.
    Fresh,
    /// The Wasm runtime and store exist.
    RuntimeReady,
    /// The hookr host module and WASI are registered.
    HookrReady,
    /// The guest module compiled successfully.
    Compiled,
    /// The guest is live and `__plugin_call` is resolved.
    Instantiated,
    /// Terminal. All runtime resources released.
    Closed,
}

/// Background thread driving the runtime epoch for call deadlines.
struct EpochTicker {
    stop: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl EpochTicker {
    fn start(runtime: wasmtime::Engine) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();
        let handle = thread::spawn(move || {
            while !stop_flag.load(Ordering::Relaxed) {
                thread::sleep(EPOCH_TICK);
                runtime.increment_epoch();
            }
        });
        Self {
            stop,
            handle: Some(handle),
        }
    }

    fn stop(mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for EpochTicker {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}

/// Deadline expressed in epoch ticks, rounded up.
fn deadline_ticks(deadline: Duration) -> u64 {
    (deadline.as_millis() as u64 / EPOCH_TICK.as_millis() as u64).saturating_add(1)
}

/// A single loaded Wasm plugin and the runtime hosting it.
///
/// An engine must not be entered concurrently; the shareable
/// [`Plugin`](crate::Plugin) wrapper serializes access behind a mutex.
/// Distinct engines are fully independent and may run in parallel.
pub struct Engine {
    state: EngineState,
    module_name: String,
    file: Option<ModuleFile>,
    setup: Option<EngineConfig>,
    tuning: Option<RuntimeTuning>,
    call_deadline: Option<Duration>,
    runtime: Option<wasmtime::Engine>,
    store: Option<Store<HostState>>,
    linker: Option<Linker<HostState>>,
    module: Option<Module>,
    instance: Option<Instance>,
    plugin_call: Option<TypedFunc<(i32, i32), i32>>,
    cancel: CancelToken,
    ticker: Option<EpochTicker>,
}

impl Engine {
    /// Load, verify, compile and instantiate the configured module,
    /// returning a ready engine.
    pub fn new(config: EngineConfig) -> Result<Self> {
        let mut engine = Self::from_config(config)?;
        engine.init_runtime()?;
        engine.init_hookr()?;
        engine.compile()?;
        engine.instantiate()?;
        Ok(engine)
    }

    /// Capture options and load the module file. The engine is `Fresh`
    /// afterwards: nothing from the Wasm runtime has been acquired.
    fn from_config(mut config: EngineConfig) -> Result<Self> {
        let (path, opts) = config
            .file
            .take()
            .ok_or_else(|| Error::Config("a module file is required".into()))?;
        let file = ModuleFile::load(path, opts)?;
        let module_name = config
            .module_name
            .take()
            .unwrap_or_else(|| file.name());
        let tuning = config.tuning.take();
        let call_deadline = config.call_deadline;
        Ok(Self {
            state: EngineState::Fresh,
            module_name,
            file: Some(file),
            setup: Some(config),
            tuning,
            call_deadline,
            runtime: None,
            store: None,
            linker: None,
            module: None,
            instance: None,
            plugin_call: None,
            cancel: CancelToken::new(),
            ticker: None,
        })
    }

    /// Build the Wasm runtime and its store.
    fn init_runtime(&mut self) -> Result<()> {
        if self.state != EngineState::Fresh {
            return Err(Error::Config(format!(
                "runtime already initialized (state: {:?})",
                self.state
            )));
        }
        let mut setup = self
            .setup
            .take()
            .ok_or_else(|| Error::Internal("engine options already consumed".into()))?;

        let mut cfg = wasmtime::Config::new();
        cfg.epoch_interruption(self.call_deadline.is_some());
        if let Some(tuning) = &self.tuning {
            tuning(&mut cfg);
        }
        let runtime =
            wasmtime::Engine::new(&cfg).map_err(|e| Error::RuntimeInit(format!("{e:#}")))?;

        let mut host_fns = crate::host_fn::CallFns::new();
        for host_fn in setup.host_fns.drain(..) {
            let (name, func) = host_fn.into_parts();
            host_fns.insert(name, func);
        }
        let state = HostState {
            wasi: setup.take_wasi(),
            logger: setup.logger.clone(),
            call_handler: setup.call_handler.take(),
            host_fns,
            invoke: None,
            cancel: self.cancel.clone(),
        };
        let store = Store::new(&runtime, state);

        if self.call_deadline.is_some() {
            self.ticker = Some(EpochTicker::start(runtime.clone()));
        }

        self.runtime = Some(runtime);
        self.store = Some(store);
        self.state = EngineState::RuntimeReady;
        Ok(())
    }

    /// Register WASI and the hookr wire-protocol imports.
    fn init_hookr(&mut self) -> Result<()> {
        if self.state != EngineState::RuntimeReady {
            return Err(Error::Config(format!(
                "runtime not initialized (state: {:?})",
                self.state
            )));
        }
        let runtime = self
            .runtime
            .as_ref()
            .ok_or_else(|| Error::Internal("runtime missing".into()))?;
        let mut linker: Linker<HostState> = Linker::new(runtime);
        wasmtime_wasi::preview1::add_to_linker_sync(&mut linker, |state: &mut HostState| {
            &mut state.wasi
        })
        .map_err(|e| Error::HookrInit(format!("{e:#}")))?;
        module::add_to_linker(&mut linker).map_err(|e| Error::HookrInit(format!("{e:#}")))?;
        self.linker = Some(linker);
        self.state = EngineState::HookrReady;
        Ok(())
    }

    /// Compile the verified module bytes, consuming them.
    fn compile(&mut self) -> Result<()> {
        if self.state != EngineState::HookrReady {
            return Err(Error::Config(format!(
                "host module not initialized (state: {:?})",
                self.state
            )));
        }
        let runtime = self
            .runtime
            .as_ref()
            .ok_or_else(|| Error::Internal("runtime missing".into()))?;
        let file = self
            .file
            .take()
            .ok_or_else(|| Error::Internal("module file already consumed".into()))?;
        let module =
            Module::new(runtime, file.data()).map_err(|e| Error::Compile(format!("{e:#}")))?;
        debug!(
            module = %self.module_name,
            size = file.data().len(),
            "compiled guest module"
        );
        self.module = Some(module);
        self.state = EngineState::Compiled;
        Ok(())
    }

    /// Instantiate the compiled module, run its start functions, and resolve
    /// the `__plugin_call` export.
    fn instantiate(&mut self) -> Result<()> {
        if self.state != EngineState::Compiled {
            return Err(Error::Config(format!(
                "module not compiled (state: {:?})",
                self.state
            )));
        }
        let instance = {
            let linker = self
                .linker
                .as_ref()
                .ok_or_else(|| Error::Internal("linker missing".into()))?;
            let module = self
                .module
                .as_ref()
                .ok_or_else(|| Error::Internal("module missing".into()))?;
            let store = self
                .store
                .as_mut()
                .ok_or_else(|| Error::Internal("store missing".into()))?;
            // arm the deadline for the module's start section
            if let Some(deadline) = self.call_deadline {
                store.set_epoch_deadline(deadline_ticks(deadline));
            }
            linker
                .instantiate(&mut *store, module)
                .map_err(|e| Error::Instantiate(format!("{e:#}")))?
        };
        self.instance = Some(instance);

        if let Err(err) = self.run_start_functions() {
            let _ = self.close();
            return Err(err);
        }

        let store = self
            .store
            .as_mut()
            .ok_or_else(|| Error::Internal("store missing".into()))?;
        let func = match instance.get_func(&mut *store, PLUGIN_CALL_FN) {
            Some(func) => func,
            None => {
                let err = Error::MissingExport {
                    module: self.module_name.clone(),
                    export: PLUGIN_CALL_FN.into(),
                };
                let _ = self.close();
                return Err(err);
            }
        };
        let plugin_call = match func.typed::<(i32, i32), i32>(&*store) {
            Ok(typed) => typed,
            Err(e) => {
                let err = Error::Instantiate(format!(
                    "{PLUGIN_CALL_FN} has the wrong signature: {e:#}"
                ));
                let _ = self.close();
                return Err(err);
            }
        };
        self.plugin_call = Some(plugin_call);
        self.state = EngineState::Instantiated;
        info!(module = %self.module_name, "guest module instantiated");
        Ok(())
    }

    /// Call `_start`, `_initialize` and `hookr_init` when exported, each
    /// under a fresh empty invocation context. A nonzero WASI exit code
    /// fails instantiation.
    fn run_start_functions(&mut self) -> Result<()> {
        let instance = self
            .instance
            .ok_or_else(|| Error::Internal("instance missing".into()))?;
        let deadline = self.call_deadline;
        let store = self
            .store
            .as_mut()
            .ok_or_else(|| Error::Internal("store missing".into()))?;
        for name in START_FUNCTIONS {
            let func = match instance.get_func(&mut *store, name) {
                Some(func) => func,
                None => continue,
            };
            if let Some(deadline) = deadline {
                store.set_epoch_deadline(deadline_ticks(deadline));
            }
            store.data_mut().invoke = Some(InvokeContext::default());
            let result = func.call(&mut *store, &[], &mut []);
            store.data_mut().invoke = None;
            if let Err(err) = result {
                match err.downcast_ref::<wasmtime_wasi::I32Exit>() {
                    Some(exit) if exit.0 != 0 => return Err(Error::GuestStart(exit.0)),
                    Some(_) => {}
                    None => {
                        return Err(Error::Instantiate(format!(
                            "error calling {name}: {err:#}"
                        )))
                    }
                }
            }
        }
        Ok(())
    }

    /// Invoke `operation` on the guest with `payload`, returning the guest's
    /// response bytes.
    ///
    /// The guest pulls its arguments through `__plugin_request`, does its
    /// work (possibly calling back into registered host functions), and
    /// reports the outcome through `__plugin_response` or `__plugin_error`.
    pub fn invoke(&mut self, operation: &str, payload: &[u8]) -> Result<Vec<u8>> {
        if self.state != EngineState::Instantiated {
            return Err(Error::Config(format!(
                "plugin not initialized (state: {:?})",
                self.state
            )));
        }
        if self.cancel.is_cancelled() {
            return Err(Error::Invoke {
                operation: operation.to_string(),
                reason: "invocation cancelled".into(),
            });
        }
        let op_len = u32_from_usize(operation.len())? as i32;
        let payload_len = u32_from_usize(payload.len())? as i32;
        let plugin_call = self
            .plugin_call
            .clone()
            .ok_or_else(|| Error::Internal("plugin entry point missing".into()))?;
        let deadline = self.call_deadline;
        let store = self
            .store
            .as_mut()
            .ok_or_else(|| Error::Internal("store missing".into()))?;

        if let Some(deadline) = deadline {
            store.set_epoch_deadline(deadline_ticks(deadline));
        }
        store.data_mut().invoke = Some(InvokeContext::new(operation, payload));
        let call_result = plugin_call.call(&mut *store, (op_len, payload_len));
        let ic = store.data_mut().invoke.take().unwrap_or_default();

        let code = match call_result {
            Ok(code) => code,
            Err(err) => {
                return Err(Error::Invoke {
                    operation: operation.to_string(),
                    reason: format!("{err:#}"),
                })
            }
        };
        if code == 1 {
            return Ok(ic.plugin_resp);
        }
        if !ic.plugin_err.is_empty() {
            return Err(Error::PluginFailure(ic.plugin_err));
        }
        Err(Error::UnsuccessfulCall(operation.to_string()))
    }

    /// Register a byte-level host function. Overwrites any previous handler
    /// under the same name.
    pub fn register_function<F>(&mut self, name: impl Into<String>, func: F)
    where
        F: Fn(&CallContext<'_>, &[u8]) -> std::result::Result<Vec<u8>, BoxError>
            + Send
            + Sync
            + 'static,
    {
        self.register(HostFn::raw(name, func));
    }

    /// Register a prepared [`HostFn`] (raw or typed).
    pub fn register(&mut self, host_fn: HostFn) {
        if let Some(store) = self.store.as_mut() {
            let (name, func) = host_fn.into_parts();
            store.data_mut().host_fns.insert(name, func);
        }
    }

    /// Release the instance, module and runtime. Idempotent; closing an
    /// uninitialized engine is a no-op success.
    pub fn close(&mut self) -> Result<()> {
        if self.state == EngineState::Closed {
            return Ok(());
        }
        self.plugin_call = None;
        self.instance = None;
        self.module = None;
        self.linker = None;
        self.store = None;
        self.runtime = None;
        self.file = None;
        self.setup = None;
        if let Some(ticker) = self.ticker.take() {
            ticker.stop();
        }
        debug!(module = %self.module_name, "engine closed");
        self.state = EngineState::Closed;
        Ok(())
    }

    /// Current lifecycle state.
    pub fn state(&self) -> EngineState {
        self.state
    }

    /// Cancellation token for in-flight invocations on this engine.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Size of the guest's linear memory in bytes, or 0 before
    /// instantiation.
    pub fn memory_size(&mut self) -> usize {
        let instance = match self.instance {
            Some(instance) => instance,
            None => return 0,
        };
        let store = match self.store.as_mut() {
            Some(store) => store,
            None => return 0,
        };
        instance
            .get_memory(&mut *store, "memory")
            .map(|mem| mem.data_size(&*store))
            .unwrap_or(0)
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("module", &self.module_name)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}
