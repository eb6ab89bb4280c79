//! The hookr host module: the wire protocol over guest linear memory.
//!
//! Nine functions are exported to the guest under the `hookr` import
//! namespace. All pointer/length parameters are `i32` offsets into the
//! *guest's* linear memory; the buffers belong to the guest and the host only
//! copies bytes in and out. Each import recovers the in-flight
//! [`InvokeContext`] from the store data — when none is attached (nothing is
//! being invoked) the imports write nothing and return zero, so the module
//! can be exercised in isolation.
//!
//! A bounds violation inside any import is fatal to the current invocation:
//! the resulting error traps the guest call, and [`Engine::invoke`] surfaces
//! it to the caller.

use wasmtime::{Caller, Extern, Linker, Memory};

use crate::config::LogFn;
use crate::error::Error;
use crate::host_fn::{CallFns, CallHandler};
use crate::invoke::{CallContext, CancelToken, InvokeContext};
use crate::memory::{self, u32_from_usize};

/// Import namespace the guest links against.
pub(crate) const HOOKR_MODULE: &str = "hookr";

/// Store data backing one engine: the WASI context, the host-function
/// registry, and the per-call invocation slot.
pub(crate) struct HostState {
    pub(crate) wasi: wasmtime_wasi::preview1::WasiP1Ctx,
    pub(crate) logger: LogFn,
    pub(crate) call_handler: Option<CallHandler>,
    pub(crate) host_fns: CallFns,
    pub(crate) invoke: Option<InvokeContext>,
    pub(crate) cancel: CancelToken,
}

/// Register the hookr wire-protocol imports on `linker`.
pub(crate) fn add_to_linker(linker: &mut Linker<HostState>) -> wasmtime::Result<()> {
    linker.func_wrap(HOOKR_MODULE, "__plugin_request", plugin_request)?;
    linker.func_wrap(HOOKR_MODULE, "__plugin_response", plugin_response)?;
    linker.func_wrap(HOOKR_MODULE, "__plugin_error", plugin_error)?;
    linker.func_wrap(HOOKR_MODULE, "__host_call", host_call)?;
    linker.func_wrap(HOOKR_MODULE, "__host_response_len", host_response_len)?;
    linker.func_wrap(HOOKR_MODULE, "__host_response", host_response)?;
    linker.func_wrap(HOOKR_MODULE, "__host_error_len", host_error_len)?;
    linker.func_wrap(HOOKR_MODULE, "__host_error", host_error)?;
    linker.func_wrap(HOOKR_MODULE, "__log", log)?;
    Ok(())
}

/// The guest's exported linear memory, or a trap if it exports none.
fn guest_memory(caller: &mut Caller<'_, HostState>) -> wasmtime::Result<Memory> {
    match caller.get_export("memory") {
        Some(Extern::Memory(mem)) => Ok(mem),
        _ => Err(Error::Internal("guest module does not export memory".into()).into()),
    }
}

/// `__plugin_request(op_ptr, req_ptr)`: write the current operation string
/// and request payload into guest buffers of the lengths announced through
/// the `__plugin_call` parameters.
fn plugin_request(
    mut caller: Caller<'_, HostState>,
    op_ptr: i32,
    req_ptr: i32,
) -> wasmtime::Result<()> {
    let mem = guest_memory(&mut caller)?;
    let (data, state) = mem.data_and_store_mut(&mut caller);
    let ic = match state.invoke.as_ref() {
        Some(ic) => ic,
        None => return Ok(()),
    };
    if !ic.operation.is_empty() {
        memory::write_bytes(data, "operation", op_ptr as u32, ic.operation.as_bytes())?;
    }
    if !ic.plugin_req.is_empty() {
        memory::write_bytes(data, "plugin request", req_ptr as u32, &ic.plugin_req)?;
    }
    Ok(())
}

/// `__plugin_response(ptr, len)`: the guest hands back its response bytes.
fn plugin_response(
    mut caller: Caller<'_, HostState>,
    ptr: i32,
    len: i32,
) -> wasmtime::Result<()> {
    let mem = guest_memory(&mut caller)?;
    let (data, state) = mem.data_and_store_mut(&mut caller);
    let ic = match state.invoke.as_mut() {
        Some(ic) => ic,
        None => return Ok(()),
    };
    ic.plugin_resp = memory::read_bytes(data, "plugin response", ptr as u32, len as u32)?;
    Ok(())
}

/// `__plugin_error(ptr, len)`: the guest reports a textual error.
fn plugin_error(mut caller: Caller<'_, HostState>, ptr: i32, len: i32) -> wasmtime::Result<()> {
    let mem = guest_memory(&mut caller)?;
    let (data, state) = mem.data_and_store_mut(&mut caller);
    let ic = match state.invoke.as_mut() {
        Some(ic) => ic,
        None => return Ok(()),
    };
    ic.plugin_err = memory::read_string(data, "plugin error", ptr as u32, len as u32)?;
    Ok(())
}

/// `__host_call(op_ptr, op_len, pl_ptr, pl_len) -> i32`: the guest invokes a
/// host function. Returns 1 on success, 0 on failure; the outcome is
/// retrievable through the `__host_response*` / `__host_error*` imports and
/// persists until the next `__host_call`.
fn host_call(
    mut caller: Caller<'_, HostState>,
    op_ptr: i32,
    op_len: i32,
    pl_ptr: i32,
    pl_len: i32,
) -> wasmtime::Result<i32> {
    let mem = guest_memory(&mut caller)?;
    let (data, state) = mem.data_and_store_mut(&mut caller);
    if state.invoke.is_none() {
        return Ok(0);
    }

    let operation = memory::read_string(data, "operation", op_ptr as u32, op_len as u32)?;
    let payload = memory::read_bytes(data, "host payload", pl_ptr as u32, pl_len as u32)?;

    enum Target {
        Handler(CallHandler),
        Registered(crate::host_fn::CallFn),
    }

    let target = match state.call_handler.as_ref() {
        Some(handler) => Some(Target::Handler(handler.clone())),
        None => state.host_fns.get(&operation).cloned().map(Target::Registered),
    };
    let token = state.cancel.clone();

    let ic = match state.invoke.as_mut() {
        Some(ic) => ic,
        None => return Ok(0),
    };
    ic.begin_host_call();

    let outcome = match target {
        None => Err(format!("no handler registered for operation '{operation}'")),
        Some(_) if token.is_cancelled() => Err("invocation cancelled".to_string()),
        Some(target) => {
            let ctx = CallContext {
                operation: &operation,
                cancel: token,
            };
            let result = match target {
                Target::Handler(handler) => handler(&ctx, &operation, &payload),
                Target::Registered(func) => func(&ctx, &payload),
            };
            result.map_err(|err| err.to_string())
        }
    };

    match outcome {
        Ok(resp) => {
            ic.host_resp = resp;
            Ok(1)
        }
        Err(msg) => {
            ic.host_err = msg;
            Ok(0)
        }
    }
}

/// `__host_response_len() -> i32`: length of the most recent host response.
fn host_response_len(caller: Caller<'_, HostState>) -> wasmtime::Result<i32> {
    match caller.data().invoke.as_ref() {
        Some(ic) => Ok(u32_from_usize(ic.host_resp.len())? as i32),
        None => Ok(0),
    }
}

/// `__host_response(ptr)`: write the most recent host response at `ptr`.
fn host_response(mut caller: Caller<'_, HostState>, ptr: i32) -> wasmtime::Result<()> {
    let mem = guest_memory(&mut caller)?;
    let (data, state) = mem.data_and_store_mut(&mut caller);
    let ic = match state.invoke.as_ref() {
        Some(ic) => ic,
        None => return Ok(()),
    };
    if !ic.host_resp.is_empty() {
        memory::write_bytes(data, "host response", ptr as u32, &ic.host_resp)?;
    }
    Ok(())
}

/// `__host_error_len() -> i32`: length of the most recent host error string.
fn host_error_len(caller: Caller<'_, HostState>) -> wasmtime::Result<i32> {
    match caller.data().invoke.as_ref() {
        Some(ic) => Ok(u32_from_usize(ic.host_err.len())? as i32),
        None => Ok(0),
    }
}

/// `__host_error(ptr)`: write the most recent host error string at `ptr`.
fn host_error(mut caller: Caller<'_, HostState>, ptr: i32) -> wasmtime::Result<()> {
    let mem = guest_memory(&mut caller)?;
    let (data, state) = mem.data_and_store_mut(&mut caller);
    let ic = match state.invoke.as_ref() {
        Some(ic) => ic,
        None => return Ok(()),
    };
    if !ic.host_err.is_empty() {
        memory::write_bytes(data, "host error", ptr as u32, ic.host_err.as_bytes())?;
    }
    Ok(())
}

/// `__log(ptr, len)`: forward a UTF-8 message to the configured logger sink.
/// Available to the guest whether or not an invocation is in flight.
fn log(mut caller: Caller<'_, HostState>, ptr: i32, len: i32) -> wasmtime::Result<()> {
    let mem = guest_memory(&mut caller)?;
    let (data, state) = mem.data_and_store_mut(&mut caller);
    let msg = memory::read_string(data, "log message", ptr as u32, len as u32)?;
    (state.logger)(&msg);
    Ok(())
}
