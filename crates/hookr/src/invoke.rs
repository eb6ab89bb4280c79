//! Per-invocation state shared between the engine and the hookr imports.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Scratchpad for a single guest call.
///
/// Created by [`Engine::invoke`](crate::Engine::invoke), installed into the
/// store for the duration of one `__plugin_call`, and taken back out when the
/// call returns. Every hookr import recovers it from the store data; when no
/// invocation is in flight the imports behave as no-ops, which keeps the host
/// module testable in isolation.
///
/// `plugin_resp` and `plugin_err` are written by the guest and are mutually
/// exclusive on a successful frame. `host_resp` and `host_err` reflect only
/// the most recent nested host call; they are cleared at the start of each
/// `__host_call`.
#[derive(Debug, Clone, Default)]
pub(crate) struct InvokeContext {
    /// Operation the host is invoking on the guest.
    pub(crate) operation: String,
    /// Payload the host is sending to the guest.
    pub(crate) plugin_req: Vec<u8>,
    /// Payload the guest returned through `__plugin_response`.
    pub(crate) plugin_resp: Vec<u8>,
    /// Error string the guest reported through `__plugin_error`.
    pub(crate) plugin_err: String,
    /// Result of the most recent nested host call.
    pub(crate) host_resp: Vec<u8>,
    /// Error from the most recent nested host call.
    pub(crate) host_err: String,
}

impl InvokeContext {
    pub(crate) fn new(operation: impl Into<String>, payload: &[u8]) -> Self {
        Self {
            operation: operation.into(),
            plugin_req: payload.to_vec(),
            ..Self::default()
        }
    }

    /// Reset the host-call slots before dispatching a nested host call.
    pub(crate) fn begin_host_call(&mut self) {
        self.host_resp.clear();
        self.host_err.clear();
    }
}

/// Cooperative cancellation signal for in-flight invocations.
///
/// Tokens are cheap to clone and safe to trip from another thread. The guest
/// itself cannot be preempted; cancellation is observed at host/guest
/// boundary crossings — `__host_call` refuses to dispatch once the token is
/// tripped, and host-function handlers can poll it through
/// [`CallContext::is_cancelled`].
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// A fresh, untripped token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Trip the token. Irreversible.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// Whether the token has been tripped.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Call-scoped view handed to host-function handlers.
pub struct CallContext<'a> {
    pub(crate) operation: &'a str,
    pub(crate) cancel: CancelToken,
}

impl CallContext<'_> {
    /// The operation name the guest asked for.
    pub fn operation(&self) -> &str {
        self.operation
    }

    /// Whether the caller has requested cancellation. Long-running handlers
    /// should poll this and bail out early.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
