//! Host functions callable from the guest.
//!
//! The engine keeps a registry mapping operation names to handlers; the
//! guest reaches them through the `__host_call` import. Handlers work on raw
//! bytes — [`HostFn::typed`] layers a [`Codec`] on top so application code
//! can register plain typed functions.

use std::collections::HashMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::codec::Codec;
use crate::error::BoxError;
use crate::invoke::CallContext;

/// A byte-level host-function handler.
pub type CallFn =
    Arc<dyn Fn(&CallContext<'_>, &[u8]) -> std::result::Result<Vec<u8>, BoxError> + Send + Sync>;

/// Catch-all handler consulted before the registry. Receives the operation
/// name alongside the payload.
pub type CallHandler = Arc<
    dyn Fn(&CallContext<'_>, &str, &[u8]) -> std::result::Result<Vec<u8>, BoxError> + Send + Sync,
>;

/// Registry storage: operation name to handler, last registration wins.
pub(crate) type CallFns = HashMap<String, CallFn>;

/// A named host function ready for registration.
pub struct HostFn {
    name: String,
    func: CallFn,
}

impl HostFn {
    /// A handler over raw byte payloads.
    pub fn raw<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&CallContext<'_>, &[u8]) -> std::result::Result<Vec<u8>, BoxError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            name: name.into(),
            func: Arc::new(func),
        }
    }

    /// A typed handler adapted onto the byte channel through `codec`.
    ///
    /// The payload is unmarshalled into `In` before the handler runs and the
    /// result is marshalled back to bytes; a codec failure on either side is
    /// reported to the guest as a host error like any other handler failure.
    pub fn typed<C, In, Out, F>(name: impl Into<String>, codec: C, func: F) -> Self
    where
        C: Codec + Send + Sync + 'static,
        In: DeserializeOwned,
        Out: Serialize,
        F: Fn(&CallContext<'_>, In) -> std::result::Result<Out, BoxError> + Send + Sync + 'static,
    {
        Self::raw(name, move |ctx, payload| {
            let input: In = codec.unmarshal(payload)?;
            let output = func(ctx, input)?;
            Ok(codec.marshal(&output)?)
        })
    }

    /// The operation name this function is registered under.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn into_parts(self) -> (String, CallFn) {
        (self.name, self.func)
    }
}

impl std::fmt::Debug for HostFn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostFn").field("name", &self.name).finish_non_exhaustive()
    }
}
