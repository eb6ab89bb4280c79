//! Typed and raw façades over guest operations.
//!
//! A plugin function binds an operation name to a shared engine handle so
//! callers can treat a guest export like an ordinary function. The typed
//! flavor composes a [`Codec`] around the byte channel.

use std::marker::PhantomData;
use std::sync::{Arc, Mutex};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::codec::Codec;
use crate::engine::Engine;
use crate::error::{Error, Result};

fn validate_name(name: String) -> Result<String> {
    if name.is_empty() {
        return Err(Error::Config("plugin function name cannot be empty".into()));
    }
    Ok(name)
}

/// A raw byte-level guest function.
pub struct PluginFnBytes {
    name: String,
    engine: Arc<Mutex<Engine>>,
}

impl PluginFnBytes {
    pub(crate) fn new(engine: Arc<Mutex<Engine>>, name: impl Into<String>) -> Result<Self> {
        Ok(Self {
            name: validate_name(name.into())?,
            engine,
        })
    }

    /// The guest operation this function invokes.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Invoke the guest operation with `payload`.
    pub fn call(&self, payload: &[u8]) -> Result<Vec<u8>> {
        let mut engine = self
            .engine
            .lock()
            .map_err(|_| Error::Internal("engine lock poisoned".into()))?;
        engine.invoke(&self.name, payload)
    }
}

impl std::fmt::Debug for PluginFnBytes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginFnBytes")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// A typed guest function: input marshalled, output unmarshalled through the
/// codec.
///
/// An empty guest response yields `Out::default()` without touching the
/// codec, mirroring a guest that succeeded but produced no payload.
pub struct PluginFn<In, Out, C = crate::codec::MsgPack> {
    name: String,
    engine: Arc<Mutex<Engine>>,
    codec: C,
    _types: PhantomData<fn(&In) -> Out>,
}

impl<In, Out, C> PluginFn<In, Out, C>
where
    In: Serialize,
    Out: DeserializeOwned + Default,
    C: Codec,
{
    pub(crate) fn new(
        engine: Arc<Mutex<Engine>>,
        name: impl Into<String>,
        codec: C,
    ) -> Result<Self> {
        Ok(Self {
            name: validate_name(name.into())?,
            engine,
            codec,
            _types: PhantomData,
        })
    }

    /// The guest operation this function invokes.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Marshal `input`, invoke the guest operation, unmarshal the response.
    pub fn call(&self, input: &In) -> Result<Out> {
        let payload = self.codec.marshal(input)?;
        let response = {
            let mut engine = self
                .engine
                .lock()
                .map_err(|_| Error::Internal("engine lock poisoned".into()))?;
            engine.invoke(&self.name, &payload)?
        };
        if response.is_empty() {
            return Ok(Out::default());
        }
        Ok(self.codec.unmarshal(&response)?)
    }
}

impl<In, Out, C> std::fmt::Debug for PluginFn<In, Out, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginFn")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}
