//! Serialization capability for the typed call wrappers.
//!
//! The wire protocol itself moves raw bytes; codecs only exist at the typed
//! wrapper boundary, where a caller-supplied implementation converts between
//! values and byte payloads. [`MsgPack`] is the reference codec; [`Json`] is
//! provided for guests that prefer a self-describing text format. Host and
//! guest must agree on the codec per operation.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::CodecError;

/// Marshal/unmarshal values over byte sequences.
pub trait Codec {
    /// Encode `value` into a byte payload.
    fn marshal<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, CodecError>;

    /// Decode a byte payload into a value.
    fn unmarshal<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, CodecError>;
}

/// MessagePack with named fields (maps keyed by field name).
#[derive(Debug, Clone, Copy, Default)]
pub struct MsgPack;

impl Codec for MsgPack {
    fn marshal<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        Ok(rmp_serde::to_vec_named(value)?)
    }

    fn unmarshal<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, CodecError> {
        Ok(rmp_serde::from_slice(data)?)
    }
}

/// JSON via serde_json.
#[derive(Debug, Clone, Copy, Default)]
pub struct Json;

impl Codec for Json {
    fn marshal<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        Ok(serde_json::to_vec(value)?)
    }

    fn unmarshal<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, CodecError> {
        Ok(serde_json::from_slice(data)?)
    }
}
