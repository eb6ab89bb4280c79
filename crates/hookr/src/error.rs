//! Error types for the plugin runtime.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Convenience alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type returned by host-function handlers.
///
/// Handlers are user code; whatever they return is stringified and surfaced
/// to the guest through `__host_error_len` / `__host_error`. It never
/// terminates the engine.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Runtime errors surfaced by the public API.
///
/// Every failure of [`Plugin::new`](crate::Plugin::new),
/// [`invoke`](crate::Engine::invoke), typed calls, and
/// [`close`](crate::Engine::close) maps onto exactly one of these variants.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Invalid or missing configuration: empty path, empty function name,
    /// operation on an engine in the wrong lifecycle state.
    #[error("configuration error: {0}")]
    Config(String),

    /// Reading the module file from disk failed.
    #[error("failed to read module file {path}: {source}")]
    Io {
        /// Path that could not be read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The module bytes did not match the expected digest.
    #[error("digest does not match for {path}")]
    IntegrityMismatch {
        /// Path of the rejected module.
        path: PathBuf,
    },

    /// The underlying Wasm runtime could not be set up.
    #[error("failed to initialize runtime: {0}")]
    RuntimeInit(String),

    /// The hookr host module could not be registered with the runtime.
    #[error("failed to set up host module: {0}")]
    HookrInit(String),

    /// The runtime rejected the module during compilation.
    #[error("failed to compile module: {0}")]
    Compile(String),

    /// The runtime rejected the module during instantiation.
    #[error("failed to instantiate module: {0}")]
    Instantiate(String),

    /// A required export is absent from the guest module.
    #[error("module {module:?} does not export function {export:?}")]
    MissingExport {
        /// Name of the guest module.
        module: String,
        /// Name of the missing export.
        export: String,
    },

    /// A start function (`_start`, `_initialize`, `hookr_init`) exited with a
    /// nonzero exit code during instantiation.
    #[error("start function exited with code {0}")]
    GuestStart(i32),

    /// Marshalling or unmarshalling failed at a typed wrapper boundary.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// The guest reported an error through `__plugin_error`. The message is
    /// the guest's error text, verbatim.
    #[error("{0}")]
    PluginFailure(String),

    /// The guest returned failure without reporting an error string.
    #[error("call to {0:?} was unsuccessful")]
    UnsuccessfulCall(String),

    /// A guest-supplied pointer/length pair fell outside linear memory.
    /// Fatal for the invocation in which it occurred.
    #[error("memory access out of bounds for {field}: offset={offset} count={count}")]
    OutOfBounds {
        /// Which transfer was being performed.
        field: &'static str,
        /// Requested offset into linear memory.
        offset: u32,
        /// Requested byte count.
        count: u32,
    },

    /// The guest call itself failed: a trap, a deadline interrupt, or a fatal
    /// memory violation inside a hookr import.
    #[error("error invoking guest: {reason}")]
    Invoke {
        /// Operation that was being invoked.
        operation: String,
        /// Rendered cause chain.
        reason: String,
    },

    /// Invariant violation inside the engine.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Errors from the codec layer.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CodecError {
    /// MessagePack encoding failed.
    #[error("failed to encode payload: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// MessagePack decoding failed.
    #[error("failed to decode payload: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    /// JSON conversion failed in either direction.
    #[error("failed to convert JSON payload: {0}")]
    Json(#[from] serde_json::Error),
}
