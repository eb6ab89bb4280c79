//! Module loading and integrity verification.
//!
//! A [`ModuleFile`] reads the Wasm bytes from disk exactly once and checks
//! them against an expected digest before the engine ever compiles them. The
//! digest algorithm is a pluggable [`Hasher`] capability; the built-in
//! implementations are [`Sha256Hasher`] and the no-op [`NoopHasher`].

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// Digest capability used to verify module integrity.
///
/// `matches(digest(data), data)` holds for every implementation. The default
/// `matches` compares the computed digest with the expected string, so an
/// implementation whose digest is empty (the no-op) accepts only an empty
/// expectation.
pub trait Hasher: Send + Sync {
    /// Compute the digest of `data` as a printable string.
    fn digest(&self, data: &[u8]) -> String;

    /// Whether `data` matches the `expected` digest.
    fn matches(&self, expected: &str, data: &[u8]) -> bool {
        self.digest(data) == expected
    }
}

/// SHA-256 digests, rendered as lowercase hex.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256Hasher;

impl Hasher for Sha256Hasher {
    fn digest(&self, data: &[u8]) -> String {
        format!("{:x}", Sha256::digest(data))
    }
}

/// The default hasher: computes nothing and accepts nothing.
///
/// Its digest is always empty, so verification passes only when no expected
/// digest was configured. Supplying a digest without also supplying a real
/// hasher is treated as a verification failure rather than silently ignored.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHasher;

impl Hasher for NoopHasher {
    fn digest(&self, _data: &[u8]) -> String {
        String::new()
    }
}

/// Options applied when loading a module file.
#[derive(Clone)]
pub struct FileOptions {
    pub(crate) hash: String,
    pub(crate) hasher: Arc<dyn Hasher>,
}

impl FileOptions {
    /// No expected digest, [`NoopHasher`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Expected digest for the module bytes.
    pub fn with_hash(mut self, hash: impl Into<String>) -> Self {
        self.hash = hash.into();
        self
    }

    /// Digest algorithm used for verification.
    pub fn with_hasher(mut self, hasher: impl Hasher + 'static) -> Self {
        self.hasher = Arc::new(hasher);
        self
    }
}

impl Default for FileOptions {
    fn default() -> Self {
        Self {
            hash: String::new(),
            hasher: Arc::new(NoopHasher),
        }
    }
}

impl std::fmt::Debug for FileOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileOptions")
            .field("hash", &self.hash)
            .finish_non_exhaustive()
    }
}

/// A Wasm module loaded from disk and verified.
///
/// The bytes are retained until the engine's compile step consumes them.
#[derive(Debug, Clone)]
pub struct ModuleFile {
    path: PathBuf,
    data: Vec<u8>,
}

impl ModuleFile {
    /// Read the module at `path` and verify it against `opts`.
    ///
    /// Fails with [`Error::Config`] on an empty path, [`Error::Io`] when the
    /// file cannot be read, and [`Error::IntegrityMismatch`] when the digest
    /// check fails.
    pub fn load(path: impl Into<PathBuf>, opts: FileOptions) -> Result<Self> {
        let path = path.into();
        if path.as_os_str().is_empty() {
            return Err(Error::Config("module path is required".into()));
        }
        let data = fs::read(&path).map_err(|source| Error::Io {
            path: path.clone(),
            source,
        })?;
        if !opts.hasher.matches(&opts.hash, &data) {
            return Err(Error::IntegrityMismatch { path });
        }
        Ok(Self { path, data })
    }

    /// Path the module was loaded from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The verified module bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Module name derived from the file stem.
    pub fn name(&self) -> String {
        self.path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}
