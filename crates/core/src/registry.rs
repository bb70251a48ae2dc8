//! Hash algorithm registry.
//!
//! Fingerprints name their algorithm in the wire form, so verification needs
//! a runtime lookup from name to hasher constructor. A process-wide registry
//! with `sha256` and `sha512` pre-registered covers the common case;
//! components accept an explicit `Arc<HashRegistry>` so tests can run against
//! a private one. Registrations are expected to happen before the first
//! verifier is constructed; later registrations are not synchronized with
//! in-flight lookups beyond the interior lock.

use crate::error::{Error, Result};
use crate::fingerprint::{DigestWriter, Fingerprint, Verifier};
use digest::DynDigest;
use sha2::{Digest, Sha256, Sha512};
use std::collections::HashMap;
use std::sync::{Arc, LazyLock, PoisonError, RwLock};

/// Constructor for a named hash algorithm.
pub type HasherFactory = fn() -> Box<dyn DynDigest + Send>;

static GLOBAL: LazyLock<Arc<HashRegistry>> = LazyLock::new(|| Arc::new(HashRegistry::new()));

/// Registry mapping algorithm names to hasher constructors.
pub struct HashRegistry {
    algorithms: RwLock<HashMap<String, HasherFactory>>,
}

impl HashRegistry {
    /// Create a registry with the standard algorithms (`sha256`, `sha512`).
    pub fn new() -> Self {
        let reg = Self::empty();
        reg.register("sha256", || Box::new(Sha256::new()));
        reg.register("sha512", || Box::new(Sha512::new()));
        reg
    }

    /// Create a registry with no algorithms registered.
    pub fn empty() -> Self {
        Self {
            algorithms: RwLock::new(HashMap::new()),
        }
    }

    /// The process-wide default registry.
    pub fn global() -> Arc<HashRegistry> {
        GLOBAL.clone()
    }

    /// Register an algorithm by name, replacing any previous registration.
    pub fn register(&self, name: &str, factory: HasherFactory) {
        self.algorithms
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), factory);
    }

    /// Whether an algorithm name is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.algorithms
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    /// Construct a fresh hasher for a registered algorithm.
    pub fn hasher(&self, name: &str) -> Result<Box<dyn DynDigest + Send>> {
        let factory = self
            .algorithms
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .copied()
            .ok_or_else(|| Error::UnrecognizedAlgorithm(name.to_string()))?;
        Ok(factory())
    }

    /// Parse the canonical wire form `name:hex:length`.
    ///
    /// The decoded digest length is not checked against the algorithm's
    /// natural output size; the verifier enforces equality in the end.
    pub fn parse(&self, s: &str) -> Result<Fingerprint> {
        let mut parts = s.split(':');
        let (Some(algorithm), Some(digest_hex), Some(length), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(Error::InvalidSyntax);
        };
        if !self.contains(algorithm) {
            return Err(Error::UnrecognizedAlgorithm(algorithm.to_string()));
        }
        let digest = hex::decode(digest_hex)?;
        let length: u32 = length
            .parse()
            .map_err(|_| Error::InvalidLength(length.to_string()))?;
        Ok(Fingerprint::new(algorithm, digest, length))
    }

    /// Build a streaming verifier for a fingerprint.
    pub fn verifier(&self, fingerprint: &Fingerprint) -> Result<Verifier> {
        let hasher = self.hasher(fingerprint.algorithm())?;
        Ok(Verifier::new(
            hasher,
            fingerprint.digest().to_vec(),
            fingerprint.length(),
        ))
    }

    /// Start an incremental digest computation under a registered algorithm.
    pub fn writer(&self, algorithm: &str) -> Result<DigestWriter> {
        let hasher = self.hasher(algorithm)?;
        Ok(DigestWriter::new(algorithm, hasher))
    }

    /// Generate a fingerprint by running `producer` against a digest sink.
    ///
    /// The resulting fingerprint's length is the byte count the producer
    /// reports. Producer errors propagate unchanged.
    pub fn generate<F>(&self, algorithm: &str, producer: F) -> Result<Fingerprint>
    where
        F: FnOnce(&mut dyn std::io::Write) -> Result<u32>,
    {
        let mut hasher = self.hasher(algorithm)?;
        let mut sink = DigestSink(hasher.as_mut());
        let length = producer(&mut sink)?;
        let digest = hasher.finalize().into_vec();
        Ok(Fingerprint::new(algorithm, digest, length))
    }
}

impl Default for HashRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Infallible `io::Write` adapter over a hasher.
struct DigestSink<'a>(&'a mut (dyn DynDigest + Send));

impl std::io::Write for DigestSink<'_> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
