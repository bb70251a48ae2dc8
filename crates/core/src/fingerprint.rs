//! Content fingerprints and streaming verification.
//!
//! A fingerprint is the triple (algorithm name, digest bytes, declared body
//! length); its canonical text form is `name:hex:length`. The fingerprint is
//! the sole trust anchor of the DCDN: any peer can serve bytes, and the
//! verifier decides whether they are the right ones.

use crate::error::{Error, Result};
use crate::registry::HashRegistry;
use digest::DynDigest;
use std::fmt;
use std::str::FromStr;

/// A content fingerprint: algorithm, digest and exact body length.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    algorithm: String,
    digest: Vec<u8>,
    length: u32,
}

impl Fingerprint {
    /// Assemble a fingerprint from its parts.
    pub fn new(algorithm: impl Into<String>, digest: Vec<u8>, length: u32) -> Self {
        Self {
            algorithm: algorithm.into(),
            digest,
            length,
        }
    }

    /// Parse the canonical wire form against the global registry.
    pub fn parse(s: &str) -> Result<Self> {
        HashRegistry::global().parse(s)
    }

    /// Generate a fingerprint against the global registry.
    ///
    /// See [`HashRegistry::generate`].
    pub fn generate<F>(algorithm: &str, producer: F) -> Result<Self>
    where
        F: FnOnce(&mut dyn std::io::Write) -> Result<u32>,
    {
        HashRegistry::global().generate(algorithm, producer)
    }

    /// The algorithm name.
    pub fn algorithm(&self) -> &str {
        &self.algorithm
    }

    /// The raw digest bytes.
    pub fn digest(&self) -> &[u8] {
        &self.digest
    }

    /// The declared body length in bytes.
    pub fn length(&self) -> u32 {
        self.length
    }

    /// Build a verifier for this fingerprint against the global registry.
    pub fn verifier(&self) -> Result<Verifier> {
        HashRegistry::global().verifier(self)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.algorithm,
            hex::encode(&self.digest),
            self.length
        )
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({self})")
    }
}

impl FromStr for Fingerprint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Streaming verifier bound to one fingerprint.
///
/// Absorbs bytes in any number of writes, then `verify` consumes it exactly
/// once. A write past the declared length poisons the verifier: the digest
/// state is dropped, nothing from the offending write is absorbed, and every
/// later operation reports [`Error::TooLong`].
pub struct Verifier {
    expected: Vec<u8>,
    hasher: Option<Box<dyn DynDigest + Send>>,
    remaining: u32,
}

impl Verifier {
    pub(crate) fn new(hasher: Box<dyn DynDigest + Send>, expected: Vec<u8>, length: u32) -> Self {
        Self {
            expected,
            hasher: Some(hasher),
            remaining: length,
        }
    }

    /// Bytes still expected before the declared length is reached.
    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    /// Absorb a chunk of the body.
    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        let Some(hasher) = self.hasher.as_mut() else {
            return Err(Error::TooLong);
        };
        if data.len() as u64 > u64::from(self.remaining) {
            self.hasher = None;
            self.remaining = 0;
            return Err(Error::TooLong);
        }
        hasher.update(data);
        self.remaining -= data.len() as u32;
        Ok(())
    }

    /// Check the absorbed stream against the fingerprint.
    pub fn verify(self) -> Result<()> {
        let Some(hasher) = self.hasher else {
            return Err(Error::TooLong);
        };
        if self.remaining != 0 {
            return Err(Error::TooShort);
        }
        if hasher.finalize().as_ref() != self.expected.as_slice() {
            return Err(Error::Mismatch);
        }
        Ok(())
    }
}

/// Incremental fingerprint computation with a running byte count.
///
/// Unlike [`Verifier`] this has no expectation to check against; it is the
/// generator side, used when hashing local files.
pub struct DigestWriter {
    algorithm: String,
    hasher: Box<dyn DynDigest + Send>,
    count: u64,
}

impl DigestWriter {
    pub(crate) fn new(algorithm: &str, hasher: Box<dyn DynDigest + Send>) -> Self {
        Self {
            algorithm: algorithm.to_string(),
            hasher,
            count: 0,
        }
    }

    /// Absorb a chunk.
    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
        self.count += data.len() as u64;
    }

    /// Total bytes absorbed so far.
    pub fn bytes_written(&self) -> u64 {
        self.count
    }

    /// Finalize into a fingerprint.
    ///
    /// Fails with [`Error::OversizedFile`] when more than `u32::MAX` bytes
    /// were absorbed; the wire form cannot express longer bodies.
    pub fn finish(self) -> Result<Fingerprint> {
        let Self {
            algorithm,
            hasher,
            count,
        } = self;
        let length = u32::try_from(count).map_err(|_| Error::OversizedFile)?;
        Ok(Fingerprint::new(algorithm, hasher.finalize().into_vec(), length))
    }
}
