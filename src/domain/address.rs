//! Content Addresses
//!
//! A blob's identity is `algorithm-hexdigest`, e.g.
//! `sha224-d14a028c2a3a2bc9476102bb288234c415a2b01f828ea62ac5b3e42f`.
//! The canonical string is the sort key, the cache key and the remote object
//! key suffix everywhere in the crate.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha224, Sha256};

use crate::error::{Error, Result};

// =============================================================================
// Hash Algorithms
// =============================================================================

/// Digest algorithms accepted in a content address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HashAlgorithm {
    Sha224,
    Sha256,
}

impl HashAlgorithm {
    /// Every accepted algorithm.
    pub const ALL: [HashAlgorithm; 2] = [HashAlgorithm::Sha224, HashAlgorithm::Sha256];

    /// Name used in the canonical string form.
    pub fn name(self) -> &'static str {
        match self {
            HashAlgorithm::Sha224 => "sha224",
            HashAlgorithm::Sha256 => "sha256",
        }
    }

    /// Exact number of hex characters in a digest.
    pub fn hex_len(self) -> usize {
        match self {
            HashAlgorithm::Sha224 => 56,
            HashAlgorithm::Sha256 => 64,
        }
    }

    /// Look up an algorithm by name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|a| a.name() == name)
    }

    /// Start an incremental hash with this algorithm.
    pub fn hasher(self) -> DigestHasher {
        match self {
            HashAlgorithm::Sha224 => DigestHasher::Sha224(Sha224::new()),
            HashAlgorithm::Sha256 => DigestHasher::Sha256(Sha256::new()),
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Incremental hasher for one of the accepted algorithms.
#[derive(Clone)]
pub enum DigestHasher {
    Sha224(Sha224),
    Sha256(Sha256),
}

impl DigestHasher {
    pub fn update(&mut self, data: &[u8]) {
        match self {
            DigestHasher::Sha224(h) => h.update(data),
            DigestHasher::Sha256(h) => h.update(data),
        }
    }

    /// Finish hashing and return the resulting address.
    pub fn finish(self) -> ContentAddress {
        let (algorithm, digest) = match self {
            DigestHasher::Sha224(h) => (HashAlgorithm::Sha224, hex::encode(h.finalize())),
            DigestHasher::Sha256(h) => (HashAlgorithm::Sha256, hex::encode(h.finalize())),
        };
        ContentAddress::from_parts_unchecked(algorithm, &digest)
    }
}

// =============================================================================
// Content Address
// =============================================================================

/// Immutable, validated, digest-based blob identifier.
///
/// Every value of this type is valid: construction goes through
/// [`ContentAddress::new`] or [`str::parse`], both of which reject unknown
/// algorithms and wrong-length or non-lowercase-hex digests. Equality, hashing
/// and ordering all use the canonical string.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentAddress {
    canonical: String,
    algorithm: HashAlgorithm,
}

impl ContentAddress {
    /// Build an address from an algorithm name and hex digest.
    pub fn new(algorithm: &str, digest: &str) -> Result<Self> {
        let alg = HashAlgorithm::from_name(algorithm).ok_or_else(|| {
            Error::InvalidAddress(format!("unknown digest algorithm {:?}", algorithm))
        })?;
        if !digest_is_valid(alg, digest) {
            return Err(Error::InvalidAddress(format!(
                "{} digest must be {} lowercase hex characters, got {:?}",
                alg,
                alg.hex_len(),
                digest
            )));
        }
        Ok(Self::from_parts_unchecked(alg, digest))
    }

    fn from_parts_unchecked(algorithm: HashAlgorithm, digest: &str) -> Self {
        Self {
            canonical: format!("{}-{}", algorithm.name(), digest),
            algorithm,
        }
    }

    /// Reports whether `(algorithm, digest)` would form a valid address.
    pub fn validate(algorithm: &str, digest: &str) -> bool {
        HashAlgorithm::from_name(algorithm).is_some_and(|alg| digest_is_valid(alg, digest))
    }

    /// Always true; kept for callers that check before use.
    pub fn is_valid(&self) -> bool {
        Self::validate(self.algorithm.name(), self.digest_hex())
    }

    /// Hash `data` and return its address.
    pub fn compute(algorithm: HashAlgorithm, data: &[u8]) -> Self {
        let mut hasher = algorithm.hasher();
        hasher.update(data);
        hasher.finish()
    }

    /// Reports whether `data` hashes to this address.
    pub fn verify(&self, data: &[u8]) -> bool {
        Self::compute(self.algorithm, data) == *self
    }

    /// Start a hasher matching this address's algorithm.
    pub fn hasher(&self) -> DigestHasher {
        self.algorithm.hasher()
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    /// Hex digest without the algorithm prefix.
    pub fn digest_hex(&self) -> &str {
        &self.canonical[self.algorithm.name().len() + 1..]
    }

    /// Canonical `algorithm-hexdigest` form.
    pub fn as_str(&self) -> &str {
        &self.canonical
    }
}

fn digest_is_valid(algorithm: HashAlgorithm, digest: &str) -> bool {
    digest.len() == algorithm.hex_len()
        && digest
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

impl FromStr for ContentAddress {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (algorithm, digest) = s
            .split_once('-')
            .ok_or_else(|| Error::InvalidAddress(format!("missing '-' separator in {:?}", s)))?;
        Self::new(algorithm, digest)
    }
}

impl fmt::Display for ContentAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical)
    }
}

impl fmt::Debug for ContentAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentAddress({})", self.canonical)
    }
}

impl Serialize for ContentAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.canonical)
    }
}

impl<'de> Deserialize<'de> for ContentAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// An address paired with the blob's size in bytes.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SizedAddress {
    pub address: ContentAddress,
    pub size: u64,
}

impl SizedAddress {
    pub fn new(address: ContentAddress, size: u64) -> Self {
        Self { address, size }
    }
}
