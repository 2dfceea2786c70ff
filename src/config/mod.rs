//! Storage configuration
//!
//! Typed, already-structured configuration objects. Decoding them from text
//! is the caller's job; the `blobvault` binary reads YAML:
//!
//! ```yaml
//! storage:
//!   archive:
//!     type: s3
//!     bucket: mybucket/archive
//!     access_key_id: AKIA...
//!     secret_access_key: ...
//!   scratch:
//!     type: memory
//! sync:
//!   - from: scratch
//!     to: archive
//!     verify_interval: 24h
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Deserializer};

use crate::adapters::remote::DEFAULT_HOSTNAME;
use crate::error::{Error, Result};

/// Default nominal working set of the cache in front of a remote backend.
pub const DEFAULT_CACHE_SIZE: u64 = 32 << 20;

fn default_cache_size() -> u64 {
    DEFAULT_CACHE_SIZE
}

// =============================================================================
// Remote
// =============================================================================

/// Configuration for an S3-compatible backend.
#[derive(Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RemoteConfig {
    /// `bucket` or `bucket/key-prefix`
    pub bucket: String,

    /// Endpoint hostname (default `s3.amazonaws.com`)
    #[serde(default)]
    pub hostname: Option<String>,

    /// Nominal cache working set in bytes; `0` disables the cache
    #[serde(default)]
    pub cache_size: Option<u64>,

    #[serde(alias = "aws_access_key_id", alias = "aws_access_key")]
    pub access_key_id: String,

    #[serde(alias = "aws_secret_access_key")]
    pub secret_access_key: String,

    /// Skip the listing that validates bucket and credentials at startup
    #[serde(default, alias = "skipStartupCheck")]
    pub skip_startup_check: bool,

    /// Talk plain HTTP, for local S3-compatible servers
    #[serde(default)]
    pub insecure: bool,
}

impl RemoteConfig {
    pub fn new(
        bucket: impl Into<String>,
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
    ) -> Self {
        Self {
            bucket: bucket.into(),
            hostname: None,
            cache_size: None,
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            skip_startup_check: false,
            insecure: false,
        }
    }

    pub fn hostname(&self) -> &str {
        self.hostname
            .as_deref()
            .filter(|h| !h.is_empty())
            .unwrap_or(DEFAULT_HOSTNAME)
    }

    pub fn cache_size(&self) -> u64 {
        self.cache_size.unwrap_or_else(default_cache_size)
    }
}

impl fmt::Debug for RemoteConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteConfig")
            .field("bucket", &self.bucket)
            .field("hostname", &self.hostname())
            .field("cache_size", &self.cache_size())
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("skip_startup_check", &self.skip_startup_check)
            .field("insecure", &self.insecure)
            .finish()
    }
}

// =============================================================================
// Memory
// =============================================================================

/// Configuration for an in-memory backend.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MemoryConfig {
    /// Byte bound with LRU eviction; unbounded when absent
    #[serde(default)]
    pub capacity: Option<u64>,
}

// =============================================================================
// Storage
// =============================================================================

/// One declared storage, dispatched on its `type`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    S3(RemoteConfig),
    Memory(MemoryConfig),
}

impl StorageConfig {
    /// The `type` tag.
    pub fn kind(&self) -> &'static str {
        match self {
            StorageConfig::S3(_) => "s3",
            StorageConfig::Memory(_) => "memory",
        }
    }
}

// =============================================================================
// Sync
// =============================================================================

/// Declarative replication from one storage to another. Data only; nothing
/// in this crate schedules it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SyncConfig {
    /// Source storage name
    pub from: String,
    /// Destination storage name
    pub to: String,
    /// How often the destination is fully verified, if at all
    #[serde(default, deserialize_with = "deserialize_interval")]
    pub verify_interval: Option<Duration>,
}

fn deserialize_interval<'de, D>(deserializer: D) -> std::result::Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    raw.map(|s| parse_duration(&s).map_err(serde::de::Error::custom))
        .transpose()
}

// =============================================================================
// Top level
// =============================================================================

/// A full configuration: named storages plus sync descriptors.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub storage: BTreeMap<String, StorageConfig>,
    #[serde(default)]
    pub sync: Vec<SyncConfig>,
}

impl Config {
    /// Cross-reference checks that the type system cannot express.
    pub fn validate(&self) -> Result<()> {
        for (name, storage) in &self.storage {
            if let StorageConfig::S3(remote) = storage {
                if remote.bucket.is_empty() {
                    return Err(Error::config(
                        format!("storage.{}.bucket", name),
                        "bucket name is required",
                    ));
                }
            }
        }

        for (i, sync) in self.sync.iter().enumerate() {
            for (field, target) in [("from", &sync.from), ("to", &sync.to)] {
                if !self.storage.contains_key(target) {
                    return Err(Error::config(
                        format!("sync[{}].{}", i, field),
                        format!("no storage named {:?}", target),
                    ));
                }
            }
            if sync.from == sync.to {
                return Err(Error::config(
                    format!("sync[{}].to", i),
                    "source and destination are the same storage",
                ));
            }
        }
        Ok(())
    }
}

// =============================================================================
// Duration Parsing
// =============================================================================

/// Parse a Go `time.ParseDuration` string: a sequence of decimal numbers,
/// each with an optional fraction and a unit, e.g. "500ms", "1.5h", "1h30m".
/// Units are `ns`, `us` (or `µs`), `ms`, `s`, `m`, `h`, plus `d` for days.
/// A bare "0" is allowed; any other number needs a unit. Negative durations
/// are rejected.
pub fn parse_duration(s: &str) -> Result<Duration> {
    let original = s;
    let invalid = |what: &str| Error::DurationParse(format!("{}: {:?}", what, original));

    let mut s = s.trim();
    if let Some(rest) = s.strip_prefix('+') {
        s = rest;
    } else if s.starts_with('-') {
        return Err(invalid("negative duration"));
    }
    if s == "0" {
        return Ok(Duration::ZERO);
    }
    if s.is_empty() {
        return Err(invalid("empty duration"));
    }

    let mut total: u128 = 0;
    while !s.is_empty() {
        let int_len = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
        let (int_part, rest) = s.split_at(int_len);
        let (frac_part, rest) = match rest.strip_prefix('.') {
            Some(after) => {
                let frac_len = after.find(|c: char| !c.is_ascii_digit()).unwrap_or(after.len());
                after.split_at(frac_len)
            }
            None => ("", rest),
        };
        if int_part.is_empty() && frac_part.is_empty() {
            return Err(invalid("invalid duration"));
        }

        let unit_len = rest
            .find(|c: char| c == '.' || c.is_ascii_digit())
            .unwrap_or(rest.len());
        let (unit, rest) = rest.split_at(unit_len);
        let nanos_per_unit: u128 = match unit {
            "ns" => 1,
            "us" | "µs" | "μs" => 1_000,
            "ms" => 1_000_000,
            "s" => 1_000_000_000,
            "m" => 60 * 1_000_000_000,
            "h" => 3_600 * 1_000_000_000,
            "d" => 86_400 * 1_000_000_000,
            "" => return Err(invalid("missing unit in duration")),
            _ => return Err(invalid("unknown unit in duration")),
        };

        let whole: u128 = if int_part.is_empty() {
            0
        } else {
            int_part.parse().map_err(|_| invalid("duration overflows"))?
        };
        total = whole
            .checked_mul(nanos_per_unit)
            .and_then(|n| total.checked_add(n))
            .ok_or_else(|| invalid("duration overflows"))?;

        // digits past nanosecond precision of the largest unit cannot matter
        let frac_digits = &frac_part[..frac_part.len().min(18)];
        if !frac_digits.is_empty() {
            let numerator: u128 = frac_digits.parse().map_err(|_| invalid("invalid duration"))?;
            let scale = 10u128.pow(frac_digits.len() as u32);
            total = total
                .checked_add(numerator * nanos_per_unit / scale)
                .ok_or_else(|| invalid("duration overflows"))?;
        }

        s = rest;
    }

    let secs = u64::try_from(total / 1_000_000_000).map_err(|_| invalid("duration overflows"))?;
    Ok(Duration::new(secs, (total % 1_000_000_000) as u32))
}
