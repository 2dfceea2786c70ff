//! Tiered Cache
//!
//! A caching decorator that composes in front of any [`BlobStorage`].
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                      TieredCache                          │
//! ├──────────────────────────────────────────────────────────┤
//! │  LRU index (bytes)          │  Fast tier (MemoryStore)    │
//! │  capacity = working set × 4 │  exclusively owned          │
//! │         │                   │          │                  │
//! │         └──── one parking_lot::Mutex ──┘                  │
//! │                              │                            │
//! │                   miss / write-through                    │
//! │                              ▼                            │
//! │                   Origin (Arc<dyn BlobStorage>)           │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! The index is the only eviction authority. Origin I/O never happens while
//! the lock is held.
//!
//! [`BlobStorage`]: crate::domain::BlobStorage

mod metrics;
mod tiered;

pub use metrics::{CacheMetrics, MetricsSnapshot};
pub use tiered::{CacheStats, TieredCache, FAST_TIER_SAFETY_FACTOR};
