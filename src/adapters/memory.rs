//! In-memory blob storage
//!
//! Ordered map of blobs with optional byte-bounded LRU eviction. Serves as the
//! fast tier inside [`crate::cache::TieredCache`], as the `memory` storage
//! type, and as an origin in tests.

use std::collections::BTreeMap;
use std::ops::Bound;

use async_trait::async_trait;
use bytes::Bytes;
use lru::LruCache;
use parking_lot::Mutex;
use tracing::debug;

use crate::domain::{
    read_verified, slice_range, stream_from_bytes, BlobStorage, ByteStream, ContentAddress,
    FetchedBlob, SizedAddress, SubFetcher,
};
use crate::error::{Error, Result};

struct MemoryInner {
    blobs: BTreeMap<ContentAddress, Bytes>,
    recency: LruCache<ContentAddress, ()>,
    bytes: u64,
}

/// In-memory, `BTreeMap`-based blob store.
///
/// With a capacity, the least recently used blobs are dropped once the total
/// size exceeds it. Without one the store grows without bound.
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
    capacity: Option<u64>,
}

impl MemoryStore {
    /// Create an unbounded store.
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Create a store holding at most `capacity` bytes.
    pub fn with_capacity(capacity: u64) -> Self {
        Self::build(Some(capacity))
    }

    fn build(capacity: Option<u64>) -> Self {
        Self {
            inner: Mutex::new(MemoryInner {
                blobs: BTreeMap::new(),
                recency: LruCache::unbounded(),
                bytes: 0,
            }),
            capacity,
        }
    }

    /// Byte bound, if any.
    pub fn capacity(&self) -> Option<u64> {
        self.capacity
    }

    /// Read a blob's bytes, marking it recently used.
    pub fn get_bytes(&self, address: &ContentAddress) -> Option<Bytes> {
        let mut inner = self.inner.lock();
        let data = inner.blobs.get(address).cloned()?;
        inner.recency.promote(address);
        Some(data)
    }

    /// Store `data` without verifying it, returning any addresses evicted to
    /// make room.
    pub fn insert(&self, address: ContentAddress, data: Bytes) -> Vec<ContentAddress> {
        let mut inner = self.inner.lock();
        let size = data.len() as u64;
        if let Some(old) = inner.blobs.insert(address.clone(), data) {
            inner.bytes -= old.len() as u64;
        }
        inner.bytes += size;
        inner.recency.put(address, ());

        let mut evicted = Vec::new();
        if let Some(cap) = self.capacity {
            while inner.bytes > cap {
                let Some((victim, ())) = inner.recency.pop_lru() else {
                    break;
                };
                if let Some(old) = inner.blobs.remove(&victim) {
                    inner.bytes -= old.len() as u64;
                }
                evicted.push(victim);
            }
        }
        if !evicted.is_empty() {
            debug!(count = evicted.len(), "memory store evicted blobs");
        }
        evicted
    }

    /// Drop a blob. Returns `true` if it was present.
    pub fn remove(&self, address: &ContentAddress) -> bool {
        let mut inner = self.inner.lock();
        inner.recency.pop(address);
        match inner.blobs.remove(address) {
            Some(old) => {
                inner.bytes -= old.len() as u64;
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, address: &ContentAddress) -> bool {
        self.inner.lock().blobs.contains_key(address)
    }

    /// Number of blobs held.
    pub fn len(&self) -> usize {
        self.inner.lock().blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().blobs.is_empty()
    }

    /// Total bytes across all blobs.
    pub fn total_bytes(&self) -> u64 {
        self.inner.lock().bytes
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.blobs.clear();
        inner.recency.clear();
        inner.bytes = 0;
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("MemoryStore")
            .field("blob_count", &inner.blobs.len())
            .field("bytes", &inner.bytes)
            .field("capacity", &self.capacity)
            .finish()
    }
}

#[async_trait]
impl BlobStorage for MemoryStore {
    async fn get(&self, address: &ContentAddress) -> Result<FetchedBlob> {
        self.get_bytes(address)
            .map(FetchedBlob::from_bytes)
            .ok_or_else(|| Error::NotFound(address.clone()))
    }

    async fn put(
        &self,
        address: &ContentAddress,
        body: ByteStream,
        declared_len: Option<u64>,
    ) -> Result<SizedAddress> {
        let data = read_verified(address, body, declared_len).await?;
        let size = data.len() as u64;
        self.insert(address.clone(), data);
        Ok(SizedAddress::new(address.clone(), size))
    }

    async fn stat(&self, addresses: &[ContentAddress]) -> Result<BTreeMap<ContentAddress, u64>> {
        let inner = self.inner.lock();
        Ok(addresses
            .iter()
            .filter_map(|a| inner.blobs.get(a).map(|d| (a.clone(), d.len() as u64)))
            .collect())
    }

    async fn enumerate(
        &self,
        after: Option<&ContentAddress>,
        limit: usize,
    ) -> Result<Vec<SizedAddress>> {
        let inner = self.inner.lock();
        let lower = match after {
            Some(a) => Bound::Excluded(a),
            None => Bound::Unbounded,
        };
        Ok(inner
            .blobs
            .range::<ContentAddress, _>((lower, Bound::Unbounded))
            .take(limit)
            .map(|(a, d)| SizedAddress::new(a.clone(), d.len() as u64))
            .collect())
    }

    fn as_sub_fetcher(&self) -> Option<&dyn SubFetcher> {
        Some(self)
    }
}

#[async_trait]
impl SubFetcher for MemoryStore {
    async fn sub_fetch(
        &self,
        address: &ContentAddress,
        offset: u64,
        length: u64,
    ) -> Result<ByteStream> {
        let data = self
            .get_bytes(address)
            .ok_or_else(|| Error::NotFound(address.clone()))?;
        Ok(stream_from_bytes(slice_range(address, &data, offset, length)?))
    }
}
