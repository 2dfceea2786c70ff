//! Caching decorator over any blob storage.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, instrument};

use super::metrics::{CacheMetrics, MetricsSnapshot};
use crate::adapters::memory::MemoryStore;
use crate::domain::{
    read_all, slice_range, stream_from_bytes, BlobStorage, ByteStream, ContentAddress,
    EnumerateConfig, FetchedBlob, SizedAddress, SubFetcher,
};
use crate::error::Result;

/// Capacity multiplier over the nominal working set.
///
/// A blob set between the working set and this many times it stays resident.
pub const FAST_TIER_SAFETY_FACTOR: u64 = 4;

/// LRU order over the resident blobs, with their sizes.
struct CacheIndex {
    lru: LruCache<ContentAddress, u64>,
    bytes: u64,
}

impl CacheIndex {
    fn forget(&mut self, address: &ContentAddress) {
        if let Some(size) = self.lru.pop(address) {
            self.bytes -= size;
        }
    }
}

/// Point-in-time view of a [`TieredCache`].
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub capacity: u64,
    pub resident_bytes: u64,
    pub resident_blobs: usize,
    #[serde(flatten)]
    pub counters: MetricsSnapshot,
}

/// Fast in-memory tier in front of an origin.
///
/// Reads hit the fast tier first and fill it from the origin on a miss.
/// Writes go to the origin first and are admitted only once it accepted
/// them. The cache's own LRU index decides eviction; evicted blobs are simply
/// dropped since the origin already holds them.
pub struct TieredCache {
    capacity: u64,
    fast: MemoryStore,
    origin: Arc<dyn BlobStorage>,
    index: Mutex<CacheIndex>,
    metrics: CacheMetrics,
}

impl TieredCache {
    /// Cache up to `capacity` bytes of `origin` in `fast`. Anything already
    /// in `fast` is discarded.
    pub fn new(capacity: u64, fast: MemoryStore, origin: Arc<dyn BlobStorage>) -> Self {
        fast.clear();
        Self {
            capacity,
            fast,
            origin,
            index: Mutex::new(CacheIndex {
                lru: LruCache::unbounded(),
                bytes: 0,
            }),
            metrics: CacheMetrics::new(),
        }
    }

    /// Canonical configuration for a nominal working set of `working_set`
    /// bytes: an unbounded memory store governed by a
    /// `working_set × FAST_TIER_SAFETY_FACTOR` byte index.
    pub fn for_working_set(working_set: u64, origin: Arc<dyn BlobStorage>) -> Self {
        Self::new(
            working_set.saturating_mul(FAST_TIER_SAFETY_FACTOR),
            MemoryStore::new(),
            origin,
        )
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// The backing origin.
    pub fn origin(&self) -> &Arc<dyn BlobStorage> {
        &self.origin
    }

    /// Reports whether `address` is resident, without touching recency.
    pub fn is_resident(&self, address: &ContentAddress) -> bool {
        self.index.lock().lru.contains(address)
    }

    pub fn stats(&self) -> CacheStats {
        let index = self.index.lock();
        CacheStats {
            capacity: self.capacity,
            resident_bytes: index.bytes,
            resident_blobs: index.lru.len(),
            counters: self.metrics.snapshot(),
        }
    }

    /// Resident bytes, promoting the entry on a hit.
    fn lookup(&self, address: &ContentAddress) -> Option<Bytes> {
        let mut index = self.index.lock();
        index.lru.get(address)?;
        match self.fast.get_bytes(address) {
            Some(data) => Some(data),
            None => {
                // a bounded fast store dropped it on its own
                index.forget(address);
                None
            }
        }
    }

    /// Make `data` resident, evicting least recently used blobs to fit.
    fn admit(&self, address: &ContentAddress, data: Bytes) {
        let size = data.len() as u64;
        if size > self.capacity {
            debug!(%address, size, capacity = self.capacity, "blob larger than cache, not admitted");
            self.metrics.record_rejection();
            return;
        }

        let mut index = self.index.lock();
        index.forget(address);
        let mut evicted = 0u64;
        while index.bytes + size > self.capacity {
            let Some((victim, victim_size)) = index.lru.pop_lru() else {
                break;
            };
            index.bytes -= victim_size;
            self.fast.remove(&victim);
            evicted += 1;
        }

        for dropped in self.fast.insert(address.clone(), data) {
            if dropped != *address {
                index.forget(&dropped);
                evicted += 1;
            }
        }
        if self.fast.contains(address) {
            index.lru.put(address.clone(), size);
            index.bytes += size;
            self.metrics.record_admission();
        }
        drop(index);

        if evicted > 0 {
            debug!(evicted, "cache evicted blobs");
            self.metrics.record_evictions(evicted);
        }
    }
}

impl std::fmt::Debug for TieredCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let index = self.index.lock();
        f.debug_struct("TieredCache")
            .field("capacity", &self.capacity)
            .field("resident_bytes", &index.bytes)
            .field("resident_blobs", &index.lru.len())
            .finish()
    }
}

#[async_trait]
impl BlobStorage for TieredCache {
    #[instrument(skip(self), fields(address = %address))]
    async fn get(&self, address: &ContentAddress) -> Result<FetchedBlob> {
        if let Some(data) = self.lookup(address) {
            self.metrics.record_hit();
            return Ok(FetchedBlob::from_bytes(data));
        }
        self.metrics.record_miss();

        let data = self.origin.get(address).await?.into_bytes().await?;
        self.admit(address, data.clone());
        Ok(FetchedBlob::from_bytes(data))
    }

    #[instrument(skip(self, body), fields(address = %address))]
    async fn put(
        &self,
        address: &ContentAddress,
        body: ByteStream,
        declared_len: Option<u64>,
    ) -> Result<SizedAddress> {
        let data = read_all(body, declared_len).await?;
        let sized = self
            .origin
            .put(address, stream_from_bytes(data.clone()), declared_len)
            .await?;
        self.metrics.record_write_through();
        self.admit(address, data);
        Ok(sized)
    }

    async fn stat(&self, addresses: &[ContentAddress]) -> Result<BTreeMap<ContentAddress, u64>> {
        let mut found = BTreeMap::new();
        let mut rest = Vec::new();
        {
            let index = self.index.lock();
            for address in addresses {
                match index.lru.peek(address) {
                    Some(size) => {
                        found.insert(address.clone(), *size);
                    }
                    None => rest.push(address.clone()),
                }
            }
        }
        if !rest.is_empty() {
            found.extend(self.origin.stat(&rest).await?);
        }
        Ok(found)
    }

    async fn enumerate(
        &self,
        after: Option<&ContentAddress>,
        limit: usize,
    ) -> Result<Vec<SizedAddress>> {
        self.origin.enumerate(after, limit).await
    }

    fn as_sub_fetcher(&self) -> Option<&dyn SubFetcher> {
        self.origin.as_sub_fetcher().map(|_| self as &dyn SubFetcher)
    }

    fn enumerate_config(&self) -> Option<&dyn EnumerateConfig> {
        self.origin.enumerate_config()
    }
}

#[async_trait]
impl SubFetcher for TieredCache {
    async fn sub_fetch(
        &self,
        address: &ContentAddress,
        offset: u64,
        length: u64,
    ) -> Result<ByteStream> {
        if let Some(data) = self.lookup(address) {
            self.metrics.record_hit();
            return Ok(stream_from_bytes(slice_range(address, &data, offset, length)?));
        }
        self.metrics.record_miss();

        match self.origin.as_sub_fetcher() {
            Some(origin) => origin.sub_fetch(address, offset, length).await,
            None => {
                let data = self.origin.get(address).await?.into_bytes().await?;
                let part = slice_range(address, &data, offset, length)?;
                self.admit(address, data);
                Ok(stream_from_bytes(part))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::HashAlgorithm;
    use crate::error::Error;
    use assert_matches::assert_matches;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Origin that counts the reads reaching it.
    struct CountingOrigin {
        inner: MemoryStore,
        gets: AtomicUsize,
        stats: AtomicUsize,
    }

    impl CountingOrigin {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                inner: MemoryStore::new(),
                gets: AtomicUsize::new(0),
                stats: AtomicUsize::new(0),
            })
        }

        fn gets(&self) -> usize {
            self.gets.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl BlobStorage for CountingOrigin {
        async fn get(&self, address: &ContentAddress) -> Result<FetchedBlob> {
            self.gets.fetch_add(1, Ordering::SeqCst);
            self.inner.get(address).await
        }

        async fn put(
            &self,
            address: &ContentAddress,
            body: ByteStream,
            declared_len: Option<u64>,
        ) -> Result<SizedAddress> {
            self.inner.put(address, body, declared_len).await
        }

        async fn stat(
            &self,
            addresses: &[ContentAddress],
        ) -> Result<BTreeMap<ContentAddress, u64>> {
            self.stats.fetch_add(1, Ordering::SeqCst);
            self.inner.stat(addresses).await
        }

        async fn enumerate(
            &self,
            after: Option<&ContentAddress>,
            limit: usize,
        ) -> Result<Vec<SizedAddress>> {
            self.inner.enumerate(after, limit).await
        }
    }

    fn blob(seed: u32, len: usize) -> (ContentAddress, Bytes) {
        let mut data = seed.to_be_bytes().to_vec();
        data.resize(len.max(4), 0xab);
        (
            ContentAddress::compute(HashAlgorithm::Sha224, &data),
            Bytes::from(data),
        )
    }

    async fn put(cache: &TieredCache, addr: &ContentAddress, data: &Bytes) {
        cache
            .put(addr, stream_from_bytes(data.clone()), Some(data.len() as u64))
            .await
            .unwrap();
    }

    async fn get(cache: &TieredCache, addr: &ContentAddress) -> Bytes {
        cache.get(addr).await.unwrap().into_bytes().await.unwrap()
    }

    #[tokio::test]
    async fn test_put_writes_through_and_admits() {
        let origin = CountingOrigin::new();
        let cache = TieredCache::new(1024, MemoryStore::new(), origin.clone());
        let (a, d) = blob(1, 100);

        put(&cache, &a, &d).await;
        assert!(origin.inner.contains(&a));
        assert!(cache.is_resident(&a));

        assert_eq!(get(&cache, &a).await, d);
        assert_eq!(origin.gets(), 0);
        assert_eq!(cache.stats().counters.hits, 1);
    }

    #[tokio::test]
    async fn test_miss_fills_from_origin() {
        let origin = CountingOrigin::new();
        let (a, d) = blob(2, 100);
        origin.inner.insert(a.clone(), d.clone());
        let cache = TieredCache::new(1024, MemoryStore::new(), origin.clone());

        assert_eq!(get(&cache, &a).await, d);
        assert_eq!(get(&cache, &a).await, d);
        assert_eq!(origin.gets(), 1);

        let stats = cache.stats();
        assert_eq!(stats.counters.misses, 1);
        assert_eq!(stats.counters.hits, 1);
        assert_eq!(stats.resident_bytes, 100);
    }

    #[tokio::test]
    async fn test_missing_blob_is_not_found() {
        let origin = CountingOrigin::new();
        let cache = TieredCache::new(1024, MemoryStore::new(), origin);
        let (a, _) = blob(3, 10);
        assert_matches!(cache.get(&a).await, Err(Error::NotFound(x)) if x == a);
        assert!(!cache.is_resident(&a));
    }

    #[tokio::test]
    async fn test_rejected_write_is_not_admitted() {
        let origin = CountingOrigin::new();
        let cache = TieredCache::new(1024, MemoryStore::new(), origin.clone());
        let (a, d) = blob(4, 10);

        let res = cache
            .put(&a, stream_from_bytes(d), Some(11))
            .await;
        assert_matches!(res, Err(Error::LengthMismatch { .. }));
        assert!(!cache.is_resident(&a));
        assert!(!origin.inner.contains(&a));
    }

    #[tokio::test]
    async fn test_lru_eviction_by_bytes() {
        let origin = CountingOrigin::new();
        let cache = TieredCache::new(300, MemoryStore::new(), origin.clone());
        let blobs: Vec<_> = (0..4).map(|i| blob(10 + i, 100)).collect();

        for (a, d) in &blobs[..3] {
            put(&cache, a, d).await;
        }
        // refresh the first so the second is least recently used
        get(&cache, &blobs[0].0).await;
        put(&cache, &blobs[3].0, &blobs[3].1).await;

        assert!(cache.is_resident(&blobs[0].0));
        assert!(!cache.is_resident(&blobs[1].0));
        assert!(cache.is_resident(&blobs[2].0));
        assert!(cache.is_resident(&blobs[3].0));
        assert_eq!(cache.stats().resident_bytes, 300);
        assert_eq!(cache.stats().counters.evictions, 1);

        // evicted, not lost
        assert_eq!(get(&cache, &blobs[1].0).await, blobs[1].1);
        assert_eq!(origin.gets(), 1);
    }

    #[tokio::test]
    async fn test_oversized_blob_bypasses_cache() {
        let origin = CountingOrigin::new();
        let cache = TieredCache::new(50, MemoryStore::new(), origin.clone());
        let (a, d) = blob(20, 100);

        put(&cache, &a, &d).await;
        assert!(!cache.is_resident(&a));
        assert_eq!(cache.stats().counters.rejections, 1);
        assert_eq!(get(&cache, &a).await, d);
        assert_eq!(origin.gets(), 1);
    }

    #[tokio::test]
    async fn test_read_your_writes_under_pressure() {
        let origin = CountingOrigin::new();
        let cache = TieredCache::new(1000, MemoryStore::new(), origin);
        let blobs: Vec<_> = (0..50).map(|i| blob(100 + i, 64 + i as usize)).collect();

        for (a, d) in &blobs {
            put(&cache, a, d).await;
            assert_eq!(get(&cache, a).await, *d);
        }
        for (a, d) in &blobs {
            assert_eq!(get(&cache, a).await, *d);
        }
        assert!(cache.stats().resident_bytes <= 1000);
    }

    #[tokio::test]
    async fn test_working_set_stays_resident() {
        const WORKING_SET: u64 = 1000;
        let origin = CountingOrigin::new();
        let cache = TieredCache::for_working_set(WORKING_SET, origin.clone());
        assert_eq!(cache.capacity(), WORKING_SET * FAST_TIER_SAFETY_FACTOR);

        // 3.5x the working set, all fetched once from the origin
        let blobs: Vec<_> = (0..35).map(|i| blob(200 + i, 100)).collect();
        for (a, d) in &blobs {
            origin.inner.insert(a.clone(), d.clone());
        }
        for _ in 0..3 {
            for (a, d) in &blobs {
                assert_eq!(get(&cache, a).await, *d);
            }
        }
        assert_eq!(origin.gets(), blobs.len());
        assert_eq!(cache.stats().counters.evictions, 0);
    }

    #[tokio::test]
    async fn test_bounded_fast_store_falls_back_to_origin() {
        let origin = CountingOrigin::new();
        let cache = TieredCache::new(1000, MemoryStore::with_capacity(250), origin.clone());
        let blobs: Vec<_> = (0..4).map(|i| blob(300 + i, 100)).collect();
        for (a, d) in &blobs {
            put(&cache, a, d).await;
        }
        assert!(cache.stats().resident_bytes <= 250);
        for (a, d) in &blobs {
            assert_eq!(get(&cache, a).await, *d);
        }
    }

    #[tokio::test]
    async fn test_stat_prefers_index() {
        let origin = CountingOrigin::new();
        let cache = TieredCache::new(1000, MemoryStore::new(), origin.clone());
        let (a, da) = blob(400, 10);
        let (b, db) = blob(401, 20);
        let (c, _) = blob(402, 30);
        put(&cache, &a, &da).await;
        origin.inner.insert(b.clone(), db);

        let sizes = cache.stat(std::slice::from_ref(&a)).await.unwrap();
        assert_eq!(sizes[&a], 10);
        assert_eq!(origin.stats.load(Ordering::SeqCst), 0);

        let sizes = cache.stat(&[a.clone(), b.clone(), c]).await.unwrap();
        assert_eq!(sizes.len(), 2);
        assert_eq!(sizes[&b], 20);
        assert_eq!(origin.stats.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_enumerate_delegates() {
        let origin = CountingOrigin::new();
        let cache = TieredCache::new(1000, MemoryStore::new(), origin.clone());
        let (a, d) = blob(500, 10);
        origin.inner.insert(a.clone(), d);

        let page = cache.enumerate(None, 10).await.unwrap();
        assert_eq!(page, vec![SizedAddress::new(a, 10)]);
    }

    #[tokio::test]
    async fn test_facets_follow_origin() {
        // CountingOrigin offers no facets
        let plain = TieredCache::new(1000, MemoryStore::new(), CountingOrigin::new());
        assert!(plain.as_sub_fetcher().is_none());
        assert!(plain.enumerate_config().is_none());

        let origin = Arc::new(MemoryStore::new());
        let (a, d) = blob(600, 16);
        origin.insert(a.clone(), d.clone());
        let cache = TieredCache::new(1000, MemoryStore::new(), origin);
        let facet = cache.as_sub_fetcher().expect("origin offers sub-fetch");

        // cold: served by the origin's facet
        let part = read_all(facet.sub_fetch(&a, 4, 4).await.unwrap(), None).await.unwrap();
        assert_eq!(part, d.slice(4..8));

        // warm: sliced locally
        get(&cache, &a).await;
        let part = read_all(facet.sub_fetch(&a, 12, 100).await.unwrap(), None).await.unwrap();
        assert_eq!(part, d.slice(12..));
        assert_matches!(facet.sub_fetch(&a, 17, 1).await.err(), Some(Error::OutOfRange { .. }));
    }

    #[tokio::test]
    async fn test_concurrent_readers() {
        let origin = CountingOrigin::new();
        let cache = Arc::new(TieredCache::new(10_000, MemoryStore::new(), origin.clone()));
        let blobs: Arc<Vec<_>> = Arc::new((0..20).map(|i| blob(700 + i, 50)).collect());
        for (a, d) in blobs.iter() {
            origin.inner.insert(a.clone(), d.clone());
        }

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let blobs = Arc::clone(&blobs);
                tokio::spawn(async move {
                    for (a, d) in blobs.iter() {
                        let got = cache.get(a).await.unwrap().into_bytes().await.unwrap();
                        assert_eq!(&got, d);
                    }
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(cache.stats().resident_blobs, 20);
    }
}
