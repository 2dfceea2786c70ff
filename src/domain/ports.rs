//! Domain Ports (DDD Port/Adapter Pattern)
//!
//! This module defines the storage capability every backend implements, plus
//! the optional capability facets a backend may additionally offer.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Domain Layer                            │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │                    Ports (Traits)                    │    │
//! │  │   BlobStorage │ SubFetcher (facet) │ EnumerateConfig │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Infrastructure Layer                       │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │                  Adapters (Impls)                    │    │
//! │  │     RemoteStorage │ MemoryStore │ TieredCache       │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Facets are probed explicitly (`as_sub_fetcher`, `enumerate_config`); a
//! backend that lacks one returns `None`.

use std::collections::BTreeMap;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::stream::{self, BoxStream, StreamExt};

use super::address::{ContentAddress, SizedAddress};
use crate::error::{Error, Result};

// =============================================================================
// Byte Streams
// =============================================================================

/// Streaming blob body.
pub type ByteStream = BoxStream<'static, std::io::Result<Bytes>>;

/// Wrap an in-memory buffer as a single-chunk stream.
pub fn stream_from_bytes(data: Bytes) -> ByteStream {
    stream::once(async move { Ok(data) }).boxed()
}

/// Wrap a sequence of chunks as a stream.
pub fn stream_from_chunks(chunks: Vec<Bytes>) -> ByteStream {
    stream::iter(chunks.into_iter().map(Ok)).boxed()
}

/// Drain a stream into a contiguous buffer.
///
/// `size_hint` only pre-sizes the buffer.
pub async fn read_all(mut body: ByteStream, size_hint: Option<u64>) -> Result<Bytes> {
    let cap = size_hint.map(|n| n.min(64 << 20) as usize).unwrap_or(0);
    let mut buf = BytesMut::with_capacity(cap);
    while let Some(chunk) = body.next().await {
        buf.extend_from_slice(&chunk?);
    }
    Ok(buf.freeze())
}

/// Drain `body` and enforce the integrity rules shared by every backend's
/// `put`: the declared length must match, and the content must hash to
/// `address`.
pub async fn read_verified(
    address: &ContentAddress,
    body: ByteStream,
    declared_len: Option<u64>,
) -> Result<Bytes> {
    let data = read_all(body, declared_len).await?;
    let actual = data.len() as u64;
    if let Some(declared) = declared_len {
        if declared != actual {
            return Err(Error::LengthMismatch {
                address: address.clone(),
                declared,
                actual,
            });
        }
    }
    let mut hasher = address.hasher();
    hasher.update(&data);
    let computed = hasher.finish();
    if computed != *address {
        return Err(Error::HashMismatch {
            address: address.clone(),
            computed: computed.to_string(),
        });
    }
    Ok(data)
}

/// A blob being read: its size and a stream of its bytes.
pub struct FetchedBlob {
    size: u64,
    body: ByteStream,
}

impl FetchedBlob {
    pub fn new(size: u64, body: ByteStream) -> Self {
        Self { size, body }
    }

    pub fn from_bytes(data: Bytes) -> Self {
        Self {
            size: data.len() as u64,
            body: stream_from_bytes(data),
        }
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn into_stream(self) -> ByteStream {
        self.body
    }

    /// Buffer the whole body.
    pub async fn into_bytes(self) -> Result<Bytes> {
        read_all(self.body, Some(self.size)).await
    }
}

impl std::fmt::Debug for FetchedBlob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchedBlob").field("size", &self.size).finish()
    }
}

// =============================================================================
// Storage Port
// =============================================================================

/// Port for content-addressed blob storage.
///
/// All implementations must satisfy these invariants:
/// - A blob is either absent or present in full; there is no partial update.
/// - `stat` omits absent addresses instead of failing.
/// - `enumerate` is strictly ascending by canonical address string and
///   resumable with the last returned address as the next cursor.
#[async_trait]
pub trait BlobStorage: Send + Sync {
    /// Read a blob. Fails with [`Error::NotFound`] when absent.
    async fn get(&self, address: &ContentAddress) -> Result<FetchedBlob>;

    /// Store a blob read from `body`.
    ///
    /// `declared_len` is advisory for allocation, but a disagreement with the
    /// received byte count fails with [`Error::LengthMismatch`].
    async fn put(
        &self,
        address: &ContentAddress,
        body: ByteStream,
        declared_len: Option<u64>,
    ) -> Result<SizedAddress>;

    /// Sizes of the present subset of `addresses`.
    async fn stat(&self, addresses: &[ContentAddress]) -> Result<BTreeMap<ContentAddress, u64>>;

    /// Up to `limit` blobs strictly after `after`, ascending.
    async fn enumerate(
        &self,
        after: Option<&ContentAddress>,
        limit: usize,
    ) -> Result<Vec<SizedAddress>>;

    /// Byte-range read facet, if supported.
    fn as_sub_fetcher(&self) -> Option<&dyn SubFetcher> {
        None
    }

    /// Enumeration page-size facet, if supported.
    fn enumerate_config(&self) -> Option<&dyn EnumerateConfig> {
        None
    }
}

/// Optional facet: read part of a blob without transferring all of it.
#[async_trait]
pub trait SubFetcher: Send + Sync {
    /// Read up to `length` bytes starting at `offset`.
    ///
    /// A range extending past the end is cut at the end of the blob; an
    /// `offset` past the end fails with [`Error::OutOfRange`].
    async fn sub_fetch(
        &self,
        address: &ContentAddress,
        offset: u64,
        length: u64,
    ) -> Result<ByteStream>;
}

/// Optional facet: the backend's preferred maximum enumeration page.
pub trait EnumerateConfig: Send + Sync {
    fn max_enumerate(&self) -> usize;
}

/// Slice `[offset, offset + length)` out of an in-memory blob, clamped at the
/// end.
pub fn slice_range(
    address: &ContentAddress,
    data: &Bytes,
    offset: u64,
    length: u64,
) -> Result<Bytes> {
    let size = data.len() as u64;
    if offset > size {
        return Err(Error::OutOfRange {
            address: address.clone(),
            offset,
            size,
        });
    }
    let end = offset.saturating_add(length).min(size);
    Ok(data.slice(offset as usize..end as usize))
}
