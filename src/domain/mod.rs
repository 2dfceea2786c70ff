//! Domain Layer
//!
//! Blob identity and the storage capability contract.
//!
//! # Architecture
//!
//! - **Address** (`address.rs`) - Content addresses and digest algorithms
//! - **Ports** (`ports.rs`) - The `BlobStorage` trait and its optional facets
//! - **Cancel** (`cancel.rs`) - Cancellation/deadline wrappers for operations
//!
//! # Usage
//!
//! ```ignore
//! use blobvault::domain::{BlobStorage, ContentAddress};
//!
//! async fn copy_blob<S, D>(src: &S, dst: &D, address: &ContentAddress) -> Result<()>
//! where
//!     S: BlobStorage,
//!     D: BlobStorage,
//! {
//!     let blob = src.get(address).await?;
//!     let size = blob.size();
//!     dst.put(address, blob.into_stream(), Some(size)).await?;
//!     Ok(())
//! }
//! ```

pub mod address;
pub mod cancel;
pub mod ports;

pub use address::{ContentAddress, DigestHasher, HashAlgorithm, SizedAddress};
pub use cancel::{cancellable, with_deadline};
pub use ports::{
    read_all, read_verified, slice_range, stream_from_bytes, stream_from_chunks, BlobStorage,
    ByteStream, EnumerateConfig, FetchedBlob, SubFetcher,
};
