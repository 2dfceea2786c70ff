//! blobvault - Content-Addressed Blob Storage Core
//!
//! Blobs are identified solely by a digest of their content and stored
//! interchangeably across in-memory, remote (S3-compatible) and cached
//! backends. Incoming blobs can be classified on write so an indexer can tell
//! structured metadata blobs apart from opaque data.
//!
//! # Architecture
//!
//! ```text
//!  write ──► BlobSniffer ──► classification (mime type, schema type)
//!    │
//!    ▼
//!  TieredCache ──miss / write-through──► RemoteStorage ──► ObjectApi (S3)
//!    │                                        or
//!    └── fast tier: MemoryStore               MemoryStore
//! ```
//!
//! # Modules
//!
//! - [`adapters`] - Storage backends (remote S3, in-memory) and dispatch
//! - [`cache`] - Tiered caching decorator
//! - [`config`] - Typed configuration objects
//! - [`domain`] - Content addresses and the storage capability ports
//! - [`error`] - Error types
//! - [`sniff`] - Streaming blob classifier

pub mod adapters;
pub mod cache;
pub mod config;
pub mod domain;
pub mod error;
pub mod sniff;

// Re-export commonly used types
pub use adapters::{open_storage, MemoryStore, RemoteStorage};
pub use cache::TieredCache;
pub use config::{Config, StorageConfig};
pub use domain::{BlobStorage, ContentAddress, HashAlgorithm, SizedAddress};
pub use error::{Error, Result};
pub use sniff::BlobSniffer;
