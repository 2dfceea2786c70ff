//! Infrastructure Adapters
//!
//! This module contains the storage backends implementing the domain ports,
//! following the Port/Adapter (Hexagonal) architecture pattern.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Domain Layer                              │
//! │  ┌────────────────────────────────────────────────────────────┐ │
//! │  │                    Ports (Traits)                           │ │
//! │  │       BlobStorage │ SubFetcher │ EnumerateConfig           │ │
//! │  └────────────────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     Adapters (This Module)                       │
//! │  ┌────────────────────────────────────────────────────────────┐ │
//! │  │   RemoteStorage (S3 over ObjectApi) │ MemoryStore          │ │
//! │  └────────────────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use blobvault::adapters::open_storage;
//! use blobvault::config::{MemoryConfig, StorageConfig};
//!
//! // Open a backend from its typed configuration
//! let storage = open_storage(&StorageConfig::Memory(MemoryConfig::default())).await?;
//!
//! // Use it through the domain port trait
//! let blob = storage.get(&address).await?;
//! ```

pub mod memory;
pub mod remote;

use std::sync::Arc;

use tracing::info;

use crate::config::StorageConfig;
use crate::domain::BlobStorage;
use crate::error::Result;

pub use memory::MemoryStore;
pub use remote::RemoteStorage;

/// Open the backend a [`StorageConfig`] describes.
///
/// Remote backends run their startup check here and come back wrapped in a
/// tiered cache unless their `cache_size` is zero.
pub async fn open_storage(config: &StorageConfig) -> Result<Arc<dyn BlobStorage>> {
    match config {
        StorageConfig::S3(remote) => RemoteStorage::open(remote).await,
        StorageConfig::Memory(memory) => {
            let store = match memory.capacity {
                Some(capacity) => MemoryStore::with_capacity(capacity),
                None => MemoryStore::new(),
            };
            info!(capacity = ?memory.capacity, "opened memory storage");
            Ok(Arc::new(store))
        }
    }
}
