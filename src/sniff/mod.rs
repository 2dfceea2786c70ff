//! Blob Sniffer
//!
//! Classifies a blob's content as it streams in, retaining only a bounded
//! prefix.
//!
//! # Classification
//!
//! ```text
//!  prefix (≤ 1 MiB) ──► starts with '{' and has "schemaVersion"?
//!                         │ yes                         │ no
//!                         ▼                             │
//!                decodes as schema blob? ── no ─────────┤
//!                         │ yes                         ▼
//!                         ▼                     magic-number table
//!   Structured: application/json; schemaType=T    Opaque: type or ""
//! ```

mod magic;
mod schema;
mod sniffer;

pub use magic::mime_type;
pub use schema::{likely_schema_blob, SchemaBlob, MAX_SCHEMA_BLOB_SIZE};
pub use sniffer::{BlobSniffer, Classification, SCHEMA_MIME_BASE};
