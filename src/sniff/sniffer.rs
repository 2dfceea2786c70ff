use std::io;

use super::magic;
use super::schema::{likely_schema_blob, SchemaBlob, MAX_SCHEMA_BLOB_SIZE};
use crate::domain::ContentAddress;
use crate::error::{Error, Result};

/// Base content type of structured blobs; the type tag is appended as a
/// parameter.
pub const SCHEMA_MIME_BASE: &str = "application/json";

/// What a sniffed blob turned out to be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// A schema blob carrying this type tag
    Structured { schema_type: String },
    /// Anything else
    Opaque,
}

#[derive(Debug)]
struct Resolved {
    mime_type: String,
    schema: Option<SchemaBlob>,
}

/// Classifies one blob as its bytes stream past.
///
/// Keeps at most [`MAX_SCHEMA_BLOB_SIZE`] leading bytes; anything beyond is
/// only counted. Writes never fail.
#[derive(Debug)]
pub struct BlobSniffer {
    address: ContentAddress,
    contents: Vec<u8>,
    written: u64,
    resolved: Option<Resolved>,
}

impl BlobSniffer {
    pub fn new(address: ContentAddress) -> Self {
        Self {
            address,
            contents: Vec::new(),
            written: 0,
            resolved: None,
        }
    }

    pub fn address(&self) -> &ContentAddress {
        &self.address
    }

    /// Feed the next chunk. Returns `data.len()`.
    pub fn write(&mut self, data: &[u8]) -> usize {
        self.written += data.len() as u64;
        let room = MAX_SCHEMA_BLOB_SIZE.saturating_sub(self.contents.len());
        let keep = room.min(data.len());
        self.contents.extend_from_slice(&data[..keep]);
        data.len()
    }

    /// Total bytes written, including any not retained.
    pub fn size(&self) -> u64 {
        self.written
    }

    /// Reports whether more than [`MAX_SCHEMA_BLOB_SIZE`] bytes were written.
    pub fn is_truncated(&self) -> bool {
        self.written > MAX_SCHEMA_BLOB_SIZE as u64
    }

    /// The full blob, if it fit in the buffer.
    pub fn body(&self) -> Result<&[u8]> {
        if self.is_truncated() {
            return Err(Error::Truncated {
                written: self.written,
                limit: MAX_SCHEMA_BLOB_SIZE,
            });
        }
        Ok(&self.contents)
    }

    /// Resolve the classification. Later calls are no-ops.
    pub fn parse(&mut self) {
        if self.resolved.is_some() {
            return;
        }
        let resolved = match self.decode_schema() {
            Some(schema) => Resolved {
                mime_type: format!("{}; schemaType={}", SCHEMA_MIME_BASE, schema.schema_type()),
                schema: Some(schema),
            },
            None => Resolved {
                mime_type: magic::mime_type(&self.contents).to_string(),
                schema: None,
            },
        };
        self.resolved = Some(resolved);
    }

    fn decode_schema(&self) -> Option<SchemaBlob> {
        // a schema blob is complete by definition
        if self.is_truncated() || !likely_schema_blob(&self.contents) {
            return None;
        }
        SchemaBlob::parse(&self.contents).ok()
    }

    /// Reports whether `parse` has run.
    pub fn is_parsed(&self) -> bool {
        self.resolved.is_some()
    }

    /// Content type, or `""` if unknown or not yet parsed.
    pub fn mime_type(&self) -> &str {
        self.resolved.as_ref().map_or("", |r| r.mime_type.as_str())
    }

    /// Type tag of a structured blob, `""` otherwise.
    pub fn class_tag(&self) -> &str {
        self.schema_blob().map_or("", SchemaBlob::schema_type)
    }

    /// The decoded document of a structured blob.
    pub fn schema_blob(&self) -> Option<&SchemaBlob> {
        self.resolved.as_ref()?.schema.as_ref()
    }

    /// `None` until parsed.
    pub fn classification(&self) -> Option<Classification> {
        let resolved = self.resolved.as_ref()?;
        Some(match &resolved.schema {
            Some(schema) => Classification::Structured {
                schema_type: schema.schema_type().to_string(),
            },
            None => Classification::Opaque,
        })
    }
}

impl io::Write for BlobSniffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(BlobSniffer::write(self, buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
