//! Structured metadata blobs
//!
//! A schema blob is a small JSON object that declares its own format:
//!
//! ```json
//! {"schemaVersion": 1, "schemaType": "permanode", "random": "..."}
//! ```

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// Largest blob that can be a schema blob.
pub const MAX_SCHEMA_BLOB_SIZE: usize = 1 << 20;

const VERSION_FIELD: &str = "schemaVersion";
const TYPE_FIELD: &str = "schemaType";

/// Cheap structural check: does `buf` look like a schema blob at all?
///
/// True when it starts with `{` and mentions the quoted `schemaVersion` key
/// somewhere. A positive answer still has to survive [`SchemaBlob::parse`].
pub fn likely_schema_blob(buf: &[u8]) -> bool {
    const NEEDLE: &[u8] = b"\"schemaVersion\"";
    buf.first() == Some(&b'{') && buf.windows(NEEDLE.len()).any(|w| w == NEEDLE)
}

/// A decoded schema blob.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchemaBlob {
    version: u64,
    schema_type: String,
    document: Map<String, Value>,
}

impl SchemaBlob {
    /// Decode `buf`, which must be a JSON object with an integer
    /// `schemaVersion` and a non-empty string `schemaType`.
    pub fn parse(buf: &[u8]) -> Result<Self> {
        let value: Value = serde_json::from_slice(buf)
            .map_err(|e| Error::InvalidSchema(format!("not JSON: {}", e)))?;
        let Value::Object(document) = value else {
            return Err(Error::InvalidSchema("not a JSON object".into()));
        };

        let version = document
            .get(VERSION_FIELD)
            .and_then(Value::as_u64)
            .ok_or_else(|| Error::InvalidSchema(format!("{} must be an integer", VERSION_FIELD)))?;
        let schema_type = match document.get(TYPE_FIELD) {
            Some(Value::String(t)) if !t.is_empty() => t.clone(),
            _ => {
                return Err(Error::InvalidSchema(format!(
                    "{} must be a non-empty string",
                    TYPE_FIELD
                )))
            }
        };

        Ok(Self {
            version,
            schema_type,
            document,
        })
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// The declared type tag, e.g. `permanode`.
    pub fn schema_type(&self) -> &str {
        &self.schema_type
    }

    /// A top-level field of the document.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.document.get(field)
    }

    /// The whole decoded document.
    pub fn document(&self) -> &Map<String, Value> {
        &self.document
    }
}
