//! Object API port
//!
//! The subset of the S3 API the remote backend needs. [`super::HttpObjectClient`]
//! implements it over `object_store` plus a signed control path; tests
//! substitute an in-process fake.

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

use crate::domain::ByteStream;

/// S3 error code: the bucket does not exist.
pub const NO_SUCH_BUCKET: &str = "NoSuchBucket";
/// S3 error code: the object does not exist.
pub const NO_SUCH_KEY: &str = "NoSuchKey";
/// S3 error code: the access key id is unknown.
pub const INVALID_ACCESS_KEY_ID: &str = "InvalidAccessKeyId";
/// S3 error code: the request signature (secret key) was rejected.
pub const SIGNATURE_DOES_NOT_MATCH: &str = "SignatureDoesNotMatch";
/// S3 error code: the bucket lives behind a different endpoint.
pub const PERMANENT_REDIRECT: &str = "PermanentRedirect";

/// Error document returned by the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceError {
    /// HTTP status code
    pub status: u16,
    /// Service error code, e.g. `NoSuchBucket`
    pub code: String,
    pub message: String,
    /// Endpoint the service asks us to use instead, if any
    pub endpoint: Option<String>,
}

impl ServiceError {
    pub fn new(status: u16, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.into(),
            message: message.into(),
            endpoint: None,
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Reports whether this is a redirect to another endpoint or region.
    pub fn is_redirect(&self) -> bool {
        self.code == PERMANENT_REDIRECT || self.status == 301
    }
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (HTTP {})", self.code, self.status)?;
        if !self.message.is_empty() {
            write!(f, ": {}", self.message)?;
        }
        if let Some(endpoint) = &self.endpoint {
            write!(f, " [endpoint {}]", endpoint)?;
        }
        Ok(())
    }
}

/// Errors from the object API
#[derive(Debug, Error)]
pub enum ApiError {
    /// The service answered with an error document
    #[error("service error: {0}")]
    Service(ServiceError),

    /// The request never produced a usable response
    #[error("request failed: {0}")]
    Request(#[source] reqwest::Error),

    /// Data-plane failure reported by the object store client
    #[error("object store: {0}")]
    Store(#[from] object_store::Error),

    /// The request could not be signed
    #[error("request signing failed: {0}")]
    Signing(String),

    /// The response body could not be decoded
    #[error("malformed response: {0}")]
    Decode(String),
}

impl ApiError {
    /// The service error document, if the service answered with one.
    pub fn service(&self) -> Option<&ServiceError> {
        match self {
            ApiError::Service(e) => Some(e),
            _ => None,
        }
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// One page of a listing request.
#[derive(Debug, Clone, Default)]
pub struct ListRequest<'a> {
    /// Only keys beginning with this prefix
    pub prefix: &'a str,
    /// Only keys strictly greater than this one
    pub start_after: Option<&'a str>,
    /// Token from the previous page's [`ListPage::next_continuation`]
    pub continuation: Option<&'a str>,
    pub max_keys: usize,
}

/// A listed object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedObject {
    pub key: String,
    pub size: u64,
}

/// One page of listing results, in key order.
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    pub objects: Vec<ListedObject>,
    /// Token for the next page when the listing was truncated
    pub next_continuation: Option<String>,
}

/// Inclusive byte range for ranged reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end_inclusive: u64,
}

/// Object body as returned by a read.
pub struct ObjectBody {
    /// Bytes in this response (the range length for ranged reads)
    pub content_length: u64,
    pub stream: ByteStream,
}

/// Port for the S3-style object API.
#[async_trait]
pub trait ObjectApi: Send + Sync {
    /// Endpoint hostname requests are sent to.
    fn hostname(&self) -> &str;

    /// Rebind the endpoint hostname. Only called while the backend is being
    /// built.
    fn set_hostname(&mut self, hostname: String);

    /// One-item listing that proves the bucket exists and the credentials
    /// work. Failures carry the raw service error document.
    async fn check_bucket(&self, bucket: &str) -> ApiResult<()> {
        self.list_objects(
            bucket,
            ListRequest {
                max_keys: 1,
                ..Default::default()
            },
        )
        .await
        .map(|_| ())
    }

    /// List keys in `bucket`.
    async fn list_objects(&self, bucket: &str, request: ListRequest<'_>) -> ApiResult<ListPage>;

    /// Hostname serving `bucket`, derived from its location constraint.
    async fn bucket_location(&self, bucket: &str) -> ApiResult<String>;

    /// Size of an object, `None` if absent.
    async fn head_object(&self, bucket: &str, key: &str) -> ApiResult<Option<u64>>;

    /// Read an object (or a range of it), `None` if absent.
    async fn get_object(
        &self,
        bucket: &str,
        key: &str,
        range: Option<ByteRange>,
    ) -> ApiResult<Option<ObjectBody>>;

    /// Write an object.
    async fn put_object(&self, bucket: &str, key: &str, body: Bytes) -> ApiResult<()>;
}
