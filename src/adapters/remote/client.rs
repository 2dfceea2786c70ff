//! HTTP implementation of the object API
//!
//! Object reads, writes and listings go through an `object_store` S3 client
//! built per bucket. The bucket check and location lookup are sent as
//! path-style requests signed with Signature V4, because startup needs the
//! raw service error code and redirect endpoint. The signing region follows
//! the current hostname, so a rebind during startup also switches the region.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use futures::{StreamExt, TryStreamExt};
use object_store::aws::AmazonS3Builder;
use object_store::path::Path;
use object_store::{
    ClientOptions, GetOptions, GetRange, ObjectStore, PutPayload, RetryConfig,
};
use parking_lot::Mutex;
use reqwest::{Client, Method, Response};
use tracing::{debug, instrument};

use super::api::{
    ApiError, ApiResult, ByteRange, ListPage, ListRequest, ListedObject, ObjectApi, ObjectBody,
};
use super::signer::{self, Credentials, SigningRequest, EMPTY_PAYLOAD_SHA256};
use super::xml;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_RETRIES: usize = 3;

/// `ObjectApi` over `object_store` and `reqwest`.
pub struct HttpObjectClient {
    client: Client,
    hostname: String,
    scheme: &'static str,
    credentials: Credentials,
    /// Stores bound to the current hostname, keyed by bucket
    stores: Mutex<HashMap<String, Arc<dyn ObjectStore>>>,
}

impl HttpObjectClient {
    /// Create a client for `hostname`. `insecure` selects plain HTTP.
    pub fn new(hostname: impl Into<String>, credentials: Credentials, insecure: bool) -> ApiResult<Self> {
        // redirects carry no Location; they are handled at startup instead
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(ApiError::Request)?;
        Ok(Self {
            client,
            hostname: hostname.into(),
            scheme: if insecure { "http" } else { "https" },
            credentials,
            stores: Mutex::new(HashMap::new()),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}://{}", self.scheme, self.hostname)
    }

    /// Data-plane store for `bucket`, built on first use.
    fn store(&self, bucket: &str) -> ApiResult<Arc<dyn ObjectStore>> {
        let mut stores = self.stores.lock();
        if let Some(store) = stores.get(bucket) {
            return Ok(store.clone());
        }

        let store = AmazonS3Builder::new()
            .with_bucket_name(bucket)
            .with_region(xml::region_from_hostname(&self.hostname))
            .with_endpoint(self.endpoint())
            .with_access_key_id(&self.credentials.access_key_id)
            .with_secret_access_key(&self.credentials.secret_access_key)
            .with_allow_http(self.scheme == "http")
            .with_virtual_hosted_style_request(false)
            .with_retry(RetryConfig {
                max_retries: MAX_RETRIES,
                ..RetryConfig::default()
            })
            .with_client_options(ClientOptions::new().with_connect_timeout(CONNECT_TIMEOUT))
            .build()?;
        debug!(bucket, endpoint = %self.endpoint(), "built object store");

        let store: Arc<dyn ObjectStore> = Arc::new(store);
        stores.insert(bucket.to_string(), store.clone());
        Ok(store)
    }

    /// Sign and send one control-path GET. Non-2xx responses become
    /// [`ApiError::Service`].
    async fn send_control(&self, path: &str, query: &[(&str, String)]) -> ApiResult<Response> {
        let canonical_uri = signer::encode_path(path);
        let query_string = signer::canonical_query(query);

        let region = xml::region_from_hostname(&self.hostname);
        let signed = signer::sign(
            &self.credentials,
            &region,
            &SigningRequest {
                method: Method::GET.as_str(),
                host: &self.hostname,
                canonical_uri: &canonical_uri,
                query,
                payload_sha256: EMPTY_PAYLOAD_SHA256,
            },
            Utc::now(),
        )?;

        let mut url = format!("{}{}", self.endpoint(), canonical_uri);
        if !query_string.is_empty() {
            url.push('?');
            url.push_str(&query_string);
        }
        debug!(%url, "S3 control request");

        let response = self
            .client
            .get(&url)
            .header("authorization", signed.authorization)
            .header("x-amz-date", signed.amz_date)
            .header("x-amz-content-sha256", signed.content_sha256)
            .send()
            .await
            .map_err(ApiError::Request)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let text = response.text().await.unwrap_or_default();
        Err(ApiError::Service(xml::parse_error(status.as_u16(), &text)))
    }
}

impl std::fmt::Debug for HttpObjectClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpObjectClient")
            .field("hostname", &self.hostname)
            .field("scheme", &self.scheme)
            .field("credentials", &self.credentials)
            .finish()
    }
}

/// Maps "object absent" to `None`.
fn absent_as_none<T>(result: object_store::Result<T>) -> ApiResult<Option<T>> {
    match result {
        Ok(v) => Ok(Some(v)),
        Err(object_store::Error::NotFound { .. }) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Half-open store range for an inclusive byte range.
fn get_range(range: ByteRange) -> GetRange {
    GetRange::Bounded(range.start as usize..range.end_inclusive as usize + 1)
}

#[async_trait]
impl ObjectApi for HttpObjectClient {
    fn hostname(&self) -> &str {
        &self.hostname
    }

    fn set_hostname(&mut self, hostname: String) {
        self.hostname = hostname;
        self.stores.get_mut().clear();
    }

    #[instrument(skip(self), fields(host = %self.hostname))]
    async fn check_bucket(&self, bucket: &str) -> ApiResult<()> {
        let query = [("list-type", "2".to_string()), ("max-keys", "1".to_string())];
        self.send_control(&format!("/{}", bucket), &query).await?;
        Ok(())
    }

    #[instrument(skip(self, request), fields(host = %self.hostname))]
    async fn list_objects(&self, bucket: &str, request: ListRequest<'_>) -> ApiResult<ListPage> {
        let store = self.store(bucket)?;
        let prefix = (!request.prefix.is_empty()).then(|| Path::from(request.prefix));
        // the continuation token is the last key of the previous page
        let offset = request.continuation.or(request.start_after).map(Path::from);

        let listing = match &offset {
            Some(offset) => store.list_with_offset(prefix.as_ref(), offset),
            None => store.list(prefix.as_ref()),
        };
        let metas: Vec<_> = listing.take(request.max_keys).try_collect().await?;

        let objects: Vec<ListedObject> = metas
            .into_iter()
            .map(|meta| ListedObject {
                key: meta.location.to_string(),
                size: meta.size as u64,
            })
            .collect();
        let next_continuation = if request.max_keys > 0 && objects.len() == request.max_keys {
            objects.last().map(|o| o.key.clone())
        } else {
            None
        };
        Ok(ListPage {
            objects,
            next_continuation,
        })
    }

    #[instrument(skip(self), fields(host = %self.hostname))]
    async fn bucket_location(&self, bucket: &str) -> ApiResult<String> {
        let query = [("location", String::new())];
        let response = self.send_control(&format!("/{}", bucket), &query).await?;
        let body = response.text().await.map_err(ApiError::Request)?;
        let region = xml::parse_location(&body)?;
        Ok(xml::region_hostname(&region))
    }

    async fn head_object(&self, bucket: &str, key: &str) -> ApiResult<Option<u64>> {
        let store = self.store(bucket)?;
        let meta = absent_as_none(store.head(&Path::from(key)).await)?;
        Ok(meta.map(|m| m.size as u64))
    }

    async fn get_object(
        &self,
        bucket: &str,
        key: &str,
        range: Option<ByteRange>,
    ) -> ApiResult<Option<ObjectBody>> {
        let store = self.store(bucket)?;
        let options = GetOptions {
            range: range.map(get_range),
            ..Default::default()
        };
        let Some(result) = absent_as_none(store.get_opts(&Path::from(key), options).await)? else {
            return Ok(None);
        };
        let content_length = (result.range.end - result.range.start) as u64;
        let stream = result
            .into_stream()
            .map(|chunk| chunk.map_err(std::io::Error::other))
            .boxed();
        Ok(Some(ObjectBody {
            content_length,
            stream,
        }))
    }

    async fn put_object(&self, bucket: &str, key: &str, body: Bytes) -> ApiResult<()> {
        let store = self.store(bucket)?;
        store.put(&Path::from(key), PutPayload::from(body)).await?;
        Ok(())
    }
}
