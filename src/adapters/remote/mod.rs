//! Remote Backend - S3-compatible object storage
//!
//! Stores each blob as one object named `<dir_prefix><algorithm>-<hex>` in a
//! bucket.
//!
//! # Construction
//!
//! ```text
//! RemoteConfig ──► split bucket/prefix ──► startup check (1-item listing)
//!                                              │
//!                 ┌────────────────────────────┼─────────────────────────┐
//!                 ▼                            ▼                         ▼
//!             success              redirect / endpoint hint        other failure
//!                 │                rebind hostname, retry once       (fatal)
//!                 ▼                            │
//!        cache_size != 0 ? ◄──────────────────┘
//!          TieredCache(cache_size × 4) : bare backend
//! ```
//!
//! The hostname can only change inside [`RemoteStorage::build`], while the
//! backend is still exclusively owned.

pub mod api;
pub mod client;
pub mod fault;
pub mod signer;
pub mod xml;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};

use crate::cache::TieredCache;
use crate::config::RemoteConfig;
use crate::domain::{
    read_verified, stream_from_bytes, BlobStorage, ByteStream, ContentAddress, EnumerateConfig,
    FetchedBlob, SizedAddress, SubFetcher,
};
use crate::error::{Error, Result};

pub use api::{
    ApiError, ApiResult, ByteRange, ListPage, ListRequest, ListedObject, ObjectApi, ObjectBody,
    ServiceError,
};
pub use client::HttpObjectClient;
pub use fault::{ArmedFaults, FaultInjector, FaultPoint, NoFaults};
pub use signer::Credentials;

/// Endpoint used when the configuration names none.
pub const DEFAULT_HOSTNAME: &str = "s3.amazonaws.com";

/// Upper bound on concurrent uploads, and on concurrent HEADs within a `stat`.
pub const MAX_PARALLEL_HTTP: usize = 5;

/// Largest page a single listing request returns.
pub const MAX_ENUMERATE: usize = 1000;

/// Split `bucket[/prefix]` on the first `/`. A non-empty prefix always ends
/// in `/`.
pub fn split_bucket(spec: &str) -> (String, String) {
    match spec.split_once('/') {
        Some((bucket, prefix)) if !prefix.is_empty() => {
            let mut prefix = prefix.to_string();
            if !prefix.ends_with('/') {
                prefix.push('/');
            }
            (bucket.to_string(), prefix)
        }
        Some((bucket, _)) => (bucket.to_string(), String::new()),
        None => (spec.to_string(), String::new()),
    }
}

/// S3-backed blob storage.
pub struct RemoteStorage {
    bucket: String,
    dir_prefix: String,
    api: Box<dyn ObjectApi>,
    put_gate: Arc<Semaphore>,
    faults: Arc<dyn FaultInjector>,
}

impl RemoteStorage {
    /// Build a backend from `config` over `api`, running the startup check
    /// unless the configuration skips it.
    ///
    /// The endpoint may be corrected once if the service redirects the
    /// bucket elsewhere; every other startup failure aborts the build.
    pub async fn build(
        config: &RemoteConfig,
        mut api: Box<dyn ObjectApi>,
        faults: Arc<dyn FaultInjector>,
    ) -> Result<Self> {
        if config.bucket.is_empty() {
            return Err(Error::config("bucket", "bucket name is required"));
        }
        let (bucket, dir_prefix) = split_bucket(&config.bucket);
        api.set_hostname(config.hostname().to_string());

        let mut storage = Self {
            bucket,
            dir_prefix,
            api,
            put_gate: Arc::new(Semaphore::new(MAX_PARALLEL_HTTP)),
            faults,
        };
        if !config.skip_startup_check {
            storage.startup_check().await?;
        }
        Ok(storage)
    }

    /// Build the HTTP-backed storage described by `config`, wrapped in a
    /// [`TieredCache`] unless `cache_size` is zero.
    pub async fn open(config: &RemoteConfig) -> Result<Arc<dyn BlobStorage>> {
        let api = HttpObjectClient::new(
            config.hostname(),
            Credentials {
                access_key_id: config.access_key_id.clone(),
                secret_access_key: config.secret_access_key.clone(),
            },
            config.insecure,
        )?;
        Self::open_with(config, Box::new(api), Arc::new(NoFaults)).await
    }

    /// Like [`RemoteStorage::open`] over a caller-supplied API.
    pub async fn open_with(
        config: &RemoteConfig,
        api: Box<dyn ObjectApi>,
        faults: Arc<dyn FaultInjector>,
    ) -> Result<Arc<dyn BlobStorage>> {
        let storage = Self::build(config, api, faults).await?;
        info!(storage = %storage, cache_size = config.cache_size(), "opened remote storage");

        let cache_size = config.cache_size();
        if cache_size == 0 {
            return Ok(Arc::new(storage));
        }
        Ok(Arc::new(TieredCache::for_working_set(
            cache_size,
            Arc::new(storage),
        )))
    }

    async fn startup_check(&mut self) -> Result<()> {
        let err = match self.api.check_bucket(&self.bucket).await {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };
        let Some(service) = err.service().cloned() else {
            return Err(Error::Transport(err));
        };
        if let Some(fatal) = self.configuration_error(&service) {
            return Err(fatal);
        }

        let configured = self.api.hostname().to_string();
        let dotted = self.bucket.contains('.');
        let corrected = if service.is_redirect() && dotted {
            // dotted buckets get no endpoint hint
            self.api.bucket_location(&self.bucket).await?
        } else if let Some(endpoint) = service.endpoint.as_deref().filter(|_| !dotted) {
            endpoint
                .strip_prefix(&format!("{}.", self.bucket))
                .unwrap_or(endpoint)
                .to_string()
        } else {
            return Err(Error::Transport(err));
        };

        debug!(from = %configured, to = %corrected, "rebinding S3 hostname");
        self.api.set_hostname(corrected);
        match self.api.check_bucket(&self.bucket).await {
            Ok(()) => {
                warn!(
                    "S3 server should be {:?}, not {:?}. Change the configuration to avoid start-up latency.",
                    self.api.hostname(),
                    configured
                );
                Ok(())
            }
            Err(retry) => {
                let classified = retry.service().and_then(|s| self.configuration_error(s));
                Err(classified.unwrap_or(Error::Transport(retry)))
            }
        }
    }

    /// Startup failures that point at a specific configuration field.
    fn configuration_error(&self, service: &ServiceError) -> Option<Error> {
        match service.code.as_str() {
            api::NO_SUCH_BUCKET => Some(Error::config(
                "bucket",
                format!("bucket {:?} doesn't exist", self.bucket),
            )),
            api::INVALID_ACCESS_KEY_ID => Some(Error::config(
                "access_key_id",
                format!("access key rejected by {}", self.api.hostname()),
            )),
            api::SIGNATURE_DOES_NOT_MATCH => Some(Error::config(
                "secret_access_key",
                format!("request signature rejected by {}", self.api.hostname()),
            )),
            _ => None,
        }
    }

    /// Object key for a blob.
    pub fn object_key(&self, address: &ContentAddress) -> String {
        format!("{}{}", self.dir_prefix, address)
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Key prefix, empty or ending in `/`.
    pub fn dir_prefix(&self) -> &str {
        &self.dir_prefix
    }

    pub fn hostname(&self) -> &str {
        self.api.hostname()
    }

    /// Upload permits currently free.
    pub fn available_upload_slots(&self) -> usize {
        self.put_gate.available_permits()
    }
}

impl fmt::Display for RemoteStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "\"s3\" blob storage at host {:?}, bucket {:?}",
            self.api.hostname(),
            self.bucket
        )?;
        if !self.dir_prefix.is_empty() {
            write!(f, ", directory {:?}", self.dir_prefix)?;
        }
        Ok(())
    }
}

impl fmt::Debug for RemoteStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteStorage")
            .field("hostname", &self.api.hostname())
            .field("bucket", &self.bucket)
            .field("dir_prefix", &self.dir_prefix)
            .field("available_upload_slots", &self.available_upload_slots())
            .finish()
    }
}

#[async_trait]
impl BlobStorage for RemoteStorage {
    #[instrument(skip(self), fields(address = %address))]
    async fn get(&self, address: &ContentAddress) -> Result<FetchedBlob> {
        self.faults.check(FaultPoint::Get)?;
        let body = self
            .api
            .get_object(&self.bucket, &self.object_key(address), None)
            .await?
            .ok_or_else(|| Error::NotFound(address.clone()))?;
        Ok(FetchedBlob::new(body.content_length, body.stream))
    }

    #[instrument(skip(self, body), fields(address = %address))]
    async fn put(
        &self,
        address: &ContentAddress,
        body: ByteStream,
        declared_len: Option<u64>,
    ) -> Result<SizedAddress> {
        self.faults.check(FaultPoint::Receive)?;
        let data = read_verified(address, body, declared_len).await?;
        let size = data.len() as u64;

        let _permit = self
            .put_gate
            .acquire()
            .await
            .map_err(|_| Error::Cancelled)?;
        self.api
            .put_object(&self.bucket, &self.object_key(address), data)
            .await?;
        debug!(size, "uploaded blob");
        Ok(SizedAddress::new(address.clone(), size))
    }

    #[instrument(skip(self, addresses), fields(count = addresses.len()))]
    async fn stat(&self, addresses: &[ContentAddress]) -> Result<BTreeMap<ContentAddress, u64>> {
        self.faults.check(FaultPoint::Stat)?;
        let this = self;
        // owned items keep the per-request futures free of borrowed addresses
        stream::iter(addresses.to_vec())
            .map(move |address| async move {
                let size = this
                    .api
                    .head_object(&this.bucket, &this.object_key(&address))
                    .await?;
                Ok::<_, Error>(size.map(|s| (address, s)))
            })
            .buffer_unordered(MAX_PARALLEL_HTTP)
            .try_fold(BTreeMap::new(), |mut found, entry| async move {
                if let Some((address, size)) = entry {
                    found.insert(address, size);
                }
                Ok(found)
            })
            .await
    }

    #[instrument(skip(self), fields(after = ?after.map(|a| a.as_str())))]
    async fn enumerate(
        &self,
        after: Option<&ContentAddress>,
        limit: usize,
    ) -> Result<Vec<SizedAddress>> {
        self.faults.check(FaultPoint::Enumerate)?;
        let mut found = Vec::new();
        if limit == 0 {
            return Ok(found);
        }

        let start_after = after.map(|a| self.object_key(a));
        let mut continuation: Option<String> = None;
        loop {
            let page = self
                .api
                .list_objects(
                    &self.bucket,
                    ListRequest {
                        prefix: &self.dir_prefix,
                        start_after: start_after.as_deref(),
                        continuation: continuation.as_deref(),
                        max_keys: (limit - found.len()).min(MAX_ENUMERATE),
                    },
                )
                .await?;

            for object in page.objects {
                let Some(name) = object.key.strip_prefix(self.dir_prefix.as_str()) else {
                    continue;
                };
                match name.parse::<ContentAddress>() {
                    Ok(address) => found.push(SizedAddress::new(address, object.size)),
                    Err(_) => {
                        debug!(key = %object.key, "skipping non-blob key");
                        continue;
                    }
                }
                if found.len() == limit {
                    return Ok(found);
                }
            }

            match page.next_continuation {
                Some(token) => continuation = Some(token),
                None => return Ok(found),
            }
        }
    }

    fn as_sub_fetcher(&self) -> Option<&dyn SubFetcher> {
        Some(self)
    }

    fn enumerate_config(&self) -> Option<&dyn EnumerateConfig> {
        Some(self)
    }
}

#[async_trait]
impl SubFetcher for RemoteStorage {
    #[instrument(skip(self), fields(address = %address))]
    async fn sub_fetch(
        &self,
        address: &ContentAddress,
        offset: u64,
        length: u64,
    ) -> Result<ByteStream> {
        self.faults.check(FaultPoint::Get)?;
        let key = self.object_key(address);
        let size = self
            .api
            .head_object(&self.bucket, &key)
            .await?
            .ok_or_else(|| Error::NotFound(address.clone()))?;
        if offset > size {
            return Err(Error::OutOfRange {
                address: address.clone(),
                offset,
                size,
            });
        }
        let end = offset.saturating_add(length).min(size);
        if end == offset {
            return Ok(stream_from_bytes(bytes::Bytes::new()));
        }

        let range = ByteRange {
            start: offset,
            end_inclusive: end - 1,
        };
        let body = self
            .api
            .get_object(&self.bucket, &key, Some(range))
            .await?
            .ok_or_else(|| Error::NotFound(address.clone()))?;
        Ok(body.stream)
    }
}

impl EnumerateConfig for RemoteStorage {
    fn max_enumerate(&self) -> usize {
        MAX_ENUMERATE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{read_all, HashAlgorithm};
    use assert_matches::assert_matches;
    use bytes::Bytes;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use tokio_test::{assert_pending, task};

    // =========================================================================
    // In-process object API
    // =========================================================================

    #[derive(Default)]
    struct FakeState {
        objects: BTreeMap<String, Bytes>,
        /// Queued listing failures, consumed one per listing call
        list_errors: VecDeque<ServiceError>,
        location: Option<String>,
        /// `(hostname, operation)` per call
        calls: Vec<(String, &'static str)>,
        block_puts: bool,
    }

    #[derive(Clone, Default)]
    struct FakeApi {
        hostname: String,
        state: Arc<Mutex<FakeState>>,
    }

    impl FakeApi {
        fn record(&self, op: &'static str) {
            self.state.lock().calls.push((self.hostname.clone(), op));
        }

        fn calls(&self) -> Vec<(String, &'static str)> {
            self.state.lock().calls.clone()
        }

        fn fail_listing(&self, err: ServiceError) {
            self.state.lock().list_errors.push_back(err);
        }
    }

    #[async_trait]
    impl ObjectApi for FakeApi {
        fn hostname(&self) -> &str {
            &self.hostname
        }

        fn set_hostname(&mut self, hostname: String) {
            self.hostname = hostname;
        }

        async fn list_objects(&self, _bucket: &str, request: ListRequest<'_>) -> ApiResult<ListPage> {
            self.record("list");
            let mut state = self.state.lock();
            if let Some(err) = state.list_errors.pop_front() {
                return Err(ApiError::Service(err));
            }
            // continuation token is the last key of the previous page
            let lower = request.continuation.or(request.start_after).unwrap_or("");
            let mut objects: Vec<ListedObject> = state
                .objects
                .iter()
                .filter(|(k, _)| k.starts_with(request.prefix) && k.as_str() > lower)
                .map(|(k, v)| ListedObject {
                    key: k.clone(),
                    size: v.len() as u64,
                })
                .collect();
            let truncated = objects.len() > request.max_keys;
            objects.truncate(request.max_keys);
            let next_continuation = if truncated {
                objects.last().map(|o| o.key.clone())
            } else {
                None
            };
            Ok(ListPage {
                objects,
                next_continuation,
            })
        }

        async fn bucket_location(&self, _bucket: &str) -> ApiResult<String> {
            self.record("location");
            self.state
                .lock()
                .location
                .clone()
                .ok_or_else(|| ApiError::Decode("no location".into()))
        }

        async fn head_object(&self, _bucket: &str, key: &str) -> ApiResult<Option<u64>> {
            self.record("head");
            Ok(self.state.lock().objects.get(key).map(|v| v.len() as u64))
        }

        async fn get_object(
            &self,
            _bucket: &str,
            key: &str,
            range: Option<ByteRange>,
        ) -> ApiResult<Option<ObjectBody>> {
            self.record("get");
            let Some(data) = self.state.lock().objects.get(key).cloned() else {
                return Ok(None);
            };
            let data = match range {
                Some(r) => data.slice(r.start as usize..=r.end_inclusive as usize),
                None => data,
            };
            Ok(Some(ObjectBody {
                content_length: data.len() as u64,
                stream: stream_from_bytes(data),
            }))
        }

        async fn put_object(&self, _bucket: &str, key: &str, body: Bytes) -> ApiResult<()> {
            self.record("put");
            if self.state.lock().block_puts {
                futures::future::pending::<()>().await;
            }
            self.state.lock().objects.insert(key.to_string(), body);
            Ok(())
        }
    }

    fn config(bucket: &str) -> RemoteConfig {
        RemoteConfig::new(bucket, "AKID", "secret")
    }

    async fn build(config: &RemoteConfig, api: &FakeApi) -> Result<RemoteStorage> {
        RemoteStorage::build(config, Box::new(api.clone()), Arc::new(NoFaults)).await
    }

    fn blob(content: &[u8]) -> (ContentAddress, Bytes) {
        (
            ContentAddress::compute(HashAlgorithm::Sha256, content),
            Bytes::copy_from_slice(content),
        )
    }

    // =========================================================================
    // Construction
    // =========================================================================

    #[test]
    fn test_split_bucket() {
        assert_eq!(split_bucket("mybucket"), ("mybucket".into(), "".into()));
        assert_eq!(
            split_bucket("mybucket/archive"),
            ("mybucket".into(), "archive/".into())
        );
        assert_eq!(
            split_bucket("mybucket/archive/"),
            ("mybucket".into(), "archive/".into())
        );
        assert_eq!(
            split_bucket("mybucket/a/b"),
            ("mybucket".into(), "a/b/".into())
        );
        assert_eq!(split_bucket("mybucket/"), ("mybucket".into(), "".into()));
    }

    #[tokio::test]
    async fn test_object_key_uses_prefix() {
        let api = FakeApi::default();
        let storage = build(&config("mybucket/archive"), &api).await.unwrap();
        let (addr, _) = blob(b"x");

        assert_eq!(storage.bucket(), "mybucket");
        assert_eq!(storage.dir_prefix(), "archive/");
        assert_eq!(storage.object_key(&addr), format!("archive/{}", addr));
        assert!(storage.object_key(&addr).starts_with("archive/sha256-"));
    }

    #[tokio::test]
    async fn test_default_hostname_and_display() {
        let api = FakeApi::default();
        let storage = build(&config("mybucket/archive"), &api).await.unwrap();
        assert_eq!(storage.hostname(), DEFAULT_HOSTNAME);
        assert_eq!(
            storage.to_string(),
            "\"s3\" blob storage at host \"s3.amazonaws.com\", bucket \"mybucket\", directory \"archive/\""
        );
    }

    #[tokio::test]
    async fn test_startup_check_lists_one_item() {
        let api = FakeApi::default();
        build(&config("mybucket"), &api).await.unwrap();
        assert_eq!(api.calls(), vec![(DEFAULT_HOSTNAME.to_string(), "list")]);
    }

    #[tokio::test]
    async fn test_skip_startup_check() {
        let api = FakeApi::default();
        api.fail_listing(ServiceError::new(404, api::NO_SUCH_BUCKET, ""));
        let mut cfg = config("mybucket");
        cfg.skip_startup_check = true;
        build(&cfg, &api).await.unwrap();
        assert!(api.calls().is_empty());
    }

    #[tokio::test]
    async fn test_no_such_bucket_names_bucket() {
        let api = FakeApi::default();
        api.fail_listing(ServiceError::new(404, api::NO_SUCH_BUCKET, "gone"));
        let err = build(&config("missing-bucket"), &api).await.unwrap_err();
        assert_matches!(&err, Error::Config { field, message }
            if field == "bucket" && message.contains("missing-bucket"));
    }

    #[tokio::test]
    async fn test_bad_credentials_name_field() {
        let api = FakeApi::default();
        api.fail_listing(ServiceError::new(403, api::INVALID_ACCESS_KEY_ID, ""));
        assert_matches!(
            build(&config("b"), &api).await,
            Err(Error::Config { field, .. }) if field == "access_key_id"
        );

        let api = FakeApi::default();
        api.fail_listing(ServiceError::new(403, api::SIGNATURE_DOES_NOT_MATCH, ""));
        assert_matches!(
            build(&config("b"), &api).await,
            Err(Error::Config { field, .. }) if field == "secret_access_key"
        );
    }

    #[tokio::test]
    async fn test_other_failure_is_fatal() {
        let api = FakeApi::default();
        api.fail_listing(ServiceError::new(500, "InternalError", "boom"));
        assert_matches!(
            build(&config("b"), &api).await,
            Err(Error::Transport(ApiError::Service(e))) if e.code == "InternalError"
        );
        assert_eq!(api.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_dotted_bucket_redirect_retries_once_at_location() {
        let api = FakeApi::default();
        api.fail_listing(ServiceError::new(301, api::PERMANENT_REDIRECT, ""));
        api.state.lock().location = Some("s3.eu-west-1.amazonaws.com".into());

        let storage = build(&config("my.dotted.bucket"), &api).await.unwrap();
        assert_eq!(storage.hostname(), "s3.eu-west-1.amazonaws.com");
        assert_eq!(
            api.calls(),
            vec![
                (DEFAULT_HOSTNAME.to_string(), "list"),
                (DEFAULT_HOSTNAME.to_string(), "location"),
                ("s3.eu-west-1.amazonaws.com".to_string(), "list"),
            ]
        );

        // later operations go to the corrected host
        let (addr, _) = blob(b"later");
        storage.stat(&[addr]).await.unwrap();
        assert_eq!(
            api.calls().last().unwrap(),
            &("s3.eu-west-1.amazonaws.com".to_string(), "head")
        );
    }

    #[tokio::test]
    async fn test_endpoint_hint_strips_bucket() {
        let api = FakeApi::default();
        api.fail_listing(
            ServiceError::new(301, api::PERMANENT_REDIRECT, "")
                .with_endpoint("mybucket.s3-us-west-1.amazonaws.com"),
        );

        let storage = build(&config("mybucket"), &api).await.unwrap();
        assert_eq!(storage.hostname(), "s3-us-west-1.amazonaws.com");
        let lists = api.calls().iter().filter(|(_, op)| *op == "list").count();
        assert_eq!(lists, 2);
    }

    #[tokio::test]
    async fn test_failed_retry_propagates_new_error() {
        let api = FakeApi::default();
        api.fail_listing(
            ServiceError::new(301, api::PERMANENT_REDIRECT, "")
                .with_endpoint("mybucket.s3-us-west-1.amazonaws.com"),
        );
        api.fail_listing(ServiceError::new(403, "AccessDenied", "nope"));

        assert_matches!(
            build(&config("mybucket"), &api).await,
            Err(Error::Transport(ApiError::Service(e))) if e.code == "AccessDenied"
        );
        // exactly one correction
        assert_eq!(api.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_undotted_redirect_without_endpoint_is_fatal() {
        let api = FakeApi::default();
        api.fail_listing(ServiceError::new(301, api::PERMANENT_REDIRECT, ""));
        assert_matches!(build(&config("mybucket"), &api).await, Err(Error::Transport(_)));
        assert_eq!(api.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_open_wraps_in_cache_by_default() {
        let api = FakeApi::default();
        let storage = RemoteStorage::open_with(&config("b"), Box::new(api.clone()), Arc::new(NoFaults))
            .await
            .unwrap();
        let (addr, data) = blob(b"cached");
        storage
            .put(&addr, stream_from_bytes(data.clone()), None)
            .await
            .unwrap();

        // served from the fast tier, no GET reaches the remote
        let got = storage.get(&addr).await.unwrap().into_bytes().await.unwrap();
        assert_eq!(got, data);
        assert!(api.calls().iter().all(|(_, op)| *op != "get"));
    }

    #[tokio::test]
    async fn test_open_without_cache() {
        let api = FakeApi::default();
        let mut cfg = config("b");
        cfg.cache_size = Some(0);
        let storage = RemoteStorage::open_with(&cfg, Box::new(api.clone()), Arc::new(NoFaults))
            .await
            .unwrap();
        let (addr, data) = blob(b"direct");
        api.state.lock().objects.insert(addr.to_string(), data);

        storage.get(&addr).await.unwrap();
        assert!(api.calls().iter().any(|(_, op)| *op == "get"));
    }

    // =========================================================================
    // Operations
    // =========================================================================

    #[tokio::test]
    async fn test_put_get_stat() {
        let api = FakeApi::default();
        let storage = build(&config("b/dir"), &api).await.unwrap();
        let (a, da) = blob(b"alpha");
        let (b, _) = blob(b"beta");

        let sized = storage
            .put(&a, stream_from_bytes(da.clone()), Some(5))
            .await
            .unwrap();
        assert_eq!(sized.size, 5);
        assert!(api.state.lock().objects.contains_key(&format!("dir/{}", a)));

        let got = storage.get(&a).await.unwrap();
        assert_eq!(got.size(), 5);
        assert_eq!(got.into_bytes().await.unwrap(), da);

        assert_matches!(storage.get(&b).await, Err(Error::NotFound(x)) if x == b);

        let sizes = storage.stat(&[a.clone(), b]).await.unwrap();
        assert_eq!(sizes.into_iter().collect::<Vec<_>>(), vec![(a, 5)]);
    }

    #[tokio::test]
    async fn test_stat_many_addresses_from_spawned_task() {
        let api = FakeApi::default();
        let storage = Arc::new(build(&config("b/dir"), &api).await.unwrap());

        let mut addresses = Vec::new();
        let mut present = BTreeMap::new();
        for i in 0..(3 * MAX_PARALLEL_HTTP as u8) {
            let (a, d) = blob(&vec![i; i as usize + 1]);
            if i % 2 == 0 {
                present.insert(a.clone(), d.len() as u64);
                api.state.lock().objects.insert(format!("dir/{}", a), d);
            }
            addresses.push(a);
        }

        let handle = {
            let storage = storage.clone();
            let addresses = addresses.clone();
            tokio::spawn(async move { storage.stat(&addresses).await })
        };
        let sizes = handle.await.unwrap().unwrap();
        assert_eq!(sizes, present);

        let heads = api.calls().iter().filter(|(_, op)| *op == "head").count();
        assert_eq!(heads, addresses.len());
    }

    #[tokio::test]
    async fn test_put_rejects_length_mismatch() {
        let api = FakeApi::default();
        let storage = build(&config("b"), &api).await.unwrap();
        let (a, da) = blob(b"alpha");
        assert_matches!(
            storage.put(&a, stream_from_bytes(da), Some(9)).await,
            Err(Error::LengthMismatch { declared: 9, actual: 5, .. })
        );
        assert!(api.calls().iter().all(|(_, op)| *op != "put"));
    }

    #[tokio::test]
    async fn test_enumerate_skips_foreign_keys_and_pages() {
        let api = FakeApi::default();
        let storage = build(&config("b/dir"), &api).await.unwrap();

        let mut expected = Vec::new();
        {
            let mut state = api.state.lock();
            for i in 0..12u8 {
                let (a, d) = blob(&[i]);
                state.objects.insert(format!("dir/{}", a), d);
                expected.push(a);
            }
            state.objects.insert("dir/README".into(), Bytes::from("x"));
            state.objects.insert("dir/sub/sha256-zz".into(), Bytes::from("x"));
            state.objects.insert("other/file".into(), Bytes::from("x"));
        }
        expected.sort();

        let first = storage.enumerate(None, 5).await.unwrap();
        assert_eq!(first.len(), 5);
        let rest = storage
            .enumerate(Some(&first[4].address), 100)
            .await
            .unwrap();
        let all: Vec<_> = first.iter().chain(rest.iter()).map(|s| s.address.clone()).collect();
        assert_eq!(all, expected);
        assert!(first.iter().all(|s| s.size == 1));
    }

    #[tokio::test]
    async fn test_enumerate_zero_limit() {
        let api = FakeApi::default();
        let storage = build(&config("b"), &api).await.unwrap();
        assert!(storage.enumerate(None, 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sub_fetch_ranges() {
        let api = FakeApi::default();
        let storage = build(&config("b"), &api).await.unwrap();
        let (a, d) = blob(b"0123456789");
        api.state.lock().objects.insert(a.to_string(), d);

        let facet = storage.as_sub_fetcher().unwrap();
        let part = read_all(facet.sub_fetch(&a, 2, 3).await.unwrap(), None).await.unwrap();
        assert_eq!(part.as_ref(), b"234");

        let tail = read_all(facet.sub_fetch(&a, 7, 100).await.unwrap(), None).await.unwrap();
        assert_eq!(tail.as_ref(), b"789");

        let empty = read_all(facet.sub_fetch(&a, 10, 5).await.unwrap(), None).await.unwrap();
        assert!(empty.is_empty());

        assert_matches!(
            facet.sub_fetch(&a, 11, 1).await.err(),
            Some(Error::OutOfRange { offset: 11, size: 10, .. })
        );
        assert_eq!(storage.enumerate_config().unwrap().max_enumerate(), MAX_ENUMERATE);
    }

    #[tokio::test]
    async fn test_fault_points() {
        let api = FakeApi::default();
        let faults = Arc::new(ArmedFaults::new());
        let storage = RemoteStorage::build(&config("b"), Box::new(api.clone()), faults.clone())
            .await
            .unwrap();
        let (a, d) = blob(b"faulty");

        faults.arm(FaultPoint::Receive);
        assert_matches!(
            storage.put(&a, stream_from_bytes(d.clone()), None).await,
            Err(Error::Injected(FaultPoint::Receive))
        );
        faults.disarm(FaultPoint::Receive);
        storage.put(&a, stream_from_bytes(d), None).await.unwrap();

        faults.arm(FaultPoint::Stat);
        assert_matches!(storage.stat(&[a.clone()]).await, Err(Error::Injected(FaultPoint::Stat)));
        faults.arm(FaultPoint::Enumerate);
        assert_matches!(
            storage.enumerate(None, 10).await,
            Err(Error::Injected(FaultPoint::Enumerate))
        );
        faults.arm(FaultPoint::Get);
        assert_matches!(storage.get(&a).await, Err(Error::Injected(FaultPoint::Get)));
    }

    #[tokio::test]
    async fn test_upload_gate_released_on_cancel() {
        let api = FakeApi::default();
        let storage = build(&config("b"), &api).await.unwrap();
        api.state.lock().block_puts = true;
        let (a, d) = blob(b"stuck");

        assert_eq!(storage.available_upload_slots(), MAX_PARALLEL_HTTP);
        let mut put = task::spawn(storage.put(&a, stream_from_bytes(d), None));
        assert_pending!(put.poll());
        assert_eq!(storage.available_upload_slots(), MAX_PARALLEL_HTTP - 1);

        drop(put);
        assert_eq!(storage.available_upload_slots(), MAX_PARALLEL_HTTP);
    }

    #[tokio::test]
    async fn test_upload_gate_bounds_concurrency() {
        let api = FakeApi::default();
        let storage = Arc::new(build(&config("b"), &api).await.unwrap());
        api.state.lock().block_puts = true;

        let blobs: Vec<_> = (0..7u8).map(|i| blob(&[i])).collect();
        let mut pending = Vec::new();
        for (a, d) in &blobs {
            let mut put = task::spawn(storage.put(a, stream_from_bytes(d.clone()), None));
            assert_pending!(put.poll());
            pending.push(put);
        }
        assert_eq!(storage.available_upload_slots(), 0);
        let issued = api.calls().iter().filter(|(_, op)| *op == "put").count();
        assert_eq!(issued, MAX_PARALLEL_HTTP);
    }
}
