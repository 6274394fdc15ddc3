//! # Base Service
//!
//! Every read goes cache → dedup → fetch: a cache hit returns immediately,
//! a miss runs through the [`RequestDeduplicator`] so concurrent identical
//! reads share one network call, and the transformed result is written back
//! to the cache. Every mutation goes straight to the network and, on
//! success, invalidates cached reads of the affected resource.
//!
//! The network itself sits behind the [`Transport`] trait; the `http`
//! feature provides a `reqwest` implementation.

use futures::future::BoxFuture;
use log::{debug, warn};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::{compile_pattern, generate_key, CacheManager};
use crate::config::ServiceConfig;
use crate::dedup::RequestDeduplicator;
use crate::error::{Result, TrekRouteError};

#[cfg(feature = "http")]
pub mod http;

/// HTTP verb of an [`ApiRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request handed to the transport. `path` already includes the
/// service's base path.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    /// Query parameters (a JSON object, or `Null` for none)
    pub params: Value,
    pub body: Option<Value>,
}

impl ApiRequest {
    pub fn get(path: impl Into<String>, params: Value) -> Self {
        Self {
            method: Method::Get,
            path: path.into(),
            params,
            body: None,
        }
    }

    pub fn mutation(method: Method, path: impl Into<String>, body: Option<Value>) -> Self {
        Self {
            method,
            path: path.into(),
            params: Value::Null,
            body,
        }
    }
}

/// Network seam used by [`BaseService`].
pub trait Transport: Send + Sync {
    /// Perform the request and return the decoded JSON body.
    fn send(&self, request: ApiRequest) -> BoxFuture<'_, Result<Value>>;
}

/// Post-processing applied to a fetched payload before it is cached.
pub type Transform = Arc<dyn Fn(Value) -> Result<Value> + Send + Sync>;

/// Per-call options for [`BaseService::get`].
#[derive(Clone)]
pub struct GetOptions {
    /// Read from and write to the cache. Default: true
    pub use_cache: bool,
    /// TTL for the cached result; `None` uses the service default.
    pub ttl: Option<Duration>,
    pub transform: Option<Transform>,
}

impl GetOptions {
    /// Skip the cache entirely (the call is still deduplicated).
    pub fn no_cache() -> Self {
        Self {
            use_cache: false,
            ..Self::default()
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn with_transform<F>(mut self, transform: F) -> Self
    where
        F: Fn(Value) -> Result<Value> + Send + Sync + 'static,
    {
        self.transform = Some(Arc::new(transform));
        self
    }
}

impl Default for GetOptions {
    fn default() -> Self {
        Self {
            use_cache: true,
            ttl: None,
            transform: None,
        }
    }
}

impl fmt::Debug for GetOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GetOptions")
            .field("use_cache", &self.use_cache)
            .field("ttl", &self.ttl)
            .field("transform", &self.transform.is_some())
            .finish()
    }
}

/// Outcome of one operation in [`BaseService::batch`].
#[derive(Debug, Clone, PartialEq)]
pub struct BatchResult<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<TrekRouteError>,
}

impl<T> From<Result<T>> for BatchResult<T> {
    fn from(result: Result<T>) -> Self {
        match result {
            Ok(data) => Self {
                success: true,
                data: Some(data),
                error: None,
            },
            Err(error) => Self {
                success: false,
                data: None,
                error: Some(error),
            },
        }
    }
}

/// Recognized shapes of a list payload.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ResponseShape<'a> {
    /// `[...]`
    Bare(&'a [Value]),
    /// `{"<key>": [...]}` for an explicitly requested or sole array field
    Named(&'a str, &'a [Value]),
    /// `{"results": [...]}`
    Results(&'a [Value]),
    /// `{"data": [...]}`
    Data(&'a [Value]),
    Unrecognized,
}

impl<'a> ResponseShape<'a> {
    /// Classify a payload.
    ///
    /// An explicit `key` takes precedence over `results` and `data`. Without
    /// one, an object whose only array-valued field is some other name is
    /// also accepted as a named list.
    pub fn classify(payload: &'a Value, key: Option<&'a str>) -> Self {
        let object = match payload {
            Value::Array(items) => return Self::Bare(items),
            Value::Object(object) => object,
            _ => return Self::Unrecognized,
        };

        if let Some(key) = key {
            if let Some(Value::Array(items)) = object.get(key) {
                return Self::Named(key, items);
            }
        }
        if let Some(Value::Array(items)) = object.get("results") {
            return Self::Results(items);
        }
        if let Some(Value::Array(items)) = object.get("data") {
            return Self::Data(items);
        }

        let mut arrays = object.iter().filter_map(|(name, value)| match value {
            Value::Array(items) => Some((name.as_str(), items.as_slice())),
            _ => None,
        });
        match (arrays.next(), arrays.next()) {
            (Some((name, items)), None) => Self::Named(name, items),
            _ => Self::Unrecognized,
        }
    }

    pub fn items(&self) -> &'a [Value] {
        match *self {
            Self::Bare(items) | Self::Named(_, items) | Self::Results(items) | Self::Data(items) => {
                items
            }
            Self::Unrecognized => &[],
        }
    }
}

/// Normalize a list payload to a plain ordered sequence.
///
/// Unrecognized shapes (including `null` and `{}`) yield an empty vector.
///
/// # Example
/// ```
/// use serde_json::json;
/// use trek_route::normalize_array;
///
/// assert_eq!(normalize_array(&json!({"results": [1, 2]}), None), vec![json!(1), json!(2)]);
/// assert!(normalize_array(&json!(null), None).is_empty());
/// ```
pub fn normalize_array(payload: &Value, key: Option<&str>) -> Vec<Value> {
    ResponseShape::classify(payload, key).items().to_vec()
}

/// Cached, deduplicated access to a REST backend under one base path.
///
/// The cache and deduplicator are injected so several services can share
/// them (one pair per application session) and tests can use isolated ones.
pub struct BaseService {
    base_path: String,
    transport: Arc<dyn Transport>,
    cache: Arc<CacheManager>,
    dedup: Arc<RequestDeduplicator<Value>>,
    default_ttl: Duration,
}

impl BaseService {
    pub fn new(
        base_path: impl Into<String>,
        transport: Arc<dyn Transport>,
        cache: Arc<CacheManager>,
        dedup: Arc<RequestDeduplicator<Value>>,
    ) -> Self {
        let default_ttl = cache.default_ttl();
        Self {
            base_path: base_path.into(),
            transport,
            cache,
            dedup,
            default_ttl,
        }
    }

    /// Service with its own private cache and deduplicator.
    pub fn standalone(
        base_path: impl Into<String>,
        transport: Arc<dyn Transport>,
        config: &ServiceConfig,
    ) -> Self {
        let cache = Arc::new(CacheManager::with_default_ttl(config.default_ttl()));
        Self::new(
            base_path,
            transport,
            cache,
            Arc::new(RequestDeduplicator::new()),
        )
    }

    pub fn full_path(&self, endpoint: &str) -> String {
        format!("{}{}", self.base_path, endpoint)
    }

    pub fn cache(&self) -> &Arc<CacheManager> {
        &self.cache
    }

    /// Cache key a `get` with these arguments reads and writes.
    pub fn cache_key(&self, endpoint: &str, params: &Value) -> String {
        generate_key(&self.full_path(endpoint), params)
    }

    /// Cached, deduplicated GET.
    pub async fn get(&self, endpoint: &str, params: Value, options: GetOptions) -> Result<Value> {
        let full_path = self.full_path(endpoint);
        let key = generate_key(&full_path, &params);

        if options.use_cache {
            if let Some(hit) = self.cache.get(&key) {
                debug!("[BaseService] Cache hit {}", key);
                return Ok(hit);
            }
        }

        let transport = Arc::clone(&self.transport);
        let cache = Arc::clone(&self.cache);
        let ttl = options.ttl.unwrap_or(self.default_ttl);
        let cache_key = key.clone();
        let request = ApiRequest::get(full_path, params);

        self.dedup
            .execute(&key, move || {
                // Read before sending so an invalidation during the fetch wins
                let epoch = cache.epoch();
                async move {
                    let path = request.path.clone();
                    let raw = transport.send(request).await.map_err(|e| {
                        warn!("[BaseService] API error [GET {}]: {}", path, e);
                        e
                    })?;
                    let transformed = match options.transform {
                        Some(transform) => transform(raw)?,
                        None => raw,
                    };
                    let stored = options.use_cache
                        && cache.set_if_unchanged(&cache_key, transformed.clone(), Some(ttl), epoch);
                    if options.use_cache && !stored {
                        debug!(
                            "[BaseService] Not caching {}: invalidated while in flight",
                            cache_key
                        );
                    }
                    Ok(transformed)
                }
            })
            .await
    }

    /// [`get`](Self::get) decoded into `T`.
    pub async fn get_as<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        params: Value,
        options: GetOptions,
    ) -> Result<T> {
        let value = self.get(endpoint, params, options).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// GET a list endpoint and normalize whatever wrapper it uses.
    pub async fn get_list(
        &self,
        endpoint: &str,
        params: Value,
        key: Option<&str>,
        options: GetOptions,
    ) -> Result<Vec<Value>> {
        let payload = self.get(endpoint, params, options).await?;
        Ok(normalize_array(&payload, key))
    }

    pub async fn post(&self, endpoint: &str, body: Value) -> Result<Value> {
        self.mutate(Method::Post, endpoint, Some(body)).await
    }

    pub async fn put(&self, endpoint: &str, body: Value) -> Result<Value> {
        self.mutate(Method::Put, endpoint, Some(body)).await
    }

    pub async fn patch(&self, endpoint: &str, body: Value) -> Result<Value> {
        self.mutate(Method::Patch, endpoint, Some(body)).await
    }

    pub async fn delete(&self, endpoint: &str) -> Result<Value> {
        self.mutate(Method::Delete, endpoint, None).await
    }

    async fn mutate(&self, method: Method, endpoint: &str, body: Option<Value>) -> Result<Value> {
        let full_path = self.full_path(endpoint);
        let request = ApiRequest::mutation(method, full_path.clone(), body);

        let response = self.transport.send(request).await.map_err(|e| {
            warn!("[BaseService] API error [{} {}]: {}", method, full_path, e);
            e
        })?;

        let removed = self.invalidate_cache(&resource_pattern(&full_path))?;
        debug!(
            "[BaseService] {} {} invalidated {} cached reads",
            method, full_path, removed
        );
        Ok(response)
    }

    /// Drop cached reads whose key matches the regular expression `pattern`,
    /// and detach matching in-flight reads so later calls refetch.
    ///
    /// Returns the number of cache entries removed.
    pub fn invalidate_cache(&self, pattern: &str) -> Result<usize> {
        let regex = compile_pattern(pattern)?;
        let removed = self.cache.clear_matching(&regex);
        self.dedup.forget_matching(&regex);
        Ok(removed)
    }

    /// Run independent operations concurrently; one failure never aborts
    /// the others. Results keep the input order.
    pub async fn batch<T, Fut, I>(operations: I) -> Vec<BatchResult<T>>
    where
        I: IntoIterator<Item = Fut>,
        Fut: Future<Output = Result<T>>,
    {
        futures::future::join_all(operations)
            .await
            .into_iter()
            .map(BatchResult::from)
            .collect()
    }
}

/// Pattern matching cached reads of a resource and its sub-resources.
fn resource_pattern(full_path: &str) -> String {
    format!("^{}(/|::)", regex::escape(full_path.trim_end_matches('/')))
}
