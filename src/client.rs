use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::time::sleep;

use crate::{
    clock::Clock,
    context::ClientContext,
    transport::{OutboundRequest, Transport, TransportResponse},
    ClientOptions, OfflineController, PkgScoutError, ResponseCache, Result, RetryPolicy,
};

/// Per-call overrides for [`ResilientClient::request`].
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RequestOptions {
    /// Explicit cache key. Also makes non-read methods cacheable.
    pub cache_key: Option<String>,
    /// TTL for the cache read; defaults to the client's `default_cache_ttl_ms`.
    pub cache_ttl: Option<Duration>,
    /// Skip the cache read but still store the fresh response.
    pub force_refresh: bool,
    /// Overrides the client's `max_retries` for this call.
    pub max_retries: Option<usize>,
}

impl RequestOptions {
    pub fn cache_key(mut self, key: impl Into<String>) -> Self {
        self.cache_key = Some(key.into());
        self
    }

    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }

    pub fn force_refresh(mut self) -> Self {
        self.force_refresh = true;
        self
    }

    pub fn max_retries(mut self, retries: usize) -> Self {
        self.max_retries = Some(retries);
        self
    }
}

/// Deterministic cache key for a request: SHA-256 over method, target and
/// the serialized payload.
pub fn fingerprint(method: &Method, target: &str, payload: Option<&Value>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(method.as_str().as_bytes());
    hasher.update(b"\n");
    hasher.update(target.as_bytes());
    hasher.update(b"\n");
    if let Some(payload) = payload {
        hasher.update(payload.to_string().as_bytes());
    }
    hex::encode(hasher.finalize())
}

fn is_read(method: &Method) -> bool {
    *method == Method::GET || *method == Method::HEAD
}

#[derive(Clone)]
/// Gated, cached, retrying entry point for outbound calls.
pub struct ResilientClient {
    transport: Arc<dyn Transport>,
    offline: OfflineController,
    cache: ResponseCache,
    clock: Arc<dyn Clock>,
    policy: RetryPolicy,
    headers: HeaderMap,
    options: ClientOptions,
}

impl fmt::Debug for ResilientClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let headers: Vec<&str> = self.headers.keys().map(|name| name.as_str()).collect();
        f.debug_struct("ResilientClient")
            .field("headers", &headers)
            .field("options", &self.options)
            .field("offline", &self.offline)
            .finish_non_exhaustive()
    }
}

impl ResilientClient {
    /// Creates a client sharing the offline state and cache of `context`.
    pub fn new(transport: Arc<dyn Transport>, context: &ClientContext) -> Self {
        let options = ClientOptions::default();
        Self {
            transport,
            offline: context.offline().clone(),
            cache: context.cache().clone(),
            clock: context.clock(),
            policy: RetryPolicy::new(options.max_backoff_ms),
            headers: HeaderMap::new(),
            options,
        }
    }

    /// Applies client options such as timeout, retry and cache TTL.
    pub fn with_options(mut self, opts: ClientOptions) -> Self {
        self.policy = RetryPolicy::new(opts.max_backoff_ms);
        self.options = opts;
        self
    }

    /// Adds a header sent with every request. Invalid values are ignored.
    pub fn with_header(mut self, name: header::HeaderName, value: &str) -> Self {
        if let Ok(mut value) = HeaderValue::from_str(value) {
            if name == header::AUTHORIZATION {
                value.set_sensitive(true);
            }
            self.headers.insert(name, value);
        }
        self
    }

    /// Sends `Authorization: Bearer <token>`, adding the prefix if missing.
    pub fn with_bearer(self, token: &str) -> Self {
        let authorization = normalize_bearer_authorization(token);
        self.with_header(header::AUTHORIZATION, &authorization)
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    pub fn offline(&self) -> &OfflineController {
        &self.offline
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    /// Cached value for this request, if a fresh one exists. Never touches
    /// the network and ignores `force_refresh`.
    pub fn cached(
        &self,
        method: &Method,
        target: &str,
        payload: Option<&Value>,
        opts: &RequestOptions,
    ) -> Option<Value> {
        if !is_read(method) && opts.cache_key.is_none() {
            return None;
        }
        let key = self.cache_key(method, target, payload, opts);
        self.cache.get(&key, self.ttl(opts))
    }

    /// Sends one logical request.
    ///
    /// Fails with [`PkgScoutError::Offline`] without any network attempt while
    /// offline. Reads (and calls with an explicit cache key) are answered
    /// from the cache when fresh. Network and 5xx failures are retried with
    /// jittered exponential backoff; a 429 puts the shared controller into
    /// rate-limit lockout and fails with [`PkgScoutError::RateLimited`].
    /// A body that does not decode into `T` is never cached.
    pub async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        target: &str,
        payload: Option<&Value>,
        opts: RequestOptions,
    ) -> Result<T> {
        self.request_with(method, target, payload, opts, Ok).await
    }

    /// Like [`request`](Self::request), but the decoded body must also pass
    /// `accept` before it is cached or returned.
    pub async fn request_with<W, T, F>(
        &self,
        method: Method,
        target: &str,
        payload: Option<&Value>,
        opts: RequestOptions,
        accept: F,
    ) -> Result<T>
    where
        W: DeserializeOwned,
        F: Fn(W) -> Result<T>,
    {
        if self.offline.should_use_offline_mode() {
            return Err(PkgScoutError::Offline);
        }

        let cacheable = is_read(&method) || opts.cache_key.is_some();
        let key = self.cache_key(&method, target, payload, &opts);
        if cacheable && !opts.force_refresh {
            if let Some(value) = self.cache.get(&key, self.ttl(&opts)) {
                #[cfg(feature = "tracing")]
                tracing::debug!(url = target, "cache hit");
                return accept(decode_body(value)?);
            }
        }

        let value = self.send_with_retry(&method, target, payload, &opts).await?;
        let decoded = accept(decode_body(value.clone())?)?;
        if cacheable {
            self.cache.put(key, value);
        }
        Ok(decoded)
    }

    async fn send_with_retry(
        &self,
        method: &Method,
        target: &str,
        payload: Option<&Value>,
        opts: &RequestOptions,
    ) -> Result<Value> {
        let max_retries = opts.max_retries.unwrap_or(self.options.max_retries);
        let mut attempt = 0usize;
        loop {
            let request = OutboundRequest {
                method: method.clone(),
                url: target.to_owned(),
                headers: self.headers.clone(),
                body: payload.cloned(),
                timeout: Duration::from_millis(self.options.timeout_ms),
            };

            let error = match self.transport.send(request).await {
                Ok(response) if response.is_success() => return parse_json(&response.body),
                Ok(response) if response.status == 429 => return Err(self.enter_lockout(&response)),
                Ok(response) => self.classify_status(response),
                Err(err) => PkgScoutError::Network(err),
            };

            if !self.policy.should_retry(&error, attempt, max_retries) {
                return Err(error);
            }
            self.wait_before_retry(attempt).await;
            attempt += 1;
        }
    }

    fn classify_status(&self, response: TransportResponse) -> PkgScoutError {
        if response.status >= 500 {
            let retry_after_secs = response.retry_after_secs(self.clock.now());
            PkgScoutError::Server {
                status: response.status,
                body: response.body,
                retry_after_secs,
            }
        } else {
            PkgScoutError::Client {
                status: response.status,
                body: response.body,
            }
        }
    }

    fn enter_lockout(&self, response: &TransportResponse) -> PkgScoutError {
        let retry_after_secs = response
            .retry_after_secs(self.clock.now())
            .unwrap_or(self.options.rate_limit_default_secs);
        let until = self
            .offline
            .enter_rate_limited(Duration::from_secs(retry_after_secs));
        PkgScoutError::RateLimited {
            retry_after_secs,
            until,
        }
    }

    /// Sleeps before the next attempt. Dropping the request future cancels
    /// the sleep.
    async fn wait_before_retry(&self, attempt: usize) {
        let delay = self
            .policy
            .compute_backoff(attempt, self.options.initial_backoff_ms);

        #[cfg(feature = "tracing")]
        tracing::debug!("retrying request after {} ms", delay.as_millis());

        sleep(delay).await;
    }

    fn cache_key(
        &self,
        method: &Method,
        target: &str,
        payload: Option<&Value>,
        opts: &RequestOptions,
    ) -> String {
        opts.cache_key
            .clone()
            .unwrap_or_else(|| fingerprint(method, target, payload))
    }

    fn ttl(&self, opts: &RequestOptions) -> Duration {
        opts.cache_ttl
            .unwrap_or(Duration::from_millis(self.options.default_cache_ttl_ms))
    }
}

fn parse_json(body: &str) -> Result<Value> {
    if body.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(body)
        .map_err(|err| PkgScoutError::Parse(format!("invalid response JSON: {err}; body: {body}")))
}

fn decode_body<T: DeserializeOwned>(value: Value) -> Result<T> {
    serde_json::from_value(value)
        .map_err(|err| PkgScoutError::Parse(format!("unexpected response shape: {err}")))
}

pub(crate) fn normalize_bearer_authorization(token: &str) -> String {
    let trimmed = token.trim();
    let prefix = trimmed.get(..7);
    if prefix.is_some_and(|value| value.eq_ignore_ascii_case("bearer ")) {
        trimmed.to_owned()
    } else {
        format!("Bearer {trimmed}")
    }
}
