use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};
use reqwest::Method;
use serde_json::Value;

use crate::error::TransportError;

const USER_AGENT: &str = concat!("pkgscout-http/", env!("CARGO_PKG_VERSION"));

/// GitHub-style reset header: unix epoch seconds at which the limit resets.
const RATE_LIMIT_RESET: &str = "x-ratelimit-reset";

#[derive(Clone, Debug)]
pub struct OutboundRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Option<Value>,
    pub timeout: Duration,
}

#[derive(Clone, Debug)]
pub struct TransportResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: String,
}

impl TransportResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, name: &'static str, value: &str) -> Self {
        if let Ok(value) = HeaderValue::from_str(value) {
            self.headers.insert(HeaderName::from_static(name), value);
        }
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Wait hint from `Retry-After` (delta seconds or HTTP-date) or
    /// `x-ratelimit-reset` (epoch seconds), relative to `now`.
    ///
    /// Absolute times in the past yield zero.
    pub fn retry_after_secs(&self, now: DateTime<Utc>) -> Option<u64> {
        if let Some(value) = header_str(&self.headers, header::RETRY_AFTER.as_str()) {
            if let Ok(secs) = value.parse::<u64>() {
                return Some(secs);
            }
            if let Ok(at) = DateTime::parse_from_rfc2822(value) {
                return Some(secs_until(now, at.with_timezone(&Utc)));
            }
        }

        let reset = header_str(&self.headers, RATE_LIMIT_RESET)?.parse::<i64>().ok()?;
        let at = DateTime::<Utc>::from_timestamp(reset, 0)?;
        Some(secs_until(now, at))
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name)?.to_str().ok().map(str::trim)
}

fn secs_until(now: DateTime<Utc>, at: DateTime<Utc>) -> u64 {
    let millis = at.signed_duration_since(now).num_milliseconds().max(0) as u64;
    millis.div_ceil(1_000)
}

/// Sends one request and returns whatever the server answered.
///
/// Any HTTP status is a successful transport result; only failures where no
/// response arrived are errors.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: OutboundRequest) -> Result<TransportResponse, TransportError>;
}

/// [`Transport`] backed by `reqwest`.
#[derive(Clone)]
pub struct HttpTransport {
    http: reqwest::Client,
}

impl fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpTransport").finish_non_exhaustive()
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpTransport {
    /// Builds a client with this crate's user agent, falling back to a plain
    /// client if the builder is rejected.
    pub fn new() -> Self {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { http }
    }

    pub fn from_client(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: OutboundRequest) -> Result<TransportResponse, TransportError> {
        let mut builder = self
            .http
            .request(request.method, &request.url)
            .headers(request.headers)
            .timeout(request.timeout);
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response.text().await?;

        Ok(TransportResponse {
            status,
            headers,
            body,
        })
    }
}
