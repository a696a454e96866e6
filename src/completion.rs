use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Method;

use crate::{
    client::{RequestOptions, ResilientClient},
    context::ClientContext,
    decode::decode_completion,
    transport::{HttpTransport, Transport},
    types::{Completion, CompletionRequest},
    ClientOptions, PkgScoutError, Result,
};

#[derive(Clone)]
/// Sends completion requests through the shared offline gate and cache.
pub struct CompletionClient {
    client: ResilientClient,
    endpoint: String,
}

impl fmt::Debug for CompletionClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionClient")
            .field("endpoint", &self.endpoint)
            .field("client", &self.client)
            .finish()
    }
}

impl CompletionClient {
    /// Creates a client from a bearer token.
    ///
    /// If the token is missing the `Bearer ` prefix, it is added automatically.
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl AsRef<str>,
        context: &ClientContext,
    ) -> Self {
        Self::with_transport(endpoint, api_key, Arc::new(HttpTransport::new()), context)
    }

    pub fn with_transport(
        endpoint: impl Into<String>,
        api_key: impl AsRef<str>,
        transport: Arc<dyn Transport>,
        context: &ClientContext,
    ) -> Self {
        Self {
            client: ResilientClient::new(transport, context).with_bearer(api_key.as_ref()),
            endpoint: endpoint.into(),
        }
    }

    /// Creates a client from environment variables.
    ///
    /// Reads:
    /// - `PKGSCOUT_COMPLETION_URL`: full completion endpoint URL
    /// - `PKGSCOUT_API_KEY`: API key (Bearer prefix optional)
    ///
    /// Returns an error if either variable is missing or empty.
    pub fn from_env(context: &ClientContext) -> std::result::Result<Self, String> {
        let url = std::env::var("PKGSCOUT_COMPLETION_URL")
            .map_err(|_| "missing PKGSCOUT_COMPLETION_URL environment variable".to_owned())?;
        let key = std::env::var("PKGSCOUT_API_KEY")
            .map_err(|_| "missing PKGSCOUT_API_KEY environment variable".to_owned())?;
        if url.trim().is_empty() {
            return Err("PKGSCOUT_COMPLETION_URL is set but empty".to_owned());
        }
        if key.trim().is_empty() {
            return Err("PKGSCOUT_API_KEY is set but empty".to_owned());
        }
        Ok(Self::new(url, key, context))
    }

    /// Applies timeout, retry and cache TTL options.
    pub fn with_options(mut self, opts: ClientOptions) -> Self {
        self.client = self.client.with_options(opts);
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Sends one completion request.
    ///
    /// Not cached unless `cache_key` is given; `cache_ttl` then bounds how
    /// old a reused answer may be. Offline and rate-limited states fail fast
    /// so callers can fall back to a local heuristic.
    pub async fn complete(
        &self,
        request: &CompletionRequest,
        cache_key: Option<&str>,
        cache_ttl: Option<Duration>,
    ) -> Result<Completion> {
        let payload = serde_json::to_value(request)
            .map_err(|err| PkgScoutError::Parse(format!("invalid completion request: {err}")))?;

        let opts = RequestOptions {
            cache_key: cache_key.map(str::to_owned),
            cache_ttl,
            ..RequestOptions::default()
        };
        self.client
            .request_with(Method::POST, &self.endpoint, Some(&payload), opts, decode_completion)
            .await
    }
}
