use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use futures::future::join_all;
use reqwest::Method;

use crate::{
    client::{RequestOptions, ResilientClient},
    context::ClientContext,
    decode::{decode_package_metadata, decode_packument_value},
    transport::{HttpTransport, Transport},
    types::PackageMetadata,
    wire, ClientOptions, PacerOptions, PkgScoutError, RequestPacer, Result,
};

/// Public npm registry.
pub const DEFAULT_REGISTRY_URL: &str = "https://registry.npmjs.org";

/// Encodes a package name as a registry path segment.
///
/// Example: `"@types/node"` → `"@types%2Fnode"`
pub fn encode_package_name(name: &str) -> String {
    name.trim().replace('/', "%2F")
}

#[derive(Clone)]
/// Reads package documents from a registry, pacing bulk lookups.
pub struct RegistryClient {
    client: ResilientClient,
    pacer: Arc<RequestPacer<wire::Packument>>,
    base_url: String,
}

impl fmt::Debug for RegistryClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryClient")
            .field("base_url", &self.base_url)
            .field("client", &self.client)
            .field("pacer", &self.pacer)
            .finish()
    }
}

impl RegistryClient {
    /// Creates a client for `base_url` over HTTP.
    pub fn new(base_url: impl Into<String>, context: &ClientContext) -> Self {
        Self::with_transport(base_url, Arc::new(HttpTransport::new()), context)
    }

    pub fn with_transport(
        base_url: impl Into<String>,
        transport: Arc<dyn Transport>,
        context: &ClientContext,
    ) -> Self {
        Self {
            client: ResilientClient::new(transport, context),
            pacer: Arc::new(RequestPacer::with_offline_gate(
                PacerOptions::registry(),
                context.offline().clone(),
            )),
            base_url: base_url.into().trim_end_matches('/').to_owned(),
        }
    }

    /// Creates a client from the environment.
    ///
    /// Reads `PKGSCOUT_REGISTRY_URL`, falling back to
    /// [`DEFAULT_REGISTRY_URL`] when unset or empty.
    pub fn from_env(context: &ClientContext) -> Self {
        let url = std::env::var("PKGSCOUT_REGISTRY_URL")
            .ok()
            .filter(|url| !url.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_REGISTRY_URL.to_owned());
        Self::new(url, context)
    }

    /// Applies timeout, retry and cache TTL options.
    pub fn with_options(mut self, opts: ClientOptions) -> Self {
        self.client = self.client.with_options(opts);
        self
    }

    /// Replaces the pacer. Calls queued on the previous one are cleared.
    pub fn with_pacer_options(mut self, opts: PacerOptions) -> Self {
        self.pacer.clear_queue();
        self.pacer = Arc::new(RequestPacer::with_offline_gate(
            opts,
            self.client.offline().clone(),
        ));
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn package_url(&self, name: &str) -> String {
        format!("{}/{}", self.base_url, encode_package_name(name))
    }

    /// Fetches one package document with the client's full retry policy,
    /// bypassing the pacer.
    pub async fn package(&self, name: &str) -> Result<PackageMetadata> {
        let url = self.package_url(name);
        let packument: wire::Packument = self
            .client
            .request(Method::GET, &url, None, RequestOptions::default())
            .await?;
        Ok(decode_package_metadata(packument))
    }

    /// Bulk lookup keyed by identifier.
    ///
    /// Identifiers are trimmed and deduplicated. Fresh cache entries answer
    /// immediately; misses are paced in input order, with the pacer's retry
    /// as the only retry layer. Each identifier gets its own outcome, so one
    /// failure does not hide the others.
    pub async fn fetch_metadata<I, S>(&self, names: I) -> HashMap<String, Result<PackageMetadata>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut seen = HashSet::new();
        let unique: Vec<String> = names
            .into_iter()
            .map(|name| name.as_ref().trim().to_owned())
            .filter(|name| !name.is_empty() && seen.insert(name.clone()))
            .collect();

        let outcomes = join_all(unique.iter().map(|name| self.lookup_paced(name))).await;
        unique.into_iter().zip(outcomes).collect()
    }

    /// Resolves every queued bulk lookup with [`PkgScoutError::QueueCleared`].
    pub fn clear_queue(&self) -> usize {
        self.pacer.clear_queue()
    }

    pub fn pending(&self) -> usize {
        self.pacer.pending()
    }

    async fn lookup_paced(&self, name: &str) -> Result<PackageMetadata> {
        if self.client.offline().should_use_offline_mode() {
            return Err(PkgScoutError::Offline);
        }

        let url = self.package_url(name);
        let opts = RequestOptions::default().max_retries(0);
        if let Some(value) = self.client.cached(&Method::GET, &url, None, &opts) {
            return decode_packument_value(value);
        }

        let client = self.client.clone();
        let packument = self
            .pacer
            .submit(move || {
                let client = client.clone();
                let url = url.clone();
                let opts = opts.clone();
                async move { client.request(Method::GET, &url, None, opts).await }
            })
            .await?;
        Ok(decode_package_metadata(packument))
    }
}

#[cfg(test)]
mod tests {
    use super::{encode_package_name, RegistryClient};
    use crate::context::ClientContext;

    #[test]
    fn scoped_names_are_encoded() {
        assert_eq!(encode_package_name("@types/node"), "@types%2Fnode");
        assert_eq!(encode_package_name(" lodash "), "lodash");
    }

    #[test]
    fn package_url_trims_trailing_slash() {
        let context = ClientContext::new();
        let registry = RegistryClient::new("https://registry.example/", &context);
        assert_eq!(
            registry.package_url("@scope/pkg"),
            "https://registry.example/@scope%2Fpkg"
        );
    }
}
