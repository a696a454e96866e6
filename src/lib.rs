//! `pkgscout-http` is a resilient async client for rate-limited remote
//! metadata services: a package registry and an AI completion endpoint.
//!
//! Every call goes through the same path:
//! - the shared [`OfflineController`] is consulted first; while offline or
//!   rate limited, calls fail with [`PkgScoutError::Offline`] without
//!   touching the network,
//! - reads are answered from the shared [`ResponseCache`] while fresh,
//! - network and 5xx failures are retried with jittered exponential backoff
//!   ([`RetryPolicy`]),
//! - a 429 locks out every client sharing the controller.
//!
//! Collaborators use two entry points:
//! - [`RegistryClient::fetch_metadata`], paced by a [`RequestPacer`]
//! - [`CompletionClient::complete`]
//!
//! Build one [`ClientContext`] at startup and pass it to every client.

mod cache;
mod client;
mod clock;
mod completion;
mod context;
mod decode;
mod error;
mod offline;
mod options;
mod pacer;
mod registry;
mod retry;
mod transport;
mod types;
mod wire;

pub use cache::ResponseCache;
pub use client::{fingerprint, RequestOptions, ResilientClient};
pub use clock::{Clock, ManualClock, SystemClock};
pub use completion::CompletionClient;
pub use context::ClientContext;
pub use error::{ErrorCategory, PkgScoutError, TransportError};
pub use offline::{OfflineController, OfflineMode, OfflineObserver, OfflineSnapshot, Subscription};
pub use options::{CacheOptions, ClientOptions, PacerOptions};
pub use pacer::RequestPacer;
pub use registry::{encode_package_name, RegistryClient, DEFAULT_REGISTRY_URL};
pub use retry::{RetryPolicy, DEFAULT_MAX_BACKOFF_MS, JITTER_RANGE};
pub use transport::{HttpTransport, OutboundRequest, Transport, TransportResponse};
pub use types::{ChatMessage, Completion, CompletionRequest, PackageMetadata, Role, TokenUsage};

pub type Result<T> = std::result::Result<T, PkgScoutError>;
