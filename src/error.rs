use chrono::{DateTime, Utc};

/// Failure below the HTTP layer: no response was received.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Network or request execution error from `reqwest`.
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    /// Connection-level failure reported by a non-reqwest transport.
    #[error("connection failed: {0}")]
    Connection(String),
}

/// Error type returned by this crate.
#[derive(Debug, thiserror::Error)]
pub enum PkgScoutError {
    /// Offline mode rejected the call before any network attempt.
    #[error("offline mode is active, request skipped")]
    Offline,
    /// The server answered 429 and the shared lockout is now in effect.
    #[error("rate limited, retry after {retry_after_secs}s (until {until})")]
    RateLimited {
        /// Lockout length derived from the response, or the default.
        retry_after_secs: u64,
        /// End of the lockout window.
        until: DateTime<Utc>,
    },
    /// No response was received (DNS, connect, timeout, broken body).
    #[error("network error: {0}")]
    Network(#[source] TransportError),
    /// 5xx response with raw body.
    #[error("server error {status}: {body}")]
    Server {
        status: u16,
        body: String,
        /// Explicit `Retry-After` hint, when the server sent one.
        retry_after_secs: Option<u64>,
    },
    /// 4xx response other than 429 with raw body.
    #[error("client error {status}: {body}")]
    Client { status: u16, body: String },
    /// Response received but not in the expected shape.
    #[error("parse error: {0}")]
    Parse(String),
    /// A paced call was discarded by an explicit queue reset.
    #[error("request queue cleared before dispatch")]
    QueueCleared,
}

/// Coarse failure category for choosing user-facing messaging.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Network,
    Server,
    Auth,
    Forbidden,
    RateLimited,
    Offline,
    Unknown,
}

impl ErrorCategory {
    /// Operator-facing explanation for this category.
    pub fn user_message(self) -> &'static str {
        match self {
            Self::Network => "The service could not be reached. Check your network connection.",
            Self::Server => "The service is having trouble right now. Try again later.",
            Self::Auth => "Authentication failed. Check the configured API key.",
            Self::Forbidden => "Access was denied. The API key lacks permission for this request.",
            Self::RateLimited => "Too many requests. Remote lookups are paused until the limit resets.",
            Self::Offline => "Offline mode is on. Remote lookups are skipped.",
            Self::Unknown => "The request failed unexpectedly.",
        }
    }
}

impl PkgScoutError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Offline => ErrorCategory::Offline,
            Self::RateLimited { .. } => ErrorCategory::RateLimited,
            Self::Network(_) => ErrorCategory::Network,
            Self::Server { .. } => ErrorCategory::Server,
            Self::Client { status: 401, .. } => ErrorCategory::Auth,
            Self::Client { status: 403, .. } => ErrorCategory::Forbidden,
            Self::Client { .. } | Self::Parse(_) | Self::QueueCleared => ErrorCategory::Unknown,
        }
    }

    /// Network and 5xx failures, which may succeed on a later attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Server { .. })
    }

    /// Offline and rate-limited failures, where callers should fall back to
    /// local computation instead of reporting an error.
    pub fn is_fallback_eligible(&self) -> bool {
        matches!(self, Self::Offline | Self::RateLimited { .. })
    }

    /// Server-provided wait hint in seconds, if any.
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            Self::RateLimited {
                retry_after_secs, ..
            } => Some(*retry_after_secs),
            Self::Server {
                retry_after_secs, ..
            } => *retry_after_secs,
            _ => None,
        }
    }

    pub fn user_message(&self) -> &'static str {
        self.category().user_message()
    }
}

#[cfg(test)]
mod tests {
    use super::{ErrorCategory, PkgScoutError, TransportError};

    fn client(status: u16) -> PkgScoutError {
        PkgScoutError::Client {
            status,
            body: String::new(),
        }
    }

    #[test]
    fn client_errors_split_into_auth_forbidden_and_unknown() {
        assert_eq!(client(401).category(), ErrorCategory::Auth);
        assert_eq!(client(403).category(), ErrorCategory::Forbidden);
        assert_eq!(client(404).category(), ErrorCategory::Unknown);
    }

    #[test]
    fn only_network_and_server_errors_are_transient() {
        let network = PkgScoutError::Network(TransportError::Connection("refused".to_owned()));
        let server = PkgScoutError::Server {
            status: 503,
            body: String::new(),
            retry_after_secs: Some(5),
        };
        assert!(network.is_transient());
        assert!(server.is_transient());
        assert_eq!(server.retry_after_secs(), Some(5));
        assert!(!client(400).is_transient());
        assert!(!PkgScoutError::Offline.is_transient());
        assert!(!PkgScoutError::QueueCleared.is_transient());
    }

    #[test]
    fn offline_is_fallback_eligible_but_parse_is_not() {
        assert!(PkgScoutError::Offline.is_fallback_eligible());
        assert!(!PkgScoutError::Parse("bad".to_owned()).is_fallback_eligible());
        assert_eq!(
            PkgScoutError::Offline.user_message(),
            ErrorCategory::Offline.user_message()
        );
    }
}
