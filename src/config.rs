// src/config.rs

use crate::error::IdentityError;
use crate::registrar::ClientDescriptor;
use serde::Deserialize;
use std::time::Duration;

/// Default whole-request deadline for every outbound HTTP call.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// Default response size guard (1 MiB).
pub const DEFAULT_MAX_RESPONSE_BYTES: usize = 1 << 20;
/// Default clock-skew tolerance subtracted from token expiry.
pub const DEFAULT_LEEWAY: Duration = Duration::from_secs(10);

/// Which certificate authorities the client trusts when talking to the provider.
///
/// Decided by the caller at startup and handed both to the HTTPS client used for
/// discovery and refresh, and to the RPC channel factory.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum TransportTrust {
    /// The platform's built-in root certificates.
    #[default]
    SystemRoots,
    /// Only the given PEM-encoded certificate is trusted (development identity servers).
    PinnedCertificate(Vec<u8>),
}

/// The configuration for the identity layer.
///
/// Replaces process-wide client constants: each `SessionManager` carries its own
/// configuration so several identities or environments can coexist in one process.
/// It should be constructed using the `ConfigBuilder` or loaded with
/// [`IdentityConfig::from_yaml`].
#[derive(Clone, Debug)]
pub struct IdentityConfig {
    /// User agent announced on RPC channels.
    pub user_agent: String,
    /// Space-separated scopes requested at sign-in.
    pub scope: String,
    /// Response type requested at sign-in.
    pub response_type: String,
    /// Deadline applied to every HTTP request.
    pub request_timeout: Duration,
    /// Maximum accepted response body size in bytes.
    pub max_response_bytes: usize,
    /// Clock-skew tolerance for token expiry.
    pub leeway: Duration,
    /// How long verification keys stay in the in-memory cache.
    pub key_cache_ttl: Duration,
    /// Transport trust roots.
    pub trust: TransportTrust,
    /// Descriptor sent when dynamically registering this installation's client.
    pub client: ClientDescriptor,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            user_agent: "nila-identity".to_string(),
            scope: "openid name email offline_access".to_string(),
            response_type: "token id_token".to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            max_response_bytes: DEFAULT_MAX_RESPONSE_BYTES,
            leeway: DEFAULT_LEEWAY,
            key_cache_ttl: Duration::from_secs(24 * 60 * 60),
            trust: TransportTrust::SystemRoots,
            client: ClientDescriptor::default(),
        }
    }
}

/// On-disk shape of the configuration. Every field is optional and falls back to the
/// builder defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    user_agent: Option<String>,
    scope: Option<String>,
    response_type: Option<String>,
    request_timeout_seconds: Option<u64>,
    max_response_bytes: Option<usize>,
    leeway_seconds: Option<u64>,
    key_cache_ttl_seconds: Option<u64>,
    pinned_certificate: Option<String>,
    client: Option<ClientDescriptor>,
}

impl IdentityConfig {
    /// Loads the configuration from a YAML document.
    ///
    /// `pinned_certificate`, when present, holds the PEM text of the only trusted certificate.
    pub fn from_yaml(source: &str) -> Result<Self, IdentityError> {
        let file: ConfigFile = serde_yaml::from_str(source)
            .map_err(|e| IdentityError::InvalidConfiguration(e.to_string()))?;

        let mut builder = ConfigBuilder::new();
        if let Some(user_agent) = file.user_agent {
            builder = builder.user_agent(user_agent);
        }
        if let Some(scope) = file.scope {
            builder = builder.scope(scope);
        }
        if let Some(response_type) = file.response_type {
            builder = builder.response_type(response_type);
        }
        if let Some(secs) = file.request_timeout_seconds {
            builder = builder.request_timeout(Duration::from_secs(secs));
        }
        if let Some(limit) = file.max_response_bytes {
            builder = builder.max_response_bytes(limit);
        }
        if let Some(secs) = file.leeway_seconds {
            builder = builder.leeway(Duration::from_secs(secs));
        }
        if let Some(secs) = file.key_cache_ttl_seconds {
            builder = builder.key_cache_ttl(Duration::from_secs(secs));
        }
        if let Some(pem) = file.pinned_certificate {
            builder = builder.trust(TransportTrust::PinnedCertificate(pem.into_bytes()));
        }
        if let Some(client) = file.client {
            builder = builder.client(client);
        }
        builder.build()
    }
}

/// A builder for creating an `IdentityConfig` instance.
///
/// This builder provides a fluent API; `build` rejects values that would make
/// every request fail.
#[derive(Default)]
pub struct ConfigBuilder {
    config: IdentityConfig,
}

impl ConfigBuilder {
    /// Creates a new `ConfigBuilder` holding the defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the user agent announced on RPC channels.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    /// Sets the space-separated scopes requested at sign-in.
    pub fn scope(mut self, scope: impl Into<String>) -> Self {
        self.config.scope = scope.into();
        self
    }

    /// Sets the response type requested at sign-in.
    pub fn response_type(mut self, response_type: impl Into<String>) -> Self {
        self.config.response_type = response_type.into();
        self
    }

    /// Sets the per-request deadline. Defaults to 30 seconds.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    /// Sets the response size guard. Defaults to 1 MiB.
    pub fn max_response_bytes(mut self, limit: usize) -> Self {
        self.config.max_response_bytes = limit;
        self
    }

    /// Sets the clock skew tolerance. Defaults to 10 seconds.
    pub fn leeway(mut self, leeway: Duration) -> Self {
        self.config.leeway = leeway;
        self
    }

    /// Sets the verification key cache TTL. Defaults to 24 hours.
    pub fn key_cache_ttl(mut self, ttl: Duration) -> Self {
        self.config.key_cache_ttl = ttl;
        self
    }

    /// Sets the transport trust roots.
    pub fn trust(mut self, trust: TransportTrust) -> Self {
        self.config.trust = trust;
        self
    }

    /// Sets the descriptor used for dynamic client registration.
    pub fn client(mut self, client: ClientDescriptor) -> Self {
        self.config.client = client;
        self
    }

    /// Consumes the builder and returns an `IdentityConfig`.
    ///
    /// # Errors
    ///
    /// Returns an error if the timeout or size limit is zero, or if no scope is requested.
    pub fn build(self) -> Result<IdentityConfig, IdentityError> {
        let config = self.config;
        if config.request_timeout.is_zero() {
            return Err(IdentityError::InvalidConfiguration("request_timeout must be greater than zero".to_string()));
        }
        if config.max_response_bytes == 0 {
            return Err(IdentityError::InvalidConfiguration("max_response_bytes must be greater than zero".to_string()));
        }
        if config.scope.split_whitespace().next().is_none() {
            return Err(IdentityError::InvalidConfiguration("scope must not be empty".to_string()));
        }
        Ok(config)
    }
}
