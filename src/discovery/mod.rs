// src/discovery/mod.rs

pub mod keys;
pub mod model;

use crate::config::IdentityConfig;
use crate::error::IdentityError;
use crate::http::{provider_base, read_limited};
use crate::store::{read_json, write_json, ByteStore, PROVIDER_CONFIG_KEY, SIGNING_KEYS_KEY};
use keys::VerificationKey;
use model::{ProviderConfig, RawKeySet, SigningKeySet};
use moka::future::Cache;
use reqwest::StatusCode;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Fetches, persists and caches the provider's discovery document and signing keys.
#[derive(Clone)]
pub struct ProviderDirectory {
    // The directory is internally ref-counted to allow for cheap cloning.
    inner: Arc<Inner>,
}

struct Inner {
    http_client: reqwest::Client,
    store: Arc<dyn ByteStore>,
    max_response_bytes: usize,
    // Cache stores `kid` -> verification key, filled from the persisted key set.
    key_cache: Cache<String, Arc<VerificationKey>>,
}

impl ProviderDirectory {
    /// Creates a new `ProviderDirectory` over the given store.
    pub fn new(config: &IdentityConfig, http_client: reqwest::Client, store: Arc<dyn ByteStore>) -> Self {
        let key_cache = Cache::builder()
            .max_capacity(100)
            .time_to_live(config.key_cache_ttl)
            .build();
        Self {
            inner: Arc::new(Inner {
                http_client,
                store,
                max_response_bytes: config.max_response_bytes,
                key_cache,
            }),
        }
    }

    /// Downloads the discovery document for a provider address.
    ///
    /// A 404 means the host is not an OpenID provider at all; any other non-200
    /// status or an undecodable body is a discovery failure.
    #[instrument(skip(self), err)]
    pub async fn discover(&self, address: &str) -> Result<ProviderConfig, IdentityError> {
        let base = provider_base(address)?;
        let url = format!("{base}/.well-known/openid-configuration");

        debug!("Performing OIDC discovery at: {}", url);
        let response = self.inner.http_client.get(&url).send().await?;
        match response.status() {
            StatusCode::OK => {}
            StatusCode::NOT_FOUND => return Err(IdentityError::NotAnOidcProvider(address.to_string())),
            status => return Err(IdentityError::DiscoveryFailed(format!("GET {url} returned HTTP status {status}"))),
        }

        let body = read_limited(response, self.inner.max_response_bytes).await?;
        let config: ProviderConfig = serde_json::from_slice(&body)
            .map_err(|e| IdentityError::DiscoveryFailed(format!("decoding provider config from {url}: {e}")))?;

        if config.issuer.trim().is_empty() {
            return Err(IdentityError::DiscoveryFailed("provider config has an empty issuer".to_string()));
        }
        if provider_base(&config.issuer)? != base {
            return Err(IdentityError::DiscoveryFailed(format!(
                "provider config issuer {:?} does not match address {address:?}",
                config.issuer
            )));
        }
        Ok(config)
    }

    /// Downloads and validates the provider's signing keys.
    ///
    /// Fails closed: if any advertised key is invalid, none are accepted.
    #[instrument(skip(self), err)]
    pub async fn fetch_keys(&self, jwks_uri: &str) -> Result<SigningKeySet, IdentityError> {
        let response = self.inner.http_client.get(jwks_uri).send().await?;
        if response.status() != StatusCode::OK {
            return Err(IdentityError::DiscoveryFailed(format!(
                "GET {jwks_uri} returned HTTP status {}",
                response.status()
            )));
        }

        let body = read_limited(response, self.inner.max_response_bytes).await?;
        let raw: RawKeySet = serde_json::from_slice(&body)
            .map_err(|e| IdentityError::DiscoveryFailed(format!("decoding signing keys received from {jwks_uri}: {e}")))?;

        let keys = SigningKeySet::from_raw(raw)?;
        debug!("Successfully fetched {} signing keys", keys.len());
        Ok(keys)
    }

    /// Discovers the provider, fetches its keys and persists both.
    ///
    /// Nothing is written unless both downloads succeed, and the in-memory key
    /// cache is replaced wholesale afterwards.
    #[instrument(skip(self), err)]
    pub async fn run(&self, address: &str) -> Result<ProviderConfig, IdentityError> {
        let config = self.discover(address).await?;
        let keys = self.fetch_keys(&config.jwks_uri).await?;
        let verification_keys = keys.verification_keys()?;

        write_json(self.inner.store.as_ref(), PROVIDER_CONFIG_KEY, &config)?;
        write_json(self.inner.store.as_ref(), SIGNING_KEYS_KEY, &keys)?;

        self.inner.key_cache.invalidate_all();
        for key in verification_keys {
            self.inner.key_cache.insert(key.kid().to_string(), Arc::new(key)).await;
        }

        info!(issuer = %config.issuer, keys = keys.len(), "Provider configuration refreshed");
        Ok(config)
    }

    /// Loads the previously discovered provider configuration.
    pub fn load(&self) -> Result<ProviderConfig, IdentityError> {
        read_json(self.inner.store.as_ref(), PROVIDER_CONFIG_KEY)?.ok_or(IdentityError::NotDiscovered)
    }

    /// Loads the previously fetched signing keys.
    pub fn load_keys(&self) -> Result<SigningKeySet, IdentityError> {
        read_json(self.inner.store.as_ref(), SIGNING_KEYS_KEY)?.ok_or(IdentityError::NotDiscovered)
    }

    /// Retrieves a verification key by its Key ID (`kid`).
    ///
    /// It first checks the in-memory cache and falls back to the persisted key set.
    /// A missing key is `KeyNotFound`; callers should re-run discovery, never accept
    /// the token unverified.
    #[instrument(skip(self), err)]
    pub async fn lookup_key(&self, kid: &str) -> Result<Arc<VerificationKey>, IdentityError> {
        if let Some(key) = self.inner.key_cache.get(kid).await {
            debug!("Key cache hit for kid: {}", kid);
            return Ok(key);
        }

        debug!("Key cache miss for kid: {}. Loading persisted key set.", kid);
        let keys = self.load_keys()?;
        let jwk = keys.get(kid).ok_or_else(|| IdentityError::KeyNotFound(kid.to_string()))?;
        let key = Arc::new(keys::admit(jwk)?);
        self.inner.key_cache.insert(kid.to_string(), key.clone()).await;
        Ok(key)
    }
}
