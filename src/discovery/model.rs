// src/discovery/model.rs

use super::keys::{admit, VerificationKey};
use crate::error::IdentityError;
use jsonwebtoken::jwk::Jwk;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Represents an OIDC provider's discovery document.
/// Found at the `.well-known/openid-configuration` endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub issuer: String,
    #[serde(default)]
    pub authorization_endpoint: String,
    #[serde(default)]
    pub token_endpoint: String,
    #[serde(default)]
    pub userinfo_endpoint: String,
    #[serde(default)]
    pub revocation_endpoint: String,
    pub jwks_uri: String,
    #[serde(rename = "response_types_supported", default)]
    pub response_types: Vec<String>,
    #[serde(rename = "subject_types_supported", default)]
    pub subject_types: Vec<String>,
    #[serde(rename = "id_token_signing_alg_values_supported", default)]
    pub id_token_signing_algs: Vec<String>,
    #[serde(rename = "scopes_supported", default)]
    pub scopes: Vec<String>,
    #[serde(rename = "token_endpoint_auth_methods_supported", default)]
    pub token_endpoint_auth_methods: Vec<String>,
    #[serde(rename = "claims_supported", default)]
    pub claims: Vec<String>,
}

/// Represents a JSON Web Key Set as published by the provider, before any key is trusted.
#[derive(Debug, Deserialize)]
pub(crate) struct RawKeySet {
    pub keys: Vec<serde_json::Value>,
}

/// The provider's signing keys, indexed by key ID.
///
/// Every key in the set has passed structural validation; a set is only ever
/// built whole from a provider response or from the persisted copy of one.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SigningKeySet {
    keys: BTreeMap<String, Jwk>,
}

impl SigningKeySet {
    /// Admits every key of a published JWKS. A single invalid key rejects the whole set.
    pub(crate) fn from_raw(raw: RawKeySet) -> Result<Self, IdentityError> {
        let mut keys = BTreeMap::new();
        for (index, value) in raw.keys.into_iter().enumerate() {
            let kid = value
                .get("kid")
                .and_then(|k| k.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| format!("#{index}"));
            let jwk: Jwk = serde_json::from_value(value).map_err(|e| IdentityError::InvalidSigningKey {
                kid: kid.clone(),
                reason: e.to_string(),
            })?;
            let admitted = admit(&jwk)?;
            keys.insert(admitted.kid().to_string(), jwk);
        }
        Ok(Self { keys })
    }

    /// Re-checks a set loaded from the store and returns its verification keys.
    pub(crate) fn verification_keys(&self) -> Result<Vec<VerificationKey>, IdentityError> {
        self.keys.values().map(admit).collect()
    }

    /// Returns the raw key for a key ID.
    pub fn get(&self, kid: &str) -> Option<&Jwk> {
        self.keys.get(kid)
    }

    /// The key IDs in this set.
    pub fn key_ids(&self) -> impl Iterator<Item = &str> {
        self.keys.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}
