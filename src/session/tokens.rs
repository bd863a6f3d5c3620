// src/session/tokens.rs

use crate::error::IdentityError;
use crate::store::{ByteStore, TOKENS_KEY};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// The tokens obtained from the provider for the signed-in user.
///
/// Its presence in the store is what "signed in" means.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenSet {
    /// Provider address this set was obtained from.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub issuer: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub access: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub refresh: String,
}

impl fmt::Debug for TokenSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenSet")
            .field("issuer", &self.issuer)
            .field("id", &redacted(&self.id))
            .field("access", &redacted(&self.access))
            .field("refresh", &redacted(&self.refresh))
            .finish()
    }
}

fn redacted(value: &str) -> &'static str {
    if value.is_empty() {
        ""
    } else {
        "<redacted>"
    }
}

/// Reads and writes the persisted [`TokenSet`].
#[derive(Clone)]
pub struct TokenStore {
    store: Arc<dyn ByteStore>,
}

impl TokenStore {
    pub fn new(store: Arc<dyn ByteStore>) -> Self {
        Self { store }
    }

    /// Returns the persisted token set, or `None` when signed out.
    ///
    /// A torn or undecodable entry fails closed with `CorruptTokenStore`.
    pub fn read(&self) -> Result<Option<TokenSet>, IdentityError> {
        let Some(bytes) = self.store.read(TOKENS_KEY)? else {
            return Ok(None);
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| IdentityError::CorruptTokenStore(e.to_string()))
    }

    /// Replaces the persisted token set.
    pub fn write(&self, tokens: &TokenSet) -> Result<(), IdentityError> {
        let data = serde_json::to_vec_pretty(tokens).map_err(|e| IdentityError::CorruptTokenStore(e.to_string()))?;
        self.store.write(TOKENS_KEY, &data)?;
        Ok(())
    }

    /// Removes the persisted token set. Succeeds when there is none.
    pub fn delete(&self) -> Result<(), IdentityError> {
        self.store.delete(TOKENS_KEY)?;
        Ok(())
    }
}
