// src/registrar.rs

use crate::config::IdentityConfig;
use crate::credentials::{AuthHeader, CredentialProvider};
use crate::error::{IdentityError, RpcError};
use crate::rpc::{ChannelFactory, ChannelTarget};
use crate::store::{read_json, write_json, ByteStore, CLIENT_KEY};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

/// The client metadata sent when dynamically registering this installation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientDescriptor {
    pub client_name: String,
    pub application_type: String,
    pub redirect_uris: Vec<String>,
    pub response_types: Vec<String>,
    pub grant_types: Vec<String>,
    pub id_token_signed_response_alg: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_uri: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logo_uri: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy_uri: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tos_uri: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub contacts: Vec<String>,
}

impl Default for ClientDescriptor {
    fn default() -> Self {
        Self {
            client_name: "Nila CLI".to_string(),
            application_type: "native".to_string(),
            redirect_uris: vec!["http://localhost/nila/callback".to_string()],
            response_types: vec!["token".to_string(), "id_token".to_string()],
            grant_types: vec!["password".to_string(), "refresh_token".to_string()],
            id_token_signed_response_alg: "ES256".to_string(),
            client_uri: None,
            logo_uri: None,
            policy_uri: None,
            tos_uri: None,
            contacts: Vec::new(),
        }
    }
}

/// This installation's OAuth2 client, as issued by the provider.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientRegistration {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default)]
    pub redirect_uris: Vec<String>,
    pub issued_at: DateTime<Utc>,
}

impl ClientRegistration {
    /// The client's id and secret as a Basic authorization header.
    pub fn basic_auth(&self) -> AuthHeader {
        AuthHeader::Basic {
            username: self.client_id.clone(),
            password: self.client_secret.clone(),
        }
    }
}

impl fmt::Debug for ClientRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientRegistration")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("redirect_uris", &self.redirect_uris)
            .field("issued_at", &self.issued_at)
            .finish()
    }
}

/// Creates the per-installation client registration and reads it back.
#[derive(Clone)]
pub struct ClientRegistrar {
    inner: Arc<Inner>,
}

struct Inner {
    config: IdentityConfig,
    store: Arc<dyn ByteStore>,
    factory: Arc<dyn ChannelFactory>,
    // Serializes create-if-absent within the process.
    lock: Mutex<()>,
}

impl ClientRegistrar {
    pub fn new(config: IdentityConfig, store: Arc<dyn ByteStore>, factory: Arc<dyn ChannelFactory>) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                store,
                factory,
                lock: Mutex::new(()),
            }),
        }
    }

    /// Returns the stored registration, or `None` if this installation never registered.
    pub fn find(&self) -> Result<Option<ClientRegistration>, IdentityError> {
        read_json(self.inner.store.as_ref(), CLIENT_KEY)
    }

    /// Returns the stored registration, failing with `NotRegistered` if there is none.
    pub fn load(&self) -> Result<ClientRegistration, IdentityError> {
        self.find()?.ok_or(IdentityError::NotRegistered)
    }

    /// Returns the installation's client registration, registering one first if needed.
    ///
    /// The registration call is authenticated with the user's own credentials.
    /// Once a registration is stored it is returned as-is, whatever credentials
    /// later calls supply.
    #[instrument(skip(self, password), err)]
    pub async fn register(
        &self,
        address: &str,
        username: &str,
        password: &str,
    ) -> Result<ClientRegistration, IdentityError> {
        let _guard = self.inner.lock.lock().await;
        if let Some(existing) = self.find()? {
            debug!("Reusing client registration {}", existing.client_id);
            return Ok(existing);
        }

        self.create(address, username, password)
            .await
            .map_err(|e| e.context("client registration", address))
    }

    async fn create(&self, address: &str, username: &str, password: &str) -> Result<ClientRegistration, IdentityError> {
        let target = ChannelTarget::for_address(address, &self.inner.config)?;
        let credentials = Arc::new(CredentialProvider::resource_owner(username, password));
        let channel = self.inner.factory.open_channel(&target, credentials).await?;

        let descriptor = self.inner.config.client.clone();
        let redirect_uris = descriptor.redirect_uris.clone();
        let registered = channel.register(descriptor).await.map_err(|e| match e {
            RpcError::Unauthenticated(_) | RpcError::NotFound(_) => IdentityError::InvalidCredentials,
            other => IdentityError::Rpc(other),
        })?;

        let issued_at = Utc
            .timestamp_opt(registered.client_id_issued_at, 0)
            .single()
            .filter(|_| registered.client_id_issued_at > 0)
            .unwrap_or_else(Utc::now);
        let registration = ClientRegistration {
            client_id: registered.client_id,
            client_secret: registered.client_secret,
            redirect_uris,
            issued_at,
        };

        write_json(self.inner.store.as_ref(), CLIENT_KEY, &registration)?;
        info!(client_id = %registration.client_id, "Registered OAuth2 client");
        Ok(registration)
    }
}
