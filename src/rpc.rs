// src/rpc.rs

//! Interfaces to the remote Identity service.
//!
//! The identity layer does not own an RPC stack; the embedding application
//! supplies a [`ChannelFactory`] that dials the service and invokes the
//! attached [`PerCallCredentials`] before every call.

use crate::config::{IdentityConfig, TransportTrust};
use crate::credentials::PerCallCredentials;
use crate::error::{IdentityError, RpcError};
use crate::http::rpc_authority;
use crate::registrar::ClientDescriptor;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// Where and how a channel should be opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelTarget {
    /// `host[:port]` of the Identity service.
    pub address: String,
    pub user_agent: String,
    pub trust: TransportTrust,
}

impl ChannelTarget {
    /// Builds the target for a provider address.
    pub fn for_address(address: &str, config: &IdentityConfig) -> Result<Self, IdentityError> {
        Ok(Self {
            address: rpc_authority(address)?,
            user_agent: config.user_agent.clone(),
            trust: config.trust.clone(),
        })
    }
}

/// Opens authenticated channels to the Identity service.
#[async_trait]
pub trait ChannelFactory: Send + Sync {
    /// Opens a channel whose every call carries headers from `credentials`.
    ///
    /// Implementations must refuse to send those headers over an unencrypted
    /// connection when `credentials.require_transport_security()` is true.
    async fn open_channel(
        &self,
        target: &ChannelTarget,
        credentials: Arc<dyn PerCallCredentials>,
    ) -> Result<Arc<dyn IdentityChannel>, RpcError>;
}

/// The calls the identity layer makes on the Identity service.
#[async_trait]
pub trait IdentityChannel: Send + Sync {
    async fn sign_in(&self, request: SignInRequest) -> Result<SignInResponse, RpcError>;

    async fn sign_out(&self, request: SignOutRequest) -> Result<(), RpcError>;

    /// Dynamically registers an OAuth2 client.
    async fn register(&self, descriptor: ClientDescriptor) -> Result<RegisteredClient, RpcError>;
}

/// Resource-owner password sign-in.
#[derive(Clone, PartialEq, Eq)]
pub struct SignInRequest {
    pub username: String,
    pub password: String,
    pub scope: String,
    pub response_type: String,
    pub client_id: String,
    /// CSRF value the server must echo back.
    pub state: String,
    /// Value the server must bind into the ID token.
    pub nonce: String,
    pub audience: String,
}

impl fmt::Debug for SignInRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignInRequest")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("scope", &self.scope)
            .field("response_type", &self.response_type)
            .field("client_id", &self.client_id)
            .field("state", &self.state)
            .field("nonce", &self.nonce)
            .field("audience", &self.audience)
            .finish()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignInResponse {
    pub id_token: String,
    pub access_token: String,
    pub refresh_token: String,
    pub state: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignOutRequest {
    pub id_token: String,
}

/// The server's answer to a client registration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegisteredClient {
    pub client_id: String,
    pub client_secret: String,
    /// Unix seconds.
    pub client_id_issued_at: i64,
}
