// src/credentials.rs

use crate::error::IdentityError;
use crate::registrar::ClientRegistration;
use crate::session::SessionManager;
use async_trait::async_trait;
use base64::engine::{general_purpose::STANDARD, Engine};
use std::fmt;
use tracing::warn;

/// Name of the metadata entry carrying the credentials.
pub const AUTHORIZATION: &str = "authorization";

/// An `authorization` header value.
#[derive(Clone, PartialEq, Eq)]
pub enum AuthHeader {
    Basic { username: String, password: String },
    Bearer(String),
}

impl AuthHeader {
    /// Renders the header value, e.g. `Bearer eyJ...`.
    pub fn value(&self) -> String {
        match self {
            AuthHeader::Basic { username, password } => {
                format!("Basic {}", STANDARD.encode(format!("{username}:{password}")))
            }
            AuthHeader::Bearer(token) => format!("Bearer {token}"),
        }
    }
}

impl fmt::Debug for AuthHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthHeader::Basic { username, .. } => write!(f, "Basic({username}, <redacted>)"),
            AuthHeader::Bearer(_) => write!(f, "Bearer(<redacted>)"),
        }
    }
}

/// What a credential source produced for one call.
///
/// A call always proceeds: when credentials could not be produced
/// `authorization` is `None` and `error` says why, leaving rejection to the server.
#[derive(Debug, Default)]
pub struct Injection {
    pub authorization: Option<AuthHeader>,
    pub error: Option<IdentityError>,
}

impl Injection {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn header(header: AuthHeader) -> Self {
        Self { authorization: Some(header), error: None }
    }

    pub fn failed(error: IdentityError) -> Self {
        Self { authorization: None, error: Some(error) }
    }

    /// The `(name, value)` metadata pair to attach, if any.
    pub fn metadata(&self) -> Option<(&'static str, String)> {
        self.authorization.as_ref().map(|header| (AUTHORIZATION, header.value()))
    }
}

/// Produces the credentials attached to each outbound RPC.
#[async_trait]
pub trait PerCallCredentials: Send + Sync {
    async fn request_metadata(&self) -> Injection;

    /// Channels must not send these credentials over an unencrypted connection.
    fn require_transport_security(&self) -> bool {
        true
    }
}

enum Source {
    ResourceOwner { username: String, password: String },
    Client(ClientRegistration),
    Fixed(AuthHeader),
    Session(SessionManager),
}

/// The credential injector attached to Identity service channels.
pub struct CredentialProvider {
    source: Source,
}

impl CredentialProvider {
    /// Sends the user's own credentials as Basic auth (client registration).
    pub fn resource_owner(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            source: Source::ResourceOwner {
                username: username.into(),
                password: password.into(),
            },
        }
    }

    /// Sends the registered client's id and secret as Basic auth (sign-in).
    pub fn client(registration: ClientRegistration) -> Self {
        Self { source: Source::Client(registration) }
    }

    /// Always sends the same header.
    pub fn fixed(header: AuthHeader) -> Self {
        Self { source: Source::Fixed(header) }
    }

    /// Follows the session: a fresh Bearer token when signed in, client
    /// credentials when only registered, nothing otherwise.
    pub fn session(session: SessionManager) -> Self {
        Self { source: Source::Session(session) }
    }
}

#[async_trait]
impl PerCallCredentials for CredentialProvider {
    async fn request_metadata(&self) -> Injection {
        match &self.source {
            Source::ResourceOwner { username, password } => Injection::header(AuthHeader::Basic {
                username: username.clone(),
                password: password.clone(),
            }),
            Source::Client(registration) => Injection::header(registration.basic_auth()),
            Source::Fixed(header) => Injection::header(header.clone()),
            Source::Session(session) => match session.authorization().await {
                Ok(Some(header)) => Injection::header(header),
                Ok(None) => Injection::none(),
                Err(e) => {
                    warn!(error = %e, "Sending call without credentials");
                    Injection::failed(e)
                }
            },
        }
    }
}
