// src/session/mod.rs

mod refresh;
pub mod tokens;

use crate::config::IdentityConfig;
use crate::credentials::{AuthHeader, CredentialProvider};
use crate::discovery::ProviderDirectory;
use crate::error::{IdentityError, RpcError};
use crate::http::build_client;
use crate::registrar::{ClientRegistrar, ClientRegistration};
use crate::rpc::{ChannelFactory, ChannelTarget, SignInRequest, SignOutRequest};
use crate::store::ByteStore;
use crate::token::{self, AccessTokenBinding, ClaimExpectations};
use refresh::{request_tokens, RefreshGrant};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

pub use tokens::{TokenSet, TokenStore};

/// Where the local session stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    SignedOut,
    Authenticating,
    SignedIn,
    Refreshing,
    /// The last refresh failed; the stored tokens are kept but unusable.
    Expired,
}

/// Owns the signed-in user's tokens: sign-in, refresh, sign-out.
///
/// Cheap to clone. All clones share one in-memory token set, so concurrent
/// refreshes within a process are serialized and a single-use refresh token is
/// only ever spent once.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

struct Inner {
    config: IdentityConfig,
    http_client: reqwest::Client,
    directory: ProviderDirectory,
    registrar: ClientRegistrar,
    factory: Arc<dyn ChannelFactory>,
    token_store: TokenStore,
    // Guards read-check-refresh-write. `None` until first loaded from the store.
    tokens: Mutex<Option<TokenSet>>,
    state: RwLock<SessionState>,
}

fn random_value() -> String {
    rand::random::<[u8; 16]>().iter().map(|b| format!("{b:02x}")).collect()
}

impl SessionManager {
    pub fn new(
        config: IdentityConfig,
        store: Arc<dyn ByteStore>,
        factory: Arc<dyn ChannelFactory>,
    ) -> Result<Self, IdentityError> {
        let http_client = build_client(&config)?;
        let directory = ProviderDirectory::new(&config, http_client.clone(), store.clone());
        let registrar = ClientRegistrar::new(config.clone(), store.clone(), factory.clone());
        let token_store = TokenStore::new(store);

        let state = match token_store.read() {
            Ok(Some(_)) => SessionState::SignedIn,
            _ => SessionState::SignedOut,
        };

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                http_client,
                directory,
                registrar,
                factory,
                token_store,
                tokens: Mutex::new(None),
                state: RwLock::new(state),
            }),
        })
    }

    pub fn config(&self) -> &IdentityConfig {
        &self.inner.config
    }

    pub fn directory(&self) -> &ProviderDirectory {
        &self.inner.directory
    }

    pub fn registrar(&self) -> &ClientRegistrar {
        &self.inner.registrar
    }

    pub fn state(&self) -> SessionState {
        *self.inner.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: SessionState) {
        *self.inner.state.write().unwrap_or_else(PoisonError::into_inner) = state;
    }

    /// A credential provider following this session, for Identity service channels.
    pub fn credentials(&self) -> CredentialProvider {
        CredentialProvider::session(self.clone())
    }

    /// Signs the user in with their email and password.
    ///
    /// Registers this installation's client first if needed. Tokens are
    /// persisted only once the ID token has been verified and validated; on any
    /// failure the previously stored state is left as it was.
    #[instrument(skip(self, password), err)]
    pub async fn sign_in(&self, username: &str, password: &str, address: &str) -> Result<(), IdentityError> {
        let previous = self.state();
        self.set_state(SessionState::Authenticating);

        match self.authenticate(username, password, address).await {
            Ok(()) => {
                self.set_state(SessionState::SignedIn);
                info!("Signed in as {}", username);
                Ok(())
            }
            Err(e) => {
                self.set_state(previous);
                Err(e.context("sign in", address))
            }
        }
    }

    async fn authenticate(&self, username: &str, password: &str, address: &str) -> Result<(), IdentityError> {
        let registration = self.inner.registrar.register(address, username, password).await?;

        let csrf_state = random_value();
        let nonce = random_value();

        let target = ChannelTarget::for_address(address, &self.inner.config)?;
        let credentials = Arc::new(CredentialProvider::client(registration.clone()));
        let channel = self.inner.factory.open_channel(&target, credentials).await?;

        let request = SignInRequest {
            username: username.to_string(),
            password: password.to_string(),
            scope: self.inner.config.scope.clone(),
            response_type: self.inner.config.response_type.clone(),
            client_id: registration.client_id.clone(),
            state: csrf_state.clone(),
            nonce: nonce.clone(),
            audience: registration.client_id.clone(),
        };
        let response = channel.sign_in(request).await.map_err(|e| match e {
            RpcError::Unauthenticated(_) | RpcError::NotFound(_) => IdentityError::InvalidCredentials,
            other => IdentityError::Rpc(other),
        })?;

        if response.state != csrf_state {
            return Err(IdentityError::CsrfMismatch);
        }

        self.inner.directory.run(address).await?;

        let tokens = TokenSet {
            issuer: address.to_string(),
            id: response.id_token,
            access: response.access_token,
            refresh: response.refresh_token,
        };
        self.validate(&tokens, &registration, &nonce).await?;

        let mut slot = self.inner.tokens.lock().await;
        self.inner.token_store.write(&tokens)?;
        *slot = Some(tokens);
        Ok(())
    }

    /// Verifies the ID token signature and validates its claims against the session.
    async fn validate(
        &self,
        tokens: &TokenSet,
        registration: &ClientRegistration,
        nonce: &str,
    ) -> Result<(), IdentityError> {
        let header = token::verify(&self.inner.directory, &tokens.id).await?;
        let decoded = token::decode(&tokens.id)?;

        let expected = ClaimExpectations {
            issuer: &tokens.issuer,
            audience: &registration.client_id,
            nonce,
            leeway: self.inner.config.leeway,
        };
        let access = (!tokens.access.is_empty()).then(|| AccessTokenBinding {
            token: &tokens.access,
            algorithm: header.alg,
        });
        token::validate_claims(&decoded, &expected, access)
    }

    /// Removes the local tokens, then asks the provider to end the session.
    ///
    /// Only a failure to delete the local tokens is returned; the remote call
    /// is best effort.
    #[instrument(skip(self), err)]
    pub async fn sign_out(&self) -> Result<(), IdentityError> {
        let mut slot = self.inner.tokens.lock().await;
        let previous = match slot.take() {
            Some(tokens) => Some(tokens),
            None => self.inner.token_store.read().unwrap_or_else(|e| {
                warn!(error = %e, "Discarding unreadable tokens");
                None
            }),
        };
        let registration = self.inner.registrar.find().unwrap_or_else(|e| {
            warn!(error = %e, "Ignoring unreadable client registration");
            None
        });

        self.inner.token_store.delete()?;
        drop(slot);
        self.set_state(SessionState::SignedOut);

        if let Some(tokens) = previous {
            if let Err(e) = self.revoke(&tokens, registration).await {
                warn!(error = %e, "Failed revoking tokens at {}", tokens.issuer);
            }
        }
        Ok(())
    }

    async fn revoke(&self, tokens: &TokenSet, registration: Option<ClientRegistration>) -> Result<(), IdentityError> {
        let header = if !tokens.access.is_empty() {
            AuthHeader::Bearer(tokens.access.clone())
        } else if let Some(registration) = registration {
            registration.basic_auth()
        } else {
            debug!("No credentials left to revoke tokens with");
            return Ok(());
        };

        let target = ChannelTarget::for_address(&tokens.issuer, &self.inner.config)?;
        let channel = self
            .inner
            .factory
            .open_channel(&target, Arc::new(CredentialProvider::fixed(header)))
            .await?;
        channel
            .sign_out(SignOutRequest { id_token: tokens.id.clone() })
            .await?;
        Ok(())
    }

    /// Refreshes the tokens if the access or ID token is expired (or undecodable).
    ///
    /// A failed refresh leaves the stored tokens untouched.
    #[instrument(skip(self), err)]
    pub async fn refresh_if_expired(&self) -> Result<(), IdentityError> {
        let mut slot = self.inner.tokens.lock().await;
        self.refresh_locked(&mut slot).await.map(|_| ())
    }

    /// Returns the cached tokens, loading them from the store on first use.
    fn current(&self, slot: &mut Option<TokenSet>) -> Result<Option<TokenSet>, IdentityError> {
        if slot.is_none() {
            *slot = self.inner.token_store.read()?;
        }
        Ok(slot.clone())
    }

    fn is_fresh(&self, tokens: &TokenSet) -> bool {
        let leeway = self.inner.config.leeway;
        match (token::decode(&tokens.access), token::decode(&tokens.id)) {
            (Ok(access), Ok(id)) => !access.is_expired(leeway) && !id.is_expired(leeway),
            _ => false,
        }
    }

    async fn refresh_locked(&self, slot: &mut Option<TokenSet>) -> Result<TokenSet, IdentityError> {
        let current = self.current(slot)?.ok_or(IdentityError::NotSignedIn)?;
        if self.is_fresh(&current) {
            return Ok(current);
        }
        if current.refresh.is_empty() {
            self.set_state(SessionState::Expired);
            return Err(IdentityError::NoRefreshToken);
        }

        self.set_state(SessionState::Refreshing);
        match self.rotate(&current).await {
            Ok(next) => {
                *slot = Some(next.clone());
                self.set_state(SessionState::SignedIn);
                Ok(next)
            }
            Err(e) => {
                self.set_state(SessionState::Expired);
                Err(e.context("token refresh", current.issuer))
            }
        }
    }

    async fn rotate(&self, current: &TokenSet) -> Result<TokenSet, IdentityError> {
        let registration = self.inner.registrar.load()?;
        let provider = self.inner.directory.load()?;
        if provider.token_endpoint.is_empty() {
            return Err(IdentityError::DiscoveryFailed("provider config has no token endpoint".to_string()));
        }

        let nonce = Uuid::new_v4().to_string();
        let scope = match token::decode(&current.access) {
            Ok(access) if !access.scope.is_empty() => access.scope.join(" "),
            _ => self.inner.config.scope.clone(),
        };
        let grant = RefreshGrant::new(&current.refresh, &scope, &nonce);
        let response = request_tokens(
            &self.inner.http_client,
            &provider.token_endpoint,
            &registration,
            &grant,
            self.inner.config.max_response_bytes,
        )
        .await?;

        // Keys may have rotated since the tokens were issued.
        self.inner.directory.run(&current.issuer).await?;

        let refresh = if response.refresh_token.is_empty() {
            current.refresh.clone()
        } else {
            response.refresh_token
        };
        let next = TokenSet {
            issuer: current.issuer.clone(),
            id: response.id_token,
            access: response.access_token,
            refresh,
        };
        self.validate(&next, &registration, &nonce).await?;

        self.inner.token_store.write(&next)?;
        debug!("Stored refreshed tokens");
        Ok(next)
    }

    /// Returns the signed-in user's email, read from the stored ID token.
    pub fn who_am_i(&self) -> Result<String, IdentityError> {
        let tokens = self.tokens()?;
        token::decode(&tokens.id)?.email.ok_or(IdentityError::MissingClaim("email"))
    }

    /// Returns the stored tokens.
    pub fn tokens(&self) -> Result<TokenSet, IdentityError> {
        self.inner.token_store.read()?.ok_or(IdentityError::NotSignedIn)
    }

    /// The header to attach to an Identity service call.
    ///
    /// Bearer once signed in (refreshing first when needed), the client's Basic
    /// credentials when only registered, nothing otherwise.
    pub(crate) async fn authorization(&self) -> Result<Option<AuthHeader>, IdentityError> {
        let Some(registration) = self.inner.registrar.find()? else {
            return Ok(None);
        };

        let mut slot = self.inner.tokens.lock().await;
        if self.current(&mut slot)?.is_none() {
            return Ok(Some(registration.basic_auth()));
        }
        let tokens = self.refresh_locked(&mut slot).await?;
        Ok(Some(AuthHeader::Bearer(tokens.access)))
    }
}
