// tests/common/mod.rs
#![allow(dead_code)]

use async_trait::async_trait;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use nila_identity::prelude::*;
use nila_identity::rpc::{RegisteredClient, SignInRequest, SignInResponse, SignOutRequest};
use nila_identity::token::at_hash;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

pub const RSA_PEM: &[u8] = include_bytes!("../fixtures/rsa_private_key.pem");
pub const JWKS: &str = include_str!("../fixtures/jwks.json");

pub const USERNAME: &str = "user@example.com";
pub const PASSWORD: &str = "secret";
pub const CLIENT_ID: &str = "client-1";
pub const CLIENT_SECRET: &str = "client-secret-1";
pub const SCOPE: &str = "openid name email offline_access";

pub fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Signs claims with the RSA fixture key, as the provider would.
pub fn sign(claims: serde_json::Value) -> String {
    let mut header = Header::new(Algorithm::RS256);
    header.kid = Some("rsa-test".to_string());
    let key = EncodingKey::from_rsa_pem(RSA_PEM).expect("fixture key should parse");
    encode(&header, &claims, &key).expect("token should sign")
}

pub fn access_token(issuer: &str, ttl: i64, scope: &str) -> String {
    sign(serde_json::json!({
        "iss": issuer,
        "sub": "user-1",
        "aud": CLIENT_ID,
        "exp": now() + ttl,
        "iat": now(),
        "scope": scope,
    }))
}

pub fn id_token(issuer: &str, ttl: i64, nonce: &str, email: &str, access: &str) -> String {
    sign(serde_json::json!({
        "iss": issuer,
        "sub": "user-1",
        "aud": CLIENT_ID,
        "azp": CLIENT_ID,
        "exp": now() + ttl,
        "iat": now(),
        "nonce": nonce,
        "email": email,
        "email_verified": true,
        "at_hash": at_hash(access, Algorithm::RS256),
    }))
}

/// Serves the discovery document and key set for `server`.
pub async fn mount_provider(server: &MockServer) {
    let issuer = server.uri();
    let config = serde_json::json!({
        "issuer": issuer,
        "authorization_endpoint": format!("{issuer}/authorize"),
        "token_endpoint": format!("{issuer}/token"),
        "userinfo_endpoint": format!("{issuer}/userinfo"),
        "jwks_uri": format!("{issuer}/jwks"),
        "response_types_supported": ["token id_token"],
        "subject_types_supported": ["public"],
        "id_token_signing_alg_values_supported": ["RS256", "ES256"],
        "scopes_supported": ["openid", "name", "email", "offline_access"],
    });
    Mock::given(method("GET"))
        .and(path("/.well-known/openid-configuration"))
        .respond_with(ResponseTemplate::new(200).set_body_json(config))
        .mount(server)
        .await;

    let jwks: serde_json::Value = serde_json::from_str(JWKS).expect("fixture JWKS should parse");
    Mock::given(method("GET"))
        .and(path("/jwks"))
        .respond_with(ResponseTemplate::new(200).set_body_json(jwks))
        .mount(server)
        .await;
}

/// Answers the refresh grant with tokens bound to the nonce in the form.
pub struct RefreshResponder {
    pub issuer: String,
    /// New refresh token to hand out; `None` omits the field.
    pub rotated_refresh: Option<String>,
    /// Overrides the nonce put into the new ID token.
    pub nonce_override: Option<String>,
}

impl Respond for RefreshResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let form: HashMap<String, String> =
            serde_urlencoded::from_bytes(&request.body).expect("refresh body should be a form");
        let nonce = self.nonce_override.clone().unwrap_or_else(|| form["nonce"].clone());

        let access = access_token(&self.issuer, 3600, &form["scope"]);
        let id = id_token(&self.issuer, 3600, &nonce, USERNAME, &access);
        let mut body = serde_json::json!({
            "access_token": access,
            "id_token": id,
            "token_type": "Bearer",
            "expires_in": 3600,
        });
        if let Some(refresh) = &self.rotated_refresh {
            body["refresh_token"] = serde_json::json!(refresh);
        }
        ResponseTemplate::new(200).set_body_json(body)
    }
}

/// An in-process Identity service recording every call it receives.
pub struct MockIdentity {
    pub issuer: String,
    pub password: String,
    pub echo_state: bool,
    pub access_ttl: i64,
    pub fail_sign_out: bool,
    /// `(call, authorization header)` in arrival order.
    pub calls: Mutex<Vec<(&'static str, Option<String>)>>,
    pub targets: Mutex<Vec<ChannelTarget>>,
    pub last_sign_in: Mutex<Option<SignInRequest>>,
    pub register_calls: AtomicUsize,
    pub sign_in_calls: AtomicUsize,
    pub sign_out_calls: AtomicUsize,
}

impl MockIdentity {
    pub fn new(issuer: &str) -> Self {
        Self {
            issuer: issuer.to_string(),
            password: PASSWORD.to_string(),
            echo_state: true,
            access_ttl: 3600,
            fail_sign_out: false,
            calls: Mutex::new(Vec::new()),
            targets: Mutex::new(Vec::new()),
            last_sign_in: Mutex::new(None),
            register_calls: AtomicUsize::new(0),
            sign_in_calls: AtomicUsize::new(0),
            sign_out_calls: AtomicUsize::new(0),
        }
    }

    pub fn headers_for(&self, call: &str) -> Vec<Option<String>> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(name, _)| *name == call)
            .map(|(_, header)| header.clone())
            .collect()
    }
}

pub struct MockFactory(pub Arc<MockIdentity>);

#[async_trait]
impl ChannelFactory for MockFactory {
    async fn open_channel(
        &self,
        target: &ChannelTarget,
        credentials: Arc<dyn PerCallCredentials>,
    ) -> Result<Arc<dyn IdentityChannel>, RpcError> {
        assert!(credentials.require_transport_security());
        self.0.targets.lock().unwrap().push(target.clone());
        Ok(Arc::new(MockChannel {
            identity: self.0.clone(),
            credentials,
        }))
    }
}

struct MockChannel {
    identity: Arc<MockIdentity>,
    credentials: Arc<dyn PerCallCredentials>,
}

impl MockChannel {
    async fn authorize(&self, call: &'static str) {
        let injection = self.credentials.request_metadata().await;
        let header = injection.metadata().map(|(_, value)| value);
        self.identity.calls.lock().unwrap().push((call, header));
    }
}

#[async_trait]
impl IdentityChannel for MockChannel {
    async fn sign_in(&self, request: SignInRequest) -> Result<SignInResponse, RpcError> {
        self.authorize("sign_in").await;
        self.identity.sign_in_calls.fetch_add(1, Ordering::SeqCst);
        *self.identity.last_sign_in.lock().unwrap() = Some(request.clone());

        if request.username != USERNAME || request.password != self.identity.password {
            return Err(RpcError::Unauthenticated("bad credentials".to_string()));
        }

        let issuer = &self.identity.issuer;
        let access = access_token(issuer, self.identity.access_ttl, &request.scope);
        let id = id_token(issuer, 3600, &request.nonce, &request.username, &access);
        let state = if self.identity.echo_state {
            request.state
        } else {
            "forged-state".to_string()
        };
        Ok(SignInResponse {
            id_token: id,
            access_token: access,
            refresh_token: "refresh-1".to_string(),
            state,
        })
    }

    async fn sign_out(&self, _request: SignOutRequest) -> Result<(), RpcError> {
        self.authorize("sign_out").await;
        self.identity.sign_out_calls.fetch_add(1, Ordering::SeqCst);
        if self.identity.fail_sign_out {
            return Err(RpcError::Unavailable("identity service is down".to_string()));
        }
        Ok(())
    }

    async fn register(&self, _descriptor: ClientDescriptor) -> Result<RegisteredClient, RpcError> {
        self.authorize("register").await;
        self.identity.register_calls.fetch_add(1, Ordering::SeqCst);
        Ok(RegisteredClient {
            client_id: CLIENT_ID.to_string(),
            client_secret: CLIENT_SECRET.to_string(),
            client_id_issued_at: 1_700_000_000,
        })
    }
}

/// A provider on wiremock, a mock Identity service and a session wired to both.
pub struct Harness {
    pub server: MockServer,
    pub identity: Arc<MockIdentity>,
    pub store: Arc<MemoryStore>,
    pub session: SessionManager,
}

impl Harness {
    pub async fn start(configure: impl FnOnce(&mut MockIdentity)) -> Self {
        let server = MockServer::start().await;
        mount_provider(&server).await;

        let mut identity = MockIdentity::new(&server.uri());
        configure(&mut identity);
        let identity = Arc::new(identity);

        let store = Arc::new(MemoryStore::new());
        let session = SessionManager::new(
            IdentityConfig::default(),
            store.clone(),
            Arc::new(MockFactory(identity.clone())),
        )
        .expect("session should build");

        Self {
            server,
            identity,
            store,
            session,
        }
    }

    pub fn address(&self) -> String {
        self.server.uri()
    }

    pub async fn sign_in(&self) -> Result<(), IdentityError> {
        self.session.sign_in(USERNAME, PASSWORD, &self.address()).await
    }

    /// Number of requests the provider received on `path`.
    pub async fn requests_to(&self, request_path: &str) -> usize {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|request| request.url.path() == request_path)
            .count()
    }
}
