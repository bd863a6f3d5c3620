// src/error.rs

use jsonwebtoken::Algorithm;
use thiserror::Error;

/// Status reported by the remote Identity service over the RPC channel.
///
/// This mirrors the small subset of RPC status codes the identity layer
/// needs to tell apart. Channel implementations map their transport's
/// native status codes onto these variants.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RpcError {
    /// The server rejected the credentials attached to the call.
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    /// The requested account or resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The channel could not be opened or the server is unreachable.
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// Any other failure reported by the server.
    #[error("{0}")]
    Other(String),
}

/// The primary error type for the `nila-identity` library.
#[derive(Debug, Error)]
pub enum IdentityError {
    // --- Transport ---
    /// An error occurred during an HTTP request (connect, TLS, timeout).
    #[error("HTTP request error")]
    Http(#[from] reqwest::Error),

    /// A response body exceeded the configured size limit.
    #[error("response body exceeds the {limit} byte limit")]
    ResponseTooLarge { limit: usize },

    /// A provided address or URL could not be parsed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// The RPC collaborator failed.
    #[error("identity service call failed")]
    Rpc(#[from] RpcError),

    // --- Protocol ---
    /// The discovery document does not exist at the given address.
    #[error("{0:?} does not seem to implement OpenID Connect")]
    NotAnOidcProvider(String),

    /// Discovery or JWKS retrieval returned a non-200 status or an undecodable payload.
    #[error("failed discovering provider configuration: {0}")]
    DiscoveryFailed(String),

    /// The token endpoint rejected the refresh grant.
    #[error("refresh token request was rejected: {0}")]
    RefreshRejected(String),

    // --- Validation ---
    /// The provider advertised a key that is not a structurally valid public key.
    #[error("invalid signing key {kid:?}: {reason}")]
    InvalidSigningKey { kid: String, reason: String },

    /// A key with the specified 'kid' was not found in the cached key set.
    #[error("Key not found for kid: {0}")]
    KeyNotFound(String),

    /// The JWT header is missing the required 'kid' (Key ID) field.
    #[error("The JWT header is missing the 'kid' (Key ID) field")]
    MissingKeyId,

    /// The token is not a well-formed JWT.
    #[error("malformed token: {0}")]
    MalformedToken(String),

    /// The signature envelope carries zero or more than one signature.
    #[error("expected exactly one signature, found {0}")]
    AmbiguousSignature(usize),

    /// The signature does not verify against the resolved key.
    #[error("token integrity couldn't be verified")]
    SignatureInvalid,

    /// The header algorithm is not usable with the resolved key or not advertised by the provider.
    #[error("Unsupported algorithm: {0:?}")]
    UnsupportedAlgorithm(Algorithm),

    /// The nonce in the token does not match the expected nonce.
    #[error("Nonce mismatch: the nonce in the ID token does not match the nonce sent in the request")]
    NonceMismatch,

    /// The issuer in the token is not the provider originally used.
    #[error("issuer in ID token does not match the identity provider originally used: {actual} != {expected}")]
    IssuerMismatch { expected: String, actual: String },

    /// The token audience does not include this client.
    #[error("ID token audience does not contain client {0:?}")]
    AudienceMismatch(String),

    /// The authorized party in the token is some other client.
    #[error("authorized party in ID token does not match client ID")]
    AuthorizedPartyMismatch,

    /// The token is expired (after clock-skew leeway).
    #[error("ID token has expired")]
    TokenExpired,

    /// The access token does not hash to the ID token's `at_hash`.
    #[error("calculated hash value from access token doesn't match value declared in ID token")]
    AccessTokenHashMismatch,

    /// A claim required by the caller is absent from the token.
    #[error("A required claim is missing from the token: {0}")]
    MissingClaim(&'static str),

    /// The server echoed a different CSRF state than the one sent.
    #[error("csrf token received does not match the value we sent")]
    CsrfMismatch,

    /// The server rejected the resource-owner credentials.
    #[error("email or password is not valid")]
    InvalidCredentials,

    // --- State ---
    /// Provider discovery has never been run on this installation.
    #[error("provider configuration has not been discovered yet")]
    NotDiscovered,

    /// No token set is stored locally.
    #[error("not signed in")]
    NotSignedIn,

    /// A refresh is needed but there is no refresh token.
    #[error("no refresh token found")]
    NoRefreshToken,

    /// No client registration is stored locally.
    #[error("no client registration found")]
    NotRegistered,

    /// The persisted token set is unreadable or torn.
    #[error("stored tokens are corrupt: {0}")]
    CorruptTokenStore(String),

    /// Some other persisted entry is unreadable.
    #[error("stored entry {key:?} is corrupt: {reason}")]
    CorruptStore { key: String, reason: String },

    /// The backing byte store failed.
    #[error("token store I/O error")]
    Store(#[from] std::io::Error),

    /// A configuration value is invalid.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Wraps a lower-level failure with the operation and provider address it occurred in.
    #[error("{operation} against {address:?} failed")]
    Operation {
        operation: &'static str,
        address: String,
        #[source]
        source: Box<IdentityError>,
    },
}

impl IdentityError {
    /// Attaches the operation and provider address to this error.
    pub fn context(self, operation: &'static str, address: impl Into<String>) -> Self {
        IdentityError::Operation {
            operation,
            address: address.into(),
            source: Box::new(self),
        }
    }

    /// Returns the innermost error, skipping any `Operation` context layers.
    pub fn root(&self) -> &IdentityError {
        match self {
            IdentityError::Operation { source, .. } => source.root(),
            other => other,
        }
    }
}
