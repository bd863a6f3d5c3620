// src/lib.rs

//! Client-side OpenID Connect identity layer.
//!
//! Discovers a provider and its signing keys, signs a user in over the
//! Identity service RPC, validates and persists the issued tokens, refreshes
//! them when they expire, and attaches Basic/Bearer credentials to every
//! outbound RPC.

pub mod config;
pub mod credentials;
pub mod diagnostics;
pub mod discovery;
pub mod error;
pub mod http;
pub mod registrar;
pub mod rpc;
pub mod session;
pub mod store;
pub mod token;

/// The public prelude for the `nila-identity` crate.
///
/// This module re-exports the most commonly used types for convenience.
pub mod prelude {
    pub use crate::config::{ConfigBuilder, IdentityConfig, TransportTrust};
    pub use crate::credentials::{AuthHeader, CredentialProvider, Injection, PerCallCredentials};
    pub use crate::discovery::ProviderDirectory;
    pub use crate::error::{IdentityError, RpcError};
    pub use crate::registrar::{ClientDescriptor, ClientRegistrar, ClientRegistration};
    pub use crate::rpc::{ChannelFactory, ChannelTarget, IdentityChannel};
    pub use crate::session::{SessionManager, SessionState, TokenSet};
    pub use crate::store::{ByteStore, FileStore, MemoryStore};
    pub use crate::token::DecodedToken;
    pub use jsonwebtoken::Algorithm;
}
