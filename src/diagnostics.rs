// src/diagnostics.rs

use crate::error::IdentityError;
use std::error::Error as _;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn debug_requested(verbose: bool) -> bool {
    verbose || std::env::var("DEBUG").is_ok_and(|value| !value.is_empty() && value != "0")
}

/// Installs the global `tracing` subscriber.
///
/// `RUST_LOG` wins when set. Otherwise the crate logs at `debug` when `verbose`
/// is set or `DEBUG` is non-empty (and not `0`), and at `warn` otherwise.
/// Calling it again once a subscriber is installed does nothing.
pub fn init_logging(verbose: bool) {
    let level = if debug_requested(verbose) { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(format!("nila_identity={level}")));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .try_init();
}

/// Renders an error for the person at the terminal.
///
/// With `verbose`, the whole cause chain is shown; otherwise a short message
/// for the kind of failure.
pub fn describe(err: &IdentityError, verbose: bool) -> String {
    let root = err.root();
    if matches!(root, IdentityError::InvalidCredentials) {
        return root.to_string();
    }

    if verbose {
        let mut parts = vec![err.to_string()];
        let mut source = err.source();
        while let Some(cause) = source {
            parts.push(cause.to_string());
            source = cause.source();
        }
        return parts.join(": ");
    }

    use IdentityError::*;
    match root {
        NotSignedIn => "not signed in".to_string(),
        NoRefreshToken | RefreshRejected(_) | TokenExpired => "session expired, please sign in again".to_string(),
        Http(_) | ResponseTooLarge { .. } | Rpc(_) | DiscoveryFailed(_) => {
            "could not reach the identity provider".to_string()
        }
        InvalidSigningKey { .. }
        | KeyNotFound(_)
        | MissingKeyId
        | MalformedToken(_)
        | AmbiguousSignature(_)
        | SignatureInvalid
        | UnsupportedAlgorithm(_)
        | NonceMismatch
        | IssuerMismatch { .. }
        | AudienceMismatch(_)
        | AuthorizedPartyMismatch
        | AccessTokenHashMismatch
        | MissingClaim(_) => "the identity provider returned tokens that could not be trusted".to_string(),
        CorruptTokenStore(_) | CorruptStore { .. } | Store(_) => {
            "local identity data is unreadable, please sign in again".to_string()
        }
        other => other.to_string(),
    }
}
