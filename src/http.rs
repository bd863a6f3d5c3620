// src/http.rs

use crate::config::{IdentityConfig, TransportTrust};
use crate::error::IdentityError;
use bytes::{Bytes, BytesMut};
use url::Url;

/// Builds the HTTP client shared by discovery and the refresh grant.
///
/// The timeout is a deadline for the entire request (connect, TLS handshake,
/// headers and body), and redirects are never followed.
pub fn build_client(config: &IdentityConfig) -> Result<reqwest::Client, IdentityError> {
    let mut builder = reqwest::Client::builder()
        .timeout(config.request_timeout)
        .redirect(reqwest::redirect::Policy::none())
        .user_agent(config.user_agent.as_str());

    if let TransportTrust::PinnedCertificate(pem) = &config.trust {
        let certificate = reqwest::Certificate::from_pem(pem)
            .map_err(|e| IdentityError::InvalidConfiguration(format!("pinned certificate: {e}")))?;
        builder = builder
            .tls_built_in_root_certs(false)
            .add_root_certificate(certificate);
    }

    Ok(builder.build()?)
}

/// Reads a response body, failing once more than `limit` bytes have arrived.
pub async fn read_limited(mut response: reqwest::Response, limit: usize) -> Result<Bytes, IdentityError> {
    if response.content_length().is_some_and(|len| len > limit as u64) {
        return Err(IdentityError::ResponseTooLarge { limit });
    }

    let mut body = BytesMut::new();
    while let Some(chunk) = response.chunk().await? {
        if body.len() + chunk.len() > limit {
            return Err(IdentityError::ResponseTooLarge { limit });
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body.freeze())
}

/// Normalizes a provider address into its HTTPS base URL.
///
/// Addresses without an `http`/`https` scheme are assumed to be HTTPS; a trailing
/// slash is dropped so that `{base}/.well-known/...` joins cleanly.
pub fn provider_base(address: &str) -> Result<String, IdentityError> {
    let address = address.trim();
    if address.is_empty() {
        return Err(IdentityError::InvalidUrl("empty provider address".to_string()));
    }
    let candidate = if address.starts_with("https://") || address.starts_with("http://") {
        address.to_string()
    } else {
        format!("https://{address}")
    };
    let url = Url::parse(&candidate).map_err(|e| IdentityError::InvalidUrl(format!("{address:?}: {e}")))?;
    if url.host_str().is_none() {
        return Err(IdentityError::InvalidUrl(format!("{address:?} has no host")));
    }
    Ok(url.as_str().trim_end_matches('/').to_string())
}

/// Returns the `host[:port]` authority an RPC channel should dial for a provider address.
pub fn rpc_authority(address: &str) -> Result<String, IdentityError> {
    let base = provider_base(address)?;
    let url = Url::parse(&base).map_err(|e| IdentityError::InvalidUrl(e.to_string()))?;
    let host = url.host_str().ok_or_else(|| IdentityError::InvalidUrl(format!("{address:?} has no host")))?;
    Ok(match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    })
}
