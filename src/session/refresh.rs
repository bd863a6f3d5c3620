// src/session/refresh.rs

use crate::error::IdentityError;
use crate::http::read_limited;
use crate::registrar::ClientRegistration;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Form fields of the `refresh_token` grant.
#[derive(Serialize)]
pub(crate) struct RefreshGrant<'a> {
    pub grant_type: &'static str,
    pub refresh_token: &'a str,
    pub scope: &'a str,
    pub nonce: &'a str,
}

impl<'a> RefreshGrant<'a> {
    pub fn new(refresh_token: &'a str, scope: &'a str, nonce: &'a str) -> Self {
        Self {
            grant_type: "refresh_token",
            refresh_token,
            scope,
            nonce,
        }
    }
}

/// The token endpoint's answer to a refresh grant.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct RefreshResponse {
    pub access_token: String,
    pub token_type: String,
    pub refresh_token: String,
    pub expires_in: Option<i64>,
    pub id_token: String,
    pub error: String,
    pub error_description: String,
    pub error_uri: String,
}

impl RefreshResponse {
    fn rejection(&self) -> String {
        let mut reason = self.error.clone();
        if !self.error_description.is_empty() {
            reason = format!("{reason}: {}", self.error_description);
        }
        if !self.error_uri.is_empty() {
            reason = format!("{reason} ({})", self.error_uri);
        }
        reason
    }
}

/// Posts the refresh grant to the token endpoint, authenticated as the registered client.
pub(crate) async fn request_tokens(
    http_client: &reqwest::Client,
    token_endpoint: &str,
    registration: &ClientRegistration,
    grant: &RefreshGrant<'_>,
    max_response_bytes: usize,
) -> Result<RefreshResponse, IdentityError> {
    debug!("Requesting new tokens from: {}", token_endpoint);
    let response = http_client
        .post(token_endpoint)
        .basic_auth(&registration.client_id, Some(&registration.client_secret))
        .form(grant)
        .send()
        .await?;

    let status = response.status();
    let body = read_limited(response, max_response_bytes).await?;
    let decoded = serde_json::from_slice::<RefreshResponse>(&body);

    if status != StatusCode::OK {
        let reason = match decoded {
            Ok(refused) if !refused.error.is_empty() => refused.rejection(),
            _ => String::from_utf8_lossy(&body).trim().to_string(),
        };
        return Err(IdentityError::RefreshRejected(format!("HTTP status {status}: {reason}")));
    }

    let refreshed = decoded.map_err(|e| IdentityError::RefreshRejected(format!("undecodable response: {e}")))?;
    if !refreshed.error.is_empty() {
        return Err(IdentityError::RefreshRejected(refreshed.rejection()));
    }
    if refreshed.id_token.is_empty() || refreshed.access_token.is_empty() {
        return Err(IdentityError::RefreshRejected("response carries no ID or access token".to_string()));
    }
    debug!(
        token_type = %refreshed.token_type,
        expires_in = ?refreshed.expires_in,
        "Token endpoint issued new tokens"
    );
    Ok(refreshed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grant_encodes_as_form() {
        let grant = RefreshGrant::new("r-1", "openid email", "n-1");
        let form = serde_urlencoded::to_string(&grant).unwrap();
        assert_eq!(form, "grant_type=refresh_token&refresh_token=r-1&scope=openid+email&nonce=n-1");
    }

    #[test]
    fn rejection_joins_error_fields() {
        let response = RefreshResponse {
            error: "invalid_grant".to_string(),
            error_description: "refresh token was revoked".to_string(),
            ..Default::default()
        };
        assert_eq!(response.rejection(), "invalid_grant: refresh token was revoked");
    }
}
