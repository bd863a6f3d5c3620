// src/token/mod.rs

pub mod claims;
pub mod verify;

use crate::error::IdentityError;
use serde::{Deserialize, Deserializer};
use std::time::Duration;

pub use claims::{at_hash, validate_claims, validate_claims_at, AccessTokenBinding, ClaimExpectations};
pub use verify::verify;

/// The claims decoded from an OIDC token.
///
/// Only produced by [`decode`]; the identity layer never trusts one for anything
/// but display until [`verify`] and [`validate_claims`] have accepted the token
/// it came from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct DecodedToken {
    #[serde(rename = "jti", default)]
    pub id: Option<String>,
    #[serde(rename = "iss", default)]
    pub issuer: String,
    #[serde(rename = "sub", default)]
    pub subject: String,
    #[serde(rename = "aud", default, deserialize_with = "one_or_many")]
    pub audience: Vec<String>,
    #[serde(rename = "exp", default)]
    pub expires_at: Option<i64>,
    #[serde(rename = "nbf", default)]
    pub not_before: Option<i64>,
    #[serde(rename = "iat", default)]
    pub issued_at: Option<i64>,
    #[serde(default)]
    pub auth_time: Option<i64>,
    #[serde(default)]
    pub nonce: Option<String>,
    #[serde(rename = "acr", default)]
    pub auth_context_class: Option<String>,
    #[serde(rename = "amr", default, deserialize_with = "one_or_many")]
    pub auth_methods: Vec<String>,
    #[serde(rename = "azp", default)]
    pub authorized_party: Option<String>,
    #[serde(default)]
    pub at_hash: Option<String>,
    #[serde(default)]
    pub c_hash: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    /// Accepts a JSON boolean or its string form (`"true"`/`"false"`).
    #[serde(default, deserialize_with = "lenient_bool")]
    pub email_verified: bool,
    /// Granted scopes, from either a space-delimited string or a list.
    #[serde(default, deserialize_with = "space_delimited")]
    pub scope: Vec<String>,
}

impl DecodedToken {
    /// Whether the token counts as expired at `now` (Unix seconds).
    ///
    /// The leeway is taken off the expiry instant, so a token is expired once
    /// `now > exp - leeway`. A token without `exp`, or with `exp` of zero, is
    /// always expired.
    pub fn is_expired_at(&self, now: i64, leeway: Duration) -> bool {
        let leeway = i64::try_from(leeway.as_secs()).unwrap_or(i64::MAX);
        match self.expires_at {
            Some(exp) if exp != 0 => now > exp.saturating_sub(leeway),
            _ => true,
        }
    }

    /// Whether the token counts as expired right now.
    pub fn is_expired(&self, leeway: Duration) -> bool {
        self.is_expired_at(chrono::Utc::now().timestamp(), leeway)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

fn one_or_many<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        Some(OneOrMany::One(value)) => vec![value],
        Some(OneOrMany::Many(values)) => values,
        None => Vec::new(),
    })
}

#[derive(Deserialize)]
#[serde(untagged)]
enum BoolOrString {
    Bool(bool),
    Text(String),
}

fn lenient_bool<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    Ok(match Option::<BoolOrString>::deserialize(deserializer)? {
        Some(BoolOrString::Bool(value)) => value,
        Some(BoolOrString::Text(value)) => value.trim().eq_ignore_ascii_case("true"),
        None => false,
    })
}

fn space_delimited<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        Some(OneOrMany::One(value)) => value.split_whitespace().map(str::to_string).collect(),
        Some(OneOrMany::Many(values)) => values,
        None => Vec::new(),
    })
}

/// Decodes the payload of a compact or JSON serialized JWT, without verifying
/// the signature.
pub fn decode(token: &str) -> Result<DecodedToken, IdentityError> {
    let segment = verify::payload_segment(token)?;
    let payload = base64_url::decode(&segment)
        .map_err(|e| IdentityError::MalformedToken(format!("failed decoding token payload: {e}")))?;

    serde_json::from_slice(&payload).map_err(|e| IdentityError::MalformedToken(format!("failed decoding token: {e}")))
}
