// src/token/claims.rs

use super::DecodedToken;
use crate::error::IdentityError;
use base64::engine::{general_purpose::URL_SAFE_NO_PAD, Engine};
use jsonwebtoken::Algorithm;
use sha2::{Digest, Sha384, Sha512, Sha512_256};
use std::time::Duration;

/// What an ID token must assert to be accepted by this client.
#[derive(Debug, Clone, Copy)]
pub struct ClaimExpectations<'a> {
    /// The provider address the session was started against.
    pub issuer: &'a str,
    /// This client's own `client_id`.
    pub audience: &'a str,
    /// The nonce sent with the sign-in or refresh request.
    pub nonce: &'a str,
    pub leeway: Duration,
}

/// An access token issued together with the ID token, and the algorithm the ID
/// token was signed with (which selects the `at_hash` digest).
#[derive(Debug, Clone, Copy)]
pub struct AccessTokenBinding<'a> {
    pub token: &'a str,
    pub algorithm: Algorithm,
}

/// Computes the `at_hash` of an access token for an ID token signed with `alg`.
///
/// The digest is SHA-384 or SHA-512 for the 384/512-bit algorithms and
/// SHA-512/256 otherwise; the left half is base64url encoded without padding.
pub fn at_hash(access_token: &str, alg: Algorithm) -> String {
    use Algorithm::*;
    let digest = match alg {
        ES384 | RS384 | PS384 => Sha384::digest(access_token.as_bytes()).to_vec(),
        RS512 | PS512 => Sha512::digest(access_token.as_bytes()).to_vec(),
        _ => Sha512_256::digest(access_token.as_bytes()).to_vec(),
    };
    URL_SAFE_NO_PAD.encode(&digest[..digest.len() / 2])
}

/// Validates the claims of a verified ID token, stopping at the first failure.
pub fn validate_claims(
    decoded: &DecodedToken,
    expected: &ClaimExpectations<'_>,
    access: Option<AccessTokenBinding<'_>>,
) -> Result<(), IdentityError> {
    validate_claims_at(decoded, expected, access, chrono::Utc::now().timestamp())
}

/// [`validate_claims`] against an explicit clock (Unix seconds).
pub fn validate_claims_at(
    decoded: &DecodedToken,
    expected: &ClaimExpectations<'_>,
    access: Option<AccessTokenBinding<'_>>,
    now: i64,
) -> Result<(), IdentityError> {
    if decoded.nonce.as_deref() != Some(expected.nonce) {
        return Err(IdentityError::NonceMismatch);
    }

    if decoded.issuer != expected.issuer {
        return Err(IdentityError::IssuerMismatch {
            expected: expected.issuer.to_string(),
            actual: decoded.issuer.clone(),
        });
    }

    if !decoded.audience.iter().any(|aud| aud == expected.audience) {
        return Err(IdentityError::AudienceMismatch(expected.audience.to_string()));
    }

    if let Some(azp) = &decoded.authorized_party {
        if azp != expected.audience {
            return Err(IdentityError::AuthorizedPartyMismatch);
        }
    }

    if decoded.is_expired_at(now, expected.leeway) {
        return Err(IdentityError::TokenExpired);
    }

    if let (Some(binding), Some(declared)) = (access, decoded.at_hash.as_deref()) {
        if at_hash(binding.token, binding.algorithm) != declared {
            return Err(IdentityError::AccessTokenHashMismatch);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_700_000_000;
    const ACCESS: &str = "access-token-value";

    fn expected() -> ClaimExpectations<'static> {
        ClaimExpectations {
            issuer: "id.example.com",
            audience: "client-1",
            nonce: "nonce-1",
            leeway: Duration::from_secs(10),
        }
    }

    fn valid_token() -> DecodedToken {
        DecodedToken {
            issuer: "id.example.com".to_string(),
            subject: "user-1".to_string(),
            audience: vec!["client-1".to_string(), "api".to_string()],
            expires_at: Some(NOW + 3600),
            nonce: Some("nonce-1".to_string()),
            authorized_party: Some("client-1".to_string()),
            at_hash: Some(at_hash(ACCESS, Algorithm::RS256)),
            ..Default::default()
        }
    }

    fn check(token: &DecodedToken, access: &str) -> Result<(), IdentityError> {
        let binding = AccessTokenBinding { token: access, algorithm: Algorithm::RS256 };
        validate_claims_at(token, &expected(), Some(binding), NOW)
    }

    #[test]
    fn valid_token_passes() {
        check(&valid_token(), ACCESS).unwrap();
    }

    #[test]
    fn each_flipped_claim_fails_with_its_own_error() {
        let mut token = valid_token();
        token.nonce = Some("replayed".to_string());
        assert!(matches!(check(&token, ACCESS), Err(IdentityError::NonceMismatch)));

        let mut token = valid_token();
        token.nonce = None;
        assert!(matches!(check(&token, ACCESS), Err(IdentityError::NonceMismatch)));

        let mut token = valid_token();
        token.issuer = "evil.example.com".to_string();
        assert!(matches!(check(&token, ACCESS), Err(IdentityError::IssuerMismatch { .. })));

        let mut token = valid_token();
        token.audience = vec!["someone-else".to_string()];
        assert!(matches!(check(&token, ACCESS), Err(IdentityError::AudienceMismatch(_))));

        let mut token = valid_token();
        token.authorized_party = Some("someone-else".to_string());
        assert!(matches!(check(&token, ACCESS), Err(IdentityError::AuthorizedPartyMismatch)));

        let mut token = valid_token();
        token.expires_at = Some(NOW - 1);
        assert!(matches!(check(&token, ACCESS), Err(IdentityError::TokenExpired)));

        assert!(matches!(check(&valid_token(), "tampered"), Err(IdentityError::AccessTokenHashMismatch)));
    }

    #[test]
    fn checks_short_circuit_in_order() {
        let mut token = valid_token();
        token.issuer = "evil.example.com".to_string();
        token.expires_at = Some(NOW - 3600);
        token.nonce = None;
        assert!(matches!(check(&token, "tampered"), Err(IdentityError::NonceMismatch)));
    }

    #[test]
    fn absent_azp_and_at_hash_are_not_required() {
        let mut token = valid_token();
        token.authorized_party = None;
        token.at_hash = None;
        check(&token, "anything").unwrap();
        validate_claims_at(&token, &expected(), None, NOW).unwrap();
    }

    #[test]
    fn expiry_uses_leeway() {
        let mut token = valid_token();
        token.expires_at = Some(NOW + 9);
        assert!(matches!(check(&token, ACCESS), Err(IdentityError::TokenExpired)));
        token.expires_at = Some(NOW + 11);
        check(&token, ACCESS).unwrap();
    }

    #[test]
    fn id_token_without_expiry_is_rejected() {
        let mut token = valid_token();
        token.expires_at = None;
        assert!(matches!(check(&token, ACCESS), Err(IdentityError::TokenExpired)));

        token.expires_at = Some(0);
        assert!(matches!(check(&token, ACCESS), Err(IdentityError::TokenExpired)));
    }

    #[test]
    fn at_hash_digest_follows_algorithm() {
        let default = at_hash(ACCESS, Algorithm::RS256);
        let sha384 = at_hash(ACCESS, Algorithm::ES384);
        let sha512 = at_hash(ACCESS, Algorithm::RS512);

        assert_eq!(URL_SAFE_NO_PAD.decode(&default).unwrap().len(), 16);
        assert_eq!(URL_SAFE_NO_PAD.decode(&sha384).unwrap().len(), 24);
        assert_eq!(URL_SAFE_NO_PAD.decode(&sha512).unwrap().len(), 32);
        assert_eq!(at_hash(ACCESS, Algorithm::PS384), sha384);

        let full = Sha512_256::digest(ACCESS.as_bytes());
        assert_eq!(default, URL_SAFE_NO_PAD.encode(&full[..16]));
    }
}
