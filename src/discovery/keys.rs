// src/discovery/keys.rs

use crate::error::IdentityError;
use base64::engine::{general_purpose::URL_SAFE_NO_PAD, Engine};
use jsonwebtoken::jwk::{AlgorithmParameters, EllipticCurve, Jwk};
use jsonwebtoken::{Algorithm, DecodingKey};
use rsa::{BigUint, RsaPublicKey};
use std::str::FromStr;

/// Smallest RSA modulus accepted from a provider.
const MIN_RSA_MODULUS_BITS: usize = 2048;

/// The kind of public key, which fixes the algorithms it may verify.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyFamily {
    Rsa,
    EcP256,
    EcP384,
    Ed25519,
}

impl KeyFamily {
    /// Whether a signature made with `alg` can be checked by a key of this family.
    pub fn accepts(self, alg: Algorithm) -> bool {
        use Algorithm::*;
        match self {
            KeyFamily::Rsa => matches!(alg, RS256 | RS384 | RS512 | PS256 | PS384 | PS512),
            KeyFamily::EcP256 => alg == ES256,
            KeyFamily::EcP384 => alg == ES384,
            KeyFamily::Ed25519 => alg == EdDSA,
        }
    }
}

/// A provider key that passed structural validation, ready to verify signatures.
#[derive(Clone)]
pub struct VerificationKey {
    kid: String,
    family: KeyFamily,
    algorithm: Option<Algorithm>,
    key: DecodingKey,
}

impl VerificationKey {
    pub fn kid(&self) -> &str {
        &self.kid
    }

    pub fn family(&self) -> KeyFamily {
        self.family
    }

    /// The algorithm the provider pinned this key to, if any.
    pub fn algorithm(&self) -> Option<Algorithm> {
        self.algorithm
    }

    pub(crate) fn decoding_key(&self) -> &DecodingKey {
        &self.key
    }

    /// Whether this key may verify a token whose header declares `alg`.
    pub fn permits(&self, alg: Algorithm) -> bool {
        self.family.accepts(alg) && self.algorithm.map_or(true, |pinned| pinned == alg)
    }
}

fn invalid(kid: &str, reason: impl Into<String>) -> IdentityError {
    IdentityError::InvalidSigningKey {
        kid: kid.to_string(),
        reason: reason.into(),
    }
}

fn component(kid: &str, name: &str, value: &str) -> Result<Vec<u8>, IdentityError> {
    URL_SAFE_NO_PAD
        .decode(value.trim_end_matches('='))
        .map_err(|e| invalid(kid, format!("'{name}' is not base64url: {e}")))
}

fn sec1_point(kid: &str, x: &[u8], y: &[u8], field_len: usize) -> Result<Vec<u8>, IdentityError> {
    if x.len() != field_len || y.len() != field_len {
        return Err(invalid(kid, format!("coordinates must be {field_len} bytes long")));
    }
    let mut point = Vec::with_capacity(1 + 2 * field_len);
    point.push(0x04);
    point.extend_from_slice(x);
    point.extend_from_slice(y);
    Ok(point)
}

/// Validates a published JWK and turns it into a `VerificationKey`.
///
/// RSA keys must form a usable public key of at least 2048 bits, EC keys must be
/// points on P-256 or P-384, and OKP keys must be Ed25519. Symmetric keys are
/// never admitted.
pub fn admit(jwk: &Jwk) -> Result<VerificationKey, IdentityError> {
    let kid = jwk
        .common
        .key_id
        .clone()
        .filter(|kid| !kid.is_empty())
        .ok_or_else(|| invalid("", "key has no 'kid'"))?;

    let family = match &jwk.algorithm {
        AlgorithmParameters::RSA(params) => {
            let n = component(&kid, "n", &params.n)?;
            let e = component(&kid, "e", &params.e)?;
            let modulus = BigUint::from_bytes_be(&n);
            if modulus.bits() < MIN_RSA_MODULUS_BITS {
                return Err(invalid(&kid, format!("RSA modulus is shorter than {MIN_RSA_MODULUS_BITS} bits")));
            }
            RsaPublicKey::new(modulus, BigUint::from_bytes_be(&e)).map_err(|e| invalid(&kid, e.to_string()))?;
            KeyFamily::Rsa
        }
        AlgorithmParameters::EllipticCurve(params) => {
            let x = component(&kid, "x", &params.x)?;
            let y = component(&kid, "y", &params.y)?;
            match params.curve {
                EllipticCurve::P256 => {
                    let point = sec1_point(&kid, &x, &y, 32)?;
                    p256::PublicKey::from_sec1_bytes(&point).map_err(|_| invalid(&kid, "point is not on P-256"))?;
                    KeyFamily::EcP256
                }
                EllipticCurve::P384 => {
                    let point = sec1_point(&kid, &x, &y, 48)?;
                    p384::PublicKey::from_sec1_bytes(&point).map_err(|_| invalid(&kid, "point is not on P-384"))?;
                    KeyFamily::EcP384
                }
                ref other => return Err(invalid(&kid, format!("unsupported curve {other:?}"))),
            }
        }
        AlgorithmParameters::OctetKeyPair(params) => {
            if !matches!(params.curve, EllipticCurve::Ed25519) {
                return Err(invalid(&kid, format!("unsupported curve {:?}", params.curve)));
            }
            if component(&kid, "x", &params.x)?.len() != 32 {
                return Err(invalid(&kid, "Ed25519 public key must be 32 bytes long"));
            }
            KeyFamily::Ed25519
        }
        AlgorithmParameters::OctetKey(_) => {
            return Err(invalid(&kid, "symmetric keys cannot be published in a key set"));
        }
    };

    let algorithm = match &jwk.common.key_algorithm {
        Some(declared) => {
            let alg = Algorithm::from_str(&format!("{declared:?}"))
                .map_err(|_| invalid(&kid, format!("{declared:?} is not a signing algorithm")))?;
            if !family.accepts(alg) {
                return Err(invalid(&kid, format!("{alg:?} cannot be used with a {family:?} key")));
            }
            Some(alg)
        }
        None => None,
    };

    let key = DecodingKey::from_jwk(jwk).map_err(|e| invalid(&kid, e.to_string()))?;

    Ok(VerificationKey { kid, family, algorithm, key })
}
