// src/token/verify.rs

use crate::discovery::ProviderDirectory;
use crate::error::IdentityError;
use jsonwebtoken::{crypto, Header};
use serde::Deserialize;
use tracing::{debug, instrument};

/// A single signature over a payload, whatever serialization carried it.
struct Envelope {
    protected: String,
    payload: String,
    signature: String,
}

#[derive(Deserialize)]
struct JsonSignature {
    protected: String,
    signature: String,
}

/// JWS JSON serialization. The flattened form carries `protected`/`signature`
/// at the top level, the general form carries a `signatures` array.
#[derive(Deserialize)]
struct JsonEnvelope {
    payload: String,
    #[serde(default)]
    protected: Option<String>,
    #[serde(default)]
    signature: Option<String>,
    #[serde(default)]
    signatures: Option<Vec<JsonSignature>>,
}

fn parse_json(token: &str) -> Result<JsonEnvelope, IdentityError> {
    serde_json::from_str(token)
        .map_err(|e| IdentityError::MalformedToken(format!("invalid JWS JSON serialization: {e}")))
}

fn compact_parts(token: &str) -> Result<[&str; 3], IdentityError> {
    let parts: Vec<&str> = token.split('.').collect();
    match parts[..] {
        [protected, payload, signature] => Ok([protected, payload, signature]),
        _ => Err(IdentityError::MalformedToken(format!(
            "compact JWS format must have three parts, found {}",
            parts.len()
        ))),
    }
}

/// Returns the base64url payload of a compact or JSON serialized token.
/// Signatures are neither counted nor checked.
pub(crate) fn payload_segment(token: &str) -> Result<String, IdentityError> {
    let token = token.trim();
    if token.starts_with('{') {
        return Ok(parse_json(token)?.payload);
    }
    Ok(compact_parts(token)?[1].to_string())
}

fn parse_envelope(token: &str) -> Result<Envelope, IdentityError> {
    let token = token.trim();
    if token.starts_with('{') {
        let json = parse_json(token)?;

        let mut signatures = json.signatures.unwrap_or_default();
        if let (Some(protected), Some(signature)) = (json.protected, json.signature) {
            signatures.push(JsonSignature { protected, signature });
        }
        if signatures.len() != 1 {
            return Err(IdentityError::AmbiguousSignature(signatures.len()));
        }
        let JsonSignature { protected, signature } = signatures.remove(0);
        return Ok(Envelope { protected, payload: json.payload, signature });
    }

    let [protected, payload, signature] = compact_parts(token)?;
    if signature.is_empty() {
        return Err(IdentityError::AmbiguousSignature(0));
    }
    Ok(Envelope {
        protected: protected.to_string(),
        payload: payload.to_string(),
        signature: signature.to_string(),
    })
}

fn decode_protected_header(protected: &str) -> Result<Header, IdentityError> {
    let bytes = base64_url::decode(protected)
        .map_err(|e| IdentityError::MalformedToken(format!("failed decoding token header: {e}")))?;
    serde_json::from_slice(&bytes).map_err(|e| IdentityError::MalformedToken(format!("invalid token header: {e}")))
}

/// Verifies the signature of a token against the provider's cached signing keys.
///
/// Accepts the compact serialization and the JSON general/flattened
/// serializations, as long as exactly one signature is present. The key is
/// resolved by the header `kid`; the header `alg` must be usable with that key
/// and advertised by the provider before any cryptography is attempted.
#[instrument(skip_all, err)]
pub async fn verify(directory: &ProviderDirectory, token: &str) -> Result<Header, IdentityError> {
    let envelope = parse_envelope(token)?;
    let header = decode_protected_header(&envelope.protected)?;
    let kid = header.kid.as_deref().ok_or(IdentityError::MissingKeyId)?;

    let key = directory.lookup_key(kid).await?;
    if !key.permits(header.alg) {
        return Err(IdentityError::UnsupportedAlgorithm(header.alg));
    }

    let provider = directory.load()?;
    let alg_name = format!("{:?}", header.alg);
    if !provider.id_token_signing_algs.is_empty() && !provider.id_token_signing_algs.contains(&alg_name) {
        return Err(IdentityError::UnsupportedAlgorithm(header.alg));
    }

    let message = format!("{}.{}", envelope.protected, envelope.payload);
    match crypto::verify(&envelope.signature, message.as_bytes(), key.decoding_key(), header.alg) {
        Ok(true) => {
            debug!("Verified token signature with kid: {}", kid);
            Ok(header)
        }
        _ => Err(IdentityError::SignatureInvalid),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IdentityConfig;
    use crate::discovery::model::{ProviderConfig, SigningKeySet};
    use crate::store::{write_json, MemoryStore, PROVIDER_CONFIG_KEY, SIGNING_KEYS_KEY};
    use jsonwebtoken::{encode, Algorithm, EncodingKey};
    use std::sync::Arc;

    const JWKS: &str = include_str!("../../tests/fixtures/jwks.json");
    const RSA_PEM: &[u8] = include_bytes!("../../tests/fixtures/rsa_private_key.pem");
    const EC_PEM: &[u8] = include_bytes!("../../tests/fixtures/ec_p256_private_key.pem");

    fn directory(algs: &[&str]) -> ProviderDirectory {
        let store = Arc::new(MemoryStore::new());
        let config = ProviderConfig {
            issuer: "https://id.example.com".to_string(),
            authorization_endpoint: String::new(),
            token_endpoint: "https://id.example.com/token".to_string(),
            userinfo_endpoint: String::new(),
            revocation_endpoint: String::new(),
            jwks_uri: "https://id.example.com/jwks".to_string(),
            response_types: vec![],
            subject_types: vec![],
            id_token_signing_algs: algs.iter().map(|a| a.to_string()).collect(),
            scopes: vec![],
            token_endpoint_auth_methods: vec![],
            claims: vec![],
        };
        let keys = SigningKeySet::from_raw(serde_json::from_str(JWKS).unwrap()).unwrap();
        write_json(store.as_ref(), PROVIDER_CONFIG_KEY, &config).unwrap();
        write_json(store.as_ref(), SIGNING_KEYS_KEY, &keys).unwrap();
        ProviderDirectory::new(&IdentityConfig::default(), reqwest::Client::new(), store)
    }

    fn sign(alg: Algorithm, kid: &str, key: &EncodingKey) -> String {
        let mut header = Header::new(alg);
        header.kid = Some(kid.to_string());
        encode(&header, &serde_json::json!({"sub": "user-1"}), key).unwrap()
    }

    fn rsa_token() -> String {
        sign(Algorithm::RS256, "rsa-test", &EncodingKey::from_rsa_pem(RSA_PEM).unwrap())
    }

    #[tokio::test]
    async fn accepts_rsa_and_ec_signatures() {
        let directory = directory(&[]);
        let header = verify(&directory, &rsa_token()).await.unwrap();
        assert_eq!(header.alg, Algorithm::RS256);

        let ec = sign(Algorithm::ES256, "ec-test", &EncodingKey::from_ec_pem(EC_PEM).unwrap());
        assert_eq!(verify(&directory, &ec).await.unwrap().alg, Algorithm::ES256);
    }

    #[tokio::test]
    async fn tampered_payload_fails_verification() {
        let token = rsa_token();
        let parts: Vec<&str> = token.split('.').collect();
        let forged = format!("{}.{}.{}", parts[0], base64_url::encode(r#"{"sub":"admin"}"#), parts[2]);
        let result = verify(&directory(&[]), &forged).await;
        assert!(matches!(result, Err(IdentityError::SignatureInvalid)));
    }

    #[tokio::test]
    async fn hmac_with_public_key_material_is_refused() {
        let forged = sign(Algorithm::HS256, "rsa-test", &EncodingKey::from_secret(b"public key bytes"));
        let result = verify(&directory(&[]), &forged).await;
        assert!(matches!(result, Err(IdentityError::UnsupportedAlgorithm(Algorithm::HS256))));
    }

    #[tokio::test]
    async fn algorithm_must_be_advertised() {
        let result = verify(&directory(&["ES256"]), &rsa_token()).await;
        assert!(matches!(result, Err(IdentityError::UnsupportedAlgorithm(Algorithm::RS256))));
    }

    #[tokio::test]
    async fn unknown_or_missing_kid_is_rejected() {
        let key = EncodingKey::from_rsa_pem(RSA_PEM).unwrap();
        let unknown = sign(Algorithm::RS256, "rotated-away", &key);
        assert!(matches!(verify(&directory(&[]), &unknown).await, Err(IdentityError::KeyNotFound(_))));

        let anonymous = encode(&Header::new(Algorithm::RS256), &serde_json::json!({}), &key).unwrap();
        assert!(matches!(verify(&directory(&[]), &anonymous).await, Err(IdentityError::MissingKeyId)));
    }

    #[tokio::test]
    async fn signature_count_must_be_exactly_one() {
        let token = rsa_token();
        let parts: Vec<&str> = token.split('.').collect();
        let directory = directory(&[]);

        let unsigned = format!("{}.{}.", parts[0], parts[1]);
        assert!(matches!(verify(&directory, &unsigned).await, Err(IdentityError::AmbiguousSignature(0))));

        let signature = serde_json::json!({"protected": parts[0], "signature": parts[2]});
        let general = serde_json::json!({"payload": parts[1], "signatures": [signature.clone(), signature]});
        let result = verify(&directory, &general.to_string()).await;
        assert!(matches!(result, Err(IdentityError::AmbiguousSignature(2))));

        let flattened = serde_json::json!({"payload": parts[1], "protected": parts[0], "signature": parts[2]});
        assert!(verify(&directory, &flattened.to_string()).await.is_ok());
    }
}
