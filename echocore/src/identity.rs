//! Identity records and the token decoder that produces them.
//!
//! Tokens are compact JWTs. Without a configured secret the decoder skips
//! signature verification, which mirrors a browser client that trusts its own
//! login endpoint. With a secret, HS256 signatures are verified before any
//! claim is read.

use chrono::Utc;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::token::Token;

/// Claim names checked, in order, for the identity id.
const ID_CLAIMS: [&str; 3] = ["_id", "id", "sub"];
/// Claim names checked, in order, for the display name.
const NAME_CLAIMS: [&str; 2] = ["name", "username"];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("malformed token: {0}")]
    Malformed(String),

    #[error("token algorithm is not accepted")]
    UnsupportedAlgorithm,

    #[error("token signature does not verify")]
    InvalidSignature,

    #[error("token is missing required claim: {0}")]
    MissingClaim(&'static str),

    #[error("token has expired")]
    Expired,

    #[error("failed to sign token: {0}")]
    Signing(String),
}

impl From<jsonwebtoken::errors::Error> for DecodeError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        match err.kind() {
            ErrorKind::InvalidSignature => DecodeError::InvalidSignature,
            ErrorKind::InvalidAlgorithm | ErrorKind::InvalidAlgorithmName => {
                DecodeError::UnsupportedAlgorithm
            }
            ErrorKind::ExpiredSignature => DecodeError::Expired,
            _ => DecodeError::Malformed(err.to_string()),
        }
    }
}

/// The decoded representation of an authenticated user.
///
/// Immutable once decoded; a new login produces a new value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    pub name: String,
    /// Every claim carried by the token, including `id` and `name`.
    pub claims: Map<String, Value>,
}

impl Identity {
    pub fn from_claims(claims: Map<String, Value>) -> Result<Self, DecodeError> {
        let id = ID_CLAIMS
            .iter()
            .find_map(|name| match claims.get(*name) {
                Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
                Some(Value::Number(n)) => Some(n.to_string()),
                _ => None,
            })
            .ok_or(DecodeError::MissingClaim("_id"))?;

        let name = NAME_CLAIMS
            .iter()
            .find_map(|name| claims.get(*name).and_then(Value::as_str))
            .unwrap_or_default()
            .to_string();

        Ok(Self { id, name, claims })
    }

    pub fn claim(&self, name: &str) -> Option<&Value> {
        self.claims.get(name)
    }

    /// Expiry as a unix timestamp, when the token carries a numeric `exp`.
    /// Fractional NumericDates are rounded.
    pub fn expires_at(&self) -> Option<i64> {
        self.claims
            .get("exp")
            .and_then(Value::as_f64)
            .filter(|exp| exp.is_finite())
            .map(|exp| exp.round() as i64)
    }
}

/// Decodes tokens into [`Identity`] values.
#[derive(Clone, Default)]
pub struct TokenDecoder {
    secret: Option<Vec<u8>>,
    leeway_secs: u64,
}

impl std::fmt::Debug for TokenDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenDecoder")
            .field("verifies_signature", &self.secret.is_some())
            .field("leeway_secs", &self.leeway_secs)
            .finish()
    }
}

impl TokenDecoder {
    /// A decoder that checks structure and expiry but not signatures.
    pub fn new() -> Self {
        Self::default()
    }

    /// A decoder that requires a valid HS256 signature under `secret`.
    pub fn with_hs256_secret(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: Some(secret.into()),
            leeway_secs: 0,
        }
    }

    /// Seconds of clock skew tolerated when checking `exp`.
    pub fn leeway(mut self, secs: u64) -> Self {
        self.leeway_secs = secs;
        self
    }

    pub fn verifies_signature(&self) -> bool {
        self.secret.is_some()
    }

    fn validation(&self) -> Validation {
        let mut validation = Validation::new(Algorithm::HS256);
        // Expiry is checked in `decode_at` against the caller's clock.
        validation.validate_exp = false;
        validation.required_spec_claims.clear();
        validation.validate_aud = false;
        if self.secret.is_none() {
            validation.insecure_disable_signature_validation();
        }
        validation
    }

    pub fn decode(&self, token: &Token) -> Result<Identity, DecodeError> {
        self.decode_at(token, Utc::now().timestamp())
    }

    /// Decode against an explicit clock, in unix seconds.
    pub fn decode_at(&self, token: &Token, now: i64) -> Result<Identity, DecodeError> {
        let key = DecodingKey::from_secret(self.secret.as_deref().unwrap_or_default());
        let data =
            jsonwebtoken::decode::<Map<String, Value>>(token.as_str(), &key, &self.validation())?;
        let identity = Identity::from_claims(data.claims)?;

        let leeway = i64::try_from(self.leeway_secs).unwrap_or(i64::MAX);
        if let Some(exp) = identity.expires_at()
            && exp.saturating_add(leeway) < now
        {
            return Err(DecodeError::Expired);
        }
        Ok(identity)
    }

    /// Serialize `claims` into a token this decoder accepts.
    ///
    /// Signs with HS256 under the configured secret, or under an empty key
    /// when there is none. Intended for development relays and tests.
    pub fn issue(&self, claims: &Map<String, Value>) -> Result<Token, DecodeError> {
        let key = EncodingKey::from_secret(self.secret.as_deref().unwrap_or_default());
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), claims, &key)
            .map(Token::new)
            .map_err(|e| DecodeError::Signing(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn claims(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    #[test]
    fn decodes_id_and_name_from_claims() {
        let decoder = TokenDecoder::new();
        let token = decoder
            .issue(&claims(json!({ "_id": "u-42", "name": "Ada", "role": "admin" })))
            .unwrap();

        let identity = decoder.decode(&token).unwrap();
        assert_eq!(identity.id, "u-42");
        assert_eq!(identity.name, "Ada");
        assert_eq!(identity.claim("role"), Some(&json!("admin")));
    }

    #[test]
    fn id_claim_falls_back_to_id_then_sub() {
        let decoder = TokenDecoder::new();

        let token = decoder.issue(&claims(json!({ "id": 7 }))).unwrap();
        assert_eq!(decoder.decode(&token).unwrap().id, "7");

        let token = decoder
            .issue(&claims(json!({ "sub": "subject", "username": "sam" })))
            .unwrap();
        let identity = decoder.decode(&token).unwrap();
        assert_eq!(identity.id, "subject");
        assert_eq!(identity.name, "sam");
    }

    #[test]
    fn structurally_broken_tokens_are_malformed() {
        let decoder = TokenDecoder::new();
        for raw in ["", "only.two", "%%%.%%%.sig"] {
            assert!(
                matches!(decoder.decode(&Token::from(raw)), Err(DecodeError::Malformed(_))),
                "{raw:?} should be malformed"
            );
        }
    }

    #[test]
    fn claims_must_be_an_object() {
        let token = jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            &json!([1, 2, 3]),
            &EncodingKey::from_secret(b""),
        )
        .unwrap();
        assert!(matches!(
            TokenDecoder::new().decode(&Token::new(token)),
            Err(DecodeError::Malformed(_))
        ));
    }

    #[test]
    fn missing_id_claim_is_rejected() {
        let decoder = TokenDecoder::new();
        let token = decoder.issue(&claims(json!({ "name": "nobody" }))).unwrap();
        assert_eq!(decoder.decode(&token), Err(DecodeError::MissingClaim("_id")));
    }

    #[test]
    fn hs256_signature_is_verified() {
        let decoder = TokenDecoder::with_hs256_secret("s3cret");
        let token = decoder.issue(&claims(json!({ "_id": "a" }))).unwrap();
        assert_eq!(decoder.decode(&token).unwrap().id, "a");

        let other = TokenDecoder::with_hs256_secret("different");
        assert_eq!(other.decode(&token), Err(DecodeError::InvalidSignature));

        // Swap in claims from another token while keeping the original signature.
        let mallory = TokenDecoder::new()
            .issue(&claims(json!({ "_id": "mallory" })))
            .unwrap();
        let parts: Vec<&str> = token.as_str().split('.').collect();
        let forged_claims = mallory.as_str().split('.').nth(1).unwrap();
        let forged = Token::new(format!("{}.{}.{}", parts[0], forged_claims, parts[2]));
        assert_eq!(decoder.decode(&forged), Err(DecodeError::InvalidSignature));
    }

    #[test]
    fn development_token_rejected_when_secret_configured() {
        let development = TokenDecoder::new()
            .issue(&claims(json!({ "_id": "a" })))
            .unwrap();
        let strict = TokenDecoder::with_hs256_secret("s3cret");
        assert_eq!(strict.decode(&development), Err(DecodeError::InvalidSignature));
    }

    #[test]
    fn foreign_algorithm_rejected_when_secret_configured() {
        let token = jsonwebtoken::encode(
            &Header::new(Algorithm::HS512),
            &claims(json!({ "_id": "a" })),
            &EncodingKey::from_secret(b"s3cret"),
        )
        .unwrap();
        let strict = TokenDecoder::with_hs256_secret("s3cret");
        assert_eq!(
            strict.decode(&Token::new(token)),
            Err(DecodeError::UnsupportedAlgorithm)
        );
    }

    #[test]
    fn expiry_respects_leeway() {
        let decoder = TokenDecoder::new();
        let token = decoder
            .issue(&claims(json!({ "_id": "a", "exp": 1_000 })))
            .unwrap();

        assert!(decoder.decode_at(&token, 1_000).is_ok());
        assert_eq!(decoder.decode_at(&token, 1_001), Err(DecodeError::Expired));
        assert!(decoder.clone().leeway(30).decode_at(&token, 1_010).is_ok());
        assert_eq!(decoder.decode(&token), Err(DecodeError::Expired));
    }

    #[test]
    fn fractional_expiry_in_the_past_is_rejected() {
        let decoder = TokenDecoder::with_hs256_secret("s");
        let token = decoder
            .issue(&claims(json!({ "_id": "alice", "exp": 1000.5 })))
            .unwrap();

        assert_eq!(decoder.decode_at(&token, 2_000_000_000), Err(DecodeError::Expired));
        assert_eq!(decoder.decode(&token), Err(DecodeError::Expired));
        assert_eq!(
            TokenDecoder::new().decode_at(&token, 2_000_000_000),
            Err(DecodeError::Expired)
        );
    }

    #[test]
    fn future_expiry_is_accepted() {
        let decoder = TokenDecoder::new();
        let exp = Utc::now().timestamp() + 3_600;
        let token = decoder
            .issue(&claims(json!({ "_id": "a", "exp": exp as f64 + 0.25 })))
            .unwrap();
        assert_eq!(decoder.decode(&token).unwrap().expires_at(), Some(exp));
    }
}
