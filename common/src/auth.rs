// Caller identity resolution and admin secret checks

use crate::errors::AuthError;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{instrument, warn};

/// Claims carried by identity tokens. `sub` is the owner id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityClaims {
    pub sub: String,
    pub exp: i64,
    pub iat: i64,
}

/// Turns the caller's bearer token into an owner id
pub trait IdentityResolver: Send + Sync {
    fn resolve(&self, token: &str) -> Result<String, AuthError>;
}

/// HS256 JWT identity tokens
#[derive(Clone)]
pub struct JwtIdentityResolver {
    encoding_key: Arc<EncodingKey>,
    decoding_key: Arc<DecodingKey>,
}

impl JwtIdentityResolver {
    #[instrument(skip(secret))]
    pub fn new(secret: &str) -> Self {
        Self {
            encoding_key: Arc::new(EncodingKey::from_secret(secret.as_bytes())),
            decoding_key: Arc::new(DecodingKey::from_secret(secret.as_bytes())),
        }
    }

    /// Issue a token for `owner_id`. Identity issuance belongs to another
    /// service; this exists for operators and tests.
    pub fn encode_token(&self, owner_id: &str, ttl: Duration) -> Result<String, AuthError> {
        let now = Utc::now();
        let claims = IdentityClaims {
            sub: owner_id.to_string(),
            exp: (now + ttl).timestamp(),
            iat: now.timestamp(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| AuthError::InvalidToken(format!("Failed to encode token: {}", e)))
    }

    #[instrument(skip(self, token))]
    pub fn decode_token(&self, token: &str) -> Result<IdentityClaims, AuthError> {
        let validation = Validation::new(Algorithm::HS256);

        let token_data =
            decode::<IdentityClaims>(token, &self.decoding_key, &validation).map_err(|e| {
                warn!(error = %e, "Failed to decode identity token");
                match e.kind() {
                    jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                    _ => AuthError::InvalidToken(format!("Token validation failed: {}", e)),
                }
            })?;

        Ok(token_data.claims)
    }
}

impl IdentityResolver for JwtIdentityResolver {
    fn resolve(&self, token: &str) -> Result<String, AuthError> {
        let claims = self.decode_token(token)?;
        if claims.sub.trim().is_empty() {
            return Err(AuthError::InvalidToken("empty subject".to_string()));
        }
        Ok(claims.sub)
    }
}

/// Shared secret guarding the admin purge. Comparison is on SHA-256
/// digests so its timing does not depend on where the inputs differ.
#[derive(Clone)]
pub struct AdminSecret {
    digest: [u8; 32],
}

impl AdminSecret {
    pub fn new(secret: &str) -> Self {
        Self {
            digest: Sha256::digest(secret.as_bytes()).into(),
        }
    }

    pub fn verify(&self, candidate: &str) -> Result<(), AuthError> {
        let candidate: [u8; 32] = Sha256::digest(candidate.as_bytes()).into();
        let diff = self
            .digest
            .iter()
            .zip(candidate.iter())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b));

        if diff == 0 {
            Ok(())
        } else {
            Err(AuthError::InvalidSecret)
        }
    }
}

impl std::fmt::Debug for AdminSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AdminSecret(..)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_round_trip_resolves_owner() {
        let resolver = JwtIdentityResolver::new("test-secret");
        let token = resolver.encode_token("owner-42", Duration::hours(1)).unwrap();
        assert_eq!(resolver.resolve(&token).unwrap(), "owner-42");
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let issuer = JwtIdentityResolver::new("secret-a");
        let verifier = JwtIdentityResolver::new("secret-b");
        let token = issuer.encode_token("owner-42", Duration::hours(1)).unwrap();
        assert!(matches!(verifier.resolve(&token), Err(AuthError::InvalidToken(_))));
    }

    #[test]
    fn test_expired_token_rejected() {
        let resolver = JwtIdentityResolver::new("test-secret");
        let token = resolver.encode_token("owner-42", Duration::hours(-2)).unwrap();
        assert!(matches!(resolver.resolve(&token), Err(AuthError::TokenExpired)));
    }

    #[test]
    fn test_garbage_token_rejected() {
        let resolver = JwtIdentityResolver::new("test-secret");
        assert!(resolver.resolve("not-a-jwt").is_err());
    }

    #[test]
    fn test_admin_secret() {
        let secret = AdminSecret::new("purge-me");
        assert!(secret.verify("purge-me").is_ok());
        assert!(matches!(secret.verify("purge-m"), Err(AuthError::InvalidSecret)));
        assert!(secret.verify("").is_err());
        assert_eq!(format!("{:?}", secret), "AdminSecret(..)");
    }
}
