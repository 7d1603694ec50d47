//! Identity-token verification.
//!
//! Tokens are issued by the account service as HS256 JWTs carrying the
//! user's id and role. This server only verifies them.

use async_trait::async_trait;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

/// The identity carried by a verified token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
    pub role: String,
    pub avatar_key: Option<String>,
}

/// Why a token was not accepted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("no token provided")]
    Missing,

    #[error("token rejected: {0}")]
    Invalid(String),

    #[error("role {0:?} may not occupy a space")]
    RoleNotPermitted(String),
}

/// Verifies identity tokens.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<Identity, AuthError>;
}

/// Claims layout used by the account service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Claims {
    pub user_id: String,
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<u64>,
}

/// HS256 verifier sharing a secret with the account service.
///
/// `exp` is enforced when present; the account service does not always set it.
pub struct JwtTokenVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl JwtTokenVerifier {
    pub fn new(secret: &[u8]) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.required_spec_claims = HashSet::new();
        validation.validate_exp = true;

        Self {
            key: DecodingKey::from_secret(secret),
            validation,
        }
    }
}

#[async_trait]
impl TokenVerifier for JwtTokenVerifier {
    async fn verify(&self, token: &str) -> Result<Identity, AuthError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(AuthError::Missing);
        }

        let data = decode::<Claims>(token, &self.key, &self.validation)
            .map_err(|e| AuthError::Invalid(e.to_string()))?;
        let claims = data.claims;

        if claims.user_id.is_empty() {
            return Err(AuthError::Invalid("empty userId claim".to_string()));
        }

        Ok(Identity {
            user_id: claims.user_id,
            role: claims.role,
            avatar_key: claims.avatar_key,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    const SECRET: &[u8] = b"test-secret";

    fn sign(claims: &Claims, secret: &[u8]) -> String {
        encode(&Header::default(), claims, &EncodingKey::from_secret(secret)).unwrap()
    }

    fn claims(user_id: &str, role: &str) -> Claims {
        Claims {
            user_id: user_id.to_string(),
            role: role.to_string(),
            avatar_key: None,
            exp: None,
        }
    }

    #[tokio::test]
    async fn test_valid_token_without_expiry() {
        let verifier = JwtTokenVerifier::new(SECRET);
        let token = sign(&claims("user-1", "User"), SECRET);

        let identity = verifier.verify(&token).await.unwrap();
        assert_eq!(identity.user_id, "user-1");
        assert_eq!(identity.role, "User");
        assert_eq!(identity.avatar_key, None);
    }

    #[tokio::test]
    async fn test_avatar_key_claim() {
        let verifier = JwtTokenVerifier::new(SECRET);
        let mut c = claims("user-2", "Admin");
        c.avatar_key = Some("astronaut".to_string());

        let identity = verifier.verify(&sign(&c, SECRET)).await.unwrap();
        assert_eq!(identity.avatar_key.as_deref(), Some("astronaut"));
    }

    #[tokio::test]
    async fn test_wrong_secret_rejected() {
        let verifier = JwtTokenVerifier::new(SECRET);
        let token = sign(&claims("user-1", "User"), b"other-secret");

        assert!(matches!(verifier.verify(&token).await, Err(AuthError::Invalid(_))));
    }

    #[tokio::test]
    async fn test_expired_token_rejected() {
        let verifier = JwtTokenVerifier::new(SECRET);
        let mut c = claims("user-1", "User");
        c.exp = Some(chrono::Utc::now().timestamp() as u64 - 3600);

        assert!(matches!(
            verifier.verify(&sign(&c, SECRET)).await,
            Err(AuthError::Invalid(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_and_garbage_tokens() {
        let verifier = JwtTokenVerifier::new(SECRET);
        assert_eq!(verifier.verify("").await, Err(AuthError::Missing));
        assert_eq!(verifier.verify("   ").await, Err(AuthError::Missing));
        assert!(matches!(verifier.verify("not.a.jwt").await, Err(AuthError::Invalid(_))));
    }
}
