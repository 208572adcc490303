//! Handshake bearer-token verification.

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use crate::error::GatewayError;

/// Turns a bearer credential into the principal (user id) it was issued to.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<String, GatewayError>;
}

/// Claims carried by tokens issued by the account service.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// The user id. Older tokens carry it as `sub`.
    #[serde(alias = "sub")]
    pub id: String,
    pub exp: u64,
}

/// Verifies HS256-signed JWTs against a shared secret.
pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    pub fn new(secret: &str) -> Self {
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }
}

#[async_trait]
impl TokenVerifier for JwtVerifier {
    async fn verify(&self, token: &str) -> Result<String, GatewayError> {
        let data = jsonwebtoken::decode::<Claims>(token, &self.key, &self.validation).map_err(|e| {
            tracing::debug!(error = %e, "token verification failed");
            GatewayError::AuthRejected("Invalid token".to_string())
        })?;

        if data.claims.id.is_empty() {
            return Err(GatewayError::AuthRejected("Invalid token".to_string()));
        }

        Ok(data.claims.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{EncodingKey, Header};

    const SECRET: &str = "test-secret";

    fn mint(secret: &str, id: &str, exp_offset_secs: i64) -> String {
        let exp = (chrono::Utc::now().timestamp() + exp_offset_secs) as u64;
        let claims = Claims {
            id: id.to_string(),
            exp,
        };
        jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn valid_token_yields_principal() {
        let verifier = JwtVerifier::new(SECRET);
        let token = mint(SECRET, "usr_a", 300);
        assert_eq!(verifier.verify(&token).await.unwrap(), "usr_a");
    }

    #[tokio::test]
    async fn wrong_secret_is_rejected() {
        let verifier = JwtVerifier::new(SECRET);
        let token = mint("other-secret", "usr_a", 300);
        assert!(matches!(
            verifier.verify(&token).await,
            Err(GatewayError::AuthRejected(_))
        ));
    }

    #[tokio::test]
    async fn expired_token_is_rejected() {
        let verifier = JwtVerifier::new(SECRET);
        let token = mint(SECRET, "usr_a", -600);
        assert!(verifier.verify(&token).await.is_err());
    }

    #[tokio::test]
    async fn empty_principal_is_rejected() {
        let verifier = JwtVerifier::new(SECRET);
        let token = mint(SECRET, "", 300);
        assert!(verifier.verify(&token).await.is_err());
    }

    #[tokio::test]
    async fn garbage_is_rejected() {
        let verifier = JwtVerifier::new(SECRET);
        assert!(verifier.verify("not-a-jwt").await.is_err());
    }
}
