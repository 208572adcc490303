//! Firebase Cloud Messaging (HTTP v1) push dispatcher.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::PushError;

use super::{DeliveryOutcome, PushDispatcher, PushNotification};

const FCM_API_BASE: &str = "https://fcm.googleapis.com";
const MESSAGING_SCOPE: &str = "https://www.googleapis.com/auth/firebase.messaging";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Lifetime requested for the signed assertion (the maximum Google accepts).
const ASSERTION_TTL_SECS: i64 = 3600;

/// Access tokens are refreshed this long before they actually expire.
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// The subset of a Google service-account key file needed for FCM.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub project_id: String,
    pub client_email: String,
    pub private_key: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

struct CachedToken {
    value: String,
    expires_at: Instant,
}

impl CachedToken {
    fn is_fresh(&self, now: Instant) -> bool {
        now + TOKEN_REFRESH_MARGIN < self.expires_at
    }
}

#[derive(Debug, Serialize)]
struct SendRequest<'a> {
    message: SendMessage<'a>,
}

#[derive(Debug, Serialize)]
struct SendMessage<'a> {
    token: &'a str,
    notification: SendNotification<'a>,
    data: &'a BTreeMap<String, String>,
}

#[derive(Debug, Serialize)]
struct SendNotification<'a> {
    title: &'a str,
    body: &'a str,
}

fn send_request<'a>(device_token: &'a str, notification: &'a PushNotification) -> SendRequest<'a> {
    SendRequest {
        message: SendMessage {
            token: device_token,
            notification: SendNotification {
                title: &notification.title,
                body: &notification.body,
            },
            data: &notification.data,
        },
    }
}

/// Sends notifications through FCM, one request per device token.
///
/// OAuth2 access tokens are minted from the service account and cached until
/// shortly before expiry.
#[derive(Clone)]
pub struct FcmDispatcher {
    key: Arc<ServiceAccountKey>,
    signing_key: Arc<EncodingKey>,
    http: reqwest::Client,
    cache: Arc<RwLock<Option<CachedToken>>>,
}

impl FcmDispatcher {
    pub fn new(key: ServiceAccountKey) -> Result<Self, PushError> {
        let signing_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
            .map_err(|e| PushError::Credentials(e.to_string()))?;
        Ok(Self {
            key: Arc::new(key),
            signing_key: Arc::new(signing_key),
            http: reqwest::Client::new(),
            cache: Arc::new(RwLock::new(None)),
        })
    }

    /// Load a service-account JSON file.
    pub fn from_file(path: &Path) -> Result<Self, PushError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| PushError::Credentials(format!("{}: {e}", path.display())))?;
        let key: ServiceAccountKey =
            serde_json::from_str(&raw).map_err(|e| PushError::Credentials(e.to_string()))?;
        Self::new(key)
    }

    pub fn project_id(&self) -> &str {
        &self.key.project_id
    }

    async fn access_token(&self) -> Result<String, PushError> {
        {
            let cache = self.cache.read().await;
            if let Some(token) = cache.as_ref().filter(|t| t.is_fresh(Instant::now())) {
                return Ok(token.value.clone());
            }
        }

        let mut cache = self.cache.write().await;
        // Another task may have refreshed while we waited for the write lock.
        if let Some(token) = cache.as_ref().filter(|t| t.is_fresh(Instant::now())) {
            return Ok(token.value.clone());
        }

        let fetched = self.fetch_access_token().await?;
        let value = fetched.access_token.clone();
        *cache = Some(CachedToken {
            value: fetched.access_token,
            expires_at: Instant::now() + Duration::from_secs(fetched.expires_in),
        });
        Ok(value)
    }

    async fn fetch_access_token(&self) -> Result<TokenResponse, PushError> {
        let iat = chrono::Utc::now().timestamp();
        let claims = AssertionClaims {
            iss: &self.key.client_email,
            scope: MESSAGING_SCOPE,
            aud: &self.key.token_uri,
            iat,
            exp: iat + ASSERTION_TTL_SECS,
        };
        let assertion = jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &self.signing_key)
            .map_err(|e| PushError::Token(e.to_string()))?;

        tracing::debug!(token_uri = %self.key.token_uri, "requesting FCM access token");

        let resp = self
            .http
            .post(&self.key.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(PushError::Token(format!("{status}: {body}")));
        }

        resp.json::<TokenResponse>()
            .await
            .map_err(|e| PushError::Token(e.to_string()))
    }

    async fn send_one(
        &self,
        access_token: &str,
        device_token: &str,
        notification: &PushNotification,
    ) -> Result<(), PushError> {
        let url = format!(
            "{FCM_API_BASE}/v1/projects/{}/messages:send",
            self.key.project_id
        );

        let resp = self
            .http
            .post(&url)
            .bearer_auth(access_token)
            .json(&send_request(device_token, notification))
            .send()
            .await?;

        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        let body = resp.text().await.unwrap_or_default();
        Err(PushError::Api {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl PushDispatcher for FcmDispatcher {
    async fn deliver(
        &self,
        tokens: &[String],
        notification: &PushNotification,
    ) -> Result<Vec<DeliveryOutcome>, PushError> {
        let access_token = self.access_token().await?;

        let sends = tokens.iter().map(|device_token| {
            let access_token = access_token.as_str();
            async move {
                match self.send_one(access_token, device_token, notification).await {
                    Ok(()) => DeliveryOutcome::delivered(device_token),
                    Err(e) => DeliveryOutcome::failed(device_token, e.to_string()),
                }
            }
        });

        Ok(futures_util::future::join_all(sends).await)
    }
}
