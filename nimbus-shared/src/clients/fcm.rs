use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::clients::push::{MulticastResponse, PushClient, PushMessage, PushResult};
use crate::errors::{AppError, ErrorCode};

const FCM_SCOPE: &str = "https://www.googleapis.com/auth/firebase.messaging";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// FCM HTTP v1 client authenticated with a Google service account.
///
/// The OAuth session lives on the client instance, not in process-global
/// state; each outbound send checks the expiry and refreshes if needed.
pub struct FcmClient {
    http: Client,
    project_id: String,
    client_email: String,
    private_key: String,
    token_uri: String,
    session: Mutex<Option<PushSession>>,
}

struct PushSession {
    access_token: String,
    expires_at: DateTime<Utc>,
}

#[derive(Serialize)]
struct FirebaseClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

#[derive(Deserialize)]
struct FcmSendResponse {
    /// Resource name of the sent message, e.g. `projects/*/messages/{id}`.
    name: String,
}

impl FcmClient {
    pub fn new(
        project_id: impl Into<String>,
        client_email: impl Into<String>,
        private_key: impl Into<String>,
        token_uri: impl Into<String>,
    ) -> Self {
        Self {
            http: Client::new(),
            project_id: project_id.into(),
            client_email: client_email.into(),
            private_key: private_key.into(),
            token_uri: token_uri.into(),
            session: Mutex::new(None),
        }
    }

    /// Returns a valid access token, refreshing the session if it is absent
    /// or past its expiry.
    async fn ensure_session(&self) -> Result<String, AppError> {
        let mut session = self.session.lock().await;

        if let Some(s) = session.as_ref() {
            if Utc::now() < s.expires_at {
                return Ok(s.access_token.clone());
            }
        }

        let refreshed = self.request_token().await?;
        let access_token = refreshed.access_token.clone();
        *session = Some(refreshed);

        tracing::debug!(project_id = %self.project_id, "fcm session refreshed");
        Ok(access_token)
    }

    async fn request_token(&self) -> Result<PushSession, AppError> {
        let now = Utc::now();
        let claims = FirebaseClaims {
            iss: &self.client_email,
            scope: FCM_SCOPE,
            aud: &self.token_uri,
            iat: now.timestamp(),
            exp: (now + Duration::hours(1)).timestamp(),
        };

        let key = EncodingKey::from_rsa_pem(self.private_key.as_bytes())
            .map_err(|e| AppError::new(ErrorCode::PushAuthError, format!("invalid service account key: {e}")))?;
        let assertion = encode(&Header::new(Algorithm::RS256), &claims, &key)
            .map_err(|e| AppError::new(ErrorCode::PushAuthError, format!("failed to sign assertion: {e}")))?;

        let response = self.http
            .post(&self.token_uri)
            .form(&[
                ("grant_type", JWT_BEARER_GRANT),
                ("assertion", assertion.as_str()),
            ])
            .send()
            .await
            .map_err(|e| AppError::new(ErrorCode::PushAuthError, format!("token exchange failed: {e}")))?;

        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::new(ErrorCode::PushAuthError, format!("token endpoint error: {body}")));
        }

        let token: TokenResponse = response.json().await
            .map_err(|e| AppError::new(ErrorCode::PushAuthError, format!("invalid token response: {e}")))?;

        Ok(PushSession {
            access_token: token.access_token,
            // refresh a minute before the provider-side expiry
            expires_at: now + Duration::seconds(token.expires_in - 60),
        })
    }

    fn message_body(&self, message: &PushMessage, token: &str) -> serde_json::Value {
        let mut notification = serde_json::json!({
            "title": message.title,
            "body": message.body,
        });
        if let Some(image) = &message.image {
            notification["image"] = serde_json::json!(image);
        }

        serde_json::json!({
            "message": {
                "token": token,
                "notification": notification,
                "data": message.data,
            }
        })
    }
}

#[async_trait]
impl PushClient for FcmClient {
    /// Sends one message to each token via `messages:send` and folds the
    /// per-token results into a multicast response.
    ///
    /// A transport failure aborts the whole call; a non-2xx status for one
    /// token becomes that token's failure outcome.
    async fn send_multicast(
        &self,
        message: &PushMessage,
        tokens: &[String],
    ) -> Result<MulticastResponse, AppError> {
        let access_token = self.ensure_session().await?;
        let url = format!(
            "https://fcm.googleapis.com/v1/projects/{}/messages:send",
            self.project_id
        );

        let mut responses = Vec::with_capacity(tokens.len());

        for token in tokens {
            let response = self.http
                .post(&url)
                .bearer_auth(&access_token)
                .json(&self.message_body(message, token))
                .send()
                .await
                .map_err(|e| AppError::new(ErrorCode::PushProviderError, format!("fcm request failed: {e}")))?;

            if response.status().is_success() {
                let sent: FcmSendResponse = response.json().await
                    .map_err(|e| AppError::new(ErrorCode::PushProviderError, format!("malformed fcm response: {e}")))?;

                responses.push(PushResult {
                    token: token.clone(),
                    success: true,
                    message_id: Some(sent.name),
                    error: None,
                });
            } else {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                tracing::warn!(status = %status, token = %token, "fcm rejected token");

                responses.push(PushResult {
                    token: token.clone(),
                    success: false,
                    message_id: None,
                    error: Some(format!("{status}: {body}")),
                });
            }
        }

        Ok(MulticastResponse { responses })
    }
}
