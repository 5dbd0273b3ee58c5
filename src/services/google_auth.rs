// src/services/google_auth.rs
//! OAuth2 access tokens minted from a Google service account, using the
//! JWT-bearer grant. FCM HTTP v1 accepts nothing else.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::Mutex;
use tracing;

use crate::errors::{SparrowError, SparrowResult};

pub const FCM_SCOPE: &str = "https://www.googleapis.com/auth/firebase.messaging";
pub const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME_SECS: i64 = 3600;
const REFRESH_MARGIN_SECS: i64 = 60;

/// The parts of a service account JSON key the notifier uses.
#[derive(Clone, Deserialize, Default)]
pub struct ServiceAccountKey {
    #[serde(default)]
    pub project_id: String,
    #[serde(default)]
    pub client_email: String,
    #[serde(default)]
    pub private_key: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

impl ServiceAccountKey {
    /// Everything needed to sign a token request is present.
    pub fn is_complete(&self) -> bool {
        !self.project_id.is_empty() && !self.client_email.is_empty() && !self.private_key.is_empty()
    }
}

// Keeps the private key out of logs
impl fmt::Debug for ServiceAccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceAccountKey")
            .field("project_id", &self.project_id)
            .field("client_email", &self.client_email)
            .field("token_uri", &self.token_uri)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("service account private key is not a valid RSA PEM: {0}")]
    InvalidKey(jsonwebtoken::errors::Error),

    #[error("could not sign the token request: {0}")]
    Signing(jsonwebtoken::errors::Error),

    #[error("token endpoint refused the request ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("token request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

impl From<TokenError> for SparrowError {
    fn from(err: TokenError) -> Self {
        SparrowError::FcmAuth(err.to_string())
    }
}

/// Source of bearer tokens for Google APIs.
#[async_trait]
pub trait AccessTokenSource: Send + Sync {
    async fn access_token(&self) -> SparrowResult<String>;
}

#[derive(Serialize)]
struct Claims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
}

fn default_expires_in() -> i64 {
    ASSERTION_LIFETIME_SECS
}

#[derive(Clone)]
struct CachedToken {
    value: String,
    expires_at: DateTime<Utc>,
}

/// Exchanges a signed assertion for an access token and caches it until
/// shortly before it expires.
pub struct ServiceAccountTokenSource {
    account: ServiceAccountKey,
    scope: String,
    signing_key: EncodingKey,
    client: reqwest::Client,
    cached: Mutex<Option<CachedToken>>,
}

impl ServiceAccountTokenSource {
    pub fn new(account: ServiceAccountKey, scope: &str) -> SparrowResult<Self> {
        let signing_key = EncodingKey::from_rsa_pem(account.private_key.as_bytes()).map_err(TokenError::InvalidKey)?;
        Ok(Self {
            account,
            scope: scope.to_string(),
            signing_key,
            client: reqwest::Client::new(),
            cached: Mutex::new(None),
        })
    }

    fn assertion(&self, now: DateTime<Utc>) -> Result<String, TokenError> {
        let claims = Claims {
            iss: &self.account.client_email,
            scope: &self.scope,
            aud: &self.account.token_uri,
            iat: now.timestamp(),
            exp: now.timestamp() + ASSERTION_LIFETIME_SECS,
        };
        jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &self.signing_key).map_err(TokenError::Signing)
    }

    async fn fetch(&self) -> Result<CachedToken, TokenError> {
        let now = Utc::now();
        let assertion = self.assertion(now)?;

        let response = self
            .client
            .post(&self.account.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(TokenError::Rejected { status: status.as_u16(), body });
        }

        let token: TokenResponse = response.json().await?;
        tracing::debug!("Access token for {} valid for {}s", self.account.client_email, token.expires_in);
        Ok(CachedToken {
            value: token.access_token,
            expires_at: now + Duration::seconds(token.expires_in),
        })
    }
}

#[async_trait]
impl AccessTokenSource for ServiceAccountTokenSource {
    async fn access_token(&self) -> SparrowResult<String> {
        // Held across the refresh so concurrent dispatches share one request
        let mut cached = self.cached.lock().await;
        let fresh_until = Utc::now() + Duration::seconds(REFRESH_MARGIN_SECS);

        if let Some(token) = cached.as_ref().filter(|t| t.expires_at > fresh_until) {
            return Ok(token.value.clone());
        }

        let token = self.fetch().await?;
        *cached = Some(token.clone());
        Ok(token.value)
    }
}

/// A fixed token, for tests and local emulators.
pub struct StaticTokenSource(pub String);

#[async_trait]
impl AccessTokenSource for StaticTokenSource {
    async fn access_token(&self) -> SparrowResult<String> {
        Ok(self.0.clone())
    }
}
