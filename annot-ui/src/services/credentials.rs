//! Spreadsheet API credentials
//!
//! A Google service account key is exchanged for a short-lived OAuth access
//! token with the JWT bearer grant: an RS256-signed assertion naming the
//! account, the spreadsheets scope and the token endpoint is posted to the
//! key's `token_uri`. The token is cached and refreshed shortly before it
//! expires. A fixed bearer token can be used instead.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info};

use annot_common::config::SheetsAuth;

/// Read/write access to spreadsheets
pub const SHEETS_SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets";

const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
/// Lifetime requested for the signed assertion (Google's maximum)
const ASSERTION_LIFETIME_SECS: i64 = 3600;
/// Refresh this long before the access token expires
const REFRESH_MARGIN_SECS: i64 = 60;

/// Credential errors
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("Cannot read service account key {0}: {1}")]
    KeyFile(String, String),

    #[error("Invalid service account key: {0}")]
    InvalidKey(String),

    #[error("Signing error: {0}")]
    Signing(#[from] jsonwebtoken::errors::Error),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Token endpoint error {0}: {1}")]
    TokenEndpoint(u16, String),
}

impl From<CredentialError> for annot_common::Error {
    fn from(err: CredentialError) -> Self {
        annot_common::Error::Credential(err.to_string())
    }
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

/// The fields of a service account JSON key that the exchange needs
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default)]
    pub private_key_id: Option<String>,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

impl ServiceAccountKey {
    pub fn from_json(json: &str) -> Result<Self, CredentialError> {
        let key: Self =
            serde_json::from_str(json).map_err(|e| CredentialError::InvalidKey(e.to_string()))?;
        if key.client_email.trim().is_empty() {
            return Err(CredentialError::InvalidKey("client_email is empty".to_string()));
        }
        if !key.private_key.contains("PRIVATE KEY") {
            return Err(CredentialError::InvalidKey(
                "private_key is not a PEM private key".to_string(),
            ));
        }
        Ok(key)
    }

    pub fn from_file(path: &Path) -> Result<Self, CredentialError> {
        let json = std::fs::read_to_string(path)
            .map_err(|e| CredentialError::KeyFile(path.display().to_string(), e.to_string()))?;
        Self::from_json(&json)
    }
}

/// JWT bearer assertion claims
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
    expires_in: i64,
}

/// OAuth access token with its expiry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl AccessToken {
    /// Still usable for at least the refresh margin
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.expires_at - Duration::seconds(REFRESH_MARGIN_SECS) > now
    }
}

/// Sign the assertion for `key` issued at `now`
fn sign_assertion(key: &ServiceAccountKey, now: DateTime<Utc>) -> Result<String, CredentialError> {
    let claims = AssertionClaims {
        iss: &key.client_email,
        scope: SHEETS_SCOPE,
        aud: &key.token_uri,
        iat: now.timestamp(),
        exp: now.timestamp() + ASSERTION_LIFETIME_SECS,
    };

    let mut header = Header::new(Algorithm::RS256);
    header.kid = key.private_key_id.clone();

    let encoding_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())?;
    Ok(encode(&header, &claims, &encoding_key)?)
}

/// Exchange a service account key for an access token
pub async fn exchange_token(
    http: &reqwest::Client,
    key: &ServiceAccountKey,
    now: DateTime<Utc>,
) -> Result<AccessToken, CredentialError> {
    let assertion = sign_assertion(key, now)?;

    debug!(account = %key.client_email, token_uri = %key.token_uri, "Requesting access token");

    let response = http
        .post(&key.token_uri)
        .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
        .send()
        .await
        .map_err(|e| CredentialError::NetworkError(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        let error_text = response.text().await.unwrap_or_default();
        return Err(CredentialError::TokenEndpoint(status.as_u16(), error_text));
    }

    let body: TokenResponse = response
        .json()
        .await
        .map_err(|e| CredentialError::TokenEndpoint(status.as_u16(), e.to_string()))?;

    info!(account = %key.client_email, expires_in = body.expires_in, "Obtained spreadsheet access token");

    Ok(AccessToken {
        token: body.access_token,
        expires_at: now + Duration::seconds(body.expires_in),
    })
}

/// Where bearer tokens for the spreadsheet API come from
pub enum TokenSource {
    /// Fixed token, never refreshed
    Static(String),
    /// Service account key with a cached access token
    ServiceAccount {
        key: ServiceAccountKey,
        http: reqwest::Client,
        cached: Mutex<Option<AccessToken>>,
    },
}

impl TokenSource {
    /// Build the token source and acquire the first token
    ///
    /// Failure here is fatal for the service: there is no mode without the
    /// remote log.
    pub async fn acquire(auth: &SheetsAuth, http: reqwest::Client) -> Result<Self, CredentialError> {
        match auth {
            SheetsAuth::Token(token) => {
                info!("Using configured spreadsheet access token");
                Ok(TokenSource::Static(token.clone()))
            }
            SheetsAuth::ServiceAccount(path) => {
                let key = ServiceAccountKey::from_file(path)?;
                info!(account = %key.client_email, "Loaded service account key");
                let token = exchange_token(&http, &key, Utc::now()).await?;
                Ok(TokenSource::ServiceAccount {
                    key,
                    http,
                    cached: Mutex::new(Some(token)),
                })
            }
        }
    }

    /// Current bearer token, refreshing it if it is about to expire
    pub async fn bearer(&self) -> Result<String, CredentialError> {
        match self {
            TokenSource::Static(token) => Ok(token.clone()),
            TokenSource::ServiceAccount { key, http, cached } => {
                let mut cached = cached.lock().await;
                let now = Utc::now();
                if let Some(token) = cached.as_ref().filter(|t| t.is_fresh(now)) {
                    return Ok(token.token.clone());
                }
                let token = exchange_token(http, key, now).await?;
                let bearer = token.token.clone();
                *cached = Some(token);
                Ok(bearer)
            }
        }
    }
}

impl std::fmt::Debug for TokenSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenSource::Static(_) => f.write_str("TokenSource::Static(..)"),
            TokenSource::ServiceAccount { key, .. } => f
                .debug_struct("TokenSource::ServiceAccount")
                .field("client_email", &key.client_email)
                .finish(),
        }
    }
}
