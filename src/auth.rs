//! Bearer-token sources for the Vertex AI endpoint.
//!
//! The client asks its [`TokenSource`] for a token immediately before every
//! request. Access tokens expire after an hour, and a batch of a few hundred
//! pages with a 5 s delay easily outlives one, so the token is never held
//! across calls.
//!
//! The OAuth2 JWT-bearer exchange itself is delegated to `gcp_auth`, which
//! caches the token and only goes back to Google when it is about to expire.

use crate::config::ExtractorConfig;
use crate::error::Img2TxtError;
use async_trait::async_trait;
use gcp_auth::{CustomServiceAccount, TokenProvider};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// OAuth scope required by Vertex AI.
pub const CLOUD_PLATFORM_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";

/// Something that can produce a bearer token on demand.
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Return a currently valid bearer token (without the `Bearer ` prefix).
    async fn bearer_token(&self) -> Result<String, Img2TxtError>;
}

/// Pick the token source a config asks for.
///
/// A pre-fetched `access_token` wins over `credentials_path`.
pub fn token_source_from_config(
    config: &ExtractorConfig,
) -> Result<Arc<dyn TokenSource>, Img2TxtError> {
    match (&config.access_token, &config.credentials_path) {
        (Some(token), _) => Ok(Arc::new(StaticToken::new(token.clone()))),
        (None, Some(path)) => Ok(Arc::new(ServiceAccountTokenSource::from_file(path)?)),
        (None, None) => Err(Img2TxtError::MissingSetting {
            name: "GOOGLE_APPLICATION_CREDENTIALS",
            hint: "Point it at a service-account JSON key, or set VERTEX_ACCESS_TOKEN.".into(),
        }),
    }
}

/// Service-account key file, exchanged for tokens via `gcp_auth`.
pub struct ServiceAccountTokenSource {
    account: CustomServiceAccount,
}

impl ServiceAccountTokenSource {
    /// Load a service-account JSON key.
    pub fn from_file(path: &Path) -> Result<Self, Img2TxtError> {
        if !path.exists() {
            return Err(Img2TxtError::CredentialsNotFound {
                path: path.to_path_buf(),
            });
        }
        let account = CustomServiceAccount::from_file(path).map_err(|e| Img2TxtError::Auth {
            detail: format!("could not load service account key {}: {e}", path.display()),
        })?;
        Ok(Self { account })
    }
}

#[async_trait]
impl TokenSource for ServiceAccountTokenSource {
    async fn bearer_token(&self) -> Result<String, Img2TxtError> {
        let token = self
            .account
            .token(&[CLOUD_PLATFORM_SCOPE])
            .await
            .map_err(|e| Img2TxtError::Auth {
                detail: e.to_string(),
            })?;
        debug!("Obtained access token for {}", CLOUD_PLATFORM_SCOPE);
        Ok(token.as_str().to_string())
    }
}

/// A fixed token, e.g. from `gcloud auth print-access-token`.
///
/// It is never refreshed; once it expires every call gets HTTP 401.
#[derive(Clone)]
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

impl std::fmt::Debug for StaticToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("StaticToken(<redacted>)")
    }
}

#[async_trait]
impl TokenSource for StaticToken {
    async fn bearer_token(&self) -> Result<String, Img2TxtError> {
        if self.0.trim().is_empty() {
            return Err(Img2TxtError::Auth {
                detail: "access token is empty".into(),
            });
        }
        Ok(self.0.clone())
    }
}
