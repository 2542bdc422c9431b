// Third-party identity provider verification.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

use crate::{config::Config, services::http_client};

const GOOGLE_TOKENINFO_URL: &str = "https://oauth2.googleapis.com/tokeninfo";

#[derive(Debug, Clone, PartialEq)]
pub struct IdentityClaims {
    pub email: String,
    pub name: Option<String>,
    pub picture: Option<String>,
}

#[derive(Error, Debug)]
pub enum IdentityError {
    #[error("identity assertion rejected: {0}")]
    Rejected(String),

    #[error("identity provider unavailable: {0}")]
    Unavailable(#[from] reqwest::Error),
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Checks an opaque assertion (an ID token) and returns who it belongs to.
    async fn verify(&self, assertion: &str) -> Result<IdentityClaims, IdentityError>;
}

/// Verifies Google ID tokens through the `tokeninfo` endpoint.
pub struct GoogleIdentityProvider {
    client: reqwest::Client,
    client_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenInfo {
    aud: Option<String>,
    email: Option<String>,
    // Google returns this as the string "true"; accept a bool too.
    email_verified: Option<serde_json::Value>,
    name: Option<String>,
    picture: Option<String>,
}

impl GoogleIdentityProvider {
    pub fn new(client_id: Option<String>, timeout: Duration) -> reqwest::Result<Self> {
        Ok(Self {
            client: http_client(timeout)?,
            client_id,
        })
    }
}

#[async_trait]
impl IdentityProvider for GoogleIdentityProvider {
    async fn verify(&self, assertion: &str) -> Result<IdentityClaims, IdentityError> {
        if assertion.is_empty() {
            return Err(IdentityError::Rejected("empty token".to_string()));
        }

        let response = self
            .client
            .get(GOOGLE_TOKENINFO_URL)
            .query(&[("id_token", assertion)])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(IdentityError::Rejected(format!(
                "tokeninfo returned {}",
                response.status()
            )));
        }

        let info: TokenInfo = response.json().await?;
        claims_from_token_info(info, self.client_id.as_deref())
    }
}

fn claims_from_token_info(
    info: TokenInfo,
    expected_audience: Option<&str>,
) -> Result<IdentityClaims, IdentityError> {
    if let Some(expected) = expected_audience {
        if info.aud.as_deref() != Some(expected) {
            return Err(IdentityError::Rejected("audience mismatch".to_string()));
        }
    }

    let verified = match &info.email_verified {
        Some(serde_json::Value::Bool(flag)) => *flag,
        Some(serde_json::Value::String(flag)) => flag == "true",
        _ => false,
    };
    if !verified {
        return Err(IdentityError::Rejected("email not verified".to_string()));
    }

    let email = info
        .email
        .filter(|email| !email.is_empty())
        .ok_or_else(|| IdentityError::Rejected("token carries no email".to_string()))?;

    Ok(IdentityClaims {
        email,
        name: info.name,
        picture: info.picture,
    })
}

pub fn from_config(config: &Config) -> anyhow::Result<Arc<dyn IdentityProvider>> {
    if config.google_client_id.is_none() {
        tracing::warn!("GOOGLE_CLIENT_ID not set, ID token audience will not be checked");
    }
    Ok(Arc::new(GoogleIdentityProvider::new(
        config.google_client_id.clone(),
        Duration::from_secs(config.outbound_timeout_secs),
    )?))
}
