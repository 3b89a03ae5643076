//! Google OAuth 2.0 authorization-code flow

use async_trait::async_trait;
use crewledger_common::config::GoogleOAuthConfig;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use url::Url;

const AUTHORIZE_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const USERINFO_URL: &str = "https://www.googleapis.com/oauth2/v3/userinfo";
const SCOPES: &str = "openid email profile";

#[derive(Debug, Error)]
pub enum OAuthError {
    #[error("OAuth client not configured")]
    NotConfigured,

    #[error("Network error: {0}")]
    Network(String),

    #[error("Token exchange failed: {0}")]
    TokenExchange(String),

    #[error("Userinfo request failed: {0}")]
    UserInfo(String),
}

/// Identity returned by the provider
#[derive(Debug, Clone, Deserialize)]
pub struct OAuthUser {
    pub email: String,
    pub name: Option<String>,
    pub picture: Option<String>,
}

/// Identity provider used by the login routes
#[async_trait]
pub trait OAuthProvider: Send + Sync {
    /// URL the browser is sent to for consent
    fn authorize_url(&self, state: &str, redirect_uri: &str) -> Result<String, OAuthError>;

    /// Exchange an authorization code and fetch the user's identity
    async fn authenticate(&self, code: &str, redirect_uri: &str) -> Result<OAuthUser, OAuthError>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

pub struct GoogleOAuth {
    http_client: reqwest::Client,
    config: GoogleOAuthConfig,
}

impl GoogleOAuth {
    pub fn new(config: GoogleOAuthConfig) -> Result<Self, OAuthError> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| OAuthError::Network(e.to_string()))?;
        Ok(Self { http_client, config })
    }

    fn ensure_configured(&self) -> Result<(), OAuthError> {
        if self.config.client_id.is_empty() || self.config.client_secret.is_empty() {
            return Err(OAuthError::NotConfigured);
        }
        Ok(())
    }
}

#[async_trait]
impl OAuthProvider for GoogleOAuth {
    fn authorize_url(&self, state: &str, redirect_uri: &str) -> Result<String, OAuthError> {
        self.ensure_configured()?;
        let url = Url::parse_with_params(
            AUTHORIZE_URL,
            &[
                ("client_id", self.config.client_id.as_str()),
                ("redirect_uri", redirect_uri),
                ("response_type", "code"),
                ("scope", SCOPES),
                ("state", state),
                ("prompt", "select_account"),
            ],
        )
        .map_err(|e| OAuthError::Network(e.to_string()))?;
        Ok(url.into())
    }

    async fn authenticate(&self, code: &str, redirect_uri: &str) -> Result<OAuthUser, OAuthError> {
        self.ensure_configured()?;

        let resp = self
            .http_client
            .post(TOKEN_URL)
            .form(&[
                ("code", code),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
                ("redirect_uri", redirect_uri),
                ("grant_type", "authorization_code"),
            ])
            .send()
            .await
            .map_err(|e| OAuthError::Network(e.to_string()))?;

        if !resp.status().is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(OAuthError::TokenExchange(body));
        }
        let token: TokenResponse = resp
            .json()
            .await
            .map_err(|e| OAuthError::TokenExchange(e.to_string()))?;

        let resp = self
            .http_client
            .get(USERINFO_URL)
            .bearer_auth(&token.access_token)
            .send()
            .await
            .map_err(|e| OAuthError::Network(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(OAuthError::UserInfo(format!("HTTP {}", resp.status())));
        }
        resp.json::<OAuthUser>()
            .await
            .map_err(|e| OAuthError::UserInfo(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authorize_url_carries_state_and_redirect() {
        let oauth = GoogleOAuth::new(GoogleOAuthConfig {
            client_id: "client-123".into(),
            client_secret: "shh".into(),
        })
        .unwrap();
        let url = oauth
            .authorize_url("state-abc", "https://ledger.example.com/auth/callback")
            .unwrap();
        let parsed = Url::parse(&url).unwrap();
        let params: std::collections::HashMap<_, _> = parsed.query_pairs().into_owned().collect();
        assert_eq!(params["state"], "state-abc");
        assert_eq!(params["redirect_uri"], "https://ledger.example.com/auth/callback");
        assert_eq!(params["scope"], "openid email profile");
        assert!(!url.contains("shh"));
    }

    #[test]
    fn test_unconfigured_client_rejected() {
        let oauth = GoogleOAuth::new(GoogleOAuthConfig::default()).unwrap();
        assert!(matches!(
            oauth.authorize_url("s", "http://localhost/auth/callback"),
            Err(OAuthError::NotConfigured)
        ));
    }
}
