use std::fmt;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use reqwest::blocking::Client;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use serde::Deserialize;
use tracing::{debug, info};

use crate::reddit::{OAuthToken, TokenProvider};

#[derive(Debug, Clone)]
pub struct Config {
    pub client_id: String,
    pub client_secret: String,
    pub username: String,
    pub password: String,
    pub user_agent: String,
    pub token_url: String,
    pub identity_url: String,
    pub refresh_skew: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            username: String::new(),
            password: String::new(),
            user_agent: format!("redcli/{}", crate::VERSION),
            token_url: "https://www.reddit.com/api/v1/access_token".into(),
            identity_url: "https://oauth.reddit.com/api/v1/me".into(),
            refresh_skew: Duration::from_secs(30),
        }
    }
}

impl From<&crate::config::RedditConfig> for Config {
    fn from(reddit: &crate::config::RedditConfig) -> Self {
        Self {
            client_id: reddit.client_id.trim().to_string(),
            client_secret: reddit.client_secret.trim().to_string(),
            username: reddit.username.trim().to_string(),
            password: reddit.password.clone(),
            user_agent: reddit.user_agent.clone(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct OAuthTokenDetails {
    pub access_token: String,
    pub token_type: String,
    pub expires_at: DateTime<Utc>,
}

impl OAuthTokenDetails {
    fn to_token(&self) -> OAuthToken {
        OAuthToken {
            access_token: self.access_token.clone(),
            token_type: self.token_type.clone(),
            expires_at: Some(self.expires_at.into()),
        }
    }
}

/// Whether a token expiring at `expires_at` should be replaced at `now`.
pub fn needs_refresh(expires_at: DateTime<Utc>, now: DateTime<Utc>, skew: Duration) -> bool {
    let skew = chrono::Duration::from_std(skew).unwrap_or_else(|_| chrono::Duration::seconds(0));
    expires_at - skew <= now
}

/// Script-app password grant. The token is cached and requested again once
/// it is within `refresh_skew` of expiring.
pub struct PasswordGrant {
    cfg: Config,
    client: Client,
    cached: RwLock<Option<OAuthTokenDetails>>,
}

impl PasswordGrant {
    pub fn new(cfg: Config) -> Result<Self> {
        if cfg.client_id.is_empty() {
            bail!("auth: reddit.client_id is required");
        }
        if cfg.username.is_empty() || cfg.password.is_empty() {
            bail!("auth: reddit.username and reddit.password are required");
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(20))
            .build()
            .context("auth: build http client")?;
        Ok(Self {
            cfg,
            client,
            cached: RwLock::new(None),
        })
    }

    /// Confirms the credentials by fetching the account name.
    pub fn verify(&self) -> Result<String> {
        let token = self.current()?;
        let resp = self
            .client
            .get(&self.cfg.identity_url)
            .header(USER_AGENT, self.cfg.user_agent.clone())
            .header(AUTHORIZATION, format!("Bearer {}", token.access_token))
            .send()
            .context("auth: identity request")?;

        if !resp.status().is_success() {
            let body = resp.text().unwrap_or_default();
            bail!("auth: identity request failed: {}", body);
        }

        let payload: IdentityResponse = resp.json().context("auth: decode identity")?;
        if payload.name.is_empty() {
            bail!("auth: identity missing name");
        }
        info!(user = %payload.name, "authenticated");
        Ok(payload.name)
    }

    fn current(&self) -> Result<OAuthTokenDetails> {
        let now = Utc::now();
        if let Some(token) = self.cached.read().as_ref() {
            if !needs_refresh(token.expires_at, now, self.cfg.refresh_skew) {
                return Ok(token.clone());
            }
        }

        let mut slot = self.cached.write();
        if let Some(token) = slot.as_ref() {
            if !needs_refresh(token.expires_at, now, self.cfg.refresh_skew) {
                return Ok(token.clone());
            }
        }
        let fresh = self.request_token()?;
        *slot = Some(fresh.clone());
        Ok(fresh)
    }

    fn request_token(&self) -> Result<OAuthTokenDetails> {
        debug!(user = %self.cfg.username, "requesting access token");
        let form = [
            ("grant_type", "password"),
            ("username", self.cfg.username.as_str()),
            ("password", self.cfg.password.as_str()),
        ];
        let resp = self
            .client
            .post(&self.cfg.token_url)
            .header(USER_AGENT, self.cfg.user_agent.clone())
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .basic_auth(&self.cfg.client_id, Some(self.cfg.client_secret.as_str()))
            .form(&form)
            .send()
            .context("auth: token request")?;
        if !resp.status().is_success() {
            let body = resp.text().unwrap_or_default();
            if let Ok(err) = serde_json::from_str::<TokenError>(&body) {
                bail!("auth: token request failed: {}", err);
            }
            bail!("auth: token request failed: {}", body);
        }

        let payload: TokenResponse = resp.json().context("auth: decode token response")?;
        payload.into_details(Utc::now())
    }
}

impl TokenProvider for PasswordGrant {
    fn token(&self) -> Result<OAuthToken> {
        self.current().map(|details| details.to_token())
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: String,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    expires_in: u64,
    #[serde(default)]
    error: Option<String>,
}

impl TokenResponse {
    fn into_details(self, now: DateTime<Utc>) -> Result<OAuthTokenDetails> {
        // Wrong credentials come back as 200 with {"error": "invalid_grant"}.
        if let Some(error) = self.error.filter(|e| !e.is_empty()) {
            bail!(
                "auth: token request failed: {}",
                TokenError {
                    error,
                    description: String::new(),
                }
            );
        }
        if self.access_token.is_empty() {
            bail!("auth: missing access token");
        }
        let expires_in = if self.expires_in == 0 {
            3600
        } else {
            self.expires_in
        };
        Ok(OAuthTokenDetails {
            access_token: self.access_token,
            token_type: self.token_type.unwrap_or_else(|| "bearer".into()),
            expires_at: now + chrono::Duration::seconds(expires_in as i64),
        })
    }
}

#[derive(Debug, Deserialize)]
struct TokenError {
    #[serde(default)]
    error: String,
    #[serde(default, rename = "error_description")]
    description: String,
}

impl fmt::Display for TokenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.error.is_empty() && self.description.is_empty() {
            return write!(f, "unknown token error");
        }
        if self.description.is_empty() {
            write!(f, "authorization error: {}", self.error)
        } else if self.error.is_empty() {
            write!(f, "authorization error: {}", self.description)
        } else {
            write!(
                f,
                "authorization error: {} ({})",
                self.error, self.description
            )
        }
    }
}

#[derive(Debug, Deserialize)]
struct IdentityResponse {
    #[serde(default)]
    name: String,
}
