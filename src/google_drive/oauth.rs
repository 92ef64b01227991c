//! OAuth2 authorization-code flow against Google, with the code exchange and
//! refresh proxied through the application backend so the client secret never
//! leaves it.

use std::sync::Arc;

use anyhow::Context;
use chrono::{TimeZone, Utc};
use rand::{distributions::Alphanumeric, Rng};
use reqwest::Client;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{
    res::Res,
    store::{
        TokenStore, ACCESS_TOKEN_KEY, OAUTH_STATE_KEY, REFRESH_TOKEN_KEY, RETURN_URL_KEY,
        TOKEN_EXPIRY_KEY,
    },
    types::{AuthConfig, StoredToken, TokenResponse},
};
use crate::error::{DriveError, Result};

const STATE_LEN: usize = 32;

/// Where to send the user, and the anti-CSRF state that must come back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthRedirect {
    pub url: String,
    pub state: String,
}

/// Sole owner of the persisted token state.
pub struct TokenManager {
    config: AuthConfig,
    store: Arc<dyn TokenStore>,
    http: Client,
    // serializes refreshes so concurrent callers share one exchange
    refresh_lock: Mutex<()>,
}

impl TokenManager {
    pub fn new(config: AuthConfig, store: Arc<dyn TokenStore>) -> Self {
        Self::with_client(config, store, Client::new())
    }

    pub fn with_client(config: AuthConfig, store: Arc<dyn TokenStore>, http: Client) -> Self {
        Self {
            config,
            store,
            http,
            refresh_lock: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    pub fn start_auth(&self, return_url: &str) -> Result<AuthRedirect> {
        let state: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(STATE_LEN)
            .map(char::from)
            .collect();

        let url = url::Url::parse_with_params(
            &self.config.auth_uri,
            &[
                ("client_id", self.config.client_id.as_str()),
                ("redirect_uri", self.config.redirect_uri.as_str()),
                ("response_type", "code"),
                ("scope", self.config.scope.as_str()),
                ("access_type", "offline"),
                ("prompt", "consent"),
                ("state", state.as_str()),
            ],
        )
        .with_context(|| format!("invalid authorization uri '{}'", self.config.auth_uri))?;

        self.store.set(OAUTH_STATE_KEY, &state)?;
        self.store.set(RETURN_URL_KEY, return_url)?;

        debug!("OAuth consent url generated");
        Ok(AuthRedirect {
            url: url.to_string(),
            state,
        })
    }

    /// Completes the flow. Returns the page the user started from, if recorded.
    pub async fn handle_callback(&self, code: &str, state: &str) -> Result<Option<String>> {
        let expected = self.store.get(OAUTH_STATE_KEY)?;
        self.store.remove(OAUTH_STATE_KEY)?;

        match expected {
            Some(s) if s == state => {}
            _ => {
                warn!("OAuth callback state does not match the pending authorization");
                return Err(DriveError::CsrfMismatch);
            }
        }

        let res = self
            .http
            .post(self.config.token_url())
            .json(&json!({
                "code": code,
                "redirect_uri": self.config.redirect_uri,
            }))
            .send()
            .await?;
        let res = Res::from(res).json::<TokenResponse>().await?;

        let token = StoredToken::from_response(res, Utc::now())?;
        self.save_token(&token)?;

        let return_url = self.store.get(RETURN_URL_KEY)?;
        self.store.remove(RETURN_URL_KEY)?;

        info!("Google Drive authorization completed");
        Ok(return_url)
    }

    /// A token valid for at least the refresh margin, refreshing it if needed.
    pub async fn access_token(&self) -> Result<String> {
        if let Some(t) = self.valid_token()? {
            return Ok(t.access_token);
        }

        let _guard = self.refresh_lock.lock().await;

        // someone else may have refreshed while we waited for the lock
        if let Some(t) = self.valid_token()? {
            return Ok(t.access_token);
        }

        let refresh_token = match self.store.get(REFRESH_TOKEN_KEY)? {
            Some(t) => t,
            None if self.store.get(ACCESS_TOKEN_KEY)?.is_some() => {
                return Err(DriveError::AuthRequired(
                    "access token expired and no refresh token is available".to_string(),
                ))
            }
            None => return Err(DriveError::NotSignedIn),
        };

        let token = self.refresh(&refresh_token).await?;
        Ok(token.access_token)
    }

    pub async fn auth_header(&self) -> Result<String> {
        Ok(format!("Bearer {}", self.access_token().await?))
    }

    /// No network. A refresh token alone does not count.
    pub fn is_authenticated(&self) -> bool {
        self.valid_token().ok().flatten().is_some()
    }

    pub fn load_token(&self) -> Result<Option<StoredToken>> {
        let access_token = match self.store.get(ACCESS_TOKEN_KEY)? {
            Some(t) => t,
            None => return Ok(None),
        };

        let expires_at = self
            .store
            .get(TOKEN_EXPIRY_KEY)?
            .and_then(|ms| ms.parse::<i64>().ok())
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single());

        // a token without a readable expiry cannot be trusted
        let expires_at = match expires_at {
            Some(e) => e,
            None => return Ok(None),
        };

        Ok(Some(StoredToken {
            access_token,
            expires_at,
            refresh_token: self.store.get(REFRESH_TOKEN_KEY)?,
        }))
    }

    pub fn clear(&self) -> Result<()> {
        self.store.remove(ACCESS_TOKEN_KEY)?;
        self.store.remove(TOKEN_EXPIRY_KEY)?;
        self.store.remove(REFRESH_TOKEN_KEY)?;
        Ok(())
    }

    pub fn sign_out(&self) -> Result<()> {
        self.clear()?;
        info!("Signed out of Google Drive");
        Ok(())
    }

    fn valid_token(&self) -> Result<Option<StoredToken>> {
        Ok(self
            .load_token()?
            .filter(|t| t.is_valid(self.config.refresh_margin)))
    }

    // three separate writes; a failure part way leaves a token `load_token`
    // may reject, which only costs a refresh or a new sign-in
    fn save_token(&self, token: &StoredToken) -> Result<()> {
        self.store.set(ACCESS_TOKEN_KEY, &token.access_token)?;
        self.store
            .set(TOKEN_EXPIRY_KEY, &token.expires_at.timestamp_millis().to_string())?;
        if let Some(r) = &token.refresh_token {
            self.store.set(REFRESH_TOKEN_KEY, r)?;
        }
        Ok(())
    }

    async fn refresh(&self, refresh_token: &str) -> Result<StoredToken> {
        debug!("refreshing Google Drive access token");

        let res = self
            .http
            .post(self.config.refresh_url())
            .json(&json!({ "refresh_token": refresh_token }))
            .send()
            .await?;

        let res = match Res::from(res).json::<TokenResponse>().await {
            Ok(r) => r,
            Err(e @ (DriveError::AuthRequired(_) | DriveError::Api { status: 400, .. })) => {
                warn!(error = %e, "refresh token rejected, dropping stored tokens");
                self.clear()?;
                return Err(DriveError::AuthRequired(format!("refresh token rejected: {e}")));
            }
            Err(e) => return Err(e),
        };

        let mut token = StoredToken::from_response(res, Utc::now())?;
        if token.refresh_token.is_none() {
            token.refresh_token = Some(refresh_token.to_string());
        }
        self.save_token(&token)?;

        info!(expires_at = %token.expires_at, "Google Drive access token refreshed");
        Ok(token)
    }
}

/// Reads `code` and `state` from the `/google-oauth-callback` redirect.
pub fn parse_callback_url(callback: &str) -> Result<(String, String)> {
    let url = url::Url::parse(callback)
        .with_context(|| format!("invalid callback url '{}'", callback))?;

    let mut code = None;
    let mut state = None;
    for (k, v) in url.query_pairs() {
        match k.as_ref() {
            "code" => code = Some(v.into_owned()),
            "state" => state = Some(v.into_owned()),
            "error" => {
                return Err(DriveError::AuthRequired(format!(
                    "authorization was not granted: {v}"
                )))
            }
            _ => {}
        }
    }

    let code = code.ok_or_else(|| {
        DriveError::AuthRequired("callback is missing the authorization code".to_string())
    })?;
    let state = state.ok_or(DriveError::CsrfMismatch)?;

    Ok((code, state))
}
