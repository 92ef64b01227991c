use std::time::Duration;

pub const AUTH_URI: &str = "https://accounts.google.com/o/oauth2/v2/auth";
pub const DRIVE_SCOPE: &str = "https://www.googleapis.com/auth/drive";
pub const API_BASE: &str = "https://www.googleapis.com/drive/v3";
pub const UPLOAD_BASE: &str = "https://www.googleapis.com/upload/drive/v3";

/// OAuth client settings. The client secret lives only in the backend proxy.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub client_id: String,
    pub redirect_uri: String,
    /// Base URL of the backend serving `/api/google/oauth/{token,refresh}`.
    pub proxy_base_url: String,
    pub auth_uri: String,
    pub scope: String,
    /// Tokens expiring within this window are treated as expired.
    pub refresh_margin: Duration,
}

impl AuthConfig {
    pub fn new(client_id: &str, redirect_uri: &str, proxy_base_url: &str) -> Self {
        Self {
            client_id: client_id.to_string(),
            redirect_uri: redirect_uri.to_string(),
            proxy_base_url: proxy_base_url.trim_end_matches('/').to_string(),
            auth_uri: AUTH_URI.to_string(),
            scope: DRIVE_SCOPE.to_string(),
            refresh_margin: Duration::from_secs(5 * 60),
        }
    }

    pub fn token_url(&self) -> String {
        format!("{}/api/google/oauth/token", self.proxy_base_url)
    }

    pub fn refresh_url(&self) -> String {
        format!("{}/api/google/oauth/refresh", self.proxy_base_url)
    }
}

#[derive(Debug, Clone)]
pub struct DriveEndpoints {
    pub api_base: String,
    pub upload_base: String,
}

impl DriveEndpoints {
    pub fn new(api_base: &str, upload_base: &str) -> Self {
        Self {
            api_base: api_base.trim_end_matches('/').to_string(),
            upload_base: upload_base.trim_end_matches('/').to_string(),
        }
    }

    pub fn files(&self) -> String {
        format!("{}/files", self.api_base)
    }

    pub fn file(&self, id: &str) -> String {
        format!("{}/files/{id}", self.api_base)
    }

    pub fn upload(&self) -> String {
        format!("{}/files", self.upload_base)
    }
}

impl Default for DriveEndpoints {
    fn default() -> Self {
        Self::new(API_BASE, UPLOAD_BASE)
    }
}

/// Safety bounds for the recursive search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchLimits {
    pub max_depth: usize,
    pub max_folders: usize,
    pub batch_size: usize,
}

impl Default for SearchLimits {
    fn default() -> Self {
        Self {
            max_depth: 5,
            max_folders: 100,
            batch_size: 5,
        }
    }
}
