use std::{env, path::PathBuf, str::FromStr, time::Duration};

use anyhow::Context;

use crate::{
    google_drive::{AuthConfig, SearchLimits},
    viewer::ViewerConfig,
};

const DEFAULT_REDIRECT_URI: &str = "http://localhost:3000/google-oauth-callback";
const DEFAULT_PROXY_URL: &str = "http://localhost:3000";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub client_id: String,
    pub redirect_uri: String,
    pub proxy_url: String,
    pub root_folder_id: String,
    pub root_folder_name: String,
    pub token_store_path: PathBuf,
    pub refresh_margin_secs: u64,
    pub search_max_depth: usize,
    pub search_max_folders: usize,
    pub search_batch_size: usize,
    pub search_debounce_ms: u64,
    pub log_level: String,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let client_id = lookup("GOOGLE_CLIENT_ID")
            .filter(|v| !v.trim().is_empty())
            .context("GOOGLE_CLIENT_ID must be set")?;

        let token_store_path = match lookup("TOKEN_STORE_PATH") {
            Some(p) => PathBuf::from(p),
            None => default_token_path(),
        };

        Ok(Self {
            client_id,
            redirect_uri: get("GOOGLE_REDIRECT_URI", DEFAULT_REDIRECT_URI),
            proxy_url: get("OAUTH_PROXY_URL", DEFAULT_PROXY_URL),
            root_folder_id: get("DRIVE_ROOT_FOLDER_ID", "root"),
            root_folder_name: get("DRIVE_ROOT_FOLDER_NAME", "My Drive"),
            token_store_path,
            refresh_margin_secs: parse_var(&lookup, "TOKEN_REFRESH_MARGIN_SECS", 300),
            search_max_depth: parse_var(&lookup, "SEARCH_MAX_DEPTH", 5),
            search_max_folders: parse_var(&lookup, "SEARCH_MAX_FOLDERS", 100),
            search_batch_size: parse_var(&lookup, "SEARCH_BATCH_SIZE", 5),
            search_debounce_ms: parse_var(&lookup, "SEARCH_DEBOUNCE_MS", 500),
            log_level: get("LOG_LEVEL", "info"),
        })
    }

    pub fn auth_config(&self) -> AuthConfig {
        let mut c = AuthConfig::new(&self.client_id, &self.redirect_uri, &self.proxy_url);
        c.refresh_margin = Duration::from_secs(self.refresh_margin_secs);
        c
    }

    pub fn search_limits(&self) -> SearchLimits {
        SearchLimits {
            max_depth: self.search_max_depth,
            max_folders: self.search_max_folders,
            batch_size: self.search_batch_size.max(1),
        }
    }

    pub fn viewer_config(&self) -> ViewerConfig {
        ViewerConfig {
            root_folder_id: self.root_folder_id.clone(),
            root_name: self.root_folder_name.clone(),
            search_debounce: Duration::from_millis(self.search_debounce_ms),
            search_limits: self.search_limits(),
        }
    }
}

fn default_token_path() -> PathBuf {
    dirs::config_dir()
        .map(|d| d.join("drive_portal").join("tokens.json"))
        .unwrap_or_else(|| PathBuf::from(".drive_portal_tokens.json"))
}

fn parse_var<T: FromStr, F: Fn(&str) -> Option<String>>(lookup: &F, key: &str, default: T) -> T {
    lookup(key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
