use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Deserialize;
use std::time::Duration;

use crate::error::{DriveError, Result};

/// Body returned by the backend proxy for both code exchange and refresh.
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub expires_in: u64,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredToken {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
    pub refresh_token: Option<String>,
}

impl StoredToken {
    pub fn from_response(res: TokenResponse, now: DateTime<Utc>) -> Result<Self> {
        let lifetime = i64::try_from(res.expires_in)
            .unwrap_or(i64::MAX)
            .min(i64::MAX / 1000);
        let expires_at = now
            .checked_add_signed(ChronoDuration::seconds(lifetime))
            .ok_or_else(|| {
                DriveError::Parse(format!("token lifetime of {}s is out of range", res.expires_in))
            })?;

        Ok(Self {
            access_token: res.access_token,
            expires_at,
            refresh_token: res.refresh_token,
        })
    }

    /// `now < expires_at - margin`; an expiry too early to subtract from is invalid.
    pub fn is_valid_at(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        let margin = ChronoDuration::from_std(margin).unwrap_or_else(|_| ChronoDuration::zero());
        self.expires_at
            .checked_sub_signed(margin)
            .map_or(false, |limit| now < limit)
    }

    pub fn is_valid(&self, margin: Duration) -> bool {
        self.is_valid_at(Utc::now(), margin)
    }

    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.access_token)
    }
}
