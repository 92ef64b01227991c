use reqwest::Response;
use serde::{de::DeserializeOwned, Deserialize};

use crate::error::{DriveError, Result};

/// Google's error envelopes. Drive answers with `{"error": {"message": ..}}`,
/// OAuth endpoints with `{"error": "invalid_grant", "error_description": ..}`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ErrorBody {
    Api { error: ApiError },
    OAuth {
        error: String,
        error_description: Option<String>,
    },
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}

fn error_message(text: &str) -> Option<String> {
    match serde_json::from_str::<ErrorBody>(text).ok()? {
        ErrorBody::Api { error } => Some(error.message),
        ErrorBody::OAuth {
            error,
            error_description,
        } => Some(error_description.unwrap_or(error)),
    }
}

pub struct Res(Response);

impl Res {
    /// Passes 2xx responses through and turns everything else into a typed error.
    pub async fn checked(self) -> Result<Response> {
        let res = self.0;
        let status = res.status();

        if status.is_success() {
            return Ok(res);
        }

        let url = res.url().path().to_string();
        let text = res.text().await.unwrap_or_default();
        let message = error_message(&text).unwrap_or_else(|| {
            if text.trim().is_empty() {
                format!("{} returned {}", url, status)
            } else {
                text
            }
        });

        Err(DriveError::from_status(status, message))
    }

    pub async fn json<T: DeserializeOwned>(self) -> Result<T> {
        let bytes = self.checked().await?.bytes().await?;
        let t = serde_json::from_slice::<T>(&bytes)?;
        Ok(t)
    }

    pub async fn empty(self) -> Result<()> {
        self.checked().await.map(|_r| ())
    }
}

impl From<Response> for Res {
    fn from(r: Response) -> Self {
        Self(r)
    }
}
