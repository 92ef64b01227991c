use reqwest::StatusCode;

pub type Result<T, E = DriveError> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum DriveError {
    #[error("Authentication required: {0}")]
    AuthRequired(String),

    #[error("Not signed in to Google Drive")]
    NotSignedIn,

    #[error("OAuth state mismatch, the authorization response was not requested by this session")]
    CsrfMismatch,

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Google API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Token storage error: {0}")]
    Storage(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl DriveError {
    /// Maps a non-success HTTP status onto the error taxonomy.
    pub fn from_status(status: StatusCode, message: String) -> Self {
        match status {
            StatusCode::UNAUTHORIZED => DriveError::AuthRequired(message),
            StatusCode::FORBIDDEN => DriveError::PermissionDenied(message),
            StatusCode::NOT_FOUND => DriveError::NotFound(message),
            _ => DriveError::Api {
                status: status.as_u16(),
                message,
            },
        }
    }

    /// True when cached authentication must be dropped and the user sent
    /// through the consent screen again.
    pub fn requires_reauth(&self) -> bool {
        matches!(self, DriveError::AuthRequired(_) | DriveError::NotSignedIn)
    }

    /// Text for an inline error banner.
    pub fn user_message(&self) -> String {
        match self {
            DriveError::AuthRequired(_) => {
                "Your Google Drive session has expired. Please re-authenticate.".to_string()
            }
            DriveError::NotSignedIn => {
                "Sign in with Google to browse your Drive files.".to_string()
            }
            DriveError::CsrfMismatch => {
                "The Google sign-in response could not be verified. Please try again.".to_string()
            }
            DriveError::PermissionDenied(_) => {
                "You do not have permission to access this item.".to_string()
            }
            DriveError::NotFound(_) => {
                "The folder or file was not found. It may have been deleted.".to_string()
            }
            other => other.to_string(),
        }
    }
}

impl From<reqwest::Error> for DriveError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            DriveError::Parse(e.to_string())
        } else {
            DriveError::Network(e.to_string())
        }
    }
}

impl From<serde_json::Error> for DriveError {
    fn from(e: serde_json::Error) -> Self {
        DriveError::Parse(e.to_string())
    }
}
