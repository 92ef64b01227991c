use chrono::{DateTime, Utc};
use fievar::Fields;
use serde::{Deserialize, Serialize};

pub const FOLDER: &str = "application/vnd.google-apps.folder";

/// A `files` resource as returned by Drive v3, restricted to the fields we request.
#[derive(Debug, Clone, Deserialize, Fields)]
#[serde(rename_all = "camelCase")]
pub struct DriveFile {
    pub id: String,
    pub name: String,
    #[fievar(name = "mimeType")]
    pub mime_type: String,
    pub size: Option<String>,
    #[fievar(name = "modifiedTime")]
    pub modified_time: Option<DateTime<Utc>>,
    #[fievar(name = "webViewLink")]
    pub web_view_link: Option<String>,
    #[fievar(name = "thumbnailLink")]
    pub thumbnail_link: Option<String>,
    pub parents: Option<Vec<String>>,
}

impl DriveFile {
    pub fn is_folder(&self) -> bool {
        self.mime_type == FOLDER
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListResponse {
    pub next_page_token: Option<String>,
    #[serde(default)]
    pub files: Vec<DriveFile>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DriveFolder {
    pub id: String,
    pub name: String,
    pub modified_time: Option<DateTime<Utc>>,
    pub web_view_link: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DriveItem {
    pub id: String,
    pub name: String,
    pub mime_type: String,
    pub size: Option<u64>,
    pub modified_time: Option<DateTime<Utc>>,
    pub web_view_link: Option<String>,
    pub thumbnail_link: Option<String>,
    pub is_folder: bool,
}

impl From<DriveFile> for DriveFolder {
    fn from(f: DriveFile) -> Self {
        Self {
            id: f.id,
            name: f.name,
            modified_time: f.modified_time,
            web_view_link: f.web_view_link,
        }
    }
}

impl From<DriveFile> for DriveItem {
    fn from(f: DriveFile) -> Self {
        let is_folder = f.is_folder();
        let size = f.size.and_then(|s| s.parse::<u64>().ok());

        Self {
            id: f.id,
            name: f.name,
            mime_type: f.mime_type,
            size,
            modified_time: f.modified_time,
            web_view_link: f.web_view_link,
            thumbnail_link: f.thumbnail_link,
            is_folder,
        }
    }
}

/// Direct children of one folder, folders and files kept apart.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FolderListing {
    pub folders: Vec<DriveFolder>,
    pub files: Vec<DriveItem>,
}

impl FolderListing {
    pub fn partition(files: Vec<DriveFile>) -> Self {
        let mut listing = Self::default();
        for f in files {
            if f.is_folder() {
                listing.folders.push(f.into());
            } else {
                listing.files.push(f.into());
            }
        }
        listing
    }

    pub fn is_empty(&self) -> bool {
        self.folders.is_empty() && self.files.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FolderPage {
    pub folders: Vec<DriveFolder>,
    pub next_page_token: Option<String>,
}
