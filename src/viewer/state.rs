use std::time::Duration;

use serde::Serialize;

use crate::google_drive::{DriveFolder, FolderListing, SearchLimits, SearchResults};

#[derive(Debug, Clone)]
pub struct ViewerConfig {
    /// The tenant's configured root; breadcrumbs never go above it.
    pub root_folder_id: String,
    pub root_name: String,
    pub search_debounce: Duration,
    pub search_limits: SearchLimits,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            root_folder_id: "root".to_string(),
            root_name: "My Drive".to_string(),
            search_debounce: Duration::from_millis(500),
            search_limits: SearchLimits::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewerPhase {
    Unauthenticated,
    AtRoot,
    AtSubfolder { depth: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Breadcrumb {
    pub id: String,
    pub name: String,
}

impl From<&DriveFolder> for Breadcrumb {
    fn from(f: &DriveFolder) -> Self {
        Self {
            id: f.id.clone(),
            name: f.name.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum UploadStatus {
    Pending,
    Uploading,
    Success,
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadTask {
    pub id: u64,
    pub file_name: String,
    pub progress: u8,
    pub status: UploadStatus,
}

impl UploadTask {
    pub fn is_finished(&self) -> bool {
        matches!(self.status, UploadStatus::Success | UploadStatus::Error(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchView {
    pub term: String,
    pub results: SearchResults,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchOutcome {
    Completed(SearchResults),
    Cleared,
    /// A newer search started while this one was waiting or running.
    Superseded,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ViewState {
    pub authenticated: bool,
    pub breadcrumbs: Vec<Breadcrumb>,
    pub listing: FolderListing,
    pub search: Option<SearchView>,
    pub uploads: Vec<UploadTask>,
    pub error: Option<String>,
}

impl ViewState {
    pub fn new(root: Breadcrumb) -> Self {
        Self {
            authenticated: false,
            breadcrumbs: vec![root],
            listing: FolderListing::default(),
            search: None,
            uploads: Vec::new(),
            error: None,
        }
    }

    pub fn phase(&self) -> ViewerPhase {
        match (self.authenticated, self.breadcrumbs.len()) {
            (false, _) => ViewerPhase::Unauthenticated,
            (true, 0 | 1) => ViewerPhase::AtRoot,
            (true, n) => ViewerPhase::AtSubfolder { depth: n - 1 },
        }
    }

    pub fn current_folder(&self) -> Option<&Breadcrumb> {
        self.breadcrumbs.last()
    }

    /// What the browser pane shows: search results while a term is active,
    /// the current folder otherwise.
    pub fn visible(&self) -> FolderListing {
        match &self.search {
            Some(s) => FolderListing {
                folders: s.results.folders.clone(),
                files: s.results.files.clone(),
            },
            None => self.listing.clone(),
        }
    }

    pub(crate) fn upload_mut(&mut self, id: u64) -> Option<&mut UploadTask> {
        self.uploads.iter_mut().find(|t| t.id == id)
    }
}
