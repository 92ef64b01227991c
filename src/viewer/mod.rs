//! Browsing state for one tenant's Drive folder: breadcrumbs, the current
//! listing, debounced subtree search and tracked uploads.

mod state;

pub use state::*;

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex, MutexGuard,
};

use tracing::{debug, warn};

use crate::{
    error::{DriveError, Result},
    google_drive::{recursive_search, AuthRedirect, DriveClient, DriveFolder, DriveItem},
    types::UploadSource,
};

pub struct DriveViewer {
    client: Arc<DriveClient>,
    config: ViewerConfig,
    state: Mutex<ViewState>,
    // bumped by every navigation; a listing lands only if still the latest
    nav_generation: AtomicU64,
    search_generation: AtomicU64,
    next_upload_id: AtomicU64,
}

impl DriveViewer {
    pub fn new(client: Arc<DriveClient>, config: ViewerConfig) -> Self {
        let root = Breadcrumb {
            id: config.root_folder_id.clone(),
            name: config.root_name.clone(),
        };

        Self {
            client,
            config,
            state: Mutex::new(ViewState::new(root)),
            nav_generation: AtomicU64::new(0),
            search_generation: AtomicU64::new(0),
            next_upload_id: AtomicU64::new(1),
        }
    }

    fn state(&self) -> MutexGuard<'_, ViewState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn root(&self) -> Breadcrumb {
        Breadcrumb {
            id: self.config.root_folder_id.clone(),
            name: self.config.root_name.clone(),
        }
    }

    pub fn snapshot(&self) -> ViewState {
        self.state().clone()
    }

    pub fn phase(&self) -> ViewerPhase {
        self.state().phase()
    }

    pub fn sign_in(&self, return_url: &str) -> Result<AuthRedirect> {
        self.client.tokens().start_auth(return_url)
    }

    /// Finishes the OAuth redirect and lands on the root folder.
    pub async fn complete_sign_in(&self, code: &str, state: &str) -> Result<Option<String>> {
        let return_url = self
            .client
            .tokens()
            .handle_callback(code, state)
            .await
            .map_err(|e| self.fail(e))?;
        self.open().await?;
        Ok(return_url)
    }

    pub fn sign_out(&self) -> Result<()> {
        self.client.tokens().sign_out()?;
        self.reset_to_unauthenticated(None);
        Ok(())
    }

    pub async fn open(&self) -> Result<()> {
        self.navigate(vec![self.root()]).await
    }

    pub async fn enter_folder(&self, folder: &DriveFolder) -> Result<()> {
        let mut crumbs = self.state().breadcrumbs.clone();
        crumbs.push(Breadcrumb::from(folder));
        self.navigate(crumbs).await
    }

    /// Index 0 is the root.
    pub async fn go_to_breadcrumb(&self, index: usize) -> Result<()> {
        let mut crumbs = self.state().breadcrumbs.clone();
        if index >= crumbs.len() {
            return Err(DriveError::NotFound(format!("no breadcrumb at position {index}")));
        }
        crumbs.truncate(index + 1);
        self.navigate(crumbs).await
    }

    /// Re-lists the current folder.
    pub async fn refresh(&self) -> Result<()> {
        let crumbs = self.state().breadcrumbs.clone();
        self.navigate(crumbs).await
    }

    async fn navigate(&self, crumbs: Vec<Breadcrumb>) -> Result<()> {
        let generation = self.nav_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let folder_id = match crumbs.last() {
            Some(c) => c.id.clone(),
            None => self.config.root_folder_id.clone(),
        };

        let listing = self
            .client
            .list_files_in_folder(&folder_id)
            .await
            .map_err(|e| self.fail(e))?;

        if self.nav_generation.load(Ordering::SeqCst) != generation {
            debug!(folder_id = %folder_id, "dropping listing of a folder the user already left");
            return Ok(());
        }

        let mut state = self.state();
        state.authenticated = true;
        state.breadcrumbs = crumbs;
        state.listing = listing;
        state.error = None;
        Ok(())
    }

    /// Debounced search of the whole tree below the configured root,
    /// regardless of the folder being viewed. An empty term clears it.
    pub async fn search(&self, term: &str) -> Result<SearchOutcome> {
        let generation = self.search_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let term = term.trim().to_string();

        if term.is_empty() {
            self.state().search = None;
            return Ok(SearchOutcome::Cleared);
        }

        tokio::time::sleep(self.config.search_debounce).await;
        if self.search_generation.load(Ordering::SeqCst) != generation {
            return Ok(SearchOutcome::Superseded);
        }

        let results = recursive_search(
            self.client.as_ref(),
            &self.config.root_folder_id,
            &term,
            self.config.search_limits,
        )
        .await
        .map_err(|e| self.fail(e))?;

        if self.search_generation.load(Ordering::SeqCst) != generation {
            return Ok(SearchOutcome::Superseded);
        }

        let mut state = self.state();
        state.search = Some(SearchView {
            term,
            results: results.clone(),
        });
        state.error = None;
        Ok(SearchOutcome::Completed(results))
    }

    /// Uploads into the current folder and re-lists it afterwards.
    pub async fn upload<F>(&self, source: &UploadSource, mut on_progress: F) -> Result<DriveItem>
    where
        F: FnMut(u8),
    {
        let id = self.next_upload_id.fetch_add(1, Ordering::SeqCst);
        let folder_id = {
            let mut state = self.state();
            state.uploads.push(UploadTask {
                id,
                file_name: source.name.clone(),
                progress: 0,
                status: UploadStatus::Pending,
            });
            state
                .current_folder()
                .map(|c| c.id.clone())
                .unwrap_or_else(|| self.config.root_folder_id.clone())
        };

        let result = self
            .client
            .upload_file(source, &folder_id, |p| {
                if let Some(t) = self.state().upload_mut(id) {
                    t.status = UploadStatus::Uploading;
                    t.progress = t.progress.max(p);
                }
                on_progress(p);
            })
            .await;

        match result {
            Ok(item) => {
                if let Some(t) = self.state().upload_mut(id) {
                    t.status = UploadStatus::Success;
                    t.progress = 100;
                }
                self.refresh().await?;
                Ok(item)
            }
            Err(e) => {
                if let Some(t) = self.state().upload_mut(id) {
                    t.status = UploadStatus::Error(e.user_message());
                }
                Err(self.fail(e))
            }
        }
    }

    /// Drops finished upload rows, as closing the upload panel does.
    pub fn clear_finished_uploads(&self) {
        self.state().uploads.retain(|t| !t.is_finished());
    }

    pub async fn create_folder(&self, name: &str) -> Result<DriveFolder> {
        let parent = self
            .state()
            .current_folder()
            .map(|c| c.id.clone())
            .unwrap_or_else(|| self.config.root_folder_id.clone());

        let folder = self
            .client
            .create_folder(name, &parent)
            .await
            .map_err(|e| self.fail(e))?;
        self.refresh().await?;
        Ok(folder)
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        self.client.delete_file(id).await.map_err(|e| self.fail(e))?;
        self.refresh().await
    }

    /// Records the error for display. Authentication failures also drop the
    /// cached tokens and return the viewer to the signed-out state.
    fn fail(&self, e: DriveError) -> DriveError {
        if e.requires_reauth() {
            if let Err(clear_err) = self.client.tokens().clear() {
                warn!(error = %clear_err, "could not clear cached tokens");
            }
            self.reset_to_unauthenticated(Some(e.user_message()));
        } else {
            self.state().error = Some(e.user_message());
        }
        e
    }

    fn reset_to_unauthenticated(&self, message: Option<String>) {
        let root = self.root();
        let mut state = self.state();
        let uploads = std::mem::take(&mut state.uploads);
        *state = ViewState::new(root);
        state.uploads = uploads;
        state.error = message;
    }
}
