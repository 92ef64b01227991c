//! Substring search over a whole folder subtree.
//!
//! Drive has no "descendants of" query, so the tree is walked one listing at
//! a time. The walk is bounded in depth, in total folders listed, and in
//! listings in flight.

use std::{collections::HashSet, sync::Mutex};

use async_trait::async_trait;
use futures::{future::BoxFuture, FutureExt};
use serde::Serialize;
use tracing::{debug, warn};
use unwrap_or::unwrap_ok_or;

use super::types::{DriveFolder, DriveItem, FolderListing, SearchLimits};
use crate::error::{DriveError, Result};

#[async_trait]
pub trait FolderLister: Send + Sync {
    async fn list_children(&self, folder_id: &str) -> Result<FolderListing>;
}

/// Flat matches, hierarchy not preserved.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SearchResults {
    pub folders: Vec<DriveFolder>,
    pub files: Vec<DriveItem>,
}

impl SearchResults {
    pub fn is_empty(&self) -> bool {
        self.folders.is_empty() && self.files.is_empty()
    }

    pub fn len(&self) -> usize {
        self.folders.len() + self.files.len()
    }
}

struct Walk<'a, L: ?Sized> {
    lister: &'a L,
    needle: String,
    limits: SearchLimits,
    visited: Mutex<HashSet<String>>,
    found: Mutex<SearchResults>,
    root_error: Mutex<Option<DriveError>>,
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl<'a, L: FolderLister + ?Sized> Walk<'a, L> {
    fn matches(&self, name: &str) -> bool {
        name.to_lowercase().contains(&self.needle)
    }

    fn visit<'w>(&'w self, folder_id: String, depth: usize) -> BoxFuture<'w, ()> {
        async move {
            if depth >= self.limits.max_depth {
                return;
            }

            {
                let mut visited = lock(&self.visited);
                if visited.len() >= self.limits.max_folders || !visited.insert(folder_id.clone()) {
                    return;
                }
            }

            let listing = unwrap_ok_or!(self.lister.list_children(&folder_id).await, e, {
                if depth == 0 {
                    lock(&self.root_error).get_or_insert(e);
                } else {
                    warn!(folder_id = %folder_id, error = %e, "skipping folder that could not be listed");
                }
                return;
            });
            debug!(folder_id = %folder_id, depth, "searched folder");

            {
                let mut found = lock(&self.found);
                found.folders.extend(
                    listing
                        .folders
                        .iter()
                        .filter(|f| self.matches(&f.name))
                        .cloned(),
                );
                found
                    .files
                    .extend(listing.files.into_iter().filter(|f| self.matches(&f.name)));
            }

            for batch in listing.folders.chunks(self.limits.batch_size.max(1)) {
                futures::future::join_all(
                    batch.iter().map(|f| self.visit(f.id.clone(), depth + 1)),
                )
                .await;
            }
        }
        .boxed()
    }
}

/// Finds every folder and file below `root_id` whose name contains `term`,
/// ignoring case. Folders below the root that fail to list are skipped and
/// the walk goes on over their siblings; only a failed root listing is an error.
pub async fn recursive_search<L>(
    lister: &L,
    root_id: &str,
    term: &str,
    limits: SearchLimits,
) -> Result<SearchResults>
where
    L: FolderLister + ?Sized,
{
    let needle = term.trim().to_lowercase();
    if needle.is_empty() {
        return Ok(SearchResults::default());
    }

    let walk = Walk {
        lister,
        needle,
        limits,
        visited: Mutex::new(HashSet::new()),
        found: Mutex::new(SearchResults::default()),
        root_error: Mutex::new(None),
    };

    walk.visit(root_id.to_string(), 0).await;

    if let Some(e) = walk.root_error.into_inner().unwrap_or_else(|e| e.into_inner()) {
        return Err(e);
    }

    let visited = lock(&walk.visited).len();
    let mut results = walk.found.into_inner().unwrap_or_else(|e| e.into_inner());

    // an item with several parents shows up once per listing
    let mut seen = HashSet::new();
    results.folders.retain(|f| seen.insert(f.id.clone()));
    seen.clear();
    results.files.retain(|f| seen.insert(f.id.clone()));

    debug!(visited, matches = results.len(), "recursive search finished");
    Ok(results)
}
