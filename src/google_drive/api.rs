use std::{collections::HashSet, sync::Arc};

use async_stream::try_stream;
use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, TryStreamExt};
use rand::{distributions::Alphanumeric, Rng};
use reqwest::{header::*, redirect, Client};
use tokio_util::compat::FuturesAsyncReadCompatExt;
use tracing::{debug, info};

use super::{
    oauth::TokenManager,
    res::Res,
    search::FolderLister,
    types::*,
    utils::{escape_query, IntoIOErr},
};
use crate::{
    error::{DriveError, Result},
    types::{BoxedAsyncRead, UploadSource},
};

const NAME_SEARCH_LIMIT: usize = 10;
const FOLDER_PAGE_SIZE: u32 = 20;
const LIST_PAGE_SIZE: u32 = 1000;

lazy_static::lazy_static! {
    static ref GET_FIELDS: String = DriveFile::fields().join(",");
    static ref LIST_FIELDS: String = format!("nextPageToken,files({})", GET_FIELDS.as_str());
    static ref FOLDER_FILTER: String = format!("mimeType='{FOLDER}' and trashed=false");
}

struct FileQuery<'a> {
    q: String,
    page_size: u32,
    page_token: Option<&'a str>,
    order_by: &'a str,
}

/// Drive v3 REST client. Every call authenticates through the shared token manager.
pub struct DriveClient {
    http: Client,
    endpoints: DriveEndpoints,
    tokens: Arc<TokenManager>,
}

impl DriveClient {
    pub fn new(tokens: Arc<TokenManager>) -> Self {
        Self::with_endpoints(tokens, DriveEndpoints::default())
    }

    pub fn with_endpoints(tokens: Arc<TokenManager>, endpoints: DriveEndpoints) -> Self {
        // a resumable upload answers `308` without a Location, never follow it
        let http = Client::builder()
            .redirect(redirect::Policy::none())
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            http,
            endpoints,
            tokens,
        }
    }

    pub fn tokens(&self) -> &Arc<TokenManager> {
        &self.tokens
    }

    async fn query_files(&self, query: FileQuery<'_>) -> Result<ListResponse> {
        debug!(q = %query.q, "querying drive files");

        let page_size = query.page_size.to_string();
        let mut params = vec![
            ("q", query.q.as_str()),
            ("fields", LIST_FIELDS.as_str()),
            ("pageSize", page_size.as_str()),
            ("orderBy", query.order_by),
            ("supportsAllDrives", "true"),
            ("includeItemsFromAllDrives", "true"),
        ];
        if let Some(t) = query.page_token {
            params.push(("pageToken", t));
        }

        let res = self
            .http
            .get(self.endpoints.files())
            .query(&params)
            .header(AUTHORIZATION, self.tokens.auth_header().await?)
            .send()
            .await?;

        Res::from(res).json::<ListResponse>().await
    }

    async fn get_meta(&self, id: &str) -> Result<DriveFile> {
        let res = self
            .http
            .get(self.endpoints.file(id))
            .query(&[("fields", GET_FIELDS.as_str()), ("supportsAllDrives", "true")])
            .header(AUTHORIZATION, self.tokens.auth_header().await?)
            .send()
            .await?;

        Res::from(res).json::<DriveFile>().await
    }

    /// Folders named exactly `name` first, then folders whose name merely
    /// contains it. No duplicates, at most ten.
    pub async fn search_folders_by_name(&self, name: &str) -> Result<Vec<DriveFolder>> {
        let escaped = escape_query(name);

        let exact = self.query_files(FileQuery {
            q: format!("name = '{escaped}' and {}", FOLDER_FILTER.as_str()),
            page_size: NAME_SEARCH_LIMIT as u32,
            page_token: None,
            order_by: "name",
        });
        let partial = self.query_files(FileQuery {
            q: format!("name contains '{escaped}' and {}", FOLDER_FILTER.as_str()),
            page_size: NAME_SEARCH_LIMIT as u32,
            page_token: None,
            order_by: "name",
        });
        let (exact, partial) = futures::try_join!(exact, partial)?;

        let mut seen = HashSet::new();
        let folders = exact
            .files
            .into_iter()
            .chain(partial.files)
            .filter(|f| seen.insert(f.id.clone()))
            .take(NAME_SEARCH_LIMIT)
            .map(DriveFolder::from)
            .collect();

        Ok(folders)
    }

    /// One page of folders whose name contains `term`. An empty term lists every folder.
    pub async fn search_all_folders(
        &self,
        term: &str,
        page_token: Option<&str>,
    ) -> Result<FolderPage> {
        let term = term.trim();
        let q = if term.is_empty() {
            FOLDER_FILTER.to_string()
        } else {
            format!("name contains '{}' and {}", escape_query(term), FOLDER_FILTER.as_str())
        };

        let res = self
            .query_files(FileQuery {
                q,
                page_size: FOLDER_PAGE_SIZE,
                page_token,
                order_by: "name",
            })
            .await?;

        Ok(FolderPage {
            folders: res.files.into_iter().map(DriveFolder::from).collect(),
            next_page_token: res.next_page_token,
        })
    }

    /// Every page of [`DriveClient::search_all_folders`], one folder at a time.
    pub fn folder_search_stream<'a>(
        &'a self,
        term: &'a str,
    ) -> impl Stream<Item = Result<DriveFolder>> + 'a {
        let mut next_page_token: Option<String> = None;

        try_stream! {
            loop {
                let page = self.search_all_folders(term, next_page_token.as_deref()).await?;

                for f in page.folders.into_iter() {
                    yield f;
                }

                match page.next_page_token {
                    None => break,
                    Some(t) => next_page_token = Some(t),
                };
            }
        }
    }

    pub async fn list_files_in_folder(&self, folder_id: &str) -> Result<FolderListing> {
        let res = self
            .query_files(FileQuery {
                q: format!("'{}' in parents and trashed=false", escape_query(folder_id)),
                page_size: LIST_PAGE_SIZE,
                page_token: None,
                order_by: "folder,name",
            })
            .await?;

        Ok(FolderListing::partition(res.files))
    }

    pub async fn get_folder_info(&self, folder_id: &str) -> Result<DriveFolder> {
        let f = self.get_meta(folder_id).await?;
        if !f.is_folder() {
            return Err(DriveError::NotFound(format!("{} is not a folder", f.name)));
        }
        Ok(f.into())
    }

    pub async fn get_file(&self, id: &str) -> Result<DriveItem> {
        self.get_meta(id).await.map(DriveItem::from)
    }

    pub async fn create_folder(&self, name: &str, parent_id: &str) -> Result<DriveFolder> {
        let res = self
            .http
            .post(self.endpoints.files())
            .query(&[("fields", GET_FIELDS.as_str()), ("supportsAllDrives", "true")])
            .header(AUTHORIZATION, self.tokens.auth_header().await?)
            .json(&serde_json::json!({
                "name": name,
                "parents": [parent_id],
                "mimeType": FOLDER,
            }))
            .send()
            .await?;

        let f = Res::from(res).json::<DriveFile>().await?;
        info!(id = %f.id, name, "created folder");
        Ok(f.into())
    }

    pub async fn rename(&self, id: &str, new_name: &str) -> Result<DriveItem> {
        let res = self
            .http
            .patch(self.endpoints.file(id))
            .query(&[("fields", GET_FIELDS.as_str()), ("supportsAllDrives", "true")])
            .header(AUTHORIZATION, self.tokens.auth_header().await?)
            .json(&serde_json::json!({ "name": new_name }))
            .send()
            .await?;

        let f = Res::from(res).json::<DriveFile>().await?;
        info!(id, new_name, "renamed");
        Ok(f.into())
    }

    pub async fn delete_file(&self, id: &str) -> Result<()> {
        let res = self
            .http
            .delete(self.endpoints.file(id))
            .query(&[("supportsAllDrives", "true")])
            .header(AUTHORIZATION, self.tokens.auth_header().await?)
            .send()
            .await?;

        Res::from(res).empty().await?;
        info!(id, "deleted");
        Ok(())
    }

    pub async fn download_file(&self, id: &str) -> Result<Bytes> {
        let res = self
            .http
            .get(self.endpoints.file(id))
            .query(&[("alt", "media"), ("supportsAllDrives", "true")])
            .header(AUTHORIZATION, self.tokens.auth_header().await?)
            .send()
            .await?;

        let bytes = Res::from(res).checked().await?.bytes().await?;
        debug!(id, len = bytes.len(), "downloaded");
        Ok(bytes)
    }

    /// Streams the file content instead of buffering it.
    pub async fn open_reader(&self, id: &str) -> Result<BoxedAsyncRead<'static>> {
        let res = self
            .http
            .get(self.endpoints.file(id))
            .query(&[("alt", "media"), ("supportsAllDrives", "true")])
            .header(AUTHORIZATION, self.tokens.auth_header().await?)
            .send()
            .await?;

        let s = Res::from(res)
            .checked()
            .await?
            .bytes_stream()
            .map_err(|e| e.into_io_err())
            .into_async_read()
            .compat();

        Ok(Box::pin(s))
    }

    /// Multipart below [`MULTIPART_LIMIT`], resumable in [`CHUNK_SIZE`] chunks otherwise.
    pub async fn upload_file<F>(
        &self,
        source: &UploadSource,
        folder_id: &str,
        on_progress: F,
    ) -> Result<DriveItem>
    where
        F: FnMut(u8),
    {
        let f = if source.size() < MULTIPART_LIMIT {
            self.upload_multipart(source, folder_id, on_progress).await?
        } else {
            let session = self.start_resumable(source, folder_id).await?;
            session.run(on_progress).await?
        };

        info!(id = %f.id, name = %f.name, size = source.size(), "uploaded");
        Ok(f.into())
    }

    async fn upload_multipart<F>(
        &self,
        source: &UploadSource,
        folder_id: &str,
        mut on_progress: F,
    ) -> Result<DriveFile>
    where
        F: FnMut(u8),
    {
        let boundary: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(24)
            .map(char::from)
            .collect();
        let metadata = serde_json::json!({
            "name": source.name,
            "parents": [folder_id],
            "mimeType": source.mime_type,
        });

        let mut body = Vec::with_capacity(source.data.len() + 512);
        body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
        body.extend_from_slice(b"Content-Type: application/json; charset=UTF-8\r\n\r\n");
        body.extend_from_slice(metadata.to_string().as_bytes());
        body.extend_from_slice(format!("\r\n--{boundary}\r\n").as_bytes());
        body.extend_from_slice(format!("Content-Type: {}\r\n\r\n", source.mime_type).as_bytes());
        body.extend_from_slice(&source.data);
        body.extend_from_slice(format!("\r\n--{boundary}--").as_bytes());

        let res = self
            .http
            .post(self.endpoints.upload())
            .query(&[
                ("uploadType", "multipart"),
                ("fields", GET_FIELDS.as_str()),
                ("supportsAllDrives", "true"),
            ])
            .header(AUTHORIZATION, self.tokens.auth_header().await?)
            .header(CONTENT_TYPE, format!("multipart/related; boundary={boundary}"))
            .body(body)
            .send()
            .await?;

        let f = Res::from(res).json::<DriveFile>().await?;
        on_progress(100);
        Ok(f)
    }

    async fn start_resumable(
        &self,
        source: &UploadSource,
        folder_id: &str,
    ) -> Result<ResumableUpload<'_>> {
        let res = self
            .http
            .post(self.endpoints.upload())
            .query(&[
                ("uploadType", "resumable"),
                ("fields", GET_FIELDS.as_str()),
                ("supportsAllDrives", "true"),
            ])
            .header(AUTHORIZATION, self.tokens.auth_header().await?)
            .header("X-Upload-Content-Type", source.mime_type.as_str())
            .header("X-Upload-Content-Length", source.size())
            .json(&serde_json::json!({
                "name": source.name,
                "parents": [folder_id],
                "mimeType": source.mime_type,
            }))
            .send()
            .await?;

        let session_url = Res::from(res)
            .checked()
            .await?
            .headers()
            .get(LOCATION)
            .ok_or_else(|| {
                DriveError::UploadFailed("unexpected response with no `Location` header".into())
            })?
            .to_str()
            .map_err(|e| DriveError::UploadFailed(format!("unreadable `Location` header: {e}")))?
            .to_owned();

        debug!(name = %source.name, size = source.size(), "resumable session opened");
        Ok(ResumableUpload::new(
            &self.http,
            &self.tokens,
            session_url,
            source.data.clone(),
        ))
    }
}

#[async_trait]
impl FolderLister for DriveClient {
    async fn list_children(&self, folder_id: &str) -> Result<FolderListing> {
        self.list_files_in_folder(folder_id).await
    }
}
