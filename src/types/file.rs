use std::path::Path;

use anyhow::Context;
use bytes::Bytes;
use tokio::{fs, task};

const OCTET_STREAM: &str = "application/octet-stream";

/// A local file selected for upload.
#[derive(Debug, Clone)]
pub struct UploadSource {
    pub name: String,
    pub mime_type: String,
    pub data: Bytes,
}

impl UploadSource {
    pub fn new(name: &str, mime_type: &str, data: impl Into<Bytes>) -> Self {
        Self {
            name: name.to_string(),
            mime_type: mime_type.to_string(),
            data: data.into(),
        }
    }

    pub async fn from_path(path: &Path) -> anyhow::Result<Self> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .with_context(|| format!("'{}' does not name a file", path.to_string_lossy()))?;

        let data = fs::read(path)
            .await
            .with_context(|| format!("Could not read file '{}'", path.to_string_lossy()))?;

        let mime_type = get_mime(path).await.unwrap_or_else(|_| OCTET_STREAM.to_string());

        Ok(Self {
            name,
            mime_type,
            data: data.into(),
        })
    }

    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }
}

pub async fn get_mime(file: &Path) -> anyhow::Result<String> {
    let file = file.to_owned();

    task::spawn_blocking(move || {
        tree_magic_mini::from_filepath(file.as_path())
            .map(|s| s.to_string())
            .with_context(|| {
                format!(
                    "Could not get mime type for file '{}'",
                    file.to_string_lossy()
                )
            })
    })
    .await?
}
