use bytes::Bytes;
use reqwest::{header::*, Client, StatusCode};
use tracing::debug;

use super::DriveFile;
use crate::{
    error::{DriveError, Result},
    google_drive::{
        oauth::TokenManager,
        res::Res,
        utils::{parse_range_header, percent},
    },
};

/// Files smaller than this go up in a single multipart request.
pub const MULTIPART_LIMIT: u64 = 5 * 1024 * 1024;

// 256 KB, the granularity Drive requires for every non-final chunk
pub const CHUNK_SIZE: u64 = 256 * 1024;

// consecutive chunks the server may acknowledge without the offset advancing
const MAX_STALLS: u32 = 3;

#[derive(Debug)]
pub enum ChunkOutcome {
    Incomplete,
    Complete(DriveFile),
}

/// An open resumable upload session. Chunks go out strictly in order, each
/// one starting where the previous `308` said the server stopped.
pub struct ResumableUpload<'a> {
    http: &'a Client,
    tokens: &'a TokenManager,
    session_url: String,
    data: Bytes,
    sent: u64,
}

impl<'a> ResumableUpload<'a> {
    pub fn new(http: &'a Client, tokens: &'a TokenManager, session_url: String, data: Bytes) -> Self {
        Self {
            http,
            tokens,
            session_url,
            data,
            sent: 0,
        }
    }

    pub fn total(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn sent(&self) -> u64 {
        self.sent
    }

    pub async fn send_chunk(&mut self) -> Result<ChunkOutcome> {
        let total = self.total();
        let range_start = self.sent.min(total);
        let range_end = (range_start + CHUNK_SIZE).min(total);
        let chunk = self.data.slice(range_start as usize..range_end as usize);

        let content_range = if chunk.is_empty() {
            format!("bytes */{total}")
        } else {
            format!("bytes {}-{}/{total}", range_start, range_end - 1)
        };
        debug!(%content_range, "sending upload chunk");

        let res = self
            .http
            .put(&self.session_url)
            .header(AUTHORIZATION, self.tokens.auth_header().await?)
            .header(CONTENT_LENGTH, chunk.len())
            .header(CONTENT_RANGE, content_range)
            .body(chunk)
            .send()
            .await?;

        if res.status() == StatusCode::PERMANENT_REDIRECT {
            // no Range header means the server kept nothing
            self.sent = match res.headers().get(RANGE) {
                None => 0,
                Some(range) => {
                    let range = range
                        .to_str()
                        .map_err(|e| DriveError::UploadFailed(format!("unreadable Range header: {e}")))?;
                    let (_, end) = parse_range_header(range)
                        .map_err(|e| DriveError::UploadFailed(e.to_string()))?;
                    end + 1
                }
            };
            return Ok(ChunkOutcome::Incomplete);
        }

        match Res::from(res).json::<DriveFile>().await {
            Ok(f) => {
                self.sent = total;
                Ok(ChunkOutcome::Complete(f))
            }
            Err(e @ DriveError::AuthRequired(_)) => Err(e),
            Err(e) => Err(DriveError::UploadFailed(e.to_string())),
        }
    }

    /// Sends chunks until the server reports completion. Progress is
    /// reported as non-decreasing percentages and ends with 100.
    pub async fn run<F>(mut self, mut on_progress: F) -> Result<DriveFile>
    where
        F: FnMut(u8),
    {
        let mut reported = 0u8;
        let mut stalls = 0u32;
        on_progress(reported);

        loop {
            let before = self.sent;
            match self.send_chunk().await? {
                ChunkOutcome::Complete(f) => {
                    on_progress(100);
                    return Ok(f);
                }
                ChunkOutcome::Incomplete => {
                    if self.sent <= before {
                        stalls += 1;
                        if stalls >= MAX_STALLS {
                            return Err(DriveError::UploadFailed(format!(
                                "upload stopped progressing at byte {} of {}",
                                self.sent,
                                self.total()
                            )));
                        }
                    } else {
                        stalls = 0;
                    }

                    // 100 is reserved for the completing response
                    let p = percent(self.sent, self.total()).min(99);
                    if p > reported {
                        reported = p;
                        on_progress(p);
                    }
                }
            }
        }
    }
}
