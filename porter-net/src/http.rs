// porter-net/src/http.rs
// Resumable artifact downloads.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use porter_common::error::{PorterError, Result};
use porter_common::model::Credentials;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, RANGE, USER_AGENT};
use reqwest::{Client, StatusCode};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument, warn};

use crate::validation::{is_network_error, validate_url};

const CONNECT_TIMEOUT_SECS: u64 = 30;
const READ_TIMEOUT_SECS: u64 = 60;
const USER_AGENT_STRING: &str = concat!("porter/", env!("CARGO_PKG_VERSION"));

/// Called with `(bytes_done, total_bytes)` as data arrives.
pub type ProgressFn<'a> = &'a (dyn Fn(u64, Option<u64>) + Send + Sync);

pub struct FetchRequest<'a> {
    pub url: &'a str,
    pub dest: &'a Path,
    pub credentials: Option<&'a Credentials>,
    pub expected_size: Option<u64>,
}

/// Downloads a remote artifact to a local file.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Returns the final size of `dest`. Must return `PorterError::Cancelled`
    /// promptly once `token` fires, leaving any partial data resumable.
    async fn fetch(
        &self,
        request: &FetchRequest<'_>,
        progress: ProgressFn<'_>,
        token: &CancellationToken,
    ) -> Result<u64>;
}

pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self> {
        Ok(Self {
            client: build_http_client()?,
        })
    }
}

fn build_http_client() -> Result<Client> {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_STRING));
    headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
    Client::builder()
        .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
        .read_timeout(Duration::from_secs(READ_TIMEOUT_SECS))
        .default_headers(headers)
        .redirect(reqwest::redirect::Policy::limited(10))
        .build()
        .map_err(|e| PorterError::Generic(format!("Failed to build HTTP client: {e}")))
}

/// Path of the in-progress file for `dest`.
pub fn partial_path(dest: &Path) -> PathBuf {
    let name = dest
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "download".to_string());
    dest.with_file_name(format!("{name}.part"))
}

#[async_trait]
impl Fetcher for HttpFetcher {
    #[instrument(skip_all, fields(url = %request.url))]
    async fn fetch(
        &self,
        request: &FetchRequest<'_>,
        progress: ProgressFn<'_>,
        token: &CancellationToken,
    ) -> Result<u64> {
        let mut url = validate_url(request.url)?;
        if let Some(key) = request.credentials.and_then(|c| c.download_key) {
            url.query_pairs_mut()
                .append_pair("download_key_id", &key.to_string());
        }

        if let Some(parent) = request.dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let part = partial_path(request.dest);
        let mut offset = match tokio::fs::metadata(&part).await {
            Ok(meta) => meta.len(),
            Err(_) => 0,
        };

        let mut req = self.client.get(url.clone());
        if let Some(creds) = request.credentials {
            req = req.header(AUTHORIZATION, creds.api_key.as_str());
        }
        if offset > 0 {
            debug!("Resuming download of {} at byte {}", request.url, offset);
            req = req.header(RANGE, format!("bytes={offset}-"));
        }

        let response = tokio::select! {
            r = req.send() => r.map_err(|e| network(e, request.url))?,
            _ = token.cancelled() => return Err(PorterError::Cancelled),
        };
        let status = response.status();
        debug!("Received HTTP status: {} for {}", status, request.url);

        let append = match status {
            StatusCode::PARTIAL_CONTENT => true,
            StatusCode::RANGE_NOT_SATISFIABLE if offset > 0 => {
                // Partial file is already complete (or bogus), restart.
                warn!("Server refused range for {}, restarting", request.url);
                tokio::fs::remove_file(&part).await.ok();
                return Box::pin(self.fetch(request, progress, token)).await;
            }
            s if s.is_success() => false,
            StatusCode::NOT_FOUND => {
                return Err(PorterError::NotFound(format!("{} (404)", request.url)))
            }
            s => {
                error!("HTTP error {} for URL {}", s, request.url);
                return Err(PorterError::Generic(format!(
                    "HTTP error {s} for URL {}",
                    request.url
                )));
            }
        };
        if !append {
            offset = 0;
        }

        let total = response
            .content_length()
            .map(|len| len + offset)
            .or(request.expected_size);

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .append(append)
            .truncate(!append)
            .open(&part)
            .await?;

        let mut done = offset;
        progress(done, total);
        let mut response = response;
        loop {
            let chunk = tokio::select! {
                c = response.chunk() => c.map_err(|e| network(e, request.url))?,
                _ = token.cancelled() => {
                    file.flush().await?;
                    debug!("Download cancelled at {} bytes, partial file kept", done);
                    return Err(PorterError::Cancelled);
                }
            };
            let Some(chunk) = chunk else { break };
            file.write_all(&chunk).await?;
            done += chunk.len() as u64;
            progress(done, total);
        }
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        if let Some(expected) = request.expected_size {
            if expected != done {
                tokio::fs::remove_file(&part).await.ok();
                return Err(PorterError::Validation(format!(
                    "size mismatch for {}: expected {expected} bytes, got {done}",
                    request.url
                )));
            }
        }

        tokio::fs::rename(&part, request.dest).await?;
        debug!("Downloaded {} bytes to {}", done, request.dest.display());
        Ok(done)
    }
}

fn network(err: reqwest::Error, url: &str) -> PorterError {
    let err = PorterError::from(err);
    if is_network_error(&err) {
        PorterError::NetworkDisconnected(format!("while fetching {url}: {err}"))
    } else {
        err.context(format!("fetching {url}"))
    }
}
