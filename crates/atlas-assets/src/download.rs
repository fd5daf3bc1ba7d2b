//! Streaming HTTP downloads.
//!
//! The response body is written to disk chunk by chunk; cancellation is
//! checked between chunks and while waiting on the network.

use std::path::Path;
use std::time::{Duration, Instant};

use futures::StreamExt;
use reqwest::Client;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use atlas_types::DownloadSettings;

use crate::error::DownloadError;
use crate::progress::{DownloadProgress, ProgressTracker};

/// Build the process-wide HTTP client.
///
/// Sets the identifying User-Agent and the overall/connect timeouts.
pub fn build_http_client(settings: &DownloadSettings) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(settings.user_agent.clone())
        .timeout(Duration::from_secs(settings.timeout_secs))
        .connect_timeout(Duration::from_secs(settings.connect_timeout_secs))
        .build()
}

/// Downloads single resources to local files.
#[derive(Debug, Clone)]
pub struct Downloader {
    client: Client,
    progress_interval: Duration,
    buffer_size: usize,
}

impl Downloader {
    /// Create a downloader sharing an existing client.
    pub fn new(client: Client, settings: &DownloadSettings) -> Self {
        Self {
            client,
            progress_interval: Duration::from_millis(settings.progress_interval_ms),
            buffer_size: settings.chunk_size.max(1),
        }
    }

    /// Create a downloader with its own client.
    pub fn from_settings(settings: &DownloadSettings) -> Result<Self, DownloadError> {
        Ok(Self::new(build_http_client(settings)?, settings))
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Download `url` to `destination`, returning the number of bytes written.
    ///
    /// `on_progress` runs on the download task, in increasing byte order,
    /// at most once per progress interval plus a final call on completion.
    /// On any error the destination file is removed before returning.
    pub async fn download<F>(
        &self,
        url: &str,
        destination: &Path,
        mut on_progress: F,
        ct: &CancellationToken,
    ) -> Result<u64, DownloadError>
    where
        F: FnMut(&DownloadProgress),
    {
        let display_name = display_name(destination);
        let result = self
            .stream_to_file(url, destination, &display_name, &mut on_progress, ct)
            .await;

        match &result {
            Ok(bytes) => {
                info!(url, file = %display_name, bytes, "Download complete");
            }
            Err(DownloadError::Cancelled) => {
                debug!(url, file = %display_name, "Download cancelled");
                remove_partial_file(destination).await;
            }
            Err(e) => {
                warn!(url, file = %display_name, error = %e, "Download failed");
                remove_partial_file(destination).await;
            }
        }

        result
    }

    async fn stream_to_file<F>(
        &self,
        url: &str,
        destination: &Path,
        display_name: &str,
        on_progress: &mut F,
        ct: &CancellationToken,
    ) -> Result<u64, DownloadError>
    where
        F: FnMut(&DownloadProgress),
    {
        if ct.is_cancelled() {
            return Err(DownloadError::Cancelled);
        }

        debug!(url, "Requesting");
        let response = tokio::select! {
            biased;
            _ = ct.cancelled() => return Err(DownloadError::Cancelled),
            response = self.client.get(url).send() => response?,
        };

        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let total_bytes = response.content_length();
        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = tokio::fs::File::create(destination).await?;
        let mut writer = BufWriter::with_capacity(self.buffer_size, file);

        let mut tracker = ProgressTracker::new(display_name, total_bytes, self.progress_interval);
        let mut body = response.bytes_stream();

        loop {
            let next = tokio::select! {
                biased;
                _ = ct.cancelled() => return Err(DownloadError::Cancelled),
                next = body.next() => next,
            };
            let Some(chunk) = next else { break };
            let chunk = chunk?;

            writer.write_all(&chunk).await?;
            if ct.is_cancelled() {
                return Err(DownloadError::Cancelled);
            }

            if let Some(update) = tracker.record(chunk.len() as u64, Instant::now()) {
                on_progress(&update);
            }
        }

        writer.flush().await?;
        writer.get_mut().sync_all().await?;

        let received = tracker.bytes_received();
        if let Some(expected) = total_bytes {
            if received != expected {
                return Err(DownloadError::Incomplete { expected, received });
            }
        }

        if let Some(update) = tracker.finish(Instant::now()) {
            on_progress(&update);
        }

        Ok(received)
    }
}

/// Name shown in progress updates; staging suffixes are hidden.
fn display_name(destination: &Path) -> String {
    let name = destination
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    match name.strip_suffix(".part") {
        Some(stripped) => stripped.to_string(),
        None => name,
    }
}

async fn remove_partial_file(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = ?path, "Removed partial download"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = ?path, error = %e, "Failed to remove partial download"),
    }
}
