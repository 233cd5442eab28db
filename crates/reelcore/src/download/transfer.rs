//! Transfer engine: fetches one selected stream into a local file.
//!
//! Partial files never survive an error; the destination is removed before
//! the error is returned.

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;

use crate::download::catalog::FormatDescriptor;
use crate::download::error::TransferError;
use crate::download::progress::ProgressFn;

#[async_trait]
pub trait TransferEngine: Send + Sync {
    /// Downloads `format` to `dest` and returns the written path.
    ///
    /// `progress` receives `(bytes_so_far, total)`; `total` is `None` until
    /// the size is known.
    async fn fetch(&self, format: &FormatDescriptor, dest: &Path, progress: ProgressFn<'_>)
        -> Result<PathBuf, TransferError>;
}

/// Streams a direct URL over HTTP.
#[derive(Debug, Clone)]
pub struct HttpTransfer {
    client: Client,
}

impl HttpTransfer {
    pub fn new() -> Result<Self, TransferError> {
        let client = Client::builder()
            .user_agent("Mozilla/5.0 (compatible; reelbot/0.3)")
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(TransferError::Network)?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    async fn stream_to_file(
        &self,
        format: &FormatDescriptor,
        dest: &Path,
        progress: ProgressFn<'_>,
    ) -> Result<PathBuf, TransferError> {
        let response = self
            .client
            .get(&format.locator)
            .send()
            .await
            .map_err(TransferError::Network)?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransferError::Status(status.as_u16()));
        }

        let total = response.content_length().filter(|len| *len > 0);
        progress(0, total);

        let mut file = fs_err::tokio::File::create(dest).await?;
        let mut received: u64 = 0;
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|source| TransferError::Interrupted { received, source })?;
            file.write_all(&chunk).await?;
            received += chunk.len() as u64;
            progress(received, total);
        }

        file.flush().await?;

        if let Some(expected) = total {
            if received < expected {
                return Err(TransferError::Truncated { received, expected });
            }
        }

        log::debug!("Fetched {} bytes of format {} to {}", received, format.format_id, dest.display());
        Ok(dest.to_path_buf())
    }
}

#[async_trait]
impl TransferEngine for HttpTransfer {
    async fn fetch(
        &self,
        format: &FormatDescriptor,
        dest: &Path,
        progress: ProgressFn<'_>,
    ) -> Result<PathBuf, TransferError> {
        log::info!("📥 Fetching format {} ({}) -> {}", format.format_id, format.label(), dest.display());

        let result = self.stream_to_file(format, dest, progress).await;
        if let Err(e) = &result {
            log::warn!("Transfer of format {} failed: {}", format.format_id, e);
            discard_partial(dest).await;
        }
        result
    }
}

/// Removes a partially written file. A file that was never created is fine.
pub async fn discard_partial(path: &Path) {
    match fs_err::tokio::remove_file(path).await {
        Ok(()) => log::debug!("Removed partial file {}", path.display()),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => log::warn!("Failed to remove partial file: {}", e),
    }
}
