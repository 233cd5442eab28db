//! yt-dlp as the stream lookup collaborator.
//!
//! Runs `yt-dlp -J --no-playlist <url>` and hands the `formats` array to the
//! catalog policy. Nothing is downloaded here.

use async_trait::async_trait;
use std::time::Duration;
use tokio::process::Command;
use url::Url;

use crate::core::config::CatalogSettings;
use crate::core::process::run_with_timeout;
use crate::core::utils::tail_chars;
use crate::download::catalog::{RawCatalog, StreamLookup};
use crate::download::error::CatalogError;

/// Characters of yt-dlp stderr kept in a lookup error.
const STDERR_TAIL_CHARS: usize = 600;

#[derive(Debug, Clone)]
pub struct YtDlpLookup {
    bin: String,
    timeout: Duration,
}

impl YtDlpLookup {
    pub fn new(bin: impl Into<String>, timeout: Duration) -> Self {
        Self {
            bin: bin.into(),
            timeout,
        }
    }

    pub fn from_settings(settings: &CatalogSettings) -> Self {
        Self::new(settings.ytdlp_bin.clone(), settings.lookup_timeout())
    }

    fn command(&self, url: &Url) -> Command {
        let mut cmd = Command::new(&self.bin);
        cmd.args(["-J", "--no-playlist", "--no-warnings", "--no-progress"])
            .arg(url.as_str());
        cmd
    }
}

#[async_trait]
impl StreamLookup for YtDlpLookup {
    async fn lookup(&self, url: &Url) -> Result<RawCatalog, CatalogError> {
        log::info!("Looking up formats for {}", url);

        let output = run_with_timeout(&mut self.command(url), self.timeout)
            .await
            .map_err(|e| CatalogError::Lookup(e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            log::warn!("yt-dlp lookup failed for {}: {}", url, stderr.trim());
            return Err(CatalogError::Lookup(tail_chars(stderr.trim(), STDERR_TAIL_CHARS).to_string()));
        }

        Ok(serde_json::from_slice(&output.stdout)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_arguments() {
        let lookup = YtDlpLookup::new("yt-dlp", Duration::from_secs(5));
        let url = Url::parse("https://youtu.be/abc").unwrap();
        let cmd = lookup.command(&url);
        let args: Vec<_> = cmd.as_std().get_args().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(args.first().map(String::as_str), Some("-J"));
        assert!(args.contains(&"--no-playlist".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("https://youtu.be/abc"));
    }

    #[tokio::test]
    async fn test_missing_binary_is_lookup_error() {
        let lookup = YtDlpLookup::new("reelbot-no-such-yt-dlp", Duration::from_secs(5));
        let url = Url::parse("https://youtu.be/abc").unwrap();
        assert!(matches!(lookup.lookup(&url).await, Err(CatalogError::Lookup(_))));
    }
}
