//! Runtime settings.
//!
//! Layered with figment, later layers win:
//! 1. built-in defaults
//! 2. an optional TOML file (`reelbot.toml` unless overridden)
//! 3. `REELBOT_`-prefixed environment variables, `__` separating sections,
//!    e.g. `REELBOT_PIPELINE__WORKER_LIMIT=4`
//!
//! The bot credential is deliberately not part of [`Settings`]; the binary
//! reads it straight from the environment into a secret wrapper.

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::core::error::ConfigError;

/// Config file looked up in the working directory when none is given.
pub const DEFAULT_CONFIG_FILE: &str = "reelbot.toml";

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "REELBOT_";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub catalog: CatalogSettings,
    pub transcode: TranscodeSettings,
    pub pipeline: PipelineSettings,
    pub transport: TransportSettings,
    pub log: LogSettings,
}

/// Stream lookup and format filtering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogSettings {
    pub ytdlp_bin: String,
    pub lookup_timeout_secs: u64,
    /// Containers offered for video streams.
    pub video_containers: Vec<String>,
    /// Containers accepted for audio-only streams.
    pub audio_containers: Vec<String>,
    /// Target tier for the preferred audio track paired with video-only picks.
    pub preferred_audio_kbps: u32,
}

impl Default for CatalogSettings {
    fn default() -> Self {
        Self {
            ytdlp_bin: "yt-dlp".to_string(),
            lookup_timeout_secs: 60,
            video_containers: vec!["mp4".to_string(), "mkv".to_string()],
            audio_containers: vec!["m4a".to_string(), "webm".to_string()],
            preferred_audio_kbps: 160,
        }
    }
}

impl CatalogSettings {
    pub fn lookup_timeout(&self) -> Duration {
        Duration::from_secs(self.lookup_timeout_secs)
    }
}

/// Arguments handed to ffmpeg.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscodeSettings {
    pub ffmpeg_bin: String,
    pub ffprobe_bin: String,
    pub audio_codec: String,
    pub audio_bitrate: String,
    pub extract_audio_codec: String,
    pub extract_audio_bitrate: String,
    pub extract_audio_container: String,
    /// Container delivered to the chat; progressive streams already in it skip transcoding.
    pub output_container: String,
}

impl Default for TranscodeSettings {
    fn default() -> Self {
        Self {
            ffmpeg_bin: "ffmpeg".to_string(),
            ffprobe_bin: "ffprobe".to_string(),
            audio_codec: "aac".to_string(),
            audio_bitrate: "192k".to_string(),
            extract_audio_codec: "libmp3lame".to_string(),
            extract_audio_bitrate: "192k".to_string(),
            extract_audio_container: "mp3".to_string(),
            output_container: "mp4".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// Maximum number of transfer/transcode jobs running at once, across all sessions.
    pub worker_limit: usize,
    /// Directory for per-session working files.
    pub work_dir: PathBuf,
    /// How many times a rate-limited chat call is retried before giving up.
    pub rate_limit_retries: u32,
    /// Extra wait added on top of the transport's retry-after hint.
    pub retry_margin_ms: u64,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            worker_limit: 2,
            work_dir: std::env::temp_dir().join("reelbot"),
            rate_limit_retries: 3,
            retry_margin_ms: 1000,
        }
    }
}

impl PipelineSettings {
    pub fn retry_margin(&self) -> Duration {
        Duration::from_millis(self.retry_margin_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportSettings {
    pub request_timeout_secs: u64,
    /// Document uploads can be large, so they get their own deadline.
    pub upload_timeout_secs: u64,
    /// Custom Bot API server, e.g. a local `telegram-bot-api` instance.
    pub api_url: Option<String>,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            request_timeout_secs: 30,
            upload_timeout_secs: 900,
            api_url: None,
        }
    }
}

impl TransportSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn upload_timeout(&self) -> Duration {
        Duration::from_secs(self.upload_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    /// Filter directive used when `RUST_LOG` is not set.
    pub level: String,
    pub file: Option<PathBuf>,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

impl Settings {
    /// Loads settings from defaults, the TOML file at `path` (or
    /// [`DEFAULT_CONFIG_FILE`]) and the environment.
    ///
    /// A missing TOML file is not an error.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

        let settings: Settings = Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(file))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pipeline.worker_limit == 0 {
            return Err(ConfigError::Invalid("pipeline.worker_limit must be at least 1".to_string()));
        }
        if self.catalog.video_containers.is_empty() {
            return Err(ConfigError::Invalid(
                "catalog.video_containers must list at least one container".to_string(),
            ));
        }
        if !self
            .catalog
            .video_containers
            .iter()
            .any(|c| c.eq_ignore_ascii_case(&self.transcode.output_container))
        {
            return Err(ConfigError::Invalid(format!(
                "transcode.output_container '{}' is not in catalog.video_containers",
                self.transcode.output_container
            )));
        }
        Ok(())
    }
}
