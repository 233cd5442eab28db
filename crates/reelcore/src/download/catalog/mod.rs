//! Format catalog: turns the raw stream list of a URL into the buttons a
//! user picks from.
//!
//! Filtering rules:
//! - only containers on the allow-list survive (video and audio lists are separate)
//! - a stream needs a direct http(s) locator and a known size
//! - video streams need a height, audio streams a bitrate
//! - streams with the same label (`720p - mp4`) collapse, first seen wins
//! - if any video-only stream survives, a preferred audio track is picked
//!   for merging: highest bitrate within the configured tier, else the
//!   lowest bitrate available

pub mod ytdlp;

use async_trait::async_trait;
use itertools::Itertools;
use serde::Deserialize;
use std::sync::Arc;
use url::Url;

use crate::core::config::CatalogSettings;
use crate::core::utils::format_size;
use crate::download::error::CatalogError;

pub use ytdlp::YtDlpLookup;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum StreamKind {
    /// Audio and video in one file.
    Progressive,
    VideoOnly,
    AudioOnly,
}

/// One selectable encoding. Immutable once the catalog is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatDescriptor {
    /// Identifier assigned by the source site.
    pub format_id: String,
    /// Lowercase container extension, e.g. `mp4`.
    pub container: String,
    pub kind: StreamKind,
    pub height: Option<u32>,
    pub bitrate_kbps: Option<u32>,
    /// Exact or approximate size in bytes.
    pub size_bytes: u64,
    /// Direct URL the transfer engine fetches.
    pub locator: String,
}

impl FormatDescriptor {
    /// Human label; also the deduplication key.
    pub fn label(&self) -> String {
        match self.kind {
            StreamKind::AudioOnly => format!("{}kbps - {}", self.bitrate_kbps.unwrap_or_default(), self.container),
            StreamKind::Progressive | StreamKind::VideoOnly => {
                format!("{}p - {}", self.height.unwrap_or_default(), self.container)
            }
        }
    }

    /// Button text: label plus human-readable size.
    pub fn button_text(&self) -> String {
        format!("{} - {}", self.label(), format_size(self.size_bytes))
    }

    pub fn needs_audio_track(&self) -> bool {
        self.kind == StreamKind::VideoOnly
    }
}

/// A stream as reported by the lookup collaborator, before any filtering.
///
/// Field names follow yt-dlp's `-J` output.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RawStream {
    #[serde(default)]
    pub format_id: String,
    pub ext: Option<String>,
    pub vcodec: Option<String>,
    pub acodec: Option<String>,
    pub height: Option<u32>,
    pub abr: Option<f64>,
    pub tbr: Option<f64>,
    pub filesize: Option<f64>,
    pub filesize_approx: Option<f64>,
    pub url: Option<String>,
    pub protocol: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RawCatalog {
    pub title: Option<String>,
    #[serde(default)]
    pub formats: Vec<RawStream>,
}

/// Result of a successful lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct Catalog {
    pub title: Option<String>,
    /// Presented candidates in button order.
    pub formats: Vec<FormatDescriptor>,
    /// Audio track merged into video-only picks.
    pub preferred_audio: Option<FormatDescriptor>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogPolicy {
    pub video_containers: Vec<String>,
    pub audio_containers: Vec<String>,
    pub preferred_audio_kbps: u32,
}

impl From<&CatalogSettings> for CatalogPolicy {
    fn from(settings: &CatalogSettings) -> Self {
        let lower = |list: &[String]| list.iter().map(|c| c.to_ascii_lowercase()).collect();
        Self {
            video_containers: lower(&settings.video_containers),
            audio_containers: lower(&settings.audio_containers),
            preferred_audio_kbps: settings.preferred_audio_kbps,
        }
    }
}

/// The external stream lookup.
#[async_trait]
pub trait StreamLookup: Send + Sync {
    async fn lookup(&self, url: &Url) -> Result<RawCatalog, CatalogError>;
}

/// Wraps a [`StreamLookup`] with URL validation and the filtering policy.
#[derive(Clone)]
pub struct FormatCatalog {
    lookup: Arc<dyn StreamLookup>,
    policy: CatalogPolicy,
}

impl FormatCatalog {
    pub fn new(lookup: Arc<dyn StreamLookup>, policy: CatalogPolicy) -> Self {
        Self { lookup, policy }
    }

    pub async fn resolve(&self, input: &str) -> Result<Catalog, CatalogError> {
        let url = parse_source_url(input)?;
        let raw = self.lookup.lookup(&url).await?;
        let catalog = normalize(raw, &self.policy)?;
        log::info!(
            "Resolved {} formats for {} (preferred audio: {})",
            catalog.formats.len(),
            url,
            catalog.preferred_audio.as_ref().map_or_else(|| "none".to_string(), FormatDescriptor::label)
        );
        Ok(catalog)
    }
}

/// Accepts only absolute http(s) URLs.
pub fn parse_source_url(input: &str) -> Result<Url, CatalogError> {
    let url = Url::parse(input.trim()).map_err(|e| CatalogError::InvalidUrl(format!("{}: {}", input, e)))?;
    match url.scheme() {
        "http" | "https" if url.host_str().is_some() => Ok(url),
        _ => Err(CatalogError::InvalidUrl(input.to_string())),
    }
}

/// Applies the catalog policy to a raw lookup result.
pub fn normalize(raw: RawCatalog, policy: &CatalogPolicy) -> Result<Catalog, CatalogError> {
    let described: Vec<FormatDescriptor> = raw.formats.into_iter().filter_map(|s| describe(s, policy)).collect();

    let (audio, video): (Vec<_>, Vec<_>) = described.into_iter().partition(|f| f.kind == StreamKind::AudioOnly);

    let preferred_audio = if video.iter().any(FormatDescriptor::needs_audio_track) {
        pick_preferred_audio(&audio, policy.preferred_audio_kbps)
    } else {
        None
    };

    let formats: Vec<FormatDescriptor> = video
        .into_iter()
        .chain(audio)
        // Video-only entries are useless without a track to merge with.
        .filter(|f| !f.needs_audio_track() || preferred_audio.is_some())
        .unique_by(FormatDescriptor::label)
        .collect();

    if formats.is_empty() {
        return Err(CatalogError::NoFormats);
    }

    Ok(Catalog {
        title: raw.title.filter(|t| !t.trim().is_empty()),
        formats,
        preferred_audio,
    })
}

fn describe(stream: RawStream, policy: &CatalogPolicy) -> Option<FormatDescriptor> {
    let container = stream.ext.as_deref()?.to_ascii_lowercase();

    let has = |codec: &Option<String>| codec.as_deref() != Some("none");
    let kind = match (has(&stream.vcodec), has(&stream.acodec)) {
        (true, true) => StreamKind::Progressive,
        (true, false) => StreamKind::VideoOnly,
        (false, true) => StreamKind::AudioOnly,
        (false, false) => return None,
    };

    let allowed = match kind {
        StreamKind::AudioOnly => &policy.audio_containers,
        StreamKind::Progressive | StreamKind::VideoOnly => &policy.video_containers,
    };
    if !allowed.contains(&container) {
        return None;
    }

    let locator = stream.url.filter(|u| !u.is_empty())?;
    let direct = match stream.protocol.as_deref() {
        None => locator.starts_with("http://") || locator.starts_with("https://"),
        Some(p) => p == "http" || p == "https",
    };
    if !direct {
        return None;
    }

    let size_bytes = stream
        .filesize
        .or(stream.filesize_approx)
        .filter(|s| s.is_finite() && *s >= 1.0)
        .map(|s| s as u64)?;

    let bitrate_kbps = stream
        .abr
        .or(stream.tbr)
        .filter(|b| b.is_finite() && *b > 0.0)
        .map(|b| b.round() as u32);

    match kind {
        StreamKind::AudioOnly if bitrate_kbps.is_none() => return None,
        StreamKind::Progressive | StreamKind::VideoOnly if stream.height.unwrap_or_default() == 0 => return None,
        _ => {}
    }

    Some(FormatDescriptor {
        format_id: stream.format_id,
        container,
        kind,
        height: stream.height,
        bitrate_kbps,
        size_bytes,
        locator,
    })
}

fn pick_preferred_audio(audio: &[FormatDescriptor], tier_kbps: u32) -> Option<FormatDescriptor> {
    let bitrate = |f: &&FormatDescriptor| f.bitrate_kbps.unwrap_or_default();

    audio
        .iter()
        .filter(|f| bitrate(f) <= tier_kbps)
        .max_by_key(bitrate)
        .or_else(|| audio.iter().min_by_key(bitrate))
        .cloned()
}
