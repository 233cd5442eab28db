//! Merge/transcode engine backed by ffmpeg.
//!
//! Argument contract:
//! - merge: video stream copied, audio re-encoded to the configured codec
//! - remux: single progressive file into the delivery container, same rules
//! - audio extraction: video stripped, audio encoded to the extraction codec
//!
//! ffmpeg runs with `-progress pipe:1`; `out_time_us` lines are mapped onto
//! the input duration from ffprobe. stderr is kept as a bounded tail for the
//! error and never shown to the user.

use std::collections::VecDeque;
use std::ffi::OsString;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::core::config::TranscodeSettings;
use crate::download::catalog::{FormatDescriptor, StreamKind};
use crate::download::error::TranscodeError;
use crate::download::progress::ProgressFn;

/// Lines of ffmpeg stderr kept for diagnostics.
const STDERR_TAIL_LINES: usize = 20;

/// What has to happen between download and upload for a selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscodePlan {
    /// Downloaded file is delivered as is.
    Direct,
    Remux,
    Merge,
    ExtractAudio,
}

impl TranscodePlan {
    /// Chooses the plan for the selected formats. The first entry is the
    /// user's pick; a second entry is the audio track paired with it.
    pub fn for_selection(selected: &[FormatDescriptor], settings: &TranscodeSettings) -> Self {
        match selected {
            [video, _audio] if video.kind == StreamKind::VideoOnly => TranscodePlan::Merge,
            [only, ..] if only.kind == StreamKind::AudioOnly => TranscodePlan::ExtractAudio,
            [only, ..] if only.container.eq_ignore_ascii_case(&settings.output_container) => TranscodePlan::Direct,
            _ => TranscodePlan::Remux,
        }
    }

    /// Extension of the delivered file.
    pub fn output_container<'a>(&self, settings: &'a TranscodeSettings) -> &'a str {
        match self {
            TranscodePlan::ExtractAudio => &settings.extract_audio_container,
            TranscodePlan::Direct | TranscodePlan::Remux | TranscodePlan::Merge => &settings.output_container,
        }
    }

    /// Builds the job from downloaded inputs (in selection order).
    /// `None` for [`TranscodePlan::Direct`] or when inputs are missing.
    pub fn job(&self, inputs: &[PathBuf], output: PathBuf) -> Option<TranscodeJob> {
        match (self, inputs) {
            (TranscodePlan::Direct, _) => None,
            (TranscodePlan::Merge, [video, audio, ..]) => Some(TranscodeJob::Merge {
                video: video.clone(),
                audio: audio.clone(),
                output,
            }),
            (TranscodePlan::Remux, [input, ..]) => Some(TranscodeJob::Remux {
                input: input.clone(),
                output,
            }),
            (TranscodePlan::ExtractAudio, [input, ..]) => Some(TranscodeJob::ExtractAudio {
                input: input.clone(),
                output,
            }),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscodeJob {
    Merge { video: PathBuf, audio: PathBuf, output: PathBuf },
    Remux { input: PathBuf, output: PathBuf },
    ExtractAudio { input: PathBuf, output: PathBuf },
}

impl TranscodeJob {
    pub fn output(&self) -> &Path {
        match self {
            TranscodeJob::Merge { output, .. }
            | TranscodeJob::Remux { output, .. }
            | TranscodeJob::ExtractAudio { output, .. } => output,
        }
    }

    /// Input whose duration drives progress.
    pub fn primary_input(&self) -> &Path {
        match self {
            TranscodeJob::Merge { video, .. } => video,
            TranscodeJob::Remux { input, .. } | TranscodeJob::ExtractAudio { input, .. } => input,
        }
    }
}

/// Blocking transcoder; call it from a worker.
pub trait Transcoder: Send + Sync {
    /// Runs `job`; `progress` gets `(done, total)` in microseconds of media time.
    fn transcode(&self, job: &TranscodeJob, progress: ProgressFn<'_>) -> Result<PathBuf, TranscodeError>;
}

#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    settings: TranscodeSettings,
}

impl FfmpegTranscoder {
    pub fn new(settings: TranscodeSettings) -> Self {
        Self { settings }
    }

    pub fn build_args(&self, job: &TranscodeJob) -> Vec<OsString> {
        let s = &self.settings;
        let mut args: Vec<OsString> = ["-hide_banner", "-nostats", "-loglevel", "error", "-y", "-progress", "pipe:1"]
            .iter()
            .map(OsString::from)
            .collect();

        match job {
            TranscodeJob::Merge { video, audio, .. } => {
                args.extend([OsString::from("-i"), video.into(), "-i".into(), audio.into()]);
                push_all(
                    &mut args,
                    &[
                        "-map",
                        "0:v:0",
                        "-map",
                        "1:a:0",
                        "-c:v",
                        "copy",
                        "-c:a",
                        s.audio_codec.as_str(),
                        "-b:a",
                        s.audio_bitrate.as_str(),
                    ],
                );
            }
            TranscodeJob::Remux { input, .. } => {
                args.extend([OsString::from("-i"), input.into()]);
                push_all(
                    &mut args,
                    &[
                        "-map",
                        "0:v:0",
                        "-map",
                        "0:a?",
                        "-c:v",
                        "copy",
                        "-c:a",
                        s.audio_codec.as_str(),
                        "-b:a",
                        s.audio_bitrate.as_str(),
                    ],
                );
            }
            TranscodeJob::ExtractAudio { input, .. } => {
                args.extend([OsString::from("-i"), input.into()]);
                push_all(
                    &mut args,
                    &["-vn", "-c:a", s.extract_audio_codec.as_str(), "-b:a", s.extract_audio_bitrate.as_str()],
                );
            }
        }

        if is_mp4_family(job.output()) {
            push_all(&mut args, &["-movflags", "+faststart"]);
        }
        args.push(job.output().into());
        args
    }

    /// Media duration in microseconds, if ffprobe can tell.
    fn probe_duration_us(&self, input: &Path) -> Option<u64> {
        let output = Command::new(&self.settings.ffprobe_bin)
            .args(["-v", "error", "-show_entries", "format=duration", "-of", "default=noprint_wrappers=1:nokey=1"])
            .arg(input)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| log::debug!("ffprobe unavailable: {}", e))
            .ok()?;

        if !output.status.success() {
            return None;
        }
        let seconds: f64 = String::from_utf8_lossy(&output.stdout).trim().parse().ok()?;
        (seconds.is_finite() && seconds > 0.0).then(|| (seconds * 1_000_000.0) as u64)
    }
}

impl Transcoder for FfmpegTranscoder {
    fn transcode(&self, job: &TranscodeJob, progress: ProgressFn<'_>) -> Result<PathBuf, TranscodeError> {
        let total_us = self.probe_duration_us(job.primary_input());
        progress(0, total_us);

        log::info!("🎬 Running {} for {}", self.settings.ffmpeg_bin, job.output().display());

        let mut child = Command::new(&self.settings.ffmpeg_bin)
            .args(self.build_args(job))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| TranscodeError::Spawn {
                program: self.settings.ffmpeg_bin.clone(),
                source,
            })?;

        let stderr = child.stderr.take();
        let stderr_reader = std::thread::spawn(move || stderr.map(collect_tail).unwrap_or_default());

        if let Some(stdout) = child.stdout.take() {
            for line in BufReader::new(stdout).lines().map_while(Result::ok) {
                if let Some(done_us) = parse_progress_line(&line) {
                    progress(done_us, total_us);
                }
            }
        }

        let status = child.wait()?;
        let diagnostics = stderr_reader.join().unwrap_or_default();

        if !status.success() {
            log::error!("ffmpeg failed ({}): {}", status, diagnostics);
            return Err(TranscodeError::Failed {
                code: status.code(),
                stderr: diagnostics,
            });
        }

        let output = job.output();
        if !output.exists() {
            return Err(TranscodeError::MissingOutput(output.to_path_buf()));
        }
        Ok(output.to_path_buf())
    }
}

fn push_all(args: &mut Vec<OsString>, items: &[&str]) {
    args.extend(items.iter().map(OsString::from));
}

fn is_mp4_family(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| matches!(e.to_ascii_lowercase().as_str(), "mp4" | "m4a" | "mov"))
}

/// Parses `out_time_us=` (or the identically scaled `out_time_ms=`) from
/// ffmpeg's `-progress` output.
pub fn parse_progress_line(line: &str) -> Option<u64> {
    let (key, value) = line.trim().split_once('=')?;
    match key {
        "out_time_us" | "out_time_ms" => value.trim().parse().ok(),
        _ => None,
    }
}

fn collect_tail(stream: impl Read) -> String {
    let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
    for line in BufReader::new(stream).lines().map_while(Result::ok) {
        if tail.len() == STDERR_TAIL_LINES {
            tail.pop_front();
        }
        tail.push_back(line);
    }
    tail.into_iter().collect::<Vec<_>>().join("\n")
}
