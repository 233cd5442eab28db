//! Process execution utilities with timeout support
//!
//! Used for the short-lived helper binaries (yt-dlp lookups, ffprobe
//! queries) that must never hang a chat handler.

use std::process::Output;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;

/// Default timeout for ffprobe metadata queries (30 seconds)
pub const FFPROBE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} timed out after {}s", .timeout.as_secs())]
    Timeout { program: String, timeout: Duration },
}

/// Run an async Command with a timeout.
///
/// The child is killed when the timeout elapses.
pub async fn run_with_timeout(cmd: &mut Command, timeout: Duration) -> Result<Output, ProcessError> {
    let program = cmd.as_std().get_program().to_string_lossy().into_owned();
    cmd.kill_on_drop(true);

    match tokio::time::timeout(timeout, cmd.output()).await {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(source)) => Err(ProcessError::Spawn { program, source }),
        Err(_) => Err(ProcessError::Timeout { program, timeout }),
    }
}

/// Returns true when `program -version`-style probing succeeds.
pub async fn is_runnable(program: &str, version_flag: &str) -> bool {
    let mut cmd = Command::new(program);
    cmd.arg(version_flag);
    matches!(run_with_timeout(&mut cmd, Duration::from_secs(10)).await, Ok(out) if out.status.success())
}
