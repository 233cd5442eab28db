//! Test doubles for the pipeline: an in-memory chat, a scripted stream
//! lookup, and transfer/transcode engines that write small files.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio::sync::Notify;
use url::Url;

use reelcore::chat::{ChatAction, ChatId, ChatTransport, KeyboardButton, MessageRef};
use reelcore::core::error::TransportError;
use reelcore::download::catalog::{RawCatalog, RawStream};
use reelcore::download::error::{CatalogError, TranscodeError, TransferError};
use reelcore::download::progress::ProgressFn;
use reelcore::download::{FormatDescriptor, StreamLookup, TranscodeJob, Transcoder, TransferEngine};
use reelcore::{Orchestrator, PipelineParts, Settings};

pub const CHAT: ChatId = ChatId(42);
pub const URL: &str = "https://videos.example.com/watch?v=abc";

// ----------------------------------------------------------------------------
// Chat transport
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Text { message: MessageRef, text: String },
    Keyboard { message: MessageRef, text: String, buttons: Vec<KeyboardButton> },
    Edit { message: MessageRef, text: String },
    Delete(MessageRef),
    Action(ChatAction),
    Document { path: PathBuf, caption: Option<String>, bytes: Option<Vec<u8>> },
}

/// Pauses the first delete that follows an upload until released.
pub struct DeleteGate {
    pub reached: Arc<Notify>,
    pub release: Arc<Notify>,
}

/// Records every outbound call. Message ids start at 100.
#[derive(Default)]
pub struct MockTransport {
    calls: Mutex<Vec<Call>>,
    next_id: AtomicI32,
    document_failures: Mutex<VecDeque<TransportError>>,
    /// Each entry fails the first edit whose text starts with the prefix.
    edit_failures: Mutex<Vec<(String, TransportError)>>,
    delete_failures: Mutex<VecDeque<TransportError>>,
    delete_gate: Mutex<Option<DeleteGate>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            next_id: AtomicI32::new(100),
            ..Self::default()
        }
    }

    /// Queues an error for the next upload attempt.
    pub fn fail_document_with(&self, error: TransportError) {
        self.document_failures.lock().unwrap().push_back(error);
    }

    /// Fails the next edit whose text starts with `prefix`, once.
    pub fn fail_edit_with(&self, prefix: &str, error: TransportError) {
        self.edit_failures.lock().unwrap().push((prefix.to_string(), error));
    }

    /// Queues an error for the next delete.
    pub fn fail_delete_with(&self, error: TransportError) {
        self.delete_failures.lock().unwrap().push_back(error);
    }

    /// Holds the first delete after an upload. Returns the gate's handles.
    pub fn hold_delete_after_upload(&self) -> (Arc<Notify>, Arc<Notify>) {
        let reached = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        *self.delete_gate.lock().unwrap() = Some(DeleteGate {
            reached: reached.clone(),
            release: release.clone(),
        });
        (reached, release)
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// Texts of sent messages and edits, in order.
    pub fn shown_texts(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Text { text, .. } | Call::Edit { text, .. } => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn last_keyboard(&self) -> Option<(MessageRef, Vec<KeyboardButton>)> {
        self.calls().into_iter().rev().find_map(|c| match c {
            Call::Keyboard { message, buttons, .. } => Some((message, buttons)),
            _ => None,
        })
    }

    pub fn documents(&self) -> Vec<(PathBuf, Option<String>, Option<Vec<u8>>)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Document { path, caption, bytes } => Some((path, caption, bytes)),
                _ => None,
            })
            .collect()
    }

    /// Plain messages sent, without edits.
    pub fn sent_texts(&self) -> Vec<(MessageRef, String)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Text { message, text } => Some((message, text)),
                _ => None,
            })
            .collect()
    }

    pub fn deleted(&self) -> Vec<MessageRef> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Delete(message) => Some(message),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    fn next_message(&self, chat: ChatId) -> MessageRef {
        MessageRef::new(chat, self.next_id.fetch_add(1, Ordering::SeqCst))
    }
}

#[async_trait]
impl ChatTransport for MockTransport {
    async fn send_text(&self, chat: ChatId, text: &str) -> Result<MessageRef, TransportError> {
        let message = self.next_message(chat);
        self.record(Call::Text {
            message,
            text: text.to_string(),
        });
        Ok(message)
    }

    async fn send_keyboard(
        &self,
        chat: ChatId,
        text: &str,
        buttons: &[KeyboardButton],
    ) -> Result<MessageRef, TransportError> {
        let message = self.next_message(chat);
        self.record(Call::Keyboard {
            message,
            text: text.to_string(),
            buttons: buttons.to_vec(),
        });
        Ok(message)
    }

    async fn edit_text(&self, message: MessageRef, text: &str) -> Result<(), TransportError> {
        self.record(Call::Edit {
            message,
            text: text.to_string(),
        });
        let scripted = {
            let mut failures = self.edit_failures.lock().unwrap();
            let hit = failures.iter().position(|(prefix, _)| text.starts_with(prefix.as_str()));
            hit.map(|i| failures.remove(i).1)
        };
        match scripted {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn delete_message(&self, message: MessageRef) -> Result<(), TransportError> {
        let uploaded = self.calls().iter().any(|c| matches!(c, Call::Document { .. }));
        let gate = if uploaded { self.delete_gate.lock().unwrap().take() } else { None };
        if let Some(gate) = gate {
            gate.reached.notify_one();
            gate.release.notified().await;
        }

        self.record(Call::Delete(message));
        let scripted = self.delete_failures.lock().unwrap().pop_front();
        match scripted {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn send_chat_action(&self, _chat: ChatId, action: ChatAction) -> Result<(), TransportError> {
        self.record(Call::Action(action));
        Ok(())
    }

    async fn send_document(
        &self,
        chat: ChatId,
        path: &Path,
        caption: Option<&str>,
    ) -> Result<MessageRef, TransportError> {
        self.record(Call::Document {
            path: path.to_path_buf(),
            caption: caption.map(str::to_string),
            bytes: std::fs::read(path).ok(),
        });
        let scripted = self.document_failures.lock().unwrap().pop_front();
        match scripted {
            Some(error) => Err(error),
            None => Ok(self.next_message(chat)),
        }
    }
}

// ----------------------------------------------------------------------------
// Stream lookup
// ----------------------------------------------------------------------------

pub struct ScriptedLookup {
    result: Result<RawCatalog, String>,
    calls: AtomicUsize,
}

impl ScriptedLookup {
    pub fn new(result: Result<RawCatalog, String>) -> Self {
        Self {
            result,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StreamLookup for ScriptedLookup {
    async fn lookup(&self, _url: &Url) -> Result<RawCatalog, CatalogError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.result.clone().map_err(CatalogError::Lookup)
    }
}

pub fn catalog(streams: Vec<RawStream>) -> RawCatalog {
    RawCatalog {
        title: Some("Clip".to_string()),
        formats: streams,
    }
}

pub fn raw_progressive(id: &str, height: u32, size: u64) -> RawStream {
    RawStream {
        format_id: id.to_string(),
        ext: Some("mp4".to_string()),
        vcodec: Some("avc1".to_string()),
        acodec: Some("mp4a.40.2".to_string()),
        height: Some(height),
        tbr: Some(800.0),
        filesize: Some(size as f64),
        url: Some(format!("https://cdn.example.com/{}", id)),
        protocol: Some("https".to_string()),
        ..RawStream::default()
    }
}

pub fn raw_video_only(id: &str, height: u32, size: u64) -> RawStream {
    RawStream {
        acodec: Some("none".to_string()),
        ..raw_progressive(id, height, size)
    }
}

pub fn raw_audio_only(id: &str, abr: f64, size: u64) -> RawStream {
    RawStream {
        format_id: id.to_string(),
        ext: Some("m4a".to_string()),
        vcodec: Some("none".to_string()),
        acodec: Some("mp4a.40.2".to_string()),
        abr: Some(abr),
        filesize: Some(size as f64),
        url: Some(format!("https://cdn.example.com/{}", id)),
        protocol: Some("https".to_string()),
        ..RawStream::default()
    }
}

// ----------------------------------------------------------------------------
// Transfer and transcode engines
// ----------------------------------------------------------------------------

pub const PAYLOAD: &[u8] = b"0123456789abcdef";
const CHUNKS: usize = 4;

/// Writes [`PAYLOAD`] in four chunks, reporting progress after each.
#[derive(Default)]
pub struct FakeTransfer {
    /// Fail with `Truncated` after this many chunks, leaving the partial file.
    fail_after_chunks: Option<usize>,
    gate: Option<Arc<Notify>>,
    fetched: Mutex<Vec<String>>,
}

impl FakeTransfer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_after(chunks: usize) -> Self {
        Self {
            fail_after_chunks: Some(chunks),
            ..Self::default()
        }
    }

    /// Every fetch waits for a notification before writing.
    pub fn gated(gate: Arc<Notify>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::default()
        }
    }

    pub fn fetched(&self) -> Vec<String> {
        self.fetched.lock().unwrap().clone()
    }
}

#[async_trait]
impl TransferEngine for FakeTransfer {
    async fn fetch(
        &self,
        format: &FormatDescriptor,
        dest: &Path,
        progress: ProgressFn<'_>,
    ) -> Result<PathBuf, TransferError> {
        self.fetched.lock().unwrap().push(format.format_id.clone());
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }

        let total = PAYLOAD.len() as u64;
        let chunk = PAYLOAD.len() / CHUNKS;
        let mut written = Vec::new();
        for (i, piece) in PAYLOAD.chunks(chunk).enumerate() {
            if self.fail_after_chunks == Some(i) {
                return Err(TransferError::Truncated {
                    received: written.len() as u64,
                    expected: total,
                });
            }
            written.extend_from_slice(piece);
            std::fs::write(dest, &written)?;
            progress(written.len() as u64, Some(total));
        }
        Ok(dest.to_path_buf())
    }
}

#[derive(Default)]
pub struct FakeTranscoder {
    jobs: Mutex<Vec<TranscodeJob>>,
    /// Writes half an output, then exits like a crashed ffmpeg.
    crash: bool,
}

impl FakeTranscoder {
    pub fn failing() -> Self {
        Self {
            crash: true,
            ..Self::default()
        }
    }

    pub fn jobs(&self) -> Vec<TranscodeJob> {
        self.jobs.lock().unwrap().clone()
    }
}

impl Transcoder for FakeTranscoder {
    fn transcode(&self, job: &TranscodeJob, progress: ProgressFn<'_>) -> Result<PathBuf, TranscodeError> {
        self.jobs.lock().unwrap().push(job.clone());
        progress(500, Some(1000));
        if self.crash {
            std::fs::write(job.output(), b"transc")?;
            return Err(TranscodeError::Failed {
                code: Some(1),
                stderr: "Conversion failed!".to_string(),
            });
        }
        std::fs::write(job.output(), b"transcoded")?;
        progress(1000, Some(1000));
        Ok(job.output().to_path_buf())
    }
}

// ----------------------------------------------------------------------------
// Harness
// ----------------------------------------------------------------------------

pub struct Harness {
    pub orchestrator: Orchestrator,
    pub transport: Arc<MockTransport>,
    pub lookup: Arc<ScriptedLookup>,
    pub transfer: Arc<FakeTransfer>,
    pub transcoder: Arc<FakeTranscoder>,
    pub work_dir: PathBuf,
    _root: TempDir,
}

impl Harness {
    pub fn new(lookup: Result<RawCatalog, String>) -> Self {
        Self::with_transfer(lookup, FakeTransfer::new())
    }

    pub fn with_transfer(lookup: Result<RawCatalog, String>, transfer: FakeTransfer) -> Self {
        Self::with_engines(lookup, transfer, FakeTranscoder::default())
    }

    pub fn with_engines(lookup: Result<RawCatalog, String>, transfer: FakeTransfer, transcoder: FakeTranscoder) -> Self {
        let root = tempfile::tempdir().unwrap();
        let work_dir = root.path().join("work");

        let mut settings = Settings::default();
        settings.pipeline.work_dir = work_dir.clone();
        settings.pipeline.retry_margin_ms = 0;

        let transport = Arc::new(MockTransport::new());
        let lookup = Arc::new(ScriptedLookup::new(lookup));
        let transfer = Arc::new(transfer);
        let transcoder = Arc::new(transcoder);

        let orchestrator = Orchestrator::new(
            &settings,
            PipelineParts {
                transport: transport.clone(),
                lookup: lookup.clone(),
                transfer: transfer.clone(),
                transcoder: transcoder.clone(),
            },
        );

        Self {
            orchestrator,
            transport,
            lookup,
            transfer,
            transcoder,
            work_dir,
            _root: root,
        }
    }

    /// Files left in the working directory.
    pub fn leftovers(&self) -> Vec<PathBuf> {
        match std::fs::read_dir(&self.work_dir) {
            Ok(entries) => entries.filter_map(|e| e.ok()).map(|e| e.path()).collect(),
            Err(_) => Vec::new(),
        }
    }

    pub fn nonce(&self) -> Option<String> {
        self.orchestrator
            .store()
            .get(reelcore::session::SessionId::for_chat(CHAT), |s| s.nonce.clone())
    }
}
