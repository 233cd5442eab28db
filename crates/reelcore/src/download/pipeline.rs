//! Session state machine.
//!
//! Chat events enter through [`Orchestrator::handle_request`] and
//! [`Orchestrator::handle_selection`]. An accepted selection spawns exactly
//! one pipeline task per session, which runs
//! `Downloading → Transcoding → Uploading → Done | Failed`.
//!
//! The pipeline task is the only place that talks to the chat transport
//! during a run. Transfers and transcodes run on the [`WorkerPool`] and send
//! progress back over a channel; the task waits on that channel and on the
//! job handle at the same time and turns updates into message edits.

use futures_util::FutureExt;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;

use crate::chat::{delete_quietly, hint_quietly, text, ChatAction, ChatId, ChatTransport, KeyboardButton, MessageRef};
use crate::core::config::{Settings, TranscodeSettings};
use crate::core::error::TransportError;
use crate::core::retry::{retry_on_rate_limit, RetryPolicy};
use crate::download::catalog::{CatalogPolicy, FormatCatalog, FormatDescriptor, StreamKind, StreamLookup};
use crate::download::error::{CatalogError, DeliveryError, PipelineError, SelectionError, WorkerError};
use crate::download::progress::{latest_update, ProgressSink, ProgressUpdate, StatusMessage};
use crate::download::transcode::{TranscodeJob, TranscodePlan, Transcoder};
use crate::download::transfer::TransferEngine;
use crate::download::worker::WorkerPool;
use crate::session::{Created, Phase, Session, SessionId, SessionStore, StoreError, WorkingFiles};

/// Payload of a format button: `"{nonce}:{index}"`, index starting at 1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionToken {
    pub nonce: String,
    pub index: usize,
}

impl SelectionToken {
    pub fn encode(nonce: &str, index: usize) -> String {
        format!("{}:{}", nonce, index)
    }

    pub fn parse(data: &str) -> Result<Self, SelectionError> {
        let malformed = || SelectionError::Malformed(data.to_string());
        let (nonce, index) = data.split_once(':').ok_or_else(malformed)?;
        if nonce.is_empty() {
            return Err(malformed());
        }
        let index = index.trim().parse().map_err(|_| malformed())?;
        Ok(Self {
            nonce: nonce.to_string(),
            index,
        })
    }
}

/// Result of a URL request.
#[derive(Debug)]
pub enum RequestOutcome {
    /// Keyboard shown, session waiting for a pick.
    AwaitingSelection { formats: usize },
    /// A run is in progress for this chat; nothing was created.
    Busy { phase: Phase },
    /// Lookup failed; the user was told, no session exists.
    Rejected(CatalogError),
    /// The format list could not be sent.
    Undelivered(TransportError),
}

/// Result of an accepted selection event.
#[derive(Debug)]
pub enum Selection {
    /// Pipeline spawned; the handle resolves to the terminal phase.
    Started(JoinHandle<Phase>),
    /// A run already owns the session; the event was dropped.
    Ignored { phase: Phase },
}

/// The collaborators an orchestrator drives.
pub struct PipelineParts {
    pub transport: Arc<dyn ChatTransport>,
    pub lookup: Arc<dyn StreamLookup>,
    pub transfer: Arc<dyn TransferEngine>,
    pub transcoder: Arc<dyn Transcoder>,
}

#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    transport: Arc<dyn ChatTransport>,
    catalog: FormatCatalog,
    transfer: Arc<dyn TransferEngine>,
    transcoder: Arc<dyn Transcoder>,
    store: SessionStore,
    workers: WorkerPool,
    transcode: TranscodeSettings,
    work_dir: PathBuf,
    delivery_retry: RetryPolicy,
    progress_retry: RetryPolicy,
}

/// Everything a pipeline run needs, taken out of the session at acceptance.
#[derive(Debug)]
struct Run {
    id: SessionId,
    nonce: String,
    selected: Vec<FormatDescriptor>,
    title: Option<String>,
    keyboard: Option<MessageRef>,
}

enum Decision {
    Accepted(Run),
    Ignored(Phase),
}

impl Orchestrator {
    pub fn new(settings: &Settings, parts: PipelineParts) -> Self {
        let delivery_retry = RetryPolicy::from_settings(&settings.pipeline);
        // Progress edits get one retry; after that the update is dropped.
        let progress_retry = RetryPolicy {
            max_retries: delivery_retry.max_retries.min(1),
            ..delivery_retry
        };

        Self {
            inner: Arc::new(Inner {
                transport: parts.transport,
                catalog: FormatCatalog::new(parts.lookup, CatalogPolicy::from(&settings.catalog)),
                transfer: parts.transfer,
                transcoder: parts.transcoder,
                store: SessionStore::new(),
                workers: WorkerPool::new(settings.pipeline.worker_limit),
                transcode: settings.transcode.clone(),
                work_dir: settings.pipeline.work_dir.clone(),
                delivery_retry,
                progress_retry,
            }),
        }
    }

    pub fn store(&self) -> &SessionStore {
        &self.inner.store
    }

    fn transport(&self) -> &dyn ChatTransport {
        &*self.inner.transport
    }

    /// Handles a URL sent by the user: resolves formats and shows the
    /// selection keyboard.
    ///
    /// `source` is the user's own message, removed to keep the chat tidy.
    pub async fn handle_request(&self, chat: ChatId, url: &str, source: Option<MessageRef>) -> RequestOutcome {
        let id = SessionId::for_chat(chat);
        let transport = self.transport();

        if let Some(phase) = self.inner.store.phase(id).filter(|p| p.is_in_flight()) {
            log::info!("{} is busy ({}), refusing new request", id, phase);
            self.say(chat, text::BUSY).await;
            return RequestOutcome::Busy { phase };
        }

        if let Some(message) = source {
            delete_quietly(transport, self.inner.progress_retry, message).await;
        }

        let mut status = StatusMessage::new(chat, self.inner.progress_retry);
        status.show(transport, text::PROCESSING).await;
        hint_quietly(transport, self.inner.progress_retry, chat, ChatAction::Typing).await;

        let catalog = match self.inner.catalog.resolve(url).await {
            Ok(catalog) => catalog,
            Err(e) => {
                log::warn!("Catalog lookup failed for {}: {}", id, e);
                status.replace_with(transport, e.user_message()).await;
                return RequestOutcome::Rejected(e);
            }
        };

        let session = Session::awaiting_selection(id, catalog);
        let nonce = session.nonce.clone();
        let buttons: Vec<KeyboardButton> = session
            .candidates
            .iter()
            .enumerate()
            .map(|(i, format)| KeyboardButton::new(format.button_text(), SelectionToken::encode(&nonce, i + 1)))
            .collect();

        match self.inner.store.create(session) {
            Ok(Created::Fresh) => {}
            Ok(Created::Replaced(old)) => {
                log::info!("Replacing pending format list of {}", id);
                if let Some(keyboard) = old.keyboard {
                    delete_quietly(transport, self.inner.progress_retry, keyboard).await;
                }
            }
            Err(StoreError::Busy { phase }) => {
                status.replace_with(transport, text::BUSY).await;
                return RequestOutcome::Busy { phase };
            }
        }

        status.retire(transport).await;

        let sent = retry_on_rate_limit(self.inner.delivery_retry, "format keyboard", || {
            transport.send_keyboard(chat, text::SELECT_FORMAT, &buttons)
        })
        .await;

        match sent {
            Ok(keyboard) => {
                let attached = self
                    .inner
                    .store
                    .update(id, |s| {
                        let ours = s.nonce == nonce && s.phase == Phase::AwaitingSelection;
                        if ours {
                            s.keyboard = Some(keyboard);
                        }
                        ours
                    })
                    .unwrap_or(false);
                if !attached {
                    delete_quietly(transport, self.inner.progress_retry, keyboard).await;
                }
                RequestOutcome::AwaitingSelection { formats: buttons.len() }
            }
            Err(e) => {
                log::error!("Could not show formats to {}: {}", id, e);
                self.inner.store.evict_if(id, |s| s.nonce == nonce);
                self.say(chat, text::FAILED).await;
                RequestOutcome::Undelivered(e)
            }
        }
    }

    /// Handles a tap on a format button.
    ///
    /// Only a session in `AwaitingSelection` accepts; while a run is in
    /// progress taps are ignored. Invalid or stale taps get an error
    /// message and leave the session untouched.
    pub async fn handle_selection(&self, chat: ChatId, data: &str) -> Result<Selection, SelectionError> {
        let id = SessionId::for_chat(chat);

        let decision = SelectionToken::parse(data).and_then(|token| {
            self.inner
                .store
                .update(id, |session| accept(session, &token))
                .unwrap_or(Err(SelectionError::NoSession))
        });

        match decision {
            Ok(Decision::Ignored(phase)) => {
                log::debug!("Ignoring selection for {} in {}", id, phase);
                Ok(Selection::Ignored { phase })
            }
            Ok(Decision::Accepted(run)) => {
                log::info!(
                    "▶️ {} selected {}",
                    id,
                    run.selected.iter().map(FormatDescriptor::label).collect::<Vec<_>>().join(" + ")
                );
                let this = self.clone();
                Ok(Selection::Started(tokio::spawn(async move { this.run_pipeline(run).await })))
            }
            Err(e) => {
                log::info!("Rejected selection {:?} for {}: {}", data, id, e);
                self.say(chat, e.user_message()).await;
                Err(e)
            }
        }
    }

    async fn run_pipeline(self, run: Run) -> Phase {
        let id = run.id;
        let transport = self.transport();
        let started = Instant::now();

        if let Some(keyboard) = run.keyboard {
            delete_quietly(transport, self.inner.progress_retry, keyboard).await;
        }

        let mut status = StatusMessage::new(id.chat(), self.inner.progress_retry);
        let result = AssertUnwindSafe(self.execute(&run, &mut status))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(WorkerError::Panicked(panic_message(panic.as_ref())).into()));

        let terminal = if result.is_ok() { Phase::Done } else { Phase::Failed };
        let (last_phase, files) = self
            .inner
            .store
            .update(id, |s| {
                let last = std::mem::replace(&mut s.phase, terminal);
                (last, std::mem::take(&mut s.working_files))
            })
            .unwrap_or((Phase::Idle, WorkingFiles::default()));

        self.cleanup(id, files).await;

        match &result {
            Ok(()) => {
                status.retire(transport).await;
                log::info!("✅ {} delivered in {:.1}s", id, started.elapsed().as_secs_f64());
            }
            Err(e) => {
                log::error!("❌ {} failed during {} ({}): {}", id, last_phase, e.kind(), e);
                status.replace_with(transport, text::FAILED).await;
            }
        }

        // A new link may already have replaced this session once it left
        // the in-flight phases.
        if self.inner.store.evict_if(id, |s| s.nonce == run.nonce).is_none() {
            log::debug!("{} was replaced before its run finished, keeping the new session", id);
        }
        terminal
    }

    async fn execute(&self, run: &Run, status: &mut StatusMessage) -> Result<(), PipelineError> {
        let id = run.id;
        let chat = id.chat();
        let transport = self.transport();

        fs_err::tokio::create_dir_all(&self.inner.work_dir)
            .await
            .map_err(PipelineError::WorkDir)?;

        hint_quietly(transport, self.inner.progress_retry, chat, ChatAction::Typing).await;
        let merging = run.selected.len() > 1;
        let mut inputs = Vec::with_capacity(run.selected.len());
        for format in &run.selected {
            let (role, stage) = match format.kind {
                StreamKind::VideoOnly => ("video", text::DOWNLOADING_VIDEO),
                StreamKind::AudioOnly if merging => ("audio", text::DOWNLOADING_AUDIO),
                StreamKind::AudioOnly => ("audio", text::DOWNLOADING),
                StreamKind::Progressive => ("source", text::DOWNLOADING),
            };
            let dest = self.working_path(id, role, &format.container);
            self.register(id, &dest)?;
            inputs.push(self.transfer(id, format.clone(), dest, status, stage).await?);
        }

        let plan = TranscodePlan::for_selection(&run.selected, &self.inner.transcode);
        let output = self.working_path(id, "output", plan.output_container(&self.inner.transcode));
        let deliverable = match plan.job(&inputs, output) {
            Some(job) => {
                self.enter(id, Phase::Transcoding)?;
                self.register(id, job.output())?;
                hint_quietly(transport, self.inner.progress_retry, chat, ChatAction::Typing).await;
                self.transcode(id, job, status).await?
            }
            None => inputs.first().cloned().ok_or(PipelineError::NothingToDeliver)?,
        };

        self.enter(id, Phase::Uploading)?;
        hint_quietly(transport, self.inner.progress_retry, chat, ChatAction::UploadDocument).await;
        self.show(id, status, text::UPLOADING).await;

        let caption = run.title.as_deref();
        let policy = self.inner.delivery_retry;
        match retry_on_rate_limit(policy, "document upload", || {
            transport.send_document(chat, &deliverable, caption)
        })
        .await
        {
            Ok(_) => Ok(()),
            Err(TransportError::RetryAfter(_)) => Err(DeliveryError::RateLimited {
                attempts: policy.max_attempts(),
            }
            .into()),
            Err(e) => Err(DeliveryError::Rejected(e).into()),
        }
    }

    async fn transfer(
        &self,
        id: SessionId,
        format: FormatDescriptor,
        dest: PathBuf,
        status: &mut StatusMessage,
        stage: &str,
    ) -> Result<PathBuf, PipelineError> {
        self.show(id, status, &ProgressUpdate::Indeterminate.render(stage)).await;

        let (mut sink, mut updates) = ProgressSink::channel();
        let engine = Arc::clone(&self.inner.transfer);
        let job = self.inner.workers.submit(async move {
            let mut on_progress = |current: u64, total: Option<u64>| sink.report(current, total);
            let result = engine.fetch(&format, &dest, &mut on_progress).await;
            if result.is_ok() {
                sink.finish();
            }
            result
        });

        Ok(self.follow(id, job, &mut updates, status, stage).await??)
    }

    async fn transcode(
        &self,
        id: SessionId,
        job: TranscodeJob,
        status: &mut StatusMessage,
    ) -> Result<PathBuf, PipelineError> {
        self.show(id, status, &ProgressUpdate::Indeterminate.render(text::CONVERTING)).await;

        let (mut sink, mut updates) = ProgressSink::channel();
        let transcoder = Arc::clone(&self.inner.transcoder);
        let handle = self.inner.workers.submit_blocking(move || {
            let mut on_progress = |current: u64, total: Option<u64>| sink.report(current, total);
            let result = transcoder.transcode(&job, &mut on_progress);
            if result.is_ok() {
                sink.finish();
            }
            result
        });

        Ok(self.follow(id, handle, &mut updates, status, text::CONVERTING).await??)
    }

    /// Waits for a worker job while relaying its progress to the chat.
    ///
    /// Updates that piled up during a slow edit collapse into the newest
    /// one. Whatever is still queued when the job ends (normally the final
    /// 100%) is shown before returning.
    async fn follow<T>(
        &self,
        id: SessionId,
        mut job: JoinHandle<Result<T, WorkerError>>,
        updates: &mut UnboundedReceiver<ProgressUpdate>,
        status: &mut StatusMessage,
        stage: &str,
    ) -> Result<T, PipelineError> {
        loop {
            tokio::select! {
                biased;
                Some(update) = updates.recv() => {
                    let latest = latest_update(updates, update);
                    self.show(id, status, &latest.render(stage)).await;
                }
                joined = &mut job => {
                    let outcome = joined.map_err(WorkerError::from).and_then(|r| r)?;
                    if let Ok(update) = updates.try_recv() {
                        let latest = latest_update(updates, update);
                        self.show(id, status, &latest.render(stage)).await;
                    }
                    return Ok(outcome);
                }
            }
        }
    }

    async fn show(&self, id: SessionId, status: &mut StatusMessage, text: &str) {
        status.show(self.transport(), text).await;
        let handle = status.handle();
        self.inner.store.update(id, |s| s.progress = handle);
    }

    fn enter(&self, id: SessionId, phase: Phase) -> Result<(), PipelineError> {
        let previous = self
            .inner
            .store
            .update(id, |s| std::mem::replace(&mut s.phase, phase))
            .ok_or(PipelineError::SessionLost)?;
        log::debug!("{}: {} -> {}", id, previous, phase);
        Ok(())
    }

    fn register(&self, id: SessionId, path: &Path) -> Result<(), PipelineError> {
        self.inner
            .store
            .update(id, |s| {
                s.working_files.register(path);
            })
            .ok_or(PipelineError::SessionLost)
    }

    fn working_path(&self, id: SessionId, role: &str, extension: &str) -> PathBuf {
        let tag = uuid::Uuid::new_v4().simple().to_string();
        self.inner
            .work_dir
            .join(format!("{}_{}_{}.{}", id.chat(), &tag[..12], role, extension))
    }

    async fn cleanup(&self, id: SessionId, mut files: WorkingFiles) {
        if files.is_empty() {
            return;
        }
        match tokio::task::spawn_blocking(move || files.remove_all()).await {
            Ok(report) => log::debug!(
                "{}: removed {} working files ({} already gone, {} failed)",
                id,
                report.removed,
                report.missing,
                report.failed
            ),
            Err(e) => log::error!("Cleanup for {} did not run: {}", id, e),
        }
    }

    async fn say(&self, chat: ChatId, text: &str) {
        let transport = self.transport();
        if let Err(e) =
            retry_on_rate_limit(self.inner.delivery_retry, "notice", || transport.send_text(chat, text)).await
        {
            log::warn!("Could not send notice to chat {}: {}", chat, e);
        }
    }
}

/// Applies a selection to a session under its store lock.
fn accept(session: &mut Session, token: &SelectionToken) -> Result<Decision, SelectionError> {
    if session.phase.is_in_flight() {
        return Ok(Decision::Ignored(session.phase));
    }
    if session.phase != Phase::AwaitingSelection || token.nonce != session.nonce {
        return Err(SelectionError::Stale);
    }

    let len = session.candidates.len();
    let chosen = token
        .index
        .checked_sub(1)
        .and_then(|i| session.candidates.get(i))
        .cloned()
        .ok_or(SelectionError::OutOfRange {
            index: token.index,
            len,
        })?;

    let mut selected = Vec::with_capacity(2);
    if chosen.needs_audio_track() {
        let audio = session.preferred_audio.clone().ok_or(SelectionError::MissingAudio)?;
        selected.push(chosen);
        selected.push(audio);
    } else {
        selected.push(chosen);
    }

    session.selected = selected.clone();
    session.phase = Phase::Downloading;

    Ok(Decision::Accepted(Run {
        id: session.id,
        nonce: session.nonce.clone(),
        selected,
        title: session.title.clone(),
        keyboard: session.keyboard.take(),
    }))
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
