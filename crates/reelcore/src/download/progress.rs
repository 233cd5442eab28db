//! Progress reporting: from raw byte counts on a worker to throttled message
//! edits on the chat side.
//!
//! Three pieces:
//! - [`ProgressThrottle`] decides which signals are worth showing
//! - [`ProgressSink`] runs inside the worker and ships the surviving updates
//!   over a channel
//! - [`StatusMessage`] owns the single progress message of a session and
//!   edits it from the pipeline task

use tokio::sync::mpsc;

use crate::chat::{delete_quietly, ChatId, ChatTransport, MessageRef};
use crate::core::error::TransportError;
use crate::core::retry::{retry_on_rate_limit, RetryPolicy};

/// Callback handed to the transfer and transcode engines: `(current, total)`.
pub type ProgressFn<'a> = &'a mut (dyn FnMut(u64, Option<u64>) + Send);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressUpdate {
    /// Total not known yet; show a status without a number.
    Indeterminate,
    Percent(u8),
}

impl ProgressUpdate {
    /// Renders the message text for a stage, e.g. `Downloading... 42%`.
    pub fn render(self, stage: &str) -> String {
        match self {
            ProgressUpdate::Indeterminate => format!("{}...", stage),
            ProgressUpdate::Percent(p) => format!("{}... {}%", stage, p),
        }
    }
}

/// Turns a continuous progress signal into strictly increasing integer
/// percentages.
///
/// While no total is known a single `Indeterminate` is emitted. Once a
/// percentage has been emitted, unknown totals are ignored.
#[derive(Debug, Default)]
pub struct ProgressThrottle {
    last: Option<u8>,
    indeterminate_sent: bool,
}

impl ProgressThrottle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, current: u64, total: Option<u64>) -> Option<ProgressUpdate> {
        match total.filter(|t| *t > 0) {
            Some(total) => {
                let percent = (u128::from(current.min(total)) * 100 / u128::from(total)) as u8;
                self.offer(percent)
            }
            None if self.last.is_none() && !self.indeterminate_sent => {
                self.indeterminate_sent = true;
                Some(ProgressUpdate::Indeterminate)
            }
            None => None,
        }
    }

    /// Marks the stage complete; yields 100% unless it was already emitted.
    pub fn finish(&mut self) -> Option<ProgressUpdate> {
        self.offer(100)
    }

    pub fn last_percent(&self) -> Option<u8> {
        self.last
    }

    fn offer(&mut self, percent: u8) -> Option<ProgressUpdate> {
        let percent = percent.min(100);
        if self.last.is_some_and(|last| percent <= last) {
            return None;
        }
        self.last = Some(percent);
        Some(ProgressUpdate::Percent(percent))
    }
}

/// Worker-side end of the progress channel.
#[derive(Debug)]
pub struct ProgressSink {
    throttle: ProgressThrottle,
    tx: mpsc::UnboundedSender<ProgressUpdate>,
}

impl ProgressSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ProgressUpdate>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                throttle: ProgressThrottle::new(),
                tx,
            },
            rx,
        )
    }

    pub fn report(&mut self, current: u64, total: Option<u64>) {
        if let Some(update) = self.throttle.observe(current, total) {
            // Receiver gone means the pipeline stopped listening; nothing to do.
            let _ = self.tx.send(update);
        }
    }

    pub fn finish(&mut self) {
        if let Some(update) = self.throttle.finish() {
            let _ = self.tx.send(update);
        }
    }
}

/// Collapses everything already queued behind `first` into the newest update.
pub fn latest_update(rx: &mut mpsc::UnboundedReceiver<ProgressUpdate>, first: ProgressUpdate) -> ProgressUpdate {
    let mut latest = first;
    while let Ok(next) = rx.try_recv() {
        latest = next;
    }
    latest
}

/// The one progress message of a session.
///
/// Edits happen in place. A message that disappeared is retired and a new
/// one is sent, so there is never more than one live indicator. Failures
/// are logged and swallowed: progress must never abort the pipeline.
#[derive(Debug)]
pub struct StatusMessage {
    chat: ChatId,
    message: Option<MessageRef>,
    last_text: Option<String>,
    policy: RetryPolicy,
}

impl StatusMessage {
    pub fn new(chat: ChatId, policy: RetryPolicy) -> Self {
        Self {
            chat,
            message: None,
            last_text: None,
            policy,
        }
    }

    pub fn handle(&self) -> Option<MessageRef> {
        self.message
    }

    pub async fn show(&mut self, transport: &dyn ChatTransport, text: &str) {
        if self.last_text.as_deref() == Some(text) {
            return;
        }

        let Some(message) = self.message else {
            self.send_new(transport, text).await;
            return;
        };

        match retry_on_rate_limit(self.policy, "progress edit", || transport.edit_text(message, text)).await {
            Ok(()) | Err(TransportError::NotModified) => self.last_text = Some(text.to_string()),
            Err(TransportError::MessageGone) => {
                log::debug!("Progress message {} in chat {} is gone, sending a new one", message.id, self.chat);
                self.message = None;
                self.send_new(transport, text).await;
            }
            Err(e) => log::warn!("Progress update suppressed for chat {}: {}", self.chat, e),
        }
    }

    /// Replaces the indicator with a final text. Falls back to a fresh
    /// message when the edit does not go through.
    pub async fn replace_with(&mut self, transport: &dyn ChatTransport, text: &str) {
        if let Some(message) = self.message {
            match retry_on_rate_limit(self.policy, "status edit", || transport.edit_text(message, text)).await {
                Ok(()) | Err(TransportError::NotModified) => {
                    self.last_text = Some(text.to_string());
                    return;
                }
                Err(e) => {
                    log::debug!("Status edit failed for chat {}: {}, sending instead", self.chat, e);
                    self.retire(transport).await;
                }
            }
        }
        self.send_new(transport, text).await;
    }

    /// Deletes the indicator, if any.
    pub async fn retire(&mut self, transport: &dyn ChatTransport) {
        if let Some(message) = self.message.take() {
            delete_quietly(transport, self.policy, message).await;
        }
        self.last_text = None;
    }

    async fn send_new(&mut self, transport: &dyn ChatTransport, text: &str) {
        match retry_on_rate_limit(self.policy, "progress send", || transport.send_text(self.chat, text)).await {
            Ok(message) => {
                self.message = Some(message);
                self.last_text = Some(text.to_string());
            }
            Err(e) => log::warn!("Could not show progress in chat {}: {}", self.chat, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn percents(updates: &[Option<ProgressUpdate>]) -> Vec<u8> {
        updates
            .iter()
            .flatten()
            .filter_map(|u| match u {
                ProgressUpdate::Percent(p) => Some(*p),
                ProgressUpdate::Indeterminate => None,
            })
            .collect()
    }

    #[test]
    fn test_emits_only_on_integer_change() {
        let mut throttle = ProgressThrottle::new();
        let total = Some(1_000);
        let updates: Vec<_> = [0, 1, 5, 9, 10, 15, 19, 20, 500, 999]
            .iter()
            .map(|c| throttle.observe(*c, total))
            .collect();

        assert_eq!(percents(&updates), vec![0, 1, 2, 50, 99]);
    }

    #[test]
    fn test_never_goes_backwards() {
        let mut throttle = ProgressThrottle::new();
        assert_eq!(throttle.observe(60, Some(100)), Some(ProgressUpdate::Percent(60)));
        assert_eq!(throttle.observe(40, Some(100)), None);
        assert_eq!(throttle.observe(60, Some(100)), None);
        assert_eq!(throttle.observe(61, Some(100)), Some(ProgressUpdate::Percent(61)));
    }

    #[test]
    fn test_final_hundred_exactly_once() {
        let mut throttle = ProgressThrottle::new();
        assert_eq!(throttle.observe(100, Some(100)), Some(ProgressUpdate::Percent(100)));
        assert_eq!(throttle.observe(100, Some(100)), None);
        assert_eq!(throttle.finish(), None);

        let mut throttle = ProgressThrottle::new();
        throttle.observe(10, Some(100));
        assert_eq!(throttle.finish(), Some(ProgressUpdate::Percent(100)));
        assert_eq!(throttle.finish(), None);
    }

    #[test]
    fn test_overshoot_is_clamped() {
        let mut throttle = ProgressThrottle::new();
        assert_eq!(throttle.observe(5_000, Some(100)), Some(ProgressUpdate::Percent(100)));
    }

    #[test]
    fn test_indeterminate_until_total_known() {
        let mut throttle = ProgressThrottle::new();
        assert_eq!(throttle.observe(0, None), Some(ProgressUpdate::Indeterminate));
        assert_eq!(throttle.observe(4_096, None), None);
        assert_eq!(throttle.observe(10, Some(0)), None);
        assert_eq!(throttle.observe(50, Some(200)), Some(ProgressUpdate::Percent(25)));
        assert_eq!(throttle.observe(60, None), None);
    }

    #[test]
    fn test_arbitrary_signal_is_strictly_increasing() {
        let mut throttle = ProgressThrottle::new();
        let signal = [3u64, 3, 1, 7, 7, 2, 50, 49, 51, 100, 100, 99];
        let mut emitted: Vec<u8> = signal
            .iter()
            .filter_map(|c| match throttle.observe(*c, Some(100)) {
                Some(ProgressUpdate::Percent(p)) => Some(p),
                _ => None,
            })
            .collect();
        if let Some(ProgressUpdate::Percent(p)) = throttle.finish() {
            emitted.push(p);
        }

        assert!(emitted.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(emitted.iter().filter(|p| **p == 100).count(), 1);
    }

    #[test]
    fn test_render() {
        assert_eq!(ProgressUpdate::Percent(42).render("Downloading"), "Downloading... 42%");
        assert_eq!(ProgressUpdate::Indeterminate.render("Converting"), "Converting...");
    }

    #[tokio::test]
    async fn test_sink_coalesces_bursts() {
        let (mut sink, mut rx) = ProgressSink::channel();
        for current in 0..=500u64 {
            sink.report(current, Some(1_000));
        }
        sink.finish();
        drop(sink);

        let first = rx.recv().await.unwrap();
        assert_eq!(first, ProgressUpdate::Percent(0));
        assert_eq!(latest_update(&mut rx, first), ProgressUpdate::Percent(100));
        assert!(rx.recv().await.is_none());
    }
}
