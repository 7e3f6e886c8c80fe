//! Events pushed toward the shell.
//!
//! The coordinator publishes through [`EventObserver`] and does not care how
//! events are delivered.
use crate::state::SessionId;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info};

/// Periodic progress sample for one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub session_id: SessionId,
    pub percent: u8,
    /// Bytes per second since the session started.
    pub throughput: f64,
    /// Seconds remaining at the current throughput.
    pub eta: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum DownloadEvent {
    ProgressUpdate(ProgressSnapshot),
    DownloadComplete { session_id: SessionId },
    DownloadError { session_id: SessionId, message: String },
}

pub trait EventObserver: Send + Sync {
    fn notify(&self, event: DownloadEvent);
}

/// Forwards events into an unbounded channel.
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<DownloadEvent>,
}

impl ChannelObserver {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<DownloadEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventObserver for ChannelObserver {
    fn notify(&self, event: DownloadEvent) {
        // A dropped receiver just means nobody is listening any more.
        let _ = self.tx.send(event);
    }
}

/// Fans events out to every daemon subscriber.
impl EventObserver for broadcast::Sender<DownloadEvent> {
    fn notify(&self, event: DownloadEvent) {
        let _ = self.send(event);
    }
}

/// Writes completion and failure events to the log.
pub struct LogObserver;

impl EventObserver for LogObserver {
    fn notify(&self, event: DownloadEvent) {
        match event {
            DownloadEvent::ProgressUpdate(_) => {}
            DownloadEvent::DownloadComplete { session_id } => {
                info!(session = session_id, "download complete")
            }
            DownloadEvent::DownloadError {
                session_id,
                message,
            } => error!(session = session_id, %message, "download failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_are_tagged_for_the_shell() {
        let event = DownloadEvent::DownloadError {
            session_id: 3,
            message: "boom".into(),
        };
        let json = serde_json::to_value(&event).expect("serialize");
        assert_eq!(json["event"], "downloadError");
        assert_eq!(json["session_id"], 3);
    }

    #[tokio::test]
    async fn channel_observer_delivers_in_order() {
        let (observer, mut rx) = ChannelObserver::new();
        observer.notify(DownloadEvent::DownloadComplete { session_id: 1 });
        observer.notify(DownloadEvent::DownloadComplete { session_id: 2 });

        assert_eq!(
            rx.recv().await,
            Some(DownloadEvent::DownloadComplete { session_id: 1 })
        );
        assert_eq!(
            rx.recv().await,
            Some(DownloadEvent::DownloadComplete { session_id: 2 })
        );
    }
}
