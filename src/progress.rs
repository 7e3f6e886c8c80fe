//! Progress aggregation (percent, throughput, ETA).
//!
//! One periodic task runs per session. It skips ticks while the session is
//! paused and exits once the session leaves the active/paused states or its
//! token is cancelled.
use crate::observer::{DownloadEvent, EventObserver, ProgressSnapshot};
use crate::state::{Session, SessionId, SessionState};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{MissedTickBehavior, interval};
use tracing::debug;

/// `round(100 * transferred / declared)`, or 0 for an empty resource.
pub fn percent(transferred: u64, declared_size: u64) -> u8 {
    if declared_size == 0 {
        return 0;
    }
    let pct = (transferred as f64 / declared_size as f64 * 100.0).round();
    pct.clamp(0.0, 100.0) as u8
}

/// Raw counters read at one tick.
#[derive(Debug, Clone, Copy)]
pub struct ProgressSample {
    pub transferred: u64,
    pub declared_size: u64,
    pub elapsed: Duration,
}

impl ProgressSample {
    /// Bytes per second, if both elapsed time and bytes are positive.
    pub fn throughput(&self) -> Option<f64> {
        let secs = self.elapsed.as_secs_f64();
        if secs <= 0.0 || self.transferred == 0 {
            return None;
        }
        Some(self.transferred as f64 / secs)
    }

    pub fn eta(&self) -> Option<f64> {
        let rate = self.throughput()?;
        let remaining = self.declared_size.saturating_sub(self.transferred);
        Some(remaining as f64 / rate)
    }

    pub fn snapshot(&self, session_id: SessionId) -> Option<ProgressSnapshot> {
        Some(ProgressSnapshot {
            session_id,
            percent: percent(self.transferred, self.declared_size),
            throughput: self.throughput()?,
            eta: self.eta()?,
        })
    }
}

pub(crate) async fn run_aggregator(
    session: Arc<Session>,
    period: Duration,
    observer: Arc<dyn EventObserver>,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick fires immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = session.shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let mut inner = session.inner.lock().await;
        match inner.state {
            SessionState::Active => {}
            SessionState::Paused | SessionState::Planning => continue,
            _ => break,
        }

        let sample = ProgressSample {
            transferred: session.bytes_transferred(),
            declared_size: session.declared_size,
            elapsed: session.started.elapsed(),
        };
        if let Some(snapshot) = sample.snapshot(session.id) {
            inner.speed = snapshot.throughput;
            inner.eta = Some(snapshot.eta);
            drop(inner);
            observer.notify(DownloadEvent::ProgressUpdate(snapshot));
        }
    }

    debug!(session = session.id, "progress aggregator stopped");
}
