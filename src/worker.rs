use crate::error::TransferError;
use crate::state::Chunk;
use governor::state::InMemoryState;
use governor::{Quota, RateLimiter, clock::DefaultClock, state::direct::NotKeyed};
use reqwest::StatusCode;
use reqwest::header::RANGE;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub type ArcRateLimiter = Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>;

/// Bandwidth cap shared by every worker of a coordinator.
#[derive(Clone)]
pub struct BandwidthCap {
    limiter: ArcRateLimiter,
    burst: NonZeroU32,
}

impl BandwidthCap {
    /// Returns `None` for a zero cap, which means unlimited.
    pub fn per_second(bytes_per_sec: u32) -> Option<Self> {
        let burst = NonZeroU32::new(bytes_per_sec)?;
        Some(Self {
            limiter: Arc::new(RateLimiter::direct(Quota::per_second(burst))),
            burst,
        })
    }

    /// Waits until `len` bytes may pass. Fragments larger than one second of
    /// quota are admitted in burst-sized steps.
    async fn admit(&self, len: usize) {
        let mut left = u32::try_from(len).unwrap_or(u32::MAX);
        while let Some(step) = NonZeroU32::new(left.min(self.burst.get())) {
            // `step` never exceeds the burst, so capacity is always sufficient.
            let _ = self.limiter.until_n_ready(step).await;
            left -= step.get();
        }
    }
}

/// How a single worker run ended.
#[derive(Debug)]
pub enum WorkerOutcome {
    /// The chunk's buffer now holds its full range.
    Completed,
    /// Stopped by pause or cancel. Never retried.
    Cancelled,
    Failed(TransferError),
}

/// The chunk handed back to its session, with the reason the worker stopped.
#[derive(Debug)]
pub struct WorkerReport {
    pub chunk: Chunk,
    pub outcome: WorkerOutcome,
}

enum Fetch {
    Done,
    Cancelled,
}

/// Fetches one byte range into its chunk's buffer.
#[derive(Clone)]
pub struct ChunkWorker {
    client: reqwest::Client,
    url: String,
    cap: Option<BandwidthCap>,
}

impl ChunkWorker {
    pub fn new(client: reqwest::Client, url: impl Into<String>, cap: Option<BandwidthCap>) -> Self {
        Self {
            client,
            url: url.into(),
            cap,
        }
    }

    /// Downloads the rest of `chunk`, starting at its resume offset.
    ///
    /// Every appended fragment is also added to `transferred`. Cancellation is
    /// observed while sending the request, between fragments and while waiting
    /// on the bandwidth cap; a fragment is either appended whole or not at all.
    pub async fn run(
        &self,
        mut chunk: Chunk,
        cancel: &CancellationToken,
        transferred: &AtomicU64,
    ) -> WorkerReport {
        let outcome = match self.fetch(&mut chunk, cancel, transferred).await {
            Ok(Fetch::Done) => WorkerOutcome::Completed,
            Ok(Fetch::Cancelled) => WorkerOutcome::Cancelled,
            Err(e) => WorkerOutcome::Failed(e),
        };
        WorkerReport { chunk, outcome }
    }

    async fn fetch(
        &self,
        chunk: &mut Chunk,
        cancel: &CancellationToken,
        transferred: &AtomicU64,
    ) -> Result<Fetch, TransferError> {
        if chunk.is_filled() {
            return Ok(Fetch::Done);
        }

        let range_header = format!("bytes={}-{}", chunk.resume_offset(), chunk.end);
        debug!(chunk = chunk.index, range = %range_header, "requesting range");

        let request = self
            .client
            .get(&self.url)
            .header(RANGE, range_header)
            .send();

        let mut response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(Fetch::Cancelled),
            response = request => response?,
        };

        if response.status() != StatusCode::PARTIAL_CONTENT {
            return Err(TransferError::Status(response.status()));
        }

        chunk.buffer.reserve_exact(chunk.remaining() as usize);

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(Fetch::Cancelled),
                next = response.chunk() => next?,
            };
            let Some(fragment) = next else { break };

            let len = fragment.len() as u64;
            if len > chunk.remaining() {
                return Err(TransferError::Overflow {
                    remaining: chunk.remaining(),
                    received: len,
                });
            }

            if let Some(cap) = &self.cap {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Ok(Fetch::Cancelled),
                    _ = cap.admit(fragment.len()) => {}
                }
            }

            chunk.buffer.extend_from_slice(&fragment);
            chunk.failures = 0;
            transferred.fetch_add(len, Ordering::AcqRel);
        }

        if !chunk.is_filled() {
            return Err(TransferError::ShortBody {
                missing: chunk.remaining(),
            });
        }

        Ok(Fetch::Done)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_cap_means_unlimited() {
        assert!(BandwidthCap::per_second(0).is_none());
        assert!(BandwidthCap::per_second(1024).is_some());
    }

    #[tokio::test]
    async fn filled_chunk_completes_without_request() {
        // Unroutable URL: any request would fail.
        let worker = ChunkWorker::new(reqwest::Client::new(), "http://127.0.0.1:9/x", None);
        let mut chunk = Chunk::new(0, 0, 3);
        chunk.buffer.extend_from_slice(b"abcd");
        let counter = AtomicU64::new(0);

        let report = worker.run(chunk, &CancellationToken::new(), &counter).await;
        assert!(matches!(report.outcome, WorkerOutcome::Completed));
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn cancelled_token_stops_before_sending() {
        let worker = ChunkWorker::new(reqwest::Client::new(), "http://127.0.0.1:9/x", None);
        let token = CancellationToken::new();
        token.cancel();
        let counter = AtomicU64::new(0);

        let report = worker.run(Chunk::new(0, 0, 9), &token, &counter).await;
        assert!(matches!(report.outcome, WorkerOutcome::Cancelled));
        assert!(report.chunk.buffer.is_empty());
    }
}
