//! Session and chunk state.
//!
//! A [`Chunk`] owns the bytes fetched for its range. While a worker is running
//! the chunk is moved into that worker, and the session slot is marked
//! [`ChunkSlot::Leased`]; the worker hands it back when it stops.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::reassembly::ArtifactRef;

pub type SessionId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkState {
    Waiting,
    Downloading,
    Complete,
    Errored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Planning,
    Active,
    Paused,
    Finalizing,
    Failed,
    Cancelled,
    Complete,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Failed | Self::Cancelled | Self::Complete)
    }
}

/// Represents a specific range of bytes within the resource.
///
/// The range is inclusive, meaning `start` and `end` are both part of the chunk.
#[derive(Debug, Clone)]
pub struct Chunk {
    /// Index of the chunk, which is also its position in the merged output.
    pub index: usize,
    /// The starting byte index (0-based).
    pub start: u64,
    /// The ending byte index.
    pub end: u64,
    pub state: ChunkState,
    /// Bytes received so far. Its length is the chunk's transferred count.
    pub buffer: Vec<u8>,
    /// Consecutive failed attempts since the last received fragment.
    pub failures: u32,
}

impl Chunk {
    pub fn new(index: usize, start: u64, end: u64) -> Self {
        Self {
            index,
            start,
            end,
            state: ChunkState::Waiting,
            buffer: Vec::new(),
            failures: 0,
        }
    }

    /// Full length of the range in bytes.
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    pub fn bytes_transferred(&self) -> u64 {
        self.buffer.len() as u64
    }

    pub fn remaining(&self) -> u64 {
        self.len() - self.bytes_transferred()
    }

    /// First byte a resumed fetch should ask for.
    pub fn resume_offset(&self) -> u64 {
        self.start + self.bytes_transferred()
    }

    pub fn is_filled(&self) -> bool {
        self.remaining() == 0
    }
}

#[derive(Debug)]
pub(crate) enum ChunkSlot {
    Parked(Chunk),
    Leased,
}

impl ChunkSlot {
    pub(crate) fn is_complete(&self) -> bool {
        matches!(self, ChunkSlot::Parked(c) if c.state == ChunkState::Complete)
    }
}

pub(crate) struct SessionInner {
    pub state: SessionState,
    /// Cancelled on pause; replaced with a fresh child token on resume.
    pub pause: CancellationToken,
    pub chunks: Vec<ChunkSlot>,
    pub speed: f64,
    pub eta: Option<f64>,
    pub artifact: Option<ArtifactRef>,
}

impl SessionInner {
    pub fn all_complete(&self) -> bool {
        self.chunks.iter().all(ChunkSlot::is_complete)
    }

    /// Moves every chunk out of the session for reassembly.
    pub fn take_chunks(&mut self) -> Vec<Chunk> {
        std::mem::take(&mut self.chunks)
            .into_iter()
            .filter_map(|slot| match slot {
                ChunkSlot::Parked(chunk) => Some(chunk),
                ChunkSlot::Leased => None,
            })
            .collect()
    }
}

/// One logical download.
pub(crate) struct Session {
    pub id: SessionId,
    pub url: String,
    pub filename: String,
    pub declared_size: u64,
    /// Number of planned chunks. Fixed once the session exists.
    pub chunk_count: usize,
    pub created_at: DateTime<Utc>,
    pub started: Instant,
    /// Sum of bytes appended to every chunk buffer. Written by workers, read by
    /// the aggregator.
    pub transferred: AtomicU64,
    /// Session lifetime. Cancelling it stops workers, retries and the aggregator.
    pub shutdown: CancellationToken,
    pub inner: Mutex<SessionInner>,
}

impl Session {
    pub fn new(
        id: SessionId,
        url: String,
        filename: String,
        declared_size: u64,
        chunks: Vec<Chunk>,
    ) -> Self {
        let shutdown = CancellationToken::new();
        let pause = shutdown.child_token();
        Self {
            id,
            url,
            filename,
            declared_size,
            chunk_count: chunks.len(),
            created_at: Utc::now(),
            started: Instant::now(),
            transferred: AtomicU64::new(0),
            shutdown,
            inner: Mutex::new(SessionInner {
                state: SessionState::Planning,
                pause,
                chunks: chunks.into_iter().map(ChunkSlot::Parked).collect(),
                speed: 0.0,
                eta: None,
                artifact: None,
            }),
        }
    }

    pub fn bytes_transferred(&self) -> u64 {
        self.transferred.load(Ordering::Acquire)
    }

    pub async fn info(&self) -> SessionInfo {
        let inner = self.inner.lock().await;
        let bytes_transferred = self.bytes_transferred();
        let progress = if inner.state == SessionState::Complete {
            100
        } else {
            crate::progress::percent(bytes_transferred, self.declared_size)
        };
        SessionInfo {
            id: self.id,
            url: self.url.clone(),
            filename: self.filename.clone(),
            declared_size: self.declared_size,
            progress,
            bytes_transferred,
            speed: inner.speed,
            eta: inner.eta,
            paused: inner.state == SessionState::Paused,
            state: inner.state,
            chunk_count: self.chunk_count,
            created_at: self.created_at,
        }
    }
}

/// Snapshot of a session as reported to the shell.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    pub id: SessionId,
    pub url: String,
    pub filename: String,
    pub declared_size: u64,
    /// Download progress as a percentage (0-100).
    pub progress: u8,
    pub bytes_transferred: u64,
    /// Bytes per second, as last sampled.
    pub speed: f64,
    /// Seconds remaining, once a throughput sample exists.
    pub eta: Option<f64>,
    pub paused: bool,
    pub state: SessionState,
    pub chunk_count: usize,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_resume_offset_tracks_buffer() {
        let mut chunk = Chunk::new(1, 250, 499);
        assert_eq!(chunk.len(), 250);
        assert_eq!(chunk.resume_offset(), 250);

        chunk.buffer.extend_from_slice(&[0u8; 40]);
        assert_eq!(chunk.bytes_transferred(), 40);
        assert_eq!(chunk.remaining(), 210);
        assert_eq!(chunk.resume_offset(), 290);
        assert!(!chunk.is_filled());
    }

    #[test]
    fn take_chunks_empties_the_session() {
        let mut inner = SessionInner {
            state: SessionState::Finalizing,
            pause: CancellationToken::new(),
            chunks: vec![
                ChunkSlot::Parked(Chunk::new(0, 0, 4)),
                ChunkSlot::Parked(Chunk::new(1, 5, 9)),
            ],
            speed: 0.0,
            eta: None,
            artifact: None,
        };
        let taken = inner.take_chunks();
        assert_eq!(taken.len(), 2);
        assert!(inner.chunks.is_empty());
    }

    #[tokio::test]
    async fn chunk_count_survives_taking_chunks() {
        let chunks = vec![Chunk::new(0, 0, 4), Chunk::new(1, 5, 9)];
        let session = Session::new(7, "http://host/a.bin".into(), "a.bin".into(), 10, chunks);
        session.inner.lock().await.take_chunks();

        assert_eq!(session.info().await.chunk_count, 2);
    }

    #[test]
    fn session_state_serializes_lowercase() {
        let json = serde_json::to_string(&SessionState::Finalizing).unwrap();
        assert_eq!(json, "\"finalizing\"");
        assert!(SessionState::Cancelled.is_terminal());
        assert!(!SessionState::Paused.is_terminal());
    }
}
