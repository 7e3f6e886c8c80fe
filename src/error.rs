//! Error taxonomy for the download core.
//!
//! Probe and reassembly failures are terminal for a session. Transfer errors
//! are recovered locally by the per-chunk retry policy and only surface when
//! the retry ceiling is reached.
use reqwest::StatusCode;
use thiserror::Error;

/// Failure of the metadata request issued before any chunk work starts.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("Unable to reach server: {0}")]
    Unreachable(#[from] reqwest::Error),

    #[error("Metadata request failed. Status Code: {0}")]
    Status(StatusCode),

    #[error("Content Length not found in response header.")]
    MissingLength,

    #[error("Server does not support range requests")]
    RangesUnsupported,
}

/// A retryable failure while fetching one chunk.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("Network request failed: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Server returned an unexpected status code: {0}")]
    Status(StatusCode),

    #[error("Server sent {received} bytes but only {remaining} remained in range")]
    Overflow { remaining: u64, received: u64 },

    #[error("Stream ended early: {missing} bytes missing from range")]
    ShortBody { missing: u64 },
}

/// Merged output does not match the declared size. Always an internal bug.
#[derive(Debug, Error)]
pub enum ReassemblyError {
    #[error("Chunk {index} is not complete ({have} of {want} bytes)")]
    IncompleteChunk { index: usize, have: u64, want: u64 },

    #[error("Reassembled {actual} bytes, expected {expected}")]
    LengthMismatch { expected: u64, actual: u64 },
}

/// Failure of the external save/open facility.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Artifact not found: {0}")]
    Missing(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config file: {0}")]
    Json(#[from] serde_json::Error),
}

/// Reasons `SessionCoordinator::start` refuses to create a session.
#[derive(Debug, Error)]
pub enum StartError {
    #[error(transparent)]
    Probe(#[from] ProbeError),

    #[error("Thread count must be at least 1")]
    NoThreads,
}
