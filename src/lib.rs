//! # segfetch
//!
//! `segfetch` accelerates the download of a single large resource by
//! splitting it into byte ranges, fetching the ranges concurrently and
//! stitching them back together in memory. It supports:
//! - Range capability detection before any chunk work starts
//! - Pause, resume and cancel of running sessions
//! - Automatic per-chunk retries with a fixed delay
//! - Periodic progress snapshots (percent, throughput, ETA)
//! - An optional bandwidth cap shared by all workers
//!
//! [`SessionCoordinator`] is the entry point; the daemon and the CLI are thin
//! shells around it.

pub mod args;
pub mod config;
pub mod coordinator;
pub mod daemon;
pub mod error;
pub mod ipc;
pub mod observer;
pub mod probe;
pub mod progress;
pub mod reassembly;
pub mod state;
pub mod utils;
pub mod worker;

pub use args::{Args, Commands};
pub use coordinator::SessionCoordinator;
pub use state::{SessionInfo, SessionState};
pub use worker::{ArcRateLimiter, ChunkWorker};
