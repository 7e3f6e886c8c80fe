//! IPC types used by the daemon and CLI for local control.
//!
//! The daemon listens on a local TCP socket and accepts one JSON request per
//! line. These enums and structs define the request/response messages
//! exchanged between the CLI and the background daemon.
use crate::observer::DownloadEvent;
use crate::state::{SessionId, SessionInfo};
use serde::{Deserialize, Serialize};

#[derive(Deserialize, Serialize, Debug)]
pub struct Request {
    pub secret: Option<String>,
    pub command: Command,
}

/// Commands that can be sent to the running daemon.
#[derive(Deserialize, Serialize, Debug)]
pub enum Command {
    /// Start a new download. `threads` falls back to the daemon's setting.
    Start { url: String, threads: Option<u8> },
    Pause { id: SessionId },
    Resume { id: SessionId },
    Cancel { id: SessionId },
    /// Request the current state of all sessions.
    List,
    /// Open a completed session's saved file.
    Open { id: SessionId },
    /// Keep the connection open and stream every event.
    Subscribe,
    /// Ask the daemon to gracefully shutdown.
    Shutdown,
}

/// Responses returned by the daemon for incoming `Command`s.
#[derive(Serialize, Deserialize, Debug)]
pub enum Response {
    Started {
        success: bool,
        session: Option<SessionInfo>,
        error: Option<String>,
    },
    /// Result of pause, resume, cancel and open.
    Ack { success: bool },
    Sessions(Vec<SessionInfo>),
    /// One pushed event on a subscribed connection.
    Event(DownloadEvent),
    /// Error with human-readable message.
    Err(String),
}
