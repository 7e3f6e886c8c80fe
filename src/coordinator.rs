//! Session lifecycle and the command surface used by the shell.
//!
//! The coordinator owns every session by id. Each chunk runs in its own task
//! and hands its chunk back when it stops; the all-chunks-complete check runs
//! on every hand-back.
use crate::config::CoordinatorConfig;
use crate::error::StartError;
use crate::observer::{DownloadEvent, EventObserver};
use crate::probe;
use crate::progress;
use crate::reassembly::{self, Artifact, ArtifactSink};
use crate::state::{Chunk, ChunkSlot, ChunkState, Session, SessionId, SessionInfo, SessionState};
use crate::utils;
use crate::worker::{BandwidthCap, ChunkWorker, WorkerOutcome, WorkerReport};
use reqwest::Client;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

struct Inner {
    client: Client,
    config: CoordinatorConfig,
    cap: Option<BandwidthCap>,
    sink: Arc<dyn ArtifactSink>,
    observer: Arc<dyn EventObserver>,
    sessions: Mutex<HashMap<SessionId, Arc<Session>>>,
    next_id: AtomicUsize,
}

/// Cheap to clone; all clones drive the same set of sessions.
#[derive(Clone)]
pub struct SessionCoordinator {
    inner: Arc<Inner>,
}

impl SessionCoordinator {
    pub fn new(
        client: Client,
        config: CoordinatorConfig,
        sink: Arc<dyn ArtifactSink>,
        observer: Arc<dyn EventObserver>,
    ) -> Self {
        let cap = config.rate_limit.and_then(BandwidthCap::per_second);
        Self {
            inner: Arc::new(Inner {
                client,
                config,
                cap,
                sink,
                observer,
                sessions: Mutex::new(HashMap::new()),
                next_id: AtomicUsize::new(1),
            }),
        }
    }

    /// Probes `url`, plans its chunks and launches one worker per chunk.
    ///
    /// Nothing is registered when the probe fails or the server does not
    /// advertise byte ranges. `threads` defaults to the configured count.
    pub async fn start(&self, url: &str, threads: Option<u8>) -> Result<SessionInfo, StartError> {
        let threads = threads.unwrap_or(self.inner.config.default_threads);
        if threads == 0 {
            return Err(StartError::NoThreads);
        }

        let report = probe::probe(url, &self.inner.client).await.map_err(|e| {
            warn!(url, error = %e, "probe failed");
            e
        })?;
        if !report.accepts_ranges {
            warn!(url, "server does not advertise byte ranges");
            return Err(crate::error::ProbeError::RangesUnsupported.into());
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let filename = utils::get_filename_from_url(url);
        let chunks = utils::calculate_chunks(report.size, threads as u64);
        info!(
            session = id,
            url,
            size = report.size,
            chunks = chunks.len(),
            "starting download"
        );

        let session = Arc::new(Session::new(
            id,
            url.to_string(),
            filename,
            report.size,
            chunks,
        ));
        self.inner
            .sessions
            .lock()
            .await
            .insert(id, session.clone());

        let mut inner = session.inner.lock().await;
        inner.state = SessionState::Active;
        if inner.all_complete() {
            // Empty resource: nothing to fetch.
            inner.state = SessionState::Finalizing;
            let chunks = inner.take_chunks();
            drop(inner);
            self.finalize(session.clone(), chunks).await;
            return Ok(session.info().await);
        }

        let pause = inner.pause.clone();
        for slot in inner.chunks.iter_mut() {
            if let ChunkSlot::Parked(chunk) = std::mem::replace(slot, ChunkSlot::Leased) {
                self.launch(session.clone(), chunk, pause.clone());
            }
        }
        drop(inner);

        tokio::spawn(progress::run_aggregator(
            session.clone(),
            self.inner.config.progress_interval,
            self.inner.observer.clone(),
        ));

        Ok(session.info().await)
    }

    /// Stops every in-flight worker, keeping the bytes already received.
    /// Returns `false` unless the session was active.
    pub async fn pause(&self, id: SessionId) -> bool {
        let Some(session) = self.session(id).await else {
            return false;
        };
        let mut inner = session.inner.lock().await;
        if inner.state != SessionState::Active {
            return false;
        }

        inner.state = SessionState::Paused;
        inner.pause.cancel();
        info!(session = id, "paused");
        true
    }

    /// Relaunches every incomplete chunk from its own offset. Returns `false`
    /// unless the session was paused.
    pub async fn resume(&self, id: SessionId) -> bool {
        let Some(session) = self.session(id).await else {
            return false;
        };
        let mut inner = session.inner.lock().await;
        if inner.state != SessionState::Paused {
            return false;
        }

        inner.state = SessionState::Active;
        inner.pause = session.shutdown.child_token();
        info!(session = id, "resumed");

        if inner.all_complete() {
            inner.state = SessionState::Finalizing;
            let chunks = inner.take_chunks();
            drop(inner);
            self.finalize(session, chunks).await;
            return true;
        }

        let pause = inner.pause.clone();
        for slot in inner.chunks.iter_mut() {
            if slot.is_complete() || matches!(slot, ChunkSlot::Leased) {
                continue;
            }
            if let ChunkSlot::Parked(mut chunk) = std::mem::replace(slot, ChunkSlot::Leased) {
                chunk.state = ChunkState::Waiting;
                self.launch(session.clone(), chunk, pause.clone());
            }
        }
        true
    }

    /// Aborts and forgets a session. Succeeds even if the id is unknown.
    pub async fn cancel(&self, id: SessionId) -> bool {
        let Some(session) = self.inner.sessions.lock().await.remove(&id) else {
            return true;
        };

        session.shutdown.cancel();
        let mut inner = session.inner.lock().await;
        if !inner.state.is_terminal() {
            inner.state = SessionState::Cancelled;
        }
        inner.chunks.clear();
        info!(session = id, "cancelled");
        true
    }

    pub async fn list(&self) -> Vec<SessionInfo> {
        let sessions: Vec<Arc<Session>> =
            self.inner.sessions.lock().await.values().cloned().collect();

        let mut list = Vec::with_capacity(sessions.len());
        for session in sessions {
            list.push(session.info().await);
        }
        list.sort_by_key(|s| s.id);
        list
    }

    pub async fn info(&self, id: SessionId) -> Option<SessionInfo> {
        Some(self.session(id).await?.info().await)
    }

    /// Asks the save facility to open a completed session's artifact.
    pub async fn open_artifact(&self, id: SessionId) -> bool {
        let Some(session) = self.session(id).await else {
            return false;
        };
        let Some(artifact) = session.inner.lock().await.artifact.clone() else {
            return false;
        };

        match self.inner.sink.open(&artifact) {
            Ok(()) => true,
            Err(e) => {
                warn!(session = id, error = %e, "failed to open artifact");
                false
            }
        }
    }

    async fn session(&self, id: SessionId) -> Option<Arc<Session>> {
        self.inner.sessions.lock().await.get(&id).cloned()
    }

    /// Spawns a worker for `chunk`. The caller must already have marked the
    /// chunk's slot as leased.
    fn launch(&self, session: Arc<Session>, mut chunk: Chunk, pause: CancellationToken) {
        chunk.state = ChunkState::Downloading;
        let worker = ChunkWorker::new(
            self.inner.client.clone(),
            session.url.clone(),
            self.inner.cap.clone(),
        );
        let this = self.clone();

        tokio::spawn(async move {
            let report = worker.run(chunk, &pause, &session.transferred).await;
            this.on_worker_exit(session, report).await;
        });
    }

    async fn on_worker_exit(&self, session: Arc<Session>, report: WorkerReport) {
        let WorkerReport { mut chunk, outcome } = report;
        let index = chunk.index;

        let mut inner = session.inner.lock().await;
        if !matches!(inner.state, SessionState::Active | SessionState::Paused) {
            // Cancelled or failed: the buffer is dropped with the chunk.
            return;
        }

        match outcome {
            WorkerOutcome::Completed => {
                debug!(session = session.id, chunk = index, "chunk complete");
                chunk.state = ChunkState::Complete;
                inner.chunks[index] = ChunkSlot::Parked(chunk);

                if inner.state == SessionState::Active && inner.all_complete() {
                    inner.state = SessionState::Finalizing;
                    let chunks = inner.take_chunks();
                    drop(inner);
                    self.finalize(session, chunks).await;
                }
            }
            WorkerOutcome::Cancelled => {
                chunk.state = ChunkState::Waiting;
                if inner.state == SessionState::Active {
                    // Resumed before this worker noticed the pause.
                    let pause = inner.pause.clone();
                    self.launch(session.clone(), chunk, pause);
                } else {
                    inner.chunks[index] = ChunkSlot::Parked(chunk);
                }
            }
            WorkerOutcome::Failed(e) => {
                chunk.failures += 1;
                chunk.state = ChunkState::Errored;
                let failures = chunk.failures;
                inner.chunks[index] = ChunkSlot::Parked(chunk);

                if self
                    .inner
                    .config
                    .max_retries
                    .is_some_and(|max| failures > max)
                {
                    error!(
                        session = session.id,
                        chunk = index,
                        failures,
                        error = %e,
                        "giving up on chunk"
                    );
                    inner.state = SessionState::Failed;
                    inner.chunks.clear();
                    drop(inner);
                    session.shutdown.cancel();
                    self.inner.observer.notify(DownloadEvent::DownloadError {
                        session_id: session.id,
                        message: format!("Chunk {} failed after {} attempts: {}", index, failures, e),
                    });
                    return;
                }

                warn!(
                    session = session.id,
                    chunk = index,
                    attempt = failures,
                    error = %e,
                    "chunk failed, retrying in {:?}",
                    self.inner.config.retry_delay
                );
                if inner.state == SessionState::Active {
                    self.schedule_retry(session.clone(), index);
                }
            }
        }
    }

    /// Relaunches an errored chunk after the fixed delay, if its session is
    /// still active by then.
    fn schedule_retry(&self, session: Arc<Session>, index: usize) {
        let delay = self.inner.config.retry_delay;
        let this = self.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = session.shutdown.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }

            let mut inner = session.inner.lock().await;
            if inner.state != SessionState::Active {
                return;
            }
            let Some(slot) = inner.chunks.get_mut(index) else {
                return;
            };
            if !matches!(slot, ChunkSlot::Parked(c) if c.state == ChunkState::Errored) {
                return;
            }
            if let ChunkSlot::Parked(chunk) = std::mem::replace(slot, ChunkSlot::Leased) {
                debug!(session = session.id, chunk = index, "retrying chunk");
                let pause = inner.pause.clone();
                this.launch(session.clone(), chunk, pause);
            }
        });
    }

    async fn finalize(&self, session: Arc<Session>, chunks: Vec<Chunk>) {
        let id = session.id;
        info!(session = id, "all chunks complete, reassembling");

        let result = match reassembly::reassemble(chunks, session.declared_size) {
            Ok(data) => {
                if session.shutdown.is_cancelled() {
                    debug!(session = id, "cancelled before save");
                    return;
                }
                let artifact = Artifact {
                    filename: session.filename.clone(),
                    data,
                };
                self.inner.sink.save(artifact).await.map_err(|e| e.to_string())
            }
            Err(e) => Err(e.to_string()),
        };

        let mut inner = session.inner.lock().await;
        if inner.state != SessionState::Finalizing {
            // Cancelled while the artifact was being written.
            drop(inner);
            if let Ok(artifact) = result
                && let Err(e) = self.inner.sink.discard(artifact).await
            {
                warn!(session = id, error = %e, "failed to discard artifact");
            }
            return;
        }

        let event = match result {
            Ok(artifact) => {
                inner.state = SessionState::Complete;
                inner.artifact = Some(artifact);
                inner.eta = Some(0.0);
                info!(session = id, "download complete");
                DownloadEvent::DownloadComplete { session_id: id }
            }
            Err(message) => {
                inner.state = SessionState::Failed;
                error!(session = id, %message, "finalize failed");
                DownloadEvent::DownloadError {
                    session_id: id,
                    message,
                }
            }
        };
        drop(inner);

        session.shutdown.cancel();
        self.inner.observer.notify(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::ChannelObserver;
    use crate::reassembly::FileSink;

    fn coordinator() -> SessionCoordinator {
        let (observer, _rx) = ChannelObserver::new();
        SessionCoordinator::new(
            Client::new(),
            CoordinatorConfig::default(),
            Arc::new(FileSink::new(".")),
            Arc::new(observer),
        )
    }

    #[tokio::test]
    async fn commands_on_unknown_session() {
        let coordinator = coordinator();
        assert!(!coordinator.pause(42).await);
        assert!(!coordinator.resume(42).await);
        assert!(!coordinator.open_artifact(42).await);
        assert!(coordinator.cancel(42).await);
        assert!(coordinator.list().await.is_empty());
    }

    #[tokio::test]
    async fn zero_threads_is_rejected() {
        let coordinator = coordinator();
        let err = coordinator
            .start("http://127.0.0.1:9/file.bin", Some(0))
            .await
            .unwrap_err();
        assert!(matches!(err, StartError::NoThreads));
    }

    #[tokio::test]
    async fn parked_buffers_match_session_counter() {
        use std::time::Duration;
        use wiremock::matchers::{header, method};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        let data: Vec<u8> = (0..100u8).collect();
        Mock::given(method("HEAD"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(data.clone())
                    .insert_header("Accept-Ranges", "bytes"),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(header("Range", "bytes=0-49"))
            .respond_with(ResponseTemplate::new(206).set_body_bytes(data[..50].to_vec()))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(header("Range", "bytes=50-99"))
            .respond_with(
                ResponseTemplate::new(206)
                    .set_body_bytes(data[50..].to_vec())
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&server)
            .await;

        let coordinator = coordinator();
        let url = format!("{}/a.bin", server.uri());
        let id = coordinator.start(&url, Some(2)).await.unwrap().id;

        tokio::time::timeout(Duration::from_secs(5), async {
            while coordinator.info(id).await.unwrap().bytes_transferred < 50 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("first chunk never arrived");
        assert!(coordinator.pause(id).await);

        let session = coordinator.session(id).await.unwrap();
        let (sum, states) = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                {
                    let inner = session.inner.lock().await;
                    let parked: Vec<&Chunk> = inner
                        .chunks
                        .iter()
                        .filter_map(|slot| match slot {
                            ChunkSlot::Parked(c) => Some(c),
                            ChunkSlot::Leased => None,
                        })
                        .collect();
                    if parked.len() == 2 {
                        let sum: u64 = parked.iter().map(|c| c.bytes_transferred()).sum();
                        let states: Vec<ChunkState> = parked.iter().map(|c| c.state).collect();
                        return (sum, states);
                    }
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("workers never handed their chunks back");

        assert_eq!(sum, session.bytes_transferred());
        assert_eq!(sum, 50);
        assert_eq!(states, vec![ChunkState::Complete, ChunkState::Waiting]);
    }

    #[tokio::test]
    async fn unreachable_server_creates_no_session() {
        let coordinator = coordinator();
        let err = coordinator
            .start("http://127.0.0.1:9/file.bin", Some(2))
            .await
            .unwrap_err();
        assert!(matches!(err, StartError::Probe(_)));
        assert!(coordinator.list().await.is_empty());
    }
}
