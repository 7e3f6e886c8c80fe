use crate::config::Settings;
use crate::coordinator::SessionCoordinator;
use crate::ipc::{Command, Request, Response};
use crate::observer::{DownloadEvent, EventObserver, LogObserver};
use crate::reassembly::FileSink;
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Logs every event and fans it out to subscribed connections.
pub struct DaemonObserver {
    events: broadcast::Sender<DownloadEvent>,
}

impl EventObserver for DaemonObserver {
    fn notify(&self, event: DownloadEvent) {
        LogObserver.notify(event.clone());
        self.events.notify(event);
    }
}

/// Runs a single command against the coordinator.
pub async fn handle_command(coordinator: &SessionCoordinator, command: Command) -> Response {
    match command {
        Command::Start { url, threads } => match coordinator.start(&url, threads).await {
            Ok(session) => Response::Started {
                success: true,
                session: Some(session),
                error: None,
            },
            Err(e) => Response::Started {
                success: false,
                session: None,
                error: Some(e.to_string()),
            },
        },
        Command::Pause { id } => Response::Ack {
            success: coordinator.pause(id).await,
        },
        Command::Resume { id } => Response::Ack {
            success: coordinator.resume(id).await,
        },
        Command::Cancel { id } => Response::Ack {
            success: coordinator.cancel(id).await,
        },
        Command::Open { id } => Response::Ack {
            success: coordinator.open_artifact(id).await,
        },
        Command::List => Response::Sessions(coordinator.list().await),
        Command::Subscribe | Command::Shutdown => {
            Response::Err("Command is only valid on a daemon connection".into())
        }
    }
}

pub async fn start_daemon(settings: Settings) -> Result<()> {
    let addr = format!("{}:{}", settings.server_addr, settings.port);
    let listener = TcpListener::bind(&addr).await?;
    info!(%addr, "daemon started");

    let client = reqwest::Client::builder()
        .user_agent(settings.user_agent.clone())
        .connect_timeout(Duration::from_secs(30))
        .build()?;

    let (events, _) = broadcast::channel(256);
    let coordinator = SessionCoordinator::new(
        client,
        settings.coordinator_config(),
        Arc::new(FileSink::new(&settings.default_dir)),
        Arc::new(DaemonObserver {
            events: events.clone(),
        }),
    );
    let shutdown = CancellationToken::new();
    let secret = settings.server_secret.clone();

    loop {
        let (socket, peer) = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => accepted?,
        };
        debug!(%peer, "connection accepted");

        let coordinator = coordinator.clone();
        let events = events.clone();
        let shutdown = shutdown.clone();
        let secret = secret.clone();

        tokio::spawn(async move {
            if let Err(e) = serve_connection(socket, coordinator, events, shutdown, secret).await {
                warn!(%peer, error = %e, "connection error");
            }
        });
    }

    info!("daemon stopped");
    Ok(())
}

async fn serve_connection(
    socket: TcpStream,
    coordinator: SessionCoordinator,
    events: broadcast::Sender<DownloadEvent>,
    shutdown: CancellationToken,
    secret: Option<String>,
) -> Result<()> {
    let (reader, mut writer) = socket.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines.next_line().await? {
        let request: Request = match serde_json::from_str(&line) {
            Ok(r) => r,
            Err(e) => {
                send_response(&mut writer, &Response::Err(format!("Invalid JSON: {}", e))).await?;
                continue;
            }
        };

        if secret.is_some() && request.secret != secret {
            send_response(&mut writer, &Response::Err("Unauthorized".into())).await?;
            return Ok(());
        }

        match request.command {
            Command::Shutdown => {
                shutdown.cancel();
                send_response(&mut writer, &Response::Ack { success: true }).await?;
                return Ok(());
            }
            Command::Subscribe => {
                let mut rx = events.subscribe();
                loop {
                    match rx.recv().await {
                        Ok(event) => send_response(&mut writer, &Response::Event(event)).await?,
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!(skipped = n, "subscriber lagging");
                        }
                        Err(broadcast::error::RecvError::Closed) => return Ok(()),
                    }
                }
            }
            command => {
                let response = handle_command(&coordinator, command).await;
                send_response(&mut writer, &response).await?;
            }
        }
    }

    Ok(())
}

async fn send_response<W: AsyncWrite + Unpin>(writer: &mut W, resp: &Response) -> Result<()> {
    let mut json = serde_json::to_string(resp)?;
    json.push('\n');
    writer.write_all(json.as_bytes()).await?;
    Ok(())
}
