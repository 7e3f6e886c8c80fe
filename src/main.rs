//! Command-line entrypoint for `segfetch`.
//!
//! Either runs a single download in the foreground or talks to the daemon.
use anyhow::{Result, anyhow};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use segfetch::config::Settings;
use segfetch::coordinator::SessionCoordinator;
use segfetch::ipc::{Command, Request, Response};
use segfetch::observer::{ChannelObserver, DownloadEvent};
use segfetch::reassembly::FileSink;
use segfetch::utils::{format_speed, format_time_left};
use segfetch::{Args, Commands, daemon};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::warn;

/// Download one URL, rendering progress until it completes or fails.
async fn run_standalone(
    url: String,
    threads: Option<u8>,
    dir: Option<String>,
    rate_limit: Option<u32>,
    settings: Settings,
) -> Result<()> {
    let dir = dir.unwrap_or_else(|| settings.default_dir.clone());
    let mut config = settings.coordinator_config();
    config.rate_limit = rate_limit.or(config.rate_limit);

    let client = reqwest::Client::builder()
        .user_agent(settings.user_agent.clone())
        .connect_timeout(Duration::from_secs(30))
        .build()?;
    let (observer, mut events) = ChannelObserver::new();
    let coordinator = SessionCoordinator::new(
        client,
        config,
        Arc::new(FileSink::new(&dir)),
        Arc::new(observer),
    );

    let session = coordinator.start(&url, threads).await?;
    println!(
        "Downloading {} ({} bytes, {} chunks)",
        session.filename, session.declared_size, session.chunk_count
    );

    let pb = ProgressBar::new(100);
    pb.set_style(
        ProgressStyle::with_template("{msg} [{bar:40.cyan/blue}] {pos}%")?.progress_chars("=>-"),
    );
    pb.set_message(session.filename.clone());

    loop {
        let event = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                pb.abandon_with_message("Cancelled");
                coordinator.cancel(session.id).await;
                return Ok(());
            }
            event = events.recv() => event,
        };

        match event {
            Some(DownloadEvent::ProgressUpdate(snapshot)) if snapshot.session_id == session.id => {
                pb.set_position(snapshot.percent as u64);
                pb.set_message(format!(
                    "{} {} {}",
                    session.filename,
                    format_speed(snapshot.throughput),
                    format_time_left(snapshot.eta)
                ));
            }
            Some(DownloadEvent::DownloadComplete { session_id }) if session_id == session.id => {
                pb.finish_with_message("Done!");
                let path = PathBuf::from(&dir).join(&session.filename);
                println!("✅ Saved {}", path.display());
                return Ok(());
            }
            Some(DownloadEvent::DownloadError {
                session_id,
                message,
            }) if session_id == session.id => {
                pb.abandon_with_message("Failed");
                return Err(anyhow!(message));
            }
            Some(_) => {}
            None => return Err(anyhow!("Event channel closed")),
        }
    }
}

/// Connect to the local daemon, send a command and print the reply.
async fn send_command(settings: &Settings, command: Command) -> Result<()> {
    let addr = format!("{}:{}", settings.server_addr, settings.port);
    let stream = TcpStream::connect(&addr)
        .await
        .map_err(|e| anyhow!("Could not reach daemon at {}: {}", addr, e))?;
    let (reader, mut writer) = stream.into_split();

    let request = Request {
        secret: settings.server_secret.clone(),
        command,
    };
    let mut json = serde_json::to_string(&request)?;
    json.push('\n');
    writer.write_all(json.as_bytes()).await?;

    let mut lines = BufReader::new(reader).lines();
    while let Some(line) = lines.next_line().await? {
        let response: Response = serde_json::from_str(&line)?;
        match response {
            Response::Event(event) => {
                println!("{}", serde_json::to_string(&event)?);
                continue;
            }
            other => print_response(other),
        }
        break;
    }

    Ok(())
}

fn print_response(response: Response) {
    match response {
        Response::Started {
            success: true,
            session: Some(s),
            ..
        } => println!("✅ Started #{}: {}", s.id, s.filename),
        Response::Started { error, .. } => {
            println!("❌ Error: {}", error.unwrap_or_default())
        }
        Response::Ack { success: true } => println!("✅ OK"),
        Response::Ack { success: false } => println!("❌ Not allowed in the current state"),
        Response::Sessions(list) => {
            println!(
                "{:<5} {:<30} {:<9} {:<12} {:<14} {:<10}",
                "ID", "Filename", "Progress", "Speed", "ETA", "State"
            );
            println!("{}", "-".repeat(84));
            for s in list {
                println!(
                    "{:<5} {:<30} {:>3}%      {:<12} {:<14} {:<10}",
                    s.id,
                    s.filename,
                    s.progress,
                    format_speed(s.speed),
                    s.eta.map(format_time_left).unwrap_or_default(),
                    format!("{:?}", s.state).to_lowercase()
                );
            }
        }
        Response::Event(event) => println!("{:?}", event),
        Response::Err(msg) => println!("❌ Error: {}", msg),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "segfetch=info".into()),
        )
        .init();

    let args = Args::parse();
    let settings = Settings::load().unwrap_or_else(|e| {
        warn!(error = %e, "ignoring config file");
        Settings::default()
    });

    match args.command {
        Commands::Run {
            url,
            threads,
            dir,
            rate_limit,
        } => run_standalone(url, threads, dir, rate_limit, settings).await?,
        Commands::Start => daemon::start_daemon(settings).await?,
        Commands::Add { url, threads } => {
            send_command(&settings, Command::Start { url, threads }).await?
        }
        Commands::Pause { id } => send_command(&settings, Command::Pause { id }).await?,
        Commands::Resume { id } => send_command(&settings, Command::Resume { id }).await?,
        Commands::Cancel { id } => send_command(&settings, Command::Cancel { id }).await?,
        Commands::List => send_command(&settings, Command::List).await?,
        Commands::Open { id } => send_command(&settings, Command::Open { id }).await?,
        Commands::Watch => send_command(&settings, Command::Subscribe).await?,
        Commands::Stop => send_command(&settings, Command::Shutdown).await?,
    }

    Ok(())
}
