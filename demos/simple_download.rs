use segfetch::SessionCoordinator;
use segfetch::config::CoordinatorConfig;
use segfetch::observer::{ChannelObserver, DownloadEvent};
use segfetch::reassembly::FileSink;
use segfetch::utils::{format_speed, format_time_left};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Configuration
    let url = "https://proof.ovh.net/files/10Mb.dat";
    let threads = 4;
    let output_dir = ".";

    println!("Starting example download...");
    println!("URL: {}", url);

    let client = reqwest::Client::builder()
        .user_agent("segfetch-example/0.1")
        .build()?;

    // Events arrive on `rx`; the file is written by the sink once every
    // chunk is in.
    let (observer, mut rx) = ChannelObserver::new();
    let coordinator = SessionCoordinator::new(
        client,
        CoordinatorConfig::default(),
        Arc::new(FileSink::new(output_dir)),
        Arc::new(observer),
    );

    let session = coordinator.start(url, Some(threads)).await?;
    println!(
        "File Size: {} bytes in {} chunks",
        session.declared_size, session.chunk_count
    );

    while let Some(event) = rx.recv().await {
        match event {
            DownloadEvent::ProgressUpdate(p) => println!(
                "{:>3}%  {}  {}",
                p.percent,
                format_speed(p.throughput),
                format_time_left(p.eta)
            ),
            DownloadEvent::DownloadComplete { .. } => {
                println!("Download completed successfully: {}", session.filename);
                break;
            }
            DownloadEvent::DownloadError { message, .. } => {
                eprintln!("Download failed: {}", message);
                break;
            }
        }
    }

    Ok(())
}
