//! torrent-leech - Main entry point
//!
//! Downloads the content of one torrent file and exits.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use torrent_leech::cli::format_bytes;
use torrent_leech::{
    CliArgs, Config, DownloadCoordinator, DownloadProgress, FileStorage, ProgressDisplay,
    TorrentInfo, TorrentParser, TrackerAggregator,
};
use tracing::{debug, error, info, warn};

const PROGRESS_INTERVAL: Duration = Duration::from_millis(500);

/// Set up panic handler for unexpected errors
fn setup_panic_handler() {
    std::panic::set_hook(Box::new(|panic_info| {
        let backtrace = std::backtrace::Backtrace::capture();
        match panic_info.location() {
            Some(location) => error!(
                "PANIC occurred at {}:{}:{}",
                location.file(),
                location.line(),
                location.column()
            ),
            None => error!("PANIC occurred at an unknown location"),
        }

        let payload = panic_info.payload();
        if let Some(s) = payload.downcast_ref::<&str>() {
            error!("Panic message: {}", s);
        } else if let Some(s) = payload.downcast_ref::<String>() {
            error!("Panic message: {}", s);
        } else {
            error!("Panic message: unknown");
        }
        error!("Backtrace:\n{:?}", backtrace);
    }));
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_panic_handler();

    let args = CliArgs::parse_args();
    init_logging(&args);
    info!("torrent-leech starting");
    debug!("CLI arguments: {:?}", args);

    let torrent = load_torrent_file(&args.torrent_file)
        .context("Failed to load torrent file")?;

    let config = Config::from_args(&args);
    config.validate()
        .context("Invalid configuration")?;

    display_torrent_info(&torrent, &config);

    let mut progress = ProgressDisplay::new(config.quiet);
    progress.print_status("Starting download...")?;

    match run_download(torrent, config, &mut progress).await {
        Ok(stats) => {
            info!("Download completed successfully");
            progress.print_complete(&stats)?;
            Ok(())
        }
        Err(e) => {
            error!("Download failed: {:#}", e);
            progress.print_error(&format!("Download failed: {:#}", e))?;
            Err(e)
        }
    }
}

/// Initialize logging based on verbosity settings
fn init_logging(args: &CliArgs) {
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(args.log_level())
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if args.verbose {
        subscriber.pretty().init();
    } else {
        subscriber.compact().init();
    }

    debug!("Logging initialized at {}", args.log_level());
}

fn load_torrent_file(path: &Path) -> Result<TorrentInfo> {
    info!("Loading torrent file: {}", path.display());

    let info = TorrentParser::parse_file(path)
        .map_err(|e| {
            error!("Failed to parse torrent file '{}': {}", path.display(), e);
            e
        })?;

    info!("Loaded torrent: {} ({})", info.name, info.info_hash_hex());
    Ok(info)
}

fn display_torrent_info(torrent: &TorrentInfo, config: &Config) {
    if config.quiet {
        return;
    }

    println!("Torrent Information:");
    println!("  Name: {}", torrent.name);
    println!("  Size: {} ({})", torrent.total_size(), format_bytes(torrent.total_size()));
    println!("  Pieces: {} x {}", torrent.piece_count(), format_bytes(torrent.piece_length));
    println!("  Files: {}", torrent.output_files().len());
    println!("  Info hash: {}", torrent.info_hash_hex());
    println!("  Trackers: {}", torrent.announce_list.len());
    for url in &torrent.announce_list {
        println!("    {}", url);
    }
    println!();
    println!("Configuration:");
    println!("  Output directory: {}", config.output_dir.display());
    println!("  Max peers: {}", config.max_peers);
    println!("  Pipeline depth: {}", config.pipeline_depth);
    println!();
}

/// Feed tracker peers into the coordinator until the download completes,
/// fails, or runs out of peers.
async fn run_download(
    torrent: TorrentInfo,
    config: Config,
    progress: &mut ProgressDisplay,
) -> Result<DownloadProgress> {
    let torrent = Arc::new(torrent);
    let config = Arc::new(config);

    let storage = Arc::new(FileStorage::new(&config.output_dir, &torrent));
    let coordinator = DownloadCoordinator::new(torrent.clone(), config.clone(), storage)
        .await
        .context("Failed to prepare output files")?;

    let aggregator = TrackerAggregator::from_torrent(&torrent, &config);
    info!("Announcing to {} tracker(s)", aggregator.tracker_count());
    let (mut peers, trackers) = aggregator.stream();

    let mut trackers_done = false;
    let mut ticker = tokio::time::interval(PROGRESS_INTERVAL);
    let finished = coordinator.wait();
    tokio::pin!(finished);

    let outcome = loop {
        tokio::select! {
            result = &mut finished => break result,
            peer = peers.recv(), if !trackers_done => match peer {
                Some(addr) => {
                    coordinator.add_peer(addr).await;
                }
                None => {
                    debug!("All trackers finished");
                    trackers_done = true;
                }
            },
            _ = ticker.tick() => {
                let snapshot = coordinator.progress().await;
                progress.update(&snapshot)?;

                if trackers_done && snapshot.active_peers == 0 && !coordinator.is_complete() {
                    break Err(anyhow!(
                        "no usable peers left, {} of {} pieces missing",
                        snapshot.remaining_pieces(),
                        snapshot.total_pieces
                    ));
                }
            }
        }
    };

    trackers.abort();
    coordinator.shutdown().await;

    if let Err(e) = outcome {
        warn!("Stopping with {}", coordinator.progress().await);
        return Err(e);
    }
    Ok(coordinator.progress().await)
}
