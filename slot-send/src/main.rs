//! slot-send - Background daemon for slot-based posting
//!
//! Watches the platform queues and publishes each post when its time slot
//! arrives.

use clap::Parser;
use libslotcast::logging::LoggingConfig;
use libslotcast::service::events::EventReceiver;
use libslotcast::{QueueService, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

#[derive(Parser, Debug)]
#[command(name = "slot-send")]
#[command(version)]
#[command(about = "Background daemon for slot-based posting")]
#[command(long_about = "\
slot-send - Background daemon for slot-based posting

DESCRIPTION:
    slot-send is a long-running daemon that watches the Slotcast queues
    and publishes each post when its time slot arrives.

    Posts left in flight by a run that died are returned to the head of
    their queue once their claim expires, checked at start-up and before
    every cycle. Each cycle then publishes every due post, one
    at a time per platform, attaching a link preview when the post contains
    a URL. Failed posts are recorded and not retried; use
    'slot-queue requeue' to try again.

USAGE:
    # Run in foreground (logs to stderr)
    slot-send

    # Run with custom poll interval
    slot-send --poll-interval 30

    # Enable verbose logging
    slot-send --verbose

SIGNALS:
    SIGTERM, SIGINT - Graceful shutdown (finishes current post)

CONFIGURATION:
    Configuration file: ~/.config/slotcast/config.toml
    Database location: ~/.local/share/slotcast/queue.db

    [scheduling]
    poll_interval = 60         # seconds between dispatch cycles
    utc_offset_minutes = 0     # wall clock that slot times are written in
    publish_timeout = 30       # seconds allowed per publish

    [linkedin]
    enabled = true
    token_file = \"~/.config/slotcast/linkedin.token\"
    author_urn = \"urn:li:person:...\"

    [threads]
    enabled = true
    token_file = \"~/.config/slotcast/threads.token\"

EXIT CODES:
    0 - Clean shutdown
    1 - Runtime error
    2 - Configuration or database error
")]
struct Cli {
    /// Poll interval in seconds (overrides config)
    #[arg(long, value_name = "SECONDS")]
    #[arg(help = "How often to check for due posts (default: from config)")]
    poll_interval: Option<u64>,

    /// Enable verbose logging to stderr
    #[arg(short, long)]
    #[arg(help = "Enable verbose logging (useful for debugging)")]
    verbose: bool,

    /// Run once and exit (for testing)
    #[arg(long, hide = true)]
    #[arg(help = "Publish due posts once and exit (for testing)")]
    once: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    LoggingConfig::from_env("info", cli.verbose).init();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(e.exit_code());
    }
}

async fn run(cli: Cli) -> Result<()> {
    let service = QueueService::new().await?;

    info!("slot-send daemon starting");

    let shutdown = Arc::new(AtomicBool::new(false));
    setup_signal_handlers(shutdown.clone())?;

    tokio::spawn(log_events(service.subscribe()));

    let recovered = service.recover_interrupted().await?;
    if !recovered.is_empty() {
        warn!(
            count = recovered.len(),
            "Returned interrupted posts to their queues"
        );
    }

    let poll_interval = cli
        .poll_interval
        .unwrap_or(service.config().scheduling.poll_interval);
    info!("Poll interval: {}s", poll_interval);

    if cli.once {
        let report = service.run_cycle().await?;
        info!(
            posted = report.posted,
            failed = report.failed,
            "slot-send: processed due posts once, exiting"
        );
    } else {
        service
            .dispatcher()
            .run(Duration::from_secs(poll_interval), shutdown)
            .await;
    }

    info!("slot-send daemon stopped");
    Ok(())
}

/// Set up signal handlers for graceful shutdown
#[cfg(unix)]
fn setup_signal_handlers(shutdown: Arc<AtomicBool>) -> Result<()> {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM]).map_err(|e| {
        libslotcast::SlotcastError::InvalidInput(format!("Signal setup failed: {}", e))
    })?;

    std::thread::spawn(move || {
        if let Some(sig) = signals.forever().next() {
            info!(signal = sig, "Received shutdown signal, stopping gracefully...");
            shutdown.store(true, Ordering::Relaxed);
        }
    });

    Ok(())
}

#[cfg(not(unix))]
fn setup_signal_handlers(shutdown: Arc<AtomicBool>) -> Result<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl-C, stopping gracefully...");
            shutdown.store(true, Ordering::Relaxed);
        }
    });
    Ok(())
}

/// Trace queue events at debug level
async fn log_events(mut events: EventReceiver) {
    loop {
        match events.recv().await {
            Ok(event) => debug!(?event, "Queue event"),
            Err(RecvError::Lagged(missed)) => warn!(missed, "Event log fell behind"),
            Err(RecvError::Closed) => break,
        }
    }
}
