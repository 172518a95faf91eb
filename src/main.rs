use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use x_keeper::archiver::{FetchOrchestrator, GalleryDl};
use x_keeper::config::Config;
use x_keeper::inbox::{self, LocalInbox};
use x_keeper::ledger::DedupLedger;
use x_keeper::processor::Processor;
use x_keeper::scheduler::Scheduler;
use x_keeper::store::LogStore;
use x_keeper::thread::ThreadResolver;
use x_keeper::web::{self, AppState};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    init_tracing()?;

    info!("Starting x-keeper");

    let config = Config::from_env().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    info!(save_path = %config.save_path.display(), "Configuration loaded");

    match config.cookies_file_path.as_deref() {
        Some(path) if path.exists() => {
            info!(path = %path.display(), "Cookies file configured and found");
        }
        Some(path) => {
            warn!(path = %path.display(), "Cookies file configured but not found - will not be used until created");
        }
        None => warn!("No cookies configured - protected posts and threads may not be fetched"),
    }

    tokio::fs::create_dir_all(&config.save_path)
        .await
        .context("Failed to create save directory")?;

    let ledger = Arc::new(
        DedupLedger::open(config.ledger_path())
            .await
            .context("Failed to open dedup ledger")?,
    );
    let log = Arc::new(LogStore::new(&config.save_path));

    let gallery_dl = Arc::new(GalleryDl::from_config(&config));
    if !gallery_dl.is_available().await {
        warn!(program = %config.gallery_dl_path, "gallery-dl not found - downloads will fail");
    }

    let resolver = ThreadResolver::new(gallery_dl.clone()).with_max_depth(config.max_thread_depth);
    let orchestrator = Arc::new(
        FetchOrchestrator::new(&config.save_path, gallery_dl, Arc::clone(&ledger))
            .with_max_attempts(config.fetch_max_attempts),
    );
    let mut processor = Processor::new(resolver, orchestrator, Arc::clone(&log));

    let local_inbox = config.inbox_dir.as_ref().map(|dir| Arc::new(LocalInbox::new(dir)));
    if let Some(local_inbox) = &local_inbox {
        info!(dir = %local_inbox.dir().display(), "Inbox enabled");
        processor = processor.with_source(local_inbox.clone());
    } else {
        info!("No INBOX_DIR set - only API-queued URLs will be processed");
    }
    let processor = Arc::new(processor);

    // Backlog scan first, then watch for new notes
    let inbox_handle = local_inbox.map(|local_inbox| {
        let processor = Arc::clone(&processor);
        let interval = config.inbox_poll_interval;
        tokio::spawn(async move {
            match processor.scan_pending().await {
                Ok(count) => info!(count, "Startup scan finished"),
                Err(e) => error!("Startup scan failed: {e:#}"),
            }
            inbox::watch(local_inbox, processor, interval).await;
        })
    });

    let scheduler = Scheduler::new(
        Arc::clone(&processor),
        Arc::clone(&log),
        config.retry_poll_interval,
    )
    .with_scan_interval(config.scan_interval);
    let scheduler_handle = tokio::spawn(scheduler.run());
    info!("Scheduler started");

    let web_handle = if config.web_enabled {
        let web_config = config.clone();
        let state = AppState {
            ledger: Arc::clone(&ledger),
            log: Arc::clone(&log),
        };
        Some(tokio::spawn(async move {
            if let Err(e) = web::serve(&web_config, state).await {
                error!("Web server error: {e:#}");
            }
        }))
    } else {
        info!("HTTP API disabled");
        None
    };

    shutdown_signal().await;

    info!("Shutting down...");

    scheduler_handle.abort();
    if let Some(handle) = inbox_handle {
        handle.abort();
    }
    if let Some(handle) = web_handle {
        handle.abort();
    }

    info!("Shutdown complete");

    Ok(())
}

fn init_tracing() -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,x_keeper=debug"));

    // Check if JSON logging is requested
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| matches!(v.to_lowercase().as_str(), "json" | "structured"))
        .unwrap_or(false);

    if use_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
