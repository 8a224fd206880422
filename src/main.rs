use std::sync::Arc;
use std::time::Duration;

use eyre::Result;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use lockbridge_relayer::api::{self, AppState};
use lockbridge_relayer::config::{Config, LogFormat};
use lockbridge_relayer::db::{Journal, MemoryJournal, PgJournal};
use lockbridge_relayer::guard::ReplayGuard;
use lockbridge_relayer::metrics;
use lockbridge_relayer::signer::AttestationSigner;
use lockbridge_relayer::watchers::{EvmLockSource, LockWatcher};
use lockbridge_relayer::writers::{resume_pending, EvmReleaseSubmitter, ReleasePipeline};

fn main() -> Result<()> {
    // Install color-eyre for better error reporting
    color_eyre::install()?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main())
}

async fn async_main() -> Result<()> {
    let config = Config::load()?;
    init_logging(config.log_format);

    info!("Starting Lockbridge Relayer");

    let source_bridge = config.source_bridge()?;
    let destination = config.destination_bridge()?;
    info!(
        source_bridge = %source_bridge,
        destination_bridge = %destination,
        finality_blocks = config.source.finality_blocks,
        max_in_flight = config.relayer.max_in_flight,
        "Configuration loaded"
    );

    let journal: Arc<dyn Journal> = match &config.database.url {
        Some(url) => {
            let journal = PgJournal::connect(url).await?;
            info!("Database connected, migrations complete");
            Arc::new(journal)
        }
        None => {
            warn!("DATABASE_URL not set: using in-memory journal, pending releases will not survive a restart");
            Arc::new(MemoryJournal::new())
        }
    };

    let signer = AttestationSigner::from_private_key(&config.destination.private_key, destination)?;
    let relayer = signer.address();
    info!(relayer = %relayer, "Attestation signer ready");

    let submitter = Arc::new(EvmReleaseSubmitter::new(&config.destination)?);
    submitter.check_relayer_identity(relayer).await;

    let guard = Arc::new(ReplayGuard::new(
        config.relayer.guard_cache_size,
        config.relayer.guard_ttl_secs,
    ));

    let pipeline = ReleasePipeline::new(
        signer,
        submitter,
        journal.clone(),
        config.relayer.max_in_flight,
    )?
    .with_submit_timeout(Duration::from_secs(config.relayer.submit_timeout_secs));
    let (event_tx, event_rx) = mpsc::channel(config.relayer.queue_capacity);

    let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        let _ = shutdown_tx.send(()).await;
    });

    // Start metrics/API server
    let api_addr = config.api_addr()?;
    let api_state = AppState::new(journal.clone(), guard.clone(), destination, relayer);
    tokio::spawn(async move {
        if let Err(e) = api::start_api_server(api_addr, api_state).await {
            error!(error = %e, "API server error");
        }
    });

    let pipeline_handle = tokio::spawn(pipeline.run(event_rx));

    let resumed = resume_pending(
        journal.as_ref(),
        destination,
        &guard,
        &event_tx,
        config.relayer.resubmit_failed_on_start,
    )
    .await?;
    if resumed > 0 {
        info!(resumed, "Re-enqueued journaled releases from previous run");
    }

    let source = EvmLockSource::new(&config.source, journal.clone()).await?;
    let watcher = LockWatcher::new(source, guard).with_journal(journal, destination);

    if let Err(e) = watcher.run(event_tx, shutdown_rx).await {
        error!(error = %e, "Lock watcher error");
    }

    // The watcher owned the last queue sender; the pipeline now drains
    match pipeline_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "Release pipeline error"),
        Err(e) => error!(error = %e, "Release pipeline task failed"),
    }

    metrics::UP.set(0.0);
    info!("Lockbridge Relayer stopped");
    Ok(())
}

/// Initialize tracing/logging with structured output
fn init_logging(format: LogFormat) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,lockbridge_relayer=debug"));

    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(true))
            .init(),
        LogFormat::Text => registry
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .init(),
    }
}

/// Wait for shutdown signals (SIGINT/SIGTERM)
async fn wait_for_shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown");
        }
    }
}
