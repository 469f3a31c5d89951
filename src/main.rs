use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;

use report_gateway::config::Config;
use report_gateway::pipeline::ReportOrchestrator;
use report_gateway::synthesis::FileSynthesizer;
use report_gateway::telemetry::init_telemetry;
use report_gateway::upstream::AuthenticatingClient;
use report_gateway::{AppState, build_router};

const MIN_SWEEP_INTERVAL: Duration = Duration::from_secs(1);
const MAX_SWEEP_INTERVAL: Duration = Duration::from_secs(3600);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;

    let telemetry_guard = init_telemetry(&config)?;

    tracing::info!(
        port = config.server.port,
        environment = %config.environment,
        upstream = %config.upstream.base_url,
        "Starting report-gateway"
    );

    if let Some(warning) = config.request_deadline_warning() {
        tracing::warn!("{warning}");
    }

    let shutdown = CancellationToken::new();

    let client = Arc::new(AuthenticatingClient::new(&config.upstream, shutdown.clone())?);
    let synthesizer = Arc::new(FileSynthesizer::new(config.report.clone())?);
    tracing::info!(
        output_dir = %synthesizer.output_dir().display(),
        "Document synthesizer initialized"
    );

    let orchestrator = Arc::new(ReportOrchestrator::new(client.clone(), synthesizer));

    // Warm the session so the first request skips the login round trip.
    let warmup = client.clone();
    tokio::spawn(async move {
        if let Err(e) = warmup.ensure_authenticated().await {
            tracing::warn!(error = %e, "Initial upstream login failed; will retry on first request");
        }
    });

    let sweeper = if config.report.cleanup {
        Some(tokio::spawn(run_cleanup_sweep(
            orchestrator.clone(),
            config.report.cleanup_after.clamp(MIN_SWEEP_INTERVAL, MAX_SWEEP_INTERVAL),
            shutdown.clone(),
        )))
    } else {
        None
    };

    let state = AppState {
        orchestrator: orchestrator.clone(),
        config: config.clone(),
        shutdown: shutdown.clone(),
    };
    let app = build_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    let listener = TcpListener::bind(addr).await?;

    tracing::info!(%addr, "Server listening");

    let signal_token = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            signal_token.cancel();
        })
        .await?;

    shutdown.cancel();
    if let Some(sweeper) = sweeper {
        let _ = sweeper.await;
    }
    if let Err(e) = orchestrator.close().await {
        tracing::warn!(error = %e, "Failed to close upstream client");
    }

    tracing::info!("Server shutdown complete");
    telemetry_guard.shutdown();

    Ok(())
}

async fn run_cleanup_sweep(
    orchestrator: Arc<ReportOrchestrator>,
    every: Duration,
    shutdown: CancellationToken,
) {
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    tracing::info!(interval_ms = every.as_millis() as u64, "Report cleanup sweep started");

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => match orchestrator.cleanup_artifacts().await {
                Ok(removed) => tracing::info!(removed, "Report cleanup sweep finished"),
                Err(e) => tracing::error!(error = %e, "Report cleanup sweep failed"),
            },
        }
    }

    tracing::info!("Report cleanup sweep stopped");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
