use diaryx_relay::{
    config::Config,
    engine,
    handlers::{WsState, router},
    shutdown,
    sync::SessionRegistry,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// How long open connections get to close after a shutdown signal.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "diaryx_relay=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    info!("Starting Diaryx Relay v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "Idle grace period: {:?}, keepalive: {:?}, outbound queue: {} frames",
        config.grace_period, config.keepalive_interval, config.outbound_capacity
    );

    // Create shared state
    let registry = Arc::new(SessionRegistry::from_config(
        engine::default_factory(),
        &config,
    ));
    let (shutdown, listener) = shutdown::channel();
    let trigger = shutdown.trigger();

    let app = router(WsState {
        registry: registry.clone(),
        keepalive_interval: config.keepalive_interval,
        shutdown: listener,
    });

    // Create listener
    let addr = config.server_addr();
    let tcp = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            error!("Failed to bind to {}: {}", addr, e);
            std::process::exit(1);
        }
    };

    info!("Relay listening on ws://{}", addr);

    // Run server with graceful shutdown. Upgraded sockets outlive the
    // HTTP server, so they are told to close separately.
    let served = axum::serve(tcp, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            trigger.trigger();
        })
        .await;

    if let Err(e) = served {
        error!("Server error: {}", e);
    }

    if shutdown.drain(DRAIN_TIMEOUT).await {
        info!("Server shut down gracefully");
    } else {
        let stats = registry.stats().await;
        warn!(
            "Shutdown timed out with {} connections still open",
            stats.active_connections
        );
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
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

    info!("Shutdown signal received");
}
