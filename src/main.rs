use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::signal;
use tracing_subscriber::{fmt, EnvFilter};

use cutmatch::{
    analytics::{Analytics, GoogleAnalyticsProvider},
    app::build_router,
    catalog::StyleCatalog,
    config::Config,
    middleware::SlidingWindowLimiter,
    replicate::ReplicateClient,
    routes::AppState,
};

const LIMITER_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    // Init tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    let config = Config::from_env();
    if config.development {
        tracing::warn!("Running in development mode: error responses include internal detail");
    }

    let catalog = StyleCatalog::load_embedded().context("failed to load style catalog")?;
    let replicate = ReplicateClient::new(&config.replicate);
    tracing::info!(configured = replicate.is_configured(), "Replicate client ready");

    let analytics = Analytics::new();
    match GoogleAnalyticsProvider::from_config(&config.analytics) {
        Some(provider) => {
            analytics.initialize(Arc::new(provider));
        }
        None => tracing::info!("Analytics disabled: measurement id or API secret not set"),
    }

    let limiter = Arc::new(SlidingWindowLimiter::per_minute(config.rate_limit_per_minute));
    let sweeper = limiter.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(LIMITER_SWEEP_INTERVAL);
        loop {
            ticker.tick().await;
            let removed = sweeper.sweep();
            if removed > 0 {
                tracing::debug!(removed, "swept idle rate limit entries");
            }
        }
    });

    let state = AppState {
        catalog: Arc::new(catalog),
        generator: Arc::new(replicate),
        analytics,
        expose_errors: config.development,
    };
    let app = build_router(state, &config, limiter);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(%addr, rate_limit = config.rate_limit_per_minute, "Starting server");

    // No draining: in-flight requests are dropped when a termination signal arrives.
    tokio::select! {
        result = axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).into_future() => {
            result.context("server error")?;
        }
        () = shutdown_signal() => {}
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(%e, "Error handling Ctrl+C signal");
            std::future::pending::<()>().await;
        }
        tracing::info!("Received Ctrl+C signal");
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut handler) => {
                handler.recv().await;
                tracing::info!("Received SIGTERM signal");
            }
            Err(e) => {
                tracing::error!(%e, "Failed to install SIGTERM handler");
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
    tracing::info!("Shutdown signal received, exiting");
}
