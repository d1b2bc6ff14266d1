use anyhow::Context;
use auspex_backend::config::Config;
use auspex_backend::supervisor::Supervisor;
use auspex_backend::{RateLimitConfig, create_app, platform};
use auspex_state::Trackers;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing for structured logging
    #[cfg(debug_assertions)]
    let log_level = "debug";
    #[cfg(not(debug_assertions))]
    let log_level = "info";

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level)),
        )
        .with_target(false)
        .compact()
        .init();
    tracing::info!("Starting Auspex...");
    // Load configuration from environment variables or use defaults
    let config = Config::from_env()?;
    tracing::info!(
        "Configuration: port={}, platforms={:?}, endpoint={}, relogin_delay={}s, bus_capacity={}, timeout={}s",
        config.port,
        config.platforms,
        config.stream_endpoint,
        config.relogin_delay.as_secs(),
        config.bus_queue_capacity,
        config.request_timeout.as_secs()
    );
    tracing::info!(
        "Rate limit: {}/sec (burst {})",
        config.rate_limit_per_sec,
        config.rate_limit_burst
    );

    let trackers = Arc::new(Trackers::new());
    let settings = config.pipeline();
    let mut root = Supervisor::new("auspex");
    for &tracked in &config.platforms {
        let (subtree, handle) = platform::build(tracked, &settings, &trackers).await;
        let mut ready = handle.ready;
        tokio::spawn(async move {
            while ready.changed().await.is_ok() {
                let ready = *ready.borrow();
                tracing::info!(platform = %tracked, ready, "readiness changed");
            }
        });
        root = root.unit(tracked.as_str(), subtree.into_unit());
    }

    let app = create_app(
        trackers,
        config.request_body_limit,
        config.request_timeout,
        Some(RateLimitConfig {
            per_sec: config.rate_limit_per_sec,
            burst: config.rate_limit_burst,
        }),
    )?;
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!("Server listening on {}", addr);

    let root = root.unit("http", move |token: CancellationToken| async move {
        axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
            .with_graceful_shutdown(token.cancelled_owned())
            .await
            .context("http server failed")
    });

    let token = CancellationToken::new();
    tokio::spawn({
        let token = token.clone();
        async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for Ctrl-C: {}", e);
                return;
            }
            tracing::info!("Ctrl-C received, shutting down");
            token.cancel();
        }
    });

    root.run(token).await?;
    tracing::info!("Auspex stopped");
    Ok(())
}
