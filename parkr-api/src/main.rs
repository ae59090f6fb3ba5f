use parkr_api::{app, bootstrap::build_state, worker::start_activation_worker};
use parkr_core::SystemClock;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "parkr_api=debug,parkr_reservation=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = parkr_store::app_config::Config::load().expect("Failed to load config");
    tracing::info!("Starting parkr API on port {}", config.server.port);

    let app_state = build_state(&config, Arc::new(SystemClock))
        .await
        .expect("Failed to initialise services");

    let shutdown = CancellationToken::new();
    let activation = start_activation_worker(&app_state, shutdown.clone());

    let app = app(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.expect("Failed to bind");
    let signal = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown requested");
            signal.cancel();
        })
        .await
        .expect("Server error");

    shutdown.cancel();
    let _ = activation.await;
}
