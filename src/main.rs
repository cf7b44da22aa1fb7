use anyhow::Result;
use axum::{extract::State, http::StatusCode, response::Json, routing::get, Router};
use prometheus::TextEncoder;
use serde_json::json;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::{net::TcpListener, signal};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use window_throttle::{
    config::{load_config_from_file, FixedWindowConfig},
    limiter::FixedWindowLimiter,
    metrics::Metrics,
    middleware::ThrottleLayer,
};

#[derive(Clone)]
struct AppState {
    limiter: Arc<FixedWindowLimiter>,
    metrics: Arc<Metrics>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "window_throttle=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting fixed-window throttle service");

    let config = load_policy()?;
    info!(
        "Admission policy: {} permits per {:?}, queue limit {} ({:?})",
        config.permit_limit, config.window, config.queue_limit, config.queue_order
    );

    // Initialize components
    let metrics = Metrics::new()?;
    let limiter = Arc::new(FixedWindowLimiter::new(config)?);

    let throttle = ThrottleLayer::new(Arc::clone(&limiter)).with_metrics(metrics.clone());
    let state = AppState {
        limiter: Arc::clone(&limiter),
        metrics: Arc::new(metrics),
    };

    let http_addr = std::env::var("HTTP_PORT")
        .unwrap_or_else(|_| "0.0.0.0:8080".to_string())
        .parse::<SocketAddr>()?;

    let http_server = start_http_server(state, throttle, http_addr);
    info!("HTTP server listening on {}", http_addr);

    // Wait for shutdown signal
    tokio::select! {
        result = http_server => {
            if let Err(e) = result {
                warn!("HTTP server error: {}", e);
            }
        }
        _ = signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    // Drain queued waiters before exiting
    limiter.shutdown();
    info!("Service stopped");
    Ok(())
}

fn load_policy() -> Result<FixedWindowConfig> {
    match std::env::var("CONFIG_PATH") {
        Ok(path) => {
            info!("Loading admission policy from: {}", path);
            Ok(load_config_from_file(&path)?)
        }
        // 2 requests every 10 seconds, no queueing
        Err(_) => Ok(FixedWindowConfig::new(2, Duration::from_secs(10))),
    }
}

async fn start_http_server(
    state: AppState,
    throttle: ThrottleLayer,
    addr: SocketAddr,
) -> Result<()> {
    // The demo route is throttled; health and metrics stay open
    let app: Router = Router::new()
        .route("/", get(index))
        .route_layer(throttle)
        .route("/healthcheck", get(health_check))
        .route("/metrics", get(metrics_handler))
        .with_state(state);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn index() -> Json<serde_json::Value> {
    Json(json!({ "message": "Hello from the throttled endpoint" }))
}

async fn health_check(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "limiter": state.limiter.stats(),
    }))
}

async fn metrics_handler(State(state): State<AppState>) -> Result<String, StatusCode> {
    state.metrics.observe_limiter(&state.limiter.stats());

    let encoder = TextEncoder::new();
    let metric_families = state.metrics.registry().gather();

    match encoder.encode_to_string(&metric_families) {
        Ok(metrics) => Ok(metrics),
        Err(_) => Err(StatusCode::INTERNAL_SERVER_ERROR),
    }
}
