//! Backend for a university course difficulty meter.
//!
//! Anonymous visitors rate courses on a 0-100 scale and see the running
//! average. The browser UI (degree picker, slider, gauge) is a separate
//! static frontend; this service only exposes the aggregation endpoint.
//!
//!
//!
//! # General Infrastructure
//! - All state lives in the blob store, one JSON document per course code
//! - Requests are stateless read-modify-write cycles; racing writers are
//!   resolved by conditional writes plus a bounded retry loop
//! - Older per-degree records are folded into the unified per-course record
//!   exactly once, when a request carries the degree hint
//!
//!
//!
//! # Abuse Limits
//! - One counted vote per voter fingerprint per course; resubmitting replaces
//!   the prior score instead of inflating the count
//! - A per-voter cooldown throttles rapid flip-flopping on top of that
//! - The fingerprint is best-effort: stable per browser, trivially forgeable
//!   by anyone who cares, and that tradeoff is accepted
use std::{sync::Arc, time::Duration};

use axum::{
    http::{header::CONTENT_TYPE, Method},
    routing::get,
    Router,
};

use signal::{
    ctrl_c,
    unix::{signal, SignalKind},
};
use tokio::{net::TcpListener, signal};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

pub mod aggregate;
pub mod config;
pub mod error;
pub mod routes;
pub mod state;
pub mod store;
pub mod votes;

use routes::{read_handler, vote_handler};
use state::AppState;

pub fn app(state: Arc<AppState>) -> Router {
    // frontend is served from a different origin
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE])
        .max_age(Duration::from_secs(60 * 60));

    Router::new()
        .route("/votes", get(read_handler).post(vote_handler))
        .layer(cors)
        .with_state(state)
}

pub async fn start_server() {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    info!("Initializing state...");
    let state = AppState::new().await;

    info!("Starting server...");
    let router = app(state.clone());

    let address = format!("0.0.0.0:{}", state.config.port);
    info!("Binding to {address}");

    let listener = TcpListener::bind(&address).await.unwrap();
    info!("Server running on {address}");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .unwrap();

    println!("Server shutting down...");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        ctrl_c().await.expect("Failed to install Ctrl+C handler");

        info!("Received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        signal(SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;

        info!("Received terminate signal, shutting down");
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
