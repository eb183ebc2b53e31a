//! JSON API over the recording service.
//!
//! Handlers are thin and delegate to [`RecordingService`]; errors are
//! mapped to status codes in [`responses`].

use anyhow::Result;
use axum::{
    routing::{delete, get},
    Router,
};
use std::net::SocketAddr;
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::config::WebConfig;
use crate::services::RecordingService;

pub mod api;
pub mod responses;

pub use responses::{handle_error, ApiError, ApiResult};

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub recordings: RecordingService,
}

/// Build the router with all routes and middleware
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(api::health_check))
        .nest("/api", api_routes())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn api_routes() -> Router<AppState> {
    Router::new()
        // Stations
        .route("/stations", get(api::list_stations).post(api::create_station))
        .route("/stations/:id", delete(api::delete_station))
        // Recordings
        .route(
            "/recordings",
            get(api::list_recordings).post(api::schedule_recording),
        )
        .route(
            "/recordings/:id",
            get(api::get_recording).delete(api::delete_recording),
        )
        .route("/stats", get(api::get_stats))
}

/// Web server configuration and setup
pub struct WebServer {
    app: Router,
    addr: SocketAddr,
}

impl WebServer {
    pub fn new(config: &WebConfig, state: AppState) -> Result<Self> {
        let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
        Ok(Self {
            app: create_router(state),
            addr,
        })
    }

    /// Serve until the token is cancelled
    pub async fn serve(self, cancellation_token: CancellationToken) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(&self.addr).await?;
        axum::serve(listener, self.app)
            .with_graceful_shutdown(async move { cancellation_token.cancelled().await })
            .await?;
        Ok(())
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }
}
