//! HTTP surface: `/api/generate`, `/api/edit` and `/health`, plus an
//! optional static UI directory.

mod handlers;


use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use studio_engine::Studio;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::info;

pub const MAX_BODY_BYTES: usize = 20 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub studio: Arc<Studio>,
}

impl AppState {
    pub fn new(studio: Studio) -> Self {
        Self {
            studio: Arc::new(studio),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServeOptions {
    pub host: String,
    pub port: u16,
    pub static_dir: Option<PathBuf>,
}

pub fn api_router() -> Router<AppState> {
    Router::new()
        .route("/generate", post(handlers::generate))
        .route("/edit", post(handlers::edit))
        .fallback(handlers::api_not_found)
}

pub fn build_router(state: AppState, static_dir: Option<PathBuf>) -> Router {
    let app = Router::new()
        .nest("/api", api_router())
        .route("/health", get(handlers::health))
        .with_state(state);

    let app = match static_dir {
        Some(dir) => {
            app.fallback_service(ServeDir::new(dir).append_index_html_on_directories(true))
        }
        None => app,
    };

    app.layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

pub async fn serve(state: AppState, options: ServeOptions) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", options.host, options.port)
        .parse()
        .with_context(|| format!("invalid listen address {}:{}", options.host, options.port))?;
    if let Some(dir) = options.static_dir.as_ref() {
        info!(dir = %dir.display(), "serving static files");
    }
    let app = build_router(state, options.static_dir);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("studio listening on http://{addr}");
    axum::serve(listener, app).await?;
    Ok(())
}
