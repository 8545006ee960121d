use axum::{middleware, routing::get, Router};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub mod admin;
pub mod api;
pub mod client;
pub mod config;
pub mod db;
pub mod mcp;
pub mod models;
pub mod services;
pub mod store;

use config::AppConfig;
use services::{ai::OpenAiClient, tmdb::TmdbClient};
use store::CatalogStore;

pub struct AppState {
    pub store: Arc<dyn CatalogStore>,
    pub config: AppConfig,
    /// Present only when TMDB credentials are configured
    pub tmdb: Option<TmdbClient>,
    /// Present only when an LLM API key is configured
    pub ai: Option<OpenAiClient>,
}

impl AppState {
    /// Build the shared state, constructing lookup clients for whatever
    /// credentials the configuration carries.
    pub fn new(store: Arc<dyn CatalogStore>, config: AppConfig) -> anyhow::Result<Self> {
        let tmdb = TmdbClient::from_config(&config.enrichment)?;
        let ai = OpenAiClient::from_config(&config.enrichment)?;

        Ok(Self {
            store,
            config,
            tmdb,
            ai,
        })
    }
}

async fn root_handler() -> &'static str {
    "Movie Catalog API"
}

/// The complete HTTP application: catalog endpoints plus banner and health check.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(root_handler).head(root_handler))
        .route("/health", get(|| async { "OK" }))
        .merge(api::routes())
        .layer(CorsLayer::permissive())
        .layer(middleware::from_fn(api::preflight_no_content))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
