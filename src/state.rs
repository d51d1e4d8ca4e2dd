use std::sync::Arc;

use crate::config::Config;
use crate::ingest::Ingestor;

/// Central application state shared across all Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Ingestion pipeline over the metadata and blob stores.
    pub ingestor: Arc<Ingestor>,

    /// Application configuration loaded from environment variables or `.env`.
    pub config: Arc<Config>,
}
