mod auth;
mod classifier;
mod config;
mod database;
mod dedup;
mod error;
mod filename;
mod handlers;
mod ingest;
mod migrate;
mod models;
mod state;
mod storage;
mod transcoder;
mod utils;

use std::sync::Arc;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::{
    auth::require_api_key,
    config::Config,
    database::{PgMetadataStore, init_db, run_migrations},
    handlers::upload_file,
    ingest::Ingestor,
    state::AppState,
    storage::init_storage,
};

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env()?;

    let pool = init_db(&config.database_url).await?;
    run_migrations(&pool).await?;

    let storage = init_storage(&config).await?;

    let ingestor = Arc::new(Ingestor::new(
        config.ingest_config(),
        Arc::new(PgMetadataStore::new(pool)),
        Arc::new(storage),
    ));

    if std::env::args().nth(1).as_deref() == Some("migrate") {
        let report = ingestor.backfill().await?;
        info!(?report, "Backfill finished");
        return Ok(());
    }

    let bind_addr = config.bind_addr.clone();
    let app = app(AppState {
        ingestor,
        config: Arc::new(config),
    });

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("Server listening on {}", bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}

fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let protected = Router::new()
        .route("/upload", post(upload_file))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_api_key));

    Router::new()
        .route("/health", get(health_check))
        .merge(protected)
        .layer(DefaultBodyLimit::max(state.config.max_request_body()))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> &'static str {
    "OK"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::tests::sample,
        database::memory::MemoryStore,
        handlers::tests::{BOUNDARY, multipart_body},
        ingest::tests::jpeg,
        storage::LocalStorage,
    };
    use axum::{
        body::{Body, to_bytes},
        http::{Request, StatusCode, header},
    };
    use tempfile::TempDir;
    use tower::ServiceExt;

    async fn test_app() -> (Router, TempDir) {
        let dir = TempDir::new().unwrap();
        let config = Config {
            max_file_size: 5 * 1024 * 1024,
            ..sample()
        };
        let blobs = LocalStorage::new(dir.path()).await.unwrap();
        let ingestor = Ingestor::new(
            config.ingest_config(),
            Arc::new(MemoryStore::new()),
            Arc::new(blobs),
        );
        let state = AppState {
            ingestor: Arc::new(ingestor),
            config: Arc::new(config),
        };
        (app(state), dir)
    }

    fn upload_request(api_key: Option<&str>, body: Vec<u8>) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/upload")
            .header(header::CONTENT_TYPE, format!("multipart/form-data; boundary={BOUNDARY}"));
        if let Some(key) = api_key {
            builder = builder.header("x-api-key", key);
        }
        builder.body(Body::from(body)).unwrap()
    }

    #[tokio::test]
    async fn upload_is_rejected_without_the_right_api_key() {
        let (app, dir) = test_app().await;
        let photo = jpeg(10, 10, 1);
        let body = || multipart_body(&[("file", Some("a.jpg"), &photo[..])]);

        let missing = app.clone().oneshot(upload_request(None, body())).await.unwrap();
        assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);

        let wrong = app.clone().oneshot(upload_request(Some("nope"), body())).await.unwrap();
        assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);

        assert!(!dir.path().join("img").join("a.jpg").exists());

        let health = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(health.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn multipart_upload_returns_the_record_and_its_urls() {
        let (app, dir) = test_app().await;
        let photo = jpeg(40, 20, 1);
        let body = multipart_body(&[
            ("file", Some("client.jpg"), &photo[..]),
            ("filename", None, &b"chosen.jpg"[..]),
        ]);

        let response = app.oneshot(upload_request(Some("secret"), body)).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["status"], "success");
        assert_eq!(json["data"]["filename"], "chosen.jpg");
        assert_eq!(json["data"]["urls"]["image"], "https://cdn.example.com/img/chosen.jpg");
        assert_eq!(json["data"]["urls"]["thumbnail"], "https://cdn.example.com/thumbs/chosen.jpg");
        assert!(dir.path().join("img").join("chosen.jpg").exists());
    }

    #[tokio::test]
    async fn disallowed_content_is_unsupported_media_type() {
        let (app, _dir) = test_app().await;
        let body = multipart_body(&[("file", Some("notes.txt"), &b"plain text"[..])]);

        let response = app.oneshot(upload_request(Some("secret"), body)).await.unwrap();

        assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    }
}
