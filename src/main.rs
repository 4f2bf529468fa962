// src/main.rs
use std::sync::Arc;

use actix_web::{App, HttpServer, middleware::Logger, web};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use paint_requests::blob::{BlobStore, HttpBlobStore, MemoryBlobStore};
use paint_requests::config::Config;
use paint_requests::memory::MemoryStore;
use paint_requests::revocation::MokaBlacklist;
use paint_requests::store::Store;
use paint_requests::{AppState, configure, db};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::from_default_env())
        .finish();
    tracing::subscriber::set_global_default(subscriber).map_err(std::io::Error::other)?;

    tracing::info!("Starting paint request service");

    dotenv::dotenv().ok();
    let config = Config::from_env().map_err(|e| {
        tracing::error!("Failed to load config from environment: {}", e);
        std::io::Error::other(e)
    })?;

    let store: Arc<dyn Store> = match &config.database_url {
        Some(url) => {
            let pool = db::connect(url, config.db_max_connections)
                .await
                .map_err(|e| {
                    tracing::error!("Failed to connect to Postgres: {}", e);
                    std::io::Error::other(e)
                })?;
            if config.run_migrations {
                db::run_migrations(&pool).await.map_err(|e| {
                    tracing::error!("Failed to run migrations: {}", e);
                    std::io::Error::other(e)
                })?;
            }
            Arc::new(db::PgStore::new(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, keeping data in memory");
            Arc::new(MemoryStore::new())
        }
    };

    let blobs: Arc<dyn BlobStore> = match &config.blob_endpoint {
        Some(endpoint) => Arc::new(HttpBlobStore::new(
            endpoint,
            &config.blob_bucket,
            config.blob_token.clone(),
        )),
        None => {
            tracing::warn!("BLOB_ENDPOINT not set, keeping images in memory");
            Arc::new(MemoryBlobStore::new())
        }
    };

    let blacklist = Arc::new(MokaBlacklist::new());
    let state = web::Data::new(AppState::new(&config, store, blobs, blacklist));

    tracing::info!("Listening on {}:{}", config.host, config.port);
    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .wrap(Logger::default())
            .configure(configure)
    })
    .bind((config.host.as_str(), config.port))?
    .run()
    .await
}
