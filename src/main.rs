mod config;
mod db;
mod error;
mod handlers;
mod models;
mod service;
mod tasks;
mod translate;
mod voting;

use std::sync::Arc;

use config::{Config, StoreKind};
use db::{Database, MemoryStore, PollStore};
use handlers::AppState;
use log::{error, info, warn};
use service::PollService;
use tokio::net::TcpListener;
use translate::{GoogleTranslator, Passthrough, Translator};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[cfg(feature = "embedded-postgres")]
type EmbeddedPostgres = postgresql_embedded::PostgreSQL;
#[cfg(not(feature = "embedded-postgres"))]
type EmbeddedPostgres = ();

#[tokio::main]
async fn main() {
    // Initialize logging
    dotenvy::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = run(config).await {
        error!("Server error: {}", e);
        std::process::exit(1);
    }
}

async fn run(config: Config) -> Result<(), BoxError> {
    // Kept alive until the server stops.
    let mut embedded: Option<EmbeddedPostgres> = None;
    let store = open_store(&config, &mut embedded).await?;

    let translator: Arc<dyn Translator> = if config.translate {
        info!("Translating missing English fields to '{}'.", config.translate_target);
        Arc::new(GoogleTranslator::new())
    } else {
        Arc::new(Passthrough)
    };

    let polls = Arc::new(PollService::new(store, translator, config.translate_target.clone()));

    if config.admin_token.is_none() {
        warn!("POLLS_ADMIN_TOKEN is not set; admin poll routes are open to everyone.");
    }

    if config.auto_close {
        let polls = Arc::clone(&polls);
        let period = config.auto_close_interval;
        tokio::spawn(async move {
            tasks::poll_ender::close_expired_polls_task(polls, period).await;
        });
    }

    let app = handlers::router(AppState::new(polls, config.admin_token.clone()));

    let listener = TcpListener::bind(config.bind_addr).await?;
    info!("Poll API listening on {}", config.bind_addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Poll API stopped.");
    Ok(())
}

async fn open_store(
    config: &Config,
    embedded: &mut Option<EmbeddedPostgres>,
) -> Result<Arc<dyn PollStore>, BoxError> {
    match config.store {
        StoreKind::Memory => {
            warn!("Using the in-memory poll store; polls are lost on restart.");
            Ok(Arc::new(MemoryStore::new()))
        }
        StoreKind::Postgres => {
            let database_url = match &config.database_url {
                Some(url) => url.clone(),
                None => start_embedded_postgres(embedded).await?,
            };

            let database = Database::connect(&database_url, config.max_connections).await?;
            if config.init_schema {
                database.init_schema().await?;
            }
            info!("Connected to Postgres (pool size {}).", config.max_connections);
            Ok(Arc::new(database))
        }
    }
}

#[cfg(feature = "embedded-postgres")]
async fn start_embedded_postgres(slot: &mut Option<EmbeddedPostgres>) -> Result<String, BoxError> {
    const DATABASE_NAME: &str = "community_polls";

    info!("DATABASE_URL is not set; starting embedded Postgres.");
    let mut postgresql = postgresql_embedded::PostgreSQL::default();
    postgresql.setup().await?;
    postgresql.start().await?;
    if !postgresql.database_exists(DATABASE_NAME).await? {
        postgresql.create_database(DATABASE_NAME).await?;
    }

    let url = postgresql.settings().url(DATABASE_NAME);
    *slot = Some(postgresql);
    Ok(url)
}

#[cfg(not(feature = "embedded-postgres"))]
async fn start_embedded_postgres(_slot: &mut Option<EmbeddedPostgres>) -> Result<String, BoxError> {
    Err(config::ConfigError::Missing("DATABASE_URL").into())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                ctrl_c.await.ok();
                info!("Received Ctrl+C, shutting down...");
                return;
            }
        };
        tokio::select! {
            _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
