use std::{
    net::{Ipv6Addr, SocketAddr},
    sync::Arc,
    time::Duration,
};

use axum::routing::get;
use log::{error, info, warn};
use thiserror::Error;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};

use encore_collab::{Encore, EncoreConfig, SqliteDatabase};

mod auth;
mod billing;
mod context;
mod docs;
mod errors;
mod playlists;
mod schemas;
mod serialized;
mod sessions;
mod sse;

pub mod config;
pub mod logging;

pub use config::{Config, ConfigError};
use context::ServerContext;
use sse::SseBroker;

pub type Router = axum::Router<ServerContext>;

/// How often the retention sweep runs
const CLEANUP_INTERVAL: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("Could not connect to database: {0}")]
    Database(String),
    #[error("Could not bind to {0}: {1}")]
    Bind(SocketAddr, std::io::Error),
    #[error("Server stopped unexpectedly: {0}")]
    Serve(std::io::Error),
}

/// Starts the encore server
pub async fn run_server(config: Config) -> Result<(), StartupError> {
    let database = SqliteDatabase::new(&config.database_url)
        .await
        .map_err(|e| StartupError::Database(e.to_string()))?;

    if config.realtime_signing_key.is_none() {
        warn!("ENCORE_REALTIME_KEY is not set, realtime tokens are disabled");
    }

    let sse = SseBroker::new();

    let encore = Arc::new(Encore::new(
        database,
        sse.clone(),
        EncoreConfig {
            realtime_signing_key: config.realtime_signing_key.clone(),
            session_retention_days: config.session_retention_days,
            ..Default::default()
        },
    ));

    encore
        .billing
        .seed_default_plans()
        .await
        .map_err(|e| StartupError::Database(e.to_string()))?;

    spawn_cleanup(encore.clone(), config.session_retention_days);

    let context = ServerContext { encore, sse };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let version_one_router = Router::new()
        .nest("/auth", auth::router())
        .nest(
            "/sessions",
            sessions::router()
                .merge(playlists::router())
                .merge(sse::router()),
        )
        .nest("/billing", billing::router());

    let root_router = Router::new()
        .nest("/v1", version_one_router)
        .route("/api.json", get(docs::docs))
        .layer(cors)
        .with_state(context);

    let addr: SocketAddr = (Ipv6Addr::UNSPECIFIED, config.port).into();

    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| StartupError::Bind(addr, e))?;

    info!("Listening on {}", addr);

    axum::serve(listener, root_router.into_make_service())
        .await
        .map_err(StartupError::Serve)
}

/// Reaps ended sessions past the retention window, once an hour
fn spawn_cleanup(encore: Arc<Encore<SqliteDatabase>>, retention_days: i64) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(CLEANUP_INTERVAL);

        loop {
            interval.tick().await;

            match encore.sessions.clean_up(retention_days).await {
                Ok(0) => {}
                Ok(removed) => info!("Cleaned up {} expired sessions", removed),
                Err(e) => error!("Session cleanup failed: {}", e),
            }
        }
    });
}
