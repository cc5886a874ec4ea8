//! Shared fixtures for the manager tests. Most tests run against an
//! in-memory SQLite database, so they are hermetic and parallel-safe;
//! contention tests get a throwaway file-backed pool instead.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use crate::{
    util::random_string, Database, Encore, EncoreConfig, NewUser, PrimaryKey, PublishError,
    Publisher, SessionData, SessionRequest, SqliteDatabase, UserData,
};

/// Records everything published so tests can assert on topics and payloads
#[derive(Default)]
pub struct RecordingPublisher {
    published: Mutex<Vec<(String, serde_json::Value)>>,
}

impl RecordingPublisher {
    pub fn published(&self) -> Vec<(String, serde_json::Value)> {
        self.published.lock().unwrap().clone()
    }
}

#[async_trait]
impl Publisher for RecordingPublisher {
    async fn publish(&self, topic: &str, payload: serde_json::Value) -> Result<(), PublishError> {
        self.published
            .lock()
            .unwrap()
            .push((topic.to_string(), payload));

        Ok(())
    }
}

/// Fails every publish, for exercising the best-effort guarantee
pub struct FailingPublisher;

#[async_trait]
impl Publisher for FailingPublisher {
    async fn publish(&self, _topic: &str, _payload: serde_json::Value) -> Result<(), PublishError> {
        Err(PublishError("transport is down".to_string()))
    }
}

pub async fn database() -> SqliteDatabase {
    // A single connection, or every pool connection gets its own empty db
    SqliteDatabase::with_pool_size("sqlite::memory:", 1)
        .await
        .expect("in-memory database connects")
}

/// A throwaway file-backed database with a real multi-connection pool,
/// for tests that need genuine writer contention. Callers clean up with
/// [`remove_database_file`].
pub async fn file_database(max_connections: u32) -> (SqliteDatabase, PathBuf) {
    let path = std::env::temp_dir().join(format!("encore-test-{}.db", random_string(12)));
    let url = format!("sqlite://{}?mode=rwc", path.display());

    let database = SqliteDatabase::with_pool_size(&url, max_connections)
        .await
        .expect("file database connects");

    (database, path)
}

pub fn remove_database_file(path: &PathBuf) {
    // The WAL sidecar files may or may not exist
    for suffix in ["", "-wal", "-shm"] {
        let mut sidecar = path.clone().into_os_string();
        sidecar.push(suffix);
        let _ = std::fs::remove_file(sidecar);
    }
}

fn config() -> EncoreConfig {
    EncoreConfig {
        realtime_signing_key: Some("test-signing-key".to_string()),
        ..Default::default()
    }
}

pub async fn encore() -> (Encore<SqliteDatabase>, Arc<RecordingPublisher>) {
    let publisher = Arc::new(RecordingPublisher::default());
    let encore = Encore::new(database().await, publisher.clone(), config());

    (encore, publisher)
}

pub fn encore_on(database: SqliteDatabase) -> (Encore<SqliteDatabase>, Arc<RecordingPublisher>) {
    let publisher = Arc::new(RecordingPublisher::default());
    let encore = Encore::new(database, publisher.clone(), config());

    (encore, publisher)
}

pub async fn encore_with_failing_publisher() -> (Encore<SqliteDatabase>, Arc<FailingPublisher>) {
    let publisher = Arc::new(FailingPublisher);
    let encore = Encore::new(database().await, publisher.clone(), config());

    (encore, publisher)
}

pub async fn user(database: &Arc<SqliteDatabase>, name: &str) -> UserData {
    database
        .create_user(NewUser {
            name: name.to_string(),
            email: format!("{}@example.com", name.to_lowercase()),
            avatar_url: None,
        })
        .await
        .expect("test user creates")
}

pub async fn session(
    encore: &Encore<SqliteDatabase>,
    host: &UserData,
    max_participants: i64,
) -> SessionData {
    encore
        .sessions
        .create_session(
            host,
            SessionRequest {
                name: format!("{}'s session", host.name),
                max_participants,
            },
        )
        .await
        .expect("test session creates")
}

pub async fn session_count(database: &Arc<SqliteDatabase>) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM sessions")
        .fetch_one(&database.pool)
        .await
        .expect("counting sessions succeeds")
}

/// Rewrites a session's end stamp to `days` ago, for cleanup tests
pub async fn backdate_session_end(
    database: &Arc<SqliteDatabase>,
    session_id: PrimaryKey,
    days: i64,
) {
    let stamp = Utc::now() - Duration::days(days);

    sqlx::query("UPDATE sessions SET ended_at = ? WHERE id = ?")
        .bind(stamp)
        .bind(session_id)
        .execute(&database.pool)
        .await
        .expect("backdating succeeds");
}
