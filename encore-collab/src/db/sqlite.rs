use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqlitePoolOptions, Error as SqlxError, FromRow, SqliteConnection, SqlitePool};

use crate::{
    Database, DatabaseError, DatabaseResult, IntoDatabaseError, NewAccessToken, NewParticipant,
    NewPlan, NewPlaylist, NewProvider, NewSession, NewSong, NewSubscription, NewUser,
    ParticipantData, PlanData, PlaylistData, PrimaryKey, ProviderData, Result, SessionData,
    SongData, SubscriptionData, UpdatedUser, UserData,
};

use super::AccessTokenData;

/// A SQLite database implementation for encore
pub struct SqliteDatabase {
    pub(crate) pool: SqlitePool,
}

/// The schema is applied on connect. Every statement is idempotent, so
/// reconnecting against an existing file is safe.
const SCHEMA: &[&str] = &[
    "PRAGMA foreign_keys = ON",
    "CREATE TABLE IF NOT EXISTS users (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        email TEXT NOT NULL UNIQUE,
        roles TEXT NOT NULL DEFAULT 'user',
        avatar_url TEXT,
        deleted_at TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS providers (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id INTEGER NOT NULL REFERENCES users (id) ON DELETE CASCADE,
        name TEXT NOT NULL,
        external_id TEXT NOT NULL,
        access_token TEXT NOT NULL,
        refresh_token TEXT,
        is_main INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        UNIQUE (user_id, name)
    )",
    "CREATE TABLE IF NOT EXISTS access_tokens (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        token TEXT NOT NULL UNIQUE,
        user_id INTEGER NOT NULL REFERENCES users (id) ON DELETE CASCADE,
        expires_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS plans (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE,
        amount INTEGER NOT NULL,
        currency TEXT NOT NULL,
        price_ref TEXT NOT NULL UNIQUE,
        is_custom INTEGER NOT NULL DEFAULT 0
    )",
    "CREATE TABLE IF NOT EXISTS subscriptions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id INTEGER NOT NULL UNIQUE REFERENCES users (id) ON DELETE CASCADE,
        plan_id INTEGER NOT NULL REFERENCES plans (id),
        external_ref TEXT NOT NULL,
        status TEXT NOT NULL,
        started_at TEXT NOT NULL,
        ends_at TEXT,
        cancelled_at TEXT
    )",
    "CREATE TABLE IF NOT EXISTS sessions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        code TEXT NOT NULL UNIQUE,
        host_id INTEGER REFERENCES users (id) ON DELETE SET NULL,
        max_participants INTEGER NOT NULL,
        ended_at TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS session_participants (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        session_id INTEGER NOT NULL REFERENCES sessions (id) ON DELETE CASCADE,
        pseudo TEXT NOT NULL,
        active INTEGER NOT NULL DEFAULT 1,
        left_at TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS playlists (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        session_code TEXT NOT NULL UNIQUE,
        user_id INTEGER NOT NULL REFERENCES users (id),
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS songs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        external_id TEXT NOT NULL UNIQUE,
        title TEXT NOT NULL,
        artists TEXT NOT NULL,
        artwork_url TEXT,
        created_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS playlist_songs (
        playlist_id INTEGER NOT NULL REFERENCES playlists (id) ON DELETE CASCADE,
        song_id INTEGER NOT NULL REFERENCES songs (id) ON DELETE CASCADE,
        position INTEGER NOT NULL,
        UNIQUE (playlist_id, song_id)
    )",
];

/// Flat row used to join an access token with its user
#[derive(FromRow)]
struct AccessTokenRow {
    id: PrimaryKey,
    token: String,
    user_id: PrimaryKey,
    expires_at: DateTime<Utc>,
}

impl SqliteDatabase {
    pub async fn new(url: &str) -> Result<Self> {
        Self::with_pool_size(url, 5).await
    }

    /// Connects with an explicit pool size. In-memory databases need a
    /// single connection, since every pool connection would otherwise
    /// get its own empty database.
    pub async fn with_pool_size(url: &str, max_connections: u32) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .map_err(|e| DatabaseError::Internal(Box::new(e)))?;

        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&pool)
                .await
                .map_err(|e| DatabaseError::Internal(Box::new(e)))?;
        }

        Ok(Self { pool })
    }
}

#[async_trait]
impl Database for SqliteDatabase {
    async fn user_by_id(&self, user_id: PrimaryKey) -> Result<UserData> {
        sqlx::query_as::<_, UserData>(
            "SELECT * FROM users WHERE id = ?1 AND deleted_at IS NULL",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| e.not_found_or("user", "id"))
    }

    async fn user_by_email(&self, email: &str) -> Result<UserData> {
        sqlx::query_as::<_, UserData>(
            "SELECT * FROM users WHERE email = ?1 AND deleted_at IS NULL",
        )
        .bind(email)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| e.not_found_or("user", "email"))
    }

    async fn create_user(&self, new_user: NewUser) -> Result<UserData> {
        self.user_by_email(&new_user.email)
            .await
            .conflict_or_ok("user", "email", &new_user.email)?;

        let now = Utc::now();

        sqlx::query_as::<_, UserData>(
            "INSERT INTO users (name, email, roles, avatar_url, created_at, updated_at)
             VALUES (?1, ?2, 'user', ?3, ?4, ?4)
             RETURNING *",
        )
        .bind(new_user.name)
        .bind(new_user.email)
        .bind(new_user.avatar_url)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| e.any())
    }

    async fn update_user(&self, updated_user: UpdatedUser) -> Result<UserData> {
        let user = self.user_by_id(updated_user.id).await?;

        sqlx::query("UPDATE users SET name = ?1, avatar_url = ?2, updated_at = ?3 WHERE id = ?4")
            .bind(updated_user.name.unwrap_or(user.name))
            .bind(updated_user.avatar_url.or(user.avatar_url))
            .bind(Utc::now())
            .bind(updated_user.id)
            .execute(&self.pool)
            .await
            .map_err(|e| e.any())?;

        self.user_by_id(updated_user.id).await
    }

    async fn soft_delete_user(&self, user_id: PrimaryKey) -> Result<()> {
        // Ensure user exists
        let _ = self.user_by_id(user_id).await?;

        sqlx::query(
            "UPDATE users SET deleted_at = ?1, updated_at = ?1 WHERE id = ?2",
        )
        .bind(Utc::now())
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(|e| e.any())?;

        // Hosted sessions lose their host but keep running
        sqlx::query("UPDATE sessions SET host_id = NULL WHERE host_id = ?1")
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(|e| e.any())
            .map(|_| ())
    }

    async fn access_token(&self, token: &str) -> Result<AccessTokenData> {
        let row = sqlx::query_as::<_, AccessTokenRow>(
            "SELECT * FROM access_tokens WHERE token = ?1",
        )
        .bind(token)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| e.not_found_or("access token", "token"))?;

        let user = self
            .user_by_id(row.user_id)
            .await
            .map_err(|_| DatabaseError::NotFound {
                resource: "access token",
                identifier: "token",
            })?;

        Ok(AccessTokenData {
            id: row.id,
            token: row.token,
            expires_at: row.expires_at,
            user,
        })
    }

    async fn create_access_token(&self, new_token: NewAccessToken) -> Result<AccessTokenData> {
        self.access_token(&new_token.token)
            .await
            .conflict_or_ok("access token", "token", &new_token.token)?;

        let token: String = sqlx::query_scalar(
            "INSERT INTO access_tokens (token, user_id, expires_at)
             VALUES (?1, ?2, ?3)
             RETURNING token",
        )
        .bind(new_token.token)
        .bind(new_token.user_id)
        .bind(new_token.expires_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| e.any())?;

        self.access_token(&token).await
    }

    async fn delete_access_token(&self, token: &str) -> Result<()> {
        sqlx::query("DELETE FROM access_tokens WHERE token = ?1")
            .bind(token)
            .execute(&self.pool)
            .await
            .map_err(|e| e.any())
            .map(|_| ())
    }

    async fn clear_expired_access_tokens(&self) -> Result<()> {
        sqlx::query("DELETE FROM access_tokens WHERE expires_at < ?1")
            .bind(Utc::now())
            .execute(&self.pool)
            .await
            .map_err(|e| e.any())
            .map(|_| ())
    }

    async fn providers_by_user(&self, user_id: PrimaryKey) -> Result<Vec<ProviderData>> {
        sqlx::query_as::<_, ProviderData>(
            "SELECT * FROM providers WHERE user_id = ?1 ORDER BY created_at ASC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| e.any())
    }

    async fn upsert_provider(&self, new_provider: NewProvider) -> Result<ProviderData> {
        let now = Utc::now();

        let existing: Option<PrimaryKey> = sqlx::query_scalar(
            "SELECT id FROM providers WHERE user_id = ?1 AND name = ?2",
        )
        .bind(new_provider.user_id)
        .bind(&new_provider.name)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| e.any())?;

        let id = match existing {
            Some(id) => {
                sqlx::query(
                    "UPDATE providers SET
                        external_id = ?1,
                        access_token = ?2,
                        refresh_token = ?3,
                        updated_at = ?4
                    WHERE id = ?5",
                )
                .bind(&new_provider.external_id)
                .bind(&new_provider.access_token)
                .bind(&new_provider.refresh_token)
                .bind(now)
                .bind(id)
                .execute(&self.pool)
                .await
                .map_err(|e| e.any())?;

                id
            }
            None => sqlx::query_scalar(
                "INSERT INTO providers
                    (user_id, name, external_id, access_token, refresh_token, is_main,
                     created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
                 RETURNING id",
            )
            .bind(new_provider.user_id)
            .bind(&new_provider.name)
            .bind(&new_provider.external_id)
            .bind(&new_provider.access_token)
            .bind(&new_provider.refresh_token)
            .bind(new_provider.is_main)
            .bind(now)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| e.any())?,
        };

        sqlx::query_as::<_, ProviderData>("SELECT * FROM providers WHERE id = ?1")
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| e.not_found_or("provider", "id"))
    }

    async fn plan_by_id(&self, plan_id: PrimaryKey) -> Result<PlanData> {
        sqlx::query_as::<_, PlanData>("SELECT * FROM plans WHERE id = ?1")
            .bind(plan_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| e.not_found_or("plan", "id"))
    }

    async fn plan_by_price_ref(&self, price_ref: &str) -> Result<PlanData> {
        sqlx::query_as::<_, PlanData>("SELECT * FROM plans WHERE price_ref = ?1")
            .bind(price_ref)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| e.not_found_or("plan", "price_ref"))
    }

    async fn list_plans(&self) -> Result<Vec<PlanData>> {
        sqlx::query_as::<_, PlanData>("SELECT * FROM plans ORDER BY amount ASC")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| e.any())
    }

    async fn seed_plan(&self, new_plan: NewPlan) -> Result<PlanData> {
        let existing = sqlx::query_as::<_, PlanData>("SELECT * FROM plans WHERE name = ?1")
            .bind(&new_plan.name)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| e.any())?;

        if let Some(plan) = existing {
            return Ok(plan);
        }

        sqlx::query_as::<_, PlanData>(
            "INSERT INTO plans (name, amount, currency, price_ref, is_custom)
             VALUES (?1, ?2, ?3, ?4, ?5)
             RETURNING *",
        )
        .bind(new_plan.name)
        .bind(new_plan.amount)
        .bind(new_plan.currency)
        .bind(new_plan.price_ref)
        .bind(new_plan.is_custom)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| e.any())
    }

    async fn subscription_by_user(&self, user_id: PrimaryKey) -> Result<SubscriptionData> {
        sqlx::query_as::<_, SubscriptionData>(
            "SELECT * FROM subscriptions WHERE user_id = ?1",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| e.not_found_or("subscription", "user_id"))
    }

    async fn upsert_subscription(&self, new: NewSubscription) -> Result<SubscriptionData> {
        let existing = self.subscription_by_user(new.user_id).await;

        match existing {
            Ok(subscription) => {
                sqlx::query(
                    "UPDATE subscriptions SET
                        plan_id = ?1,
                        external_ref = ?2,
                        status = ?3,
                        started_at = ?4,
                        ends_at = ?5,
                        cancelled_at = NULL
                    WHERE id = ?6",
                )
                .bind(new.plan_id)
                .bind(&new.external_ref)
                .bind(&new.status)
                .bind(new.started_at)
                .bind(new.ends_at)
                .bind(subscription.id)
                .execute(&self.pool)
                .await
                .map_err(|e| e.any())?;

                self.subscription_by_user(new.user_id).await
            }
            Err(DatabaseError::NotFound { .. }) => sqlx::query_as::<_, SubscriptionData>(
                "INSERT INTO subscriptions
                    (user_id, plan_id, external_ref, status, started_at, ends_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 RETURNING *",
            )
            .bind(new.user_id)
            .bind(new.plan_id)
            .bind(new.external_ref)
            .bind(new.status)
            .bind(new.started_at)
            .bind(new.ends_at)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| e.any()),
            Err(e) => Err(e),
        }
    }

    async fn session_by_id(&self, session_id: PrimaryKey) -> Result<SessionData> {
        sqlx::query_as::<_, SessionData>("SELECT * FROM sessions WHERE id = ?1")
            .bind(session_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| e.not_found_or("session", "id"))
    }

    async fn session_by_code(&self, code: &str) -> Result<SessionData> {
        sqlx::query_as::<_, SessionData>("SELECT * FROM sessions WHERE code = ?1")
            .bind(code)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| e.not_found_or("session", "code"))
    }

    async fn create_session(&self, new_session: NewSession) -> Result<SessionData> {
        self.session_by_code(&new_session.code)
            .await
            .conflict_or_ok("session", "code", &new_session.code)?;

        let now = Utc::now();

        sqlx::query_as::<_, SessionData>(
            "INSERT INTO sessions (name, code, host_id, max_participants, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)
             RETURNING *",
        )
        .bind(new_session.name)
        .bind(new_session.code)
        .bind(new_session.host_id)
        .bind(new_session.max_participants)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| e.any())
    }

    async fn end_session(&self, session_id: PrimaryKey) -> Result<SessionData> {
        // Ensure session exists
        let _ = self.session_by_id(session_id).await?;

        sqlx::query("UPDATE sessions SET ended_at = ?1, updated_at = ?1 WHERE id = ?2")
            .bind(Utc::now())
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map_err(|e| e.any())?;

        self.session_by_id(session_id).await
    }

    async fn delete_session(&self, session_id: PrimaryKey) -> Result<()> {
        // Ensure session exists
        let _ = self.session_by_id(session_id).await?;

        // Participants cascade via the foreign key
        sqlx::query("DELETE FROM sessions WHERE id = ?1")
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map_err(|e| e.any())
            .map(|_| ())
    }

    async fn sessions_ended_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<SessionData>> {
        sqlx::query_as::<_, SessionData>(
            "SELECT * FROM sessions WHERE ended_at IS NOT NULL AND ended_at < ?1",
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| e.any())
    }

    async fn delete_sessions(&self, session_ids: &[PrimaryKey]) -> Result<u64> {
        let mut tx = self.pool.begin().await.map_err(|e| e.any())?;
        let mut deleted = 0;

        for session_id in session_ids {
            let result = sqlx::query("DELETE FROM sessions WHERE id = ?1")
                .bind(session_id)
                .execute(&mut *tx)
                .await
                .map_err(|e| e.any())?;

            deleted += result.rows_affected();
        }

        tx.commit().await.map_err(|e| e.any())?;

        Ok(deleted)
    }

    async fn create_participant(
        &self,
        new_participant: NewParticipant,
    ) -> Result<ParticipantData> {
        // The whole admission sequence runs in one immediate transaction
        // so two concurrent joins can't both pass the checks. A deferred
        // transaction would let both connections read during the checks
        // and then fail the write-lock upgrade with SQLITE_BUSY, so the
        // write lock is taken up front instead.
        let mut conn = self.pool.acquire().await.map_err(|e| e.any())?;

        sqlx::query("BEGIN IMMEDIATE")
            .execute(&mut *conn)
            .await
            .map_err(|e| e.any())?;

        match admit_participant(&mut conn, new_participant).await {
            Ok(participant) => {
                sqlx::query("COMMIT")
                    .execute(&mut *conn)
                    .await
                    .map_err(|e| e.any())?;

                Ok(participant)
            }
            Err(e) => {
                let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
                Err(e)
            }
        }
    }

    async fn participant_by_id(&self, participant_id: PrimaryKey) -> Result<ParticipantData> {
        sqlx::query_as::<_, ParticipantData>(
            "SELECT * FROM session_participants WHERE id = ?1",
        )
        .bind(participant_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| e.not_found_or("participant", "id"))
    }

    async fn active_participant_by_pseudo(
        &self,
        session_id: PrimaryKey,
        pseudo: &str,
    ) -> Result<ParticipantData> {
        sqlx::query_as::<_, ParticipantData>(
            "SELECT * FROM session_participants
             WHERE session_id = ?1 AND pseudo = ?2 AND active = 1",
        )
        .bind(session_id)
        .bind(pseudo)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| e.not_found_or("participant", "pseudo"))
    }

    async fn active_participants(&self, session_id: PrimaryKey) -> Result<Vec<ParticipantData>> {
        sqlx::query_as::<_, ParticipantData>(
            "SELECT * FROM session_participants
             WHERE session_id = ?1 AND active = 1
             ORDER BY created_at ASC, id ASC",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| e.any())
    }

    async fn count_active_participants(&self, session_id: PrimaryKey) -> Result<i64> {
        sqlx::query_scalar(
            "SELECT COUNT(*) FROM session_participants WHERE session_id = ?1 AND active = 1",
        )
        .bind(session_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| e.any())
    }

    async fn deactivate_participant(
        &self,
        participant_id: PrimaryKey,
    ) -> Result<ParticipantData> {
        // Ensure participant exists
        let _ = self.participant_by_id(participant_id).await?;

        sqlx::query(
            "UPDATE session_participants SET active = 0, left_at = ?1, updated_at = ?1
             WHERE id = ?2",
        )
        .bind(Utc::now())
        .bind(participant_id)
        .execute(&self.pool)
        .await
        .map_err(|e| e.any())?;

        self.participant_by_id(participant_id).await
    }

    async fn playlist_by_code(&self, session_code: &str) -> Result<PlaylistData> {
        sqlx::query_as::<_, PlaylistData>(
            "SELECT * FROM playlists WHERE session_code = ?1",
        )
        .bind(session_code)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| e.not_found_or("playlist", "session_code"))
    }

    async fn create_playlist(&self, new_playlist: NewPlaylist) -> Result<PlaylistData> {
        self.playlist_by_code(&new_playlist.session_code)
            .await
            .conflict_or_ok("playlist", "session_code", &new_playlist.session_code)?;

        let now = Utc::now();

        sqlx::query_as::<_, PlaylistData>(
            "INSERT INTO playlists (name, session_code, user_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)
             RETURNING *",
        )
        .bind(new_playlist.name)
        .bind(new_playlist.session_code)
        .bind(new_playlist.user_id)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| e.any())
    }

    async fn delete_playlist(&self, playlist_id: PrimaryKey) -> Result<()> {
        let songs: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM playlist_songs WHERE playlist_id = ?1",
        )
        .bind(playlist_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| e.any())?;

        if songs > 0 {
            return Err(DatabaseError::Conflict {
                resource: "playlist",
                field: "songs",
                value: songs.to_string(),
            });
        }

        sqlx::query("DELETE FROM playlists WHERE id = ?1")
            .bind(playlist_id)
            .execute(&self.pool)
            .await
            .map_err(|e| e.any())
            .map(|_| ())
    }

    async fn song_by_external_id(&self, external_id: &str) -> Result<SongData> {
        sqlx::query_as::<_, SongData>("SELECT * FROM songs WHERE external_id = ?1")
            .bind(external_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| e.not_found_or("song", "external_id"))
    }

    async fn create_song(&self, new_song: NewSong) -> Result<SongData> {
        self.song_by_external_id(&new_song.external_id)
            .await
            .conflict_or_ok("song", "external_id", &new_song.external_id)?;

        sqlx::query_as::<_, SongData>(
            "INSERT INTO songs (external_id, title, artists, artwork_url, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             RETURNING *",
        )
        .bind(new_song.external_id)
        .bind(new_song.title)
        .bind(new_song.artists)
        .bind(new_song.artwork_url)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| e.any())
    }

    async fn songs_in_playlist(&self, playlist_id: PrimaryKey) -> Result<Vec<SongData>> {
        sqlx::query_as::<_, SongData>(
            "SELECT songs.* FROM songs
                INNER JOIN playlist_songs ON playlist_songs.song_id = songs.id
             WHERE playlist_songs.playlist_id = ?1
             ORDER BY playlist_songs.position ASC",
        )
        .bind(playlist_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| e.any())
    }

    async fn attach_song(&self, playlist_id: PrimaryKey, song_id: PrimaryKey) -> Result<()> {
        sqlx::query(
            "INSERT INTO playlist_songs (playlist_id, song_id, position)
             VALUES (
                ?1, ?2,
                (SELECT COALESCE(MAX(position), 0) + 1 FROM playlist_songs
                 WHERE playlist_id = ?1)
             )",
        )
        .bind(playlist_id)
        .bind(song_id)
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            SqlxError::Database(ref db) if db.is_unique_violation() => DatabaseError::Conflict {
                resource: "playlist song",
                field: "song_id",
                value: song_id.to_string(),
            },
            e => e.any(),
        })
        .map(|_| ())
    }

    async fn detach_song(&self, playlist_id: PrimaryKey, song_id: PrimaryKey) -> Result<()> {
        let result = sqlx::query(
            "DELETE FROM playlist_songs WHERE playlist_id = ?1 AND song_id = ?2",
        )
        .bind(playlist_id)
        .bind(song_id)
        .execute(&self.pool)
        .await
        .map_err(|e| e.any())?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound {
                resource: "playlist song",
                identifier: "song_id",
            });
        }

        Ok(())
    }

    async fn playlist_count_for_song(&self, song_id: PrimaryKey) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM playlist_songs WHERE song_id = ?1")
            .bind(song_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| e.any())
    }

    async fn delete_song(&self, song_id: PrimaryKey) -> Result<()> {
        sqlx::query("DELETE FROM songs WHERE id = ?1")
            .bind(song_id)
            .execute(&self.pool)
            .await
            .map_err(|e| e.any())
            .map(|_| ())
    }

    async fn delete_orphaned_songs(&self) -> Result<u64> {
        sqlx::query(
            "DELETE FROM songs
             WHERE id NOT IN (SELECT song_id FROM playlist_songs)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| e.any())
        .map(|r| r.rows_affected())
    }
}

/// The admission checks and the insert, run inside the transaction
/// `create_participant` opens on `conn`.
async fn admit_participant(
    conn: &mut SqliteConnection,
    new_participant: NewParticipant,
) -> Result<ParticipantData> {
    let session = sqlx::query_as::<_, SessionData>("SELECT * FROM sessions WHERE id = ?1")
        .bind(new_participant.session_id)
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| e.not_found_or("session", "id"))?;

    // Pseudo uniqueness is checked before capacity on purpose, so a
    // full session still reports a taken pseudo correctly
    let taken: Option<PrimaryKey> = sqlx::query_scalar(
        "SELECT id FROM session_participants
         WHERE session_id = ?1 AND pseudo = ?2 AND active = 1",
    )
    .bind(new_participant.session_id)
    .bind(&new_participant.pseudo)
    .fetch_optional(&mut *conn)
    .await
    .map_err(|e| e.any())?;

    if taken.is_some() {
        return Err(DatabaseError::Conflict {
            resource: "participant",
            field: "pseudo",
            value: new_participant.pseudo,
        });
    }

    let active: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM session_participants WHERE session_id = ?1 AND active = 1",
    )
    .bind(new_participant.session_id)
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| e.any())?;

    if active >= session.max_participants {
        return Err(DatabaseError::Conflict {
            resource: "participant",
            field: "capacity",
            value: active.to_string(),
        });
    }

    sqlx::query_as::<_, ParticipantData>(
        "INSERT INTO session_participants (session_id, pseudo, active, created_at, updated_at)
         VALUES (?1, ?2, 1, ?3, ?3)
         RETURNING *",
    )
    .bind(new_participant.session_id)
    .bind(&new_participant.pseudo)
    .bind(Utc::now())
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| e.any())
}

impl IntoDatabaseError for SqlxError {
    fn any(self) -> DatabaseError {
        DatabaseError::Internal(Box::new(self))
    }

    fn not_found_or(self, resource: &'static str, identifier: &'static str) -> DatabaseError {
        match self {
            SqlxError::RowNotFound => DatabaseError::NotFound {
                resource,
                identifier,
            },
            e => Self::any(e),
        }
    }
}
