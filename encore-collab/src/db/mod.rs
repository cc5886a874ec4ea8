use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

mod data;
pub use data::*;

mod sqlite;
pub use sqlite::*;

pub type Result<T> = std::result::Result<T, DatabaseError>;

#[derive(Debug, Error)]
pub enum DatabaseError {
    /// An unknown or internal error happened with the database
    #[error(transparent)]
    Internal(Box<dyn std::error::Error + Send + Sync>),
    /// A resource already exists, or a constraint would be violated
    #[error("{resource} with {field} of value {value} already exists")]
    Conflict {
        /// The resource in question
        resource: &'static str,
        /// The field that is conflicting
        field: &'static str,
        /// The conflicting value
        value: String,
    },
    /// A resource in the database doesn't exist
    #[error("{resource}:{identifier} doesn't exist")]
    NotFound {
        resource: &'static str,
        identifier: &'static str,
    },
}

/// Helper trait to reduce boilerplate
pub trait IntoDatabaseError {
    fn not_found_or(self, resource: &'static str, identifier: &'static str) -> DatabaseError;
    fn any(self) -> DatabaseError;
}

/// Helper trait to reduce boilerplate
pub trait DatabaseResult {
    /// Turns the Result into a conflict error if it's Ok()
    fn conflict_or_ok(self, resource: &'static str, field: &'static str, value: &str)
        -> Result<()>;
}

impl<T> DatabaseResult for Result<T> {
    fn conflict_or_ok(
        self,
        resource: &'static str,
        field: &'static str,
        value: &str,
    ) -> Result<()> {
        match self {
            Ok(_) => Err(DatabaseError::Conflict {
                resource,
                field,
                value: value.to_string(),
            }),
            Err(e) => match e {
                DatabaseError::NotFound { .. } => Ok(()),
                e => Err(e),
            },
        }
    }
}

/// Represents a type that can fetch encore data from a database
#[async_trait]
pub trait Database: Send + Sync + 'static {
    async fn user_by_id(&self, user_id: PrimaryKey) -> Result<UserData>;
    async fn user_by_email(&self, email: &str) -> Result<UserData>;
    async fn create_user(&self, new_user: NewUser) -> Result<UserData>;
    async fn update_user(&self, updated_user: UpdatedUser) -> Result<UserData>;
    /// Stamps `deleted_at`. Sessions hosted by the user keep a null host.
    async fn soft_delete_user(&self, user_id: PrimaryKey) -> Result<()>;

    async fn access_token(&self, token: &str) -> Result<AccessTokenData>;
    async fn create_access_token(&self, new_token: NewAccessToken) -> Result<AccessTokenData>;
    async fn delete_access_token(&self, token: &str) -> Result<()>;
    async fn clear_expired_access_tokens(&self) -> Result<()>;

    async fn providers_by_user(&self, user_id: PrimaryKey) -> Result<Vec<ProviderData>>;
    /// Creates the provider link on first login, refreshes tokens afterwards
    async fn upsert_provider(&self, new_provider: NewProvider) -> Result<ProviderData>;

    async fn plan_by_id(&self, plan_id: PrimaryKey) -> Result<PlanData>;
    async fn plan_by_price_ref(&self, price_ref: &str) -> Result<PlanData>;
    async fn list_plans(&self) -> Result<Vec<PlanData>>;
    /// Inserts the plan unless one with the same name already exists
    async fn seed_plan(&self, new_plan: NewPlan) -> Result<PlanData>;

    async fn subscription_by_user(&self, user_id: PrimaryKey) -> Result<SubscriptionData>;
    /// Creates the user's subscription, or updates it in place if one
    /// exists. Never produces a second row for the same user.
    async fn upsert_subscription(&self, new: NewSubscription) -> Result<SubscriptionData>;

    async fn session_by_id(&self, session_id: PrimaryKey) -> Result<SessionData>;
    async fn session_by_code(&self, code: &str) -> Result<SessionData>;
    async fn create_session(&self, new_session: NewSession) -> Result<SessionData>;
    /// Stamps `ended_at`, making the session eligible for cleanup
    async fn end_session(&self, session_id: PrimaryKey) -> Result<SessionData>;
    async fn delete_session(&self, session_id: PrimaryKey) -> Result<()>;
    async fn sessions_ended_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<SessionData>>;
    /// Deletes the given sessions in a single transaction
    async fn delete_sessions(&self, session_ids: &[PrimaryKey]) -> Result<u64>;

    /// Admission-controlled insert. Runs pseudo-uniqueness check,
    /// capacity check, and insert in one transaction, in that order.
    /// Violations surface as [DatabaseError::Conflict] with a `pseudo`
    /// or `capacity` field respectively.
    async fn create_participant(&self, new_participant: NewParticipant)
        -> Result<ParticipantData>;
    async fn participant_by_id(&self, participant_id: PrimaryKey) -> Result<ParticipantData>;
    async fn active_participant_by_pseudo(
        &self,
        session_id: PrimaryKey,
        pseudo: &str,
    ) -> Result<ParticipantData>;
    /// Active rows only, ordered by join time ascending
    async fn active_participants(&self, session_id: PrimaryKey) -> Result<Vec<ParticipantData>>;
    async fn count_active_participants(&self, session_id: PrimaryKey) -> Result<i64>;
    /// Flags the row inactive and stamps `left_at`
    async fn deactivate_participant(&self, participant_id: PrimaryKey)
        -> Result<ParticipantData>;

    async fn playlist_by_code(&self, session_code: &str) -> Result<PlaylistData>;
    async fn create_playlist(&self, new_playlist: NewPlaylist) -> Result<PlaylistData>;
    /// Refuses with a conflict error while the playlist still has songs
    async fn delete_playlist(&self, playlist_id: PrimaryKey) -> Result<()>;

    async fn song_by_external_id(&self, external_id: &str) -> Result<SongData>;
    async fn create_song(&self, new_song: NewSong) -> Result<SongData>;
    /// In attachment order
    async fn songs_in_playlist(&self, playlist_id: PrimaryKey) -> Result<Vec<SongData>>;
    async fn attach_song(&self, playlist_id: PrimaryKey, song_id: PrimaryKey) -> Result<()>;
    async fn detach_song(&self, playlist_id: PrimaryKey, song_id: PrimaryKey) -> Result<()>;
    async fn playlist_count_for_song(&self, song_id: PrimaryKey) -> Result<i64>;
    async fn delete_song(&self, song_id: PrimaryKey) -> Result<()>;
    /// Deletes songs with zero playlist memberships, returning how many
    async fn delete_orphaned_songs(&self) -> Result<u64>;
}

#[derive(Debug)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub avatar_url: Option<String>,
}

#[derive(Debug)]
pub struct UpdatedUser {
    pub id: PrimaryKey,
    pub name: Option<String>,
    pub avatar_url: Option<String>,
}

#[derive(Debug)]
pub struct NewAccessToken {
    pub token: String,
    pub user_id: PrimaryKey,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct NewProvider {
    pub user_id: PrimaryKey,
    pub name: String,
    pub external_id: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub is_main: bool,
}

#[derive(Debug)]
pub struct NewPlan {
    pub name: String,
    pub amount: i64,
    pub currency: String,
    pub price_ref: String,
    pub is_custom: bool,
}

#[derive(Debug)]
pub struct NewSubscription {
    pub user_id: PrimaryKey,
    pub plan_id: PrimaryKey,
    pub external_ref: String,
    pub status: String,
    pub started_at: DateTime<Utc>,
    pub ends_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
pub struct NewSession {
    pub name: String,
    pub code: String,
    /// The host of the new session
    pub host_id: Option<PrimaryKey>,
    pub max_participants: i64,
}

#[derive(Debug)]
pub struct NewParticipant {
    pub session_id: PrimaryKey,
    pub pseudo: String,
}

#[derive(Debug)]
pub struct NewPlaylist {
    pub name: String,
    pub session_code: String,
    /// The creator of the new playlist
    pub user_id: PrimaryKey,
}

#[derive(Debug)]
pub struct NewSong {
    pub external_id: String,
    pub title: String,
    pub artists: String,
    pub artwork_url: Option<String>,
}
