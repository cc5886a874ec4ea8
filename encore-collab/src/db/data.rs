use chrono::{DateTime, Utc};
use sqlx::FromRow;

/// The type used for primary keys in the database.
pub type PrimaryKey = i64;

/// An encore account. Users are soft-deleted, so a row may linger
/// after the account is gone; lookups filter on `deleted_at`.
#[derive(Debug, Clone, FromRow)]
pub struct UserData {
    pub id: PrimaryKey,
    pub name: String,
    pub email: String,
    pub roles: String,
    pub avatar_url: Option<String>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An OAuth provider link. Unique per (user, provider name).
#[derive(Debug, Clone, FromRow)]
pub struct ProviderData {
    pub id: PrimaryKey,
    pub user_id: PrimaryKey,
    pub name: String,
    /// The user id on the provider's side
    pub external_id: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// The provider the user prefers for exports
    pub is_main: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Bearer token data for authentication
#[derive(Debug, Clone)]
pub struct AccessTokenData {
    pub id: PrimaryKey,
    /// The token itself, or key if you will
    pub token: String,
    pub expires_at: DateTime<Utc>,
    /// The user that is logged in
    pub user: UserData,
}

/// A billing tier. Immutable reference data seeded at startup.
#[derive(Debug, Clone, FromRow)]
pub struct PlanData {
    pub id: PrimaryKey,
    pub name: String,
    /// Price in minor units of `currency`
    pub amount: i64,
    pub currency: String,
    /// The billing provider's price id
    pub price_ref: String,
    pub is_custom: bool,
}

/// A user's subscription to a plan. At most one per user.
#[derive(Debug, Clone, FromRow)]
pub struct SubscriptionData {
    pub id: PrimaryKey,
    pub user_id: PrimaryKey,
    pub plan_id: PrimaryKey,
    /// The billing provider's subscription id
    pub external_ref: String,
    pub status: String,
    pub started_at: DateTime<Utc>,
    pub ends_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

/// A collaborative session
#[derive(Debug, Clone, FromRow)]
pub struct SessionData {
    pub id: PrimaryKey,
    pub name: String,
    /// The unique join code participants use to enter
    pub code: String,
    /// The host, if the account still exists
    pub host_id: Option<PrimaryKey>,
    pub max_participants: i64,
    /// Set when the host ends the session. An ended session is
    /// eligible for cleanup after the retention window.
    pub ended_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A pseudonymous member of a session's roster
#[derive(Debug, Clone, FromRow)]
pub struct ParticipantData {
    pub id: PrimaryKey,
    pub session_id: PrimaryKey,
    pub pseudo: String,
    pub active: bool,
    pub left_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The playlist tied 1:1 to a session via its code
#[derive(Debug, Clone, FromRow)]
pub struct PlaylistData {
    pub id: PrimaryKey,
    pub name: String,
    pub session_code: String,
    pub user_id: PrimaryKey,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A catalogue entry for an externally sourced track, shared across
/// playlists. `external_id` is unique, find-or-create semantics.
#[derive(Debug, Clone, FromRow)]
pub struct SongData {
    pub id: PrimaryKey,
    pub external_id: String,
    pub title: String,
    pub artists: String,
    pub artwork_url: Option<String>,
    pub created_at: DateTime<Utc>,
}
