//! All schemas that are exposed from endpoints are defined here
//! along with the [ToSerialized] impls

use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use encore_collab::{
    AccessTokenData, ParticipantData, PlanData, PlaylistData, SessionData, SongData,
    SubscriptionData, UserData,
};

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct User {
    id: i64,
    name: String,
    email: String,
    avatar_url: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LoginResult {
    token: String,
    user: User,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub code: String,
    pub name: String,
    pub max_participants: i64,
    pub ended_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// A session together with its live roster
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SessionOverview {
    #[serde(flatten)]
    pub session: Session,
    pub participants: Vec<Participant>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub id: i64,
    pub pseudo: String,
}

/// What a successful join hands back
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct JoinResult {
    pub id: i64,
    pub pseudo: String,
    pub session_code: String,
    pub active_participant_count: i64,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Playlist {
    pub id: i64,
    pub name: String,
    pub session_code: String,
    pub songs: Vec<Song>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Song {
    external_id: String,
    title: String,
    artists: String,
    artwork_url: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    name: String,
    amount: i64,
    currency: String,
    price_ref: String,
    is_custom: bool,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    plan_id: i64,
    status: String,
    started_at: DateTime<Utc>,
    ends_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeToken {
    pub token: String,
    pub mode: String,
}

/// Helper trait to convert any type into a serialized version
pub trait ToSerialized<T>
where
    T: Serialize,
{
    fn to_serialized(&self) -> T;
}

impl<I, O> ToSerialized<Vec<O>> for Vec<I>
where
    I: ToSerialized<O>,
    O: Serialize,
{
    fn to_serialized(&self) -> Vec<O> {
        self.iter().map(|x| x.to_serialized()).collect()
    }
}

impl ToSerialized<User> for UserData {
    fn to_serialized(&self) -> User {
        User {
            id: self.id,
            name: self.name.clone(),
            email: self.email.clone(),
            avatar_url: self.avatar_url.clone(),
        }
    }
}

impl ToSerialized<LoginResult> for AccessTokenData {
    fn to_serialized(&self) -> LoginResult {
        LoginResult {
            token: self.token.clone(),
            user: self.user.to_serialized(),
        }
    }
}

impl ToSerialized<Session> for SessionData {
    fn to_serialized(&self) -> Session {
        Session {
            code: self.code.clone(),
            name: self.name.clone(),
            max_participants: self.max_participants,
            ended_at: self.ended_at,
            created_at: self.created_at,
        }
    }
}

impl ToSerialized<Participant> for ParticipantData {
    fn to_serialized(&self) -> Participant {
        Participant {
            id: self.id,
            pseudo: self.pseudo.clone(),
        }
    }
}

impl ToSerialized<Song> for SongData {
    fn to_serialized(&self) -> Song {
        Song {
            external_id: self.external_id.clone(),
            title: self.title.clone(),
            artists: self.artists.clone(),
            artwork_url: self.artwork_url.clone(),
        }
    }
}

impl ToSerialized<Plan> for PlanData {
    fn to_serialized(&self) -> Plan {
        Plan {
            name: self.name.clone(),
            amount: self.amount,
            currency: self.currency.clone(),
            price_ref: self.price_ref.clone(),
            is_custom: self.is_custom,
        }
    }
}

impl ToSerialized<Subscription> for SubscriptionData {
    fn to_serialized(&self) -> Subscription {
        Subscription {
            plan_id: self.plan_id,
            status: self.status.clone(),
            started_at: self.started_at,
            ends_at: self.ends_at,
        }
    }
}

/// Playlists serialize together with their songs, so there is no plain
/// [ToSerialized] impl for [PlaylistData] alone.
pub fn playlist_with_songs(playlist: &PlaylistData, songs: &[SongData]) -> Playlist {
    Playlist {
        id: playlist.id,
        name: playlist.name.clone(),
        session_code: playlist.session_code.clone(),
        songs: songs.iter().map(|s| s.to_serialized()).collect(),
    }
}
