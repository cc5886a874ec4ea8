use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{ParticipantData, PrimaryKey, SessionData};

/// Returns the logical channel all events of a session are published on
pub fn session_topic(code: &str) -> String {
    format!("session/{}", code)
}

#[derive(Debug, Error)]
#[error("publish failed: {0}")]
pub struct PublishError(pub String);

/// A capability to fan a payload out to the live subscribers of a topic.
/// Delivery is best-effort: the domain treats failures as non-fatal.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, topic: &str, payload: serde_json::Value) -> Result<(), PublishError>;
}

/// Events emitted on a session's topic. Subscribers that miss one must
/// reconcile with a full re-fetch, there is no replay.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    /// The host ended the session
    SessionEnded { session: SessionSummary },
    /// The session was deleted outright
    SessionDeleted { session: SessionSummary },
    /// Someone was admitted to the roster
    ParticipantJoined {
        session: SessionSummary,
        participant: ParticipantSummary,
        /// The updated active participant count
        participant_count: i64,
    },
    /// Someone left the roster, voluntarily or not
    ParticipantLeft {
        session: SessionSummary,
        participant: ParticipantSummary,
        reason: LeaveReason,
    },
    /// A song was added to the session's playlist
    SongAdded {
        session: SessionSummary,
        external_id: String,
        title: String,
    },
    /// A song was removed from the session's playlist
    SongRemoved {
        session: SessionSummary,
        external_id: String,
    },
}

impl SessionEvent {
    /// The wire name of the event, for log context
    pub fn name(&self) -> &'static str {
        match self {
            Self::SessionEnded { .. } => "session_ended",
            Self::SessionDeleted { .. } => "session_deleted",
            Self::ParticipantJoined { .. } => "participant_joined",
            Self::ParticipantLeft { .. } => "participant_left",
            Self::SongAdded { .. } => "song_added",
            Self::SongRemoved { .. } => "song_removed",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub code: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ParticipantSummary {
    pub id: PrimaryKey,
    pub pseudo: String,
}

/// Why a participant was removed from the roster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaveReason {
    #[default]
    Leave,
    Kicked,
    Timeout,
}

impl From<&SessionData> for SessionSummary {
    fn from(session: &SessionData) -> Self {
        Self {
            code: session.code.clone(),
            name: session.name.clone(),
        }
    }
}

impl From<&ParticipantData> for ParticipantSummary {
    fn from(participant: &ParticipantData) -> Self {
        Self {
            id: participant.id,
            pseudo: participant.pseudo.clone(),
        }
    }
}
