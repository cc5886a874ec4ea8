use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;

use encore_collab::{
    AuthError, BillingError, DatabaseError, ParticipantError, PlaylistError, SessionError,
    TokenError,
};

pub type ServerResult<T> = Result<T, ServerError>;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("{resource}:{identifier} not found")]
    NotFound {
        resource: &'static str,
        identifier: &'static str,
    },
    #[error("{resource} with {field} of value {value} already exists")]
    Conflict {
        resource: &'static str,
        field: &'static str,
        value: String,
    },
    #[error("Invalid or expired access token")]
    InvalidToken,
    #[error("Pseudo is already taken in this session")]
    PseudoTaken,
    #[error("Session is full")]
    SessionFull,
    #[error("Session has already ended")]
    SessionEnded,
    #[error("Only the session host can do this")]
    NotHost,
    #[error("Song is already in the playlist")]
    DuplicateSong,
    #[error("Song is not in the playlist")]
    SongNotFound,
    #[error("Realtime tokens are not available")]
    RealtimeUnavailable,
    #[error("Unknown internal error: {0}")]
    Unknown(String),
}

/// The JSON body of every error response
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    /// A stable machine-readable identifier for the error
    pub code: &'static str,
    pub message: String,
}

impl ServerError {
    fn as_status_code(&self) -> StatusCode {
        match self {
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::Conflict { .. } => StatusCode::CONFLICT,
            Self::InvalidToken => StatusCode::UNAUTHORIZED,
            Self::PseudoTaken => StatusCode::CONFLICT,
            Self::SessionFull => StatusCode::CONFLICT,
            Self::SessionEnded => StatusCode::GONE,
            Self::NotHost => StatusCode::FORBIDDEN,
            Self::DuplicateSong => StatusCode::CONFLICT,
            Self::SongNotFound => StatusCode::NOT_FOUND,
            Self::RealtimeUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::Unknown(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable codes clients can branch on without parsing messages
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "errors.not_found",
            Self::Conflict { .. } => "errors.conflict",
            Self::InvalidToken => "auth.errors.invalid_token",
            Self::PseudoTaken => "session.join.errors.pseudo_taken",
            Self::SessionFull => "session.join.errors.session_full",
            Self::SessionEnded => "session.join.errors.session_ended",
            Self::NotHost => "session.errors.not_host",
            Self::DuplicateSong => "playlist.errors.duplicate_song",
            Self::SongNotFound => "playlist.errors.song_not_found",
            Self::RealtimeUnavailable => "realtime.errors.unavailable",
            Self::Unknown(_) => "errors.internal",
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            code: self.code(),
            message: self.to_string(),
        };

        (self.as_status_code(), Json(body)).into_response()
    }
}

impl From<DatabaseError> for ServerError {
    fn from(value: DatabaseError) -> Self {
        match value {
            DatabaseError::NotFound {
                resource,
                identifier,
            } => Self::NotFound {
                resource,
                identifier,
            },
            DatabaseError::Conflict {
                resource,
                field,
                value,
            } => Self::Conflict {
                resource,
                field,
                value,
            },
            e => Self::Unknown(e.to_string()),
        }
    }
}

impl From<AuthError> for ServerError {
    fn from(value: AuthError) -> Self {
        match value {
            AuthError::InvalidToken => Self::InvalidToken,
            AuthError::Db(e) => e.into(),
        }
    }
}

impl From<ParticipantError> for ServerError {
    fn from(value: ParticipantError) -> Self {
        match value {
            ParticipantError::PseudoTaken => Self::PseudoTaken,
            ParticipantError::SessionFull => Self::SessionFull,
            ParticipantError::SessionEnded => Self::SessionEnded,
            ParticipantError::Db(e) => e.into(),
        }
    }
}

impl From<PlaylistError> for ServerError {
    fn from(value: PlaylistError) -> Self {
        match value {
            PlaylistError::DuplicateSong => Self::DuplicateSong,
            PlaylistError::SongNotFound => Self::SongNotFound,
            PlaylistError::PlaylistNotEmpty => Self::Conflict {
                resource: "playlist",
                field: "songs",
                value: "non-empty".to_string(),
            },
            PlaylistError::Db(e) => e.into(),
        }
    }
}

impl From<SessionError> for ServerError {
    fn from(value: SessionError) -> Self {
        match value {
            SessionError::NotHost => Self::NotHost,
            SessionError::Join(e) => e.into(),
            SessionError::Db(e) => e.into(),
            e => Self::Unknown(e.to_string()),
        }
    }
}

impl From<TokenError> for ServerError {
    fn from(value: TokenError) -> Self {
        match value {
            TokenError::SigningKeyMissing => Self::RealtimeUnavailable,
            TokenError::Invalid(_) => Self::InvalidToken,
        }
    }
}

impl From<BillingError> for ServerError {
    fn from(value: BillingError) -> Self {
        match value {
            BillingError::Db(e) => e.into(),
            // Webhook failures stay opaque to the caller
            e => Self::Unknown(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admission_errors_map_to_conflict_statuses() {
        let taken: ServerError = ParticipantError::PseudoTaken.into();
        assert_eq!(taken.as_status_code(), StatusCode::CONFLICT);
        assert_eq!(taken.code(), "session.join.errors.pseudo_taken");

        let full: ServerError = ParticipantError::SessionFull.into();
        assert_eq!(full.as_status_code(), StatusCode::CONFLICT);
        assert_eq!(full.code(), "session.join.errors.session_full");

        let ended: ServerError = ParticipantError::SessionEnded.into();
        assert_eq!(ended.as_status_code(), StatusCode::GONE);
    }

    #[test]
    fn host_authority_maps_to_forbidden() {
        let error: ServerError = SessionError::NotHost.into();
        assert_eq!(error.as_status_code(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn billing_failures_are_opaque_internal_errors() {
        let error: ServerError = BillingError::UserNotFound.into();
        assert_eq!(error.as_status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(error.code(), "errors.internal");
    }

    #[test]
    fn missing_signing_key_reports_unavailable() {
        let error: ServerError = TokenError::SigningKeyMissing.into();
        assert_eq!(error.as_status_code(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
