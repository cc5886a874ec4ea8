mod code;

use chrono::{Duration, Utc};
use log::info;
use thiserror::Error;

pub use code::{CODE_ALPHABET, CODE_LENGTH};

use crate::{
    Database, DatabaseError, EncoreContext, NewSession, ParticipantError, ParticipantManager,
    PlaylistError, PlaylistManager, SessionData, SessionEvent, UserData,
};

/// How many candidate codes are tried before giving up
const CODE_ATTEMPTS: usize = 10;

/// Creates, ends, and reaps sessions, enforcing host-only authority
/// over the mutating operations.
pub struct SessionManager<Db> {
    context: EncoreContext<Db>,
    participants: ParticipantManager<Db>,
    playlists: PlaylistManager<Db>,
}

#[derive(Debug, Error)]
pub enum SessionError {
    /// A non-host tried a host-only operation
    #[error("Only the session host can do this")]
    NotHost,
    /// Every candidate code collided, which should not happen in practice
    #[error("Could not generate a unique session code")]
    CodeGenerationExhausted,
    /// The cleanup retention window must be at least one day
    #[error("Retention must be at least one day")]
    InvalidRetention,
    #[error(transparent)]
    Join(#[from] ParticipantError),
    #[error(transparent)]
    Db(#[from] DatabaseError),
}

/// A request to create a new session
#[derive(Debug)]
pub struct SessionRequest {
    pub name: String,
    pub max_participants: i64,
}

impl<Db> SessionManager<Db>
where
    Db: Database,
{
    pub fn new(context: &EncoreContext<Db>) -> Self {
        Self {
            context: context.clone(),
            participants: ParticipantManager::new(context),
            playlists: PlaylistManager::new(context),
        }
    }

    /// Creates a session with a fresh unique code, its playlist, and the
    /// host enrolled as first participant under their display name.
    pub async fn create_session(
        &self,
        host: &UserData,
        request: SessionRequest,
    ) -> Result<SessionData, SessionError> {
        let code = unique_code(&*self.context.database, CODE_ALPHABET, CODE_LENGTH).await?;

        let session = self
            .context
            .database
            .create_session(NewSession {
                name: request.name.clone(),
                code,
                host_id: Some(host.id),
                max_participants: request.max_participants,
            })
            .await?;

        let prepared = async {
            self.playlists
                .create_session_playlist(host, &session.code, &session.name)
                .await?;

            self.participants.join_session(&session, &host.name).await?;

            Ok::<_, SessionError>(())
        }
        .await;

        // Don't leave a half-set-up session behind
        if let Err(e) = prepared {
            let _ = self.context.database.delete_session(session.id).await;
            let _ = self.discard_playlist(&session.code).await;
            return Err(e);
        }

        info!("{} created session {} ({})", host.name, session.name, session.code);

        Ok(session)
    }

    /// Case-sensitive exact lookup. Absence is not an error.
    pub async fn session_by_code(
        &self,
        code: &str,
    ) -> Result<Option<SessionData>, DatabaseError> {
        match self.context.database.session_by_code(code).await {
            Ok(session) => Ok(Some(session)),
            Err(DatabaseError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn session_by_id(
        &self,
        session_id: crate::PrimaryKey,
    ) -> Result<SessionData, DatabaseError> {
        self.context.database.session_by_id(session_id).await
    }

    /// Ends the session. Host only. The session stays around, read-only,
    /// until the cleanup sweep reaps it after the retention window.
    pub async fn end_session(
        &self,
        session: &SessionData,
        acting_user: &UserData,
    ) -> Result<SessionData, SessionError> {
        self.ensure_host(session, acting_user)?;

        self.context
            .publish(
                &session.code,
                SessionEvent::SessionEnded {
                    session: session.into(),
                },
            )
            .await;

        let ended = self.context.database.end_session(session.id).await?;

        info!("{} ended session {}", acting_user.name, session.code);

        Ok(ended)
    }

    /// Deletes the session outright, cascading its participants and
    /// removing its playlist if that playlist is empty. Host only.
    pub async fn delete_session(
        &self,
        session: &SessionData,
        acting_user: &UserData,
    ) -> Result<(), SessionError> {
        self.ensure_host(session, acting_user)?;

        self.context
            .publish(
                &session.code,
                SessionEvent::SessionDeleted {
                    session: session.into(),
                },
            )
            .await;

        self.context.database.delete_session(session.id).await?;
        self.discard_playlist(&session.code).await?;

        info!("{} deleted session {}", acting_user.name, session.code);

        Ok(())
    }

    /// Reaps sessions that ended more than `days` ago, deleting the batch
    /// in a single transaction. Returns how many were removed; finding
    /// none is a no-op success.
    pub async fn clean_up(&self, days: i64) -> Result<usize, SessionError> {
        if days < 1 {
            return Err(SessionError::InvalidRetention);
        }

        let cutoff = Utc::now() - Duration::days(days);
        let expired = self.context.database.sessions_ended_before(cutoff).await?;

        if expired.is_empty() {
            return Ok(0);
        }

        for session in &expired {
            info!(
                "Cleaning up session {} ({}), ended at {:?}",
                session.code, session.name, session.ended_at
            );
        }

        let ids: Vec<_> = expired.iter().map(|s| s.id).collect();
        self.context.database.delete_sessions(&ids).await?;

        for session in &expired {
            self.discard_playlist(&session.code).await?;
        }

        self.context.database.delete_orphaned_songs().await?;

        Ok(expired.len())
    }

    fn ensure_host(
        &self,
        session: &SessionData,
        acting_user: &UserData,
    ) -> Result<(), SessionError> {
        if session.host_id != Some(acting_user.id) {
            return Err(SessionError::NotHost);
        }

        Ok(())
    }

    /// Removes a session's playlist if it is empty. A playlist that
    /// still has songs is left alone.
    async fn discard_playlist(&self, session_code: &str) -> Result<(), SessionError> {
        match self.playlists.delete_playlist_by_code(session_code).await {
            Ok(()) | Err(PlaylistError::PlaylistNotEmpty) => Ok(()),
            Err(PlaylistError::Db(e)) => Err(SessionError::Db(e)),
            // Deletion by code can't fail any other way
            Err(_) => Ok(()),
        }
    }
}

/// Generates a code that no session, live or ended, already uses.
/// Bounded so a pathological collision streak fails loudly instead of
/// looping forever.
async fn unique_code<Db: Database>(
    database: &Db,
    alphabet: &[u8],
    length: usize,
) -> Result<String, SessionError> {
    for _ in 0..CODE_ATTEMPTS {
        let candidate = code::random_code(alphabet, length);

        match database.session_by_code(&candidate).await {
            Ok(_) => continue,
            Err(DatabaseError::NotFound { .. }) => return Ok(candidate),
            Err(e) => return Err(e.into()),
        }
    }

    Err(SessionError::CodeGenerationExhausted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    #[tokio::test]
    async fn creating_a_session_sets_up_code_playlist_and_host_seat() {
        let (encore, events) = testing::encore().await;
        let host = testing::user(encore.database(), "Herbert").await;

        let session = encore
            .sessions
            .create_session(
                &host,
                SessionRequest {
                    name: "Friday night".to_string(),
                    max_participants: 4,
                },
            )
            .await
            .unwrap();

        assert_eq!(session.code.len(), CODE_LENGTH);
        assert!(session.code.bytes().all(|b| CODE_ALPHABET.contains(&b)));
        assert!(session.ended_at.is_none());

        let playlist = encore
            .playlists
            .playlist_by_code(&session.code)
            .await
            .unwrap();
        assert!(playlist.is_some());

        let roster = encore.participants.active_participants(&session).await.unwrap();
        assert_eq!(roster.len(), 1);
        assert_eq!(roster[0].pseudo, "Herbert");

        let published = events.published();
        assert!(published
            .iter()
            .any(|(_, p)| p["event"] == "participant_joined"));
    }

    #[tokio::test]
    async fn failed_setup_leaves_no_session_behind() {
        let (encore, _) = testing::encore().await;
        let host = testing::user(encore.database(), "Herbert").await;

        // Zero capacity makes the host's own enrollment fail
        let result = encore
            .sessions
            .create_session(
                &host,
                SessionRequest {
                    name: "Doomed".to_string(),
                    max_participants: 0,
                },
            )
            .await;

        assert!(matches!(
            result,
            Err(SessionError::Join(ParticipantError::SessionFull))
        ));

        assert_eq!(testing::session_count(encore.database()).await, 0);
    }

    #[tokio::test]
    async fn codes_are_unique_across_sessions() {
        let (encore, _) = testing::encore().await;
        let host = testing::user(encore.database(), "Herbert").await;

        let mut codes = std::collections::HashSet::new();

        for _ in 0..20 {
            let session = testing::session(&encore, &host, 2).await;
            assert!(codes.insert(session.code));
        }
    }

    #[tokio::test]
    async fn code_generation_gives_up_after_bounded_attempts() {
        let (encore, _) = testing::encore().await;
        let host = testing::user(encore.database(), "Herbert").await;

        // Exhaust a one-symbol code space
        encore
            .database()
            .create_session(NewSession {
                name: "Taken".to_string(),
                code: "A".to_string(),
                host_id: Some(host.id),
                max_participants: 2,
            })
            .await
            .unwrap();

        let result = unique_code(&**encore.database(), b"A", 1).await;
        assert!(matches!(result, Err(SessionError::CodeGenerationExhausted)));
    }

    #[tokio::test]
    async fn only_the_host_may_end_or_delete() {
        let (encore, events) = testing::encore().await;
        let host = testing::user(encore.database(), "Herbert").await;
        let intruder = testing::user(encore.database(), "Mallory").await;

        let session = testing::session(&encore, &host, 2).await;
        let before = events.published().len();

        let refused = encore.sessions.end_session(&session, &intruder).await;
        assert!(matches!(refused, Err(SessionError::NotHost)));

        let refused = encore.sessions.delete_session(&session, &intruder).await;
        assert!(matches!(refused, Err(SessionError::NotHost)));

        // No mutation, no event
        let untouched = encore
            .sessions
            .session_by_code(&session.code)
            .await
            .unwrap()
            .expect("session survived");
        assert!(untouched.ended_at.is_none());
        assert_eq!(events.published().len(), before);
    }

    #[tokio::test]
    async fn ending_publishes_and_stamps() {
        let (encore, events) = testing::encore().await;
        let host = testing::user(encore.database(), "Herbert").await;
        let session = testing::session(&encore, &host, 2).await;

        let ended = encore.sessions.end_session(&session, &host).await.unwrap();
        assert!(ended.ended_at.is_some());

        let published = events.published();
        let event = published
            .iter()
            .find(|(_, p)| p["event"] == "session_ended")
            .expect("session_ended was published");

        assert_eq!(event.1["session"]["code"], session.code.as_str());
    }

    #[tokio::test]
    async fn ended_sessions_refuse_new_joins() {
        let (encore, _) = testing::encore().await;
        let host = testing::user(encore.database(), "Herbert").await;
        let session = testing::session(&encore, &host, 5).await;

        let ended = encore.sessions.end_session(&session, &host).await.unwrap();

        let refused = encore.participants.join_session(&ended, "Alice").await;
        assert!(matches!(refused, Err(ParticipantError::SessionEnded)));
    }

    #[tokio::test]
    async fn deleting_cascades_participants_and_empty_playlist() {
        let (encore, events) = testing::encore().await;
        let host = testing::user(encore.database(), "Herbert").await;
        let session = testing::session(&encore, &host, 5).await;

        encore.participants.join_session(&session, "Alice").await.unwrap();

        encore.sessions.delete_session(&session, &host).await.unwrap();

        assert!(encore
            .sessions
            .session_by_code(&session.code)
            .await
            .unwrap()
            .is_none());
        assert!(encore
            .playlists
            .playlist_by_code(&session.code)
            .await
            .unwrap()
            .is_none());
        assert!(events
            .published()
            .iter()
            .any(|(_, p)| p["event"] == "session_deleted"));
    }

    #[tokio::test]
    async fn cleanup_reaps_only_past_the_retention_window() {
        let (encore, _) = testing::encore().await;
        let host = testing::user(encore.database(), "Herbert").await;

        let old = testing::session(&encore, &host, 2).await;
        let recent = testing::session(&encore, &host, 2).await;

        encore.sessions.end_session(&old, &host).await.unwrap();
        encore.sessions.end_session(&recent, &host).await.unwrap();

        // Backdate one to 10 days ago, one to 3
        testing::backdate_session_end(encore.database(), old.id, 10).await;
        testing::backdate_session_end(encore.database(), recent.id, 3).await;

        let removed = encore.sessions.clean_up(7).await.unwrap();
        assert_eq!(removed, 1);

        assert!(encore
            .sessions
            .session_by_code(&old.code)
            .await
            .unwrap()
            .is_none());
        assert!(encore
            .sessions
            .session_by_code(&recent.code)
            .await
            .unwrap()
            .is_some());

        // Nothing left to do the second time around
        assert_eq!(encore.sessions.clean_up(7).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn cleanup_validates_the_window() {
        let (encore, _) = testing::encore().await;

        let result = encore.sessions.clean_up(0).await;
        assert!(matches!(result, Err(SessionError::InvalidRetention)));
    }
}
