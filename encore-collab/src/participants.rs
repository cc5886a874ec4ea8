use log::info;
use thiserror::Error;

use crate::{
    Database, DatabaseError, EncoreContext, LeaveReason, NewParticipant, ParticipantData,
    SessionData, SessionEvent,
};

/// Admission control and membership changes for a session's live roster
pub struct ParticipantManager<Db> {
    context: EncoreContext<Db>,
}

#[derive(Debug, Error)]
pub enum ParticipantError {
    /// An active participant already uses this pseudo
    #[error("Pseudo is already taken in this session")]
    PseudoTaken,
    /// The active roster is at the session's capacity
    #[error("Session is full")]
    SessionFull,
    /// The session has ended and accepts no new participants
    #[error("Session has already ended")]
    SessionEnded,
    /// Something else went wrong with the database
    #[error(transparent)]
    Db(DatabaseError),
}

impl From<DatabaseError> for ParticipantError {
    fn from(e: DatabaseError) -> Self {
        match e {
            DatabaseError::Conflict {
                resource: "participant",
                field: "pseudo",
                ..
            } => Self::PseudoTaken,
            DatabaseError::Conflict {
                resource: "participant",
                field: "capacity",
                ..
            } => Self::SessionFull,
            e => Self::Db(e),
        }
    }
}

impl<Db> ParticipantManager<Db>
where
    Db: Database,
{
    pub fn new(context: &EncoreContext<Db>) -> Self {
        Self {
            context: context.clone(),
        }
    }

    /// Admits a pseudonymous participant to the session. Pseudo
    /// uniqueness is checked before capacity, so a full session still
    /// reports a taken pseudo correctly.
    pub async fn join_session(
        &self,
        session: &SessionData,
        pseudo: &str,
    ) -> Result<ParticipantData, ParticipantError> {
        if session.ended_at.is_some() {
            return Err(ParticipantError::SessionEnded);
        }

        let participant = self
            .context
            .database
            .create_participant(NewParticipant {
                session_id: session.id,
                pseudo: pseudo.to_string(),
            })
            .await?;

        let participant_count = self
            .context
            .database
            .count_active_participants(session.id)
            .await?;

        info!(
            "{} joined session {} ({} active)",
            participant.pseudo, session.code, participant_count
        );

        self.context
            .publish(
                &session.code,
                SessionEvent::ParticipantJoined {
                    session: session.into(),
                    participant: (&participant).into(),
                    participant_count,
                },
            )
            .await;

        Ok(participant)
    }

    /// Removes a participant from the live roster. The row is kept with
    /// `active` unset and `left_at` stamped, freeing the pseudo for reuse.
    pub async fn leave_session(
        &self,
        session: &SessionData,
        participant: &ParticipantData,
        reason: LeaveReason,
    ) -> Result<ParticipantData, ParticipantError> {
        let left = self
            .context
            .database
            .deactivate_participant(participant.id)
            .await?;

        info!(
            "{} left session {} ({:?})",
            left.pseudo, session.code, reason
        );

        self.context
            .publish(
                &session.code,
                SessionEvent::ParticipantLeft {
                    session: session.into(),
                    participant: (&left).into(),
                    reason,
                },
            )
            .await;

        Ok(left)
    }

    /// The currently active roster, ordered by join time ascending
    pub async fn active_participants(
        &self,
        session: &SessionData,
    ) -> Result<Vec<ParticipantData>, DatabaseError> {
        self.context.database.active_participants(session.id).await
    }

    pub async fn count_active(&self, session: &SessionData) -> Result<i64, DatabaseError> {
        self.context
            .database
            .count_active_participants(session.id)
            .await
    }

    /// Re-identifies a returning participant by pseudo, active rows only
    pub async fn participant_by_pseudo(
        &self,
        session: &SessionData,
        pseudo: &str,
    ) -> Result<Option<ParticipantData>, DatabaseError> {
        match self
            .context
            .database
            .active_participant_by_pseudo(session.id, pseudo)
            .await
        {
            Ok(participant) => Ok(Some(participant)),
            Err(DatabaseError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn participant_by_id(
        &self,
        participant_id: crate::PrimaryKey,
    ) -> Result<ParticipantData, DatabaseError> {
        self.context.database.participant_by_id(participant_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    #[tokio::test]
    async fn capacity_is_enforced_after_pseudo_uniqueness() {
        let (encore, _events) = testing::encore().await;
        let host = testing::user(encore.database(), "Herbert").await;

        // Capacity 2, host takes the first seat
        let session = testing::session(&encore, &host, 2).await;
        assert_eq!(encore.participants.count_active(&session).await.unwrap(), 1);

        encore
            .participants
            .join_session(&session, "Alice")
            .await
            .expect("second seat is free");

        let rejected = encore.participants.join_session(&session, "Bob").await;
        assert!(matches!(rejected, Err(ParticipantError::SessionFull)));
        assert_eq!(encore.participants.count_active(&session).await.unwrap(), 2);

        // A taken pseudo wins over the full room
        let rejected = encore.participants.join_session(&session, "Alice").await;
        assert!(matches!(rejected, Err(ParticipantError::PseudoTaken)));
    }

    #[tokio::test]
    async fn concurrent_joins_never_exceed_capacity() {
        let (encore, _events) = testing::encore().await;
        let host = testing::user(encore.database(), "Herbert").await;
        let session = testing::session(&encore, &host, 3).await;

        let (a, b, c, d, e) = tokio::join!(
            encore.participants.join_session(&session, "a"),
            encore.participants.join_session(&session, "b"),
            encore.participants.join_session(&session, "c"),
            encore.participants.join_session(&session, "d"),
            encore.participants.join_session(&session, "e"),
        );

        let admitted = [a, b, c, d, e].into_iter().filter(Result::is_ok).count();

        // Host already holds one seat
        assert_eq!(admitted, 2);
        assert_eq!(encore.participants.count_active(&session).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn concurrent_joins_hold_up_across_connections() {
        // A file-backed pool gives every join its own connection, so the
        // admissions genuinely race for the write lock instead of being
        // serialized by a single shared connection.
        let (database, path) = testing::file_database(5).await;
        let (encore, _events) = testing::encore_on(database);
        let host = testing::user(encore.database(), "Herbert").await;

        // Plenty of room, every join must get through
        let roomy = testing::session(&encore, &host, 10).await;

        let results = tokio::join!(
            encore.participants.join_session(&roomy, "a"),
            encore.participants.join_session(&roomy, "b"),
            encore.participants.join_session(&roomy, "c"),
            encore.participants.join_session(&roomy, "d"),
            encore.participants.join_session(&roomy, "e"),
            encore.participants.join_session(&roomy, "f"),
            encore.participants.join_session(&roomy, "g"),
            encore.participants.join_session(&roomy, "h"),
        );

        let (a, b, c, d, e, f, g, h) = results;
        for result in [a, b, c, d, e, f, g, h] {
            result.expect("join succeeds while seats are free");
        }

        assert_eq!(encore.participants.count_active(&roomy).await.unwrap(), 9);

        // Tight room, host holds one of the three seats
        let tight = testing::session(&encore, &host, 3).await;

        let (a, b, c, d, e) = tokio::join!(
            encore.participants.join_session(&tight, "a"),
            encore.participants.join_session(&tight, "b"),
            encore.participants.join_session(&tight, "c"),
            encore.participants.join_session(&tight, "d"),
            encore.participants.join_session(&tight, "e"),
        );

        let results = [a, b, c, d, e];
        let admitted = results.iter().filter(|r| r.is_ok()).count();

        assert_eq!(admitted, 2);
        assert_eq!(encore.participants.count_active(&tight).await.unwrap(), 3);

        for result in results {
            if let Err(e) = result {
                assert!(matches!(e, ParticipantError::SessionFull));
            }
        }

        testing::remove_database_file(&path);
    }

    #[tokio::test]
    async fn leaving_is_soft_and_frees_the_pseudo() {
        let (encore, events) = testing::encore().await;
        let host = testing::user(encore.database(), "Herbert").await;
        let session = testing::session(&encore, &host, 5).await;

        let alice = encore
            .participants
            .join_session(&session, "Alice")
            .await
            .unwrap();

        let left = encore
            .participants
            .leave_session(&session, &alice, LeaveReason::Kicked)
            .await
            .unwrap();

        assert!(!left.active);
        assert!(left.left_at.is_some());

        // The row survives for history
        let row = encore.participants.participant_by_id(alice.id).await.unwrap();
        assert!(!row.active);

        // A fresh "Alice" can join again
        encore
            .participants
            .join_session(&session, "Alice")
            .await
            .expect("pseudo is free after leaving");

        let published = events.published();
        let leave = published
            .iter()
            .find(|(_, payload)| payload["event"] == "participant_left")
            .expect("leave event was published");

        assert_eq!(leave.0, format!("session/{}", session.code));
        assert_eq!(leave.1["reason"], "kicked");
    }

    #[tokio::test]
    async fn join_event_carries_the_updated_count() {
        let (encore, events) = testing::encore().await;
        let host = testing::user(encore.database(), "Herbert").await;
        let session = testing::session(&encore, &host, 5).await;

        encore
            .participants
            .join_session(&session, "Alice")
            .await
            .unwrap();

        let published = events.published();
        let joined: Vec<_> = published
            .iter()
            .filter(|(_, payload)| payload["event"] == "participant_joined")
            .collect();

        // Host enrollment plus Alice
        assert_eq!(joined.len(), 2);
        assert_eq!(joined[1].1["participant"]["pseudo"], "Alice");
        assert_eq!(joined[1].1["participant_count"], 2);
    }

    #[tokio::test]
    async fn publish_failures_do_not_fail_the_join() {
        let (encore, _) = testing::encore_with_failing_publisher().await;
        let host = testing::user(encore.database(), "Herbert").await;
        let session = testing::session(&encore, &host, 5).await;

        encore
            .participants
            .join_session(&session, "Alice")
            .await
            .expect("join succeeds even when publishing fails");
    }
}
