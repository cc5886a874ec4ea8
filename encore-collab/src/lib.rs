mod auth;
mod billing;
mod config;
mod db;
mod events;
mod participants;
mod playlists;
mod sessions;
mod tokens;
mod util;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;

use log::error;

pub use auth::*;
pub use billing::*;
pub use config::*;
pub use db::*;
pub use events::*;
pub use participants::*;
pub use playlists::*;
pub use sessions::*;
pub use tokens::*;

/// The encore collab system, facilitating session management,
/// authentication, billing, and playlist curation.
pub struct Encore<Db> {
    database: Arc<Db>,

    pub auth: Auth<Db>,
    pub billing: Billing<Db>,
    pub sessions: SessionManager<Db>,
    pub participants: ParticipantManager<Db>,
    pub playlists: PlaylistManager<Db>,
    pub tokens: Arc<RealtimeTokens>,
}

/// A type passed to the various managers of the collab system, to access
/// the database and publish events on session topics.
pub struct EncoreContext<Db> {
    pub database: Arc<Db>,
    pub publisher: Arc<dyn Publisher>,
    pub config: EncoreConfig,
}

impl<Db> Encore<Db>
where
    Db: Database,
{
    pub fn new(database: Db, publisher: Arc<dyn Publisher>, config: EncoreConfig) -> Self {
        let database = Arc::new(database);

        let tokens = Arc::new(RealtimeTokens::new(
            config.realtime_signing_key.clone(),
            config.realtime_token_ttl_seconds,
        ));

        let context = EncoreContext {
            database: database.clone(),
            publisher,
            config,
        };

        Self {
            auth: Auth::new(&database),
            billing: Billing::new(&database),
            sessions: SessionManager::new(&context),
            participants: ParticipantManager::new(&context),
            playlists: PlaylistManager::new(&context),
            tokens,
            database,
        }
    }

    pub fn database(&self) -> &Arc<Db> {
        &self.database
    }
}

impl<Db> EncoreContext<Db>
where
    Db: Database,
{
    /// Publishes an event on a session's topic, best-effort. The domain
    /// mutation is already committed when this runs; failures are logged
    /// and swallowed, never surfaced to the caller.
    pub async fn publish(&self, session_code: &str, event: SessionEvent) {
        if session_code.is_empty() {
            error!(
                "Skipping publish of {} event: session has no code",
                event.name()
            );
            return;
        }

        let topic = session_topic(session_code);

        let payload = match serde_json::to_value(&event) {
            Ok(payload) => payload,
            Err(e) => {
                error!("Could not serialize {} event for {}: {}", event.name(), topic, e);
                return;
            }
        };

        if let Err(e) = self.publisher.publish(&topic, payload).await {
            error!("Could not publish {} event to {}: {}", event.name(), topic, e);
        }
    }
}

impl<Db> Clone for EncoreContext<Db>
where
    Db: Database,
{
    fn clone(&self) -> Self {
        Self {
            database: self.database.clone(),
            publisher: self.publisher.clone(),
            config: self.config.clone(),
        }
    }
}
