use log::info;
use thiserror::Error;

use crate::{
    Database, DatabaseError, EncoreContext, NewPlaylist, NewSong, PlaylistData, SessionEvent,
    SessionSummary, SongData, UserData,
};

/// Maintains the one-playlist-per-session rule and the shared song
/// catalogue behind it.
pub struct PlaylistManager<Db> {
    context: EncoreContext<Db>,
}

#[derive(Debug, Error)]
pub enum PlaylistError {
    /// The song is already attached to this playlist
    #[error("Song is already in the playlist")]
    DuplicateSong,
    /// No attached song matches the external id
    #[error("Song is not in the playlist")]
    SongNotFound,
    /// The playlist still has songs and can't be deleted
    #[error("Playlist still has songs")]
    PlaylistNotEmpty,
    /// Something else went wrong with the database
    #[error(transparent)]
    Db(DatabaseError),
}

impl From<DatabaseError> for PlaylistError {
    fn from(e: DatabaseError) -> Self {
        match e {
            DatabaseError::Conflict {
                resource: "playlist",
                field: "songs",
                ..
            } => Self::PlaylistNotEmpty,
            e => Self::Db(e),
        }
    }
}

impl<Db> PlaylistManager<Db>
where
    Db: Database,
{
    pub fn new(context: &EncoreContext<Db>) -> Self {
        Self {
            context: context.clone(),
        }
    }

    /// Creates the playlist bound 1:1 to a session code
    pub async fn create_session_playlist(
        &self,
        user: &UserData,
        session_code: &str,
        session_name: &str,
    ) -> Result<PlaylistData, DatabaseError> {
        self.context
            .database
            .create_playlist(NewPlaylist {
                name: session_name.to_string(),
                session_code: session_code.to_string(),
                user_id: user.id,
            })
            .await
    }

    pub async fn playlist_by_code(
        &self,
        session_code: &str,
    ) -> Result<Option<PlaylistData>, DatabaseError> {
        match self.context.database.playlist_by_code(session_code).await {
            Ok(playlist) => Ok(Some(playlist)),
            Err(DatabaseError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn songs(&self, playlist: &PlaylistData) -> Result<Vec<SongData>, DatabaseError> {
        self.context.database.songs_in_playlist(playlist.id).await
    }

    /// Attaches a song to the playlist, resolving it through the shared
    /// catalogue. The same external id never produces two catalogue rows.
    pub async fn add_song(
        &self,
        playlist: &PlaylistData,
        new_song: NewSong,
    ) -> Result<SongData, PlaylistError> {
        // Playlists stay in the tens of tracks, a linear scan is fine
        let members = self.context.database.songs_in_playlist(playlist.id).await?;

        if members
            .iter()
            .any(|s| s.external_id == new_song.external_id)
        {
            return Err(PlaylistError::DuplicateSong);
        }

        let song = match self
            .context
            .database
            .song_by_external_id(&new_song.external_id)
            .await
        {
            Ok(song) => song,
            Err(DatabaseError::NotFound { .. }) => {
                self.context.database.create_song(new_song).await?
            }
            Err(e) => return Err(e.into()),
        };

        self.context
            .database
            .attach_song(playlist.id, song.id)
            .await?;

        info!("Added {} to playlist for {}", song.title, playlist.session_code);

        self.context
            .publish(
                &playlist.session_code,
                SessionEvent::SongAdded {
                    session: summary_of(playlist),
                    external_id: song.external_id.clone(),
                    title: song.title.clone(),
                },
            )
            .await;

        Ok(song)
    }

    /// Detaches the song matching the external id. A song left with zero
    /// playlist memberships is hard-deleted from the catalogue right away.
    pub async fn remove_song(
        &self,
        playlist: &PlaylistData,
        external_id: &str,
    ) -> Result<(), PlaylistError> {
        let members = self.context.database.songs_in_playlist(playlist.id).await?;

        let song = members
            .iter()
            .find(|s| s.external_id == external_id)
            .ok_or(PlaylistError::SongNotFound)?;

        self.context
            .database
            .detach_song(playlist.id, song.id)
            .await?;

        let remaining = self
            .context
            .database
            .playlist_count_for_song(song.id)
            .await?;

        if remaining == 0 {
            self.context.database.delete_song(song.id).await?;
            info!("Collected orphaned song {}", song.external_id);
        }

        self.context
            .publish(
                &playlist.session_code,
                SessionEvent::SongRemoved {
                    session: summary_of(playlist),
                    external_id: external_id.to_string(),
                },
            )
            .await;

        Ok(())
    }

    /// Deletes the session's playlist if it has no songs left, then
    /// sweeps the catalogue for orphans.
    pub async fn delete_playlist_by_code(
        &self,
        session_code: &str,
    ) -> Result<(), PlaylistError> {
        let playlist = match self.playlist_by_code(session_code).await? {
            Some(playlist) => playlist,
            None => return Ok(()),
        };

        self.context.database.delete_playlist(playlist.id).await?;
        self.context.database.delete_orphaned_songs().await?;

        Ok(())
    }

    pub async fn song_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<SongData>, DatabaseError> {
        match self
            .context
            .database
            .song_by_external_id(external_id)
            .await
        {
            Ok(song) => Ok(Some(song)),
            Err(DatabaseError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Playlists carry the session name they were created with, which is
/// enough for the event summary without an extra session lookup.
fn summary_of(playlist: &PlaylistData) -> SessionSummary {
    SessionSummary {
        code: playlist.session_code.clone(),
        name: playlist.name.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    fn song(external_id: &str, title: &str) -> NewSong {
        NewSong {
            external_id: external_id.to_string(),
            title: title.to_string(),
            artists: "Test Artist".to_string(),
            artwork_url: None,
        }
    }

    #[tokio::test]
    async fn rejects_duplicate_songs_per_playlist() {
        let (encore, _) = testing::encore().await;
        let host = testing::user(encore.database(), "Herbert").await;
        let session = testing::session(&encore, &host, 5).await;

        let playlist = encore
            .playlists
            .playlist_by_code(&session.code)
            .await
            .unwrap()
            .expect("session playlist exists");

        encore
            .playlists
            .add_song(&playlist, song("spotify:123", "First"))
            .await
            .unwrap();

        let rejected = encore
            .playlists
            .add_song(&playlist, song("spotify:123", "First again"))
            .await;

        assert!(matches!(rejected, Err(PlaylistError::DuplicateSong)));

        let songs = encore.playlists.songs(&playlist).await.unwrap();
        assert_eq!(songs.len(), 1);
    }

    #[tokio::test]
    async fn resolver_is_find_or_create() {
        let (encore, _) = testing::encore().await;
        let host = testing::user(encore.database(), "Herbert").await;

        let first = testing::session(&encore, &host, 5).await;
        let second = testing::session(&encore, &host, 5).await;

        let p1 = encore.playlists.playlist_by_code(&first.code).await.unwrap().unwrap();
        let p2 = encore.playlists.playlist_by_code(&second.code).await.unwrap().unwrap();

        let a = encore.playlists.add_song(&p1, song("spotify:999", "Shared")).await.unwrap();
        let b = encore.playlists.add_song(&p2, song("spotify:999", "Shared")).await.unwrap();

        // Same catalogue identity both times
        assert_eq!(a.id, b.id);
    }

    #[tokio::test]
    async fn orphaned_songs_are_collected_immediately() {
        let (encore, _) = testing::encore().await;
        let host = testing::user(encore.database(), "Herbert").await;

        let first = testing::session(&encore, &host, 5).await;
        let second = testing::session(&encore, &host, 5).await;

        let p1 = encore.playlists.playlist_by_code(&first.code).await.unwrap().unwrap();
        let p2 = encore.playlists.playlist_by_code(&second.code).await.unwrap().unwrap();

        encore.playlists.add_song(&p1, song("spotify:999", "Shared")).await.unwrap();
        encore.playlists.add_song(&p2, song("spotify:999", "Shared")).await.unwrap();

        // Still referenced by the second playlist
        encore.playlists.remove_song(&p1, "spotify:999").await.unwrap();
        assert!(encore
            .playlists
            .song_by_external_id("spotify:999")
            .await
            .unwrap()
            .is_some());

        // Last reference gone, the catalogue row goes with it
        encore.playlists.remove_song(&p2, "spotify:999").await.unwrap();
        assert!(encore
            .playlists
            .song_by_external_id("spotify:999")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn removing_an_unknown_song_fails() {
        let (encore, _) = testing::encore().await;
        let host = testing::user(encore.database(), "Herbert").await;
        let session = testing::session(&encore, &host, 5).await;

        let playlist = encore
            .playlists
            .playlist_by_code(&session.code)
            .await
            .unwrap()
            .unwrap();

        let result = encore.playlists.remove_song(&playlist, "spotify:nope").await;
        assert!(matches!(result, Err(PlaylistError::SongNotFound)));
    }

    #[tokio::test]
    async fn playlists_are_only_deletable_when_empty() {
        let (encore, _) = testing::encore().await;
        let host = testing::user(encore.database(), "Herbert").await;
        let session = testing::session(&encore, &host, 5).await;

        let playlist = encore
            .playlists
            .playlist_by_code(&session.code)
            .await
            .unwrap()
            .unwrap();

        encore
            .playlists
            .add_song(&playlist, song("spotify:123", "Keeper"))
            .await
            .unwrap();

        let refused = encore.playlists.delete_playlist_by_code(&session.code).await;
        assert!(matches!(refused, Err(PlaylistError::PlaylistNotEmpty)));

        encore.playlists.remove_song(&playlist, "spotify:123").await.unwrap();
        encore
            .playlists
            .delete_playlist_by_code(&session.code)
            .await
            .expect("empty playlist deletes fine");

        assert!(encore
            .playlists
            .playlist_by_code(&session.code)
            .await
            .unwrap()
            .is_none());
    }
}
