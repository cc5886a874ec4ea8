use axum::{
    extract::Path,
    routing::{delete, get},
    Json,
};
use encore_collab::{NewSong, PlaylistData};

use crate::{
    context::ServerContext,
    errors::{ServerError, ServerResult},
    schemas::{AddSongSchema, ValidatedJson},
    serialized::{playlist_with_songs, Playlist, Song, ToSerialized},
    Router,
};

async fn playlist_by_code(context: &ServerContext, code: &str) -> ServerResult<PlaylistData> {
    context
        .encore
        .playlists
        .playlist_by_code(code)
        .await?
        .ok_or(ServerError::NotFound {
            resource: "playlist",
            identifier: "session code",
        })
}

#[utoipa::path(
    get,
    path = "/v1/sessions/{code}/playlist",
    tag = "playlists",
    responses(
        (status = 200, body = Playlist),
        (status = 404, description = "No session uses this code")
    )
)]
pub(crate) async fn playlist(
    context: ServerContext,
    Path(code): Path<String>,
) -> ServerResult<Json<Playlist>> {
    let playlist = playlist_by_code(&context, &code).await?;
    let songs = context.encore.playlists.songs(&playlist).await?;

    Ok(Json(playlist_with_songs(&playlist, &songs)))
}

#[utoipa::path(
    post,
    path = "/v1/sessions/{code}/playlist/songs",
    tag = "playlists",
    request_body = AddSongSchema,
    responses(
        (status = 200, body = Song),
        (status = 409, description = "The song is already in the playlist")
    )
)]
pub(crate) async fn add_song(
    context: ServerContext,
    Path(code): Path<String>,
    ValidatedJson(body): ValidatedJson<AddSongSchema>,
) -> ServerResult<Json<Song>> {
    let playlist = playlist_by_code(&context, &code).await?;

    let song = context
        .encore
        .playlists
        .add_song(
            &playlist,
            NewSong {
                external_id: body.external_id,
                title: body.title,
                artists: body.artists,
                artwork_url: body.artwork_url,
            },
        )
        .await?;

    Ok(Json(song.to_serialized()))
}

#[utoipa::path(
    delete,
    path = "/v1/sessions/{code}/playlist/songs/{externalId}",
    tag = "playlists",
    responses(
        (status = 200, description = "Song was removed from the playlist"),
        (status = 404, description = "The song is not in the playlist")
    )
)]
pub(crate) async fn remove_song(
    context: ServerContext,
    Path((code, external_id)): Path<(String, String)>,
) -> ServerResult<()> {
    let playlist = playlist_by_code(&context, &code).await?;

    context
        .encore
        .playlists
        .remove_song(&playlist, &external_id)
        .await?;

    Ok(())
}

pub fn router() -> Router {
    Router::new()
        .route("/:code/playlist", get(playlist))
        .route("/:code/playlist/songs", axum::routing::post(add_song))
        .route("/:code/playlist/songs/:external_id", delete(remove_song))
}
