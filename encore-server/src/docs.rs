use std::borrow::BorrowMut;

use axum::{response::IntoResponse, Json};
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};

use crate::{auth, billing, errors, playlists, schemas, serialized, sessions, sse};

#[derive(OpenApi)]
#[openapi(
    modifiers(&Security),
    info(
        description = "encore-server exposes endpoints to interact with this encore instance"
    ),
    paths(
        auth::callback,
        auth::user,
        auth::update_user,
        auth::delete_user,
        auth::logout,
        sessions::create_session,
        sessions::session_overview,
        sessions::perform_session_action,
        sessions::join_session,
        sessions::list_participants,
        sessions::leave_session,
        sessions::issue_token,
        playlists::playlist,
        playlists::add_song,
        playlists::remove_song,
        billing::list_plans,
        billing::subscription,
        billing::webhook,
        sse::event_stream,
    ),
    components(schemas(
        schemas::ProviderSchema,
        schemas::ProviderLoginSchema,
        schemas::UpdateUserSchema,
        schemas::NewSessionSchema,
        schemas::JoinSessionSchema,
        schemas::SessionActionSchema,
        schemas::TokenRequestSchema,
        schemas::AddSongSchema,
        schemas::WebhookSchema,
        serialized::User,
        serialized::LoginResult,
        serialized::Session,
        serialized::SessionOverview,
        serialized::Participant,
        serialized::JoinResult,
        serialized::Playlist,
        serialized::Song,
        serialized::Plan,
        serialized::Subscription,
        serialized::RealtimeToken,
        errors::ErrorBody,
    ))
)]
pub struct ApiDoc;

struct Security;

impl Modify for Security {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.borrow_mut() {
            let scheme = HttpBuilder::new()
                .scheme(HttpAuthScheme::Bearer)
                .bearer_format("Bearer <token>")
                .build();

            components.add_security_scheme("BearerAuth", SecurityScheme::Http(scheme))
        }
    }
}

pub async fn docs() -> impl IntoResponse {
    Json(ApiDoc::openapi())
}
