use axum::{
    extract::{Path, Query},
    routing::{get, post},
    Json,
};
use serde::Deserialize;
use encore_collab::{LeaveReason, SessionData, SessionRequest, TokenMode};

use crate::{
    auth::Session,
    context::ServerContext,
    errors::{ServerError, ServerResult},
    schemas::{
        JoinSessionSchema, NewSessionSchema, SessionActionSchema, TokenRequestSchema,
        ValidatedJson,
    },
    serialized::{JoinResult, Participant, RealtimeToken, SessionOverview, ToSerialized},
    Router,
};

async fn session_by_code(context: &ServerContext, code: &str) -> ServerResult<SessionData> {
    context
        .encore
        .sessions
        .session_by_code(code)
        .await?
        .ok_or(ServerError::NotFound {
            resource: "session",
            identifier: "code",
        })
}

#[utoipa::path(
    post,
    path = "/v1/sessions",
    tag = "sessions",
    request_body = NewSessionSchema,
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 200, body = SessionOverview)
    )
)]
pub(crate) async fn create_session(
    session: Session,
    context: ServerContext,
    ValidatedJson(body): ValidatedJson<NewSessionSchema>,
) -> ServerResult<Json<SessionOverview>> {
    let created = context
        .encore
        .sessions
        .create_session(
            &session.user(),
            SessionRequest {
                name: body.name,
                max_participants: body.max_participants,
            },
        )
        .await?;

    overview(&context, created).await.map(Json)
}

#[utoipa::path(
    get,
    path = "/v1/sessions/{code}",
    tag = "sessions",
    responses(
        (status = 200, body = SessionOverview),
        (status = 404, description = "No session uses this code")
    )
)]
pub(crate) async fn session_overview(
    context: ServerContext,
    Path(code): Path<String>,
) -> ServerResult<Json<SessionOverview>> {
    let session = session_by_code(&context, &code).await?;

    overview(&context, session).await.map(Json)
}

#[utoipa::path(
    post,
    path = "/v1/sessions/{code}/actions",
    tag = "sessions",
    request_body = SessionActionSchema,
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 200, description = "Action was performed"),
        (status = 403, description = "Only the host can do this")
    )
)]
pub(crate) async fn perform_session_action(
    session: Session,
    context: ServerContext,
    Path(code): Path<String>,
    Json(body): Json<SessionActionSchema>,
) -> ServerResult<()> {
    let target = session_by_code(&context, &code).await?;
    let user = session.user();

    match body {
        SessionActionSchema::End => {
            context.encore.sessions.end_session(&target, &user).await?;
        }
        SessionActionSchema::Delete => {
            context
                .encore
                .sessions
                .delete_session(&target, &user)
                .await?;
        }
    }

    Ok(())
}

#[utoipa::path(
    post,
    path = "/v1/sessions/{code}/participants",
    tag = "sessions",
    request_body = JoinSessionSchema,
    responses(
        (status = 200, body = JoinResult),
        (status = 409, description = "The pseudo is taken or the session is full"),
        (status = 410, description = "The session has ended")
    )
)]
pub(crate) async fn join_session(
    context: ServerContext,
    Path(code): Path<String>,
    ValidatedJson(body): ValidatedJson<JoinSessionSchema>,
) -> ServerResult<Json<JoinResult>> {
    let session = session_by_code(&context, &code).await?;

    let participant = context
        .encore
        .participants
        .join_session(&session, &body.pseudo)
        .await?;

    let count = context.encore.participants.count_active(&session).await?;

    Ok(Json(JoinResult {
        id: participant.id,
        pseudo: participant.pseudo,
        session_code: session.code,
        active_participant_count: count,
    }))
}

#[utoipa::path(
    get,
    path = "/v1/sessions/{code}/participants",
    tag = "sessions",
    responses(
        (status = 200, body = Vec<Participant>)
    )
)]
pub(crate) async fn list_participants(
    context: ServerContext,
    Path(code): Path<String>,
) -> ServerResult<Json<Vec<Participant>>> {
    let session = session_by_code(&context, &code).await?;

    let roster = context
        .encore
        .participants
        .active_participants(&session)
        .await?;

    Ok(Json(roster.to_serialized()))
}

#[derive(Debug, Deserialize)]
pub(crate) struct LeaveQuery {
    reason: Option<LeaveReason>,
}

#[utoipa::path(
    delete,
    path = "/v1/sessions/{code}/participants/{id}",
    tag = "sessions",
    params(
        ("reason" = Option<String>, Query, description = "Why the participant is removed")
    ),
    responses(
        (status = 200, description = "Participant was removed from the roster")
    )
)]
pub(crate) async fn leave_session(
    context: ServerContext,
    Path((code, participant_id)): Path<(String, i64)>,
    Query(query): Query<LeaveQuery>,
) -> ServerResult<()> {
    let session = session_by_code(&context, &code).await?;

    let participant = context
        .encore
        .participants
        .participant_by_id(participant_id)
        .await?;

    // Participant ids are global, so pin them to the session in the path
    if participant.session_id != session.id {
        return Err(ServerError::NotFound {
            resource: "participant",
            identifier: "id",
        });
    }

    context
        .encore
        .participants
        .leave_session(&session, &participant, query.reason.unwrap_or_default())
        .await?;

    Ok(())
}

#[utoipa::path(
    post,
    path = "/v1/sessions/{code}/tokens",
    tag = "sessions",
    request_body = TokenRequestSchema,
    responses(
        (status = 200, body = RealtimeToken),
        (status = 503, description = "Realtime tokens are not configured")
    )
)]
pub(crate) async fn issue_token(
    session: Option<Session>,
    context: ServerContext,
    Path(code): Path<String>,
    ValidatedJson(body): ValidatedJson<TokenRequestSchema>,
) -> ServerResult<Json<RealtimeToken>> {
    let target = session_by_code(&context, &code).await?;

    // The host gets a publish token. Everyone else proves they hold a
    // seat in the roster and gets a subscribe token.
    let (subject, mode) = match session {
        Some(session) if target.host_id == Some(session.user().id) => {
            (format!("user:{}", session.user().id), TokenMode::Publish)
        }
        _ => {
            let participant_id = body.participant_id.ok_or(ServerError::NotFound {
                resource: "participant",
                identifier: "id",
            })?;

            let participant = context
                .encore
                .participants
                .participant_by_id(participant_id)
                .await?;

            if participant.session_id != target.id || !participant.active {
                return Err(ServerError::NotFound {
                    resource: "participant",
                    identifier: "id",
                });
            }

            (format!("participant:{}", participant.id), TokenMode::Subscribe)
        }
    };

    let token = context.encore.tokens.issue(&subject, &target.code, mode)?;

    let mode = match mode {
        TokenMode::Subscribe => "subscribe",
        TokenMode::Publish => "publish",
    };

    Ok(Json(RealtimeToken {
        token,
        mode: mode.to_string(),
    }))
}

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_session))
        .route("/:code", get(session_overview))
        .route("/:code/actions", post(perform_session_action))
        .route(
            "/:code/participants",
            get(list_participants).post(join_session),
        )
        .route("/:code/participants/:id", axum::routing::delete(leave_session))
        .route("/:code/tokens", post(issue_token))
}

async fn overview(
    context: &ServerContext,
    session: SessionData,
) -> ServerResult<SessionOverview> {
    let participants = context
        .encore
        .participants
        .active_participants(&session)
        .await?;

    Ok(SessionOverview {
        session: session.to_serialized(),
        participants: participants.to_serialized(),
    })
}
