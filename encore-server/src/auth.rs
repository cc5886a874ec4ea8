use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{header, request::Parts, StatusCode},
    routing::{get, post},
    Json,
};
use encore_collab::{AccessTokenData, ProviderLogin, UpdatedUser, UserData};

use crate::{
    context::ServerContext,
    errors::ServerResult,
    schemas::{ProviderLoginSchema, UpdateUserSchema, ValidatedJson},
    serialized::{LoginResult, ToSerialized, User},
    Router,
};

/// Wraps [AccessTokenData] so [FromRequestParts] can be implemented for it
pub struct Session(AccessTokenData);

impl Session {
    /// Returns the user of the session
    pub fn user(&self) -> UserData {
        self.0.user.clone()
    }

    pub fn token(&self) -> &str {
        &self.0.token
    }
}

#[async_trait]
impl FromRequestParts<ServerContext> for Session {
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(
        parts: &mut Parts,
        state: &ServerContext,
    ) -> Result<Self, Self::Rejection> {
        let context = ServerContext::from_ref(state);

        let token = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|x| x.to_str().ok())
            .ok_or((StatusCode::UNAUTHORIZED, "Missing authorization"))?;

        let parts: Vec<_> = token.split_ascii_whitespace().collect();

        if parts.first() != Some(&"Bearer") {
            return Err((StatusCode::BAD_REQUEST, "Authorization must be Bearer"));
        }

        let token = parts.last().cloned().unwrap_or_default();

        let session = context
            .encore
            .auth
            .session(token)
            .await
            .map_err(|_| (StatusCode::UNAUTHORIZED, "Session does not exist"))?;

        Ok(Self(session))
    }
}

#[utoipa::path(
    post,
    path = "/v1/auth/callback",
    tag = "auth",
    request_body = ProviderLoginSchema,
    responses(
        (status = 200, body = LoginResult)
    )
)]
pub(crate) async fn callback(
    context: ServerContext,
    ValidatedJson(body): ValidatedJson<ProviderLoginSchema>,
) -> ServerResult<Json<LoginResult>> {
    let session = context
        .encore
        .auth
        .login_with_provider(ProviderLogin {
            provider: body.provider.into(),
            external_id: body.external_id,
            email: body.email,
            display_name: body.display_name,
            avatar_url: body.avatar_url,
            access_token: body.access_token,
            refresh_token: body.refresh_token,
        })
        .await?;

    Ok(Json(session.to_serialized()))
}

#[utoipa::path(
    get,
    path = "/v1/auth/user",
    tag = "auth",
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 200, body = User)
    )
)]
pub(crate) async fn user(session: Session) -> Json<User> {
    Json(session.user().to_serialized())
}

#[utoipa::path(
    patch,
    path = "/v1/auth/user",
    tag = "auth",
    request_body = UpdateUserSchema,
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 200, body = User)
    )
)]
pub(crate) async fn update_user(
    session: Session,
    context: ServerContext,
    ValidatedJson(body): ValidatedJson<UpdateUserSchema>,
) -> ServerResult<Json<User>> {
    let updated = context
        .encore
        .auth
        .update_user(UpdatedUser {
            id: session.user().id,
            name: body.name,
            avatar_url: body.avatar_url,
        })
        .await?;

    Ok(Json(updated.to_serialized()))
}

#[utoipa::path(
    delete,
    path = "/v1/auth/user",
    tag = "auth",
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 200, description = "Account was deleted")
    )
)]
pub(crate) async fn delete_user(session: Session, context: ServerContext) -> ServerResult<()> {
    context.encore.auth.delete_user(session.user().id).await?;
    Ok(())
}

#[utoipa::path(
    post,
    path = "/v1/auth/logout",
    tag = "auth",
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 200, description = "Session was invalidated")
    )
)]
pub(crate) async fn logout(session: Session, context: ServerContext) -> ServerResult<()> {
    context.encore.auth.logout(session.token()).await?;
    Ok(())
}

pub fn router() -> Router {
    Router::new()
        .route("/callback", post(callback))
        .route("/user", get(user).patch(update_user).delete(delete_user))
        .route("/logout", post(logout))
}
