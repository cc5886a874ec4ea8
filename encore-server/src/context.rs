use std::{convert::Infallible, sync::Arc};

use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
};
use encore_collab::{Encore, SqliteDatabase};

use crate::sse::SseBroker;

#[derive(Clone, FromRef)]
pub struct ServerContext {
    pub encore: Arc<Encore<SqliteDatabase>>,
    pub sse: Arc<SseBroker>,
}

/// Lets handlers take the whole context as an argument
#[async_trait]
impl FromRequestParts<ServerContext> for ServerContext {
    type Rejection = Infallible;

    async fn from_request_parts(
        _parts: &mut Parts,
        state: &ServerContext,
    ) -> Result<Self, Self::Rejection> {
        Ok(state.clone())
    }
}
