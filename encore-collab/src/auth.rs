use chrono::{Duration, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use crate::{
    util::random_string, AccessTokenData, Database, DatabaseError, NewAccessToken, NewProvider,
    NewUser, PrimaryKey, ProviderData, UpdatedUser, UserData,
};

/// The identity store: users, their OAuth provider links, and the
/// access tokens used to authenticate requests.
pub struct Auth<Db> {
    db: Arc<Db>,
}

#[derive(Debug, Error)]
pub enum AuthError {
    /// The token doesn't exist or has expired
    #[error("Invalid access token")]
    InvalidToken,
    /// Something else went wrong with the database
    #[error(transparent)]
    Db(#[from] DatabaseError),
}

/// The OAuth providers encore understands. A closed set on purpose, so
/// dispatching on a provider is checked at compile time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Google,
    Spotify,
    Soundcloud,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Google => "google",
            Self::Spotify => "spotify",
            Self::Soundcloud => "soundcloud",
        }
    }
}

/// The profile and tokens handed over after a successful OAuth exchange.
/// The exchange itself happens upstream; this is what lands here.
#[derive(Debug)]
pub struct ProviderLogin {
    pub provider: ProviderKind,
    pub external_id: String,
    pub email: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub access_token: String,
    pub refresh_token: Option<String>,
}

impl<Db> Auth<Db>
where
    Db: Database,
{
    const TOKEN_DURATION_IN_DAYS: i64 = 7;

    pub fn new(db: &Arc<Db>) -> Self {
        Self { db: db.clone() }
    }

    /// Logs a user in through an OAuth provider callback. Finds or
    /// creates the account by email, creates or refreshes the provider
    /// link, and issues a fresh access token.
    pub async fn login_with_provider(
        &self,
        login: ProviderLogin,
    ) -> Result<AccessTokenData, AuthError> {
        self.clear_expired().await;

        let user = match self.db.user_by_email(&login.email).await {
            Ok(user) => user,
            Err(DatabaseError::NotFound { .. }) => {
                let user = self
                    .db
                    .create_user(NewUser {
                        name: login.display_name.clone(),
                        email: login.email.clone(),
                        avatar_url: login.avatar_url.clone(),
                    })
                    .await?;

                info!("Created account for {} via {}", user.email, login.provider.as_str());
                user
            }
            Err(e) => return Err(e.into()),
        };

        // The first linked provider becomes the main one
        let existing = self.db.providers_by_user(user.id).await?;

        self.db
            .upsert_provider(NewProvider {
                user_id: user.id,
                name: login.provider.as_str().to_string(),
                external_id: login.external_id,
                access_token: login.access_token,
                refresh_token: login.refresh_token,
                is_main: existing.is_empty(),
            })
            .await?;

        let expires_at = Utc::now() + Duration::days(Self::TOKEN_DURATION_IN_DAYS);

        let token = self
            .db
            .create_access_token(NewAccessToken {
                token: random_string(32),
                user_id: user.id,
                expires_at,
            })
            .await?;

        Ok(token)
    }

    /// Returns the session behind a token, if it exists and hasn't expired
    pub async fn session(&self, token: &str) -> Result<AccessTokenData, AuthError> {
        let session = match self.db.access_token(token).await {
            Ok(session) => session,
            Err(DatabaseError::NotFound { .. }) => return Err(AuthError::InvalidToken),
            Err(e) => return Err(e.into()),
        };

        if session.expires_at < Utc::now() {
            return Err(AuthError::InvalidToken);
        }

        Ok(session)
    }

    /// Deletes the associated token, if it exists
    pub async fn logout(&self, token: &str) -> Result<(), DatabaseError> {
        self.db.delete_access_token(token).await
    }

    pub async fn update_user(&self, updated_user: UpdatedUser) -> Result<UserData, DatabaseError> {
        self.db.update_user(updated_user).await
    }

    /// Soft-deletes a user. Their hosted sessions lose their host.
    pub async fn delete_user(&self, user_id: PrimaryKey) -> Result<(), DatabaseError> {
        self.db.soft_delete_user(user_id).await
    }

    pub async fn providers(&self, user_id: PrimaryKey) -> Result<Vec<ProviderData>, DatabaseError> {
        self.db.providers_by_user(user_id).await
    }

    async fn clear_expired(&self) {
        if let Err(e) = self.db.clear_expired_access_tokens().await {
            warn!("Could not clear expired access tokens: {}", e);
        }
    }
}
