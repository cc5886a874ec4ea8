//! All schemas accepted by endpoints are defined here, along with the
//! validation rules applied before a handler ever sees the body

use axum::{
    async_trait,
    extract::{FromRequest, Request},
    http::StatusCode,
    Json,
};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{de::DeserializeOwned, Deserialize};
use utoipa::ToSchema;
use validator::Validate;

use encore_collab::ProviderKind;

lazy_static! {
    /// Pseudos allow letters, digits, spaces, underscores and dashes
    static ref PSEUDO_REGEX: Regex = Regex::new(r"^[A-Za-z0-9 _-]+$").expect("pseudo regex parses");
}

#[derive(Debug, ToSchema, Validate, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct NewSessionSchema {
    #[validate(length(min = 2, max = 128))]
    pub name: String,
    #[validate(range(min = 1, max = 10))]
    pub max_participants: i64,
}

#[derive(Debug, ToSchema, Validate, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct JoinSessionSchema {
    #[validate(length(min = 2, max = 50), regex(path = *PSEUDO_REGEX))]
    pub pseudo: String,
}

/// The provider names accepted on the login callback
#[derive(Debug, Clone, Copy, ToSchema, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderSchema {
    Google,
    Spotify,
    Soundcloud,
}

impl From<ProviderSchema> for ProviderKind {
    fn from(value: ProviderSchema) -> Self {
        match value {
            ProviderSchema::Google => Self::Google,
            ProviderSchema::Spotify => Self::Spotify,
            ProviderSchema::Soundcloud => Self::Soundcloud,
        }
    }
}

#[derive(Debug, ToSchema, Validate, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ProviderLoginSchema {
    pub provider: ProviderSchema,
    #[validate(length(min = 1, max = 256))]
    pub external_id: String,
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 1, max = 128))]
    pub display_name: String,
    pub avatar_url: Option<String>,
    #[validate(length(min = 1))]
    pub access_token: String,
    pub refresh_token: Option<String>,
}

#[derive(Debug, ToSchema, Validate, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct UpdateUserSchema {
    #[validate(length(min = 1, max = 128))]
    pub name: Option<String>,
    pub avatar_url: Option<String>,
}

#[derive(Debug, ToSchema, Validate, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AddSongSchema {
    #[validate(length(min = 1, max = 256))]
    pub external_id: String,
    #[validate(length(min = 1, max = 256))]
    pub title: String,
    #[validate(length(min = 1, max = 512))]
    pub artists: String,
    pub artwork_url: Option<String>,
}

/// Host-only state transitions on a session
#[derive(Debug, ToSchema, Deserialize)]
#[serde(rename_all = "camelCase", tag = "action")]
pub enum SessionActionSchema {
    End,
    Delete,
}

/// Request for a realtime capability token. The host authenticates with
/// their bearer token instead and leaves this empty.
#[derive(Debug, ToSchema, Validate, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TokenRequestSchema {
    pub participant_id: Option<i64>,
}

/// The billing provider's checkout notification. Fields arrive as the
/// provider sends them, so nothing here is renamed or rejected early;
/// the handler decides what a usable notification looks like.
#[derive(Debug, ToSchema, Deserialize)]
pub struct WebhookSchema {
    pub event_type: Option<String>,
    pub email: Option<String>,
    pub price_ref: Option<String>,
    pub external_ref: Option<String>,
}

pub struct ValidatedJson<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for ValidatedJson<T>
where
    S: Send + Sync,
    T: DeserializeOwned + Validate,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let extracted_json: Json<T> = Json::from_request(req, state)
            .await
            .map_err(|_| (StatusCode::BAD_REQUEST, "JSON parse failed"))?;

        extracted_json
            .0
            .validate()
            .map_err(|_| (StatusCode::BAD_REQUEST, "Request body is invalid"))?;

        Ok(Self(extracted_json.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pseudo_rules_reject_control_and_symbol_characters() {
        let valid = JoinSessionSchema {
            pseudo: "DJ Herbert_42".to_string(),
        };
        assert!(valid.validate().is_ok());

        let too_short = JoinSessionSchema {
            pseudo: "x".to_string(),
        };
        assert!(too_short.validate().is_err());

        let symbols = JoinSessionSchema {
            pseudo: "Herbert!".to_string(),
        };
        assert!(symbols.validate().is_err());
    }

    #[test]
    fn capacity_is_bounded() {
        let zero = NewSessionSchema {
            name: "Friday night".to_string(),
            max_participants: 0,
        };
        assert!(zero.validate().is_err());

        let too_many = NewSessionSchema {
            name: "Friday night".to_string(),
            max_participants: 11,
        };
        assert!(too_many.validate().is_err());

        let fine = NewSessionSchema {
            name: "Friday night".to_string(),
            max_participants: 10,
        };
        assert!(fine.validate().is_ok());
    }

    #[test]
    fn login_requires_a_real_email() {
        let schema = ProviderLoginSchema {
            provider: ProviderSchema::Spotify,
            external_id: "ext".to_string(),
            email: "not-an-email".to_string(),
            display_name: "Herbert".to_string(),
            avatar_url: None,
            access_token: "token".to_string(),
            refresh_token: None,
        };

        assert!(schema.validate().is_err());
    }
}
