use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::events::session_topic;

/// Issues the scoped capability tokens used to access a session's
/// realtime topic. Signed with a shared symmetric key (HS256).
pub struct RealtimeTokens {
    signing_key: Option<String>,
    ttl_seconds: i64,
}

#[derive(Debug, Error)]
pub enum TokenError {
    /// The shared signing key was never configured
    #[error("Realtime signing key is not configured")]
    SigningKeyMissing,
    #[error("Token is invalid: {0}")]
    Invalid(#[from] jsonwebtoken::errors::Error),
}

/// What the bearer of a token may do on its topic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenMode {
    /// Listen to the topic. Any participant gets this.
    Subscribe,
    /// Listen and publish. Host only.
    Publish,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RealtimeClaims {
    /// Who the token was issued to
    pub sub: String,
    /// The session topic the token is scoped to
    pub topic: String,
    pub mode: TokenMode,
    pub exp: i64,
}

impl RealtimeTokens {
    pub fn new(signing_key: Option<String>, ttl_seconds: i64) -> Self {
        Self {
            signing_key,
            ttl_seconds,
        }
    }

    fn key(&self) -> Result<&str, TokenError> {
        self.signing_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or(TokenError::SigningKeyMissing)
    }

    /// Issues a token scoped to the given session's topic
    pub fn issue(
        &self,
        subject: &str,
        session_code: &str,
        mode: TokenMode,
    ) -> Result<String, TokenError> {
        let key = self.key()?;

        let claims = RealtimeClaims {
            sub: subject.to_string(),
            topic: session_topic(session_code),
            mode,
            exp: (Utc::now() + Duration::seconds(self.ttl_seconds)).timestamp(),
        };

        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(key.as_bytes()),
        )?;

        Ok(token)
    }

    /// Verifies a token's signature and expiry, returning its claims
    pub fn verify(&self, token: &str) -> Result<RealtimeClaims, TokenError> {
        let key = self.key()?;

        let data = decode::<RealtimeClaims>(
            token,
            &DecodingKey::from_secret(key.as_bytes()),
            &Validation::default(),
        )?;

        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens() -> RealtimeTokens {
        RealtimeTokens::new(Some("a-test-signing-key".to_string()), 60 * 60)
    }

    #[test]
    fn issues_and_verifies_subscribe_tokens() {
        let tokens = tokens();

        let token = tokens.issue("participant:12", "ABCD1234", TokenMode::Subscribe).unwrap();
        let claims = tokens.verify(&token).unwrap();

        assert_eq!(claims.sub, "participant:12");
        assert_eq!(claims.topic, "session/ABCD1234");
        assert_eq!(claims.mode, TokenMode::Subscribe);
    }

    #[test]
    fn host_tokens_carry_publish_mode() {
        let tokens = tokens();

        let token = tokens.issue("user:1", "ABCD1234", TokenMode::Publish).unwrap();
        let claims = tokens.verify(&token).unwrap();

        assert_eq!(claims.mode, TokenMode::Publish);
    }

    #[test]
    fn fails_fast_without_a_signing_key() {
        let tokens = RealtimeTokens::new(None, 60);

        let result = tokens.issue("user:1", "ABCD1234", TokenMode::Subscribe);
        assert!(matches!(result, Err(TokenError::SigningKeyMissing)));

        let tokens = RealtimeTokens::new(Some(String::new()), 60);

        let result = tokens.issue("user:1", "ABCD1234", TokenMode::Subscribe);
        assert!(matches!(result, Err(TokenError::SigningKeyMissing)));
    }

    #[test]
    fn rejects_tokens_signed_with_a_different_key() {
        let token = tokens().issue("user:1", "ABCD1234", TokenMode::Subscribe).unwrap();

        let other = RealtimeTokens::new(Some("another-key".to_string()), 60);
        assert!(other.verify(&token).is_err());
    }
}
