/// Settings for the collab system. Constructed explicitly by the caller
/// and injected into the components that need it.
#[derive(Debug, Clone)]
pub struct EncoreConfig {
    /// Shared symmetric key for realtime capability tokens. Issuance
    /// fails with an explicit error while this is unset.
    pub realtime_signing_key: Option<String>,
    /// How long issued realtime tokens stay valid, in seconds
    pub realtime_token_ttl_seconds: i64,
    /// Ended sessions older than this many days are reaped by cleanup
    pub session_retention_days: i64,
}

impl Default for EncoreConfig {
    fn default() -> Self {
        Self {
            realtime_signing_key: None,
            realtime_token_ttl_seconds: 60 * 60 * 6,
            session_retention_days: 7,
        }
    }
}
