use thiserror::Error;

/// Everything that can go wrong while gating a play session.
///
/// Nothing here is fatal: callers degrade to the local cache and keep the
/// state dirty so a later flush can retry.
#[derive(Debug, Error)]
pub enum GateError {
    /// Bad username/email/password input, shown to the player as-is.
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("not signed in")]
    NotAuthenticated,

    /// A profile update matched zero rows.
    #[error("profile row missing for user {0}")]
    ProfileMissing(String),

    #[error("HTTP {status}: {message}")]
    Server { status: u16, message: String },

    #[error("network: {0}")]
    Network(#[from] reqwest::Error),

    #[error("decode: {0}")]
    Decode(String),

    #[error("auth: {0}")]
    Auth(String),

    #[error("storage: {0}")]
    Storage(String),

    #[error("config: {0}")]
    Config(String),
}

impl From<serde_json::Error> for GateError {
    fn from(err: serde_json::Error) -> Self {
        GateError::Decode(err.to_string())
    }
}

pub type Result<T, E = GateError> = std::result::Result<T, E>;
