use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// The identity provider's view of a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
}

/// A signed-in session as handed out by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthSession {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    pub user: AuthUser,
}

/// Result of a sign-up. Providers that require email confirmation return no session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignUpOutcome {
    pub user: AuthUser,
    pub session: Option<AuthSession>,
}

#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn sign_up(&self, email: &str, password: &str) -> Result<SignUpOutcome>;

    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthSession>;

    async fn sign_out(&self) -> Result<()>;

    /// Resolve the user behind a stored session, making it current again
    async fn current_user(&self, session: &AuthSession) -> Result<AuthUser>;
}
