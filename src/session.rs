use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::auth::{AuthProvider, AuthSession};
use crate::error::{GateError, Result};
use crate::remote::{ProfileRow, ProfileStore};
use crate::state::UserIdentity;
use crate::store::LocalStore;

const MIN_USERNAME_LEN: usize = 4;
const MIN_PASSWORD_LEN: usize = 6;

/// Answer to "can I use this username/email?", worded for the signup form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Availability {
    pub available: bool,
    pub message: String,
}

impl Availability {
    fn yes() -> Self {
        Self {
            available: true,
            message: "Available".to_string(),
        }
    }

    fn no(message: &str) -> Self {
        Self {
            available: false,
            message: message.to_string(),
        }
    }
}

/// Letters, digits, `.` and `_` only. No spaces.
pub fn is_valid_username(username: &str) -> bool {
    !username.is_empty()
        && username
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_')
}

pub fn looks_like_email(value: &str) -> bool {
    value.contains('@')
}

/// Signup, sign-in and sign-out against the identity provider, plus the local session keys.
pub struct SessionManager {
    auth: Arc<dyn AuthProvider>,
    profiles: Arc<dyn ProfileStore>,
    store: LocalStore,
    current: Mutex<Option<UserIdentity>>,
}

impl SessionManager {
    pub fn new(auth: Arc<dyn AuthProvider>, profiles: Arc<dyn ProfileStore>, store: LocalStore) -> Self {
        Self {
            auth,
            profiles,
            store,
            current: Mutex::new(None),
        }
    }

    pub fn current(&self) -> Option<UserIdentity> {
        self.current.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn set_current(&self, user: Option<UserIdentity>) {
        *self.current.lock().unwrap_or_else(|e| e.into_inner()) = user;
    }

    pub async fn check_username(&self, username: &str) -> Availability {
        if username.chars().count() < MIN_USERNAME_LEN {
            return Availability::no("Too short");
        }
        if !is_valid_username(username) {
            return Availability::no("Only letters, numbers, . and _ allowed (No spaces)");
        }

        match self.profiles.find_by_username(username).await {
            Ok(None) => Availability::yes(),
            Ok(Some(_)) => Availability::no("Username already taken"),
            Err(e) => {
                log::error!("Failed to check username: {}", e);
                Availability::no("Error checking username")
            }
        }
    }

    pub async fn check_email(&self, email: &str) -> Availability {
        if !looks_like_email(email) {
            return Availability::no("Invalid email");
        }

        match self.profiles.find_by_email(email).await {
            Ok(None) => Availability::yes(),
            Ok(Some(_)) => Availability::no("Email already registered"),
            Err(e) => {
                log::error!("Failed to check email: {}", e);
                Availability::no("Error checking email")
            }
        }
    }

    /// Create the account, its profile row, and the local session
    pub async fn sign_up(&self, username: &str, email: &str, password: &str) -> Result<UserIdentity> {
        if !is_valid_username(username) {
            return Err(GateError::Validation(
                "Invalid username format. No spaces allowed.".to_string(),
            ));
        }
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(GateError::Validation(format!(
                "Password should be at least {} characters",
                MIN_PASSWORD_LEN
            )));
        }

        let name_check = self.check_username(username).await;
        if !name_check.available {
            return Err(GateError::Validation(name_check.message));
        }
        let email_check = self.check_email(email).await;
        if !email_check.available {
            return Err(GateError::Validation(email_check.message));
        }

        let outcome = self.auth.sign_up(email, password).await?;
        let identity = UserIdentity {
            id: outcome.user.id.clone(),
            email: email.to_string(),
            username: username.to_string(),
        };

        self.profiles
            .insert_profile(&ProfileRow::new(&identity.id, username, email))
            .await?;

        self.remember(&identity, outcome.session.as_ref())?;
        log::info!("Signed up {}", username);
        Ok(identity)
    }

    /// Sign in with a username or an email address
    pub async fn sign_in(&self, identifier: &str, password: &str) -> Result<UserIdentity> {
        let identifier = identifier.trim();

        let (email, known_username) = if looks_like_email(identifier) {
            (identifier.to_string(), None)
        } else {
            match self.profiles.find_by_username(identifier).await {
                Ok(Some(row)) => (row.email, Some(row.username)),
                Ok(None) => return Err(GateError::NotFound("Username not found".to_string())),
                Err(e) => {
                    log::warn!("Username lookup failed: {}", e);
                    return Err(GateError::NotFound("Username not found".to_string()));
                }
            }
        };

        let session = self.auth.sign_in(&email, password).await?;

        let username = match known_username {
            Some(username) => username,
            None => match self.profiles.fetch_profile(&session.user.id).await {
                Ok(Some(row)) => row.username,
                Ok(None) => identifier.to_string(),
                Err(e) => {
                    log::warn!("Profile lookup after sign-in failed: {}", e);
                    identifier.to_string()
                }
            },
        };

        let identity = UserIdentity {
            id: session.user.id.clone(),
            email,
            username,
        };
        self.remember(&identity, Some(&session))?;
        log::info!("Signed in {}", identity.username);
        Ok(identity)
    }

    fn remember(&self, identity: &UserIdentity, session: Option<&AuthSession>) -> Result<()> {
        let token = session.map(serde_json::to_string).transpose()?;
        self.store.set_session(&identity.username, token.as_deref())?;
        self.set_current(Some(identity.clone()));
        Ok(())
    }

    /// Pick up a session stored by an earlier page load
    pub async fn restore(&self) -> Option<UserIdentity> {
        if !self.store.is_logged_in() {
            return None;
        }

        let session: AuthSession = match self
            .store
            .session_token()
            .map(|raw| serde_json::from_str(&raw))
        {
            Some(Ok(session)) => session,
            Some(Err(e)) => {
                log::warn!("Stored session token is unreadable: {}", e);
                return None;
            }
            None => {
                log::warn!("Logged-in flag set but no session token stored");
                return None;
            }
        };

        let user = match self.auth.current_user(&session).await {
            Ok(user) => user,
            Err(e) => {
                log::warn!("Stored session rejected: {}", e);
                return None;
            }
        };

        let username = match self.store.username() {
            Some(username) => username,
            None => self
                .profiles
                .fetch_profile(&user.id)
                .await
                .ok()
                .flatten()
                .map(|row| row.username)
                .unwrap_or_default(),
        };

        let identity = UserIdentity {
            id: user.id,
            email: user.email.unwrap_or_default(),
            username,
        };
        log::info!("Restored session for {}", identity.username);
        self.set_current(Some(identity.clone()));
        Some(identity)
    }

    /// Sign out at the provider (best effort) and forget session and gameplay keys
    pub async fn sign_out_and_clear(&self) -> Result<()> {
        if let Err(e) = self.auth.sign_out().await {
            log::warn!("Provider sign-out failed: {}", e);
        }
        self.set_current(None);
        self.store.clear_session()
    }
}
