//! In-process backends, used when no hosted backend is configured and as test fakes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::auth::{AuthProvider, AuthSession, AuthUser, SignUpOutcome};
use crate::error::{GateError, Result};
use crate::remote::{ProfileRow, ProfileStore, ProgressUpdate};

#[derive(Default)]
pub struct MemoryProfiles {
    rows: Mutex<HashMap<String, ProfileRow>>,
    offline: AtomicBool,
    writes: AtomicU64,
}

impl MemoryProfiles {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail as if the network were down
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn row(&self, id: &str) -> Option<ProfileRow> {
        self.rows.lock().unwrap_or_else(|e| e.into_inner()).get(id).cloned()
    }

    /// Insert or replace a row directly
    pub fn put(&self, row: ProfileRow) {
        self.rows
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(row.id.clone(), row);
    }

    pub fn delete(&self, id: &str) {
        self.rows.lock().unwrap_or_else(|e| e.into_inner()).remove(id);
    }

    /// Number of successful progress writes so far
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    fn check_online(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(GateError::Server {
                status: 503,
                message: "profile store offline".to_string(),
            });
        }
        Ok(())
    }

    fn find<F>(&self, pred: F) -> Option<ProfileRow>
    where
        F: Fn(&ProfileRow) -> bool,
    {
        self.rows
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .find(|row| pred(row))
            .cloned()
    }
}

#[async_trait]
impl ProfileStore for MemoryProfiles {
    async fn fetch_profile(&self, id: &str) -> Result<Option<ProfileRow>> {
        self.check_online()?;
        Ok(self.row(id))
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<ProfileRow>> {
        self.check_online()?;
        Ok(self.find(|row| row.username == username))
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<ProfileRow>> {
        self.check_online()?;
        Ok(self.find(|row| row.email == email))
    }

    async fn insert_profile(&self, row: &ProfileRow) -> Result<()> {
        self.check_online()?;
        let mut rows = self.rows.lock().unwrap_or_else(|e| e.into_inner());
        if rows.contains_key(&row.id) {
            return Err(GateError::Server {
                status: 409,
                message: format!("duplicate key value for id {}", row.id),
            });
        }
        rows.insert(row.id.clone(), row.clone());
        Ok(())
    }

    async fn update_progress(&self, id: &str, update: &ProgressUpdate) -> Result<u64> {
        self.check_online()?;
        let mut rows = self.rows.lock().unwrap_or_else(|e| e.into_inner());
        let Some(row) = rows.get_mut(id) else {
            return Ok(0);
        };

        row.remaining_seconds = Some(update.remaining_seconds);
        row.last_reset_date = Some(update.last_reset_date.clone());
        row.gold_coins = Some(update.gold_coins);
        row.daily_coins_earned = Some(update.daily_coins_earned);
        row.updated_at = Some(chrono::Utc::now());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(1)
    }
}

struct Account {
    id: String,
    password: String,
}

/// Email/password accounts kept in memory.
#[derive(Default)]
pub struct MemoryAuth {
    accounts: Mutex<HashMap<String, Account>>,
    current: Mutex<Option<AuthUser>>,
    next_id: AtomicU64,
}

impl MemoryAuth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<AuthUser> {
        self.current.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn session_for(&self, id: &str, email: &str) -> AuthSession {
        let user = AuthUser {
            id: id.to_string(),
            email: Some(email.to_string()),
        };
        *self.current.lock().unwrap_or_else(|e| e.into_inner()) = Some(user.clone());
        AuthSession {
            access_token: format!("memory-token-{}", id),
            refresh_token: None,
            expires_in: Some(3600),
            user,
        }
    }
}

#[async_trait]
impl AuthProvider for MemoryAuth {
    async fn sign_up(&self, email: &str, password: &str) -> Result<SignUpOutcome> {
        let id = {
            let mut accounts = self.accounts.lock().unwrap_or_else(|e| e.into_inner());
            if accounts.contains_key(email) {
                return Err(GateError::Auth("User already registered".to_string()));
            }
            let id = format!("user-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
            accounts.insert(
                email.to_string(),
                Account {
                    id: id.clone(),
                    password: password.to_string(),
                },
            );
            id
        };

        let session = self.session_for(&id, email);
        Ok(SignUpOutcome {
            user: session.user.clone(),
            session: Some(session),
        })
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthSession> {
        let id = {
            let accounts = self.accounts.lock().unwrap_or_else(|e| e.into_inner());
            match accounts.get(email) {
                Some(account) if account.password == password => account.id.clone(),
                _ => return Err(GateError::Auth("Invalid login credentials".to_string())),
            }
        };
        Ok(self.session_for(&id, email))
    }

    async fn sign_out(&self) -> Result<()> {
        *self.current.lock().unwrap_or_else(|e| e.into_inner()) = None;
        Ok(())
    }

    async fn current_user(&self, session: &AuthSession) -> Result<AuthUser> {
        let email = session.user.email.clone().unwrap_or_default();
        let known = {
            let accounts = self.accounts.lock().unwrap_or_else(|e| e.into_inner());
            accounts
                .get(&email)
                .is_some_and(|account| account.id == session.user.id)
        };
        if !known {
            return Err(GateError::Auth("session not found".to_string()));
        }
        *self.current.lock().unwrap_or_else(|e| e.into_inner()) = Some(session.user.clone());
        Ok(session.user.clone())
    }
}
