use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::calendar::{format_date, parse_date};
use crate::error::Result;
use crate::state::{ClockState, CurrencyState};

/// Name of the hosted table holding one row per player.
pub const PROFILE_TABLE: &str = "users_profile";

/// One `users_profile` row. Gameplay columns may be null on fresh rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileRow {
    pub id: String,
    pub username: String,
    pub email: String,
    #[serde(default)]
    pub remaining_seconds: Option<i64>,
    #[serde(default)]
    pub last_reset_date: Option<String>,
    #[serde(default)]
    pub gold_coins: Option<i64>,
    #[serde(default)]
    pub daily_coins_earned: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl ProfileRow {
    /// A fresh row for a player who just signed up
    pub fn new(id: impl Into<String>, username: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            username: username.into(),
            email: email.into(),
            remaining_seconds: None,
            last_reset_date: None,
            gold_coins: None,
            daily_coins_earned: None,
            updated_at: None,
        }
    }

    pub fn snapshot(&self) -> RemoteSnapshot {
        // Negative counters are as useless as missing ones.
        let non_negative = |v: Option<i64>| v.and_then(|v| u64::try_from(v).ok());
        RemoteSnapshot {
            remaining_seconds: non_negative(self.remaining_seconds),
            last_reset_date: self.last_reset_date.as_deref().and_then(parse_date),
            coins: non_negative(self.gold_coins),
            daily_earned: non_negative(self.daily_coins_earned),
            updated_at: self.updated_at,
        }
    }
}

/// What the remote row says about the clock and coins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteSnapshot {
    pub remaining_seconds: Option<u64>,
    pub last_reset_date: Option<NaiveDate>,
    pub coins: Option<u64>,
    pub daily_earned: Option<u64>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Columns written by a sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub remaining_seconds: i64,
    pub last_reset_date: String,
    pub gold_coins: i64,
    pub daily_coins_earned: i64,
}

impl ProgressUpdate {
    pub fn new(clock: &ClockState, currency: &CurrencyState) -> Self {
        let clamp = |v: u64| i64::try_from(v).unwrap_or(i64::MAX);
        Self {
            remaining_seconds: clamp(clock.remaining_seconds),
            last_reset_date: format_date(clock.last_reset_date),
            gold_coins: clamp(currency.coins),
            daily_coins_earned: clamp(currency.daily_earned),
        }
    }
}

/// The hosted single-table profile store.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Point lookup by user id
    async fn fetch_profile(&self, id: &str) -> Result<Option<ProfileRow>>;

    async fn find_by_username(&self, username: &str) -> Result<Option<ProfileRow>>;

    async fn find_by_email(&self, email: &str) -> Result<Option<ProfileRow>>;

    async fn insert_profile(&self, row: &ProfileRow) -> Result<()>;

    /// Point update by id. Returns how many rows were changed.
    async fn update_progress(&self, id: &str, update: &ProgressUpdate) -> Result<u64>;
}
