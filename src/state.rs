use std::sync::{Arc, Mutex, MutexGuard};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::ticker::TickerPhase;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    pub id: String,
    pub email: String,
    pub username: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyLimits {
    /// Playtime granted on each new day
    pub daily_seconds: u64,
    pub daily_coin_cap: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClockState {
    pub remaining_seconds: u64,
    pub last_reset_date: NaiveDate,
}

impl ClockState {
    pub fn fresh(today: NaiveDate, limits: &DailyLimits) -> Self {
        Self {
            remaining_seconds: limits.daily_seconds,
            last_reset_date: today,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrencyState {
    pub coins: u64,
    /// Coins earned today, never above the daily cap
    pub daily_earned: u64,
}

/// Dirty marker for one state slice.
///
/// Every local change bumps `revision`; a confirmed remote write records the
/// revision it carried. The slice is dirty while the two differ.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncFlag {
    revision: u64,
    synced: u64,
}

impl SyncFlag {
    pub fn mark_dirty(&mut self) {
        self.revision += 1;
    }

    pub fn is_dirty(&self) -> bool {
        self.revision != self.synced
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Record a confirmed write of `revision`. Older confirmations are ignored.
    pub fn confirm(&mut self, revision: u64) {
        if revision > self.synced {
            self.synced = revision.min(self.revision);
        }
    }
}

/// The in-memory copy of everything the gate tracks for the current page.
#[derive(Debug, Clone)]
pub struct GameState {
    pub clock: ClockState,
    pub currency: CurrencyState,
    pub clock_sync: SyncFlag,
    pub currency_sync: SyncFlag,
    pub ticker: TickerPhase,
    pub user: Option<UserIdentity>,
    /// Set once a remote write hit a missing profile row
    pub remote_detached: bool,
}

impl GameState {
    pub fn new(today: NaiveDate, limits: &DailyLimits) -> Self {
        Self {
            clock: ClockState::fresh(today, limits),
            currency: CurrencyState::default(),
            clock_sync: SyncFlag::default(),
            currency_sync: SyncFlag::default(),
            ticker: TickerPhase::Idle,
            user: None,
            remote_detached: false,
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.clock_sync.is_dirty() || self.currency_sync.is_dirty()
    }

    /// Start a new day: full allowance, zero coins earned today. Coins are kept.
    pub fn reset_daily(&mut self, today: NaiveDate, limits: &DailyLimits) {
        self.clock = ClockState::fresh(today, limits);
        self.currency.daily_earned = 0;
        self.clock_sync.mark_dirty();
        self.currency_sync.mark_dirty();
    }
}

/// Shared handle to the [`GameState`], cloned into every background task.
#[derive(Debug, Clone)]
pub struct SharedState(Arc<Mutex<GameState>>);

impl SharedState {
    pub fn new(state: GameState) -> Self {
        Self(Arc::new(Mutex::new(state)))
    }

    /// Lock the state. A panic in another holder does not make the data unusable.
    pub fn lock(&self) -> MutexGuard<'_, GameState> {
        self.0.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn snapshot(&self) -> GameState {
        self.lock().clone()
    }
}
