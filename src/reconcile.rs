//! Deciding which copy of the clock and coins is authoritative on load.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::calendar::Calendar;
use crate::error::Result;
use crate::remote::{ProfileStore, RemoteSnapshot};
use crate::state::{ClockState, CurrencyState, DailyLimits, UserIdentity};
use crate::store::{LocalSnapshot, LocalStore};

/// How to settle a same-day disagreement between local and remote state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcilePolicy {
    /// The remote row always wins.
    #[default]
    RemoteWins,
    /// Local state with unsynced changes wins and is pushed.
    PreferPendingLocal,
    /// The snapshot saved most recently wins. Missing timestamps lose to remote.
    LastWriterWins,
}

impl fmt::Display for ReconcilePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ReconcilePolicy::RemoteWins => "remote_wins",
            ReconcilePolicy::PreferPendingLocal => "prefer_pending_local",
            ReconcilePolicy::LastWriterWins => "last_writer_wins",
        };
        f.write_str(name)
    }
}

impl FromStr for ReconcilePolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "remote_wins" | "remote" => Ok(ReconcilePolicy::RemoteWins),
            "prefer_pending_local" | "local" => Ok(ReconcilePolicy::PreferPendingLocal),
            "last_writer_wins" | "lww" => Ok(ReconcilePolicy::LastWriterWins),
            other => Err(format!("unknown reconcile policy '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Authority {
    /// No usable remote row; local storage decided.
    Local,
    /// Same-day local state beat the remote row.
    LocalOverRemote,
    Remote,
    /// A new day started; both copies were reset.
    DailyReset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reconciled {
    pub clock: ClockState,
    pub currency: CurrencyState,
    pub authority: Authority,
    /// The remote row must be overwritten right away
    pub force_sync: bool,
    /// The adopted clock holds changes the remote row has not seen
    pub clock_pending: bool,
    pub currency_pending: bool,
}

/// Merge a local and an optional remote snapshot into one authoritative state.
///
/// The daily reset rule runs first: whichever side decides is reset when its
/// date is not `today`. Absent or malformed counters fall back to the daily
/// defaults, and `daily_earned` never exceeds the cap.
///
/// Only an adopted remote row comes back clean. Local state keeps its unsynced
/// markers so a later flush still carries it.
pub fn reconcile(
    local: &LocalSnapshot,
    remote: Option<&RemoteSnapshot>,
    today: NaiveDate,
    limits: &DailyLimits,
    policy: ReconcilePolicy,
) -> Reconciled {
    let Some(remote) = remote else {
        return from_local(local, today, limits);
    };

    if remote.last_reset_date != Some(today) {
        return Reconciled {
            clock: ClockState::fresh(today, limits),
            currency: CurrencyState {
                coins: remote.coins.unwrap_or(0),
                daily_earned: 0,
            },
            authority: Authority::DailyReset,
            force_sync: true,
            clock_pending: true,
            currency_pending: true,
        };
    }

    let local_is_today = local.last_reset_date == Some(today);
    let local_wins = local_is_today
        && match policy {
            ReconcilePolicy::RemoteWins => false,
            ReconcilePolicy::PreferPendingLocal => local.pending(),
            ReconcilePolicy::LastWriterWins => match (local.saved_at, remote.updated_at) {
                (Some(local_at), Some(remote_at)) => local_at > remote_at,
                _ => false,
            },
        };

    if local_wins {
        let mut reconciled = from_local(local, today, limits);
        reconciled.authority = Authority::LocalOverRemote;
        reconciled.force_sync = true;
        reconciled.clock_pending = true;
        reconciled.currency_pending = true;
        return reconciled;
    }

    Reconciled {
        clock: ClockState {
            remaining_seconds: remote.remaining_seconds.unwrap_or(limits.daily_seconds),
            last_reset_date: today,
        },
        currency: CurrencyState {
            coins: remote.coins.unwrap_or(0),
            daily_earned: remote.daily_earned.unwrap_or(0).min(limits.daily_coin_cap),
        },
        authority: Authority::Remote,
        force_sync: false,
        clock_pending: false,
        currency_pending: false,
    }
}

fn from_local(local: &LocalSnapshot, today: NaiveDate, limits: &DailyLimits) -> Reconciled {
    let coins = local.coins.unwrap_or(0);

    if local.last_reset_date != Some(today) {
        return Reconciled {
            clock: ClockState::fresh(today, limits),
            currency: CurrencyState {
                coins,
                daily_earned: 0,
            },
            authority: Authority::DailyReset,
            force_sync: false,
            // The reset itself is news to the remote row.
            clock_pending: true,
            currency_pending: true,
        };
    }

    Reconciled {
        clock: ClockState {
            remaining_seconds: local.remaining_seconds.unwrap_or(limits.daily_seconds),
            last_reset_date: today,
        },
        currency: CurrencyState {
            coins,
            daily_earned: local.daily_earned.unwrap_or(0).min(limits.daily_coin_cap),
        },
        authority: Authority::Local,
        force_sync: false,
        clock_pending: local.clock_pending,
        currency_pending: local.coins_pending,
    }
}

/// Loads local and remote snapshots, reconciles them and writes the result back locally.
pub struct ReconciliationEngine {
    store: LocalStore,
    profiles: Arc<dyn ProfileStore>,
    calendar: Arc<dyn Calendar>,
    limits: DailyLimits,
    policy: ReconcilePolicy,
}

impl ReconciliationEngine {
    pub fn new(
        store: LocalStore,
        profiles: Arc<dyn ProfileStore>,
        calendar: Arc<dyn Calendar>,
        limits: DailyLimits,
        policy: ReconcilePolicy,
    ) -> Self {
        Self {
            store,
            profiles,
            calendar,
            limits,
            policy,
        }
    }

    /// Produce the authoritative state for this page and overwrite local storage with it,
    /// pending markers included.
    ///
    /// The remote write for `force_sync` is left to the caller.
    pub async fn load(&self, user: Option<&UserIdentity>) -> Result<Reconciled> {
        let local = self.store.local_snapshot();
        let today = self.calendar.today();

        let remote = match user {
            Some(user) => match self.profiles.fetch_profile(&user.id).await {
                Ok(Some(row)) => Some(row.snapshot()),
                Ok(None) => {
                    log::info!("No profile row for {}, using local state", user.username);
                    None
                }
                Err(e) => {
                    log::warn!("Failed to fetch profile for {}: {}, using local state", user.username, e);
                    None
                }
            },
            None => None,
        };

        let reconciled = reconcile(&local, remote.as_ref(), today, &self.limits, self.policy);
        log::info!(
            "Reconciled state ({:?}): {}s left, {} coins ({} today)",
            reconciled.authority,
            reconciled.clock.remaining_seconds,
            reconciled.currency.coins,
            reconciled.currency.daily_earned
        );

        self.store.write_clock(&reconciled.clock, self.calendar.now())?;
        self.store.write_currency(&reconciled.currency)?;
        self.store
            .set_pending(reconciled.clock_pending, reconciled.currency_pending)?;

        Ok(reconciled)
    }
}
