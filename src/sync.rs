use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::calendar::Calendar;
use crate::error::{GateError, Result};
use crate::events::{EventBus, GateEvent};
use crate::remote::{ProfileStore, ProgressUpdate};
use crate::state::SharedState;
use crate::store::{LocalStore, StorageWatcher, KEY_REMAINING_SECONDS};
use crate::ticker::TickerPhase;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    Synced,
    /// Nobody signed in; local storage is the only copy
    SkippedAnonymous,
    SkippedClean,
    /// A previous write found no profile row
    SkippedDetached,
}

/// Moves the in-memory state to local storage and the remote profile row.
pub struct SyncScheduler {
    state: SharedState,
    store: LocalStore,
    profiles: Arc<dyn ProfileStore>,
    calendar: Arc<dyn Calendar>,
    events: EventBus,
}

impl SyncScheduler {
    pub fn new(
        state: SharedState,
        store: LocalStore,
        profiles: Arc<dyn ProfileStore>,
        calendar: Arc<dyn Calendar>,
        events: EventBus,
    ) -> Self {
        Self {
            state,
            store,
            profiles,
            calendar,
            events,
        }
    }

    /// Write the current state and its pending markers to local storage
    pub fn save_local(&self) -> Result<()> {
        let (clock, currency, clock_pending, coins_pending) = {
            let state = self.state.lock();
            (
                state.clock,
                state.currency,
                state.clock_sync.is_dirty(),
                state.currency_sync.is_dirty(),
            )
        };
        self.store.write_clock(&clock, self.calendar.now())?;
        self.store.write_currency(&currency)?;
        self.store.set_pending(clock_pending, coins_pending)
    }

    /// Push the state to the remote row when dirty, or always when `force` is set.
    pub async fn flush(&self, force: bool) -> Result<SyncOutcome> {
        let (user_id, update, clock_rev, currency_rev) = {
            let state = self.state.lock();
            let Some(user) = &state.user else {
                return Ok(SyncOutcome::SkippedAnonymous);
            };
            if state.remote_detached {
                return Ok(SyncOutcome::SkippedDetached);
            }
            if !force && !state.is_dirty() {
                return Ok(SyncOutcome::SkippedClean);
            }
            (
                user.id.clone(),
                ProgressUpdate::new(&state.clock, &state.currency),
                state.clock_sync.revision(),
                state.currency_sync.revision(),
            )
        };

        let rows = match self.profiles.update_progress(&user_id, &update).await {
            Ok(rows) => rows,
            Err(e) => {
                log::warn!("[Sync] Remote write failed, will retry: {}", e);
                self.events.emit(GateEvent::SyncFailed {
                    reason: e.to_string(),
                });
                return Err(e);
            }
        };

        if rows == 0 {
            let err = GateError::ProfileMissing(user_id);
            log::error!("[Sync] {}; remote writes suspended for this session", err);
            self.state.lock().remote_detached = true;
            self.events.emit(GateEvent::SyncFailed {
                reason: err.to_string(),
            });
            return Err(err);
        }

        let (clock_pending, coins_pending) = {
            let mut state = self.state.lock();
            state.clock_sync.confirm(clock_rev);
            state.currency_sync.confirm(currency_rev);
            (state.clock_sync.is_dirty(), state.currency_sync.is_dirty())
        };
        if let Err(e) = self.store.set_pending(clock_pending, coins_pending) {
            log::warn!("[Sync] Failed to update pending markers: {}", e);
        }

        log::debug!(
            "[Sync] Remote updated: {}s left, {} coins",
            update.remaining_seconds,
            update.gold_coins
        );
        self.events.emit(GateEvent::SyncCompleted);
        Ok(SyncOutcome::Synced)
    }

    /// Tab hidden: save and push unconditionally
    pub async fn on_hidden(&self) {
        if let Err(e) = self.save_local() {
            log::warn!("[Sync] Local save on hide failed: {}", e);
        }
        if let Err(e) = self.flush(true).await {
            log::warn!("[Sync] Flush on hide failed: {}", e);
        }
    }

    /// Page unload: save, then push without waiting for the answer
    pub fn on_unload(self: &Arc<Self>) -> JoinHandle<()> {
        if let Err(e) = self.save_local() {
            log::warn!("[Sync] Local save on unload failed: {}", e);
        }
        let this = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = this.flush(true).await {
                log::warn!("[Sync] Flush on unload failed: {}", e);
            }
        })
    }

    /// Flush dirty state every `every`, until `stop` flips to true
    pub fn spawn_periodic(
        self: &Arc<Self>,
        every: Duration,
        mut stop: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            // Skip the first tick (immediate fire)
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        match this.flush(false).await {
                            Ok(outcome) => log::debug!("[Sync] Periodic flush: {:?}", outcome),
                            Err(e) => log::debug!("[Sync] Periodic flush failed: {}", e),
                        }
                    }
                    _ = stop.changed() => {
                        log::info!("[Sync] Periodic flush stopped");
                        break;
                    }
                }
            }
        })
    }

    /// Save to local storage every `every`, until `stop` flips to true
    pub fn spawn_local_saver(
        self: &Arc<Self>,
        every: Duration,
        mut stop: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(e) = this.save_local() {
                            log::warn!("[Sync] Local save failed: {}", e);
                        }
                    }
                    _ = stop.changed() => break,
                }
            }
        })
    }

    /// Follow remaining-time changes made by other tabs. Never writes remotely.
    pub fn spawn_storage_observer(
        self: &Arc<Self>,
        mut watcher: StorageWatcher,
        mut stop: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = watcher.changed() => {
                        let Some(event) = event else { break };
                        if event.key != KEY_REMAINING_SECONDS {
                            continue;
                        }
                        let Some(remaining) = event
                            .new_value
                            .as_deref()
                            .and_then(|raw| raw.trim().parse::<u64>().ok())
                        else {
                            continue;
                        };
                        this.apply_external_remaining(remaining);
                    }
                    _ = stop.changed() => break,
                }
            }
        })
    }

    fn apply_external_remaining(&self, remaining: u64) {
        let mut state = self.state.lock();
        if state.clock.remaining_seconds == remaining {
            return;
        }
        log::info!(
            "[Sync] Remaining time changed in another tab: {} -> {}",
            state.clock.remaining_seconds,
            remaining
        );
        state.clock.remaining_seconds = remaining;
        if remaining > 0 && state.ticker == TickerPhase::Expired {
            state.ticker = TickerPhase::Running;
            self.events.emit(GateEvent::PromptDismissed);
        }
        self.events.emit(GateEvent::TimerTick {
            remaining,
            low: remaining < 60,
        });
    }
}
