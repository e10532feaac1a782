use std::sync::Mutex;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::events::{EventBus, GateEvent};
use crate::state::GameState;
use crate::ticker::TickerPhase;

/// Add the ad bonus through the same path as the countdown.
///
/// An expired countdown resumes; an idle one stays idle.
pub fn credit(state: &mut GameState, bonus: u64) -> u64 {
    state.clock.remaining_seconds = state.clock.remaining_seconds.saturating_add(bonus);
    state.clock_sync.mark_dirty();
    if state.ticker == TickerPhase::Expired {
        state.ticker = TickerPhase::Running;
    }
    state.clock.remaining_seconds
}

/// A simulated ad that must play to the end before time is credited.
pub struct RewardFlow {
    duration: Duration,
    bonus: u64,
    active: Mutex<Option<JoinHandle<()>>>,
}

impl RewardFlow {
    pub fn new(duration: Duration, bonus: u64) -> Self {
        Self {
            duration,
            bonus,
            active: Mutex::new(None),
        }
    }

    pub fn bonus(&self) -> u64 {
        self.bonus
    }

    pub fn is_playing(&self) -> bool {
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Play the ad. Starting again restarts the countdown from the top.
    ///
    /// `on_complete` runs only when the full duration elapsed.
    pub fn start<F>(&self, events: EventBus, on_complete: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let total = self.duration.as_secs();
        let handle = tokio::spawn(async move {
            events.emit(GateEvent::AdStarted {
                duration_secs: total,
            });

            let mut interval = tokio::time::interval(Duration::from_secs(1));
            // Skip the first tick (immediate fire)
            interval.tick().await;

            let mut left = total;
            while left > 0 {
                interval.tick().await;
                left -= 1;
                events.emit(GateEvent::AdProgress { seconds_left: left });
            }

            log::info!("[Reward] Ad finished");
            on_complete();
        });

        let previous = self
            .active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace(handle);
        if let Some(previous) = previous {
            log::debug!("[Reward] Restarting ad countdown");
            previous.abort();
        }
    }

    /// Stop the ad early. Nothing is credited.
    pub fn cancel(&self) -> bool {
        let handle = self.active.lock().unwrap_or_else(|e| e.into_inner()).take();
        match handle {
            Some(handle) if !handle.is_finished() => {
                handle.abort();
                log::info!("[Reward] Ad dismissed early, no reward");
                true
            }
            _ => false,
        }
    }
}

impl Drop for RewardFlow {
    fn drop(&mut self) {
        if let Some(handle) = self.active.get_mut().unwrap_or_else(|e| e.into_inner()).take() {
            handle.abort();
        }
    }
}
