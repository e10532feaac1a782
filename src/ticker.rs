use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::state::{DailyLimits, GameState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TickerPhase {
    /// Waiting for the device-mode selection
    Idle,
    Running,
    /// Out of time until a reward is credited
    Expired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Idle,
    Counted { remaining: u64 },
    /// Time just ran out on this tick
    Expired,
    StillExpired,
    /// Midnight passed while the page was open
    DayRolledOver { remaining: u64 },
}

/// Leave `Idle`. A session that starts with no time left expires on its first tick.
pub fn start(state: &mut GameState) {
    if state.ticker == TickerPhase::Idle {
        state.ticker = TickerPhase::Running;
    }
}

/// Advance the countdown by one second.
pub fn tick(state: &mut GameState, today: NaiveDate, limits: &DailyLimits) -> TickOutcome {
    if state.ticker == TickerPhase::Idle {
        return TickOutcome::Idle;
    }

    if state.clock.last_reset_date != today {
        state.reset_daily(today, limits);
        state.ticker = TickerPhase::Running;
        return TickOutcome::DayRolledOver {
            remaining: state.clock.remaining_seconds,
        };
    }

    match state.ticker {
        TickerPhase::Expired => TickOutcome::StillExpired,
        _ if state.clock.remaining_seconds == 0 => {
            state.ticker = TickerPhase::Expired;
            TickOutcome::Expired
        }
        _ => {
            state.clock.remaining_seconds -= 1;
            state.clock_sync.mark_dirty();
            if state.clock.remaining_seconds == 0 {
                state.ticker = TickerPhase::Expired;
                TickOutcome::Expired
            } else {
                TickOutcome::Counted {
                    remaining: state.clock.remaining_seconds,
                }
            }
        }
    }
}

/// `m:ss` as shown in the timer widget
pub fn format_remaining(seconds: u64) -> String {
    format!("{}:{:02}", seconds / 60, seconds % 60)
}
