mod auth;
mod calendar;
mod config;
mod error;
mod events;
mod gate;
mod inactivity;
mod ledger;
mod memory;
mod reconcile;
mod remote;
mod reward;
mod session;
mod state;
mod store;
mod supabase;
mod sync;
mod ticker;
mod zoom;

pub use auth::{AuthProvider, AuthSession, AuthUser, SignUpOutcome};
pub use calendar::{format_date, parse_date, Calendar, ManualCalendar, SystemCalendar};
pub use config::Config;
pub use error::{GateError, Result};
pub use events::{EventBus, GateEvent};
pub use gate::PlaytimeGate;
pub use inactivity::{Activity, InactivityMonitor};
pub use ledger::{CoinOutcome, CurrencyLedger};
pub use memory::{MemoryAuth, MemoryProfiles};
pub use reconcile::{reconcile, Authority, ReconcilePolicy, Reconciled, ReconciliationEngine};
pub use remote::{ProfileRow, ProfileStore, ProgressUpdate, RemoteSnapshot, PROFILE_TABLE};
pub use reward::{credit as credit_reward, RewardFlow};
pub use session::{is_valid_username, looks_like_email, Availability, SessionManager};
pub use state::{ClockState, CurrencyState, DailyLimits, GameState, SharedState, SyncFlag, UserIdentity};
pub use store::{DeviceMode, LocalSnapshot, LocalStore, StorageEvent, StorageWatcher};
pub use supabase::SupabaseClient;
pub use sync::{SyncOutcome, SyncScheduler};
pub use ticker::{format_remaining, tick, TickOutcome, TickerPhase};
pub use zoom::{ZoomControl, MAX_ZOOM, MIN_ZOOM, ZOOM_STEP};

/// Local storage key names shared with the site's scripts.
pub mod keys {
    pub use crate::store::{
        KEY_AUTH_TOKEN, KEY_CLOCK_PENDING, KEY_COINS_PENDING, KEY_DAILY_EARNED, KEY_DEVICE_MODE,
        KEY_GOLD_COINS, KEY_LAST_RESET_DATE, KEY_LOGGED_IN, KEY_REMAINING_SECONDS, KEY_SAVED_AT,
        KEY_USER_NAME, KEY_ZOOM_LEVEL,
    };
}
