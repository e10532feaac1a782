use std::env;
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{GateError, Result};
use crate::reconcile::ReconcilePolicy;
use crate::state::DailyLimits;

const ENV_PREFIX: &str = "PLAYTIME_";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Base URL of the hosted backend, e.g. `https://abc.supabase.co`
    pub backend_url: Option<String>,
    /// Public (anon) API key sent with every request
    pub anon_key: Option<String>,
    /// Directory holding the local key/value file
    pub data_dir: PathBuf,
    /// Playtime granted at the start of each day (seconds)
    pub daily_limit_secs: u64,
    /// Bonus credited when an ad finishes (seconds)
    pub ad_reward_secs: u64,
    /// How long the simulated ad runs (seconds)
    pub ad_duration_secs: u64,
    /// Maximum coins that can be earned per day
    pub daily_coin_cap: u64,
    /// Remote flush interval (seconds)
    pub sync_interval_secs: u64,
    /// Local save interval (seconds)
    pub save_interval_secs: u64,
    /// Idle time before a forced logout (seconds)
    pub inactivity_limit_secs: u64,
    /// Minimum spacing between accepted activity events (milliseconds)
    pub activity_debounce_ms: u64,
    /// Upper bound on the final sync during logout (milliseconds)
    pub logout_sync_cap_ms: u64,
    pub reconcile_policy: ReconcilePolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend_url: None,
            anon_key: None,
            data_dir: PathBuf::from(".playtime-gate"),
            daily_limit_secs: 300, // 5 minutes
            ad_reward_secs: 1200,  // 20 minutes
            ad_duration_secs: 30,
            daily_coin_cap: 15,
            sync_interval_secs: 30,
            save_interval_secs: 5,
            inactivity_limit_secs: 3 * 60,
            activity_debounce_ms: 200,
            logout_sync_cap_ms: 1000,
            reconcile_policy: ReconcilePolicy::RemoteWins,
        }
    }
}

impl Config {
    /// Build a config from `PLAYTIME_*` environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        Ok(Self {
            backend_url: optional("BACKEND_URL"),
            anon_key: optional("ANON_KEY"),
            data_dir: optional("DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            daily_limit_secs: try_load("DAILY_LIMIT_SECS", defaults.daily_limit_secs)?,
            ad_reward_secs: try_load("AD_REWARD_SECS", defaults.ad_reward_secs)?,
            ad_duration_secs: try_load("AD_DURATION_SECS", defaults.ad_duration_secs)?,
            daily_coin_cap: try_load("DAILY_COIN_CAP", defaults.daily_coin_cap)?,
            sync_interval_secs: try_load("SYNC_INTERVAL_SECS", defaults.sync_interval_secs)?,
            save_interval_secs: try_load("SAVE_INTERVAL_SECS", defaults.save_interval_secs)?,
            inactivity_limit_secs: try_load(
                "INACTIVITY_LIMIT_SECS",
                defaults.inactivity_limit_secs,
            )?,
            activity_debounce_ms: try_load("ACTIVITY_DEBOUNCE_MS", defaults.activity_debounce_ms)?,
            logout_sync_cap_ms: try_load("LOGOUT_SYNC_CAP_MS", defaults.logout_sync_cap_ms)?,
            reconcile_policy: try_load("RECONCILE_POLICY", defaults.reconcile_policy)?,
        })
    }

    /// True when both the backend URL and key are configured
    pub fn has_backend(&self) -> bool {
        self.backend_url.is_some() && self.anon_key.is_some()
    }

    pub fn limits(&self) -> DailyLimits {
        DailyLimits {
            daily_seconds: self.daily_limit_secs,
            daily_coin_cap: self.daily_coin_cap,
        }
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }

    pub fn save_interval(&self) -> Duration {
        Duration::from_secs(self.save_interval_secs)
    }

    pub fn inactivity_limit(&self) -> Duration {
        Duration::from_secs(self.inactivity_limit_secs)
    }

    pub fn activity_debounce(&self) -> Duration {
        Duration::from_millis(self.activity_debounce_ms)
    }

    pub fn logout_sync_cap(&self) -> Duration {
        Duration::from_millis(self.logout_sync_cap_ms)
    }

    pub fn ad_duration(&self) -> Duration {
        Duration::from_secs(self.ad_duration_secs)
    }
}

fn optional(key: &str) -> Option<String> {
    env::var(format!("{ENV_PREFIX}{key}"))
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn try_load<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr + Display,
    T::Err: Display,
{
    match optional(key) {
        Some(raw) => raw
            .parse()
            .map_err(|e| GateError::Config(format!("invalid {ENV_PREFIX}{key} value '{raw}': {e}"))),
        None => {
            log::debug!("{ENV_PREFIX}{key} not set, using default: {default}");
            Ok(default)
        }
    }
}
