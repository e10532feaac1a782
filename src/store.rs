use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::calendar::{format_date, parse_date};
use crate::error::{GateError, Result};
use crate::state::{ClockState, CurrencyState};

const STORE_FILENAME: &str = "local_storage.json";

pub const KEY_USER_NAME: &str = "user_name";
pub const KEY_LOGGED_IN: &str = "is_logged_in";
pub const KEY_AUTH_TOKEN: &str = "supabase.auth.token";
pub const KEY_REMAINING_SECONDS: &str = "tm_remaining_seconds";
pub const KEY_LAST_RESET_DATE: &str = "tm_last_reset_date";
pub const KEY_SAVED_AT: &str = "tm_saved_at";
pub const KEY_CLOCK_PENDING: &str = "tm_pending_sync";
pub const KEY_GOLD_COINS: &str = "gm_gold_coins";
pub const KEY_DAILY_EARNED: &str = "gm_daily_earned";
pub const KEY_COINS_PENDING: &str = "gm_pending_sync";
pub const KEY_ZOOM_LEVEL: &str = "siteZoomLevel";
pub const KEY_DEVICE_MODE: &str = "device_mode";

const SESSION_KEYS: &[&str] = &[KEY_USER_NAME, KEY_LOGGED_IN, KEY_AUTH_TOKEN];
const GAMEPLAY_KEYS: &[&str] = &[
    KEY_REMAINING_SECONDS,
    KEY_LAST_RESET_DATE,
    KEY_SAVED_AT,
    KEY_CLOCK_PENDING,
    KEY_GOLD_COINS,
    KEY_DAILY_EARNED,
    KEY_COINS_PENDING,
];

/// A change made through one store handle, seen by every other handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageEvent {
    pub key: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    origin: u64,
}

/// What a page remembered about its clock and coins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalSnapshot {
    pub remaining_seconds: Option<u64>,
    pub last_reset_date: Option<NaiveDate>,
    pub coins: Option<u64>,
    pub daily_earned: Option<u64>,
    /// The clock was changed locally without a confirmed remote write
    pub clock_pending: bool,
    pub coins_pending: bool,
    pub saved_at: Option<DateTime<Utc>>,
}

impl LocalSnapshot {
    /// Either slice has unsynced changes
    pub fn pending(&self) -> bool {
        self.clock_pending || self.coins_pending
    }
}

struct Shared {
    path: Option<PathBuf>,
    entries: Mutex<BTreeMap<String, String>>,
    changes: broadcast::Sender<StorageEvent>,
    next_origin: AtomicU64,
}

/// Browser-style local key/value space persisted as a JSON file.
///
/// Each handle stands for one tab: cloning keeps the tab, [`LocalStore::open_tab`]
/// opens another one over the same entries.
#[derive(Clone)]
pub struct LocalStore {
    shared: Arc<Shared>,
    origin: u64,
}

impl LocalStore {
    /// Open (or create) the store inside the given data directory
    pub fn open(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)
            .map_err(|e| GateError::Storage(format!("Failed to create data dir: {}", e)))?;

        let path = data_dir.join(STORE_FILENAME);
        let entries = if path.exists() {
            Self::load_from_disk(&path)?
        } else {
            BTreeMap::new()
        };

        Ok(Self::from_parts(Some(path), entries))
    }

    /// A store that never touches the disk
    pub fn in_memory() -> Self {
        Self::from_parts(None, BTreeMap::new())
    }

    fn from_parts(path: Option<PathBuf>, entries: BTreeMap<String, String>) -> Self {
        let (changes, _) = broadcast::channel(64);
        Self {
            shared: Arc::new(Shared {
                path,
                entries: Mutex::new(entries),
                changes,
                next_origin: AtomicU64::new(1),
            }),
            origin: 0,
        }
    }

    /// Another handle over the same entries, seen as a different tab
    pub fn open_tab(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            origin: self.shared.next_origin.fetch_add(1, Ordering::Relaxed),
        }
    }

    fn load_from_disk(path: &Path) -> Result<BTreeMap<String, String>> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| GateError::Storage(format!("Failed to read store file: {}", e)))?;

        serde_json::from_str(&content)
            .map_err(|e| GateError::Storage(format!("Failed to parse store file: {}", e)))
    }

    fn save_to_disk(path: &Path, entries: &BTreeMap<String, String>) -> Result<()> {
        let content = serde_json::to_string_pretty(entries)
            .map_err(|e| GateError::Storage(format!("Failed to serialize store: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| GateError::Storage(format!("Failed to write store file: {}", e)))
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.shared
            .entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    pub fn set(&self, key: &str, value: impl Into<String>) -> Result<()> {
        self.update(|entries| vec![(key.to_string(), entries.insert(key.to_string(), value.into()))])
    }

    pub fn remove(&self, key: &str) -> Result<()> {
        self.update(|entries| vec![(key.to_string(), entries.remove(key))])
    }

    fn remove_all(&self, keys: &[&str]) -> Result<()> {
        self.update(|entries| {
            keys.iter()
                .map(|key| (key.to_string(), entries.remove(*key)))
                .collect()
        })
    }

    /// Apply a mutation, persist, then notify the other tabs of every key whose value changed.
    ///
    /// The mutation runs on a copy that replaces the entries only once the file is written.
    fn update<F>(&self, mutate: F) -> Result<()>
    where
        F: FnOnce(&mut BTreeMap<String, String>) -> Vec<(String, Option<String>)>,
    {
        let events = {
            let mut entries = self.shared.entries.lock().unwrap_or_else(|e| e.into_inner());
            let mut next = entries.clone();
            let touched = mutate(&mut next);

            if let Some(path) = &self.shared.path {
                Self::save_to_disk(path, &next)?;
            }

            let events = touched
                .into_iter()
                .filter_map(|(key, old_value)| {
                    let new_value = next.get(&key).cloned();
                    (old_value != new_value).then(|| StorageEvent {
                        key,
                        old_value,
                        new_value,
                        origin: self.origin,
                    })
                })
                .collect::<Vec<_>>();
            *entries = next;
            events
        };

        for event in events {
            // No receivers is fine.
            let _ = self.shared.changes.send(event);
        }
        Ok(())
    }

    /// Watch changes made by other tabs
    pub fn watch(&self) -> StorageWatcher {
        StorageWatcher {
            rx: self.shared.changes.subscribe(),
            origin: self.origin,
        }
    }

    // ---- typed accessors ------------------------------------------------

    fn get_u64(&self, key: &str) -> Option<u64> {
        self.get(key).and_then(|raw| raw.trim().parse::<u64>().ok())
    }

    fn get_flag(&self, key: &str) -> bool {
        self.get(key).as_deref() == Some("true")
    }

    pub fn remaining_seconds(&self) -> Option<u64> {
        self.get_u64(KEY_REMAINING_SECONDS)
    }

    pub fn last_reset_date(&self) -> Option<NaiveDate> {
        self.get(KEY_LAST_RESET_DATE).and_then(|raw| parse_date(&raw))
    }

    pub fn local_snapshot(&self) -> LocalSnapshot {
        LocalSnapshot {
            remaining_seconds: self.remaining_seconds(),
            last_reset_date: self.last_reset_date(),
            coins: self.get_u64(KEY_GOLD_COINS),
            daily_earned: self.get_u64(KEY_DAILY_EARNED),
            clock_pending: self.get_flag(KEY_CLOCK_PENDING),
            coins_pending: self.get_flag(KEY_COINS_PENDING),
            saved_at: self
                .get(KEY_SAVED_AT)
                .and_then(|raw| DateTime::parse_from_rfc3339(&raw).ok())
                .map(|dt| dt.with_timezone(&Utc)),
        }
    }

    pub fn write_clock(&self, clock: &ClockState, saved_at: DateTime<Utc>) -> Result<()> {
        self.update(|entries| {
            [
                (KEY_REMAINING_SECONDS, clock.remaining_seconds.to_string()),
                (KEY_LAST_RESET_DATE, format_date(clock.last_reset_date)),
                (KEY_SAVED_AT, saved_at.to_rfc3339()),
            ]
            .into_iter()
            .map(|(key, value)| (key.to_string(), entries.insert(key.to_string(), value)))
            .collect()
        })
    }

    pub fn write_currency(&self, currency: &CurrencyState) -> Result<()> {
        self.update(|entries| {
            [
                (KEY_GOLD_COINS, currency.coins.to_string()),
                (KEY_DAILY_EARNED, currency.daily_earned.to_string()),
            ]
            .into_iter()
            .map(|(key, value)| (key.to_string(), entries.insert(key.to_string(), value)))
            .collect()
        })
    }

    pub fn set_pending(&self, clock_pending: bool, coins_pending: bool) -> Result<()> {
        self.update(|entries| {
            [(KEY_CLOCK_PENDING, clock_pending), (KEY_COINS_PENDING, coins_pending)]
                .into_iter()
                .map(|(key, pending)| {
                    let old = if pending {
                        entries.insert(key.to_string(), "true".to_string())
                    } else {
                        entries.remove(key)
                    };
                    (key.to_string(), old)
                })
                .collect()
        })
    }

    /// Remember who is signed in
    pub fn set_session(&self, username: &str, token: Option<&str>) -> Result<()> {
        self.set(KEY_USER_NAME, username)?;
        self.set(KEY_LOGGED_IN, "true")?;
        if let Some(token) = token {
            self.set(KEY_AUTH_TOKEN, token)?;
        }
        Ok(())
    }

    pub fn username(&self) -> Option<String> {
        self.get(KEY_USER_NAME)
    }

    pub fn session_token(&self) -> Option<String> {
        self.get(KEY_AUTH_TOKEN)
    }

    /// Logged-in flag, or a remembered username
    pub fn is_logged_in(&self) -> bool {
        self.get_flag(KEY_LOGGED_IN) || self.username().is_some()
    }

    /// Forget the session and every gameplay counter (logout)
    pub fn clear_session(&self) -> Result<()> {
        let keys: Vec<&str> = SESSION_KEYS.iter().chain(GAMEPLAY_KEYS).copied().collect();
        self.remove_all(&keys)
    }
}

/// Receives [`StorageEvent`]s produced by other tabs.
pub struct StorageWatcher {
    rx: broadcast::Receiver<StorageEvent>,
    origin: u64,
}

impl StorageWatcher {
    /// Next change from another tab. `None` once the store is gone.
    pub async fn changed(&mut self) -> Option<StorageEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) if event.origin == self.origin => continue,
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    log::warn!("[Storage] Watcher lagged, skipped {} events", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceMode {
    Mobile,
    Desktop,
}

impl DeviceMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceMode::Mobile => "mobile",
            DeviceMode::Desktop => "desktop",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "mobile" => Some(DeviceMode::Mobile),
            "desktop" => Some(DeviceMode::Desktop),
            _ => None,
        }
    }
}

impl LocalStore {
    pub fn device_mode(&self) -> Option<DeviceMode> {
        self.get(KEY_DEVICE_MODE).and_then(|raw| DeviceMode::parse(&raw))
    }

    pub fn set_device_mode(&self, mode: DeviceMode) -> Result<()> {
        self.set(KEY_DEVICE_MODE, mode.as_str())
    }
}
