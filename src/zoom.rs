use crate::error::Result;
use crate::store::{LocalStore, KEY_ZOOM_LEVEL};

pub const MIN_ZOOM: f64 = 0.5;
pub const MAX_ZOOM: f64 = 2.0;
pub const ZOOM_STEP: f64 = 0.1;
const DEFAULT_ZOOM: f64 = 1.0;

/// Page zoom, persisted on every change.
pub struct ZoomControl {
    store: LocalStore,
    level: f64,
}

impl ZoomControl {
    /// Restore the saved level. Missing or malformed values mean 100%.
    pub fn load(store: LocalStore) -> Self {
        let level = store
            .get(KEY_ZOOM_LEVEL)
            .and_then(|raw| raw.trim().parse::<f64>().ok())
            .filter(|v| v.is_finite())
            .map(|v| round_tenth(v.clamp(MIN_ZOOM, MAX_ZOOM)))
            .unwrap_or(DEFAULT_ZOOM);

        log::info!("Zoom initialized at {}", level);
        Self { store, level }
    }

    pub fn level(&self) -> f64 {
        self.level
    }

    pub fn zoom_in(&mut self) -> Result<f64> {
        if self.level < MAX_ZOOM {
            self.set(self.level + ZOOM_STEP)?;
        }
        Ok(self.level)
    }

    pub fn zoom_out(&mut self) -> Result<f64> {
        if self.level > MIN_ZOOM {
            self.set(self.level - ZOOM_STEP)?;
        }
        Ok(self.level)
    }

    fn set(&mut self, level: f64) -> Result<()> {
        self.level = round_tenth(level.clamp(MIN_ZOOM, MAX_ZOOM));
        self.store.set(KEY_ZOOM_LEVEL, self.level.to_string())
    }
}

// 0.1 steps drift in binary floating point.
fn round_tenth(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}
