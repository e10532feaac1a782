//! Source of "today" for daily reset decisions.

use std::sync::Mutex;

use chrono::{DateTime, Local, NaiveDate, Utc};

pub trait Calendar: Send + Sync {
    /// The player's current local calendar date
    fn today(&self) -> NaiveDate;

    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock in the machine's local timezone.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemCalendar;

impl Calendar for SystemCalendar {
    fn today(&self) -> NaiveDate {
        Local::now().date_naive()
    }

    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A calendar that only moves when told to.
#[derive(Debug)]
pub struct ManualCalendar {
    today: Mutex<NaiveDate>,
}

impl ManualCalendar {
    pub fn new(today: NaiveDate) -> Self {
        Self {
            today: Mutex::new(today),
        }
    }

    pub fn set_today(&self, date: NaiveDate) {
        *self.today.lock().unwrap_or_else(|e| e.into_inner()) = date;
    }

    /// Move to the next calendar day
    pub fn advance_day(&self) {
        let mut today = self.today.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(next) = today.succ_opt() {
            *today = next;
        }
    }
}

impl Calendar for ManualCalendar {
    fn today(&self) -> NaiveDate {
        *self.today.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

const DATE_FORMAT: &str = "%Y-%m-%d";
// Older site builds wrote `Date.toDateString()` values, e.g. "Sun Oct 18 2026".
const LEGACY_DATE_FORMAT: &str = "%a %b %d %Y";

pub fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

/// Parse a stored reset date. Unknown formats yield `None`.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    NaiveDate::parse_from_str(raw, DATE_FORMAT)
        .or_else(|_| NaiveDate::parse_from_str(raw, LEGACY_DATE_FORMAT))
        .ok()
}
