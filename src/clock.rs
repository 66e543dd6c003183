//! Time source abstraction.
//!
//! Cooldowns, breaker timeouts and the daily P&L rollover read time through
//! [`Clock`] so tests can move time without sleeping.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::{Local, NaiveDate};

pub trait Clock: Send + Sync {
    /// Monotonic time for measuring windows.
    fn now(&self) -> Instant;

    /// Local calendar date for day rollovers.
    fn today(&self) -> NaiveDate;

    fn name(&self) -> &str;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn today(&self) -> NaiveDate {
        Local::now().date_naive()
    }

    fn name(&self) -> &str {
        "system"
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    offset: Mutex<Duration>,
    date: Mutex<NaiveDate>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
            date: Mutex::new(Local::now().date_naive()),
        }
    }

    pub fn advance(&self, by: Duration) {
        if let Ok(mut offset) = self.offset.lock() {
            *offset += by;
        }
    }

    pub fn set_date(&self, date: NaiveDate) {
        if let Ok(mut current) = self.date.lock() {
            *current = date;
        }
    }

    /// Move to the next calendar day without touching the monotonic offset.
    pub fn advance_day(&self) {
        if let Ok(mut current) = self.date.lock() {
            if let Some(next) = current.succ_opt() {
                *current = next;
            }
        }
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        let offset = self.offset.lock().map(|o| *o).unwrap_or_default();
        self.origin + offset
    }

    fn today(&self) -> NaiveDate {
        self.date
            .lock()
            .map(|d| *d)
            .unwrap_or_else(|_| Local::now().date_naive())
    }

    fn name(&self) -> &str {
        "manual"
    }
}
