//! Wall clock and server time zone handling
//!
//! The `today` window and series buckets are aligned to the server zone,
//! which is a fixed UTC offset so that bucket truncation can be done with
//! integer arithmetic inside the database.

use chrono::{DateTime, FixedOffset, Offset, Utc};
use std::sync::RwLock;

use crate::analytics::models::Windows;

const SECS_PER_DAY: i64 = 86_400;

/// Source of "now" for ingest stamping and window cutoffs
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Clock backed by the system wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually driven clock for tests and replay tooling
#[derive(Debug)]
pub struct ManualClock {
    now: RwLock<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: RwLock::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        if let Ok(mut guard) = self.now.write() {
            *guard = now;
        }
    }

    pub fn advance(&self, by: chrono::Duration) {
        if let Ok(mut guard) = self.now.write() {
            *guard += by;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        match self.now.read() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

/// The configured server zone
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerZone {
    offset: FixedOffset,
}

impl Default for ServerZone {
    fn default() -> Self {
        Self::utc()
    }
}

impl ServerZone {
    pub fn utc() -> Self {
        Self {
            offset: Utc.fix(),
        }
    }

    pub fn from_offset(offset: FixedOffset) -> Self {
        Self { offset }
    }

    /// Parse `UTC`, `Z`, or a fixed offset such as `+08:00`, `-0530`, `+02`
    pub fn parse(value: &str) -> Result<Self, String> {
        let value = value.trim();
        if value.is_empty() || value.eq_ignore_ascii_case("utc") || value == "Z" {
            return Ok(Self::utc());
        }

        let (sign, rest) = match value.as_bytes()[0] {
            b'+' => (1, &value[1..]),
            b'-' => (-1, &value[1..]),
            _ => return Err(format!("invalid server timezone '{value}', expected UTC or ±HH:MM")),
        };

        if rest.is_empty() || !rest.bytes().all(|b| b.is_ascii_digit() || b == b':') {
            return Err(format!("invalid server timezone '{value}', expected UTC or ±HH:MM"));
        }

        let digits: String = rest.chars().filter(|c| *c != ':').collect();
        let (hours, minutes) = match digits.len() {
            2 => (digits.as_str(), "00"),
            4 => digits.split_at(2),
            _ => return Err(format!("invalid server timezone '{value}', expected UTC or ±HH:MM")),
        };

        let hours: i32 = hours
            .parse()
            .map_err(|_| format!("invalid hours in server timezone '{value}'"))?;
        let minutes: i32 = minutes
            .parse()
            .map_err(|_| format!("invalid minutes in server timezone '{value}'"))?;
        if minutes >= 60 {
            return Err(format!("invalid minutes in server timezone '{value}'"));
        }

        FixedOffset::east_opt(sign * (hours * 3_600 + minutes * 60))
            .map(Self::from_offset)
            .ok_or_else(|| format!("server timezone '{value}' is out of range"))
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    pub fn offset_secs(&self) -> i64 {
        i64::from(self.offset.local_minus_utc())
    }

    /// Start (00:00:00 local) of the server-local day containing `now`, as Unix seconds
    pub fn day_start(&self, ts: i64) -> i64 {
        let local = ts + self.offset_secs();
        local - local.rem_euclid(SECS_PER_DAY) - self.offset_secs()
    }

    /// Cutoffs for today (local midnight), rolling 7 days and rolling 30 days
    pub fn windows(&self, now: DateTime<Utc>) -> Windows {
        let now = now.timestamp();
        Windows {
            today_start: self.day_start(now),
            week_start: now - 7 * SECS_PER_DAY,
            month_start: now - 30 * SECS_PER_DAY,
        }
    }

    /// Render a Unix timestamp in the server zone
    pub fn localize(&self, ts: i64) -> Option<DateTime<FixedOffset>> {
        DateTime::from_timestamp(ts, 0).map(|dt| dt.with_timezone(&self.offset))
    }
}
