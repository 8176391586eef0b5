//! Time-of-day gating for recordings.

use anyhow::{anyhow, Result};
use chrono::NaiveTime;

use crate::clock::{Clock, SystemClock};

/// Daily interval during which recordings may start.
///
/// Start and end are inclusive. Equal start and end means "no restriction".
/// An end earlier than the start describes a window that crosses midnight,
/// e.g. 20:00-06:00 for nocturnal animals.
pub struct RecordingWindow {
    start: NaiveTime,
    end: NaiveTime,
    clock: Box<dyn Clock>,
}

impl RecordingWindow {
    pub fn new(start: NaiveTime, end: NaiveTime, clock: Box<dyn Clock>) -> Self {
        Self { start, end, clock }
    }

    /// A window that is always open.
    pub fn always() -> Self {
        Self::new(NaiveTime::MIN, NaiveTime::MIN, Box::new(SystemClock))
    }

    /// Build from the "HH:MM" / "HH:MM:SS" strings used in configuration.
    /// Two empty strings mean no restriction.
    pub fn from_strings(start: &str, end: &str, clock: Box<dyn Clock>) -> Result<Self> {
        let (start, end) = parse_window(start, end)?;
        Ok(Self::new(start, end, clock))
    }

    pub fn start(&self) -> NaiveTime {
        self.start
    }

    pub fn end(&self) -> NaiveTime {
        self.end
    }

    pub fn is_unrestricted(&self) -> bool {
        self.start == self.end
    }

    pub fn crosses_midnight(&self) -> bool {
        self.end < self.start
    }

    /// Is the window open according to the injected clock?
    pub fn active(&self) -> bool {
        self.active_at(self.clock.time_of_day())
    }

    pub fn active_at(&self, now: NaiveTime) -> bool {
        if self.is_unrestricted() {
            return true;
        }
        if self.crosses_midnight() {
            now >= self.start || now <= self.end
        } else {
            self.start <= now && now <= self.end
        }
    }
}

/// Parse a configured start/end pair. Both empty means unrestricted.
pub fn parse_window(start: &str, end: &str) -> Result<(NaiveTime, NaiveTime)> {
    match (start.trim(), end.trim()) {
        ("", "") => Ok((NaiveTime::MIN, NaiveTime::MIN)),
        ("", _) | (_, "") => Err(anyhow!(
            "recording window needs both a start and an end time"
        )),
        (start, end) => Ok((parse_time_of_day(start)?, parse_time_of_day(end)?)),
    }
}

pub fn parse_time_of_day(value: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(value, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M"))
        .map_err(|_| anyhow!("invalid time of day '{}', expected HH:MM or HH:MM:SS", value))
}
