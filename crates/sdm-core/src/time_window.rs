//! Daily activation window for a queue.
//!
//! A window is a pair of wall-clock times of day. The active period is the
//! next occurrence of `[start, end]`; an end before the start rolls over to
//! the following day (`22:00:00-02:00:00` spans midnight).

use chrono::{Duration as TimeDelta, Local, NaiveDateTime, NaiveTime};
use std::fmt;
use std::time::Duration;

/// Error for a malformed window string.
#[derive(Debug)]
pub struct InvalidTimeWindow(pub String);

impl fmt::Display for InvalidTimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid time window {:?} (expected HH:MM:SS-HH:MM:SS or \"always\")",
            self.0
        )
    }
}

impl std::error::Error for InvalidTimeWindow {}

/// An intraday `[start, end]` activation window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeInterval {
    start: NaiveTime,
    end: NaiveTime,
}

impl TimeInterval {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        Self { start, end }
    }

    /// Parse a user-entered window.
    ///
    /// `"always"` (any casing, surrounding whitespace allowed) means no
    /// window and yields `None`. Otherwise the input must be
    /// `HH:MM:SS-HH:MM:SS` with 24-hour components.
    pub fn parse(input: &str) -> Result<Option<Self>, InvalidTimeWindow> {
        let trimmed = input.trim();
        if trimmed.eq_ignore_ascii_case("always") {
            return Ok(None);
        }
        let (start_str, end_str) = trimmed
            .split_once('-')
            .ok_or_else(|| InvalidTimeWindow(input.to_string()))?;
        let start = NaiveTime::parse_from_str(start_str.trim(), "%H:%M:%S")
            .map_err(|_| InvalidTimeWindow(input.to_string()))?;
        let end = NaiveTime::parse_from_str(end_str.trim(), "%H:%M:%S")
            .map_err(|_| InvalidTimeWindow(input.to_string()))?;
        Ok(Some(Self::new(start, end)))
    }

    /// The window occurrence that is current or next as of `now`.
    ///
    /// If the end-of-day time is earlier than the start, the end rolls to the
    /// next day; if `now` is already past today's window, both bounds roll.
    pub fn occurrence_after(&self, now: NaiveDateTime) -> (NaiveDateTime, NaiveDateTime) {
        let date = now.date();
        let mut start = date.and_time(self.start);
        let mut end = date.and_time(self.end);
        if end < start {
            end += TimeDelta::days(1);
        }
        if now > end {
            start += TimeDelta::days(1);
            end += TimeDelta::days(1);
        }
        (start, end)
    }

    /// True when `now` falls inside the current occurrence.
    pub fn contains(&self, now: NaiveDateTime) -> bool {
        let (start, end) = self.occurrence_after(now);
        now >= start && now <= end
    }

    /// Sleep until the window opens. Returns immediately when already active.
    pub async fn wait_until_active(&self) {
        let now = Local::now().naive_local();
        let (start, _end) = self.occurrence_after(now);
        if now < start {
            let wait = (start - now).to_std().unwrap_or_default();
            tracing::info!(wait_secs = wait.as_secs(), "waiting for activation window");
            tokio::time::sleep(wait).await;
        }
    }

    /// Time remaining until the current occurrence closes.
    pub fn time_until_close(&self) -> Duration {
        let now = Local::now().naive_local();
        let (_start, end) = self.occurrence_after(now);
        (end - now).to_std().unwrap_or_default()
    }
}

impl fmt::Display for TimeInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}",
            self.start.format("%H:%M:%S"),
            self.end.format("%H:%M:%S")
        )
    }
}
