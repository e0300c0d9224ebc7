use std::fmt;

use anyhow::{ensure, Result};
use chrono::{DateTime, Duration, TimeZone, Utc};

pub const DEFAULT_STEP_HOURS: i64 = 6;

/// Half-open interval `[start, end)` in UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        TimeWindow { start, end }
    }

    /// The sentinel `start == end` window that follows the last real one.
    pub fn is_exhausted(&self) -> bool {
        self.start >= self.end
    }

    pub fn start_epoch(&self) -> i64 {
        self.start.timestamp()
    }

    pub fn end_epoch(&self) -> i64 {
        self.end.timestamp()
    }

    pub fn contains_epoch(&self, created: i64) -> bool {
        created >= self.start_epoch() && created < self.end_epoch()
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// Infinite sequence of contiguous `step`-wide windows over `[start, end)`.
///
/// The last real window is clamped to `end`; after it every pull yields the
/// degenerate window `(end, end)`. Not rewindable: build a new one to restart.
#[derive(Debug, Clone)]
pub struct WindowIterator {
    cursor: DateTime<Utc>,
    end: DateTime<Utc>,
    step: Duration,
}

impl WindowIterator {
    pub fn new<A: TimeZone, B: TimeZone>(
        start: DateTime<A>,
        end: DateTime<B>,
        step: Duration,
    ) -> Result<Self> {
        ensure!(step > Duration::zero(), "window step must be positive, got {}", step);
        Ok(WindowIterator {
            cursor: start.with_timezone(&Utc),
            end: end.with_timezone(&Utc),
            step,
        })
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }
}

impl Iterator for WindowIterator {
    type Item = TimeWindow;

    fn next(&mut self) -> Option<TimeWindow> {
        if self.cursor >= self.end {
            return Some(TimeWindow::new(self.end, self.end));
        }
        let start = self.cursor;
        let end = start
            .checked_add_signed(self.step)
            .map_or(self.end, |next| next.min(self.end));
        self.cursor = end;
        Some(TimeWindow::new(start, end))
    }
}
