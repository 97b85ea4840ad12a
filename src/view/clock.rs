//! Ticks, clock positions and clock strings.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, SystemTime};

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::error::QueryError;

/// Seconds since the epoch at which this process started; part of every
/// clock string so clocks from a previous process are never trusted.
static PROCESS_START: Lazy<u64> = Lazy::new(|| {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
});

static NEXT_ROOT_NUMBER: AtomicU32 = AtomicU32::new(1);

/// Allocate a process-unique root number.
pub fn next_root_number() -> u32 {
    NEXT_ROOT_NUMBER.fetch_add(1, Ordering::Relaxed)
}

/// Start time of this process, in seconds since the epoch.
#[must_use]
pub fn process_start_time() -> u64 {
    *PROCESS_START
}

/// The tick and wall-clock time at which something happened in the view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockStamp {
    pub ticks: u32,
    pub timestamp: SystemTime,
}

impl ClockStamp {
    #[must_use]
    pub const fn new(ticks: u32, timestamp: SystemTime) -> Self {
        Self { ticks, timestamp }
    }
}

/// A point in one root's change history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClockPosition {
    pub root_number: u32,
    pub ticks: u32,
}

impl ClockPosition {
    #[must_use]
    pub const fn new(root_number: u32, ticks: u32) -> Self {
        Self { root_number, ticks }
    }

    /// The first position after this one. A `since` at this position
    /// reports only what changed after `self` was observed.
    #[must_use]
    pub const fn next_tick(self) -> Self {
        Self::new(self.root_number, self.ticks + 1)
    }

    /// Render as `c:<start>:<pid>:<root_number>:<ticks>`.
    #[must_use]
    pub fn to_clock_string(&self, start_time: u64, pid: u32) -> String {
        format!(
            "c:{start_time}:{pid}:{}:{}",
            self.root_number, self.ticks
        )
    }
}

/// The "since" argument of a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockSpec {
    /// A clock previously handed out by a view.
    Clock {
        start_time: u64,
        pid: u32,
        position: ClockPosition,
    },
    /// Anything whose last change happened at or after this wall-clock time.
    Timestamp(SystemTime),
}

impl ClockSpec {
    /// A clock position issued by this process.
    #[must_use]
    pub fn from_position(position: ClockPosition) -> Self {
        Self::Clock {
            start_time: process_start_time(),
            pid: std::process::id(),
            position,
        }
    }

    /// Parse either a clock string or a decimal epoch timestamp.
    ///
    /// # Errors
    ///
    /// Returns `QueryError::InvalidClock` if the input is neither.
    pub fn parse(raw: &str) -> std::result::Result<Self, QueryError> {
        let invalid = || QueryError::InvalidClock(raw.to_string());

        if let Some(rest) = raw.strip_prefix("c:") {
            let parts: Vec<&str> = rest.split(':').collect();
            let [start, pid, root_number, ticks] = parts.as_slice() else {
                return Err(invalid());
            };
            return Ok(Self::Clock {
                start_time: start.parse().map_err(|_| invalid())?,
                pid: pid.parse().map_err(|_| invalid())?,
                position: ClockPosition::new(
                    root_number.parse().map_err(|_| invalid())?,
                    ticks.parse().map_err(|_| invalid())?,
                ),
            });
        }

        let secs: u64 = raw.parse().map_err(|_| invalid())?;
        Ok(Self::Timestamp(
            SystemTime::UNIX_EPOCH + Duration::from_secs(secs),
        ))
    }
}
