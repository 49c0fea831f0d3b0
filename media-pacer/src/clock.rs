use std::{
    fmt::{Display, Formatter},
    ops::{Add, Sub},
    sync::{
        OnceLock,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Signed nanosecond timestamp on the session timeline.
///
/// Negative values are valid and mean "before the session epoch", which is
/// how a stage expresses a sample that is already behind live.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct ClockTime(i64);

impl ClockTime {
    pub const ZERO: ClockTime = ClockTime(0);

    pub const fn from_nanos(nanos: i64) -> Self {
        Self(nanos)
    }

    pub const fn from_millis(millis: i64) -> Self {
        Self(millis.saturating_mul(1_000_000))
    }

    pub fn from_duration(duration: Duration) -> Self {
        Self(i64::try_from(duration.as_nanos()).unwrap_or(i64::MAX))
    }

    pub const fn nanos(self) -> i64 {
        self.0
    }

    pub const fn millis(self) -> i64 {
        self.0 / 1_000_000
    }

    pub const fn is_negative(self) -> bool {
        self.0 < 0
    }

    /// Magnitude of the timestamp as an unsigned duration.
    pub const fn abs_duration(self) -> Duration {
        Duration::from_nanos(self.0.unsigned_abs())
    }
}

impl Add<Duration> for ClockTime {
    type Output = ClockTime;

    fn add(self, rhs: Duration) -> ClockTime {
        ClockTime(self.0.saturating_add(ClockTime::from_duration(rhs).0))
    }
}

impl Sub for ClockTime {
    type Output = ClockTime;

    fn sub(self, rhs: ClockTime) -> ClockTime {
        ClockTime(self.0.saturating_sub(rhs.0))
    }
}

impl From<Duration> for ClockTime {
    fn from(duration: Duration) -> Self {
        Self::from_duration(duration)
    }
}

impl Display for ClockTime {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let sign = if self.is_negative() { "-" } else { "" };
        let abs = self.abs_duration();
        write!(f, "{}{}.{:03}s", sign, abs.as_secs(), abs.subsec_millis())
    }
}

/// Playback segment of the processing stage: the window of stage timestamps
/// currently being played and where that window sits on the running-time line.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub start: ClockTime,
    pub stop: Option<ClockTime>,
    pub base: ClockTime,
    pub rate: f64,
}

impl Default for Segment {
    fn default() -> Self {
        Self {
            start: ClockTime::ZERO,
            stop: None,
            base: ClockTime::ZERO,
            rate: 1.0,
        }
    }
}

impl Segment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_start(mut self, start: ClockTime) -> Self {
        self.start = start;
        self
    }

    pub fn with_stop(mut self, stop: ClockTime) -> Self {
        self.stop = Some(stop);
        self
    }

    pub fn with_base(mut self, base: ClockTime) -> Self {
        self.base = base;
        self
    }

    pub fn with_rate(mut self, rate: f64) -> Self {
        self.rate = rate;
        self
    }

    /// Maps a stage timestamp onto running time.
    ///
    /// Timestamps before `start` map to running times before `base`, so the
    /// result is signed. Returns `None` for timestamps past `stop`, for a
    /// non-positive or non-finite rate, and on overflow.
    pub fn to_running_time(&self, pts: ClockTime) -> Option<ClockTime> {
        if !(self.rate.is_finite() && self.rate > 0.0) {
            return None;
        }
        if let Some(stop) = self.stop {
            if pts > stop {
                return None;
            }
        }

        let delta = i128::from(pts.nanos()) - i128::from(self.start.nanos());
        let scaled = if self.rate == 1.0 {
            delta
        } else {
            (delta as f64 / self.rate) as i128
        };
        let running_time = scaled.checked_add(i128::from(self.base.nanos()))?;
        i64::try_from(running_time).ok().map(ClockTime)
    }
}

/// Session-wide time base shared by every output of one session.
///
/// Outputs only read from it. The session starts it and releases it once on
/// close; after release `running_time` returns `None` and every sample that
/// still arrives is dropped.
pub trait ClockReference: Send + Sync {
    /// Current running time, `None` while no base time is established.
    fn running_time(&self) -> Option<ClockTime>;

    /// Running time of a stage timestamp under the given segment.
    fn to_running_time(&self, segment: &Segment, pts: ClockTime) -> Option<ClockTime> {
        segment.to_running_time(pts)
    }

    fn release(&self);
}

/// Monotonic clock whose running time is the time elapsed since `start`.
pub struct SystemClock {
    base: OnceLock<Instant>,
    released: AtomicBool,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            base: OnceLock::new(),
            released: AtomicBool::new(false),
        }
    }

    /// A clock whose base time is now.
    pub fn started() -> Self {
        let clock = Self::new();
        clock.start();
        clock
    }

    /// Establishes the base time. Only the first call has an effect.
    pub fn start(&self) {
        if self.base.set(Instant::now()).is_ok() {
            log::debug!("system clock started");
        }
    }

    pub fn is_started(&self) -> bool {
        self.base.get().is_some()
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ClockReference for SystemClock {
    fn running_time(&self) -> Option<ClockTime> {
        if self.is_released() {
            return None;
        }
        self.base
            .get()
            .map(|base| ClockTime::from_duration(base.elapsed()))
    }

    fn release(&self) {
        if !self.released.swap(true, Ordering::AcqRel) {
            log::debug!("system clock released");
        }
    }
}

#[cfg(test)]
#[path = "clock_test.rs"]
mod clock_test;
