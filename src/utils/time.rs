use std::{
    fmt::Display,
    ops::{Add, AddAssign, Sub},
    thread,
};

use chrono::TimeDelta;

/// Time source of a task.
///
/// Every blocking wait in the flight pipeline (settle delays, charge pulses,
/// periodic scheduling) goes through [`Clock::delay`], so the same code runs
/// against the wall clock in flight and against a [`SimulatedClock`] in
/// replay and tests.
pub trait Clock: Send {
    fn monotonic(&self) -> Instant;

    fn delay(&mut self, duration: TimeDelta);
}

#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Ord, Eq, Hash)]
pub struct Instant {
    delta: TimeDelta,
}

impl Instant {
    pub const ZERO: Instant = Instant {
        delta: TimeDelta::zero(),
    };

    pub fn from_elapsed(delta: TimeDelta) -> Self {
        Instant { delta }
    }

    pub fn elapsed(&self) -> TimeDelta {
        self.delta
    }

    pub fn elapsed_seconds(&self) -> f64 {
        TD(self.delta).seconds()
    }

    pub fn duration_since(&self, other: &Instant) -> TimeDelta {
        self.delta - other.delta
    }
}

impl Default for Instant {
    fn default() -> Self {
        Instant::ZERO
    }
}

impl Add<TimeDelta> for Instant {
    type Output = Instant;

    fn add(self, rhs: TimeDelta) -> Self::Output {
        Instant {
            delta: self.delta + rhs,
        }
    }
}

impl AddAssign<TimeDelta> for Instant {
    fn add_assign(&mut self, rhs: TimeDelta) {
        self.delta += rhs;
    }
}

impl Sub<TimeDelta> for Instant {
    type Output = Instant;

    fn sub(self, rhs: TimeDelta) -> Self::Output {
        Instant {
            delta: self.delta - rhs,
        }
    }
}

/// Monotonic clock backed by the OS, counting from its creation.
///
/// Clones share the same epoch, so samples stamped by different tasks are
/// comparable.
#[derive(Debug, Clone)]
pub struct WallClock {
    epoch: std::time::Instant,
}

impl WallClock {
    pub fn new() -> Self {
        WallClock {
            epoch: std::time::Instant::now(),
        }
    }
}

impl Default for WallClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for WallClock {
    fn monotonic(&self) -> Instant {
        Instant {
            delta: TimeDelta::from_std(self.epoch.elapsed()).unwrap_or(TimeDelta::MAX),
        }
    }

    fn delay(&mut self, duration: TimeDelta) {
        // Negative durations do not convert and are skipped
        if let Ok(d) = duration.to_std() {
            thread::sleep(d);
        }
    }
}

/// Clock that only moves when told to. `delay` returns immediately after
/// advancing the elapsed time.
#[derive(Debug, Clone)]
pub struct SimulatedClock {
    elapsed: TimeDelta,
}

impl SimulatedClock {
    pub fn new(elapsed: TimeDelta) -> SimulatedClock {
        SimulatedClock { elapsed }
    }

    pub fn step(&mut self, delta: TimeDelta) {
        self.elapsed += delta
    }
}

impl Default for SimulatedClock {
    fn default() -> Self {
        Self::new(TimeDelta::zero())
    }
}

impl Clock for SimulatedClock {
    fn monotonic(&self) -> Instant {
        Instant {
            delta: self.elapsed,
        }
    }

    fn delay(&mut self, duration: TimeDelta) {
        if duration > TimeDelta::zero() {
            self.step(duration);
        }
    }
}

pub struct TD(pub TimeDelta);

impl TD {
    pub fn seconds(&self) -> f64 {
        self.0.num_seconds() as f64 + (self.0.subsec_nanos() as f64) / 1000000000.0
    }
}

/// Human readable time since boot, `mm:ss.mmm`.
#[derive(Debug, Clone, Copy)]
pub struct MissionTime(pub Instant);

impl Display for MissionTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ms = self.0.elapsed().num_milliseconds().max(0);

        let minutes = ms / 60_000;
        let seconds = (ms / 1000) % 60;
        let millis = ms % 1000;

        write!(f, "{minutes:02}:{seconds:02}.{millis:03}")
    }
}
