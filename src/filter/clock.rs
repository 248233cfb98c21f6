//! Wall-clock source for time-of-day rules

use chrono::Timelike;
use std::fmt::Debug;

/// Supplies the current hour of the day (0-23).
pub trait Clock: Send + Sync + Debug {
    fn hour(&self) -> u8;
}

/// Reads the hour from the process's local time zone on every call.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn hour(&self) -> u8 {
        chrono::Local::now().hour() as u8
    }
}

/// Always reports the same hour.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub u8);

impl Clock for FixedClock {
    fn hour(&self) -> u8 {
        self.0
    }
}
