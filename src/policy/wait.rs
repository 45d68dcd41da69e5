use std::fmt::{Display, Formatter};
use std::time::Duration;

/// The unit a wait time is rounded to when shown to a person.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum WaitUnit {
    Seconds,
    Minutes,
}

impl WaitUnit {
    fn millis(self) -> u128 {
        match self {
            WaitUnit::Seconds => 1_000,
            WaitUnit::Minutes => 60_000,
        }
    }

    fn name(self, plural: bool) -> &'static str {
        match (self, plural) {
            (WaitUnit::Seconds, false) => "second",
            (WaitUnit::Seconds, true) => "seconds",
            (WaitUnit::Minutes, false) => "minute",
            (WaitUnit::Minutes, true) => "minutes",
        }
    }
}

/// How long a throttled caller has to wait before its window resets.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct WaitTime {
    remaining: Duration,
    unit: WaitUnit,
}

impl WaitTime {
    pub fn new(remaining: Duration, unit: WaitUnit) -> Self {
        Self { remaining, unit }
    }

    /// The exact time left in the window.
    pub fn remaining(&self) -> Duration {
        self.remaining
    }

    pub fn unit(&self) -> WaitUnit {
        self.unit
    }

    /// Wait time in whole display units, rounded upwards so that the window is guaranteed to
    /// have reset after waiting that long.
    pub fn rounded(&self) -> u64 {
        ceil_div(self.remaining.as_millis(), self.unit.millis())
    }

    /// Seconds until the window resets (rounded upwards), suitable for a `Retry-After` header.
    pub fn seconds_until_reset(&self) -> u64 {
        ceil_div(self.remaining.as_millis(), WaitUnit::Seconds.millis())
    }
}

impl Display for WaitTime {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let n = self.rounded();
        write!(f, "{} {}", n, self.unit.name(n != 1))
    }
}

fn ceil_div(value: u128, unit: u128) -> u64 {
    let rounded = (value + unit - 1) / unit;
    u64::try_from(rounded).unwrap_or(u64::MAX)
}
