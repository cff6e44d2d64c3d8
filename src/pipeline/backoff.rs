//! Exponential backoff for crawl loops.

use std::time::Duration;

/// Doubling backoff measured in whole units, capped at `max_units`.
#[derive(Debug, Clone)]
pub struct Backoff {
    unit: Duration,
    max_units: u32,
    units: u32,
}

impl Backoff {
    pub fn new(unit: Duration, max_units: u32) -> Self {
        Self {
            unit,
            max_units: max_units.max(1),
            units: 1,
        }
    }

    /// Current backoff in units.
    pub fn units(&self) -> u32 {
        self.units
    }

    /// Delay to sleep now. Doubles the next one, up to the ceiling.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.unit * self.units;
        self.units = self.units.saturating_mul(2).min(self.max_units);
        delay
    }

    pub fn reset(&mut self) {
        self.units = 1;
    }
}
