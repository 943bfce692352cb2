use chrono::{DateTime, Datelike, Utc};

/// Seconds the fixture has been lit since the last daily reset.
#[derive(Debug, Clone)]
pub struct OnTimeCounter {
    seconds: u32,
    minutes: u32,
    last_sample: Option<DateTime<Utc>>,
    min_plausible_year: i32,
}

impl OnTimeCounter {
    pub fn new(min_plausible_year: i32) -> Self {
        Self {
            seconds: 0,
            minutes: 0,
            last_sample: None,
            min_plausible_year,
        }
    }

    pub fn seconds(&self) -> u32 {
        self.seconds
    }

    pub fn minutes(&self) -> u32 {
        self.minutes
    }

    pub fn is_plausible(&self, now: DateTime<Utc>) -> bool {
        now.year() >= self.min_plausible_year
    }

    /// Accumulates time since the previous sample while `is_on`. Returns `true`
    /// when the minute value changed.
    pub fn sample(&mut self, now: DateTime<Utc>, is_on: bool) -> bool {
        if !self.is_plausible(now) {
            return false;
        }

        let previous_minutes = self.minutes;
        if is_on {
            if let Some(last) = self.last_sample {
                let elapsed = (now - last).num_seconds();
                if elapsed > 0 {
                    let elapsed = u32::try_from(elapsed).unwrap_or(u32::MAX);
                    self.seconds = self.seconds.saturating_add(elapsed);
                    self.minutes = self.seconds / 60;
                }
            }
        }
        self.last_sample = Some(now);

        self.minutes != previous_minutes
    }

    /// Zeroes both counters. Always reports a change.
    pub fn reset(&mut self) -> bool {
        self.seconds = 0;
        self.minutes = 0;
        true
    }
}
