use std::time::{Duration, Instant};

use serde::Deserialize;

use crate::{
    config::{TIMER_MAX_MINUTES, TIMER_MIN_MINUTES},
    error::DimmerError,
};

#[derive(Debug, Deserialize)]
struct TimerInput {
    duration: f64,
}

/// Parses the `timer` action input into whole minutes.
///
/// Accepts `{"duration": 10}`, the bare member `"duration": 10` and a plain
/// number. Fractions are truncated; the result must lie in 1..=600.
pub fn parse_duration_minutes(raw: &str) -> Result<u32, DimmerError> {
    let trimmed = raw.trim();

    let value = if let Ok(number) = trimmed.parse::<f64>() {
        number
    } else {
        let input = serde_json::from_str::<TimerInput>(trimmed)
            .or_else(|_| serde_json::from_str::<TimerInput>(&format!("{{{trimmed}}}")))
            .map_err(|err| DimmerError::InvalidInput(format!("timer input: {err}")))?;
        input.duration
    };

    if !value.is_finite() {
        return Err(DimmerError::InvalidInput("timer duration is not a number".into()));
    }

    let minutes = value.trunc();
    if minutes < f64::from(TIMER_MIN_MINUTES) || minutes > f64::from(TIMER_MAX_MINUTES) {
        return Err(DimmerError::InvalidInput(format!(
            "timer duration {minutes} outside {TIMER_MIN_MINUTES}..={TIMER_MAX_MINUTES} minutes"
        )));
    }

    Ok(minutes as u32)
}

#[derive(Debug, Clone, Copy)]
struct Armed {
    generation: u64,
    expires_at: Instant,
}

/// The single delayed power-off slot.
#[derive(Debug, Clone, Default)]
pub struct PendingTimer {
    armed: Option<Armed>,
    generation: u64,
}

impl PendingTimer {
    pub fn is_running(&self) -> bool {
        self.armed.is_some()
    }

    /// Time left until the nominal expiry. Zero once it has passed but the
    /// power-off is still being retried behind a fade.
    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        self.armed
            .map(|armed| armed.expires_at.saturating_duration_since(now))
    }

    /// Claims the slot and returns the generation the expiry must carry.
    pub fn arm(&mut self, minutes: u32, now: Instant) -> Result<u64, DimmerError> {
        if self.is_running() {
            return Err(DimmerError::AlreadyRunning);
        }
        self.generation = self.generation.wrapping_add(1);
        self.armed = Some(Armed {
            generation: self.generation,
            expires_at: now + minutes_to_duration(minutes),
        });
        Ok(self.generation)
    }

    /// Releases a slot whose expiry could not be scheduled.
    pub fn disarm(&mut self) {
        self.armed = None;
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.armed
            .map(|armed| armed.generation == generation)
            .unwrap_or(false)
    }

    /// Marks the action completed if `generation` is the running one.
    pub fn complete(&mut self, generation: u64) -> bool {
        if self.is_current(generation) {
            self.armed = None;
            true
        } else {
            false
        }
    }
}

pub fn minutes_to_duration(minutes: u32) -> Duration {
    Duration::from_secs(u64::from(minutes) * 60)
}
