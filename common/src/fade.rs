use std::time::Duration;

use embedded_hal::delay::DelayNs;
use tracing::{debug, warn};

use crate::{
    error::DimmerError,
    ports::{DeferredEvent, DeferredScheduler, FadeDriver},
    types::PwmChannel,
};

/// One step of a hardware plan produced by the channel state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FadeCommand {
    Fade {
        channel: PwmChannel,
        percent: u8,
        duration_ms: u32,
    },
    Settle(u32),
}

/// Linear percent to duty mapping; 0% is fully off.
pub fn duty_for_percent(percent: u8, max_duty: u32) -> u32 {
    if percent == 0 {
        return 0;
    }
    u32::from(percent.min(100)) * max_duty / 100
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FadePhase {
    Idle,
    InFlight,
}

/// Borrowed hardware the coordinator drives while the caller holds the lock.
pub struct FadeContext<'a> {
    pub driver: &'a mut dyn FadeDriver,
    pub delay: &'a mut dyn DelayNs,
    pub scheduler: &'a dyn DeferredScheduler,
}

#[derive(Debug, Clone)]
pub struct FadeCoordinator {
    phase: FadePhase,
    generation: u64,
    max_duty: u32,
    margin_ms: u32,
}

impl FadeCoordinator {
    pub fn new(max_duty: u32, margin_ms: u32) -> Self {
        Self {
            phase: FadePhase::Idle,
            generation: 0,
            max_duty,
            margin_ms,
        }
    }

    pub fn is_in_flight(&self) -> bool {
        self.phase == FadePhase::InFlight
    }

    pub fn ensure_idle(&self) -> Result<(), DimmerError> {
        if self.is_in_flight() {
            Err(DimmerError::Busy)
        } else {
            Ok(())
        }
    }

    /// Runs a whole plan as one fade: busy is checked once up front and the
    /// completion signal is armed once after the last command.
    pub fn start_fade(
        &mut self,
        ctx: &mut FadeContext<'_>,
        plan: &[FadeCommand],
    ) -> Result<(), DimmerError> {
        self.ensure_idle()?;

        let mut longest_ms: Option<u32> = None;
        for command in plan {
            match *command {
                FadeCommand::Fade {
                    channel,
                    percent,
                    duration_ms,
                } => {
                    let duty = duty_for_percent(percent, self.max_duty);
                    debug!(
                        "fade channel {} to {percent}% (duty {duty}) over {duration_ms} ms",
                        channel.as_str()
                    );
                    ctx.driver.set_channel_duty(channel, duty, duration_ms);
                    longest_ms = Some(longest_ms.unwrap_or(0).max(duration_ms));
                }
                FadeCommand::Settle(ms) => ctx.delay.delay_ms(ms),
            }
        }

        let Some(duration_ms) = longest_ms else {
            return Ok(());
        };

        self.generation = self.generation.wrapping_add(1);
        self.phase = FadePhase::InFlight;

        let delay = Duration::from_millis(u64::from(duration_ms) + u64::from(self.margin_ms));
        let event = DeferredEvent::FadeComplete {
            generation: self.generation,
        };
        if let Err(err) = ctx.scheduler.schedule(delay, event) {
            warn!("fade completion could not be scheduled, releasing busy flag: {err}");
            self.phase = FadePhase::Idle;
        }

        Ok(())
    }

    /// Clears the busy flag if `generation` belongs to the fade in flight.
    pub fn complete(&mut self, generation: u64) -> bool {
        if self.is_in_flight() && generation == self.generation {
            self.phase = FadePhase::Idle;
            true
        } else {
            false
        }
    }

    /// Drops the busy flag without waiting for the completion signal.
    pub fn abandon(&mut self) {
        self.phase = FadePhase::Idle;
    }

    pub fn settle_window_ms(&self, fade_duration_ms: u32) -> u64 {
        u64::from(fade_duration_ms) + u64::from(self.margin_ms)
    }
}
