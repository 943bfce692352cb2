//! Boundaries between the dimmer core and the fixture it runs on.
//!
//! The core owns all state and sequencing; these traits cover what it
//! commands (PWM ramps), what it persists (three scalar settings), how it
//! defers work (fade completion, timer expiry) and how property changes
//! leave the device.

use std::time::Duration;

use crate::{error::DimmerError, types::Property, types::PwmChannel};

/// Starts duty-cycle ramps on the PWM peripheral.
pub trait FadeDriver: Send {
    /// Begins a ramp from the current duty to `duty` over `duration_ms` and
    /// returns immediately. Completion is not reported back; the core bounds
    /// it with its own deferred signal.
    fn set_channel_duty(&mut self, channel: PwmChannel, duty: u32, duration_ms: u32);
}

/// Atomic single-key integer storage (NVS on the device, a file on the host).
pub trait KeyValueStore: Send {
    fn get_i32(&self, key: &str) -> Result<Option<i32>, DimmerError>;
    fn set_i32(&mut self, key: &str, value: i32) -> Result<(), DimmerError>;
}

/// Work the core hands back to itself after a delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeferredEvent {
    FadeComplete { generation: u64 },
    TimerExpired { generation: u64 },
}

/// Delivers a [`DeferredEvent`] to `Dimmer::handle_deferred` after `delay`.
///
/// Implementations must not call back into the dimmer synchronously: the
/// core invokes `schedule` while holding its lock.
pub trait DeferredScheduler: Send + Sync {
    fn schedule(&self, delay: Duration, event: DeferredEvent) -> Result<(), DimmerError>;
}

/// Subscriber fan-out provided by the property framework.
pub trait PropertyNotifier {
    /// Returns `true` once the value reached every subscriber.
    fn notify(&self, property: Property, value: serde_json::Value) -> bool;
}
