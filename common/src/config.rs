use serde::{Deserialize, Serialize};

use crate::types::Channel;

pub const BRIGHTNESS_MIN: u8 = 0;
pub const BRIGHTNESS_MAX: u8 = 100;
pub const FADE_TIME_MIN_MS: u32 = 100;
pub const FADE_TIME_MAX_MS: u32 = 10_000;
pub const TIMER_MIN_MINUTES: u32 = 1;
pub const TIMER_MAX_MINUTES: u32 = 600;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DimmerConfig {
    pub settle_delay_ms: u32,
    pub fade_completion_margin_ms: u32,
    pub duty_resolution_bits: u8,
    pub periodic_interval_ms: u64,
    pub min_plausible_year: i32,
}

impl Default for DimmerConfig {
    fn default() -> Self {
        Self {
            settle_delay_ms: 20,
            fade_completion_margin_ms: 50,
            duty_resolution_bits: 13,
            periodic_interval_ms: 5_000,
            min_plausible_year: 2019,
        }
    }
}

impl DimmerConfig {
    pub fn sanitize(&mut self) {
        self.settle_delay_ms = self.settle_delay_ms.clamp(1, 500);
        self.fade_completion_margin_ms = self.fade_completion_margin_ms.clamp(1, 5_000);
        self.duty_resolution_bits = self.duty_resolution_bits.clamp(1, 20);
        self.periodic_interval_ms = self.periodic_interval_ms.clamp(500, 60_000);
    }

    pub fn max_duty(&self) -> u32 {
        (1_u32 << self.duty_resolution_bits) - 1
    }
}

/// Durable mirror of the user-chosen settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedSettings {
    pub channel: Channel,
    pub brightness: u8,
    pub fade_duration_ms: u32,
}

impl Default for PersistedSettings {
    fn default() -> Self {
        Self {
            channel: Channel::AB,
            brightness: 20,
            fade_duration_ms: 2_000,
        }
    }
}

impl PersistedSettings {
    pub fn sanitize(&mut self) {
        self.brightness = self.brightness.clamp(BRIGHTNESS_MIN, BRIGHTNESS_MAX);
        self.fade_duration_ms = self.fade_duration_ms.clamp(FADE_TIME_MIN_MS, FADE_TIME_MAX_MS);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PwmHardwareConfig {
    pub channel_a_gpio: i32,
    pub channel_b_gpio: i32,
    pub frequency_hz: u32,
}

impl Default for PwmHardwareConfig {
    fn default() -> Self {
        Self {
            channel_a_gpio: 18,
            channel_b_gpio: 19,
            frequency_hz: 1_000,
        }
    }
}

impl PwmHardwareConfig {
    pub fn sanitize(&mut self) {
        let defaults = Self::default();
        if self.channel_a_gpio < 0 {
            self.channel_a_gpio = defaults.channel_a_gpio;
        }
        if self.channel_b_gpio < 0 || self.channel_b_gpio == self.channel_a_gpio {
            self.channel_b_gpio = defaults.channel_b_gpio;
        }

        self.frequency_hz = self.frequency_hz.clamp(100, 40_000);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub dimmer: DimmerConfig,
    pub timezone: String,
    #[serde(default)]
    pub pwm: PwmHardwareConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            dimmer: DimmerConfig::default(),
            timezone: "Europe/Warsaw".to_string(),
            pwm: PwmHardwareConfig::default(),
        }
    }
}

impl RuntimeConfig {
    pub fn sanitize(&mut self) {
        self.dimmer.sanitize();
        self.pwm.sanitize();
    }
}
