use serde::{Deserialize, Serialize};

use crate::error::DimmerError;

/// Wire labels indexed by [`Channel::index`].
const CHANNEL_LABELS: [&str; 3] = ["A", "B", "A+B"];

/// Channel selection exposed through the `channel` property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Channel {
    A,
    B,
    AB,
}

impl Channel {
    pub const ALL: [Channel; 3] = [Channel::A, Channel::B, Channel::AB];

    pub fn index(self) -> usize {
        match self {
            Self::A => 0,
            Self::B => 1,
            Self::AB => 2,
        }
    }

    pub fn from_index(index: i32) -> Option<Self> {
        match index {
            0 => Some(Self::A),
            1 => Some(Self::B),
            2 => Some(Self::AB),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        CHANNEL_LABELS[self.index()]
    }

    /// Parses a wire label. Websocket clients send the value still wrapped in
    /// quotes, so one pair of surrounding quotes is stripped.
    pub fn parse_label(raw: &str) -> Result<Self, DimmerError> {
        let trimmed = raw.trim();
        let unquoted = trimmed
            .strip_prefix('"')
            .and_then(|rest| rest.strip_suffix('"'))
            .unwrap_or(trimmed);

        if unquoted == "AB" {
            return Ok(Self::AB);
        }

        CHANNEL_LABELS
            .iter()
            .position(|label| *label == unquoted)
            .and_then(|index| Self::from_index(index as i32))
            .ok_or_else(|| DimmerError::InvalidInput(format!("unknown channel `{unquoted}`")))
    }

    /// Physical outputs driven by this selection, in command order.
    pub fn outputs(self) -> &'static [PwmChannel] {
        match self {
            Self::A => &[PwmChannel::A],
            Self::B => &[PwmChannel::B],
            Self::AB => &[PwmChannel::A, PwmChannel::B],
        }
    }

    pub fn drives(self, output: PwmChannel) -> bool {
        self.outputs().contains(&output)
    }
}

/// One physical PWM output of the fixture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PwmChannel {
    A,
    B,
}

impl PwmChannel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::A => "A",
            Self::B => "B",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Property {
    On,
    Channel,
    Brightness,
    FadeTime,
    DailyOnMinutes,
}

impl Property {
    /// Delivery order used for the initial notification round.
    pub const ALL: [Property; 5] = [
        Property::Channel,
        Property::On,
        Property::DailyOnMinutes,
        Property::Brightness,
        Property::FadeTime,
    ];

    pub fn id(self) -> &'static str {
        match self {
            Self::On => "on",
            Self::Channel => "channel",
            Self::Brightness => "brightness",
            Self::FadeTime => "fade-time",
            Self::DailyOnMinutes => "daily-on-minutes",
        }
    }

    pub fn from_id(id: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|property| property.id() == id)
    }
}

/// Result of an accepted property write or action run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOutcome {
    Unchanged,
    /// Subscribers must be informed.
    Changed,
}

impl SetOutcome {
    pub fn from_changed(changed: bool) -> Self {
        if changed {
            Self::Changed
        } else {
            Self::Unchanged
        }
    }

    pub fn is_changed(self) -> bool {
        self == Self::Changed
    }
}

/// Something a deferred callback produced that the caller has to forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notice {
    PropertyChanged(Property),
    TimerCompleted,
}

#[derive(Debug, Clone, Serialize)]
pub struct DimmerStatus {
    pub on: bool,
    pub channel: &'static str,
    pub brightness: u8,
    #[serde(rename = "fadeTime")]
    pub fade_time_ms: u32,
    #[serde(rename = "dailyOnMinutes")]
    pub daily_on_minutes: u32,
    #[serde(rename = "fadeInFlight")]
    pub fade_in_flight: bool,
    #[serde(rename = "timerRunning")]
    pub timer_running: bool,
    #[serde(rename = "timerRemaining")]
    pub timer_remaining_s: Option<u64>,
}
