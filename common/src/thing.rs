use serde::Serialize;
use serde_json::Value;

use crate::{
    config::{
        BRIGHTNESS_MAX, BRIGHTNESS_MIN, FADE_TIME_MAX_MS, FADE_TIME_MIN_MS, TIMER_MAX_MINUTES,
        TIMER_MIN_MINUTES,
    },
    types::{Channel, Property},
};

/// Upper bound of the daily on-time property: a full day in minutes.
pub const DAILY_ON_MINUTES_MAX: u32 = 1_440;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    Boolean,
    Integer,
    String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PropertyDescriptor {
    pub id: &'static str,
    pub title: &'static str,
    pub description: &'static str,
    #[serde(rename = "@type")]
    pub semantic_type: &'static str,
    #[serde(rename = "type")]
    pub value_type: ValueType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minimum: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maximum: Option<u32>,
    #[serde(rename = "enum", skip_serializing_if = "Option::is_none")]
    pub choices: Option<Vec<&'static str>>,
    #[serde(rename = "readOnly")]
    pub read_only: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActionDescriptor {
    pub id: &'static str,
    pub title: &'static str,
    pub description: &'static str,
    #[serde(rename = "@type")]
    pub semantic_type: &'static str,
    pub input: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct ThingDescription {
    pub id: &'static str,
    pub title: &'static str,
    pub description: &'static str,
    #[serde(rename = "@type")]
    pub semantic_types: Vec<&'static str>,
    pub properties: Vec<PropertyDescriptor>,
    pub actions: Vec<ActionDescriptor>,
}

pub fn property_descriptor(property: Property) -> PropertyDescriptor {
    match property {
        Property::On => PropertyDescriptor {
            id: property.id(),
            title: "ON/OFF",
            description: "on-off state",
            semantic_type: "OnOffProperty",
            value_type: ValueType::Boolean,
            unit: None,
            minimum: None,
            maximum: None,
            choices: None,
            read_only: false,
        },
        Property::Channel => PropertyDescriptor {
            id: property.id(),
            title: "Channel",
            description: "Active output channels",
            semantic_type: "ChannelProperty",
            value_type: ValueType::String,
            unit: None,
            minimum: None,
            maximum: None,
            choices: Some(Channel::ALL.into_iter().map(Channel::label).collect()),
            read_only: false,
        },
        Property::Brightness => PropertyDescriptor {
            id: property.id(),
            title: "Brightness",
            description: "Led brightness",
            semantic_type: "BrightnessProperty",
            value_type: ValueType::Integer,
            unit: Some("percent"),
            minimum: Some(u32::from(BRIGHTNESS_MIN)),
            maximum: Some(u32::from(BRIGHTNESS_MAX)),
            choices: None,
            read_only: false,
        },
        Property::FadeTime => PropertyDescriptor {
            id: property.id(),
            title: "Fade time",
            description: "Fade time in ms",
            semantic_type: "LevelProperty",
            value_type: ValueType::Integer,
            unit: Some("ms"),
            minimum: Some(FADE_TIME_MIN_MS),
            maximum: Some(FADE_TIME_MAX_MS),
            choices: None,
            read_only: false,
        },
        Property::DailyOnMinutes => PropertyDescriptor {
            id: property.id(),
            title: "ON minutes",
            description: "Amount of time the device was on today",
            semantic_type: "LevelProperty",
            value_type: ValueType::Integer,
            unit: Some("min"),
            minimum: Some(0),
            maximum: Some(DAILY_ON_MINUTES_MAX),
            choices: None,
            read_only: true,
        },
    }
}

pub fn timer_action() -> ActionDescriptor {
    ActionDescriptor {
        id: "timer",
        title: "Timer",
        description: "Turn ON device for specified period of time",
        semantic_type: "ToggleAction",
        input: serde_json::json!({
            "type": "object",
            "properties": {
                "duration": {
                    "type": "integer",
                    "minimum": TIMER_MIN_MINUTES,
                    "maximum": TIMER_MAX_MINUTES,
                    "unit": "min"
                }
            }
        }),
    }
}

pub fn describe() -> ThingDescription {
    ThingDescription {
        id: "2 leds",
        title: "Dimmer",
        description: "Dimmable leds, 2 channels",
        semantic_types: vec!["Light"],
        properties: Property::ALL.into_iter().map(property_descriptor).collect(),
        actions: vec![timer_action()],
    }
}
