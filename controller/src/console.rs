use std::{io::Write, sync::Mutex};

use dimmer_common::{
    thing, Dimmer, DimmerError, Notice, Property, PropertyNotifier, SetOutcome,
};
use serde_json::{json, Value};

pub const HELP: &str = "commands: on <true|false>, channel <A|B|A+B>, brightness <0-100>, \
fade-time <100-10000>, timer <minutes|{\"duration\":N}>, status, describe, help";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Set { property: Property, value: String },
    Timer(String),
    Status,
    Describe,
    Help,
}

impl Command {
    /// Parses one console line. Blank lines yield `None`.
    pub fn parse(line: &str) -> Result<Option<Self>, DimmerError> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }

        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (line, ""),
        };

        let command = match word {
            "status" => Self::Status,
            "describe" => Self::Describe,
            "help" => Self::Help,
            "timer" => Self::Timer(required(word, rest)?),
            other => {
                let property = Property::from_id(other)
                    .ok_or_else(|| DimmerError::InvalidInput(format!("unknown command `{other}`")))?;
                if property == Property::DailyOnMinutes {
                    return Err(DimmerError::InvalidInput(format!(
                        "`{other}` is read-only"
                    )));
                }
                Self::Set {
                    property,
                    value: required(word, rest)?,
                }
            }
        };
        Ok(Some(command))
    }
}

fn required(word: &str, rest: &str) -> Result<String, DimmerError> {
    if rest.is_empty() {
        Err(DimmerError::InvalidInput(format!("`{word}` needs a value")))
    } else {
        Ok(rest.to_string())
    }
}

/// Writes one JSON message per line, shaped like the websocket messages of a
/// web thing.
pub struct JsonLineSink<W: Write> {
    out: Mutex<W>,
}

impl<W: Write> JsonLineSink<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    pub fn send(&self, message: &Value) -> bool {
        let mut out = self
            .out
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        writeln!(out, "{message}")
            .and_then(|()| out.flush())
            .is_ok()
    }

    pub fn action_status(&self, action: &str, status: &str) -> bool {
        self.send(&json!({
            "messageType": "actionStatus",
            "data": { action: { "status": status } }
        }))
    }

    pub fn error(&self, err: &DimmerError) -> bool {
        self.send(&json!({
            "messageType": "error",
            "data": {
                "message": err.to_string(),
                "transient": err.is_transient(),
            }
        }))
    }

    #[cfg(test)]
    pub fn into_inner(self) -> W {
        self.out
            .into_inner()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl<W: Write> PropertyNotifier for JsonLineSink<W> {
    fn notify(&self, property: Property, value: Value) -> bool {
        self.send(&json!({
            "messageType": "propertyStatus",
            "data": { property.id(): value }
        }))
    }
}

/// Runs one command against the dimmer and reports the result on `sink`.
pub fn execute<W: Write>(dimmer: &Dimmer, command: Command, sink: &JsonLineSink<W>) {
    match command {
        Command::Set { property, value } => {
            let result = match property {
                Property::On => dimmer.set_on(&value),
                Property::Channel => dimmer.set_channel(&value),
                Property::Brightness => dimmer.set_brightness(&value),
                Property::FadeTime => dimmer.set_fade_time(&value),
                Property::DailyOnMinutes => Err(DimmerError::InvalidInput(
                    "daily-on-minutes is read-only".into(),
                )),
            };
            match result {
                Ok(SetOutcome::Changed) => {
                    sink.notify(property, dimmer.property_value(property));
                }
                Ok(SetOutcome::Unchanged) => {}
                Err(err) => {
                    sink.error(&err);
                }
            }
        }
        Command::Timer(input) => match dimmer.start_timer(&input) {
            Ok(outcome) => {
                sink.action_status("timer", "pending");
                if outcome.is_changed() {
                    sink.notify(Property::On, dimmer.property_value(Property::On));
                }
            }
            Err(err) => {
                sink.error(&err);
            }
        },
        Command::Status => {
            sink.send(&json!({ "messageType": "status", "data": dimmer.status() }));
        }
        Command::Describe => match serde_json::to_value(thing::describe()) {
            Ok(description) => {
                sink.send(&description);
            }
            Err(err) => {
                sink.error(&DimmerError::InvalidInput(err.to_string()));
            }
        },
        Command::Help => {
            sink.send(&json!({ "messageType": "help", "data": HELP }));
        }
    }
}

/// Publishes what a deferred event produced.
pub fn forward_notices<W: Write>(dimmer: &Dimmer, notices: &[Notice], sink: &JsonLineSink<W>) {
    for notice in notices {
        match *notice {
            Notice::PropertyChanged(property) => {
                sink.notify(property, dimmer.property_value(property));
            }
            Notice::TimerCompleted => {
                sink.action_status("timer", "completed");
            }
        }
    }
}
