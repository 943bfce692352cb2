pub mod channel;
pub mod config;
pub mod dimmer;
pub mod error;
pub mod fade;
pub mod on_time;
pub mod periodic;
pub mod persistence;
pub mod ports;
pub mod thing;
pub mod timer;
pub mod types;

pub use config::{DimmerConfig, PersistedSettings, PwmHardwareConfig, RuntimeConfig};
pub use dimmer::{Dimmer, Hardware};
pub use error::DimmerError;
pub use periodic::PeriodicTask;
pub use ports::{DeferredEvent, DeferredScheduler, FadeDriver, KeyValueStore, PropertyNotifier};
pub use types::{Channel, DimmerStatus, Notice, Property, PwmChannel, SetOutcome};
