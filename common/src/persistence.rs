use tracing::{info, warn};

use crate::{
    config::PersistedSettings,
    error::DimmerError,
    ports::KeyValueStore,
    types::Channel,
};

pub const KEY_CHANNEL: &str = "curr_channel";
pub const KEY_BRIGHTNESS: &str = "brightness";
pub const KEY_FADE_TIME: &str = "fade_time";

/// Settings as found in storage; a missing or unusable key is `None`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoredSettings {
    pub channel: Option<Channel>,
    pub brightness: Option<u8>,
    pub fade_duration_ms: Option<u32>,
}

impl StoredSettings {
    /// Overlays the stored values on `base`, clamping them into range.
    pub fn apply_to(self, base: PersistedSettings) -> PersistedSettings {
        let mut settings = PersistedSettings {
            channel: self.channel.unwrap_or(base.channel),
            brightness: self.brightness.unwrap_or(base.brightness),
            fade_duration_ms: self.fade_duration_ms.unwrap_or(base.fade_duration_ms),
        };
        settings.sanitize();
        settings
    }
}

pub fn load(store: &dyn KeyValueStore) -> Result<StoredSettings, DimmerError> {
    let channel = match store.get_i32(KEY_CHANNEL)? {
        Some(raw) => {
            let channel = Channel::from_index(raw);
            if channel.is_none() {
                warn!("ignoring stored channel index {raw}");
            }
            channel
        }
        None => None,
    };

    let brightness = store
        .get_i32(KEY_BRIGHTNESS)?
        .map(|raw| raw.clamp(0, 100) as u8);
    let fade_duration_ms = store
        .get_i32(KEY_FADE_TIME)?
        .map(|raw| raw.max(0) as u32);

    Ok(StoredSettings {
        channel,
        brightness,
        fade_duration_ms,
    })
}

/// Loads settings on top of `base`, falling back to `base` when storage
/// cannot be read.
pub fn load_or(store: &dyn KeyValueStore, base: PersistedSettings) -> PersistedSettings {
    match load(store) {
        Ok(stored) => stored.apply_to(base),
        Err(err) => {
            warn!("keeping in-memory settings: {err}");
            base
        }
    }
}

/// Writes each key whose stored value is missing or differs. Returns the
/// number of keys written.
pub fn save(
    store: &mut dyn KeyValueStore,
    settings: &PersistedSettings,
) -> Result<usize, DimmerError> {
    let wanted = [
        (KEY_CHANNEL, settings.channel.index() as i32),
        (KEY_BRIGHTNESS, i32::from(settings.brightness)),
        (KEY_FADE_TIME, settings.fade_duration_ms as i32),
    ];

    let mut written = 0;
    for (key, value) in wanted {
        if store.get_i32(key)? != Some(value) {
            store.set_i32(key, value)?;
            written += 1;
        }
    }

    if written > 0 {
        info!("persisted {written} setting(s)");
    }
    Ok(written)
}
