//! Process-wide audio settings.
//!
//! Master/music/other volumes and the selected output device are shared by
//! every session and backend in the process. They live in one lazily created
//! singleton with an explicit `init`/`reset` lifecycle so tests can restore a
//! known state between cases.
//!
//! The master volume is mirrored into an atomic so the audio callback can
//! read it without taking the lock or cloning the snapshot.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::RwLock;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::config::VolumeConfig;
use crate::error::AudioError;

static SETTINGS: Lazy<RwLock<AudioSettings>> =
    Lazy::new(|| RwLock::new(AudioSettings::default()));

/// `f32` bits of the master volume, starting at 1.0.
static MASTER_VOLUME_BITS: AtomicU32 = AtomicU32::new(0x3f80_0000);

/// Snapshot of the process-wide settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioSettings {
    pub master_volume: f32,
    pub music_volume: f32,
    pub other_volume: f32,
    pub output_device: Option<String>,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            master_volume: 1.0,
            music_volume: 1.0,
            other_volume: 1.0,
            output_device: None,
        }
    }
}

impl From<&VolumeConfig> for AudioSettings {
    fn from(config: &VolumeConfig) -> Self {
        Self {
            master_volume: config.master.clamp(0.0, 1.0),
            music_volume: config.music.clamp(0.0, 1.0),
            other_volume: config.other.clamp(0.0, 1.0),
            output_device: config.output_device.clone(),
        }
    }
}

/// Replace the current settings with values from configuration.
pub fn init(config: &VolumeConfig) {
    let next = AudioSettings::from(config);
    log::info!(
        "[Settings] master={:.2} music={:.2} other={:.2} device={:?}",
        next.master_volume,
        next.music_volume,
        next.other_volume,
        next.output_device
    );
    write(|settings| *settings = next);
}

/// Restore defaults (all volumes 1.0, host default device).
pub fn reset() {
    write(|settings| *settings = AudioSettings::default());
}

pub fn snapshot() -> AudioSettings {
    match SETTINGS.read() {
        Ok(guard) => guard.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    }
}

/// Lock-free; safe to call from the audio callback.
pub fn master_volume() -> f32 {
    f32::from_bits(MASTER_VOLUME_BITS.load(Ordering::Relaxed))
}

pub fn music_volume() -> f32 {
    snapshot().music_volume
}

pub fn other_volume() -> f32 {
    snapshot().other_volume
}

pub fn output_device() -> Option<String> {
    snapshot().output_device
}

pub fn set_master_volume(volume: f32) -> Result<(), AudioError> {
    let volume = validate_volume("master_volume", volume)?;
    write(|settings| settings.master_volume = volume);
    Ok(())
}

pub fn set_music_volume(volume: f32) -> Result<(), AudioError> {
    let volume = validate_volume("music_volume", volume)?;
    write(|settings| settings.music_volume = volume);
    Ok(())
}

pub fn set_other_volume(volume: f32) -> Result<(), AudioError> {
    let volume = validate_volume("other_volume", volume)?;
    write(|settings| settings.other_volume = volume);
    Ok(())
}

pub fn set_output_device(name: Option<String>) {
    write(|settings| settings.output_device = name);
}

fn validate_volume(name: &str, volume: f32) -> Result<f32, AudioError> {
    if !volume.is_finite() {
        return Err(AudioError::InvalidParameter {
            name: name.to_string(),
            value: volume.to_string(),
        });
    }
    Ok(volume.clamp(0.0, 1.0))
}

// A poisoned lock only means a writer panicked mid-assignment of plain
// values; the data is still usable.
fn write(f: impl FnOnce(&mut AudioSettings)) {
    let mut guard = match SETTINGS.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    f(&mut guard);
    MASTER_VOLUME_BITS.store(guard.master_volume.to_bits(), Ordering::Relaxed);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::settings_guard;

    #[test]
    fn init_clamps_and_reset_restores_defaults() {
        let _guard = settings_guard();

        init(&VolumeConfig {
            master: 1.5,
            music: 0.25,
            other: -1.0,
            output_device: Some("Speakers".to_string()),
        });
        let current = snapshot();
        assert_eq!(current.master_volume, 1.0);
        assert_eq!(current.music_volume, 0.25);
        assert_eq!(current.other_volume, 0.0);
        assert_eq!(current.output_device.as_deref(), Some("Speakers"));

        reset();
        assert_eq!(snapshot(), AudioSettings::default());
    }

    #[test]
    fn setters_reject_non_finite_volume() {
        let _guard = settings_guard();

        assert!(matches!(
            set_music_volume(f32::NAN),
            Err(AudioError::InvalidParameter { .. })
        ));
        assert_eq!(music_volume(), 1.0);

        set_other_volume(0.4).unwrap();
        assert_eq!(other_volume(), 0.4);
        set_master_volume(2.0).unwrap();
        assert_eq!(master_volume(), 1.0);
    }

    #[test]
    fn master_volume_reader_tracks_every_write() {
        let _guard = settings_guard();
        assert_eq!(master_volume(), 1.0);

        set_master_volume(0.3).unwrap();
        assert_eq!(master_volume(), 0.3);
        assert_eq!(snapshot().master_volume, 0.3);

        assert!(set_master_volume(f32::INFINITY).is_err());
        assert_eq!(master_volume(), 0.3);

        init(&VolumeConfig {
            master: 0.6,
            ..VolumeConfig::default()
        });
        assert_eq!(master_volume(), 0.6);

        reset();
        assert_eq!(master_volume(), 1.0);
    }
}
