//! Configuration management for playback tuning
//!
//! This module provides runtime configuration loading from JSON files,
//! so pre-roll heuristics, volumes and device buffer sizes can be adjusted
//! without recompilation.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Complete application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub playback: PlaybackConfig,
    #[serde(default)]
    pub volume: VolumeConfig,
    #[serde(default)]
    pub audio: AudioConfig,
}

/// Pre-roll heuristics and finish policy defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Pre-roll applied to every scheduled start
    pub base_delay_secs: f32,
    /// Extra pre-roll on mobile/handheld targets (higher output latency)
    pub mobile_extra_delay_secs: f32,
    /// Extra pre-roll when the frame rate is below `low_fps_threshold`
    pub low_fps_extra_delay_secs: f32,
    /// Frames per second under which the low-fps compensation kicks in
    pub low_fps_threshold: f32,
    /// Default grace period after the clip ends before firing the finished callback
    pub finished_call_offset_secs: f32,
    /// Default endless mode for new sessions
    pub audio_endless: bool,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            base_delay_secs: 2.0,
            // Mobile output latency is estimated at ~400ms; pad generously
            mobile_extra_delay_secs: 1.0,
            low_fps_extra_delay_secs: 5.0,
            low_fps_threshold: 30.0,
            finished_call_offset_secs: 0.0,
            audio_endless: false,
        }
    }
}

/// Process-wide volume defaults and output device selection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VolumeConfig {
    /// Applied to everything the backend mixes
    pub master: f32,
    /// Applied to scheduled music tracks
    pub music: f32,
    /// Applied to one-shot sounds (sfx etc.)
    pub other: f32,
    /// Output device name, host default when absent
    pub output_device: Option<String>,
}

impl Default for VolumeConfig {
    fn default() -> Self {
        Self {
            master: 1.0,
            music: 1.0,
            other: 1.0,
            output_device: None,
        }
    }
}

/// Audio backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Frames per audio buffer; the backend clock advances in steps of this size
    pub buffer_size: u32,
    /// Preferred output sample rate in Hz
    pub sample_rate: u32,
    /// Maximum number of concurrently allocated channels
    pub max_channels: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            buffer_size: 1024,
            sample_rate: 48000,
            max_channels: 32,
        }
    }
}

impl AppConfig {
    /// Load configuration from JSON file
    ///
    /// # Arguments
    /// * `path` - Path to JSON config file
    ///
    /// # Returns
    /// The loaded configuration. If the file doesn't exist or the JSON is
    /// invalid, a warning is logged and the default config is returned.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Self {
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(config) => {
                    log::info!("[Config] Loaded configuration from {:?}", path.as_ref());
                    config
                }
                Err(err) => {
                    log::warn!(
                        "[Config] Failed to parse JSON from {:?}: {}. Using defaults.",
                        path.as_ref(),
                        err
                    );
                    Self::default()
                }
            },
            Err(err) => {
                log::warn!(
                    "[Config] Failed to read config file {:?}: {}. Using defaults.",
                    path.as_ref(),
                    err
                );
                Self::default()
            }
        }
    }

    /// Load configuration from the default asset location
    pub fn load() -> Self {
        Self::load_from_file("assets/playback_config.json")
    }
}
