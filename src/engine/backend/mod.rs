//! Backend abstractions for the playback core.
//!
//! The session state machine only talks to audio hardware through
//! [`AudioBackend`] and only reads rendering-frame time through
//! [`FrameClock`]. Both traits are object safe so sessions can hold
//! `Arc<dyn ...>` and tests can swap in the deterministic implementations.

use std::fmt;
use std::sync::Mutex;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::error::AudioError;

/// Opaque handle to a sound registered with a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SoundHandle(pub u64);

impl fmt::Display for SoundHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sound#{}", self.0)
    }
}

/// Handle to one playing (or scheduled) channel.
///
/// Slots are recycled; the generation distinguishes a live channel from an
/// older one that used the same slot, so handles from a stopped session
/// are detected as stale instead of silently controlling new playback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelHandle {
    pub slot: u32,
    pub generation: u32,
}

impl fmt::Display for ChannelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.slot, self.generation)
    }
}

impl ChannelHandle {
    pub(crate) fn stale_error(&self) -> AudioError {
        AudioError::StaleHandle {
            handle: self.to_string(),
        }
    }
}

/// Mixing groups. Scheduled music and one-shot sounds never share a group,
/// so pausing the music never touches sfx and vice versa.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MixGroup {
    Music,
    Sfx,
}

impl MixGroup {
    pub const ALL: [MixGroup; 2] = [MixGroup::Music, MixGroup::Sfx];

    pub(crate) fn index(self) -> usize {
        match self {
            MixGroup::Music => 0,
            MixGroup::Sfx => 1,
        }
    }
}

/// Which clock the session trusts while the clip is sounding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimingMode {
    /// Sample cursor while sounding, mix clock during pre-roll and after the
    /// clip ends. Completion is detected when the channel stops producing output.
    SampleCursor,
    /// Mix clock throughout. Completion is detected when elapsed time passes
    /// the clip end.
    MixClock,
}

/// Output device reported by a backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputDevice {
    pub index: usize,
    pub name: String,
    pub is_default: bool,
}

/// Settings accepted by [`AudioBackend::reconfigure`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendSettings {
    /// Frames per audio buffer. A power of two is recommended.
    pub buffer_size: u32,
}

/// Priority given to new channels until the caller overrides it.
/// 0 is the most important, 255 the least.
pub const DEFAULT_PRIORITY: u8 = 128;

/// Trait implemented by audio output backends.
///
/// All clock values are in ticks of [`AudioBackend::clock_rate`]. `now()` is
/// the music group's mix clock: it only advances while the group is not
/// paused and only refreshes once per audio buffer.
pub trait AudioBackend: Send + Sync {
    fn timing_mode(&self) -> TimingMode;

    /// Ticks per second of the mix clock.
    fn clock_rate(&self) -> u32;

    fn now(&self) -> Result<u64, AudioError>;

    /// Start `sound` on the music group once the mix clock reaches `deadline`.
    fn schedule_start(&self, sound: SoundHandle, deadline: u64)
        -> Result<ChannelHandle, AudioError>;

    fn play_immediate(&self, sound: SoundHandle, group: MixGroup)
        -> Result<ChannelHandle, AudioError>;

    /// Whether `channel` still refers to a live channel.
    fn is_valid(&self, channel: ChannelHandle) -> bool;

    /// Playback head position in frames of the sound's own sample rate.
    fn sample_cursor(&self, channel: ChannelHandle) -> Result<u64, AudioError>;

    /// True while the channel is scheduled or sounding and has not reached
    /// the end of its sound.
    fn is_producing_output(&self, channel: ChannelHandle) -> Result<bool, AudioError>;

    fn set_volume(&self, channel: ChannelHandle, volume: f32) -> Result<(), AudioError>;
    fn set_pitch(&self, channel: ChannelHandle, pitch: f32) -> Result<(), AudioError>;
    fn set_priority(&self, channel: ChannelHandle, priority: u8) -> Result<(), AudioError>;

    fn pause(&self, channel: ChannelHandle) -> Result<(), AudioError>;
    fn unpause(&self, channel: ChannelHandle) -> Result<(), AudioError>;

    /// Halt the channel and release its slot. The handle is stale afterwards.
    fn stop(&self, channel: ChannelHandle) -> Result<(), AudioError>;

    /// Pause or resume a whole mixing group, including its clock.
    fn set_group_paused(&self, group: MixGroup, paused: bool) -> Result<(), AudioError>;

    /// Length of the sound in seconds.
    fn sound_length(&self, sound: SoundHandle) -> Result<f64, AudioError>;
    fn sound_sample_rate(&self, sound: SoundHandle) -> Result<u32, AudioError>;

    fn output_devices(&self) -> Result<Vec<OutputDevice>, AudioError> {
        Err(AudioError::unsupported("output device enumeration"))
    }

    fn select_output_device(&self, _name: &str) -> Result<(), AudioError> {
        Err(AudioError::unsupported("output device selection"))
    }

    /// Apply new buffer settings, re-initialising the output if needed.
    fn reconfigure(&self, _settings: BackendSettings) -> Result<(), AudioError> {
        Err(AudioError::unsupported("backend reconfiguration"))
    }
}

/// Rendering-frame clock.
///
/// `now()` is the timestamp of the current frame in seconds and stays
/// constant within a frame; `delta()` is the duration of the last frame.
pub trait FrameClock: Send + Sync {
    fn now(&self) -> f64;
    fn delta(&self) -> f64;
}

struct FrameState {
    last: Instant,
    delta: f64,
}

/// Frame clock backed by `Instant`. Call [`SystemFrameClock::tick`] once at
/// the start of every frame.
pub struct SystemFrameClock {
    start: Instant,
    state: Mutex<FrameState>,
}

impl SystemFrameClock {
    pub fn new() -> Self {
        let start = Instant::now();
        Self {
            start,
            state: Mutex::new(FrameState {
                last: start,
                delta: 0.0,
            }),
        }
    }

    pub fn tick(&self) {
        let now = Instant::now();
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        state.delta = now.saturating_duration_since(state.last).as_secs_f64();
        state.last = now;
    }
}

impl Default for SystemFrameClock {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameClock for SystemFrameClock {
    fn now(&self) -> f64 {
        let state = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        state.last.saturating_duration_since(self.start).as_secs_f64()
    }

    fn delta(&self) -> f64 {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .delta
    }
}

pub mod simulated;
pub use simulated::{ManualFrameClock, SimulatedBackend, SimulatedBackendBuilder};

#[cfg(not(target_os = "android"))]
mod cpal;
#[cfg(not(target_os = "android"))]
pub use cpal::{host_output_devices, CpalBackend};
