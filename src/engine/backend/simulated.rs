use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use crate::audio::slots::ChannelSlots;
use crate::config::AudioConfig;
use crate::error::AudioError;

use super::{
    AudioBackend, BackendSettings, ChannelHandle, FrameClock, MixGroup, OutputDevice,
    SoundHandle, TimingMode, DEFAULT_PRIORITY,
};

/// Deterministic software model of an audio device.
///
/// Time only moves when [`SimulatedBackend::advance`] is called, and it moves
/// the way real hardware does: the mix clock and every sample cursor refresh
/// once per buffer of `buffer_size` frames. Scheduled channels start exactly
/// at their deadline frame, even in the middle of a buffer.
pub struct SimulatedBackend {
    timing_mode: TimingMode,
    clock_rate: AtomicU32,
    state: Mutex<SimState>,
}

struct SimSound {
    frames: u64,
    sample_rate: u32,
}

struct SimVoice {
    group: MixGroup,
    /// Group clock frame at which the voice starts; `None` once started.
    start_at: Option<u64>,
    cursor: f64,
    sound_frames: u64,
    sound_rate: u32,
    pitch: f32,
    volume: f32,
    paused: bool,
    finished: bool,
    one_shot: bool,
}

#[derive(Default, Clone, Copy)]
struct GroupClock {
    frames: u64,
    paused: bool,
}

struct SimState {
    buffer_size: u32,
    pending_frames: f64,
    groups: [GroupClock; 2],
    slots: ChannelSlots<SimVoice>,
    sounds: Vec<SimSound>,
    device_available: bool,
    devices: Vec<OutputDevice>,
    selected_device: usize,
}

/// Builder for [`SimulatedBackend`].
pub struct SimulatedBackendBuilder {
    timing_mode: TimingMode,
    clock_rate: u32,
    buffer_size: u32,
    max_channels: usize,
}

impl Default for SimulatedBackendBuilder {
    fn default() -> Self {
        let audio = AudioConfig::default();
        Self {
            timing_mode: TimingMode::SampleCursor,
            clock_rate: audio.sample_rate,
            buffer_size: audio.buffer_size,
            max_channels: audio.max_channels,
        }
    }
}

impl SimulatedBackendBuilder {
    pub fn timing_mode(mut self, mode: TimingMode) -> Self {
        self.timing_mode = mode;
        self
    }

    pub fn clock_rate(mut self, rate: u32) -> Self {
        self.clock_rate = rate.max(1);
        self
    }

    pub fn buffer_size(mut self, frames: u32) -> Self {
        self.buffer_size = frames.max(1);
        self
    }

    pub fn max_channels(mut self, limit: usize) -> Self {
        self.max_channels = limit;
        self
    }

    pub fn from_config(self, config: &AudioConfig) -> Self {
        self.clock_rate(config.sample_rate)
            .buffer_size(config.buffer_size)
            .max_channels(config.max_channels)
    }

    pub fn build(self) -> SimulatedBackend {
        SimulatedBackend {
            timing_mode: self.timing_mode,
            clock_rate: AtomicU32::new(self.clock_rate),
            state: Mutex::new(SimState {
                buffer_size: self.buffer_size,
                pending_frames: 0.0,
                groups: [GroupClock::default(); 2],
                slots: ChannelSlots::new(self.max_channels),
                sounds: Vec::new(),
                device_available: true,
                devices: vec![
                    OutputDevice {
                        index: 0,
                        name: "Simulated Output".to_string(),
                        is_default: true,
                    },
                    OutputDevice {
                        index: 1,
                        name: "Simulated Headphones".to_string(),
                        is_default: false,
                    },
                ],
                selected_device: 0,
            }),
        }
    }
}

impl SimulatedBackend {
    pub fn builder() -> SimulatedBackendBuilder {
        SimulatedBackendBuilder::default()
    }

    pub fn new(timing_mode: TimingMode) -> Self {
        Self::builder().timing_mode(timing_mode).build()
    }

    fn lock(&self) -> Result<MutexGuard<'_, SimState>, AudioError> {
        self.state
            .lock()
            .map_err(|_| AudioError::poisoned("SimulatedBackend"))
    }

    /// Register a sound of the given length.
    pub fn register_sound(
        &self,
        length_secs: f64,
        sample_rate: u32,
    ) -> Result<SoundHandle, AudioError> {
        if !(length_secs.is_finite() && length_secs > 0.0) || sample_rate == 0 {
            return Err(AudioError::InvalidSound {
                reason: format!("length {}s at {} Hz", length_secs, sample_rate),
            });
        }
        let mut state = self.lock()?;
        state.sounds.push(SimSound {
            frames: (length_secs * sample_rate as f64).round() as u64,
            sample_rate,
        });
        Ok(SoundHandle(state.sounds.len() as u64 - 1))
    }

    /// Advance device time by `secs`. Only whole buffers are rendered; the
    /// remainder carries over to the next call.
    pub fn advance(&self, secs: f64) -> Result<(), AudioError> {
        let mut state = self.lock()?;
        let rate = self.clock_rate.load(Ordering::Relaxed);
        state.pending_frames += secs.max(0.0) * rate as f64;
        let buffer = state.buffer_size as f64;
        while state.pending_frames >= buffer {
            state.pending_frames -= buffer;
            state.render_buffer(rate);
        }
        Ok(())
    }

    /// Duration of one audio buffer in seconds.
    pub fn buffer_duration(&self) -> f64 {
        self.lock()
            .map(|state| state.buffer_size as f64 / self.clock_rate() as f64)
            .unwrap_or(0.0)
    }

    /// Switch the device rate, as reopening the stream on another device
    /// would. Group clocks and pending start deadlines are rescaled so they
    /// keep their meaning in seconds.
    pub fn set_clock_rate(&self, rate: u32) -> Result<(), AudioError> {
        let rate = rate.max(1);
        let mut state = self.lock()?;
        let previous = self.clock_rate.load(Ordering::Relaxed);
        if rate == previous {
            return Ok(());
        }
        let ratio = rate as f64 / previous as f64;
        for group in &mut state.groups {
            group.frames = (group.frames as f64 * ratio) as u64;
        }
        for voice in state.slots.values_mut() {
            if let Some(deadline) = voice.start_at.as_mut() {
                *deadline = (*deadline as f64 * ratio) as u64;
            }
        }
        state.pending_frames *= ratio;
        self.clock_rate.store(rate, Ordering::Relaxed);
        log::info!(
            "[SimulatedBackend] Clock rate {} Hz -> {} Hz",
            previous,
            rate
        );
        Ok(())
    }

    /// Simulate unplugging (or re-plugging) the output device.
    pub fn set_device_available(&self, available: bool) -> Result<(), AudioError> {
        self.lock()?.device_available = available;
        Ok(())
    }

    /// Number of allocated channels across both groups.
    pub fn active_channels(&self) -> usize {
        self.lock().map(|state| state.slots.len()).unwrap_or(0)
    }

    pub fn channel_volume(&self, channel: ChannelHandle) -> Result<f32, AudioError> {
        Ok(self.lock()?.slots.get(channel)?.volume)
    }

    pub fn channel_pitch(&self, channel: ChannelHandle) -> Result<f32, AudioError> {
        Ok(self.lock()?.slots.get(channel)?.pitch)
    }

    pub fn channel_priority(&self, channel: ChannelHandle) -> Result<u8, AudioError> {
        self.lock()?.slots.priority(channel)
    }

    pub fn channel_group(&self, channel: ChannelHandle) -> Result<MixGroup, AudioError> {
        Ok(self.lock()?.slots.get(channel)?.group)
    }

    pub fn is_group_paused(&self, group: MixGroup) -> bool {
        self.lock()
            .map(|state| state.groups[group.index()].paused)
            .unwrap_or(false)
    }

    pub fn buffer_size(&self) -> u32 {
        self.lock().map(|state| state.buffer_size).unwrap_or(0)
    }

    pub fn selected_device(&self) -> Option<String> {
        self.lock()
            .ok()
            .and_then(|state| state.devices.get(state.selected_device).map(|d| d.name.clone()))
    }

    fn start_voice(
        &self,
        sound: SoundHandle,
        group: MixGroup,
        start_at: Option<u64>,
    ) -> Result<ChannelHandle, AudioError> {
        let mut state = self.lock()?;
        if !state.device_available {
            return Err(AudioError::NoOutputDevice);
        }
        let (frames, sample_rate) = {
            let sound_data = state
                .sounds
                .get(sound.0 as usize)
                .ok_or(AudioError::UnknownSound { sound: sound.0 })?;
            (sound_data.frames, sound_data.sample_rate)
        };
        let voice = SimVoice {
            group,
            start_at,
            cursor: 0.0,
            sound_frames: frames,
            sound_rate: sample_rate,
            pitch: 1.0,
            volume: 1.0,
            paused: false,
            finished: false,
            one_shot: group == MixGroup::Sfx,
        };
        let allocation = state.slots.allocate(voice, DEFAULT_PRIORITY)?;
        if allocation.evicted.is_some() {
            log::debug!(
                "[SimulatedBackend] Stole a lower priority channel for {}",
                sound
            );
        }
        Ok(allocation.handle)
    }
}

impl SimState {
    fn render_buffer(&mut self, clock_rate: u32) {
        let frames = self.buffer_size as u64;
        for group in MixGroup::ALL {
            let clock = self.groups[group.index()];
            if clock.paused {
                continue;
            }
            let buffer_start = clock.frames;
            for voice in self.slots.values_mut() {
                if voice.group != group || voice.paused || voice.finished {
                    continue;
                }
                let mut sounding = frames;
                if let Some(deadline) = voice.start_at {
                    if deadline >= buffer_start + frames {
                        continue;
                    }
                    sounding = frames - deadline.saturating_sub(buffer_start);
                    voice.start_at = None;
                }
                let step = voice.sound_rate as f64 / clock_rate as f64 * voice.pitch as f64;
                voice.cursor += sounding as f64 * step;
                if voice.cursor >= voice.sound_frames as f64 {
                    voice.cursor = voice.sound_frames as f64;
                    voice.finished = true;
                }
            }
            self.groups[group.index()].frames = buffer_start + frames;
        }
        self.slots.retain(|voice| !(voice.one_shot && voice.finished));
    }
}

impl AudioBackend for SimulatedBackend {
    fn timing_mode(&self) -> TimingMode {
        self.timing_mode
    }

    fn clock_rate(&self) -> u32 {
        self.clock_rate.load(Ordering::Relaxed)
    }

    fn now(&self) -> Result<u64, AudioError> {
        Ok(self.lock()?.groups[MixGroup::Music.index()].frames)
    }

    fn schedule_start(
        &self,
        sound: SoundHandle,
        deadline: u64,
    ) -> Result<ChannelHandle, AudioError> {
        self.start_voice(sound, MixGroup::Music, Some(deadline))
    }

    fn play_immediate(
        &self,
        sound: SoundHandle,
        group: MixGroup,
    ) -> Result<ChannelHandle, AudioError> {
        self.start_voice(sound, group, None)
    }

    fn is_valid(&self, channel: ChannelHandle) -> bool {
        self.lock()
            .map(|state| state.slots.contains(channel))
            .unwrap_or(false)
    }

    fn sample_cursor(&self, channel: ChannelHandle) -> Result<u64, AudioError> {
        Ok(self.lock()?.slots.get(channel)?.cursor as u64)
    }

    fn is_producing_output(&self, channel: ChannelHandle) -> Result<bool, AudioError> {
        Ok(!self.lock()?.slots.get(channel)?.finished)
    }

    fn set_volume(&self, channel: ChannelHandle, volume: f32) -> Result<(), AudioError> {
        self.lock()?.slots.get_mut(channel)?.volume = volume.clamp(0.0, 1.0);
        Ok(())
    }

    fn set_pitch(&self, channel: ChannelHandle, pitch: f32) -> Result<(), AudioError> {
        if !(pitch.is_finite() && pitch > 0.0) {
            return Err(AudioError::InvalidParameter {
                name: "pitch".to_string(),
                value: pitch.to_string(),
            });
        }
        self.lock()?.slots.get_mut(channel)?.pitch = pitch;
        Ok(())
    }

    fn set_priority(&self, channel: ChannelHandle, priority: u8) -> Result<(), AudioError> {
        self.lock()?.slots.set_priority(channel, priority)
    }

    fn pause(&self, channel: ChannelHandle) -> Result<(), AudioError> {
        self.lock()?.slots.get_mut(channel)?.paused = true;
        Ok(())
    }

    fn unpause(&self, channel: ChannelHandle) -> Result<(), AudioError> {
        self.lock()?.slots.get_mut(channel)?.paused = false;
        Ok(())
    }

    fn stop(&self, channel: ChannelHandle) -> Result<(), AudioError> {
        self.lock()?.slots.release(channel).map(|_| ())
    }

    fn set_group_paused(&self, group: MixGroup, paused: bool) -> Result<(), AudioError> {
        self.lock()?.groups[group.index()].paused = paused;
        Ok(())
    }

    fn sound_length(&self, sound: SoundHandle) -> Result<f64, AudioError> {
        let state = self.lock()?;
        let data = state
            .sounds
            .get(sound.0 as usize)
            .ok_or(AudioError::UnknownSound { sound: sound.0 })?;
        Ok(data.frames as f64 / data.sample_rate as f64)
    }

    fn sound_sample_rate(&self, sound: SoundHandle) -> Result<u32, AudioError> {
        let state = self.lock()?;
        state
            .sounds
            .get(sound.0 as usize)
            .map(|data| data.sample_rate)
            .ok_or(AudioError::UnknownSound { sound: sound.0 })
    }

    fn output_devices(&self) -> Result<Vec<OutputDevice>, AudioError> {
        let state = self.lock()?;
        if !state.device_available {
            return Ok(Vec::new());
        }
        Ok(state.devices.clone())
    }

    fn select_output_device(&self, name: &str) -> Result<(), AudioError> {
        let mut state = self.lock()?;
        let index = state
            .devices
            .iter()
            .position(|device| device.name == name)
            .ok_or(AudioError::NoOutputDevice)?;
        state.selected_device = index;
        log::info!("[SimulatedBackend] Output device set to {}", name);
        Ok(())
    }

    fn reconfigure(&self, settings: BackendSettings) -> Result<(), AudioError> {
        if settings.buffer_size == 0 {
            return Err(AudioError::InvalidParameter {
                name: "buffer_size".to_string(),
                value: settings.buffer_size.to_string(),
            });
        }
        let mut state = self.lock()?;
        log::info!(
            "[SimulatedBackend] Buffer size {} -> {}",
            state.buffer_size,
            settings.buffer_size
        );
        state.buffer_size = settings.buffer_size;
        state.pending_frames = 0.0;
        Ok(())
    }
}

/// Deterministic frame clock for tests and simulations.
///
/// Time only moves through [`ManualFrameClock::advance`], which also records
/// the advanced amount as the last frame's delta.
pub struct ManualFrameClock {
    now_bits: AtomicU64,
    delta_bits: AtomicU64,
}

impl ManualFrameClock {
    pub fn new() -> Self {
        Self {
            now_bits: AtomicU64::new(0.0f64.to_bits()),
            delta_bits: AtomicU64::new(0.0f64.to_bits()),
        }
    }

    pub fn advance(&self, secs: f64) {
        let secs = secs.max(0.0);
        let now = f64::from_bits(self.now_bits.load(Ordering::SeqCst)) + secs;
        self.now_bits.store(now.to_bits(), Ordering::SeqCst);
        self.delta_bits.store(secs.to_bits(), Ordering::SeqCst);
    }

    /// Override the reported frame delta without moving time.
    pub fn set_delta(&self, secs: f64) {
        self.delta_bits.store(secs.max(0.0).to_bits(), Ordering::SeqCst);
    }
}

impl Default for ManualFrameClock {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameClock for ManualFrameClock {
    fn now(&self) -> f64 {
        f64::from_bits(self.now_bits.load(Ordering::SeqCst))
    }

    fn delta(&self) -> f64 {
        f64::from_bits(self.delta_bits.load(Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(buffer: u32) -> SimulatedBackend {
        SimulatedBackend::builder()
            .clock_rate(1000)
            .buffer_size(buffer)
            .build()
    }

    #[test]
    fn clock_refreshes_once_per_buffer() {
        let backend = backend(100);
        backend.advance(0.05).unwrap();
        assert_eq!(backend.now().unwrap(), 0);
        backend.advance(0.05).unwrap();
        assert_eq!(backend.now().unwrap(), 100);
        backend.advance(0.25).unwrap();
        assert_eq!(backend.now().unwrap(), 300);
    }

    #[test]
    fn scheduled_voice_starts_at_deadline_inside_buffer() {
        let backend = backend(100);
        let sound = backend.register_sound(1.0, 1000).unwrap();
        let channel = backend.schedule_start(sound, 150).unwrap();

        backend.advance(0.1).unwrap();
        assert_eq!(backend.sample_cursor(channel).unwrap(), 0);
        backend.advance(0.1).unwrap();
        assert_eq!(backend.sample_cursor(channel).unwrap(), 50);
        assert!(backend.is_producing_output(channel).unwrap());
    }

    #[test]
    fn voice_finishes_and_one_shots_are_released() {
        let backend = backend(100);
        let sound = backend.register_sound(0.2, 1000).unwrap();
        let music = backend.play_immediate(sound, MixGroup::Music).unwrap();
        let sfx = backend.play_immediate(sound, MixGroup::Sfx).unwrap();

        backend.advance(0.3).unwrap();
        assert!(!backend.is_producing_output(music).unwrap());
        assert_eq!(backend.sample_cursor(music).unwrap(), 200);
        assert!(!backend.is_valid(sfx));
        assert_eq!(backend.active_channels(), 1);
    }

    #[test]
    fn paused_group_freezes_clock_and_deadline() {
        let backend = backend(100);
        let sound = backend.register_sound(1.0, 1000).unwrap();
        let channel = backend.schedule_start(sound, 200).unwrap();

        backend.advance(0.1).unwrap();
        backend.set_group_paused(MixGroup::Music, true).unwrap();
        backend.advance(0.5).unwrap();
        assert_eq!(backend.now().unwrap(), 100);
        assert_eq!(backend.sample_cursor(channel).unwrap(), 0);

        backend.set_group_paused(MixGroup::Music, false).unwrap();
        backend.advance(0.2).unwrap();
        assert_eq!(backend.now().unwrap(), 300);
        assert_eq!(backend.sample_cursor(channel).unwrap(), 100);
    }

    #[test]
    fn pitch_and_sound_rate_scale_cursor() {
        let backend = backend(100);
        let sound = backend.register_sound(10.0, 500).unwrap();
        let channel = backend.play_immediate(sound, MixGroup::Sfx).unwrap();
        backend.set_pitch(channel, 2.0).unwrap();

        backend.advance(0.1).unwrap();
        // 100 device frames at 500/1000 x 2.0
        assert_eq!(backend.sample_cursor(channel).unwrap(), 100);
    }

    #[test]
    fn missing_device_fails_playback() {
        let backend = backend(100);
        let sound = backend.register_sound(1.0, 1000).unwrap();
        backend.set_device_available(false).unwrap();

        assert_eq!(
            backend.play_immediate(sound, MixGroup::Music),
            Err(AudioError::NoOutputDevice)
        );
        assert!(backend.output_devices().unwrap().is_empty());
    }

    #[test]
    fn stopped_handle_is_stale() {
        let backend = backend(100);
        let sound = backend.register_sound(1.0, 1000).unwrap();
        let channel = backend.play_immediate(sound, MixGroup::Music).unwrap();
        backend.stop(channel).unwrap();

        assert!(!backend.is_valid(channel));
        assert!(matches!(
            backend.sample_cursor(channel),
            Err(AudioError::StaleHandle { .. })
        ));
    }

    #[test]
    fn reconfigure_and_select_device() {
        let backend = backend(100);
        backend
            .reconfigure(BackendSettings { buffer_size: 256 })
            .unwrap();
        assert_eq!(backend.buffer_size(), 256);
        assert!(backend
            .reconfigure(BackendSettings { buffer_size: 0 })
            .is_err());

        backend.select_output_device("Simulated Headphones").unwrap();
        assert_eq!(
            backend.selected_device().as_deref(),
            Some("Simulated Headphones")
        );
        assert_eq!(
            backend.select_output_device("Nope"),
            Err(AudioError::NoOutputDevice)
        );
    }

    #[test]
    fn register_sound_rejects_empty_sound() {
        let backend = backend(100);
        assert!(matches!(
            backend.register_sound(0.0, 1000),
            Err(AudioError::InvalidSound { .. })
        ));
        assert!(backend.register_sound(1.0, 0).is_err());
    }

    #[test]
    fn manual_frame_clock_tracks_delta() {
        let clock = ManualFrameClock::new();
        clock.advance(0.016);
        clock.advance(0.02);
        assert!((clock.now() - 0.036).abs() < 1e-12);
        assert!((clock.delta() - 0.02).abs() < 1e-12);
    }

    #[test]
    fn clock_rate_change_keeps_clock_and_deadlines_in_seconds() {
        let backend = backend(100);
        let sound = backend.register_sound(1.0, 1000).unwrap();
        let channel = backend.schedule_start(sound, 300).unwrap();
        backend.advance(0.2).unwrap();
        assert_eq!(backend.now().unwrap(), 200);

        backend.set_clock_rate(2000).unwrap();
        assert_eq!(backend.clock_rate(), 2000);
        assert_eq!(backend.now().unwrap(), 400);
        assert!((backend.buffer_duration() - 0.05).abs() < 1e-9);

        // Deadline moved from 300 to 600 ticks: still 0.3 s
        backend.advance(0.1).unwrap();
        assert_eq!(backend.now().unwrap(), 600);
        assert_eq!(backend.sample_cursor(channel).unwrap(), 0);
        backend.advance(0.05).unwrap();
        assert_eq!(backend.sample_cursor(channel).unwrap(), 50);
    }
}
