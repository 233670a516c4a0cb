//! Software mixer driven by the output stream callback
//!
//! The mixer owns every registered sound and every channel. Control calls
//! from the session thread and the render call from the audio callback share
//! it through a mutex; each render advances the per-group clocks by exactly
//! the number of frames written, so the mix clock refreshes once per buffer.

use std::sync::Arc;

use super::slots::ChannelSlots;
use super::sound::SoundData;
use crate::engine::backend::{ChannelHandle, MixGroup, SoundHandle, DEFAULT_PRIORITY};
use crate::error::AudioError;

pub struct Voice {
    sound: Arc<SoundData>,
    pub group: MixGroup,
    /// Group clock frame at which the voice starts; `None` once started.
    pub start_at: Option<u64>,
    /// Read position in frames of the sound's own rate.
    pub cursor: f64,
    pub pitch: f32,
    pub volume: f32,
    pub paused: bool,
    pub finished: bool,
    one_shot: bool,
}

#[derive(Default, Clone, Copy)]
struct GroupClock {
    frames: u64,
    paused: bool,
}

pub struct Mixer {
    device_rate: u32,
    groups: [GroupClock; 2],
    slots: ChannelSlots<Voice>,
    sounds: Vec<Arc<SoundData>>,
}

impl Mixer {
    pub fn new(device_rate: u32, max_channels: usize) -> Self {
        Self {
            device_rate: device_rate.max(1),
            groups: [GroupClock::default(); 2],
            slots: ChannelSlots::new(max_channels),
            sounds: Vec::new(),
        }
    }

    pub fn device_rate(&self) -> u32 {
        self.device_rate
    }

    /// Change the output rate after a stream rebuild. Group clocks are
    /// rescaled so scheduled deadlines keep their wall-clock meaning.
    pub fn set_device_rate(&mut self, rate: u32) {
        let rate = rate.max(1);
        if rate == self.device_rate {
            return;
        }
        let ratio = rate as f64 / self.device_rate as f64;
        for group in &mut self.groups {
            group.frames = (group.frames as f64 * ratio) as u64;
        }
        for voice in self.slots.values_mut() {
            if let Some(deadline) = voice.start_at.as_mut() {
                *deadline = (*deadline as f64 * ratio) as u64;
            }
        }
        self.device_rate = rate;
    }

    pub fn add_sound(&mut self, sound: SoundData) -> SoundHandle {
        self.sounds.push(Arc::new(sound));
        SoundHandle(self.sounds.len() as u64 - 1)
    }

    pub fn sound(&self, handle: SoundHandle) -> Result<&Arc<SoundData>, AudioError> {
        self.sounds
            .get(handle.0 as usize)
            .ok_or(AudioError::UnknownSound { sound: handle.0 })
    }

    pub fn start(
        &mut self,
        sound: SoundHandle,
        group: MixGroup,
        start_at: Option<u64>,
    ) -> Result<ChannelHandle, AudioError> {
        let sound = Arc::clone(self.sound(sound)?);
        let voice = Voice {
            sound,
            group,
            start_at,
            cursor: 0.0,
            pitch: 1.0,
            volume: 1.0,
            paused: false,
            finished: false,
            one_shot: group == MixGroup::Sfx,
        };
        let allocation = self.slots.allocate(voice, DEFAULT_PRIORITY)?;
        if allocation.evicted.is_some() {
            log::debug!("[Mixer] Stole a lower priority channel");
        }
        Ok(allocation.handle)
    }

    pub fn slots(&self) -> &ChannelSlots<Voice> {
        &self.slots
    }

    pub fn slots_mut(&mut self) -> &mut ChannelSlots<Voice> {
        &mut self.slots
    }

    pub fn group_frames(&self, group: MixGroup) -> u64 {
        self.groups[group.index()].frames
    }

    pub fn set_group_paused(&mut self, group: MixGroup, paused: bool) {
        self.groups[group.index()].paused = paused;
    }

    pub fn is_group_paused(&self, group: MixGroup) -> bool {
        self.groups[group.index()].paused
    }

    /// Mix one interleaved buffer into `out` (overwritten) and advance the
    /// group clocks by its frame count.
    pub fn render(&mut self, out: &mut [f32], channels: usize, master: f32) {
        out.fill(0.0);
        let channels = channels.max(1);
        let frames = (out.len() / channels) as u64;
        let device_rate = self.device_rate as f64;

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
                let mut first = 0u64;
                if let Some(deadline) = voice.start_at {
                    if deadline >= buffer_start + frames {
                        continue;
                    }
                    first = deadline.saturating_sub(buffer_start);
                    voice.start_at = None;
                }
                let step = voice.sound.sample_rate() as f64 / device_rate * voice.pitch as f64;
                let length = voice.sound.frames() as f64;
                let gain = voice.volume * master;
                for frame in first..frames {
                    if voice.cursor >= length {
                        break;
                    }
                    let base = frame as usize * channels;
                    for c in 0..channels {
                        out[base + c] += voice.sound.sample_at(voice.cursor, c) * gain;
                    }
                    voice.cursor += step;
                }
                if voice.cursor >= length {
                    voice.cursor = length;
                    voice.finished = true;
                }
            }
            self.groups[group.index()].frames = buffer_start + frames;
        }

        self.slots.retain(|voice| !(voice.one_shot && voice.finished));
        for sample in out.iter_mut() {
            *sample = sample.clamp(-1.0, 1.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn constant_sound(frames: usize, rate: u32) -> SoundData {
        SoundData::from_pcm(vec![0.5; frames], 1, rate).unwrap()
    }

    #[test]
    fn test_render_advances_clock_by_buffer() {
        let mut mixer = Mixer::new(1000, 4);
        let mut out = vec![0.0; 200];
        mixer.render(&mut out, 2, 1.0);
        assert_eq!(mixer.group_frames(MixGroup::Music), 100);
        assert_eq!(mixer.group_frames(MixGroup::Sfx), 100);
    }

    #[test]
    fn test_scheduled_voice_is_silent_until_deadline() {
        let mut mixer = Mixer::new(1000, 4);
        let sound = mixer.add_sound(constant_sound(1000, 1000));
        let channel = mixer.start(sound, MixGroup::Music, Some(30)).unwrap();

        let mut out = vec![0.0; 100];
        mixer.render(&mut out, 1, 1.0);
        assert!(out[..30].iter().all(|&s| s == 0.0));
        assert!(out[30..].iter().all(|&s| (s - 0.5).abs() < 1e-6));
        assert_eq!(mixer.slots().get(channel).unwrap().cursor as u64, 70);
    }

    #[test]
    fn test_master_and_channel_volume_apply() {
        let mut mixer = Mixer::new(1000, 4);
        let sound = mixer.add_sound(constant_sound(1000, 1000));
        let channel = mixer.start(sound, MixGroup::Music, None).unwrap();
        mixer.slots_mut().get_mut(channel).unwrap().volume = 0.5;

        let mut out = vec![0.0; 10];
        mixer.render(&mut out, 1, 0.5);
        assert!(out.iter().all(|&s| (s - 0.125).abs() < 1e-6));
    }

    #[test]
    fn test_paused_group_keeps_clock_and_skips_voices() {
        let mut mixer = Mixer::new(1000, 4);
        let sound = mixer.add_sound(constant_sound(1000, 1000));
        mixer.start(sound, MixGroup::Music, None).unwrap();
        mixer.set_group_paused(MixGroup::Music, true);

        let mut out = vec![0.0; 50];
        mixer.render(&mut out, 1, 1.0);
        assert_eq!(mixer.group_frames(MixGroup::Music), 0);
        assert_eq!(mixer.group_frames(MixGroup::Sfx), 50);
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_finished_one_shot_is_released() {
        let mut mixer = Mixer::new(1000, 4);
        let sound = mixer.add_sound(constant_sound(10, 1000));
        let sfx = mixer.start(sound, MixGroup::Sfx, None).unwrap();
        let music = mixer.start(sound, MixGroup::Music, None).unwrap();

        let mut out = vec![0.0; 20];
        mixer.render(&mut out, 1, 1.0);
        assert!(!mixer.slots().contains(sfx));
        assert!(mixer.slots().get(music).unwrap().finished);
    }

    #[test]
    fn test_device_rate_change_rescales_deadlines() {
        let mut mixer = Mixer::new(1000, 4);
        let sound = mixer.add_sound(constant_sound(10, 1000));
        let channel = mixer.start(sound, MixGroup::Music, Some(500)).unwrap();
        mixer.set_device_rate(2000);
        assert_eq!(mixer.slots().get(channel).unwrap().start_at, Some(1000));
    }

    #[test]
    fn test_unknown_sound_is_rejected() {
        let mut mixer = Mixer::new(1000, 4);
        assert_eq!(
            mixer.start(SoundHandle(9), MixGroup::Music, None),
            Err(AudioError::UnknownSound { sound: 9 })
        );
    }
}
