//! Deterministic harness utilities.
//!
//! Unlike the rest of the crate these helpers never touch real hardware:
//! [`SimulatedRig`] steps a [`SimulatedBackend`] and a [`ManualFrameClock`]
//! in lockstep so sessions can be driven frame by frame. The module is part
//! of the public API so integration tests and the CLI simulator share it.

use std::sync::{Arc, Mutex, MutexGuard};

use once_cell::sync::Lazy;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::PlaybackConfig;
use crate::engine::backend::{
    ManualFrameClock, SimulatedBackend, SoundHandle, TimingMode,
};
use crate::error::AudioError;
use crate::playback::PlaybackSession;
use crate::settings;

static SETTINGS_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

/// Serialize tests that touch the process-wide settings and start each of
/// them from defaults.
pub fn settings_guard() -> MutexGuard<'static, ()> {
    let guard = SETTINGS_LOCK
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    settings::reset();
    guard
}

/// Simulated backend plus manual frame clock, advanced together.
pub struct SimulatedRig {
    pub backend: Arc<SimulatedBackend>,
    pub clock: Arc<ManualFrameClock>,
}

impl SimulatedRig {
    pub fn new(mode: TimingMode) -> Self {
        Self::with_backend(SimulatedBackend::new(mode))
    }

    pub fn with_backend(backend: SimulatedBackend) -> Self {
        Self {
            backend: Arc::new(backend),
            clock: Arc::new(ManualFrameClock::new()),
        }
    }

    pub fn session(&self) -> PlaybackSession {
        self.session_with_config(&PlaybackConfig::default())
    }

    pub fn session_with_config(&self, config: &PlaybackConfig) -> PlaybackSession {
        PlaybackSession::with_config(self.backend.clone(), self.clock.clone(), config)
    }

    pub fn sound(&self, length_secs: f64, sample_rate: u32) -> Result<SoundHandle, AudioError> {
        self.backend.register_sound(length_secs, sample_rate)
    }

    /// Move both clocks forward by `dt` seconds.
    pub fn step(&self, dt: f64) -> Result<(), AudioError> {
        self.clock.advance(dt);
        self.backend.advance(dt)
    }

    /// Step one frame of `dt` seconds and update the session.
    pub fn frame(&self, session: &mut PlaybackSession, dt: f64) -> Result<(), AudioError> {
        self.step(dt)?;
        session.update();
        Ok(())
    }

    /// Run `secs` seconds of frames at `fps`, updating the session every
    /// frame. Returns `current_time` after each frame.
    pub fn run(
        &self,
        session: &mut PlaybackSession,
        secs: f64,
        fps: f64,
    ) -> Result<Vec<f64>, AudioError> {
        let dt = 1.0 / fps;
        let frames = (secs * fps).round() as usize;
        let mut times = Vec::with_capacity(frames);
        for _ in 0..frames {
            self.frame(session, dt)?;
            times.push(session.current_time());
        }
        Ok(times)
    }

    /// Like [`SimulatedRig::run`] but with seeded frame-time jitter and
    /// occasional long hitches.
    pub fn run_jittered(
        &self,
        session: &mut PlaybackSession,
        secs: f64,
        fps: f64,
        seed: u64,
    ) -> Result<Vec<f64>, AudioError> {
        let mut elapsed = 0.0;
        let mut times = Vec::new();
        for dt in FrameDeltas::jittered(fps, seed) {
            if elapsed >= secs {
                break;
            }
            self.frame(session, dt)?;
            elapsed += dt;
            times.push(session.current_time());
        }
        Ok(times)
    }
}

/// Endless sequence of rendering-frame durations.
///
/// Steady deltas are exactly `1 / fps`. Jittered deltas vary between 0.7x
/// and 1.3x the nominal frame, with a 5% chance per frame of a hitch of 3x
/// to 12x.
pub struct FrameDeltas {
    nominal: f64,
    rng: Option<StdRng>,
}

impl FrameDeltas {
    pub fn steady(fps: f64) -> Self {
        Self {
            nominal: 1.0 / fps.max(1.0),
            rng: None,
        }
    }

    pub fn jittered(fps: f64, seed: u64) -> Self {
        Self {
            nominal: 1.0 / fps.max(1.0),
            rng: Some(StdRng::seed_from_u64(seed)),
        }
    }
}

impl Iterator for FrameDeltas {
    type Item = f64;

    fn next(&mut self) -> Option<f64> {
        let Some(rng) = self.rng.as_mut() else {
            return Some(self.nominal);
        };
        let scale = if rng.gen_bool(0.05) {
            rng.gen_range(3.0..12.0)
        } else {
            rng.gen_range(0.7..1.3)
        };
        Some(self.nominal * scale)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::backend::{AudioBackend, FrameClock};

    #[test]
    fn step_moves_both_clocks() {
        let rig = SimulatedRig::new(TimingMode::SampleCursor);
        // 0.07s at 48 kHz is 3360 frames: three whole 1024-frame buffers
        rig.step(0.07).unwrap();
        assert!((rig.clock.now() - 0.07).abs() < 1e-12);
        assert_eq!(rig.backend.now().unwrap(), 3 * rig.backend.buffer_size() as u64);
    }

    #[test]
    fn jittered_run_is_reproducible() {
        let first = {
            let rig = SimulatedRig::new(TimingMode::MixClock);
            let mut session = rig.session();
            let sound = rig.sound(1.0, 44100).unwrap();
            session.play_music_with_delay(sound, 0.5, 0.0).unwrap();
            rig.run_jittered(&mut session, 1.0, 60.0, 7).unwrap()
        };
        let second = {
            let rig = SimulatedRig::new(TimingMode::MixClock);
            let mut session = rig.session();
            let sound = rig.sound(1.0, 44100).unwrap();
            session.play_music_with_delay(sound, 0.5, 0.0).unwrap();
            rig.run_jittered(&mut session, 1.0, 60.0, 7).unwrap()
        };
        assert_eq!(first, second);
    }

    #[test]
    fn frame_deltas_stay_within_bounds() {
        let nominal = 1.0 / 60.0;
        assert!(FrameDeltas::steady(60.0).take(10).all(|dt| dt == nominal));
        assert!(FrameDeltas::jittered(60.0, 3)
            .take(1000)
            .all(|dt| dt >= nominal * 0.7 && dt < nominal * 12.0));
    }
}
