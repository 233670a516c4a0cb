//! PlaybackSession: scheduled music playback with drift-free timing.
//!
//! A session schedules one music track on the backend's music group, then
//! derives `current_time` every rendering frame from two interpolated
//! sources: the mix clock (pre-roll, and after the clip ends) and the
//! channel's sample cursor (while sounding, on sample-cursor backends).
//! Once the waiting delay is done a sounding clip reads as
//! `cursor + waiting_delay`, and the clip ends at `waiting_delay + length`
//! in both timing modes.
//! Completion is detected inside [`PlaybackSession::update`], which also
//! applies the finish policy (callback offset, endless mode).
//!
//! Sessions are driven from a single thread. Backends render on their own
//! thread and are only queried here.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::config::PlaybackConfig;
use crate::engine::backend::{
    AudioBackend, ChannelHandle, FrameClock, MixGroup, SoundHandle, TimingMode,
};
use crate::error::{log_audio_error, AudioError};
use crate::settings;
use crate::telemetry::{
    EventCollector, FinishedInfo, FinishedListener, FinishedListeners, PlaybackEvent,
    SessionWarning, SubscriptionId, TelemetrySnapshot,
};
use crate::timing::{DelayPolicy, Interpolator, SchedulePlan};

/// Priority given to the music channel (0 = most important).
pub const MUSIC_PRIORITY: u8 = 0;

/// Coarse session state derived from the flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackState {
    /// Nothing scheduled
    Idle,
    /// Armed and waiting for the scheduled start
    Delaying,
    /// The sound is producing audio
    Sounding,
    /// The clip ended; time keeps advancing until the finish policy stops
    /// the session (or forever in endless mode)
    Finished,
    /// Paused with a channel that can be resumed
    Paused,
}

pub struct PlaybackSession {
    backend: Arc<dyn AudioBackend>,
    frame_clock: Arc<dyn FrameClock>,
    delay_policy: DelayPolicy,

    channel: Option<ChannelHandle>,
    sound: Option<SoundHandle>,

    is_playing: bool,
    is_clip_playing: bool,
    clip_started: bool,
    clip_ended: bool,
    action_invoked: bool,
    channel_lost: bool,

    waiting_delay: f32,
    current_time: f64,
    clock_elapsed: f64,
    start_reference: u64,
    start_reference_secs: f64,
    /// Backend clock rate the tick values above are expressed in
    clock_rate: u32,
    start_secs: f64,
    clip_length: f64,
    clip_end: f64,
    /// Offset between the mix clock and `current_time` once the clip ended
    end_anchor: f64,

    finished_call_offset: f32,
    audio_endless: bool,

    clock_interp: Interpolator,
    cursor_interp: Interpolator,

    listeners: FinishedListeners,
    events: EventCollector,
}

impl PlaybackSession {
    pub fn new(backend: Arc<dyn AudioBackend>, frame_clock: Arc<dyn FrameClock>) -> Self {
        Self::with_config(backend, frame_clock, &PlaybackConfig::default())
    }

    pub fn with_config(
        backend: Arc<dyn AudioBackend>,
        frame_clock: Arc<dyn FrameClock>,
        config: &PlaybackConfig,
    ) -> Self {
        let rate = backend.clock_rate();
        Self {
            backend,
            frame_clock,
            delay_policy: DelayPolicy::from_config(config),
            channel: None,
            sound: None,
            is_playing: false,
            is_clip_playing: false,
            clip_started: false,
            clip_ended: false,
            action_invoked: false,
            channel_lost: false,
            waiting_delay: 0.0,
            current_time: 0.0,
            clock_elapsed: 0.0,
            start_reference: 0,
            start_reference_secs: 0.0,
            clock_rate: rate.max(1),
            start_secs: 0.0,
            clip_length: 0.0,
            clip_end: 0.0,
            end_anchor: 0.0,
            finished_call_offset: sanitize_offset(config.finished_call_offset_secs),
            audio_endless: config.audio_endless,
            clock_interp: Interpolator::new(rate),
            cursor_interp: Interpolator::new(rate),
            listeners: FinishedListeners::new(),
            events: EventCollector::default(),
        }
    }

    pub fn set_delay_policy(&mut self, policy: DelayPolicy) {
        self.delay_policy = policy;
    }

    pub fn delay_policy(&self) -> &DelayPolicy {
        &self.delay_policy
    }

    // ========================================================================
    // TRANSPORT
    // ========================================================================

    /// Play `sound` after the heuristic pre-roll delay.
    pub fn play_music(&mut self, sound: SoundHandle, offset: f32) -> Result<(), AudioError> {
        let delay = self.delay_policy.compute_delay(self.frame_clock.delta());
        self.play_music_with_delay(sound, delay, offset)
    }

    /// Play `sound` after `delay` seconds, shifted by `offset` seconds.
    ///
    /// A positive offset starts the audio later. A negative offset starts it
    /// earlier: `|offset|` is added to the waiting delay so the chart zero
    /// point moves while the audio keeps its `delay` start.
    ///
    /// # Errors
    /// Backend failures (no device, channels exhausted, unknown sound) are
    /// returned and leave the session stopped.
    pub fn play_music_with_delay(
        &mut self,
        sound: SoundHandle,
        delay: f32,
        offset: f32,
    ) -> Result<(), AudioError> {
        self.stop_previous_run();

        let plan = SchedulePlan::new(delay, offset)?;
        let clip_length = self.backend.sound_length(sound)?;
        let sample_rate = self.backend.sound_sample_rate(sound)?;
        let rate = self.backend.clock_rate().max(1);
        let start = self.backend.now()?;

        let (channel, event) = if plan.immediate {
            let channel = self.backend.play_immediate(sound, MixGroup::Music)?;
            (
                channel,
                PlaybackEvent::StartedImmediately {
                    sound,
                    waiting_delay: plan.waiting_delay,
                    offset,
                },
            )
        } else {
            let deadline = plan.deadline_ticks(start, rate);
            let channel = self.backend.schedule_start(sound, deadline)?;
            (
                channel,
                PlaybackEvent::Scheduled {
                    sound,
                    waiting_delay: plan.waiting_delay,
                    offset,
                    start_secs: plan.start_secs,
                    deadline_ticks: deadline,
                },
            )
        };

        if let Err(err) = self.configure_music_channel(channel) {
            let _ = self.backend.stop(channel);
            return Err(err);
        }

        let wall = self.frame_clock.now();
        self.channel = Some(channel);
        self.sound = Some(sound);
        self.is_playing = true;
        self.is_clip_playing = false;
        self.clip_started = false;
        self.clip_ended = false;
        self.action_invoked = false;
        self.channel_lost = false;
        self.waiting_delay = plan.waiting_delay;
        self.current_time = 0.0;
        self.clock_elapsed = 0.0;
        self.start_reference = start;
        self.start_reference_secs = start as f64 / rate as f64;
        self.clock_rate = rate;
        self.start_secs = plan.start_secs;
        self.clip_length = clip_length;
        self.clip_end = plan.waiting_delay as f64 + clip_length;
        self.end_anchor = 0.0;
        self.clock_interp = Interpolator::new(rate);
        self.clock_interp.reseed(start, wall);
        self.cursor_interp = Interpolator::new(sample_rate);

        log::info!(
            "[PlaybackSession] {} on channel {}: delay={:.3}s offset={:.3}s start={:.3}s length={:.3}s",
            sound,
            channel,
            plan.waiting_delay,
            offset,
            plan.start_secs,
            clip_length
        );
        self.events.publish(event);
        Ok(())
    }

    /// Pause the music channel and its group clock. No-op when not playing.
    pub fn pause(&mut self) {
        if !self.is_playing {
            return;
        }
        if let Some(channel) = self.channel {
            if let Err(err) = self.backend.pause(channel) {
                log_audio_error(&err, "PlaybackSession::pause");
            }
        }
        if let Err(err) = self.backend.set_group_paused(MixGroup::Music, true) {
            log_audio_error(&err, "PlaybackSession::pause");
        }
        self.is_playing = false;
        self.is_clip_playing = false;

        log::info!("[PlaybackSession] Paused at {:.3}s", self.current_time);
        self.events.publish(PlaybackEvent::Paused {
            current_time: self.current_time,
        });
    }

    /// Resume a paused session. No-op when already playing, when nothing is
    /// scheduled, or when neither the sample cursor nor the mix clock moved
    /// since the play call.
    pub fn unpause(&mut self) {
        if self.is_playing {
            return;
        }
        let Some(channel) = self.channel else {
            return;
        };
        if !self.backend.is_valid(channel) || !self.has_elapsed_position(channel) {
            return;
        }

        let wall = self.frame_clock.now();
        self.clock_interp.rebase(wall);
        self.cursor_interp.rebase(wall);

        if let Err(err) = self.backend.unpause(channel) {
            log_audio_error(&err, "PlaybackSession::unpause");
        }
        if let Err(err) = self.backend.set_group_paused(MixGroup::Music, false) {
            log_audio_error(&err, "PlaybackSession::unpause");
        }
        self.is_playing = true;
        self.is_clip_playing = self.clip_started && !self.clip_ended;

        log::info!("[PlaybackSession] Resumed at {:.3}s", self.current_time);
        self.events.publish(PlaybackEvent::Resumed {
            current_time: self.current_time,
        });
    }

    /// Halt and release the music channel. Never fires the finished
    /// callback. Safe to call repeatedly.
    pub fn stop(&mut self) {
        let was_active = self.is_playing || self.channel.is_some();
        self.is_playing = false;
        self.is_clip_playing = false;
        self.action_invoked = false;
        self.end_anchor = 0.0;
        self.release_channel();

        if was_active {
            log::info!("[PlaybackSession] Stopped at {:.3}s", self.current_time);
            self.events.publish(PlaybackEvent::Stopped {
                current_time: self.current_time,
            });
        }
    }

    /// Fire-and-forget playback on the sfx group at the "other" volume.
    /// Independent of the scheduled track.
    pub fn play_one_shot(
        &self,
        sound: SoundHandle,
        pitch: f32,
    ) -> Result<ChannelHandle, AudioError> {
        let channel = self.backend.play_immediate(sound, MixGroup::Sfx)?;
        let configured = self
            .backend
            .set_volume(channel, settings::other_volume())
            .and_then(|_| self.backend.set_pitch(channel, pitch));
        if let Err(err) = configured {
            let _ = self.backend.stop(channel);
            return Err(err);
        }

        log::debug!("[PlaybackSession] One-shot {} at pitch {:.2}", sound, pitch);
        self.events.publish(PlaybackEvent::OneShot { sound, pitch });
        Ok(channel)
    }

    // ========================================================================
    // FRAME UPDATE
    // ========================================================================

    /// Advance session time for the current rendering frame and apply the
    /// finish policy. Call once per frame.
    pub fn update(&mut self) {
        if !self.is_playing {
            return;
        }
        let Some(channel) = self.channel else {
            self.stop();
            return;
        };

        let wall = self.frame_clock.now();
        let raw_clock = match self.backend.now() {
            Ok(ticks) => ticks,
            Err(err) => {
                self.report_backend_error(&err, "PlaybackSession::update");
                return;
            }
        };
        let rate = self.backend.clock_rate().max(1);
        if rate != self.clock_rate {
            self.follow_clock_rate(rate, raw_clock, wall);
        }
        self.clock_elapsed =
            (self.clock_interp.update(raw_clock, wall) - self.start_reference_secs).max(0.0);

        let live = self.backend.is_valid(channel);
        if !live && !self.channel_lost {
            self.channel_lost = true;
            log::warn!("[PlaybackSession] Channel {} is no longer valid", channel);
            self.events.publish(PlaybackEvent::Warning {
                code: SessionWarning::ChannelLost,
                context: channel.to_string(),
            });
        }
        let producing = live && self.backend.is_producing_output(channel).unwrap_or(false);

        let next = match self.backend.timing_mode() {
            TimingMode::SampleCursor => self.sample_cursor_time(channel, live, producing, wall),
            TimingMode::MixClock => self.mix_clock_time(producing),
        };
        if next > self.current_time {
            self.current_time = next;
        }

        tracing::trace!(
            current_time = self.current_time,
            clock_elapsed = self.clock_elapsed,
            clip_playing = self.is_clip_playing,
            "[PlaybackSession] frame"
        );

        if self.clip_ended {
            self.apply_finish_policy();
        }
    }

    fn sample_cursor_time(
        &mut self,
        channel: ChannelHandle,
        live: bool,
        producing: bool,
        wall: f64,
    ) -> f64 {
        if self.clip_ended {
            return self.clock_elapsed - self.end_anchor;
        }

        let waiting_done = self.clock_elapsed >= self.waiting_delay as f64;
        if producing {
            let cursor = self.backend.sample_cursor(channel).unwrap_or(0);
            self.is_clip_playing = cursor > 0;
            self.clip_started |= cursor > 0;
            if waiting_done && cursor > 0 {
                return self.cursor_interp.update(cursor, wall) + self.waiting_delay as f64;
            }
            return self.clock_elapsed;
        }

        if !waiting_done {
            self.is_clip_playing = false;
            return self.clock_elapsed;
        }

        // The source stopped producing output: continue on the mix clock
        // from where the clip left off.
        let end_time = if live {
            self.current_time.max(self.clip_end)
        } else {
            self.current_time
        };
        self.clip_ended = true;
        self.is_clip_playing = false;
        self.end_anchor = self.clock_elapsed - end_time;
        tracing::debug!(
            end_time,
            clock_elapsed = self.clock_elapsed,
            "[PlaybackSession] Clip stopped producing output"
        );
        end_time
    }

    fn mix_clock_time(&mut self, producing: bool) -> f64 {
        let elapsed = self.clock_elapsed;
        if !self.clip_ended {
            if elapsed >= self.clip_end {
                self.clip_ended = true;
                self.is_clip_playing = false;
                tracing::debug!(elapsed, "[PlaybackSession] Clip end reached on mix clock");
            } else {
                let sounding = producing && elapsed >= self.start_secs;
                self.is_clip_playing = sounding;
                self.clip_started |= sounding;
            }
        }
        elapsed
    }

    fn apply_finish_policy(&mut self) {
        // Endless switched off after the callback already fired
        if !self.audio_endless && self.action_invoked {
            self.stop();
            return;
        }

        let fire_at = self.clip_end + self.finished_call_offset as f64;
        if !self.action_invoked && self.current_time >= fire_at {
            self.action_invoked = true;
            let info = FinishedInfo {
                current_time: self.current_time,
                clip_length: self.clip_length,
                waiting_delay: self.waiting_delay,
            };
            log::info!(
                "[PlaybackSession] Finished at {:.3}s (endless={})",
                self.current_time,
                self.audio_endless
            );
            self.events.publish(PlaybackEvent::Finished {
                current_time: self.current_time,
                clip_length: self.clip_length,
            });
            self.listeners.notify(&info);

            if !self.audio_endless {
                self.stop();
            }
        }
    }

    // ========================================================================
    // HELPERS
    // ========================================================================

    fn configure_music_channel(&self, channel: ChannelHandle) -> Result<(), AudioError> {
        self.backend.set_volume(channel, settings::music_volume())?;
        self.backend.set_priority(channel, MUSIC_PRIORITY)?;
        self.backend.set_pitch(channel, 1.0)
    }

    /// Stop whatever the previous play call left behind. A paused or idle
    /// channel that still reports a non-zero position is treated as stale.
    fn stop_previous_run(&mut self) {
        let stale = !self.is_playing
            && self
                .channel
                .map(|channel| self.has_stale_position(channel))
                .unwrap_or(false);

        if self.is_playing || stale {
            if stale {
                log::debug!("[PlaybackSession] Stopping stale channel before replay");
                self.events.publish(PlaybackEvent::Warning {
                    code: SessionWarning::StalePlaybackStopped,
                    context: "play".to_string(),
                });
            }
            self.stop();
        } else {
            self.release_channel();
        }
    }

    fn has_stale_position(&self, channel: ChannelHandle) -> bool {
        self.backend.is_valid(channel)
            && self
                .backend
                .sample_cursor(channel)
                .map(|cursor| cursor > 0)
                .unwrap_or(false)
    }

    fn has_elapsed_position(&self, channel: ChannelHandle) -> bool {
        let cursor_moved = self
            .backend
            .sample_cursor(channel)
            .map(|cursor| cursor > 0)
            .unwrap_or(false);
        let clock_moved = self
            .backend
            .now()
            .map(|now| now > self.start_reference)
            .unwrap_or(false);
        cursor_moved || clock_moved
    }

    fn release_channel(&mut self) {
        let Some(channel) = self.channel.take() else {
            return;
        };
        if let Err(err) = self.backend.set_group_paused(MixGroup::Music, false) {
            log_audio_error(&err, "PlaybackSession::release_channel");
        }
        if self.backend.is_valid(channel) {
            if let Err(err) = self.backend.stop(channel) {
                log_audio_error(&err, "PlaybackSession::release_channel");
            }
        }
    }

    /// The device rate changed under a running session (stream rebuilt on
    /// another device). The backend rescaled its clock, so only the tick
    /// units change here; the start reference keeps its value in seconds.
    fn follow_clock_rate(&mut self, rate: u32, raw_clock: u64, wall: f64) {
        log::info!(
            "[PlaybackSession] Clock rate changed {} Hz -> {} Hz at {:.3}s",
            self.clock_rate,
            rate,
            self.current_time
        );
        let ratio = rate as f64 / self.clock_rate as f64;
        self.start_reference = (self.start_reference as f64 * ratio).round() as u64;
        self.clock_interp = Interpolator::new(rate);
        self.clock_interp.reseed(raw_clock, wall);
        self.clock_rate = rate;
    }

    fn report_backend_error(&self, err: &AudioError, context: &str) {
        log_audio_error(err, context);
        self.events.publish(PlaybackEvent::Warning {
            code: SessionWarning::BackendQueryFailed,
            context: format!("{}: {}", context, err),
        });
    }

    // ========================================================================
    // OBSERVABLES
    // ========================================================================

    /// True while the session is armed, delaying or playing.
    pub fn is_playing(&self) -> bool {
        self.is_playing
    }

    /// True only while the sound is actually producing audio.
    pub fn is_clip_playing(&self) -> bool {
        self.is_clip_playing
    }

    /// Session seconds since the play call, pre-roll included.
    pub fn current_time(&self) -> f64 {
        self.current_time
    }

    /// Seconds since the chart zero point (`current_time - waiting_delay`),
    /// never negative.
    pub fn current_actual_time(&self) -> f64 {
        (self.current_time - self.waiting_delay as f64).max(0.0)
    }

    pub fn waiting_delay(&self) -> f32 {
        self.waiting_delay
    }

    /// Whether the mix clock has passed the waiting delay since the play
    /// call. Always false without a scheduled channel.
    pub fn is_waiting_delay_finished(&self) -> bool {
        if self.channel.is_none() {
            return false;
        }
        let rate = self.backend.clock_rate().max(1) as f64;
        let elapsed = self
            .backend
            .now()
            .map(|now| now.saturating_sub(self.start_reference) as f64 / rate)
            .unwrap_or(self.clock_elapsed);
        elapsed >= self.waiting_delay as f64
    }

    pub fn clip_length(&self) -> f64 {
        self.clip_length
    }

    pub fn sound(&self) -> Option<SoundHandle> {
        self.sound
    }

    pub fn channel(&self) -> Option<ChannelHandle> {
        self.channel
    }

    pub fn state(&self) -> PlaybackState {
        if !self.is_playing {
            if self.channel.is_some() {
                PlaybackState::Paused
            } else {
                PlaybackState::Idle
            }
        } else if self.clip_ended {
            PlaybackState::Finished
        } else if self.is_clip_playing {
            PlaybackState::Sounding
        } else {
            PlaybackState::Delaying
        }
    }

    // ========================================================================
    // CONFIGURATION
    // ========================================================================

    pub fn audio_endless(&self) -> bool {
        self.audio_endless
    }

    /// When true the session survives the clip's natural end. Switching it
    /// off after the finished callback fired stops the session on the next
    /// update.
    pub fn set_audio_endless(&mut self, endless: bool) {
        self.audio_endless = endless;
    }

    pub fn finished_call_offset(&self) -> f32 {
        self.finished_call_offset
    }

    /// Grace period after the clip end before the finished callback fires.
    /// Negative or non-finite values are treated as 0.
    pub fn set_finished_call_offset(&mut self, secs: f32) {
        self.finished_call_offset = sanitize_offset(secs);
    }

    // ========================================================================
    // SUBSCRIPTIONS
    // ========================================================================

    pub fn subscribe_finished<L>(&mut self, listener: L) -> SubscriptionId
    where
        L: FinishedListener + 'static,
    {
        self.listeners.subscribe(Arc::new(listener))
    }

    pub fn unsubscribe_finished(&mut self, id: SubscriptionId) -> bool {
        self.listeners.unsubscribe(id)
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<PlaybackEvent> {
        self.events.subscribe()
    }

    pub fn telemetry_snapshot(&self) -> TelemetrySnapshot {
        self.events.snapshot()
    }
}

impl Drop for PlaybackSession {
    fn drop(&mut self) {
        self.release_channel();
    }
}

fn sanitize_offset(secs: f32) -> f32 {
    if secs.is_finite() {
        secs.max(0.0)
    } else {
        0.0
    }
}
