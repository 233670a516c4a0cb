//! Playback telemetry event types emitted by sessions to CLI and app
//! subscribers.

use serde::{Deserialize, Serialize};

use crate::engine::backend::SoundHandle;

/// Non-fatal conditions a session recovered from on its own.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionWarning {
    /// A previous run was still active or left a non-zero position behind
    StalePlaybackStopped,
    /// The music channel disappeared (stolen or released by the backend)
    ChannelLost,
    /// A backend query failed during the frame update
    BackendQueryFailed,
}

/// Session lifecycle events. Times are session seconds (`current_time`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum PlaybackEvent {
    Scheduled {
        sound: SoundHandle,
        waiting_delay: f32,
        offset: f32,
        start_secs: f64,
        deadline_ticks: u64,
    },
    StartedImmediately {
        sound: SoundHandle,
        waiting_delay: f32,
        offset: f32,
    },
    Paused {
        current_time: f64,
    },
    Resumed {
        current_time: f64,
    },
    Stopped {
        current_time: f64,
    },
    Finished {
        current_time: f64,
        clip_length: f64,
    },
    OneShot {
        sound: SoundHandle,
        pitch: f32,
    },
    Warning {
        code: SessionWarning,
        context: String,
    },
}
