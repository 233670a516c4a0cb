// Rhythm Playback Core - scheduled music playback with drift-free timing
// Sample-accurate scheduling, per-frame time interpolation and finish policy

// Module declarations
pub mod audio;
pub mod config;
pub mod engine;
pub mod error;
pub mod playback;
pub mod settings;
pub mod telemetry;
pub mod testing;
pub mod timing;

// Re-exports for convenience
pub use config::AppConfig;
pub use engine::backend::{
    AudioBackend, ChannelHandle, FrameClock, MixGroup, SoundHandle, TimingMode,
};
pub use error::AudioError;
pub use playback::{PlaybackSession, PlaybackState};
pub use telemetry::{FinishedInfo, PlaybackEvent};

/// Install the process-wide tracing subscriber. `log` records are bridged
/// into it, so both logging styles used by the crate end up in one place.
/// Safe to call more than once; later calls are ignored.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt().try_init();
}
