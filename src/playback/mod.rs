//! Scheduled music playback.
//!
//! [`PlaybackSession`] is the public entry point: one session per music
//! output, driven once per rendering frame through [`PlaybackSession::update`].

pub mod session;

pub use session::{PlaybackSession, PlaybackState, MUSIC_PRIORITY};
