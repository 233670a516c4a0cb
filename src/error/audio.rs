// Audio error types and constants

use crate::error::ErrorCode;
use log::error;
use std::fmt;

/// Audio error code constants
///
/// These constants provide a single source of truth for error codes
/// reported by backends and playback sessions.
///
/// Error code range: 1001-1012
pub struct AudioErrorCodes {}

impl AudioErrorCodes {
    /// No output device is available (missing or disconnected)
    pub const NO_OUTPUT_DEVICE: i32 = 1001;

    /// Every backend channel slot is busy with more important playback
    pub const CHANNELS_EXHAUSTED: i32 = 1002;

    /// Channel handle belongs to a stopped or recycled channel
    pub const STALE_HANDLE: i32 = 1003;

    /// Sound handle is not registered with the backend
    pub const UNKNOWN_SOUND: i32 = 1004;

    /// Failed to open audio stream
    pub const STREAM_OPEN_FAILED: i32 = 1005;

    /// Hardware error occurred
    pub const HARDWARE_ERROR: i32 = 1006;

    /// Mutex/RwLock was poisoned
    pub const LOCK_POISONED: i32 = 1007;

    /// Backend does not provide the requested capability
    pub const UNSUPPORTED: i32 = 1008;

    /// Sound data is unusable (empty, zero channels, zero sample rate)
    pub const INVALID_SOUND: i32 = 1009;

    /// Parameter outside its accepted range
    pub const INVALID_PARAMETER: i32 = 1010;

    /// Audio stream disconnected or audio thread exited unexpectedly
    pub const STREAM_FAILURE: i32 = 1011;

    /// Audio file could not be decoded
    pub const DECODE_FAILED: i32 = 1012;
}

/// Log an audio error with structured context
///
/// This function logs audio errors with structured fields including:
/// - error_code: Numeric error code for programmatic handling
/// - component: The component where the error occurred
/// - message: Human-readable error message
/// - context: Additional contextual information
///
/// The logging is non-blocking and will not panic on failure.
pub fn log_audio_error(err: &AudioError, context: &str) {
    error!(
        "Audio error in {}: code={}, component=PlaybackSession, message={}",
        context,
        err.code(),
        err.message()
    );
}

/// Audio-related errors
///
/// These errors cover backend resource allocation, stream management,
/// handle validity and sound decoding.
///
/// Error code ranges: 1001-1012
#[derive(Debug, Clone, PartialEq)]
pub enum AudioError {
    /// No output device is available
    NoOutputDevice,

    /// All channel slots are busy
    ChannelsExhausted { limit: usize },

    /// Handle refers to a channel from a previous session
    StaleHandle { handle: String },

    /// Sound handle not registered with this backend
    UnknownSound { sound: u64 },

    /// Failed to open audio stream
    StreamOpenFailed { reason: String },

    /// Hardware error occurred
    HardwareError { details: String },

    /// Mutex/RwLock was poisoned
    LockPoisoned { component: String },

    /// Capability not provided by this backend
    Unsupported { operation: String },

    /// Sound data is unusable
    InvalidSound { reason: String },

    /// Parameter outside its accepted range
    InvalidParameter { name: String, value: String },

    /// Stream channel disconnected unexpectedly
    StreamFailure { reason: String },

    /// Audio file could not be decoded
    DecodeFailed { reason: String },
}

impl AudioError {
    /// Convenience constructor for [`AudioError::Unsupported`].
    pub fn unsupported(operation: &str) -> Self {
        AudioError::Unsupported {
            operation: operation.to_string(),
        }
    }

    /// Convenience constructor for [`AudioError::LockPoisoned`].
    pub fn poisoned(component: &str) -> Self {
        AudioError::LockPoisoned {
            component: component.to_string(),
        }
    }
}

impl ErrorCode for AudioError {
    fn code(&self) -> i32 {
        match self {
            AudioError::NoOutputDevice => AudioErrorCodes::NO_OUTPUT_DEVICE,
            AudioError::ChannelsExhausted { .. } => AudioErrorCodes::CHANNELS_EXHAUSTED,
            AudioError::StaleHandle { .. } => AudioErrorCodes::STALE_HANDLE,
            AudioError::UnknownSound { .. } => AudioErrorCodes::UNKNOWN_SOUND,
            AudioError::StreamOpenFailed { .. } => AudioErrorCodes::STREAM_OPEN_FAILED,
            AudioError::HardwareError { .. } => AudioErrorCodes::HARDWARE_ERROR,
            AudioError::LockPoisoned { .. } => AudioErrorCodes::LOCK_POISONED,
            AudioError::Unsupported { .. } => AudioErrorCodes::UNSUPPORTED,
            AudioError::InvalidSound { .. } => AudioErrorCodes::INVALID_SOUND,
            AudioError::InvalidParameter { .. } => AudioErrorCodes::INVALID_PARAMETER,
            AudioError::StreamFailure { .. } => AudioErrorCodes::STREAM_FAILURE,
            AudioError::DecodeFailed { .. } => AudioErrorCodes::DECODE_FAILED,
        }
    }

    fn message(&self) -> String {
        match self {
            AudioError::NoOutputDevice => "No audio output device available".to_string(),
            AudioError::ChannelsExhausted { limit } => {
                format!("All {} channels are in use by higher priority playback", limit)
            }
            AudioError::StaleHandle { handle } => {
                format!("Channel handle {} is no longer valid", handle)
            }
            AudioError::UnknownSound { sound } => {
                format!("Sound {} is not registered with this backend", sound)
            }
            AudioError::StreamOpenFailed { reason } => {
                format!("Failed to open audio stream: {}", reason)
            }
            AudioError::HardwareError { details } => {
                format!("Hardware error: {}", details)
            }
            AudioError::LockPoisoned { component } => {
                format!("Lock poisoned on {}", component)
            }
            AudioError::Unsupported { operation } => {
                format!("Backend does not support {}", operation)
            }
            AudioError::InvalidSound { reason } => {
                format!("Invalid sound: {}", reason)
            }
            AudioError::InvalidParameter { name, value } => {
                format!("Invalid value for {}: {}", name, value)
            }
            AudioError::StreamFailure { reason } => {
                format!("Audio stream failed: {}", reason)
            }
            AudioError::DecodeFailed { reason } => {
                format!("Failed to decode audio: {}", reason)
            }
        }
    }
}

impl fmt::Display for AudioError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "AudioError::{:?} (code {}): {}",
            self,
            self.code(),
            self.message()
        )
    }
}

impl std::error::Error for AudioError {}

impl From<std::io::Error> for AudioError {
    fn from(err: std::io::Error) -> Self {
        AudioError::HardwareError {
            details: err.to_string(),
        }
    }
}

impl From<hound::Error> for AudioError {
    fn from(err: hound::Error) -> Self {
        AudioError::DecodeFailed {
            reason: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audio_error_codes() {
        assert_eq!(
            AudioError::NoOutputDevice.code(),
            AudioErrorCodes::NO_OUTPUT_DEVICE
        );
        assert_eq!(
            AudioError::ChannelsExhausted { limit: 4 }.code(),
            AudioErrorCodes::CHANNELS_EXHAUSTED
        );
        assert_eq!(
            AudioError::StaleHandle {
                handle: "3@1".to_string()
            }
            .code(),
            AudioErrorCodes::STALE_HANDLE
        );
        assert_eq!(
            AudioError::UnknownSound { sound: 9 }.code(),
            AudioErrorCodes::UNKNOWN_SOUND
        );
        assert_eq!(
            AudioError::poisoned("mixer").code(),
            AudioErrorCodes::LOCK_POISONED
        );
        assert_eq!(
            AudioError::unsupported("reconfigure").code(),
            AudioErrorCodes::UNSUPPORTED
        );
        assert_eq!(
            AudioError::DecodeFailed {
                reason: "test".to_string()
            }
            .code(),
            AudioErrorCodes::DECODE_FAILED
        );
    }

    #[test]
    fn test_codes_are_unique_and_in_range() {
        let codes = [
            AudioErrorCodes::NO_OUTPUT_DEVICE,
            AudioErrorCodes::CHANNELS_EXHAUSTED,
            AudioErrorCodes::STALE_HANDLE,
            AudioErrorCodes::UNKNOWN_SOUND,
            AudioErrorCodes::STREAM_OPEN_FAILED,
            AudioErrorCodes::HARDWARE_ERROR,
            AudioErrorCodes::LOCK_POISONED,
            AudioErrorCodes::UNSUPPORTED,
            AudioErrorCodes::INVALID_SOUND,
            AudioErrorCodes::INVALID_PARAMETER,
            AudioErrorCodes::STREAM_FAILURE,
            AudioErrorCodes::DECODE_FAILED,
        ];
        for (i, code) in codes.iter().enumerate() {
            assert!((1001..=1012).contains(code));
            assert!(!codes[i + 1..].contains(code), "duplicate code {}", code);
        }
    }

    #[test]
    fn test_audio_error_messages() {
        let err = AudioError::ChannelsExhausted { limit: 2 };
        assert_eq!(
            err.message(),
            "All 2 channels are in use by higher priority playback"
        );

        let err = AudioError::NoOutputDevice;
        assert!(err.message().contains("output device"));

        let err = AudioError::InvalidParameter {
            name: "music_volume".to_string(),
            value: "NaN".to_string(),
        };
        assert_eq!(err.message(), "Invalid value for music_volume: NaN");
    }

    #[test]
    fn test_audio_error_display() {
        let err = AudioError::NoOutputDevice;
        let display = format!("{}", err);
        assert!(display.contains("AudioError"));
        assert!(display.contains(&err.code().to_string()));
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::other("test io error");
        let audio_err: AudioError = io_err.into();
        match audio_err {
            AudioError::HardwareError { details } => {
                assert!(details.contains("test io error"));
            }
            _ => panic!("Expected HardwareError"),
        }
    }
}
