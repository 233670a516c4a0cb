// Error types for the rhythm playback crate
//
// This module defines the coded error type for backend and session operations,
// providing structured error handling with stable numeric codes for callers
// that forward failures across process or language boundaries.

mod audio;

pub use audio::{log_audio_error, AudioError, AudioErrorCodes};

/// Error codes for structured error reporting
///
/// This trait provides a standard way to get error codes and messages
/// from custom error types, enabling consistent error handling for
/// callers that only see numbers (CLI exit payloads, telemetry).
pub trait ErrorCode {
    /// Get the numeric error code
    fn code(&self) -> i32;

    /// Get the human-readable error message
    fn message(&self) -> String;
}
