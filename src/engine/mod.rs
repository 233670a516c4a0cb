//! Engine module housing the backend seam.
//!
//! Sessions reach audio hardware only through the traits in `backend`; the
//! deterministic simulated backend and the cpal output backend implement
//! them.

pub mod backend;

#[cfg(not(target_os = "android"))]
pub use backend::{host_output_devices, CpalBackend};
pub use backend::{
    AudioBackend, BackendSettings, ChannelHandle, FrameClock, ManualFrameClock, MixGroup,
    OutputDevice, SimulatedBackend, SimulatedBackendBuilder, SoundHandle, SystemFrameClock,
    TimingMode, DEFAULT_PRIORITY,
};
