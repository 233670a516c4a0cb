// Audio module - PCM sounds, channel slots and the software mixer

pub mod mixer;
pub mod slots;
pub mod sound;

// Re-export commonly used types for convenience
pub use mixer::Mixer;
pub use slots::{Allocation, ChannelSlots};
pub use sound::SoundData;
