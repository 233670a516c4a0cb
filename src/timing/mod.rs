//! Timing primitives shared by every playback session.
//!
//! `interpolator` smooths buffer-quantized backend readings into a value that
//! moves every rendering frame, `scheduler` turns a delay/offset request into
//! a backend deadline, and `platform` feeds the pre-roll heuristics.

pub mod interpolator;
pub mod platform;
pub mod scheduler;

pub use interpolator::Interpolator;
pub use platform::Platform;
pub use scheduler::{DelayPolicy, SchedulePlan};
