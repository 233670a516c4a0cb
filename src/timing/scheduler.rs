//! Pre-roll heuristics and deadline planning

use crate::config::PlaybackConfig;
use crate::error::AudioError;

use super::platform::Platform;

/// Computes the default pre-roll delay from platform and frame-rate
/// heuristics.
#[derive(Debug, Clone)]
pub struct DelayPolicy {
    pub base_secs: f32,
    pub mobile_extra_secs: f32,
    pub low_fps_extra_secs: f32,
    pub low_fps_threshold: f32,
    pub platform: Platform,
}

impl Default for DelayPolicy {
    fn default() -> Self {
        Self::from_config(&PlaybackConfig::default())
    }
}

impl DelayPolicy {
    pub fn from_config(config: &PlaybackConfig) -> Self {
        Self {
            base_secs: config.base_delay_secs,
            mobile_extra_secs: config.mobile_extra_delay_secs,
            low_fps_extra_secs: config.low_fps_extra_delay_secs,
            low_fps_threshold: config.low_fps_threshold,
            platform: Platform::current(),
        }
    }

    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    /// Pre-roll for a play request issued in a frame that took
    /// `frame_delta` seconds. A zero delta (no frame measured yet) never
    /// counts as low frame rate.
    pub fn compute_delay(&self, frame_delta: f64) -> f32 {
        let mut delay = self.base_secs;
        if self.platform.is_mobile() {
            delay += self.mobile_extra_secs;
        }
        if frame_delta > 0.0 && 1.0 / frame_delta < self.low_fps_threshold as f64 {
            delay += self.low_fps_extra_secs;
        }
        delay
    }
}

/// Resolved schedule for one play request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SchedulePlan {
    /// Pre-roll reported to callers as the chart zero point. A negative
    /// offset is folded in here as `delay + |offset|`.
    pub waiting_delay: f32,
    pub offset: f32,
    /// Seconds after the start reference at which the sound begins.
    pub start_secs: f64,
    /// True when the effective delay is not positive; the sound then starts
    /// immediately instead of being scheduled.
    pub immediate: bool,
}

impl SchedulePlan {
    pub fn new(delay: f32, offset: f32) -> Result<Self, AudioError> {
        if !delay.is_finite() {
            return Err(AudioError::InvalidParameter {
                name: "delay".to_string(),
                value: delay.to_string(),
            });
        }
        if !offset.is_finite() {
            return Err(AudioError::InvalidParameter {
                name: "offset".to_string(),
                value: offset.to_string(),
            });
        }

        let waiting_delay = if offset < 0.0 { delay + offset.abs() } else { delay };
        let effective = waiting_delay + offset;
        let immediate = effective <= 0.0;
        Ok(Self {
            waiting_delay,
            offset,
            start_secs: if immediate { 0.0 } else { effective as f64 },
            immediate,
        })
    }

    /// Absolute backend deadline for a start reference of `start` ticks at
    /// `rate` ticks per second. Fractional ticks are truncated.
    pub fn deadline_ticks(&self, start: u64, rate: u32) -> u64 {
        start + (self.start_secs * rate as f64) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desktop() -> DelayPolicy {
        DelayPolicy::default().with_platform(Platform::Desktop)
    }

    #[test]
    fn test_default_delay_on_desktop() {
        assert_eq!(desktop().compute_delay(1.0 / 60.0), 2.0);
    }

    #[test]
    fn test_mobile_adds_latency_compensation() {
        let policy = desktop().with_platform(Platform::Mobile);
        assert_eq!(policy.compute_delay(1.0 / 60.0), 3.0);
    }

    #[test]
    fn test_low_fps_adds_jitter_compensation() {
        assert_eq!(desktop().compute_delay(1.0 / 20.0), 7.0);
        let mobile = desktop().with_platform(Platform::Mobile);
        assert_eq!(mobile.compute_delay(0.1), 8.0);
    }

    #[test]
    fn test_zero_delta_is_not_low_fps() {
        assert_eq!(desktop().compute_delay(0.0), 2.0);
    }

    #[test]
    fn test_positive_offset_pushes_deadline() {
        let plan = SchedulePlan::new(2.0, 0.5).unwrap();
        assert_eq!(plan.waiting_delay, 2.0);
        assert_eq!(plan.start_secs, 2.5);
        assert!(!plan.immediate);
        assert_eq!(plan.deadline_ticks(1000, 48000), 1000 + 120_000);
    }

    #[test]
    fn test_negative_offset_extends_waiting_delay() {
        let shifted = SchedulePlan::new(2.0, -3.0).unwrap();
        let plain = SchedulePlan::new(5.0, 0.0).unwrap();
        assert_eq!(shifted.waiting_delay, plain.waiting_delay);
        // Audio begins |offset| seconds ahead of the chart zero point
        assert_eq!(shifted.start_secs, 2.0);
        assert_eq!(plain.start_secs, 5.0);
    }

    #[test]
    fn test_non_positive_effective_delay_plays_immediately() {
        let plan = SchedulePlan::new(0.0, 0.0).unwrap();
        assert!(plan.immediate);
        assert_eq!(plan.start_secs, 0.0);

        let plan = SchedulePlan::new(-1.0, 0.5).unwrap();
        assert!(plan.immediate);

        let plan = SchedulePlan::new(0.0, -1.0).unwrap();
        assert!(plan.immediate);
        assert_eq!(plan.waiting_delay, 1.0);
    }

    #[test]
    fn test_deadline_truncates_fractional_ticks() {
        let plan = SchedulePlan::new(0.00001, 0.0).unwrap();
        assert_eq!(plan.deadline_ticks(10, 48000), 10);
    }

    #[test]
    fn test_non_finite_input_is_rejected() {
        assert!(matches!(
            SchedulePlan::new(f32::NAN, 0.0),
            Err(AudioError::InvalidParameter { .. })
        ));
        assert!(SchedulePlan::new(1.0, f32::INFINITY).is_err());
    }
}
