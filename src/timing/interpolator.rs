//! Interpolator - frame-rate smoothing of a buffer-quantized reading
//!
//! Backends only refresh their clocks and sample cursors once per audio
//! buffer. Between refreshes the interpolator extrapolates with the rendering
//! frame clock; on every refresh it snaps back to the backend's value, so
//! error never accumulates past one buffer.

/// Smooths one raw backend reading (mix clock ticks or sample cursor frames).
#[derive(Debug, Clone)]
pub struct Interpolator {
    ticks_per_second: f64,
    last_raw: Option<u64>,
    last_wall: f64,
    baseline: f64,
    value: f64,
}

impl Interpolator {
    /// `rate` is the number of raw units per second (clock rate or the
    /// sound's sample rate).
    pub fn new(rate: u32) -> Self {
        Self {
            ticks_per_second: rate.max(1) as f64,
            last_raw: None,
            last_wall: 0.0,
            baseline: 0.0,
            value: 0.0,
        }
    }

    /// Feed a raw reading taken at frame time `wall` and return the smoothed
    /// time in seconds.
    ///
    /// An unchanged reading extrapolates from the last baseline using the
    /// wall time elapsed since that baseline was captured. A changed reading
    /// becomes the new baseline exactly.
    pub fn update(&mut self, raw: u64, wall: f64) -> f64 {
        match self.last_raw {
            Some(previous) if previous == raw => {
                self.value = self.baseline + (wall - self.last_wall).max(0.0);
            }
            _ => self.reseed(raw, wall),
        }
        self.value
    }

    /// Make `raw` the baseline as of `wall`, discarding any extrapolation.
    pub fn reseed(&mut self, raw: u64, wall: f64) {
        self.last_raw = Some(raw);
        self.last_wall = wall;
        self.baseline = raw as f64 / self.ticks_per_second;
        self.value = self.baseline;
    }

    /// Move the extrapolation origin to `wall` while keeping the current
    /// value. Used after a pause so frozen time is not extrapolated over.
    pub fn rebase(&mut self, wall: f64) {
        self.baseline = self.value;
        self.last_wall = wall;
    }

    /// Last value returned by `update`.
    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn reset(&mut self) {
        self.last_raw = None;
        self.last_wall = 0.0;
        self.baseline = 0.0;
        self.value = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_reading_is_exact() {
        let mut interp = Interpolator::new(1000);
        assert_eq!(interp.update(500, 10.0), 0.5);
    }

    #[test]
    fn test_unchanged_reading_extrapolates_with_wall_clock() {
        let mut interp = Interpolator::new(1000);
        interp.update(500, 10.0);
        assert!((interp.update(500, 10.016) - 0.516).abs() < 1e-12);
        assert!((interp.update(500, 10.032) - 0.532).abs() < 1e-12);
    }

    #[test]
    fn test_changed_reading_snaps_to_new_baseline() {
        let mut interp = Interpolator::new(1000);
        interp.update(500, 10.0);
        interp.update(500, 10.030);
        // Ground truth lags the extrapolation; the new baseline wins exactly.
        assert_eq!(interp.update(520, 10.040), 0.52);
        assert!((interp.update(520, 10.050) - 0.53).abs() < 1e-12);
    }

    #[test]
    fn test_monotonic_when_raw_is_buffer_floor_of_wall() {
        // Raw clock refreshes every 2048 ticks at 48 kHz, frames every ~16.7ms
        let rate = 48000u32;
        let buffer = 2048u64;
        let mut interp = Interpolator::new(rate);
        let mut previous = 0.0;
        for frame in 0..600 {
            let wall = frame as f64 / 60.0;
            let ticks = (wall * rate as f64) as u64;
            let raw = ticks - ticks % buffer;
            let value = interp.update(raw, wall);
            assert!(value >= previous - 1e-9, "frame {} went backwards", frame);
            previous = value;
        }
    }

    #[test]
    fn test_wall_clock_going_backwards_never_rewinds() {
        let mut interp = Interpolator::new(1000);
        interp.update(100, 5.0);
        assert_eq!(interp.update(100, 4.0), 0.1);
    }

    #[test]
    fn test_reseed_and_rebase() {
        let mut interp = Interpolator::new(100);
        interp.update(50, 1.0);
        interp.update(50, 1.2);
        assert!((interp.value() - 0.7).abs() < 1e-12);

        interp.rebase(9.0);
        assert!((interp.update(50, 9.1) - 0.8).abs() < 1e-12);

        interp.reseed(10, 20.0);
        assert_eq!(interp.value(), 0.1);
        interp.reset();
        assert_eq!(interp.value(), 0.0);
        assert_eq!(interp.update(10, 0.0), 0.1);
    }
}
