//! Decoded PCM sounds
//!
//! Sounds are stored as interleaved f32 frames at their own sample rate.
//! The mixer resamples on the fly, so the rate only matters for the
//! sample cursor and for computing the clip length.

use std::io::{Cursor, Read};
use std::path::Path;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::AudioError;

/// Duration of the generated click in milliseconds
const CLICK_DURATION_MS: f32 = 20.0;

#[derive(Debug, Clone, PartialEq)]
pub struct SoundData {
    samples: Vec<f32>,
    channels: u16,
    sample_rate: u32,
}

impl SoundData {
    /// Wrap interleaved samples.
    ///
    /// # Errors
    /// `InvalidSound` when the buffer is empty, the channel count or sample
    /// rate is zero, or the sample count is not a whole number of frames.
    pub fn from_pcm(samples: Vec<f32>, channels: u16, sample_rate: u32) -> Result<Self, AudioError> {
        if channels == 0 || sample_rate == 0 {
            return Err(AudioError::InvalidSound {
                reason: format!("{} channels at {} Hz", channels, sample_rate),
            });
        }
        if samples.is_empty() || samples.len() % channels as usize != 0 {
            return Err(AudioError::InvalidSound {
                reason: format!(
                    "{} samples do not form whole {}-channel frames",
                    samples.len(),
                    channels
                ),
            });
        }
        Ok(Self {
            samples,
            channels,
            sample_rate,
        })
    }

    /// Decode a WAV file (integer or float PCM).
    pub fn from_wav<P: AsRef<Path>>(path: P) -> Result<Self, AudioError> {
        let reader = hound::WavReader::open(&path)?;
        Self::decode_wav(reader, &path.as_ref().display().to_string())
    }

    /// Decode a WAV image already in memory (bundled assets, downloads).
    pub fn from_wav_bytes(bytes: &[u8]) -> Result<Self, AudioError> {
        let reader = hound::WavReader::new(Cursor::new(bytes))?;
        Self::decode_wav(reader, &format!("{} byte buffer", bytes.len()))
    }

    fn decode_wav<R: Read>(
        mut reader: hound::WavReader<R>,
        source: &str,
    ) -> Result<Self, AudioError> {
        let spec = reader.spec();
        let samples: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => reader.samples::<f32>().collect::<Result<_, _>>()?,
            hound::SampleFormat::Int => {
                let scale = 1.0 / (1u64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
                reader
                    .samples::<i32>()
                    .map(|sample| sample.map(|s| s as f32 * scale))
                    .collect::<Result<_, _>>()?
            }
        };
        log::debug!(
            "[Sound] Decoded {}: {} Hz, {} ch, {} samples",
            source,
            spec.sample_rate,
            spec.channels,
            samples.len()
        );
        Self::from_pcm(samples, spec.channels, spec.sample_rate)
    }

    /// 20ms white noise burst, deterministic across calls.
    pub fn click(sample_rate: u32) -> Result<Self, AudioError> {
        let num_samples = (sample_rate as f32 * CLICK_DURATION_MS / 1000.0) as usize;
        let mut rng = StdRng::seed_from_u64(42);
        let samples = (0..num_samples).map(|_| rng.gen_range(-1.0..1.0)).collect();
        Self::from_pcm(samples, 1, sample_rate)
    }

    /// Mono sine tone, used by the CLI when no file is given.
    pub fn tone(frequency: f32, length_secs: f32, sample_rate: u32) -> Result<Self, AudioError> {
        let frames = (length_secs.max(0.0) * sample_rate as f32) as usize;
        let step = std::f32::consts::TAU * frequency / sample_rate.max(1) as f32;
        let samples = (0..frames)
            .map(|i| (i as f32 * step).sin() * 0.5)
            .collect();
        Self::from_pcm(samples, 1, sample_rate)
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn frames(&self) -> u64 {
        (self.samples.len() / self.channels as usize) as u64
    }

    pub fn length_secs(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }

    /// Linearly interpolated sample at fractional frame `position`.
    /// Returns 0.0 past the end.
    #[inline]
    pub fn sample_at(&self, position: f64, channel: usize) -> f32 {
        let frames = self.frames();
        if position < 0.0 || position >= frames as f64 {
            return 0.0;
        }
        let channels = self.channels as usize;
        let channel = channel % channels;
        let index = position as u64;
        let frac = (position - index as f64) as f32;
        let current = self.samples[index as usize * channels + channel];
        let next = if index + 1 < frames {
            self.samples[(index as usize + 1) * channels + channel]
        } else {
            0.0
        };
        current + (next - current) * frac
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_pcm_rejects_partial_frames() {
        assert!(matches!(
            SoundData::from_pcm(vec![0.0; 3], 2, 48000),
            Err(AudioError::InvalidSound { .. })
        ));
        assert!(SoundData::from_pcm(Vec::new(), 1, 48000).is_err());
        assert!(SoundData::from_pcm(vec![0.0; 4], 2, 0).is_err());
    }

    #[test]
    fn test_length_and_frames() {
        let sound = SoundData::from_pcm(vec![0.0; 96000], 2, 48000).unwrap();
        assert_eq!(sound.frames(), 48000);
        assert!((sound.length_secs() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_sample_at_interpolates_and_maps_channels() {
        let sound = SoundData::from_pcm(vec![0.0, 1.0, 1.0, 0.0], 2, 10).unwrap();
        assert!((sound.sample_at(0.5, 0) - 0.5).abs() < 1e-6);
        assert!((sound.sample_at(0.5, 1) - 0.5).abs() < 1e-6);
        // Channel 2 of a stereo sound maps back onto channel 0
        assert_eq!(sound.sample_at(0.0, 2), 0.0);
        assert_eq!(sound.sample_at(2.0, 0), 0.0);
    }

    #[test]
    fn test_click_is_deterministic_and_in_range() {
        let a = SoundData::click(48000).unwrap();
        let b = SoundData::click(48000).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.frames(), 960);
        assert!((0..960).all(|i| (-1.0..=1.0).contains(&a.sample_at(i as f64, 0))));
    }

    #[test]
    fn test_wav_decode_matches_written_samples() {
        let path = std::env::temp_dir().join(format!("rhythm-sound-{}.wav", std::process::id()));
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 22050,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for sample in [0i16, 16384, -16384, 32767] {
            writer.write_sample(sample).unwrap();
        }
        writer.finalize().unwrap();

        let sound = SoundData::from_wav(&path).unwrap();
        assert_eq!(sound.sample_rate(), 22050);
        assert_eq!(sound.frames(), 4);
        assert!((sound.sample_at(1.0, 0) - 0.5).abs() < 1e-4);
        assert!((sound.sample_at(2.0, 0) + 0.5).abs() < 1e-4);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_wav_bytes_decode_float_stereo() {
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 44100,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut image = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut image, spec).unwrap();
            for sample in [0.25f32, -0.25, 0.75, -0.75] {
                writer.write_sample(sample).unwrap();
            }
            writer.finalize().unwrap();
        }

        let sound = SoundData::from_wav_bytes(image.get_ref()).unwrap();
        assert_eq!(sound.sample_rate(), 44100);
        assert_eq!(sound.frames(), 2);
        assert_eq!(sound.sample_at(0.0, 0), 0.25);
        assert_eq!(sound.sample_at(1.0, 1), -0.75);
    }

    #[test]
    fn test_garbage_wav_bytes_are_decode_error() {
        assert!(matches!(
            SoundData::from_wav_bytes(b"RIFF not really a wave"),
            Err(AudioError::DecodeFailed { .. })
        ));
        assert!(SoundData::from_wav_bytes(&[]).is_err());
    }

    #[test]
    fn test_missing_wav_is_decode_error() {
        assert!(SoundData::from_wav("/definitely/not/here.wav").is_err());
    }
}
