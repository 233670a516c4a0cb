//! CPAL-based audio backend for desktop platforms (Linux, macOS, Windows)
//!
//! A dedicated audio thread owns the `cpal::Stream` (streams are not `Send`
//! on every host) and rebuilds it on request. The stream callback renders
//! the shared [`Mixer`], which also carries the mix clocks, so every control
//! call here is a short critical section on that mixer.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use crate::audio::{Mixer, SoundData};
use crate::config::AudioConfig;
use crate::error::AudioError;
use crate::settings;

use super::{
    AudioBackend, BackendSettings, ChannelHandle, MixGroup, OutputDevice, SoundHandle,
    TimingMode,
};

enum StreamCommand {
    Rebuild {
        device: Option<String>,
        buffer_size: u32,
        reply: Sender<Result<u32, AudioError>>,
    },
    Shutdown,
}

#[derive(Debug, Clone)]
struct StreamSettings {
    device: Option<String>,
    buffer_size: u32,
}

/// Desktop output backend. Uses mix clock timing.
pub struct CpalBackend {
    mixer: Arc<Mutex<Mixer>>,
    commands: Mutex<Sender<StreamCommand>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    stream: Mutex<StreamSettings>,
}

impl CpalBackend {
    /// Open the output stream on the configured device (host default when
    /// none is selected in [`settings`]).
    pub fn new(config: &AudioConfig) -> Result<Self, AudioError> {
        let mixer = Arc::new(Mutex::new(Mixer::new(config.sample_rate, config.max_channels)));
        let (tx, rx) = mpsc::channel();

        let thread_mixer = Arc::clone(&mixer);
        let worker = thread::Builder::new()
            .name("rhythm-audio".to_string())
            .spawn(move || audio_thread(thread_mixer, rx))
            .map_err(|e| AudioError::StreamOpenFailed {
                reason: format!("Failed to spawn audio thread: {}", e),
            })?;

        let backend = Self {
            mixer,
            commands: Mutex::new(tx),
            worker: Mutex::new(Some(worker)),
            stream: Mutex::new(StreamSettings {
                device: settings::output_device(),
                buffer_size: config.buffer_size,
            }),
        };
        backend.rebuild()?;
        Ok(backend)
    }

    /// Decode and register a sound with the mixer.
    pub fn load_sound(&self, sound: SoundData) -> Result<SoundHandle, AudioError> {
        Ok(self.mixer()?.add_sound(sound))
    }

    fn mixer(&self) -> Result<MutexGuard<'_, Mixer>, AudioError> {
        self.mixer
            .lock()
            .map_err(|_| AudioError::poisoned("Mixer"))
    }

    fn rebuild(&self) -> Result<(), AudioError> {
        let settings = self
            .stream
            .lock()
            .map_err(|_| AudioError::poisoned("CpalBackend"))?
            .clone();
        let (reply, response) = mpsc::channel();
        self.commands
            .lock()
            .map_err(|_| AudioError::poisoned("CpalBackend"))?
            .send(StreamCommand::Rebuild {
                device: settings.device,
                buffer_size: settings.buffer_size,
                reply,
            })
            .map_err(|_| AudioError::StreamFailure {
                reason: "Audio thread is not running".to_string(),
            })?;
        let rate = response.recv().map_err(|_| AudioError::StreamFailure {
            reason: "Audio thread exited during stream rebuild".to_string(),
        })??;
        log::info!(
            "[CpalBackend] Output running at {} Hz, buffer {} frames",
            rate,
            settings.buffer_size
        );
        Ok(())
    }

    fn start(
        &self,
        sound: SoundHandle,
        group: MixGroup,
        start_at: Option<u64>,
    ) -> Result<ChannelHandle, AudioError> {
        self.mixer()?.start(sound, group, start_at)
    }
}

impl Drop for CpalBackend {
    fn drop(&mut self) {
        if let Ok(commands) = self.commands.lock() {
            let _ = commands.send(StreamCommand::Shutdown);
        }
        if let Some(worker) = self.worker.lock().ok().and_then(|mut w| w.take()) {
            let _ = worker.join();
        }
    }
}

fn audio_thread(mixer: Arc<Mutex<Mixer>>, commands: Receiver<StreamCommand>) {
    let mut stream: Option<cpal::Stream> = None;
    while let Ok(command) = commands.recv() {
        match command {
            StreamCommand::Rebuild {
                device,
                buffer_size,
                reply,
            } => {
                stream = None;
                let result = open_stream(&mixer, device.as_deref(), buffer_size).map(
                    |(next, rate)| {
                        stream = Some(next);
                        rate
                    },
                );
                let _ = reply.send(result);
            }
            StreamCommand::Shutdown => break,
        }
    }
    drop(stream);
    log::info!("[CpalBackend] Audio thread stopped");
}

fn find_device(host: &cpal::Host, name: Option<&str>) -> Result<cpal::Device, AudioError> {
    if let Some(target) = name {
        if let Ok(devices) = host.output_devices() {
            for device in devices {
                if device.name().map(|n| n == target).unwrap_or(false) {
                    return Ok(device);
                }
            }
        }
        log::warn!(
            "[CpalBackend] Output device {:?} not found, using host default",
            target
        );
    }
    host.default_output_device()
        .ok_or(AudioError::NoOutputDevice)
}

fn open_stream(
    mixer: &Arc<Mutex<Mixer>>,
    device_name: Option<&str>,
    buffer_size: u32,
) -> Result<(cpal::Stream, u32), AudioError> {
    let host = cpal::default_host();
    let device = find_device(&host, device_name)?;

    let config = device
        .default_output_config()
        .map_err(|e| AudioError::StreamOpenFailed {
            reason: format!("Failed to get default output config: {:?}", e),
        })?;
    if config.sample_format() != cpal::SampleFormat::F32 {
        return Err(AudioError::StreamOpenFailed {
            reason: "Only F32 sample format is currently supported for output".to_string(),
        });
    }

    let mut stream_config: cpal::StreamConfig = config.into();
    stream_config.buffer_size = cpal::BufferSize::Fixed(buffer_size);
    let channels = stream_config.channels as usize;
    let rate = stream_config.sample_rate.0;

    mixer
        .lock()
        .map_err(|_| AudioError::poisoned("Mixer"))?
        .set_device_rate(rate);

    let render_mixer = Arc::clone(mixer);
    let err_fn = |err| log::error!("[CpalBackend] Output stream error: {}", err);

    let stream = device
        .build_output_stream(
            &stream_config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let master = settings::master_volume();
                match render_mixer.lock() {
                    Ok(mut mixer) => mixer.render(data, channels, master),
                    Err(_) => data.fill(0.0),
                }
            },
            err_fn,
            None,
        )
        .map_err(|e| AudioError::StreamOpenFailed {
            reason: format!("{:?}", e),
        })?;

    stream.play().map_err(|e| AudioError::StreamOpenFailed {
        reason: format!("Failed to start output stream: {:?}", e),
    })?;

    Ok((stream, rate))
}

/// Enumerate output devices on the default host.
pub fn host_output_devices() -> Result<Vec<OutputDevice>, AudioError> {
    let host = cpal::default_host();
    let default_name = host.default_output_device().and_then(|d| d.name().ok());
    let devices = host
        .output_devices()
        .map_err(|e| AudioError::HardwareError {
            details: format!("Failed to enumerate output devices: {:?}", e),
        })?;
    Ok(devices
        .filter_map(|device| device.name().ok())
        .enumerate()
        .map(|(index, name)| OutputDevice {
            index,
            is_default: default_name.as_deref() == Some(name.as_str()),
            name,
        })
        .collect())
}

impl AudioBackend for CpalBackend {
    fn timing_mode(&self) -> TimingMode {
        TimingMode::MixClock
    }

    fn clock_rate(&self) -> u32 {
        self.mixer().map(|mixer| mixer.device_rate()).unwrap_or(1)
    }

    fn now(&self) -> Result<u64, AudioError> {
        Ok(self.mixer()?.group_frames(MixGroup::Music))
    }

    fn schedule_start(
        &self,
        sound: SoundHandle,
        deadline: u64,
    ) -> Result<ChannelHandle, AudioError> {
        self.start(sound, MixGroup::Music, Some(deadline))
    }

    fn play_immediate(
        &self,
        sound: SoundHandle,
        group: MixGroup,
    ) -> Result<ChannelHandle, AudioError> {
        self.start(sound, group, None)
    }

    fn is_valid(&self, channel: ChannelHandle) -> bool {
        self.mixer()
            .map(|mixer| mixer.slots().contains(channel))
            .unwrap_or(false)
    }

    fn sample_cursor(&self, channel: ChannelHandle) -> Result<u64, AudioError> {
        Ok(self.mixer()?.slots().get(channel)?.cursor as u64)
    }

    fn is_producing_output(&self, channel: ChannelHandle) -> Result<bool, AudioError> {
        Ok(!self.mixer()?.slots().get(channel)?.finished)
    }

    fn set_volume(&self, channel: ChannelHandle, volume: f32) -> Result<(), AudioError> {
        self.mixer()?.slots_mut().get_mut(channel)?.volume = volume.clamp(0.0, 1.0);
        Ok(())
    }

    fn set_pitch(&self, channel: ChannelHandle, pitch: f32) -> Result<(), AudioError> {
        if !(pitch.is_finite() && pitch > 0.0) {
            return Err(AudioError::InvalidParameter {
                name: "pitch".to_string(),
                value: pitch.to_string(),
            });
        }
        self.mixer()?.slots_mut().get_mut(channel)?.pitch = pitch;
        Ok(())
    }

    fn set_priority(&self, channel: ChannelHandle, priority: u8) -> Result<(), AudioError> {
        self.mixer()?.slots_mut().set_priority(channel, priority)
    }

    fn pause(&self, channel: ChannelHandle) -> Result<(), AudioError> {
        self.mixer()?.slots_mut().get_mut(channel)?.paused = true;
        Ok(())
    }

    fn unpause(&self, channel: ChannelHandle) -> Result<(), AudioError> {
        self.mixer()?.slots_mut().get_mut(channel)?.paused = false;
        Ok(())
    }

    fn stop(&self, channel: ChannelHandle) -> Result<(), AudioError> {
        self.mixer()?.slots_mut().release(channel).map(|_| ())
    }

    fn set_group_paused(&self, group: MixGroup, paused: bool) -> Result<(), AudioError> {
        self.mixer()?.set_group_paused(group, paused);
        Ok(())
    }

    fn sound_length(&self, sound: SoundHandle) -> Result<f64, AudioError> {
        Ok(self.mixer()?.sound(sound)?.length_secs())
    }

    fn sound_sample_rate(&self, sound: SoundHandle) -> Result<u32, AudioError> {
        Ok(self.mixer()?.sound(sound)?.sample_rate())
    }

    fn output_devices(&self) -> Result<Vec<OutputDevice>, AudioError> {
        host_output_devices()
    }

    fn select_output_device(&self, name: &str) -> Result<(), AudioError> {
        if !host_output_devices()?.iter().any(|device| device.name == name) {
            return Err(AudioError::NoOutputDevice);
        }
        self.stream
            .lock()
            .map_err(|_| AudioError::poisoned("CpalBackend"))?
            .device = Some(name.to_string());
        settings::set_output_device(Some(name.to_string()));
        self.rebuild()
    }

    fn reconfigure(&self, backend_settings: BackendSettings) -> Result<(), AudioError> {
        if backend_settings.buffer_size == 0 {
            return Err(AudioError::InvalidParameter {
                name: "buffer_size".to_string(),
                value: backend_settings.buffer_size.to_string(),
            });
        }
        self.stream
            .lock()
            .map_err(|_| AudioError::poisoned("CpalBackend"))?
            .buffer_size = backend_settings.buffer_size;
        self.rebuild()
    }
}
