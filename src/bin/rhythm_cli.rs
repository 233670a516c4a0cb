use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use rhythm_playback::config::AppConfig;
use rhythm_playback::engine::backend::{SimulatedBackend, TimingMode};
use rhythm_playback::playback::{PlaybackSession, PlaybackState};
use rhythm_playback::settings;
use rhythm_playback::telemetry::PlaybackEvent;
use rhythm_playback::testing::{FrameDeltas, SimulatedRig};
use serde::Serialize;
use tokio::sync::broadcast::Receiver;

#[derive(Parser, Debug)]
#[command(
    name = "rhythm_cli",
    about = "Scheduled music playback harness for the rhythm playback core"
)]
struct Cli {
    /// JSON configuration file (defaults are used when missing or invalid)
    #[arg(long)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Drive a session against the simulated backend and print its timeline
    Simulate {
        #[arg(long, value_enum, default_value_t = Mode::SampleCursor)]
        mode: Mode,
        /// Clip length in seconds
        #[arg(long, default_value_t = 1.0)]
        length: f64,
        /// Pre-roll in seconds (platform heuristics when omitted)
        #[arg(long)]
        delay: Option<f32>,
        #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
        offset: f32,
        #[arg(long, default_value_t = 0.0)]
        finished_offset: f32,
        #[arg(long)]
        endless: bool,
        #[arg(long, default_value_t = 60.0)]
        fps: f64,
        /// Seed for frame-time jitter; steady frames when omitted
        #[arg(long)]
        jitter_seed: Option<u64>,
        /// Seconds to simulate (until the session stops when omitted)
        #[arg(long)]
        duration: Option<f64>,
    },
    /// Play a WAV file (or a test tone) on the default output device
    Play {
        wav: Option<PathBuf>,
        #[arg(long)]
        delay: Option<f32>,
        #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
        offset: f32,
        #[arg(long, default_value_t = 0.0)]
        finished_offset: f32,
        #[arg(long)]
        endless: bool,
        #[arg(long, default_value_t = 60.0)]
        fps: f64,
        /// Stop after this many seconds even in endless mode
        #[arg(long)]
        duration: Option<f64>,
        /// Play a click on the sfx group when the waiting delay elapses
        #[arg(long)]
        click: bool,
    },
    /// List output devices of the host audio API
    Devices,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum Mode {
    SampleCursor,
    MixClock,
}

impl From<Mode> for TimingMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::SampleCursor => TimingMode::SampleCursor,
            Mode::MixClock => TimingMode::MixClock,
        }
    }
}

#[derive(Serialize)]
struct FrameLine {
    frame: u64,
    wall: f64,
    current_time: f64,
    actual_time: f64,
    state: PlaybackState,
    clip_playing: bool,
}

#[derive(Serialize)]
struct EventLine<'a> {
    wall: f64,
    event: &'a PlaybackEvent,
}

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {err:?}");
            ExitCode::from(1)
        }
    }
}

fn run() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = cli
        .config
        .map(AppConfig::load_from_file)
        .unwrap_or_default();
    settings::init(&config.volume);

    match cli.command {
        Commands::Simulate {
            mode,
            length,
            delay,
            offset,
            finished_offset,
            endless,
            fps,
            jitter_seed,
            duration,
        } => {
            let options = RunOptions {
                delay,
                offset,
                finished_offset,
                endless,
                fps,
                duration,
            };
            run_simulate(&config, mode.into(), length, jitter_seed, &options)
        }
        Commands::Play {
            wav,
            delay,
            offset,
            finished_offset,
            endless,
            fps,
            duration,
            click,
        } => {
            let options = RunOptions {
                delay,
                offset,
                finished_offset,
                endless,
                fps,
                duration,
            };
            run_play(&config, wav, click, &options)
        }
        Commands::Devices => run_devices(),
    }
}

struct RunOptions {
    delay: Option<f32>,
    offset: f32,
    finished_offset: f32,
    endless: bool,
    fps: f64,
    duration: Option<f64>,
}

impl RunOptions {
    fn configure(&self, session: &mut PlaybackSession) {
        session.set_audio_endless(self.endless);
        session.set_finished_call_offset(self.finished_offset);
    }

    fn start(
        &self,
        session: &mut PlaybackSession,
        sound: rhythm_playback::SoundHandle,
    ) -> Result<()> {
        match self.delay {
            Some(delay) => session.play_music_with_delay(sound, delay, self.offset),
            None => session.play_music(sound, self.offset),
        }
        .context("starting playback")
    }

    fn keep_going(&self, session: &PlaybackSession, elapsed: f64) -> bool {
        match self.duration {
            Some(limit) => elapsed < limit,
            None => session.is_playing(),
        }
    }
}

fn run_simulate(
    config: &AppConfig,
    mode: TimingMode,
    length: f64,
    jitter_seed: Option<u64>,
    options: &RunOptions,
) -> Result<ExitCode> {
    if options.endless && options.duration.is_none() {
        bail!("--endless needs --duration to terminate");
    }
    let rig = SimulatedRig::with_backend(
        SimulatedBackend::builder()
            .timing_mode(mode)
            .from_config(&config.audio)
            .build(),
    );
    let sound = rig.sound(length, config.audio.sample_rate)?;
    let mut session = rig.session_with_config(&config.playback);
    options.configure(&mut session);
    let mut events = session.subscribe_events();

    // A first frame so the pre-roll heuristics see a real frame delta
    let mut deltas = match jitter_seed {
        Some(seed) => FrameDeltas::jittered(options.fps, seed),
        None => FrameDeltas::steady(options.fps),
    };
    let first = deltas.next().unwrap_or(1.0 / 60.0);
    rig.step(first)?;
    options.start(&mut session, sound)?;

    let mut elapsed = 0.0;
    let mut frame = 0;
    drain_events(&mut events, 0.0)?;
    while options.keep_going(&session, elapsed) {
        let Some(dt) = deltas.next() else {
            break;
        };
        rig.frame(&mut session, dt)?;
        elapsed += dt;
        frame += 1;
        print_frame(&session, frame, elapsed)?;
        drain_events(&mut events, elapsed)?;
    }
    Ok(ExitCode::from(0))
}

#[cfg(not(target_os = "android"))]
fn run_play(
    config: &AppConfig,
    wav: Option<PathBuf>,
    click: bool,
    options: &RunOptions,
) -> Result<ExitCode> {
    use std::sync::Arc;
    use std::time::Duration;

    use rhythm_playback::audio::SoundData;
    use rhythm_playback::engine::{CpalBackend, SystemFrameClock};

    let data = match wav {
        Some(path) => SoundData::from_wav(&path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => SoundData::tone(440.0, 2.0, config.audio.sample_rate)?,
    };
    let backend = Arc::new(CpalBackend::new(&config.audio).context("opening audio output")?);
    let sound = backend.load_sound(data)?;
    let click_sound = if click {
        Some(backend.load_sound(SoundData::click(config.audio.sample_rate)?)?)
    } else {
        None
    };
    let clock = Arc::new(SystemFrameClock::new());
    let mut session = PlaybackSession::with_config(backend, clock.clone(), &config.playback);
    options.configure(&mut session);
    let mut events = session.subscribe_events();

    let frame = Duration::from_secs_f64(1.0 / options.fps.max(1.0));
    std::thread::sleep(frame);
    clock.tick();
    options.start(&mut session, sound)?;

    let mut frames = 0;
    let mut clicked = false;
    drain_events(&mut events, 0.0)?;
    while options.keep_going(&session, clock_elapsed(&clock)) {
        std::thread::sleep(frame);
        clock.tick();
        session.update();
        frames += 1;
        if let Some(marker) = click_sound {
            if session.is_waiting_delay_finished() && !clicked {
                clicked = true;
                session.play_one_shot(marker, 1.0)?;
            }
        }
        // Terminal output at 60 fps is noise; report roughly twice a second
        if frames % 30 == 0 {
            print_frame(&session, frames, clock_elapsed(&clock))?;
        }
        drain_events(&mut events, clock_elapsed(&clock))?;
    }
    session.stop();
    drain_events(&mut events, clock_elapsed(&clock))?;
    Ok(ExitCode::from(0))
}

#[cfg(not(target_os = "android"))]
fn clock_elapsed(clock: &rhythm_playback::engine::SystemFrameClock) -> f64 {
    use rhythm_playback::FrameClock;
    clock.now()
}

#[cfg(target_os = "android")]
fn run_play(_: &AppConfig, _: Option<PathBuf>, _: bool, _: &RunOptions) -> Result<ExitCode> {
    bail!("play is only available on desktop hosts")
}

#[cfg(not(target_os = "android"))]
fn run_devices() -> Result<ExitCode> {
    let devices = rhythm_playback::engine::host_output_devices()?;
    if devices.is_empty() {
        println!("No output devices found");
        return Ok(ExitCode::from(0));
    }
    for device in devices {
        println!("{}", serde_json::to_string(&device)?);
    }
    Ok(ExitCode::from(0))
}

#[cfg(target_os = "android")]
fn run_devices() -> Result<ExitCode> {
    bail!("device listing is only available on desktop hosts")
}

fn print_frame(session: &PlaybackSession, frame: u64, wall: f64) -> Result<()> {
    let line = FrameLine {
        frame,
        wall,
        current_time: session.current_time(),
        actual_time: session.current_actual_time(),
        state: session.state(),
        clip_playing: session.is_clip_playing(),
    };
    println!("{}", serde_json::to_string(&line)?);
    Ok(())
}

fn drain_events(events: &mut Receiver<PlaybackEvent>, wall: f64) -> Result<()> {
    while let Ok(event) = events.try_recv() {
        println!("{}", serde_json::to_string(&EventLine { wall, event: &event })?);
    }
    Ok(())
}
