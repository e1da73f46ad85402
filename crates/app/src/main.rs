use std::{
    collections::BTreeMap,
    f32::consts::PI,
    path::{Path, PathBuf},
};

use beatsync_core::{
    AppConfig, DeviceProfile, EffectKind, EffectSink, EffectTimeline, MediaClock,
    SampleSpectrumSource, Session, ToggleSink,
};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

const SAMPLE_RATE: u32 = 44_100;

fn main() -> beatsync_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Simulate {
            duration,
            bpm,
            fps,
            silent,
            pin,
            timeline_out,
        } => {
            let config = load_config(cli.config, cli.tunables)?;
            let pin = pin.map(|name| name.parse::<EffectKind>()).transpose()?;
            let options = SimulateOptions {
                duration,
                bpm,
                fps,
                silent,
                pin,
            };
            run_simulate(&config, &options, timeline_out)
        }
        Commands::Replay {
            timeline,
            duration,
            fps,
        } => {
            let config = load_config(cli.config, cli.tunables)?;
            run_replay(&config, &timeline, duration, fps)
        }
        Commands::Defaults { constrained } => {
            let profile = if constrained {
                DeviceProfile::Constrained
            } else {
                DeviceProfile::Desktop
            };
            let config = AppConfig::for_profile(profile);
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

fn load_config(
    config: Option<PathBuf>,
    tunables: Option<PathBuf>,
) -> beatsync_core::Result<AppConfig> {
    let mut config = match config {
        Some(path) => {
            tracing::info!(?path, "loading config");
            AppConfig::load(path)?
        }
        None => AppConfig::default(),
    };
    if let Some(path) = tunables {
        let tunables = AppConfig::load_tunables(&path)?;
        tracing::info!(?path, count = tunables.len(), "applying tunables");
        config.apply_tunables(&tunables)?;
    }
    Ok(config)
}

struct SimulateOptions {
    duration: f32,
    bpm: f32,
    fps: f32,
    silent: bool,
    pin: Option<EffectKind>,
}

fn run_simulate(
    config: &AppConfig,
    options: &SimulateOptions,
    timeline_out: Option<PathBuf>,
) -> beatsync_core::Result<()> {
    tracing::info!(
        duration = options.duration,
        bpm = options.bpm,
        silent = options.silent,
        "starting simulation"
    );

    let (mut session, probes) = build_session(config);
    if let Some(pin) = options.pin {
        session.scheduler().borrow_mut().pin_single_effect(Some(pin));
    }

    let mut track = KickTrack::new(SAMPLE_RATE, options.bpm, options.silent);
    let delta = 1.0 / options.fps.max(1.0);
    let block = (SAMPLE_RATE as f32 * delta).round() as usize;
    let frames = (options.duration / delta).ceil() as usize;
    let primed = config.detection.spectrum_window * 2;

    session.media_started(0.0);
    let mut probed = false;
    let mut beats = 0usize;
    for frame in 1..=frames {
        let now = frame as f32 * delta;
        session.source_mut().push_samples(&track.next_block(block));
        if !probed && session.source().buffered_samples() >= primed {
            let mode = session.probe_analysis();
            tracing::info!(?mode, "analysis mode chosen");
            probed = true;
        }
        if let Some(beat) = session.tick(now, delta) {
            beats += 1;
            tracing::debug!(strength = beat.strength, media_time = beat.media_time, "beat");
        }
    }
    session.media_ended();

    let snapshot = session.monitor().snapshot();
    tracing::info!(
        beats,
        mode = ?session.detector().mode(),
        average_fps = snapshot.average_fps,
        tier = ?snapshot.tier,
        "simulation finished"
    );
    log_activations(&probes);

    let timeline = session.recorded_timeline();
    if let Some(path) = timeline_out {
        timeline.save(&path)?;
        tracing::info!(?path, selections = timeline.len(), "timeline written");
    }
    Ok(())
}

fn run_replay(
    config: &AppConfig,
    path: &Path,
    duration: Option<f32>,
    fps: f32,
) -> beatsync_core::Result<()> {
    let timeline = EffectTimeline::load(path)?;
    let duration = duration
        .or_else(|| timeline.last().map(|selection| selection.time_seconds + 1.0))
        .unwrap_or(0.0);
    tracing::info!(?path, selections = timeline.len(), duration, "starting replay");

    let (mut session, probes) = build_session(config);
    let mut track = KickTrack::new(SAMPLE_RATE, 120.0, true);
    let delta = 1.0 / fps.max(1.0);
    let block = (SAMPLE_RATE as f32 * delta).round() as usize;

    session.start_export(0.0, timeline)?;
    session.media_started(0.0);

    let mut now = 0.0;
    while session.source().playback_time() < duration {
        now += delta;
        session.source_mut().push_samples(&track.next_block(block));
        session.tick(now, delta);
    }
    session.source_mut().pause();
    session.tick(now + delta, delta);

    let captured = session.finish_export(now + delta)?;
    tracing::info!(
        captured,
        frames = session.recorder().frames_captured(),
        "replay finished"
    );
    log_activations(&probes);
    Ok(())
}

fn build_session(
    config: &AppConfig,
) -> (Session<SampleSpectrumSource>, BTreeMap<EffectKind, ToggleSink>) {
    let probes: BTreeMap<EffectKind, ToggleSink> = EffectKind::ALL
        .iter()
        .map(|kind| (*kind, ToggleSink::new()))
        .collect();
    let sinks = probes
        .iter()
        .map(|(kind, probe)| (*kind, Box::new(probe.clone()) as Box<dyn EffectSink>))
        .collect();

    let mut source = SampleSpectrumSource::new(SAMPLE_RATE);
    source.play();
    (Session::new(config, source, sinks), probes)
}

fn log_activations(probes: &BTreeMap<EffectKind, ToggleSink>) {
    for (kind, probe) in probes {
        if probe.activations() > 0 {
            tracing::info!(effect = %kind, pulses = probe.activations(), "effect activity");
        }
    }
}

/// Synthetic four-on-the-floor kick: a decaying 55 Hz sine on every beat.
struct KickTrack {
    sample_rate: f32,
    period: f32,
    position: u64,
    silent: bool,
}

impl KickTrack {
    fn new(sample_rate: u32, bpm: f32, silent: bool) -> Self {
        Self {
            sample_rate: sample_rate as f32,
            period: 60.0 / bpm.max(1.0),
            position: 0,
            silent,
        }
    }

    fn next_block(&mut self, len: usize) -> Vec<f32> {
        (0..len)
            .map(|_| {
                let time = self.position as f32 / self.sample_rate;
                self.position += 1;
                if self.silent {
                    return 0.0;
                }
                let phase = time % self.period;
                0.8 * (-phase * 30.0).exp() * (2.0 * PI * 55.0 * phase).sin()
            })
            .collect()
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Beat-synchronised effect scheduler", long_about = None)]
struct Cli {
    /// Nested JSON configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Flat JSON map of numeric tunables applied over the configuration.
    #[arg(long, global = true)]
    tunables: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the engine against a synthetic kick-drum track.
    Simulate {
        /// Length of the track in seconds.
        #[arg(long, default_value_t = 30.0)]
        duration: f32,
        #[arg(long, default_value_t = 120.0)]
        bpm: f32,
        /// Simulated render rate.
        #[arg(long, default_value_t = 60.0)]
        fps: f32,
        /// Feed silence instead of the kick track.
        #[arg(long)]
        silent: bool,
        /// Pulse only this effect.
        #[arg(long)]
        pin: Option<String>,
        /// Write the recorded effect timeline to this JSON file.
        #[arg(long)]
        timeline_out: Option<PathBuf>,
    },
    /// Replay a recorded effect timeline as an export capture.
    Replay {
        /// Timeline JSON written by `simulate`.
        timeline: PathBuf,
        /// Seconds to replay; defaults to one second past the last selection.
        #[arg(long)]
        duration: Option<f32>,
        #[arg(long, default_value_t = 60.0)]
        fps: f32,
    },
    /// Print the default configuration as JSON.
    Defaults {
        /// Use the constrained-device profile.
        #[arg(long)]
        constrained: bool,
    },
}
