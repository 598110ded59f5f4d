use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use pulselight::audio::{
    AnalysisPublisher, AnalysisWorker, AudioAnalysisEngine, CaptureLane, FrameAssembler,
    FrameSource, LatestAnalysis, LiveInputSource, ProcessingQueue, ToneBurstSource, WavFileSource,
};
use pulselight::config::{Config, EffectConfig};
use pulselight::effects::{
    DeviceController, EffectInstance, GroupSpec, LoggingDevice, SchedulerHandle,
};

#[derive(Parser)]
#[command(name = "pulselight")]
#[command(about = "Drive beat-synchronized lighting effects from live audio analysis")]
struct Args {
    /// TOML configuration file
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// WAV file to play through the pipeline
    #[arg(long, short, conflicts_with_all = ["demo_bpm", "live"])]
    input: Option<PathBuf>,

    /// Capture from the default audio input device
    #[arg(long, conflicts_with = "demo_bpm")]
    live: bool,

    /// Use a synthetic metronome at this tempo instead of a file
    #[arg(long)]
    demo_bpm: Option<f32>,

    /// Stop after this many seconds
    #[arg(long)]
    duration: Option<f64>,

    /// Feed input as fast as it can be read instead of in real time
    #[arg(long)]
    no_realtime: bool,

    /// Scheduler tick rate override
    #[arg(long)]
    tick_rate: Option<u32>,

    /// Do not follow the analyzed tempo; keep the configured one
    #[arg(long)]
    fixed_tempo: bool,
}

fn open_source(args: &Args, config: &mut Config) -> Result<Box<dyn FrameSource>> {
    if let Some(path) = &args.input {
        let source = WavFileSource::open(path)
            .with_context(|| format!("opening {}", path.display()))?;
        config.audio.sample_rate = source.sample_rate();
        return Ok(Box::new(source));
    }
    if args.live {
        let source = LiveInputSource::open().context("opening the audio input device")?;
        config.audio.sample_rate = source.sample_rate();
        return Ok(Box::new(source));
    }

    let bpm = args.demo_bpm.unwrap_or(config.sync.default_tempo_bpm);
    info!("Using synthetic tone bursts at {:.1} BPM", bpm);
    Ok(Box::new(ToneBurstSource::new(config.audio.sample_rate, bpm)))
}

/// One logging device per distinct device name; effects sharing a name share it.
fn build_effects(effects: &[EffectConfig]) -> Vec<EffectInstance> {
    let mut devices: HashMap<&str, Arc<dyn DeviceController>> = HashMap::new();
    effects
        .iter()
        .map(|effect| {
            let device = devices.entry(effect.device.as_str()).or_insert_with(|| {
                Arc::new(LoggingDevice::new(effect.device.clone())) as Arc<dyn DeviceController>
            });
            EffectInstance::from_config(effect, Arc::clone(device))
        })
        .collect()
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    info!("Starting pulselight");

    let mut config = match &args.config {
        Some(path) => Config::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => Config::default(),
    };
    if let Some(rate) = args.tick_rate {
        config.sync.tick_rate_hz = rate;
    }
    if args.fixed_tempo {
        config.sync.follow_analysis = false;
    }
    let source = open_source(&args, &mut config)?;
    config.validate()?;

    // analysis lane
    let queue = ProcessingQueue::new(config.audio.queue_capacity);
    let latest = LatestAnalysis::new();
    let publisher = Arc::new(AnalysisPublisher::new());
    let beats = publisher.subscribe();
    let engine = AudioAnalysisEngine::new(&config.audio)?;
    let mut worker =
        AnalysisWorker::spawn(engine, queue.clone(), latest.clone(), Arc::clone(&publisher))?;
    drop(publisher);

    let beat_logger = std::thread::spawn(move || {
        for analysis in beats.iter().filter(|a| a.rhythm.beat_detected) {
            info!(
                "Beat #{} at {:.2}s | {:.1} BPM | {} / {}",
                analysis.rhythm.beat_count,
                analysis.timestamp_ms / 1000.0,
                analysis.rhythm.tempo_bpm,
                analysis.mood.label,
                analysis.genre.predicted
            );
        }
    });

    // effect scheduler
    let scheduler = SchedulerHandle::spawn(&config.sync, Some(latest.clone()));
    for effect in build_effects(&config.effects) {
        scheduler.scheduler().register_effect(effect);
    }
    if config.groups.is_empty() && !config.effects.is_empty() {
        let all = config.effects.iter().map(|e| e.id.clone()).collect();
        scheduler.scheduler().create_group(GroupSpec {
            name: "all".into(),
            effect_ids: all,
            ..Default::default()
        })?;
    }
    for group in &config.groups {
        scheduler.scheduler().create_group(GroupSpec::from(group))?;
    }
    if config.effects.is_empty() {
        warn!("No effects configured; analysis runs without driving any device");
    }

    // capture lane
    let audio = &config.audio;
    let assembler = FrameAssembler::new(audio.frame_size, audio.hop_size, audio.sample_rate);
    // a live device already delivers samples in real time
    let pace = !args.no_realtime && !args.live;
    let mut capture = CaptureLane::spawn(source, assembler, queue.clone(), pace)?;

    let deadline = args
        .duration
        .map(|secs| Instant::now() + Duration::from_secs_f64(secs.max(0.0)));
    let mut poll = tokio::time::interval(Duration::from_millis(100));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, shutting down");
                break;
            }
            _ = poll.tick() => {
                if capture.is_finished() {
                    info!("Input finished");
                    break;
                }
                if deadline.is_some_and(|d| Instant::now() >= d) {
                    info!("Duration elapsed");
                    break;
                }
            }
        }
    }

    let captured = capture.stop();
    let report = scheduler.stop().await;
    let analyzed = worker.stop();
    if beat_logger.join().is_err() {
        warn!("Beat logger panicked");
    }

    let last = latest.load();
    info!(
        "Captured {} frames, analyzed {}, dropped {} on overflow, discarded {} at shutdown",
        captured.frames,
        analyzed.processed,
        queue.dropped(),
        analyzed.discarded
    );
    info!(
        "Final tempo {:.1} BPM after {} beats; mood {}, genre {}; {} scheduler ticks",
        last.rhythm.tempo_bpm,
        last.rhythm.beat_count,
        last.mood.label,
        last.genre.predicted,
        report.ticks
    );

    Ok(())
}
