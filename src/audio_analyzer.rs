use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;

use pulselight::audio::{
    AudioAnalysis, AudioAnalysisEngine, FrameAssembler, FrameSource, WavFileSource,
};
use pulselight::config::Config;

#[derive(Parser)]
#[command(name = "audio-analyzer")]
#[command(about = "Offline analysis of a WAV file: feature statistics, beats, mood and genre")]
struct Args {
    /// WAV file to analyze
    audio_file: PathBuf,

    /// Output JSON file path
    #[arg(long, short, default_value = "analysis_results.json")]
    output: PathBuf,

    /// Include the full analysis of every frame (large output)
    #[arg(long)]
    frame_by_frame: bool,

    /// TOML config; only the [audio] section is used
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// FFT size override (power of two)
    #[arg(long)]
    fft_size: Option<usize>,

    /// Hop size override in samples
    #[arg(long)]
    hop_size: Option<usize>,
}

#[derive(Debug, Serialize)]
struct FeatureStats {
    min: f32,
    max: f32,
    mean: f32,
    median: f32,
    std_dev: f32,
    samples: usize,
    histogram: Vec<(f32, usize)>, // (bin start, count)
}

#[derive(Debug, Serialize)]
struct BeatEventRecord {
    timestamp_ms: f64,
    confidence: f32,
    strength: f32,
    tempo_bpm: f32,
}

#[derive(Debug, Serialize)]
struct BeatStats {
    total_beats: usize,
    final_tempo_bpm: f32,
    mean_interval_ms: f64,
    interval_std_dev_ms: f64,
    regularity: f32,
}

#[derive(Debug, Serialize)]
struct FileInfo {
    filename: String,
    sample_rate: u32,
    channels: usize,
    duration_seconds: f32,
    total_frames: usize,
    failed_frames: usize,
}

#[derive(Debug, Serialize)]
struct AnalysisSettings {
    fft_size: usize,
    frame_size: usize,
    hop_size: usize,
    include_frame_data: bool,
}

#[derive(Debug, Serialize)]
struct AnalysisReport {
    file_info: FileInfo,
    settings: AnalysisSettings,
    feature_stats: BTreeMap<&'static str, FeatureStats>,
    beat_stats: BeatStats,
    beat_events: Vec<BeatEventRecord>,
    /// Share of complete frames per mood label.
    mood_distribution: BTreeMap<String, f32>,
    /// Share of complete frames per predicted genre.
    genre_distribution: BTreeMap<String, f32>,
    frame_data: Option<Vec<AudioAnalysis>>,
}

/// Per-feature sample columns accumulated over the run.
#[derive(Default)]
struct Collector {
    columns: BTreeMap<&'static str, Vec<f32>>,
    beats: Vec<BeatEventRecord>,
    moods: BTreeMap<String, usize>,
    genres: BTreeMap<String, usize>,
    complete: usize,
    failed: usize,
    frames: Vec<AudioAnalysis>,
}

impl Collector {
    fn add(&mut self, name: &'static str, value: f32) {
        if value.is_finite() {
            self.columns.entry(name).or_default().push(value);
        }
    }

    fn record(&mut self, analysis: &AudioAnalysis, keep_frame: bool) {
        if keep_frame {
            self.frames.push(analysis.clone());
        }
        if !analysis.complete {
            self.failed += 1;
            return;
        }
        self.complete += 1;

        let named = &analysis.bands.named;
        for (name, value) in [
            ("sub_bass", named.sub_bass),
            ("bass", named.bass),
            ("low_mid", named.low_mid),
            ("mid", named.mid),
            ("high_mid", named.high_mid),
            ("presence", named.presence),
            ("brilliance", named.brilliance),
            ("air", named.air),
            ("volume", analysis.volume),
            ("peak", analysis.peak),
            ("spectral_centroid", analysis.spectral.centroid),
            ("spectral_rolloff", analysis.spectral.rolloff),
            ("spectral_bandwidth", analysis.spectral.bandwidth),
            ("spectral_flux", analysis.spectral.flux),
            ("spectral_flatness", analysis.spectral.flatness),
            ("zero_crossing_rate", analysis.spectral.zero_crossing_rate),
            ("onset_strength", analysis.spectral.onset_strength),
            ("harmonicity", analysis.harmonic.harmonicity),
            ("dynamic_range_db", analysis.quality.dynamic_range_db),
            ("energy", analysis.mood.energy),
            ("valence", analysis.mood.valence),
            ("arousal", analysis.mood.arousal),
            ("tempo_bpm", analysis.rhythm.tempo_bpm),
        ] {
            self.add(name, value);
        }

        if analysis.rhythm.beat_detected {
            self.beats.push(BeatEventRecord {
                timestamp_ms: analysis.timestamp_ms,
                confidence: analysis.rhythm.beat_confidence,
                strength: analysis.rhythm.beat_strength,
                tempo_bpm: analysis.rhythm.tempo_bpm,
            });
        }

        *self.moods.entry(analysis.mood.label.to_string()).or_default() += 1;
        *self.genres.entry(analysis.genre.predicted.to_string()).or_default() += 1;
    }
}

fn calculate_stats(data: &[f32]) -> FeatureStats {
    if data.is_empty() {
        return FeatureStats {
            min: 0.0, max: 0.0, mean: 0.0, median: 0.0, std_dev: 0.0,
            samples: 0, histogram: Vec::new(),
        };
    }

    let mut sorted = data.to_vec();
    sorted.sort_by(f32::total_cmp);

    let min = sorted[0];
    let max = sorted[sorted.len() - 1];
    let mean = data.iter().sum::<f32>() / data.len() as f32;
    let median = sorted[sorted.len() / 2];
    let variance = data.iter().map(|x| (x - mean).powi(2)).sum::<f32>() / data.len() as f32;

    // 20 equal-width bins; the max lands in the last one
    let mut histogram = Vec::new();
    if max > min {
        let bin_size = (max - min) / 20.0;
        let mut counts = [0usize; 20];
        for &x in data {
            let bin = (((x - min) / bin_size) as usize).min(19);
            counts[bin] += 1;
        }
        histogram = counts
            .iter()
            .enumerate()
            .map(|(i, &count)| (min + i as f32 * bin_size, count))
            .collect();
    }

    FeatureStats {
        min,
        max,
        mean,
        median,
        std_dev: variance.sqrt(),
        samples: data.len(),
        histogram,
    }
}

fn beat_stats(beats: &[BeatEventRecord], last: Option<&AudioAnalysis>) -> BeatStats {
    let intervals: Vec<f64> = beats
        .windows(2)
        .map(|w| w[1].timestamp_ms - w[0].timestamp_ms)
        .collect();
    let (mean, std_dev) = if intervals.is_empty() {
        (0.0, 0.0)
    } else {
        let n = intervals.len() as f64;
        let mean = intervals.iter().sum::<f64>() / n;
        let variance = intervals.iter().map(|iv| (iv - mean).powi(2)).sum::<f64>() / n;
        (mean, variance.sqrt())
    };

    BeatStats {
        total_beats: beats.len(),
        final_tempo_bpm: last.map_or(0.0, |a| a.rhythm.tempo_bpm),
        mean_interval_ms: mean,
        interval_std_dev_ms: std_dev,
        regularity: last.map_or(0.0, |a| a.rhythm.regularity),
    }
}

fn distribution(counts: &BTreeMap<String, usize>, total: usize) -> BTreeMap<String, f32> {
    counts
        .iter()
        .map(|(label, &count)| (label.clone(), count as f32 / total.max(1) as f32))
        .collect()
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => Config::default(),
    };
    if let Some(fft_size) = args.fft_size {
        config.audio.fft_size = fft_size;
        config.audio.frame_size = fft_size;
    }
    if let Some(hop_size) = args.hop_size {
        config.audio.hop_size = hop_size;
    }

    let mut source = WavFileSource::open(&args.audio_file)
        .with_context(|| format!("opening {}", args.audio_file.display()))?;
    config.audio.sample_rate = source.sample_rate();
    config.audio.validate()?;

    info!("Analyzing {}", args.audio_file.display());
    let channels = source.channels();
    let duration_seconds = source.duration_samples() as f32 / source.sample_rate() as f32;

    let mut engine = AudioAnalysisEngine::new(&config.audio)?;
    let audio = &config.audio;
    let mut assembler = FrameAssembler::new(audio.frame_size, audio.hop_size, audio.sample_rate);
    let mut collector = Collector::default();
    let mut last = None;
    let mut total_frames = 0usize;

    while let Some(chunk) = source.next_chunk() {
        for frame in assembler.push(&chunk) {
            let analysis = engine.analyze(frame);
            collector.record(&analysis, args.frame_by_frame);
            total_frames += 1;
            if total_frames % 500 == 0 {
                info!(
                    "Processed {} frames ({:.1}s of {:.1}s)",
                    total_frames,
                    analysis.timestamp_ms / 1000.0,
                    duration_seconds
                );
            }
            last = Some(analysis);
        }
    }
    info!(
        "Analysis complete: {} frames, {} beats, final tempo {:.1} BPM",
        total_frames,
        collector.beats.len(),
        last.as_ref().map_or(0.0, |a| a.rhythm.tempo_bpm)
    );

    let report = AnalysisReport {
        file_info: FileInfo {
            filename: args.audio_file.display().to_string(),
            sample_rate: config.audio.sample_rate,
            channels,
            duration_seconds,
            total_frames,
            failed_frames: collector.failed,
        },
        settings: AnalysisSettings {
            fft_size: config.audio.fft_size,
            frame_size: config.audio.frame_size,
            hop_size: config.audio.hop_size,
            include_frame_data: args.frame_by_frame,
        },
        feature_stats: collector
            .columns
            .iter()
            .map(|(&name, data)| (name, calculate_stats(data)))
            .collect(),
        beat_stats: beat_stats(&collector.beats, last.as_ref()),
        mood_distribution: distribution(&collector.moods, collector.complete),
        genre_distribution: distribution(&collector.genres, collector.complete),
        beat_events: collector.beats,
        frame_data: args.frame_by_frame.then_some(collector.frames),
    };

    let writer = BufWriter::new(File::create(&args.output)?);
    serde_json::to_writer_pretty(writer, &report)?;
    info!("Report written to {}", args.output.display());

    Ok(())
}
