use log::warn;

use super::analysis::{AudioAnalysis, RhythmFeatures};
use super::beat_detector::BeatTracker;
use super::classifier::{classify_genre, classify_mood, ClassifierInput};
use super::features::FeatureExtractor;
use super::fft::SpectrumAnalyzer;
use super::history::AnalysisHistory;
use super::AudioFrame;
use crate::config::AudioConfig;
use crate::error::{AnalysisError, ConfigError};

/// Runs the full analysis chain for one frame at a time and owns every
/// piece of rolling state the chain needs.
pub struct AudioAnalysisEngine {
    spectrum: SpectrumAnalyzer,
    features: FeatureExtractor,
    beats: BeatTracker,
    history: AnalysisHistory,
    sample_rate: f32,
}

impl AudioAnalysisEngine {
    pub fn new(config: &AudioConfig) -> Result<Self, ConfigError> {
        Self::with_history(config, AnalysisHistory::default())
    }

    pub fn with_history(
        config: &AudioConfig,
        history: AnalysisHistory,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let spectrum = SpectrumAnalyzer::new(config.fft_size)?;
        let sample_rate = config.sample_rate as f32;

        Ok(Self {
            features: FeatureExtractor::new(sample_rate, spectrum.bins()),
            spectrum,
            beats: BeatTracker::new(),
            history,
            sample_rate,
        })
    }

    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    pub fn fft_size(&self) -> usize {
        self.spectrum.fft_size()
    }

    pub fn history(&self) -> &AnalysisHistory {
        &self.history
    }

    pub fn beat_tracker(&self) -> &BeatTracker {
        &self.beats
    }

    /// Analyze one frame. Never fails: a frame that cannot be analyzed is
    /// logged and yields [`AudioAnalysis::minimal`].
    pub fn analyze(&mut self, frame: AudioFrame) -> AudioAnalysis {
        let timestamp_ms = frame.timestamp_ms;
        match self.try_analyze(frame) {
            Ok(analysis) => analysis,
            Err(e) => {
                warn!("Analysis failed at {:.1} ms: {}", timestamp_ms, e);
                AudioAnalysis::minimal(timestamp_ms)
            }
        }
    }

    pub fn try_analyze(&mut self, frame: AudioFrame) -> Result<AudioAnalysis, AnalysisError> {
        validate_frame(&frame.samples)?;

        let spectrum = self.spectrum.spectrum(&frame.samples);
        let features = self.features.extract(&frame.samples, &spectrum);

        let update = self.beats.update(
            features.spectral.onset_strength,
            features.volume,
            frame.timestamp_ms,
        );
        let tempo_bpm = self.beats.tempo_estimate();

        let rhythm = RhythmFeatures {
            beat_state: update.state,
            beat_detected: update.beat.is_some(),
            beat_confidence: update.beat.map_or(0.0, |b| b.confidence),
            beat_strength: update.beat.map_or(0.0, |b| b.strength),
            tempo_bpm,
            instantaneous_tempo_bpm: self.beats.instantaneous_tempo(),
            beat_count: self.beats.beat_count(),
            regularity: self.beats.rhythm_regularity(),
            complexity: self.beats.rhythm_complexity(),
        };

        let input = ClassifierInput {
            volume: features.volume,
            bass_ratio: features.bands.named.bass_ratio(),
            onset_strength: features.spectral.onset_strength,
            centroid_hz: features.spectral.centroid,
            spectral_flux: features.spectral.flux,
            spectrum_len: spectrum.len(),
            flatness: features.spectral.flatness,
            zero_crossing_rate: features.spectral.zero_crossing_rate,
            harmonicity: features.harmonic.harmonicity,
            tempo_bpm,
            regularity: rhythm.regularity,
            complexity: rhythm.complexity,
            distortion: features.quality.distortion,
            dynamic_range_db: features.quality.dynamic_range_db,
        };
        let mood = classify_mood(&input);
        let genre = classify_genre(&input);

        self.history.record(mood.energy, mood.valence, tempo_bpm);

        Ok(AudioAnalysis {
            timestamp_ms: frame.timestamp_ms,
            complete: true,
            volume: features.volume,
            peak: features.peak,
            bands: features.bands,
            spectral: features.spectral,
            mfcc: features.mfcc,
            rhythm,
            harmonic: features.harmonic,
            temporal: features.temporal,
            quality: features.quality,
            mood,
            genre,
        })
    }
}

fn validate_frame(samples: &[f32]) -> Result<(), AnalysisError> {
    if samples.is_empty() {
        return Err(AnalysisError::EmptyFrame);
    }
    if let Some((index, &value)) = samples.iter().enumerate().find(|(_, s)| !s.is_finite()) {
        return Err(AnalysisError::NonFiniteSample { index, value });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::beat_detector::BeatState;
    use crate::audio::history::HISTORY_CAPACITY;
    use std::f32::consts::PI;

    const SR: u32 = 44100;
    /// 50 ms frames so a 500 ms beat grid lands exactly on frame boundaries.
    const FRAME: usize = 2205;

    fn engine() -> AudioAnalysisEngine {
        AudioAnalysisEngine::new(&AudioConfig::default()).unwrap()
    }

    fn frame_at(index: usize, samples: Vec<f32>) -> AudioFrame {
        AudioFrame::new(samples, index as f64 * FRAME as f64 * 1000.0 / SR as f64)
    }

    /// Burst train: one 50 ms, 440 Hz burst (RMS ~0.5) every `period` frames
    /// starting at frame `first`, silence in between.
    fn burst_train(frames: usize, first: usize, period: usize) -> Vec<AudioFrame> {
        (0..frames)
            .map(|i| {
                let samples = if i >= first && (i - first) % period == 0 {
                    (0..FRAME)
                        .map(|n| 0.707 * (2.0 * PI * 440.0 * n as f32 / SR as f32).sin())
                        .collect()
                } else {
                    vec![0.0; FRAME]
                };
                frame_at(i, samples)
            })
            .collect()
    }

    #[test]
    fn test_silence_is_well_formed() {
        let mut engine = engine();
        let analysis = engine.analyze(frame_at(0, vec![0.0; FRAME]));

        assert!(analysis.complete);
        assert_eq!(analysis.volume, 0.0);
        assert_eq!(analysis.spectral.centroid, 0.0);
        assert!(analysis.bands.coarse.iter().all(|&b| b == 0.0));
        assert!(analysis.bands.named.to_array().iter().all(|&b| b == 0.0));
        assert!(!analysis.rhythm.beat_detected);
        assert_eq!(analysis.rhythm.tempo_bpm, 120.0);
        assert!(analysis.mfcc.iter().all(|c| c.is_finite()));
    }

    #[test]
    fn test_bad_frames_fall_back_to_minimal_snapshot() {
        let mut engine = engine();

        let empty = engine.analyze(AudioFrame::new(Vec::new(), 12.5));
        assert!(!empty.complete);
        assert_eq!(empty.timestamp_ms, 12.5);

        let mut samples = vec![0.1; FRAME];
        samples[7] = f32::NAN;
        let err = engine.try_analyze(AudioFrame::new(samples.clone(), 0.0)).unwrap_err();
        assert!(matches!(err, AnalysisError::NonFiniteSample { index: 7, .. }));
        let fallback = engine.analyze(AudioFrame::new(samples, 40.0));
        assert!(!fallback.complete);
        assert_eq!(fallback.volume, 0.0);

        // the next good frame analyzes normally
        assert!(engine.analyze(frame_at(3, vec![0.0; FRAME])).complete);
    }

    #[test]
    fn test_burst_train_at_120_bpm() {
        let mut engine = engine();
        // 2 s of audio, bursts at 100, 600, 1100, 1600 ms
        let mut beats = Vec::new();
        let mut last = None;
        for frame in burst_train(40, 2, 10) {
            let analysis = engine.analyze(frame);
            if analysis.rhythm.beat_detected {
                assert_eq!(analysis.rhythm.beat_state, BeatState::BeatConfirmed);
                beats.push(analysis.timestamp_ms);
            }
            last = Some(analysis);
        }

        let last = last.unwrap();
        assert!(beats.len() >= 3, "confirmed beats: {:?}", beats);
        assert!((last.rhythm.tempo_bpm - 120.0).abs() <= 5.0, "tempo {}", last.rhythm.tempo_bpm);
        assert!(last.rhythm.regularity > 0.8);
    }

    #[test]
    fn test_histories_hold_exactly_capacity() {
        let mut engine = engine();
        for frame in burst_train(130, 0, 8) {
            engine.analyze(frame);
        }
        let history = engine.history();
        assert_eq!(history.energy.len(), HISTORY_CAPACITY);
        assert_eq!(history.valence.len(), HISTORY_CAPACITY);
        assert_eq!(history.tempo.len(), HISTORY_CAPACITY);
    }

    #[test]
    fn test_explicit_history_is_used() {
        let mut history = AnalysisHistory::new(5);
        history.record(0.1, 0.2, 100.0);
        let mut engine =
            AudioAnalysisEngine::with_history(&AudioConfig::default(), history).unwrap();
        for i in 0..10 {
            engine.analyze(frame_at(i, vec![0.0; FRAME]));
        }
        assert_eq!(engine.history().tempo.len(), 5);
    }

    #[test]
    fn test_rejects_invalid_fft_size() {
        let config = AudioConfig {
            fft_size: 1500,
            ..Default::default()
        };
        assert!(AudioAnalysisEngine::new(&config).is_err());
    }
}
