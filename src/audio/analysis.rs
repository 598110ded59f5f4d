use serde::Serialize;

use super::beat_detector::BeatState;
use super::classifier::{Genre, Mood};

pub const MFCC_COEFFICIENTS: usize = 13;
pub const COARSE_BANDS: usize = 8;

/// Complete feature vector produced by one analysis cycle.
///
/// Every field comes from the current frame plus the engine's bounded
/// history. A snapshot with `complete == false` is the fail-soft fallback and
/// carries only its timestamp.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AudioAnalysis {
    pub timestamp_ms: f64,
    pub complete: bool,

    pub volume: f32,
    pub peak: f32,

    pub bands: BandFeatures,
    pub spectral: SpectralFeatures,
    pub mfcc: [f32; MFCC_COEFFICIENTS],
    pub rhythm: RhythmFeatures,
    pub harmonic: HarmonicFeatures,
    pub temporal: TemporalFeatures,
    pub quality: QualityFeatures,
    pub mood: MoodFeatures,
    pub genre: GenrePrediction,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BandFeatures {
    /// Mean magnitude of eight equal slices of the spectrum, low to high.
    pub coarse: [f32; COARSE_BANDS],
    pub named: NamedBands,
}

/// Summed magnitude over fixed frequency ranges.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct NamedBands {
    pub sub_bass: f32,   // 20-60 Hz
    pub bass: f32,       // 60-250 Hz
    pub low_mid: f32,    // 250-500 Hz
    pub mid: f32,        // 500-2000 Hz
    pub high_mid: f32,   // 2000-4000 Hz
    pub presence: f32,   // 4000-6000 Hz
    pub brilliance: f32, // 6000-8000 Hz
    pub air: f32,        // 8000-20000 Hz
}

impl NamedBands {
    pub const RANGES_HZ: [(f32, f32); 8] = [
        (20.0, 60.0),
        (60.0, 250.0),
        (250.0, 500.0),
        (500.0, 2000.0),
        (2000.0, 4000.0),
        (4000.0, 6000.0),
        (6000.0, 8000.0),
        (8000.0, 20000.0),
    ];

    pub fn from_array(values: [f32; 8]) -> Self {
        Self {
            sub_bass: values[0],
            bass: values[1],
            low_mid: values[2],
            mid: values[3],
            high_mid: values[4],
            presence: values[5],
            brilliance: values[6],
            air: values[7],
        }
    }

    pub fn to_array(&self) -> [f32; 8] {
        [
            self.sub_bass,
            self.bass,
            self.low_mid,
            self.mid,
            self.high_mid,
            self.presence,
            self.brilliance,
            self.air,
        ]
    }

    pub fn total(&self) -> f32 {
        self.to_array().iter().sum()
    }

    /// Share of named-band energy below 250 Hz.
    pub fn bass_ratio(&self) -> f32 {
        let total = self.total();
        if total > 0.0 {
            (self.sub_bass + self.bass) / total
        } else {
            0.0
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct SpectralFeatures {
    pub centroid: f32,  // Hz
    pub rolloff: f32,   // Hz
    pub bandwidth: f32, // Hz
    pub flux: f32,
    pub flatness: f32,
    pub contrast: f32,
    pub zero_crossing_rate: f32,
    pub onset_strength: f32,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct RhythmFeatures {
    pub beat_state: BeatState,
    pub beat_detected: bool,
    pub beat_confidence: f32,
    pub beat_strength: f32,
    /// Tempo of record: averaged over the beat history.
    pub tempo_bpm: f32,
    /// Running estimate from the most recent valid inter-beat interval.
    pub instantaneous_tempo_bpm: f32,
    pub beat_count: u64,
    pub regularity: f32,
    pub complexity: f32,
}

impl Default for RhythmFeatures {
    fn default() -> Self {
        Self {
            beat_state: BeatState::Idle,
            beat_detected: false,
            beat_confidence: 0.0,
            beat_strength: 0.0,
            tempo_bpm: 0.0,
            instantaneous_tempo_bpm: 0.0,
            beat_count: 0,
            regularity: 0.0,
            complexity: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct HarmonicFeatures {
    pub fundamental_hz: f32,
    pub harmonicity: f32,
    pub inharmonicity: f32,
    pub harmonic_count: u32,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct TemporalFeatures {
    pub attack_ms: f32,
    pub decay_ms: f32,
    pub sustain_level: f32,
    pub release_ms: f32,
    pub transient_strength: f32,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct QualityFeatures {
    pub dynamic_range_db: f32,
    pub crest_factor: f32,
    pub compression_ratio: f32,
    pub snr_db: f32,
    pub distortion: f32,
    pub clipping: f32,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct MoodFeatures {
    pub energy: f32,
    pub valence: f32,
    pub arousal: f32,
    pub dominance: f32,
    pub label: Mood,
    pub confidence: f32,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct GenrePrediction {
    /// One entry per genre, in scorer order.
    pub probabilities: Vec<(Genre, f32)>,
    pub predicted: Genre,
    pub confidence: f32,
}

impl GenrePrediction {
    pub fn probability(&self, genre: Genre) -> f32 {
        self.probabilities
            .iter()
            .find(|(g, _)| *g == genre)
            .map(|(_, p)| *p)
            .unwrap_or(0.0)
    }
}

impl AudioAnalysis {
    /// Fallback snapshot carrying only a timestamp.
    pub fn minimal(timestamp_ms: f64) -> Self {
        Self {
            timestamp_ms,
            complete: false,
            ..Default::default()
        }
    }
}
