//! Heuristic mood and genre scoring over a finished feature set.
//!
//! Both classifiers are pure functions: the same [`ClassifierInput`] always
//! produces the same scores.

use serde::Serialize;
use std::fmt;

use super::analysis::{GenrePrediction, MoodFeatures};
use crate::config::{MAX_TEMPO_BPM, MIN_TEMPO_BPM};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum Mood {
    Euphoric,
    Aggressive,
    Peaceful,
    Melancholic,
    Energetic,
    Uplifting,
    #[default]
    Neutral,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub enum Genre {
    #[default]
    Electronic,
    Rock,
    Classical,
    Jazz,
    HipHop,
}

impl Genre {
    /// Scorer order; ties in the arg-max resolve to the earlier entry.
    pub const ALL: [Genre; 5] = [
        Genre::Electronic,
        Genre::Rock,
        Genre::Classical,
        Genre::Jazz,
        Genre::HipHop,
    ];
}

impl fmt::Display for Mood {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl fmt::Display for Genre {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Genre::HipHop => write!(f, "Hip-Hop"),
            other => fmt::Debug::fmt(other, f),
        }
    }
}

/// The already-computed features the classifiers read.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClassifierInput {
    pub volume: f32,
    pub bass_ratio: f32,
    pub onset_strength: f32,
    pub centroid_hz: f32,
    pub spectral_flux: f32,
    pub spectrum_len: usize,
    pub flatness: f32,
    pub zero_crossing_rate: f32,
    pub harmonicity: f32,
    pub tempo_bpm: f32,
    pub regularity: f32,
    pub complexity: f32,
    pub distortion: f32,
    pub dynamic_range_db: f32,
}

fn mean3(a: f32, b: f32, c: f32) -> f32 {
    ((a + b + c) / 3.0).clamp(0.0, 1.0)
}

pub fn classify_mood(input: &ClassifierInput) -> MoodFeatures {
    let loudness = (input.volume * 2.0).min(1.0);
    let brightness = (input.centroid_hz / 8000.0).min(1.0);
    let tempo_span = MAX_TEMPO_BPM - MIN_TEMPO_BPM;
    let pace = ((input.tempo_bpm - MIN_TEMPO_BPM) / tempo_span).clamp(0.0, 1.0);
    let flux = if input.spectrum_len > 0 {
        (input.spectral_flux / input.spectrum_len as f32).min(1.0)
    } else {
        0.0
    };

    let energy = mean3(loudness, input.bass_ratio, input.onset_strength.min(1.0));
    let valence = mean3(brightness, input.harmonicity, input.regularity);
    let arousal = mean3(pace, flux, (input.zero_crossing_rate * 2.0).min(1.0));
    let dominance = mean3(loudness, input.bass_ratio, 1.0 - input.flatness);

    MoodFeatures {
        energy,
        valence,
        arousal,
        dominance,
        label: mood_label(energy, valence),
        confidence: (energy + valence + arousal + dominance) / 4.0,
    }
}

pub fn mood_label(energy: f32, valence: f32) -> Mood {
    match (energy, valence) {
        (e, v) if e > 0.6 && v > 0.6 => Mood::Euphoric,
        (e, v) if e > 0.6 && v < 0.4 => Mood::Aggressive,
        (e, v) if e < 0.4 && v > 0.6 => Mood::Peaceful,
        (e, v) if e < 0.4 && v < 0.4 => Mood::Melancholic,
        (e, _) if e > 0.6 => Mood::Energetic,
        (_, v) if v > 0.6 => Mood::Uplifting,
        _ => Mood::Neutral,
    }
}

fn rule(condition: bool, weight: f32) -> f32 {
    if condition {
        weight
    } else {
        0.0
    }
}

pub fn genre_score(genre: Genre, input: &ClassifierInput) -> f32 {
    let tempo = input.tempo_bpm;
    let score = match genre {
        Genre::Electronic => {
            rule((118.0..=140.0).contains(&tempo), 0.3)
                + rule(input.bass_ratio > 0.3, 0.3)
                + rule(input.regularity > 0.8, 0.2)
                + rule(input.flatness > 0.3, 0.2)
        }
        Genre::Rock => {
            rule((100.0..=160.0).contains(&tempo), 0.2)
                + rule(input.distortion > 0.3, 0.3)
                + rule((1500.0..=4000.0).contains(&input.centroid_hz), 0.2)
                + rule(input.dynamic_range_db < 12.0, 0.3)
        }
        Genre::Classical => {
            rule(input.harmonicity > 0.5, 0.3)
                + rule(input.dynamic_range_db > 15.0, 0.3)
                + rule(tempo < 100.0, 0.2)
                + rule(input.distortion < 0.05, 0.2)
        }
        Genre::Jazz => {
            rule((80.0..=140.0).contains(&tempo), 0.2)
                + rule(input.harmonicity > 0.3, 0.2)
                + rule(input.complexity > 0.4, 0.3)
                + rule((1000.0..=3000.0).contains(&input.centroid_hz), 0.3)
        }
        Genre::HipHop => {
            rule((70.0..=100.0).contains(&tempo), 0.3)
                + rule(input.bass_ratio > 0.4, 0.3)
                + rule(input.regularity > 0.7, 0.2)
                + rule(input.zero_crossing_rate < 0.1, 0.2)
        }
    };
    score.min(1.0)
}

pub fn classify_genre(input: &ClassifierInput) -> GenrePrediction {
    let probabilities: Vec<(Genre, f32)> = Genre::ALL
        .iter()
        .map(|&genre| (genre, genre_score(genre, input)))
        .collect();

    let (predicted, confidence) = probabilities
        .iter()
        .copied()
        .fold((Genre::ALL[0], f32::MIN), |best, candidate| {
            if candidate.1 > best.1 {
                candidate
            } else {
                best
            }
        });

    GenrePrediction {
        probabilities,
        predicted,
        confidence,
    }
}
