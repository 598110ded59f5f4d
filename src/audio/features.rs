//! Feature extraction over a magnitude spectrum and its raw frame.
//!
//! Everything here is a pure function of its arguments except the spectral
//! flux / onset tracking on [`FeatureExtractor`], which keeps the previous
//! spectrum sum and a short ring of recent spectra.

use super::analysis::{
    BandFeatures, HarmonicFeatures, NamedBands, QualityFeatures, SpectralFeatures,
    TemporalFeatures, COARSE_BANDS, MFCC_COEFFICIENTS,
};
use super::history::RingBuffer;
use super::mfcc::MelFilterbank;

pub const SPECTRUM_HISTORY: usize = 10;
pub const ROLLOFF_FRACTION: f32 = 0.85;
pub const CLIPPING_THRESHOLD: f32 = 0.95;
const MAX_SNR_DB: f32 = 96.0;
const MAX_HARMONIC: usize = 10;

/// Everything the extractor derives from a single frame.
#[derive(Debug, Clone)]
pub struct FrameFeatures {
    pub volume: f32,
    pub peak: f32,
    pub bands: BandFeatures,
    pub spectral: SpectralFeatures,
    pub mfcc: [f32; MFCC_COEFFICIENTS],
    pub harmonic: HarmonicFeatures,
    pub temporal: TemporalFeatures,
    pub quality: QualityFeatures,
}

pub struct FeatureExtractor {
    sample_rate: f32,
    mel: MelFilterbank,
    spectra: RingBuffer<Vec<f32>>,
    previous_sum: Option<f32>,
}

impl FeatureExtractor {
    pub fn new(sample_rate: f32, bins: usize) -> Self {
        Self {
            sample_rate,
            mel: MelFilterbank::new(sample_rate, bins),
            spectra: RingBuffer::new(SPECTRUM_HISTORY),
            previous_sum: None,
        }
    }

    pub fn extract(&mut self, samples: &[f32], spectrum: &[f32]) -> FrameFeatures {
        let sr = self.sample_rate;
        let centroid = spectral_centroid(spectrum, sr);

        let spectral = SpectralFeatures {
            centroid,
            rolloff: spectral_rolloff(spectrum, sr),
            bandwidth: spectral_bandwidth(spectrum, sr, centroid),
            flux: self.spectral_flux(spectrum),
            flatness: spectral_flatness(spectrum),
            contrast: spectral_contrast(spectrum),
            zero_crossing_rate: zero_crossing_rate(samples),
            onset_strength: self.onset_strength(spectrum),
        };

        FrameFeatures {
            volume: rms(samples),
            peak: peak(samples),
            bands: BandFeatures {
                coarse: coarse_bands(spectrum),
                named: named_bands(spectrum, sr),
            },
            spectral,
            mfcc: self.mel.coefficients(spectrum),
            harmonic: harmonic_features(spectrum, sr),
            temporal: temporal_features(samples, sr),
            quality: quality_features(samples),
        }
    }

    /// `|Σcurrent − Σprevious|`. The first call only seeds the history.
    pub fn spectral_flux(&mut self, spectrum: &[f32]) -> f32 {
        let total: f32 = spectrum.iter().sum();
        let flux = self.previous_sum.map_or(0.0, |previous| (total - previous).abs());
        self.previous_sum = Some(total);
        flux
    }

    /// Records `spectrum` and returns the mean positive per-bin increase over
    /// the previous spectrum, or 0 until two spectra have been seen.
    pub fn onset_strength(&mut self, spectrum: &[f32]) -> f32 {
        self.spectra.push(spectrum.to_vec());

        let (Some(current), Some(previous)) = (self.spectra.back(0), self.spectra.back(1)) else {
            return 0.0;
        };
        if current.is_empty() {
            return 0.0;
        }

        let rise: f32 = current
            .iter()
            .zip(previous.iter())
            .map(|(c, p)| (c - p).max(0.0))
            .sum();
        rise / current.len() as f32
    }

    pub fn spectrum_history_len(&self) -> usize {
        self.spectra.len()
    }
}

pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    (samples.iter().map(|x| x * x).sum::<f32>() / samples.len() as f32).sqrt()
}

pub fn peak(samples: &[f32]) -> f32 {
    samples.iter().fold(0.0f32, |a, &b| a.max(b.abs()))
}

pub fn bin_frequency(bin: usize, bins: usize, sample_rate: f32) -> f32 {
    bin as f32 * sample_rate / (2 * bins) as f32
}

pub fn spectral_centroid(spectrum: &[f32], sample_rate: f32) -> f32 {
    let total: f32 = spectrum.iter().sum();
    if total <= 0.0 {
        return 0.0;
    }

    let len = spectrum.len();
    let weighted: f32 = spectrum
        .iter()
        .enumerate()
        .map(|(i, &m)| bin_frequency(i, len, sample_rate) * m)
        .sum();
    weighted / total
}

/// Lowest frequency at which cumulative energy reaches 85% of the total.
pub fn spectral_rolloff(spectrum: &[f32], sample_rate: f32) -> f32 {
    let total: f32 = spectrum.iter().map(|m| m * m).sum();
    if total <= 0.0 {
        return 0.0;
    }

    let threshold = total * ROLLOFF_FRACTION;
    let len = spectrum.len();
    let mut cumulative = 0.0;
    for (i, &m) in spectrum.iter().enumerate() {
        cumulative += m * m;
        if cumulative >= threshold {
            return bin_frequency(i, len, sample_rate);
        }
    }
    sample_rate / 2.0
}

pub fn spectral_bandwidth(spectrum: &[f32], sample_rate: f32, centroid: f32) -> f32 {
    let total: f32 = spectrum.iter().sum();
    if total <= 0.0 {
        return 0.0;
    }

    let len = spectrum.len();
    let spread: f32 = spectrum
        .iter()
        .enumerate()
        .map(|(i, &m)| {
            let d = bin_frequency(i, len, sample_rate) - centroid;
            m * d * d
        })
        .sum();
    (spread / total).sqrt()
}

/// Geometric over arithmetic mean of the non-zero bins. Near 1 for noise,
/// near 0 for tonal content.
pub fn spectral_flatness(spectrum: &[f32]) -> f32 {
    let non_zero: Vec<f32> = spectrum.iter().copied().filter(|&m| m > 0.0).collect();
    if non_zero.is_empty() {
        return 0.0;
    }

    let n = non_zero.len() as f32;
    let log_mean = non_zero.iter().map(|m| m.ln()).sum::<f32>() / n;
    let arithmetic = non_zero.iter().sum::<f32>() / n;
    (log_mean.exp() / arithmetic).clamp(0.0, 1.0)
}

/// Mean peak/valley contrast across the eight coarse slices.
pub fn spectral_contrast(spectrum: &[f32]) -> f32 {
    let len = spectrum.len();
    if len < COARSE_BANDS {
        return 0.0;
    }

    let contrast: f32 = (0..COARSE_BANDS)
        .map(|band| {
            let slice = &spectrum[band * len / COARSE_BANDS..(band + 1) * len / COARSE_BANDS];
            let max = slice.iter().fold(0.0f32, |a, &b| a.max(b));
            let min = slice.iter().fold(f32::MAX, |a, &b| a.min(b));
            if max + min > 0.0 {
                (max - min) / (max + min)
            } else {
                0.0
            }
        })
        .sum();
    contrast / COARSE_BANDS as f32
}

pub fn zero_crossing_rate(samples: &[f32]) -> f32 {
    if samples.len() < 2 {
        return 0.0;
    }

    let crossings = samples.windows(2).filter(|w| w[0] * w[1] < 0.0).count();
    crossings as f32 / (samples.len() - 1) as f32
}

pub fn coarse_bands(spectrum: &[f32]) -> [f32; COARSE_BANDS] {
    let len = spectrum.len();
    let mut bands = [0.0; COARSE_BANDS];
    for (band, value) in bands.iter_mut().enumerate() {
        let start = band * len / COARSE_BANDS;
        let end = (band + 1) * len / COARSE_BANDS;
        if end > start {
            *value = spectrum[start..end].iter().sum::<f32>() / (end - start) as f32;
        }
    }
    bands
}

pub fn named_bands(spectrum: &[f32], sample_rate: f32) -> NamedBands {
    let len = spectrum.len();
    let mut values = [0.0; 8];
    for (value, &(lo, hi)) in values.iter_mut().zip(NamedBands::RANGES_HZ.iter()) {
        *value = spectrum
            .iter()
            .enumerate()
            .filter(|(i, _)| {
                let f = bin_frequency(*i, len, sample_rate);
                f >= lo && f < hi
            })
            .map(|(_, m)| m)
            .sum();
    }
    NamedBands::from_array(values)
}

pub fn quality_features(samples: &[f32]) -> QualityFeatures {
    let rms = rms(samples);
    let peak = peak(samples);
    if rms <= 0.0 || peak <= 0.0 {
        return QualityFeatures::default();
    }

    let crest_factor = peak / rms;
    let dynamic_range_db = 20.0 * crest_factor.log10();
    let compression_ratio = (1.0 - (dynamic_range_db - 3.0) / 17.0).clamp(0.0, 1.0);

    let noise_gate = 0.1 * peak;
    let noise: Vec<f32> = samples.iter().copied().filter(|x| x.abs() < noise_gate).collect();
    let noise_rms = self::rms(&noise);
    let snr_db = if noise_rms > 0.0 {
        (20.0 * (rms / noise_rms).log10()).min(MAX_SNR_DB)
    } else {
        MAX_SNR_DB
    };

    let clipped = samples.iter().filter(|x| x.abs() > CLIPPING_THRESHOLD).count();
    let clipping = clipped as f32 / samples.len() as f32;

    let squashed = if crest_factor < 1.2 { 0.5 } else { 0.0 };
    let distortion = (clipping * 10.0 + squashed).clamp(0.0, 1.0);

    QualityFeatures {
        dynamic_range_db,
        crest_factor,
        compression_ratio,
        snr_db,
        distortion,
        clipping,
    }
}

pub fn harmonic_features(spectrum: &[f32], sample_rate: f32) -> HarmonicFeatures {
    let len = spectrum.len();
    if len < 2 {
        return HarmonicFeatures::default();
    }

    let Some((fundamental, &f0_mag)) = spectrum
        .iter()
        .enumerate()
        .skip(1)
        .max_by(|a, b| a.1.total_cmp(b.1))
    else {
        return HarmonicFeatures::default();
    };
    if f0_mag <= 0.0 {
        return HarmonicFeatures::default();
    }

    let total_energy: f32 = spectrum.iter().map(|m| m * m).sum();
    let mut harmonic_energy = f0_mag * f0_mag;
    let mut deviation = 0.0;
    let mut count = 0u32;

    for h in 2..=MAX_HARMONIC {
        let target = fundamental * h;
        if target >= len {
            break;
        }

        let lo = target.saturating_sub(2);
        let hi = (target + 2).min(len - 1);
        let (bin, &mag) = spectrum[lo..=hi]
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, m)| (lo + i, m))
            .unwrap_or((target, &spectrum[target]));

        if mag >= 0.1 * f0_mag {
            count += 1;
            harmonic_energy += mag * mag;
            deviation += (bin as f32 - target as f32).abs() / target as f32;
        }
    }

    HarmonicFeatures {
        fundamental_hz: bin_frequency(fundamental, len, sample_rate),
        harmonicity: (harmonic_energy / total_energy).clamp(0.0, 1.0),
        inharmonicity: if count > 0 { deviation / count as f32 } else { 0.0 },
        harmonic_count: count,
    }
}

pub fn temporal_features(samples: &[f32], sample_rate: f32) -> TemporalFeatures {
    let peak = peak(samples);
    let rms = rms(samples);
    if peak <= 0.0 || rms <= 0.0 {
        return TemporalFeatures::default();
    }

    let to_ms = |n: usize| n as f32 / sample_rate * 1000.0;
    let attack_level = 0.9 * peak;
    let decay_level = 0.6 * peak;

    let attack_idx = samples
        .iter()
        .position(|x| x.abs() >= attack_level)
        .unwrap_or(0);
    let decay_ms = samples[attack_idx + 1..]
        .iter()
        .position(|x| x.abs() <= decay_level)
        .map_or(0.0, |offset| to_ms(offset + 1));
    let last_attack = samples
        .iter()
        .rposition(|x| x.abs() >= attack_level)
        .unwrap_or(samples.len() - 1);

    TemporalFeatures {
        attack_ms: to_ms(attack_idx),
        decay_ms,
        sustain_level: rms,
        release_ms: to_ms(samples.len() - 1 - last_attack),
        transient_strength: peak / rms,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    const SR: f32 = 44100.0;

    fn sine(freq: f32, amplitude: f32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| amplitude * (2.0 * PI * freq * i as f32 / SR).sin())
            .collect()
    }

    #[test]
    fn test_silence_produces_zero_features() {
        let samples = vec![0.0; 2048];
        let spectrum = vec![0.0; 1024];
        let mut extractor = FeatureExtractor::new(SR, 1024);
        let features = extractor.extract(&samples, &spectrum);

        assert_eq!(features.volume, 0.0);
        assert_eq!(features.spectral.centroid, 0.0);
        assert!(features.bands.coarse.iter().all(|&b| b == 0.0));
        assert!(features.bands.named.to_array().iter().all(|&b| b == 0.0));
        assert_eq!(features.spectral.flatness, 0.0);
        assert_eq!(features.quality.crest_factor, 0.0);
        assert_eq!(features.temporal.attack_ms, 0.0);
        assert_eq!(features.harmonic.harmonic_count, 0);
    }

    #[test]
    fn test_rms_of_full_scale_square() {
        let samples: Vec<f32> = (0..100).map(|i| if i % 2 == 0 { 1.0 } else { -1.0 }).collect();
        assert!((rms(&samples) - 1.0).abs() < 1e-6);
        assert!((zero_crossing_rate(&samples) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_centroid_is_idempotent() {
        let spectrum: Vec<f32> = (0..1024).map(|i| ((i * 31) % 17) as f32).collect();
        let first = spectral_centroid(&spectrum, SR);
        let second = spectral_centroid(&spectrum, SR);
        assert_eq!(first.to_bits(), second.to_bits());
    }

    #[test]
    fn test_centroid_of_single_bin() {
        let mut spectrum = vec![0.0; 1024];
        spectrum[100] = 3.0;
        let expected = bin_frequency(100, 1024, SR);
        assert!((spectral_centroid(&spectrum, SR) - expected).abs() < 1e-3);
        assert!(spectral_bandwidth(&spectrum, SR, expected) < 1e-3);
        assert!((spectral_rolloff(&spectrum, SR) - expected).abs() < 1e-3);
    }

    #[test]
    fn test_flatness_separates_noise_from_tone() {
        let flat = vec![1.0; 512];
        assert!((spectral_flatness(&flat) - 1.0).abs() < 1e-4);

        let mut tonal = vec![0.001; 512];
        tonal[40] = 100.0;
        assert!(spectral_flatness(&tonal) < 0.1);
    }

    #[test]
    fn test_flux_seeds_on_first_call() {
        let mut extractor = FeatureExtractor::new(SR, 4);
        assert_eq!(extractor.spectral_flux(&[1.0, 1.0, 1.0, 1.0]), 0.0);
        assert_eq!(extractor.spectral_flux(&[2.0, 1.0, 1.0, 1.0]), 1.0);
        assert_eq!(extractor.spectral_flux(&[0.0, 0.0, 0.0, 0.0]), 5.0);
    }

    #[test]
    fn test_onset_needs_two_spectra_and_counts_rises_only() {
        let mut extractor = FeatureExtractor::new(SR, 4);
        assert_eq!(extractor.onset_strength(&[1.0, 1.0, 1.0, 1.0]), 0.0);
        assert_eq!(extractor.onset_strength(&[3.0, 0.0, 1.0, 3.0]), 1.0);
        assert_eq!(extractor.onset_strength(&[0.0, 0.0, 0.0, 0.0]), 0.0);
    }

    #[test]
    fn test_spectrum_history_is_bounded() {
        let mut extractor = FeatureExtractor::new(SR, 4);
        for _ in 0..25 {
            extractor.onset_strength(&[1.0; 4]);
        }
        assert_eq!(extractor.spectrum_history_len(), SPECTRUM_HISTORY);
    }

    #[test]
    fn test_named_bands_place_tone() {
        let mut spectrum = vec![0.0; 1024];
        let bin = (100.0 / bin_frequency(1, 1024, SR)).round() as usize; // ~100 Hz
        spectrum[bin] = 5.0;
        let bands = named_bands(&spectrum, SR);
        assert_eq!(bands.bass, 5.0);
        assert_eq!(bands.sub_bass, 0.0);
        assert_eq!(bands.bass_ratio(), 1.0);
    }

    #[test]
    fn test_clipping_and_distortion() {
        let samples = vec![1.0, -1.0, 0.5, -0.5];
        let quality = quality_features(&samples);
        assert!((quality.clipping - 0.5).abs() < 1e-6);
        assert_eq!(quality.distortion, 1.0);
    }

    #[test]
    fn test_sine_quality_is_compressed_and_clean() {
        let samples = sine(440.0, 0.5, 4410);
        let quality = quality_features(&samples);
        assert!((quality.crest_factor - 2f32.sqrt()).abs() < 0.01);
        assert!(quality.compression_ratio > 0.99);
        assert_eq!(quality.clipping, 0.0);
        assert_eq!(quality.distortion, 0.0);
    }

    #[test]
    fn test_harmonic_series_is_harmonic() {
        let mut spectrum = vec![0.0; 1024];
        for h in 1..=5 {
            spectrum[20 * h] = 10.0 / h as f32;
        }
        let harmonic = harmonic_features(&spectrum, SR);
        assert_eq!(harmonic.harmonic_count, 4);
        assert!(harmonic.harmonicity > 0.99);
        assert_eq!(harmonic.inharmonicity, 0.0);
        assert!((harmonic.fundamental_hz - bin_frequency(20, 1024, SR)).abs() < 1e-3);
    }

    #[test]
    fn test_temporal_envelope_of_decaying_click() {
        let mut samples = vec![0.0; 441];
        samples[44] = 1.0; // 1 ms
        samples[45] = 0.5;
        let temporal = temporal_features(&samples, SR);
        assert!((temporal.attack_ms - 44.0 / SR * 1000.0).abs() < 1e-3);
        assert!((temporal.decay_ms - 1.0 / SR * 1000.0).abs() < 1e-3);
        assert!((temporal.release_ms - 396.0 / SR * 1000.0).abs() < 1e-3);
        assert!(temporal.transient_strength > 10.0);
    }
}
