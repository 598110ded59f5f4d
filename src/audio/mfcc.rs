use std::f32::consts::PI;

use super::analysis::MFCC_COEFFICIENTS;

pub const MEL_FILTERS: usize = 26;

pub fn hz_to_mel(hz: f32) -> f32 {
    2595.0 * (1.0 + hz / 700.0).log10()
}

pub fn mel_to_hz(mel: f32) -> f32 {
    700.0 * (10f32.powf(mel / 2595.0) - 1.0)
}

/// Triangular mel filterbank plus the truncated DCT-II used for MFCCs.
///
/// Built once per (sample rate, spectrum length); applying it has no side
/// effects.
pub struct MelFilterbank {
    /// Sparse `(bin, weight)` pairs per filter.
    filters: Vec<Vec<(usize, f32)>>,
    dct: Vec<[f32; MEL_FILTERS]>,
    bins: usize,
}

impl MelFilterbank {
    pub fn new(sample_rate: f32, bins: usize) -> Self {
        let nyquist = sample_rate / 2.0;
        let mel_max = hz_to_mel(nyquist);
        let edges: Vec<f32> = (0..MEL_FILTERS + 2)
            .map(|i| mel_to_hz(mel_max * i as f32 / (MEL_FILTERS + 1) as f32))
            .collect();

        let bin_hz = |i: usize| i as f32 * sample_rate / (2 * bins) as f32;

        let filters: Vec<Vec<(usize, f32)>> = (0..MEL_FILTERS)
            .map(|m| {
                let (lo, center, hi) = (edges[m], edges[m + 1], edges[m + 2]);
                (0..bins)
                    .filter_map(|i| {
                        let f = bin_hz(i);
                        let weight = if f > lo && f <= center {
                            (f - lo) / (center - lo)
                        } else if f > center && f < hi {
                            (hi - f) / (hi - center)
                        } else {
                            0.0
                        };
                        (weight > 0.0).then_some((i, weight))
                    })
                    .collect()
            })
            .collect();

        let dct: Vec<[f32; MEL_FILTERS]> = (0..MFCC_COEFFICIENTS)
            .map(|k| {
                let mut row = [0.0; MEL_FILTERS];
                for (n, value) in row.iter_mut().enumerate() {
                    *value = (PI * k as f32 * (n as f32 + 0.5) / MEL_FILTERS as f32).cos();
                }
                row
            })
            .collect();

        Self { filters, dct, bins }
    }

    pub fn bins(&self) -> usize {
        self.bins
    }

    /// Log mel energies (natural log, floored at 1e-10).
    pub fn log_energies(&self, spectrum: &[f32]) -> [f32; MEL_FILTERS] {
        let mut energies = [0.0; MEL_FILTERS];
        for (energy, filter) in energies.iter_mut().zip(&self.filters) {
            let sum: f32 = filter
                .iter()
                .filter_map(|&(bin, weight)| spectrum.get(bin).map(|m| m * weight))
                .sum();
            *energy = (sum + 1e-10).ln();
        }
        energies
    }

    pub fn coefficients(&self, spectrum: &[f32]) -> [f32; MFCC_COEFFICIENTS] {
        let log_energies = self.log_energies(spectrum);
        let mut mfcc = [0.0; MFCC_COEFFICIENTS];
        for (coefficient, basis) in mfcc.iter_mut().zip(&self.dct) {
            *coefficient = basis
                .iter()
                .zip(log_energies.iter())
                .map(|(b, e)| b * e)
                .sum();
        }
        mfcc
    }
}
