use rustfft::num_complex::Complex;
use std::f32::consts::PI;

use crate::error::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FftDirection {
    Forward,
    Inverse,
}

/// Turns a frame of samples into a Blackman-Harris windowed magnitude spectrum.
///
/// The window and the bit-reversal table are computed once per FFT size; the
/// transform itself is an iterative radix-2 Cooley-Tukey pass over a scratch
/// buffer owned by the analyzer.
pub struct SpectrumAnalyzer {
    fft_size: usize,
    window: Vec<f32>,
    bit_reversed: Vec<usize>,
    buffer: Vec<Complex<f32>>,
}

impl SpectrumAnalyzer {
    pub fn new(fft_size: usize) -> Result<Self, ConfigError> {
        if fft_size < 4 || !fft_size.is_power_of_two() {
            return Err(ConfigError::InvalidFftSize(fft_size));
        }

        Ok(Self {
            fft_size,
            window: Self::blackman_harris_window(fft_size),
            bit_reversed: bit_reversed_indices(fft_size),
            buffer: vec![Complex::new(0.0, 0.0); fft_size],
        })
    }

    fn blackman_harris_window(size: usize) -> Vec<f32> {
        let denom = (size - 1) as f32;
        (0..size)
            .map(|i| {
                let phase = 2.0 * PI * i as f32 / denom;
                0.35875 - 0.48829 * phase.cos() + 0.14128 * (2.0 * phase).cos()
                    - 0.01168 * (3.0 * phase).cos()
            })
            .collect()
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    /// Number of bins in every spectrum this analyzer produces.
    pub fn bins(&self) -> usize {
        self.fft_size / 2
    }

    pub fn window(&self) -> &[f32] {
        &self.window
    }

    /// Windowed magnitude spectrum of `frame`. Short frames are zero-padded,
    /// long frames truncated to the FFT size.
    pub fn spectrum(&mut self, frame: &[f32]) -> Vec<f32> {
        let len = self.fft_size.min(frame.len());

        for (i, slot) in self.buffer.iter_mut().enumerate() {
            let sample = if i < len { frame[i] * self.window[i] } else { 0.0 };
            *slot = Complex::new(sample, 0.0);
        }

        transform(&mut self.buffer, &self.bit_reversed, FftDirection::Forward);

        self.buffer[..self.fft_size / 2]
            .iter()
            .map(|c| (c.re * c.re + c.im * c.im).sqrt())
            .collect()
    }
}

/// In-place radix-2 FFT. The inverse direction is scaled by `1/N` so a
/// forward/inverse pair reproduces the input.
///
/// Returns `false` and leaves `buffer` untouched when its length is not a
/// power of two.
pub fn fft_in_place(buffer: &mut [Complex<f32>], direction: FftDirection) -> bool {
    if !buffer.len().is_power_of_two() {
        return false;
    }
    let indices = bit_reversed_indices(buffer.len());
    transform(buffer, &indices, direction);
    true
}

fn bit_reversed_indices(size: usize) -> Vec<usize> {
    let bits = size.trailing_zeros();
    if bits == 0 {
        return vec![0; size];
    }
    (0..size)
        .map(|i| i.reverse_bits() >> (usize::BITS - bits))
        .collect()
}

fn transform(buffer: &mut [Complex<f32>], bit_reversed: &[usize], direction: FftDirection) {
    let n = buffer.len();
    if n < 2 {
        return;
    }

    for (i, &j) in bit_reversed.iter().enumerate() {
        if i < j {
            buffer.swap(i, j);
        }
    }

    let sign = match direction {
        FftDirection::Forward => -1.0,
        FftDirection::Inverse => 1.0,
    };

    let mut len = 2;
    while len <= n {
        let angle = sign * 2.0 * PI / len as f32;
        let half = len / 2;
        for start in (0..n).step_by(len) {
            for k in 0..half {
                let theta = angle * k as f32;
                let twiddle = Complex::new(theta.cos(), theta.sin());
                let even = buffer[start + k];
                let odd = buffer[start + k + half] * twiddle;
                buffer[start + k] = even + odd;
                buffer[start + k + half] = even - odd;
            }
        }
        len <<= 1;
    }

    if direction == FftDirection::Inverse {
        let scale = 1.0 / n as f32;
        for value in buffer.iter_mut() {
            *value *= scale;
        }
    }
}
