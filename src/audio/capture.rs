//! Capture lane: pulls mono sample chunks from a [`FrameSource`], cuts
//! them into overlapping frames and feeds the processing queue.

use hound::{SampleFormat, WavReader};
use log::{info, warn};
use std::f32::consts::PI;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::queue::ProcessingQueue;
use super::AudioFrame;
use crate::error::CaptureError;

pub const DEFAULT_CHUNK_LEN: usize = 512;

/// A stream of mono samples in [-1, 1].
pub trait FrameSource: Send {
    /// Next block of samples, or `None` once the stream has ended.
    fn next_chunk(&mut self) -> Option<Vec<f32>>;

    fn sample_rate(&self) -> u32;
}

/// Streams a WAV file, mixing every channel down to mono.
pub struct WavFileSource {
    reader: WavReader<BufReader<File>>,
    channels: usize,
    sample_rate: u32,
    format: SampleFormat,
    scale: f32,
    chunk_len: usize,
}

impl WavFileSource {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, CaptureError> {
        let reader = WavReader::open(path)?;
        let spec = reader.spec();

        let scale = match (spec.sample_format, spec.bits_per_sample) {
            (SampleFormat::Float, 32) => 1.0,
            (SampleFormat::Int, bits @ 8..=32) => 1.0 / (1u64 << (bits - 1)) as f32,
            (format, bits) => {
                let described = format!("WAV {:?} at {} bits", format, bits);
                return Err(CaptureError::UnsupportedFormat(described));
            }
        };
        if spec.channels == 0 {
            return Err(CaptureError::UnsupportedFormat("zero channels".into()));
        }

        info!(
            "Opened WAV: {} Hz, {} channel(s), {} bits, {:.1} s",
            spec.sample_rate,
            spec.channels,
            spec.bits_per_sample,
            reader.duration() as f32 / spec.sample_rate as f32
        );

        Ok(Self {
            reader,
            channels: spec.channels as usize,
            sample_rate: spec.sample_rate,
            format: spec.sample_format,
            scale,
            chunk_len: DEFAULT_CHUNK_LEN,
        })
    }

    pub fn with_chunk_len(mut self, chunk_len: usize) -> Self {
        self.chunk_len = chunk_len.max(1);
        self
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Length of the file in per-channel samples.
    pub fn duration_samples(&self) -> u32 {
        self.reader.duration()
    }

    fn read_interleaved(&mut self, wanted: usize) -> Result<Vec<f32>, hound::Error> {
        match self.format {
            SampleFormat::Float => self.reader.samples::<f32>().take(wanted).collect(),
            SampleFormat::Int => {
                let scale = self.scale;
                self.reader
                    .samples::<i32>()
                    .take(wanted)
                    .map(|s| s.map(|v| v as f32 * scale))
                    .collect()
            }
        }
    }
}

impl FrameSource for WavFileSource {
    fn next_chunk(&mut self) -> Option<Vec<f32>> {
        let interleaved = match self.read_interleaved(self.chunk_len * self.channels) {
            Ok(samples) => samples,
            Err(e) => {
                warn!("WAV read failed, ending stream: {}", e);
                return None;
            }
        };
        if interleaved.is_empty() {
            return None;
        }

        Some(mix_to_mono(&interleaved, self.channels))
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

/// Average interleaved channels into one; a trailing partial frame is dropped.
pub fn mix_to_mono(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Synthetic metronome: a short sine burst at the start of every beat.
pub struct ToneBurstSource {
    sample_rate: u32,
    period_samples: u64,
    burst_samples: u64,
    frequency: f32,
    amplitude: f32,
    chunk_len: usize,
    position: u64,
    total_samples: Option<u64>,
}

impl ToneBurstSource {
    pub fn new(sample_rate: u32, bpm: f32) -> Self {
        let sample_rate = sample_rate.max(1);
        let period_samples = (60.0 * sample_rate as f64 / bpm.max(1.0) as f64).round() as u64;
        Self {
            sample_rate,
            period_samples: period_samples.max(1),
            burst_samples: (sample_rate as u64 / 20).min(period_samples),
            frequency: 440.0,
            amplitude: 0.7,
            chunk_len: DEFAULT_CHUNK_LEN,
            position: 0,
            total_samples: None,
        }
    }

    pub fn with_duration(mut self, seconds: f32) -> Self {
        self.total_samples = Some((seconds.max(0.0) as f64 * self.sample_rate as f64) as u64);
        self
    }

    pub fn with_chunk_len(mut self, chunk_len: usize) -> Self {
        self.chunk_len = chunk_len.max(1);
        self
    }

    pub fn with_tone(mut self, frequency: f32, amplitude: f32) -> Self {
        self.frequency = frequency;
        self.amplitude = amplitude.clamp(0.0, 1.0);
        self
    }

    fn sample_at(&self, n: u64) -> f32 {
        if n % self.period_samples < self.burst_samples {
            let t = n as f32 / self.sample_rate as f32;
            self.amplitude * (2.0 * PI * self.frequency * t).sin()
        } else {
            0.0
        }
    }
}

impl FrameSource for ToneBurstSource {
    fn next_chunk(&mut self) -> Option<Vec<f32>> {
        let end = match self.total_samples {
            Some(total) if self.position >= total => return None,
            Some(total) => (self.position + self.chunk_len as u64).min(total),
            None => self.position + self.chunk_len as u64,
        };

        let chunk = (self.position..end).map(|n| self.sample_at(n)).collect();
        self.position = end;
        Some(chunk)
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

/// Cuts a continuous sample stream into frames of `frame_len` samples that
/// start every `hop` samples. Each frame is stamped with the stream time of
/// its first sample.
pub struct FrameAssembler {
    frame_len: usize,
    hop: usize,
    sample_rate: f64,
    pending: Vec<f32>,
    /// Stream offset of `pending[0]`.
    offset: u64,
}

impl FrameAssembler {
    pub fn new(frame_len: usize, hop: usize, sample_rate: u32) -> Self {
        let frame_len = frame_len.max(1);
        Self {
            frame_len,
            hop: hop.clamp(1, frame_len),
            sample_rate: sample_rate.max(1) as f64,
            pending: Vec::with_capacity(frame_len * 2),
            offset: 0,
        }
    }

    pub fn push(&mut self, chunk: &[f32]) -> Vec<AudioFrame> {
        self.pending.extend_from_slice(chunk);

        let mut frames = Vec::new();
        while self.pending.len() >= self.frame_len {
            let timestamp_ms = self.offset as f64 / self.sample_rate * 1000.0;
            frames.push(AudioFrame::new(self.pending[..self.frame_len].to_vec(), timestamp_ms));
            self.pending.drain(..self.hop);
            self.offset += self.hop as u64;
        }
        frames
    }

    /// Stream offset, in samples, of the next frame to be emitted.
    pub fn offset(&self) -> u64 {
        self.offset
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureReport {
    pub samples: u64,
    pub frames: u64,
}

/// The capture lane thread.
pub struct CaptureLane {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<CaptureReport>>,
}

impl CaptureLane {
    /// Start pulling from `source`. With `realtime` set, the lane sleeps so
    /// frames arrive no faster than the source's sample rate.
    pub fn spawn(
        mut source: Box<dyn FrameSource>,
        mut assembler: FrameAssembler,
        queue: ProcessingQueue,
        realtime: bool,
    ) -> std::io::Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));

        let handle = {
            let stop = Arc::clone(&stop);
            thread::Builder::new().name("capture".into()).spawn(move || {
                let sample_rate = source.sample_rate().max(1) as f64;
                let started = Instant::now();
                let mut report = CaptureReport::default();

                while !stop.load(Ordering::Acquire) {
                    let Some(chunk) = source.next_chunk() else {
                        info!("Capture source exhausted");
                        break;
                    };
                    report.samples += chunk.len() as u64;

                    for frame in assembler.push(&chunk) {
                        queue.push(frame);
                        report.frames += 1;
                    }

                    if realtime {
                        let elapsed = report.samples as f64 / sample_rate;
                        let due = started + Duration::from_secs_f64(elapsed);
                        let now = Instant::now();
                        if due > now {
                            thread::sleep(due - now);
                        }
                    }
                }

                info!("Capture lane stopped: {} samples, {} frames", report.samples, report.frames);
                report
            })?
        };

        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    /// True once the source has ended or the lane was stopped.
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, |h| h.is_finished())
    }

    pub fn stop(&mut self) -> CaptureReport {
        self.stop.store(true, Ordering::Release);
        self.join()
    }

    /// Wait for the source to run dry without signalling a stop.
    pub fn join(&mut self) -> CaptureReport {
        match self.handle.take().map(JoinHandle::join) {
            Some(Ok(report)) => report,
            Some(Err(_)) => {
                warn!("Capture lane panicked");
                CaptureReport::default()
            }
            None => CaptureReport::default(),
        }
    }
}

impl Drop for CaptureLane {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_wav(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("pulselight-{}-{}.wav", name, std::process::id()))
    }

    #[test]
    fn test_assembler_hops_and_timestamps() {
        let mut assembler = FrameAssembler::new(4, 2, 1000);
        let frames = assembler.push(&[0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);

        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].samples, vec![0.0, 1.0, 2.0, 3.0]);
        assert_eq!(frames[1].samples, vec![2.0, 3.0, 4.0, 5.0]);
        assert_eq!(frames[0].timestamp_ms, 0.0);
        assert_eq!(frames[1].timestamp_ms, 2.0);

        // the partial tail completes with the next chunk
        let frames = assembler.push(&[7.0]);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].samples, vec![4.0, 5.0, 6.0, 7.0]);
        assert_eq!(frames[0].timestamp_ms, 4.0);
        assert_eq!(assembler.offset(), 6);
    }

    #[test]
    fn test_tone_burst_layout() {
        // 120 BPM at 1 kHz: 500-sample period, 50-sample burst
        let mut source = ToneBurstSource::new(1000, 120.0)
            .with_tone(125.0, 1.0)
            .with_chunk_len(1000)
            .with_duration(1.0);

        let chunk = source.next_chunk().unwrap();
        assert_eq!(chunk.len(), 1000);
        assert!(chunk[2].abs() > 0.5);
        assert!(chunk[60..500].iter().all(|&s| s == 0.0));
        assert!(chunk[502].abs() > 0.5);
        assert!(source.next_chunk().is_none());
    }

    #[test]
    fn test_mix_to_mono() {
        assert_eq!(mix_to_mono(&[1.0, 0.0, 0.5, 0.5], 2), vec![0.5, 0.5]);
        assert_eq!(mix_to_mono(&[0.3, 0.6], 1), vec![0.3, 0.6]);
    }

    #[test]
    fn test_wav_source_mixes_and_scales() {
        let path = temp_wav("stereo");
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 8000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for _ in 0..100 {
            writer.write_sample(16384i16).unwrap();
            writer.write_sample(0i16).unwrap();
        }
        writer.finalize().unwrap();

        let mut source = WavFileSource::open(&path).unwrap().with_chunk_len(64);
        assert_eq!(source.sample_rate(), 8000);
        assert_eq!(source.channels(), 2);

        let mut mono = Vec::new();
        while let Some(chunk) = source.next_chunk() {
            mono.extend(chunk);
        }
        std::fs::remove_file(&path).ok();

        assert_eq!(mono.len(), 100);
        assert!(mono.iter().all(|&s| (s - 0.25).abs() < 1e-6));
    }

    #[test]
    fn test_missing_wav_is_an_error() {
        assert!(matches!(
            WavFileSource::open("/nonexistent/pulselight.wav"),
            Err(CaptureError::Wav(_))
        ));
    }

    #[test]
    fn test_lane_feeds_queue_until_source_ends() {
        let queue = ProcessingQueue::new(1000);
        let source = ToneBurstSource::new(8000, 120.0).with_duration(1.0);
        let mut lane = CaptureLane::spawn(
            Box::new(source),
            FrameAssembler::new(1024, 512, 8000),
            queue.clone(),
            false,
        )
        .unwrap();

        let report = lane.join();
        assert_eq!(report.samples, 8000);
        // (8000 - 1024) / 512 + 1
        assert_eq!(report.frames, 14);
        assert_eq!(queue.len(), 14);
        assert!(lane.is_finished());
    }
}
