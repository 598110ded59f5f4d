pub mod analysis;
pub mod beat_detector;
pub mod capture;
pub mod classifier;
pub mod engine;
pub mod features;
pub mod fft;
pub mod history;
pub mod live;
pub mod mfcc;
pub mod processor;
pub mod queue;
pub mod snapshot;

pub use analysis::AudioAnalysis;
pub use beat_detector::{BeatState, BeatTracker};
pub use capture::{CaptureLane, FrameAssembler, FrameSource, ToneBurstSource, WavFileSource};
pub use classifier::{Genre, Mood};
pub use engine::AudioAnalysisEngine;
pub use fft::SpectrumAnalyzer;
pub use history::{AnalysisHistory, RingBuffer};
pub use live::LiveInputSource;
pub use processor::AnalysisWorker;
pub use queue::ProcessingQueue;
pub use snapshot::{AnalysisPublisher, LatestAnalysis};

/// One mono block of samples handed from capture to analysis.
#[derive(Debug, Clone, Default)]
pub struct AudioFrame {
    pub samples: Vec<f32>,
    /// Stream time of the first sample, derived from the capture sample offset.
    pub timestamp_ms: f64,
}

impl AudioFrame {
    pub fn new(samples: Vec<f32>, timestamp_ms: f64) -> Self {
        Self { samples, timestamp_ms }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}
