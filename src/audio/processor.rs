use log::{debug, error, info};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::engine::AudioAnalysisEngine;
use super::queue::ProcessingQueue;
use super::snapshot::{AnalysisPublisher, LatestAnalysis};

/// How long the worker waits for a frame before re-checking its stop flag.
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// What the analysis lane did over its lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerReport {
    pub processed: u64,
    /// Frames still queued at shutdown and discarded unanalyzed.
    pub discarded: u64,
}

/// The analysis lane: a dedicated thread that owns the engine, drains the
/// processing queue and publishes every snapshot.
pub struct AnalysisWorker {
    queue: ProcessingQueue,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<u64>>,
    report: Option<WorkerReport>,
}

impl AnalysisWorker {
    pub fn spawn(
        mut engine: AudioAnalysisEngine,
        queue: ProcessingQueue,
        latest: LatestAnalysis,
        publisher: Arc<AnalysisPublisher>,
    ) -> std::io::Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));

        let handle = {
            let queue = queue.clone();
            let stop = Arc::clone(&stop);
            thread::Builder::new()
                .name("analysis".into())
                .spawn(move || {
                    info!("Analysis lane started (FFT size {})", engine.fft_size());
                    let mut processed = 0u64;

                    while !stop.load(Ordering::Acquire) {
                        let Some(frame) = queue.pop_timeout(POLL_INTERVAL) else {
                            continue;
                        };

                        let analysis = Arc::new(engine.analyze(frame));
                        if analysis.rhythm.beat_detected {
                            debug!(
                                "Beat at {:.1} ms, tempo {:.1} BPM",
                                analysis.timestamp_ms, analysis.rhythm.tempo_bpm
                            );
                        }

                        latest.store(Arc::clone(&analysis));
                        publisher.publish(analysis);
                        processed += 1;
                    }

                    info!("Analysis lane stopped after {} frames", processed);
                    processed
                })?
        };

        Ok(Self {
            queue,
            stop,
            handle: Some(handle),
            report: None,
        })
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop the lane, join its thread and discard whatever is still queued.
    /// Calling this again returns the same report.
    pub fn stop(&mut self) -> WorkerReport {
        if let Some(report) = self.report {
            return report;
        }

        self.stop.store(true, Ordering::Release);
        let processed = match self.handle.take().map(JoinHandle::join) {
            Some(Ok(processed)) => processed,
            Some(Err(_)) => {
                error!("Analysis lane panicked");
                0
            }
            None => 0,
        };

        let report = WorkerReport {
            processed,
            discarded: self.queue.drain() as u64,
        };
        self.report = Some(report);
        report
    }
}

impl Drop for AnalysisWorker {
    fn drop(&mut self) {
        self.stop();
    }
}
