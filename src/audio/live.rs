//! Live input from the default capture device through cpal.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, SampleFormat, SizedSample, Stream, StreamConfig};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::capture::{mix_to_mono, FrameSource};
use crate::error::CaptureError;

/// Callback blocks buffered between the device and the capture lane.
const BUFFERED_CHUNKS: usize = 64;
const SILENCE_TIMEOUT: Duration = Duration::from_secs(2);

/// Mono samples from the system's default input device.
///
/// The cpal stream lives on its own thread (streams are not `Send` on every
/// host), and hands mixed-down blocks over a bounded channel. When the
/// capture lane falls behind, the newest blocks are dropped and counted.
pub struct LiveInputSource {
    chunks: Receiver<Vec<f32>>,
    sample_rate: u32,
    overflowed: Arc<AtomicU64>,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl LiveInputSource {
    pub fn open() -> Result<Self, CaptureError> {
        let (chunk_tx, chunks) = crossbeam_channel::bounded(BUFFERED_CHUNKS);
        let (ready_tx, ready_rx) = crossbeam_channel::bounded(1);
        let overflowed = Arc::new(AtomicU64::new(0));
        let stop = Arc::new(AtomicBool::new(false));

        let thread = {
            let overflowed = Arc::clone(&overflowed);
            let stop = Arc::clone(&stop);
            thread::Builder::new().name("live-input".into()).spawn(move || {
                let stream = match start_stream(chunk_tx, overflowed) {
                    Ok((stream, sample_rate)) => {
                        let _ = ready_tx.send(Ok(sample_rate));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                while !stop.load(Ordering::Acquire) {
                    thread::sleep(Duration::from_millis(50));
                }
                drop(stream);
                debug!("Live input stream closed");
            })?
        };

        let sample_rate = match ready_rx.recv() {
            Ok(started) => started?,
            Err(_) => return Err(CaptureError::InputThreadExited),
        };

        Ok(Self {
            chunks,
            sample_rate,
            overflowed,
            stop,
            thread: Some(thread),
        })
    }

    /// Blocks dropped because the capture lane was not keeping up.
    pub fn overflowed(&self) -> u64 {
        self.overflowed.load(Ordering::Relaxed)
    }
}

impl FrameSource for LiveInputSource {
    fn next_chunk(&mut self) -> Option<Vec<f32>> {
        match self.chunks.recv_timeout(SILENCE_TIMEOUT) {
            Ok(chunk) => Some(chunk),
            Err(RecvTimeoutError::Timeout) => {
                warn!("No audio from the input device for {:?}, ending stream", SILENCE_TIMEOUT);
                None
            }
            Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

impl Drop for LiveInputSource {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("Live input thread panicked");
            }
        }
        let overflowed = self.overflowed();
        if overflowed > 0 {
            debug!("Live input dropped {} block(s) on overflow", overflowed);
        }
    }
}

fn start_stream(
    sender: Sender<Vec<f32>>,
    overflowed: Arc<AtomicU64>,
) -> Result<(Stream, u32), CaptureError> {
    let host = cpal::default_host();
    let device = host.default_input_device().ok_or(CaptureError::NoInputDevice)?;
    let supported = device.default_input_config()?;
    let format = supported.sample_format();
    let config = supported.config();

    info!(
        "Using input device '{}': {} channel(s) at {} Hz, {:?}",
        device.name().unwrap_or_else(|_| "unknown".into()),
        config.channels,
        config.sample_rate.0,
        format
    );

    let stream = match format {
        SampleFormat::F32 => build_stream::<f32>(&device, &config, sender, overflowed)?,
        SampleFormat::I16 => build_stream::<i16>(&device, &config, sender, overflowed)?,
        SampleFormat::U16 => build_stream::<u16>(&device, &config, sender, overflowed)?,
        other => {
            return Err(CaptureError::UnsupportedFormat(format!("input samples {:?}", other)));
        }
    };
    stream.play()?;

    Ok((stream, config.sample_rate.0))
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    sender: Sender<Vec<f32>>,
    overflowed: Arc<AtomicU64>,
) -> Result<Stream, CaptureError>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let channels = config.channels as usize;
    let stream = device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            if let Err(TrySendError::Full(_)) = sender.try_send(to_mono(data, channels)) {
                overflowed.fetch_add(1, Ordering::Relaxed);
            }
        },
        |err| warn!("Audio input error: {}", err),
        None,
    )?;
    Ok(stream)
}

/// Convert one callback block of interleaved device samples to mono f32.
fn to_mono<T>(data: &[T], channels: usize) -> Vec<f32>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let samples: Vec<f32> = data.iter().map(|&s| f32::from_sample_(s)).collect();
    mix_to_mono(&samples, channels)
}
