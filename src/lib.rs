//! Real-time audio analysis driving beat-synchronized lighting effects.
//!
//! Audio flows through three lanes: capture ([`audio::CaptureLane`]) cuts a
//! sample stream into frames, analysis ([`audio::AnalysisWorker`]) turns each
//! frame into an [`audio::AudioAnalysis`], and the effect scheduler
//! ([`effects::SchedulerHandle`]) ticks every effect group against a global
//! beat clock that follows the analyzed tempo.

pub mod audio;
pub mod config;
pub mod effects;
pub mod error;

pub use config::Config;
pub use error::{AnalysisError, CaptureError, ConfigError, SyncError};
