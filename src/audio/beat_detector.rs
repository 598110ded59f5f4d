use log::debug;
use serde::Serialize;

use super::history::{RingBuffer, HISTORY_CAPACITY};
use crate::config::{MAX_TEMPO_BPM, MIN_TEMPO_BPM};

pub const ONSET_THRESHOLD: f32 = 0.3;
pub const VOLUME_THRESHOLD: f32 = 0.1;
pub const DEFAULT_TEMPO_BPM: f32 = 120.0;
/// Fraction of the expected beat interval that must pass before another beat
/// can be confirmed.
pub const REFRACTORY_FRACTION: f64 = 0.5;
const MAX_INTERVAL_MS: f64 = 2000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BeatState {
    Idle,
    BeatCandidate,
    BeatConfirmed,
}

#[derive(Debug, Clone, Copy)]
pub struct BeatEvent {
    pub timestamp_ms: f64,
    pub confidence: f32,
    pub strength: f32,
}

/// Outcome of one tracker cycle.
#[derive(Debug, Clone, Copy)]
pub struct BeatUpdate {
    pub state: BeatState,
    pub beat: Option<BeatEvent>,
}

/// Onset-driven beat and tempo tracker.
///
/// Each cycle moves through `Idle -> BeatCandidate -> BeatConfirmed`. A
/// candidate only becomes a beat once half of the expected interval (at the
/// running tempo) has elapsed since the last confirmed beat.
pub struct BeatTracker {
    state: BeatState,
    last_beat_ms: Option<f64>,
    running_tempo: f32,
    beat_count: u64,
    beat_times: RingBuffer<f64>,
}

impl Default for BeatTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl BeatTracker {
    pub fn new() -> Self {
        Self::with_capacity(HISTORY_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            state: BeatState::Idle,
            last_beat_ms: None,
            running_tempo: DEFAULT_TEMPO_BPM,
            beat_count: 0,
            beat_times: RingBuffer::new(capacity),
        }
    }

    pub fn update(&mut self, onset_strength: f32, volume: f32, now_ms: f64) -> BeatUpdate {
        if onset_strength <= ONSET_THRESHOLD || volume <= VOLUME_THRESHOLD {
            self.state = BeatState::Idle;
            return BeatUpdate { state: self.state, beat: None };
        }

        self.state = BeatState::BeatCandidate;

        let expected_interval = 60000.0 / self.running_tempo as f64;
        let clear_of_last = self
            .last_beat_ms
            .map_or(true, |last| now_ms - last > REFRACTORY_FRACTION * expected_interval);
        if !clear_of_last {
            return BeatUpdate { state: self.state, beat: None };
        }

        if let Some(last) = self.last_beat_ms {
            let interval = now_ms - last;
            if let Some(bpm) = interval_to_bpm(interval) {
                self.running_tempo = bpm;
            }
        }

        let beat = BeatEvent {
            timestamp_ms: now_ms,
            confidence: (onset_strength * volume * 2.0).min(1.0),
            strength: onset_strength,
        };

        self.state = BeatState::BeatConfirmed;
        self.last_beat_ms = Some(now_ms);
        self.beat_count += 1;
        self.beat_times.push(now_ms);

        debug!(
            "Beat #{} at {:.1} ms (confidence {:.2}, running tempo {:.1} BPM)",
            self.beat_count, now_ms, beat.confidence, self.running_tempo
        );

        BeatUpdate { state: self.state, beat: Some(beat) }
    }

    pub fn state(&self) -> BeatState {
        self.state
    }

    pub fn beat_count(&self) -> u64 {
        self.beat_count
    }

    pub fn last_beat_ms(&self) -> Option<f64> {
        self.last_beat_ms
    }

    /// Tempo implied by the most recent valid inter-beat interval.
    pub fn instantaneous_tempo(&self) -> f32 {
        self.running_tempo
    }

    pub fn beat_history(&self) -> &RingBuffer<f64> {
        &self.beat_times
    }

    fn valid_intervals(&self) -> Vec<f64> {
        let times = self.beat_times.to_vec();
        times
            .windows(2)
            .map(|w| w[1] - w[0])
            .filter(|&interval| interval_to_bpm(interval).is_some())
            .collect()
    }

    /// Averaged tempo over the beat history; this is the tempo of record.
    pub fn tempo_estimate(&self) -> f32 {
        if self.beat_times.len() < 2 {
            return DEFAULT_TEMPO_BPM;
        }

        let intervals = self.valid_intervals();
        if intervals.is_empty() {
            return self.running_tempo;
        }

        let mean = intervals.iter().sum::<f64>() / intervals.len() as f64;
        (60000.0 / mean) as f32
    }

    pub fn rhythm_regularity(&self) -> f32 {
        if self.beat_times.len() < 3 {
            return 0.5;
        }

        let intervals = self.valid_intervals();
        if intervals.is_empty() {
            return 0.5;
        }

        let expected = 60000.0 / self.tempo_estimate() as f64;
        let deviation = intervals
            .iter()
            .map(|iv| (iv - expected).abs() / expected)
            .sum::<f64>()
            / intervals.len() as f64;
        (1.0 - deviation).max(0.0) as f32
    }

    pub fn rhythm_complexity(&self) -> f32 {
        let intervals = self.valid_intervals();
        if intervals.len() < 4 {
            return 0.3;
        }

        let n = intervals.len() as f64;
        let mean = intervals.iter().sum::<f64>() / n;
        let variance = intervals.iter().map(|iv| (iv - mean).powi(2)).sum::<f64>() / n;
        (variance.sqrt() / mean).min(1.0) as f32
    }
}

/// BPM for an inter-beat interval, or `None` when the interval is noise
/// (non-positive, 2 s or longer, or outside the supported tempo range).
pub fn interval_to_bpm(interval_ms: f64) -> Option<f32> {
    if interval_ms <= 0.0 || interval_ms >= MAX_INTERVAL_MS {
        return None;
    }
    let bpm = (60000.0 / interval_ms) as f32;
    (MIN_TEMPO_BPM..=MAX_TEMPO_BPM).contains(&bpm).then_some(bpm)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_beats(tracker: &mut BeatTracker, times: &[f64]) {
        for &t in times {
            tracker.update(1.0, 0.5, t);
            // a quiet cycle between spikes returns the tracker to idle
            tracker.update(0.0, 0.0, t + 1.0);
        }
    }

    #[test]
    fn test_state_transitions() {
        let mut tracker = BeatTracker::new();
        assert_eq!(tracker.update(0.1, 0.5, 0.0).state, BeatState::Idle);
        assert_eq!(tracker.update(0.5, 0.05, 10.0).state, BeatState::Idle);

        let confirmed = tracker.update(0.5, 0.5, 20.0);
        assert_eq!(confirmed.state, BeatState::BeatConfirmed);
        let beat = confirmed.beat.unwrap();
        assert_eq!(beat.strength, 0.5);
        assert!((beat.confidence - 0.5).abs() < 1e-6);

        let rejected = tracker.update(0.5, 0.5, 60.0);
        assert_eq!(rejected.state, BeatState::BeatCandidate);
        assert!(rejected.beat.is_none());
    }

    #[test]
    fn test_spikes_inside_refractory_window_confirm_once() {
        let mut tracker = BeatTracker::new();
        // 120 BPM -> 500 ms expected, 250 ms guard
        let mut confirmed = 0;
        for t in [0.0, 100.0, 200.0, 600.0, 700.0, 800.0] {
            if tracker.update(0.8, 0.5, t).beat.is_some() {
                confirmed += 1;
            }
        }
        assert_eq!(confirmed, 2);
        assert_eq!(tracker.beat_history().to_vec(), vec![0.0, 600.0]);
    }

    #[test]
    fn test_tempo_defaults_before_two_beats() {
        let mut tracker = BeatTracker::new();
        assert_eq!(tracker.tempo_estimate(), DEFAULT_TEMPO_BPM);
        feed_beats(&mut tracker, &[0.0]);
        assert_eq!(tracker.tempo_estimate(), DEFAULT_TEMPO_BPM);
        assert_eq!(tracker.rhythm_regularity(), 0.5);
        assert_eq!(tracker.rhythm_complexity(), 0.3);
    }

    #[test]
    fn test_steady_beats_estimate_tempo() {
        let mut tracker = BeatTracker::new();
        feed_beats(&mut tracker, &[0.0, 500.0, 1000.0, 1500.0, 2000.0]);
        assert!((tracker.tempo_estimate() - 120.0).abs() < 0.01);
        assert!((tracker.instantaneous_tempo() - 120.0).abs() < 0.01);
        assert!((tracker.rhythm_regularity() - 1.0).abs() < 1e-6);
        assert!(tracker.rhythm_complexity() < 1e-6);
    }

    #[test]
    fn test_outlier_interval_does_not_move_tempo() {
        let mut tracker = BeatTracker::new();
        feed_beats(&mut tracker, &[0.0, 500.0, 1000.0, 1500.0]);
        let before = tracker.tempo_estimate();

        feed_beats(&mut tracker, &[6500.0]);
        assert_eq!(tracker.beat_count(), 5);
        assert!((tracker.tempo_estimate() - before).abs() < 1e-3);
        assert!((tracker.instantaneous_tempo() - 120.0).abs() < 0.01);
        assert!((tracker.rhythm_regularity() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_irregular_beats_raise_complexity() {
        let mut tracker = BeatTracker::new();
        feed_beats(&mut tracker, &[0.0, 400.0, 1000.0, 1400.0, 2000.0, 2400.0]);
        assert!(tracker.rhythm_complexity() > 0.1);
        assert!(tracker.rhythm_regularity() < 1.0);
    }

    #[test]
    fn test_beat_history_is_bounded() {
        let mut tracker = BeatTracker::new();
        let times: Vec<f64> = (0..150).map(|i| i as f64 * 500.0).collect();
        feed_beats(&mut tracker, &times);
        assert_eq!(tracker.beat_count(), 150);
        assert_eq!(tracker.beat_history().len(), HISTORY_CAPACITY);
        assert_eq!(tracker.beat_history().iter().next(), Some(&25000.0));
    }

    #[test]
    fn test_interval_validity() {
        assert_eq!(interval_to_bpm(0.0), None);
        assert_eq!(interval_to_bpm(-10.0), None);
        assert_eq!(interval_to_bpm(2000.0), None);
        assert_eq!(interval_to_bpm(5000.0), None);
        assert_eq!(interval_to_bpm(250.0), None); // 240 BPM
        assert_eq!(interval_to_bpm(500.0), Some(120.0));
    }
}
