use serde::Deserialize;
use std::path::Path;

use crate::error::ConfigError;

pub const MIN_TEMPO_BPM: f32 = 30.0;
pub const MAX_TEMPO_BPM: f32 = 200.0;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub effects: Vec<EffectConfig>,
    #[serde(default)]
    pub groups: Vec<GroupConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AudioConfig {
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    #[serde(default = "default_fft_size")]
    pub fft_size: usize,
    #[serde(default = "default_frame_size")]
    pub frame_size: usize,
    #[serde(default = "default_hop_size")]
    pub hop_size: usize,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    #[serde(default = "default_tick_rate")]
    pub tick_rate_hz: u32,
    #[serde(default = "default_tempo")]
    pub default_tempo_bpm: f32,
    #[serde(default = "default_true")]
    pub follow_analysis: bool,
    #[serde(default = "default_stop_timeout")]
    pub stop_timeout_ms: u64,
}

/// One lighting effect instance bound to a named device.
#[derive(Debug, Clone, Deserialize)]
pub struct EffectConfig {
    pub id: String,
    pub device: String,
    #[serde(default = "default_effect_name")]
    pub effect: String,
    #[serde(default = "default_base_speed")]
    pub base_speed: f32,
    #[serde(default)]
    pub base_hue: f32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GroupConfig {
    pub name: String,
    pub effects: Vec<String>,
    #[serde(default = "default_tempo")]
    pub tempo_bpm: f32,
    #[serde(default)]
    pub phase_offset: f32,
    #[serde(default = "default_intensity")]
    pub intensity: f32,
    #[serde(default = "default_base_speed")]
    pub color_speed: f32,
    #[serde(default)]
    pub color_shift: f32,
    #[serde(default)]
    pub sync: SyncModeConfig,
}

/// Tagged sync mode as written in TOML, e.g.
/// `sync = { mode = "subdivided", multiplier = 2.0 }`.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum SyncModeConfig {
    #[default]
    Beat,
    Subdivided { multiplier: f32 },
    Free,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
            fft_size: default_fft_size(),
            frame_size: default_frame_size(),
            hop_size: default_hop_size(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            tick_rate_hz: default_tick_rate(),
            default_tempo_bpm: default_tempo(),
            follow_analysis: true,
            stop_timeout_ms: default_stop_timeout(),
        }
    }
}

fn default_sample_rate() -> u32 {
    44100
}

fn default_fft_size() -> usize {
    2048
}

fn default_frame_size() -> usize {
    2048
}

fn default_hop_size() -> usize {
    1024
}

fn default_queue_capacity() -> usize {
    100
}

fn default_tick_rate() -> u32 {
    60
}

fn default_tempo() -> f32 {
    120.0
}

fn default_true() -> bool {
    true
}

fn default_stop_timeout() -> u64 {
    5000
}

fn default_effect_name() -> String {
    "solid".into()
}

fn default_base_speed() -> f32 {
    1.0
}

fn default_intensity() -> f32 {
    1.0
}

impl AudioConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sample_rate == 0 {
            return Err(ConfigError::InvalidSampleRate(self.sample_rate));
        }
        if self.fft_size < 4 || !self.fft_size.is_power_of_two() {
            return Err(ConfigError::InvalidFftSize(self.fft_size));
        }
        // each frame must fill the whole FFT window
        let hop_fits = self.hop_size > 0 && self.hop_size <= self.frame_size;
        if self.frame_size < self.fft_size || !hop_fits {
            return Err(ConfigError::InvalidFrameLayout {
                frame: self.frame_size,
                hop: self.hop_size,
            });
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::InvalidQueueCapacity);
        }
        Ok(())
    }
}

impl SyncConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=240).contains(&self.tick_rate_hz) {
            return Err(ConfigError::InvalidTickRate(self.tick_rate_hz));
        }
        if !tempo_in_range(self.default_tempo_bpm) {
            return Err(ConfigError::TempoOutOfRange(self.default_tempo_bpm));
        }
        Ok(())
    }
}

pub fn tempo_in_range(bpm: f32) -> bool {
    (MIN_TEMPO_BPM..=MAX_TEMPO_BPM).contains(&bpm)
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.audio.validate()?;
        self.sync.validate()?;

        for group in &self.groups {
            if !tempo_in_range(group.tempo_bpm) {
                return Err(ConfigError::TempoOutOfRange(group.tempo_bpm));
            }
            for effect in &group.effects {
                if !self.effects.iter().any(|e| &e.id == effect) {
                    return Err(ConfigError::UnknownEffect {
                        group: group.name.clone(),
                        effect: effect.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.audio.sample_rate, 44100);
        assert_eq!(config.audio.fft_size, 2048);
        assert_eq!(config.audio.queue_capacity, 100);
        assert_eq!(config.sync.tick_rate_hz, 60);
    }

    #[test]
    fn test_parse_groups_and_effects() {
        let config = Config::from_toml(
            r#"
            [audio]
            fft_size = 1024

            [[effects]]
            id = "left"
            device = "strip-1"

            [[effects]]
            id = "right"
            device = "strip-2"
            base_hue = 180.0

            [[groups]]
            name = "stage"
            effects = ["left", "right"]
            phase_offset = 0.5
            sync = { mode = "subdivided", multiplier = 2.0 }
            "#,
        )
        .unwrap();

        assert_eq!(config.audio.fft_size, 1024);
        assert_eq!(config.effects.len(), 2);
        assert_eq!(config.effects[1].base_hue, 180.0);
        assert_eq!(config.groups[0].sync, SyncModeConfig::Subdivided { multiplier: 2.0 });
        assert_eq!(config.groups[0].tempo_bpm, 120.0);
    }

    #[test]
    fn test_rejects_non_power_of_two_fft() {
        let err = Config::from_toml("[audio]\nfft_size = 1000\n").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidFftSize(1000)));
    }

    #[test]
    fn test_rejects_frames_shorter_than_fft() {
        let err = Config::from_toml("[audio]\nfft_size = 2048\nframe_size = 1024\nhop_size = 512\n")
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidFrameLayout { frame: 1024, hop: 512 }));

        let ok = Config::from_toml("[audio]\nfft_size = 1024\nframe_size = 2048\n").unwrap();
        assert_eq!(ok.audio.frame_size, 2048);
    }

    #[test]
    fn test_rejects_out_of_range_tempo() {
        let err = Config::from_toml("[sync]\ndefault_tempo_bpm = 250.0\n").unwrap_err();
        assert!(matches!(err, ConfigError::TempoOutOfRange(_)));
    }

    #[test]
    fn test_rejects_group_with_unknown_effect() {
        let err = Config::from_toml(
            "[[groups]]\nname = \"a\"\neffects = [\"missing\"]\n",
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownEffect { .. }));
    }
}
