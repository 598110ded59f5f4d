use serde::Serialize;
use std::f64::consts::TAU;
use std::fmt;
use std::sync::Arc;

use super::device::{DeviceAction, DeviceCommand, DeviceController};
use crate::config::{tempo_in_range, EffectConfig, GroupConfig, SyncModeConfig};
use crate::error::SyncError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct GroupId(pub u64);

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "group-{}", self.0)
    }
}

/// How a group derives its phase from the global beat clock.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub enum SyncMode {
    /// Locked to the global beat, shifted by the group's phase offset.
    #[default]
    Beat,
    /// Runs `multiplier` cycles per global beat.
    Subdivided { multiplier: f64 },
    /// Free-running at the group's own tempo.
    Free,
}

impl From<SyncModeConfig> for SyncMode {
    fn from(config: SyncModeConfig) -> Self {
        match config {
            SyncModeConfig::Beat => SyncMode::Beat,
            SyncModeConfig::Subdivided { multiplier } => SyncMode::Subdivided {
                multiplier: multiplier as f64,
            },
            SyncModeConfig::Free => SyncMode::Free,
        }
    }
}

/// Everything needed to create a group.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupSpec {
    pub name: String,
    pub effect_ids: Vec<String>,
    pub tempo_bpm: f32,
    /// Fraction of a beat, wrapped into [0, 1).
    pub phase_offset: f32,
    pub intensity: f32,
    pub color_speed: f32,
    /// Degrees added to every member's hue.
    pub color_shift: f32,
    pub sync: SyncMode,
}

impl Default for GroupSpec {
    fn default() -> Self {
        Self {
            name: String::new(),
            effect_ids: Vec::new(),
            tempo_bpm: 120.0,
            phase_offset: 0.0,
            intensity: 1.0,
            color_speed: 1.0,
            color_shift: 0.0,
            sync: SyncMode::Beat,
        }
    }
}

impl From<&GroupConfig> for GroupSpec {
    fn from(config: &GroupConfig) -> Self {
        Self {
            name: config.name.clone(),
            effect_ids: config.effects.clone(),
            tempo_bpm: config.tempo_bpm,
            phase_offset: config.phase_offset,
            intensity: config.intensity,
            color_speed: config.color_speed,
            color_shift: config.color_shift,
            sync: config.sync.into(),
        }
    }
}

impl GroupSpec {
    pub fn validate(&self) -> Result<(), SyncError> {
        if !tempo_in_range(self.tempo_bpm) {
            return Err(SyncError::TempoOutOfRange(self.tempo_bpm));
        }
        check_finite("phase_offset", self.phase_offset)?;
        check_finite("color_speed", self.color_speed)?;
        check_finite("color_shift", self.color_shift)?;
        if !self.intensity.is_finite() || self.intensity < 0.0 {
            return Err(SyncError::InvalidParameter {
                name: "intensity",
                value: self.intensity,
            });
        }
        validate_mode(self.sync)
    }
}

fn check_finite(name: &'static str, value: f32) -> Result<(), SyncError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(SyncError::InvalidParameter { name, value })
    }
}

fn validate_mode(mode: SyncMode) -> Result<(), SyncError> {
    match mode {
        SyncMode::Subdivided { multiplier } if !multiplier.is_finite() || multiplier <= 0.0 => {
            Err(SyncError::InvalidParameter {
                name: "multiplier",
                value: multiplier as f32,
            })
        }
        _ => Ok(()),
    }
}

/// Partial in-place update; `None` fields are left alone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GroupUpdate {
    pub name: Option<String>,
    pub tempo_bpm: Option<f32>,
    pub phase_offset: Option<f32>,
    pub intensity: Option<f32>,
    pub color_speed: Option<f32>,
    pub color_shift: Option<f32>,
    pub sync: Option<SyncMode>,
}

/// Wrap into [0, 1). `rem_euclid` can round up to exactly 1.0 for tiny
/// negative inputs, which is folded back to 0.
pub fn wrap_phase(phase: f64) -> f64 {
    let wrapped = phase.rem_euclid(1.0);
    if wrapped >= 1.0 {
        0.0
    } else {
        wrapped
    }
}

/// Beats elapsed over `delta_ms` at `tempo_bpm`.
pub fn beats_elapsed(delta_ms: f64, tempo_bpm: f64) -> f64 {
    delta_ms / (60000.0 / tempo_bpm)
}

/// A live group in the scheduler's table.
#[derive(Debug, Clone)]
pub struct SynchronizedEffectGroup {
    pub id: GroupId,
    pub spec: GroupSpec,
    free_phase: f64,
    last_phase: f64,
}

impl SynchronizedEffectGroup {
    pub fn new(id: GroupId, spec: GroupSpec) -> Self {
        Self {
            id,
            spec,
            free_phase: 0.0,
            last_phase: 0.0,
        }
    }

    pub fn apply(&mut self, update: GroupUpdate) -> Result<(), SyncError> {
        let mut spec = self.spec.clone();
        if let Some(name) = update.name {
            spec.name = name;
        }
        if let Some(tempo) = update.tempo_bpm {
            spec.tempo_bpm = tempo;
        }
        if let Some(offset) = update.phase_offset {
            spec.phase_offset = offset;
        }
        if let Some(intensity) = update.intensity {
            spec.intensity = intensity;
        }
        if let Some(speed) = update.color_speed {
            spec.color_speed = speed;
        }
        if let Some(shift) = update.color_shift {
            spec.color_shift = shift;
        }
        if let Some(sync) = update.sync {
            spec.sync = sync;
        }

        spec.validate()?;
        self.spec = spec;
        Ok(())
    }

    /// Advance the group one tick and return its phase in [0, 1).
    pub fn advance(&mut self, global_phase: f64, delta_ms: f64) -> f64 {
        let offset = self.spec.phase_offset as f64;
        let phase = match self.spec.sync {
            SyncMode::Beat => wrap_phase(global_phase + offset),
            SyncMode::Subdivided { multiplier } => wrap_phase(global_phase * multiplier + offset),
            SyncMode::Free => {
                let beats = beats_elapsed(delta_ms, self.spec.tempo_bpm as f64);
                self.free_phase = wrap_phase(self.free_phase + beats);
                wrap_phase(self.free_phase + offset)
            }
        };
        self.last_phase = phase;
        phase
    }

    pub fn last_phase(&self) -> f64 {
        self.last_phase
    }

    pub fn status(&self) -> GroupStatus {
        GroupStatus {
            id: self.id,
            name: self.spec.name.clone(),
            effect_ids: self.spec.effect_ids.clone(),
            tempo_bpm: self.spec.tempo_bpm,
            phase_offset: self.spec.phase_offset,
            intensity: self.spec.intensity,
            color_speed: self.spec.color_speed,
            color_shift: self.spec.color_shift,
            sync: self.spec.sync,
            phase: self.last_phase,
        }
    }
}

/// Read-only view of a group for listings.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupStatus {
    pub id: GroupId,
    pub name: String,
    pub effect_ids: Vec<String>,
    pub tempo_bpm: f32,
    pub phase_offset: f32,
    pub intensity: f32,
    pub color_speed: f32,
    pub color_shift: f32,
    pub sync: SyncMode,
    /// Phase computed on the most recent tick.
    pub phase: f64,
}

/// Lifecycle notifications for group subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum GroupEvent {
    Created(GroupStatus),
    Updated(GroupStatus),
    Removed(GroupId),
}

/// A registered effect: which device it drives and its base look.
#[derive(Clone)]
pub struct EffectInstance {
    pub id: String,
    pub device: Arc<dyn DeviceController>,
    pub effect: String,
    pub base_speed: f32,
    pub base_hue: f32,
}

impl EffectInstance {
    pub fn new(id: impl Into<String>, device: Arc<dyn DeviceController>) -> Self {
        Self {
            id: id.into(),
            device,
            effect: "solid".into(),
            base_speed: 1.0,
            base_hue: 0.0,
        }
    }

    pub fn from_config(config: &EffectConfig, device: Arc<dyn DeviceController>) -> Self {
        Self {
            id: config.id.clone(),
            device,
            effect: config.effect.clone(),
            base_speed: config.base_speed,
            base_hue: config.base_hue,
        }
    }

    pub fn start_commands(&self) -> [DeviceCommand; 2] {
        [
            DeviceCommand::new(self.id.clone(), Arc::clone(&self.device), DeviceAction::TurnOn),
            DeviceCommand::new(
                self.id.clone(),
                Arc::clone(&self.device),
                DeviceAction::SetEffect(self.effect.clone()),
            ),
        ]
    }

    pub fn stop_command(&self) -> DeviceCommand {
        DeviceCommand::new(self.id.clone(), Arc::clone(&self.device), DeviceAction::TurnOff)
    }
}

impl fmt::Debug for EffectInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EffectInstance")
            .field("id", &self.id)
            .field("device", &self.device.name())
            .field("effect", &self.effect)
            .field("base_speed", &self.base_speed)
            .field("base_hue", &self.base_hue)
            .finish()
    }
}

/// Per-effect output of one scheduler tick.
#[derive(Clone)]
pub struct EffectUpdate {
    pub group: GroupId,
    pub effect_id: String,
    pub device: Arc<dyn DeviceController>,
    pub phase: f64,
    pub intensity: f32,
    /// Member base speed scaled by the group's color speed, modulated by phase.
    pub color_speed: f32,
    /// Degrees in [0, 360).
    pub hue: f32,
}

impl EffectUpdate {
    pub fn compute(group: &SynchronizedEffectGroup, effect: &EffectInstance, phase: f64) -> Self {
        let modulation = 1.0 + 0.5 * (TAU * phase).sin();
        let shifted = effect.base_hue as f64 + phase * 360.0 + group.spec.color_shift as f64;
        let hue = shifted.rem_euclid(360.0);

        Self {
            group: group.id,
            effect_id: effect.id.clone(),
            device: Arc::clone(&effect.device),
            phase,
            intensity: group.spec.intensity,
            color_speed: (effect.base_speed as f64 * group.spec.color_speed as f64 * modulation)
                as f32,
            hue: if hue >= 360.0 { 0.0 } else { hue as f32 },
        }
    }

    /// Color and brightness calls for this update.
    pub fn to_commands(&self) -> [DeviceCommand; 2] {
        let (r, g, b) = hsv_to_rgb(self.hue, 1.0, 1.0);
        [
            DeviceCommand::new(
                self.effect_id.clone(),
                Arc::clone(&self.device),
                DeviceAction::SetColor { r, g, b },
            ),
            DeviceCommand::new(
                self.effect_id.clone(),
                Arc::clone(&self.device),
                DeviceAction::SetBrightness(self.intensity.clamp(0.0, 1.0)),
            ),
        ]
    }
}

impl fmt::Debug for EffectUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EffectUpdate")
            .field("group", &self.group)
            .field("effect_id", &self.effect_id)
            .field("phase", &self.phase)
            .field("intensity", &self.intensity)
            .field("color_speed", &self.color_speed)
            .field("hue", &self.hue)
            .finish()
    }
}

/// `hue` in degrees, `saturation`/`value` in [0, 1].
pub fn hsv_to_rgb(hue: f32, saturation: f32, value: f32) -> (u8, u8, u8) {
    let h = hue.rem_euclid(360.0) / 60.0;
    let c = value * saturation;
    let x = c * (1.0 - (h % 2.0 - 1.0).abs());
    let m = value - c;

    let (r, g, b) = match h as u32 {
        0 => (c, x, 0.0),
        1 => (x, c, 0.0),
        2 => (0.0, c, x),
        3 => (0.0, x, c),
        4 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };

    let to_byte = |v: f32| ((v + m).clamp(0.0, 1.0) * 255.0).round() as u8;
    (to_byte(r), to_byte(g), to_byte(b))
}
