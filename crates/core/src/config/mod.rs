use std::{collections::BTreeMap, fs, path::Path};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{BeatSyncError, EffectKind, EffectTier, RecordingSettings, Result};

/// Hardware class the defaults are tuned for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceProfile {
    #[default]
    Desktop,
    /// Mobile and other low-power hosts: slower analysis cadence, shorter pulses.
    Constrained,
}

/// Top-level configuration structure for the application.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub profile: DeviceProfile,
    pub detection: DetectionConfig,
    pub scheduler: SchedulerConfig,
    pub performance: PerformanceConfig,
    pub recording: RecordingSettings,
}

impl AppConfig {
    /// Defaults tuned for the given hardware class.
    pub fn for_profile(profile: DeviceProfile) -> Self {
        let mut config = Self {
            profile,
            ..Default::default()
        };
        if profile == DeviceProfile::Constrained {
            config.detection.update_interval = 0.3;
            config.scheduler.pulse_duration = 0.05;
        }
        config
    }

    /// Parses a nested JSON document. Missing fields fall back to the
    /// defaults of the profile the document names (desktop when absent).
    pub fn from_json_str(json: &str) -> Result<Self> {
        let overlay: Value = serde_json::from_str(json)?;
        let profile = match overlay.get("profile") {
            Some(value) => serde_json::from_value(value.clone())?,
            None => DeviceProfile::default(),
        };

        let mut merged = serde_json::to_value(Self::for_profile(profile))?;
        merge_json(&mut merged, overlay);
        let config: Self = serde_json::from_value(merged)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    /// Applies a flat `key -> value` map of numeric tunables on top of the
    /// current values. Nothing changes unless the whole result validates.
    pub fn apply_tunables(&mut self, tunables: &BTreeMap<String, f32>) -> Result<()> {
        let mut updated = self.clone();
        updated.set_tunables(tunables)?;
        updated.validate()?;
        *self = updated;
        Ok(())
    }

    fn set_tunables(&mut self, tunables: &BTreeMap<String, f32>) -> Result<()> {
        for (key, value) in tunables {
            let value = *value;
            if !value.is_finite() {
                return Err(BeatSyncError::invalid_config(key, "value must be finite"));
            }

            match key.as_str() {
                "sensitivity" => self.detection.sensitivity = value,
                "min_beat_interval" => self.detection.min_beat_interval = value,
                "bass_range" => self.detection.bass_range = bin_count(key, value)?,
                "smoothing" => self.detection.smoothing = value,
                "fallback_interval" => self.detection.fallback_interval = value,
                "silence_reset_after" => self.detection.silence_reset_after = value,
                "fallback_after" => self.detection.fallback_after = value,
                "pulse_duration" => self.scheduler.pulse_duration = value,
                "min_switch_interval" => self.scheduler.min_switch_interval = value,
                "warmup_delay" => self.scheduler.warmup_delay = value,
                "replay_trigger_interval" => self.scheduler.replay_trigger_interval = value,
                "weight.heavy" => self.scheduler.weights.heavy = value,
                "weight.medium" => self.scheduler.weights.medium = value,
                "weight.light" => self.scheduler.weights.light = value,
                "constrained_weight.medium" => self.scheduler.constrained_weights.medium = value,
                "constrained_weight.light" => self.scheduler.constrained_weights.light = value,
                "first_beat_weight.heavy" => self.scheduler.first_beat_weights.heavy = value,
                "first_beat_weight.medium" => self.scheduler.first_beat_weights.medium = value,
                "first_beat_weight.light" => self.scheduler.first_beat_weights.light = value,
                "stable_fps_threshold" => self.performance.stable_fps_threshold = value,
                "stable_std_dev" => self.performance.stable_std_dev = value,
                _ => return Err(BeatSyncError::invalid_config(key, "unknown tunable")),
            }
        }
        Ok(())
    }

    /// Reads a flat JSON object of numeric tunables.
    pub fn load_tunables(path: impl AsRef<Path>) -> Result<BTreeMap<String, f32>> {
        let contents = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    pub fn validate(&self) -> Result<()> {
        let detection = &self.detection;
        check_range("sensitivity", detection.sensitivity, 0.5, 3.0)?;
        check_range("min_beat_interval", detection.min_beat_interval, 0.1, 0.5)?;
        check_range("smoothing", detection.smoothing, 0.01, 0.2)?;
        check_range("fallback_interval", detection.fallback_interval, 0.3, 2.0)?;
        check_range("fallback_strength", detection.fallback_strength, 0.0, 1.0)?;
        check_positive("update_interval", detection.update_interval)?;
        check_positive("mute_check_interval", detection.mute_check_interval)?;
        check_positive("energy_floor", detection.energy_floor)?;
        if !(2..=50).contains(&detection.bass_range) {
            return Err(BeatSyncError::invalid_config(
                "bass_range",
                format!("{} is outside 2..=50", detection.bass_range),
            ));
        }
        if detection.spectrum_window < detection.bass_range
            || detection.warmup_window < detection.warmup_bass_range
        {
            return Err(BeatSyncError::invalid_config(
                "spectrum_window",
                "analysis window must cover the bass band",
            ));
        }
        if detection.fallback_after < detection.silence_reset_after {
            return Err(BeatSyncError::invalid_config(
                "fallback_after",
                "must not be shorter than silence_reset_after",
            ));
        }

        let scheduler = &self.scheduler;
        check_positive("pulse_duration", scheduler.pulse_duration)?;
        check_positive("replay_trigger_interval", scheduler.replay_trigger_interval)?;
        check_range("replay_pulse_scale", scheduler.replay_pulse_scale, 0.1, 1.0)?;
        check_non_negative("min_switch_interval", scheduler.min_switch_interval)?;
        check_non_negative("warmup_delay", scheduler.warmup_delay)?;
        scheduler.weights.validate("weight")?;
        scheduler.constrained_weights.validate("constrained_weight")?;
        scheduler.first_beat_weights.validate("first_beat_weight")?;

        let performance = &self.performance;
        check_positive("performance.update_interval", performance.update_interval)?;
        check_positive("stable_std_dev", performance.stable_std_dev)?;
        check_non_negative("stable_fps_threshold", performance.stable_fps_threshold)?;
        if performance.sample_capacity == 0 {
            return Err(BeatSyncError::invalid_config(
                "sample_capacity",
                "must hold at least one sample",
            ));
        }
        if performance.medium_fps_cutoff > performance.high_fps_cutoff {
            return Err(BeatSyncError::invalid_config(
                "medium_fps_cutoff",
                "must not exceed high_fps_cutoff",
            ));
        }

        Ok(())
    }
}

/// Tunables of the beat detection engine. Times are in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Cadence of detection cycles.
    pub update_interval: f32,
    pub mute_check_interval: f32,
    /// Output volume at or below which the audio counts as muted.
    pub mute_volume_threshold: f32,
    /// Spike multiplier over the baseline. Higher means fewer beats.
    pub sensitivity: f32,
    pub min_beat_interval: f32,
    /// Upper bound (exclusive) of the bass band, in bins. Bin 0 (DC) is skipped.
    pub bass_range: usize,
    pub smoothing: f32,
    pub spectrum_window: usize,
    pub warmup_window: usize,
    pub warmup_bass_range: usize,
    pub warmup_duration: f32,
    pub max_stuck_reads: u32,
    pub energy_floor: f32,
    pub silence_reset_after: f32,
    pub fallback_after: f32,
    pub fallback_interval: f32,
    pub fallback_strength: f32,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            update_interval: 0.2,
            mute_check_interval: 0.1,
            mute_volume_threshold: 0.01,
            sensitivity: 1.3,
            min_beat_interval: 0.25,
            bass_range: 20,
            smoothing: 0.05,
            spectrum_window: 1024,
            warmup_window: 512,
            warmup_bass_range: 10,
            warmup_duration: 3.0,
            max_stuck_reads: 3,
            energy_floor: 1.0e-4,
            silence_reset_after: 2.0,
            fallback_after: 3.0,
            fallback_interval: 0.5,
            fallback_strength: 0.7,
        }
    }
}

/// Relative weights of the three cost tiers in a random draw. They need not
/// sum to one.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TierWeights {
    pub heavy: f32,
    pub medium: f32,
    pub light: f32,
}

impl TierWeights {
    pub const fn new(heavy: f32, medium: f32, light: f32) -> Self {
        Self {
            heavy,
            medium,
            light,
        }
    }

    pub fn total(&self) -> f32 {
        self.heavy + self.medium + self.light
    }

    fn validate(&self, prefix: &str) -> Result<()> {
        for (name, weight) in [
            ("heavy", self.heavy),
            ("medium", self.medium),
            ("light", self.light),
        ] {
            check_non_negative(&format!("{prefix}.{name}"), weight)?;
        }
        if self.total() <= 0.0 {
            return Err(BeatSyncError::invalid_config(
                prefix,
                "weights must have a positive sum",
            ));
        }
        Ok(())
    }
}

/// Tunables of the adaptive effect scheduler. Times are in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub pulse_duration: f32,
    pub min_switch_interval: f32,
    /// Beats are ignored for this long after media starts.
    pub warmup_delay: f32,
    pub replay_trigger_interval: f32,
    /// Pulse duration multiplier while replaying a timeline for export.
    pub replay_pulse_scale: f32,
    /// Steady-state weights when heavy effects are allowed.
    pub weights: TierWeights,
    /// Steady-state weights when heavy effects are not allowed.
    pub constrained_weights: TierWeights,
    /// Weights for the first pick after media start or a global stop.
    pub first_beat_weights: TierWeights,
    pub tiers: BTreeMap<EffectKind, EffectTier>,
    /// Fixed RNG seed; entropy-seeded when absent.
    pub seed: Option<u64>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            pulse_duration: 0.1,
            min_switch_interval: 0.5,
            warmup_delay: 1.5,
            replay_trigger_interval: 0.5,
            replay_pulse_scale: 0.7,
            weights: TierWeights::new(0.4, 0.3, 0.3),
            constrained_weights: TierWeights::new(0.0, 0.5, 0.5),
            first_beat_weights: TierWeights::new(0.35, 0.25, 0.4),
            tiers: BTreeMap::new(),
            seed: None,
        }
    }
}

/// Tunables of the performance monitor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceConfig {
    /// Length of one throughput measurement window, in seconds.
    pub update_interval: f32,
    pub sample_capacity: usize,
    pub stable_fps_threshold: f32,
    pub stable_std_dev: f32,
    pub high_fps_cutoff: f32,
    pub medium_fps_cutoff: f32,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            update_interval: 0.5,
            sample_capacity: 10,
            stable_fps_threshold: 25.0,
            stable_std_dev: 5.0,
            high_fps_cutoff: 50.0,
            medium_fps_cutoff: 30.0,
        }
    }
}

fn merge_json(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge_json(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

fn bin_count(key: &str, value: f32) -> Result<usize> {
    if value < 0.0 || value.fract() != 0.0 {
        return Err(BeatSyncError::invalid_config(
            key,
            format!("{value} is not a whole bin count"),
        ));
    }
    Ok(value as usize)
}

fn check_range(key: &str, value: f32, min: f32, max: f32) -> Result<()> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(BeatSyncError::invalid_config(
            key,
            format!("{value} is outside {min}..={max}"),
        ))
    }
}

fn check_positive(key: &str, value: f32) -> Result<()> {
    if value > 0.0 && value.is_finite() {
        Ok(())
    } else {
        Err(BeatSyncError::invalid_config(key, "must be positive"))
    }
}

fn check_non_negative(key: &str, value: f32) -> Result<()> {
    if value >= 0.0 && value.is_finite() {
        Ok(())
    } else {
        Err(BeatSyncError::invalid_config(key, "must not be negative"))
    }
}
