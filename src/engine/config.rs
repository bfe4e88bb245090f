//! Engine configuration
//!
//! `EngineConfig` is fixed for the lifetime of an engine. It is validated once
//! in [`EngineConfig::validate`] before anything is allocated.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

// ============================================================================
// Constants
// ============================================================================

/// Default sample rate in Hz
pub const DEFAULT_SAMPLE_RATE: u32 = 48000;

/// Default maximum frames per `process` call
pub const DEFAULT_MAX_BUFFER_SIZE: usize = 4096;

/// Largest accepted `max_buffer_size`
pub const MAX_BUFFER_SIZE_CEILING: usize = 65536;

/// Largest accepted sample rate
pub const MAX_SAMPLE_RATE: u32 = 384000;

/// Default upper bound on RT60 in seconds
pub const DEFAULT_MAX_REVERB_TIME_SEC: f32 = 10.0;

/// Largest accepted `max_reverb_time_sec`
pub const MAX_REVERB_TIME_CEILING_SEC: f32 = 30.0;

/// Default smoothing time constant in milliseconds
pub const DEFAULT_SMOOTHING_TIME_MS: f32 = 50.0;

/// Largest accepted smoothing time constant
pub const MAX_SMOOTHING_TIME_MS: f32 = 1000.0;

// ============================================================================
// Distance Policy
// ============================================================================

/// Shape of the distance attenuation curve
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceCurve {
    /// `ref / d`
    #[default]
    Inverse,
    /// `ref / d²`
    InverseSquare,
    /// Linear fade from 1 at `ref` to 0 at `max`
    Linear,
}

/// Distance attenuation policy
///
/// Every curve returns exactly 1.0 for distances at or below
/// `reference_distance` (the near-field floor) and is monotonically
/// non-increasing beyond it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DistanceModel {
    pub curve: DistanceCurve,
    /// Near-field floor: no attenuation closer than this
    pub reference_distance: f32,
    /// Distances are clamped to this before evaluating the curve
    pub max_distance: f32,
}

impl Default for DistanceModel {
    fn default() -> Self {
        Self {
            curve: DistanceCurve::Inverse,
            reference_distance: 10.0,
            max_distance: 1000.0,
        }
    }
}

impl DistanceModel {
    /// Linear gain for a source at `distance`
    pub fn gain(&self, distance: f32) -> f32 {
        let reference = self.reference_distance;
        let d = if distance.is_finite() {
            distance.clamp(0.0, self.max_distance)
        } else {
            self.max_distance
        };
        if d <= reference {
            return 1.0;
        }
        match self.curve {
            DistanceCurve::Inverse => reference / d,
            DistanceCurve::InverseSquare => (reference / d) * (reference / d),
            DistanceCurve::Linear => {
                let span = self.max_distance - reference;
                if span <= 0.0 {
                    1.0
                } else {
                    (1.0 - (d - reference) / span).clamp(0.0, 1.0)
                }
            }
        }
    }

    fn validate(&self) -> Result<()> {
        if !(self.reference_distance.is_finite() && self.reference_distance > 0.0) {
            return Err(EngineError::InvalidConfiguration {
                reason: format!(
                    "distance_model.reference_distance must be positive, got {}",
                    self.reference_distance
                ),
            });
        }
        if !(self.max_distance.is_finite() && self.max_distance >= self.reference_distance) {
            return Err(EngineError::InvalidConfiguration {
                reason: format!(
                    "distance_model.max_distance must be >= reference_distance, got {}",
                    self.max_distance
                ),
            });
        }
        Ok(())
    }
}

// ============================================================================
// Engine Configuration
// ============================================================================

/// Engine configuration, immutable for the life of an engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Maximum frames per `process` call
    pub max_buffer_size: usize,
    /// Directory of preset JSON files (`None` = built-in presets only)
    pub data_path: Option<PathBuf>,
    /// HRTF dataset file (`None` = built-in synthesized HRTF)
    pub hrtf_path: Option<PathBuf>,
    /// Load the HRTF dataset at creation instead of on first use
    pub preload_hrtf: bool,
    /// Parse every preset file at creation instead of on first use
    pub preload_all_presets: bool,
    /// Upper bound on reverb decay time (RT60) in seconds
    pub max_reverb_time_sec: f32,
    /// Time constant of the parameter smoothing in milliseconds (0 = snap)
    pub smoothing_time_ms: f32,
    /// Distance attenuation policy
    pub distance_model: DistanceModel,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            max_buffer_size: DEFAULT_MAX_BUFFER_SIZE,
            data_path: None,
            hrtf_path: None,
            preload_hrtf: true,
            preload_all_presets: false,
            max_reverb_time_sec: DEFAULT_MAX_REVERB_TIME_SEC,
            smoothing_time_ms: DEFAULT_SMOOTHING_TIME_MS,
            distance_model: DistanceModel::default(),
        }
    }
}

impl EngineConfig {
    /// Load a configuration from a JSON file
    ///
    /// Missing fields take their default values. The result is validated.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| EngineError::load_failure(path, e))?;
        let config: EngineConfig =
            serde_json::from_str(&text).map_err(|e| EngineError::load_failure(path, e))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to pretty JSON
    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Data path with empty paths treated as unset
    pub fn data_dir(&self) -> Option<&Path> {
        self.data_path
            .as_deref()
            .filter(|p| !p.as_os_str().is_empty())
    }

    /// HRTF path with empty paths treated as unset
    pub fn hrtf_file(&self) -> Option<&Path> {
        self.hrtf_path
            .as_deref()
            .filter(|p| !p.as_os_str().is_empty())
    }

    /// Check every field against its documented range
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 || self.sample_rate > MAX_SAMPLE_RATE {
            return Err(EngineError::InvalidConfiguration {
                reason: format!(
                    "sample_rate must be in 1..={}, got {}",
                    MAX_SAMPLE_RATE, self.sample_rate
                ),
            });
        }
        if self.max_buffer_size == 0 || self.max_buffer_size > MAX_BUFFER_SIZE_CEILING {
            return Err(EngineError::InvalidConfiguration {
                reason: format!(
                    "max_buffer_size must be in 1..={}, got {}",
                    MAX_BUFFER_SIZE_CEILING, self.max_buffer_size
                ),
            });
        }
        if !(self.max_reverb_time_sec.is_finite()
            && self.max_reverb_time_sec > 0.0
            && self.max_reverb_time_sec <= MAX_REVERB_TIME_CEILING_SEC)
        {
            return Err(EngineError::InvalidConfiguration {
                reason: format!(
                    "max_reverb_time_sec must be in (0, {}], got {}",
                    MAX_REVERB_TIME_CEILING_SEC, self.max_reverb_time_sec
                ),
            });
        }
        if !(self.smoothing_time_ms.is_finite()
            && self.smoothing_time_ms >= 0.0
            && self.smoothing_time_ms <= MAX_SMOOTHING_TIME_MS)
        {
            return Err(EngineError::InvalidConfiguration {
                reason: format!(
                    "smoothing_time_ms must be in [0, {}], got {}",
                    MAX_SMOOTHING_TIME_MS, self.smoothing_time_ms
                ),
            });
        }
        self.distance_model.validate()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    #[test]
    fn test_default_config_is_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.sample_rate, 48000);
        assert_eq!(config.max_buffer_size, 4096);
        assert!(config.preload_hrtf);
        assert!(!config.preload_all_presets);
    }

    #[test_case(0, 512, 10.0 ; "zero sample rate")]
    #[test_case(48000, 0, 10.0 ; "zero buffer size")]
    #[test_case(48000, 512, 0.0 ; "zero reverb time")]
    #[test_case(48000, 512, 31.0 ; "reverb time above ceiling")]
    #[test_case(48000, 512, f32::NAN ; "nan reverb time")]
    #[test_case(48000, 1 << 20, 10.0 ; "buffer size above ceiling")]
    fn test_invalid_configs(sample_rate: u32, max_buffer_size: usize, reverb: f32) {
        let config = EngineConfig {
            sample_rate,
            max_buffer_size,
            max_reverb_time_sec: reverb,
            ..EngineConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(matches!(err, EngineError::InvalidConfiguration { .. }));
    }

    #[test]
    fn test_negative_smoothing_rejected() {
        let config = EngineConfig {
            smoothing_time_ms: -1.0,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_json_round_trip() {
        let config = EngineConfig {
            sample_rate: 44100,
            data_path: Some(PathBuf::from("/tmp/presets")),
            preload_all_presets: true,
            ..EngineConfig::default()
        };
        let text = config.to_json_string().unwrap();
        let parsed: EngineConfig = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.json");
        std::fs::write(&path, r#"{ "max_buffer_size": 256 }"#).unwrap();

        let config = EngineConfig::from_json_file(&path).unwrap();
        assert_eq!(config.max_buffer_size, 256);
        assert_eq!(config.sample_rate, DEFAULT_SAMPLE_RATE);
    }

    #[test]
    fn test_invalid_json_file_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.json");
        std::fs::write(&path, r#"{ "sample_rate": 0 }"#).unwrap();
        assert!(matches!(
            EngineConfig::from_json_file(&path),
            Err(EngineError::InvalidConfiguration { .. })
        ));
    }

    #[test]
    fn test_empty_paths_are_unset() {
        let config = EngineConfig {
            data_path: Some(PathBuf::new()),
            hrtf_path: Some(PathBuf::new()),
            ..EngineConfig::default()
        };
        assert!(config.data_dir().is_none());
        assert!(config.hrtf_file().is_none());
    }

    #[test_case(DistanceCurve::Inverse ; "inverse")]
    #[test_case(DistanceCurve::InverseSquare ; "inverse square")]
    #[test_case(DistanceCurve::Linear ; "linear")]
    fn test_distance_curves_are_monotonic(curve: DistanceCurve) {
        let model = DistanceModel {
            curve,
            ..DistanceModel::default()
        };
        assert_eq!(model.gain(0.0), 1.0);
        assert_eq!(model.gain(model.reference_distance), 1.0);

        let mut previous = 1.0;
        for step in 1..200 {
            let gain = model.gain(step as f32 * 5.0);
            assert!(gain <= previous, "gain rose at {}", step);
            assert!((0.0..=1.0).contains(&gain));
            previous = gain;
        }
    }

    #[test]
    fn test_inverse_distance_values() {
        let model = DistanceModel::default();
        assert_eq!(model.gain(5.0), 1.0);
        assert_relative_eq!(model.gain(20.0), 0.5);
        assert_relative_eq!(model.gain(100.0), 0.1);
        assert_relative_eq!(model.gain(f32::INFINITY), 0.01);
    }
}
