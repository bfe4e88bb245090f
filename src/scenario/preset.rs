//! Scenario presets
//!
//! A preset is a named bundle of main-parameter defaults plus a reverb
//! profile and an absorption curve. Presets are immutable once loaded.

use serde::{Deserialize, Serialize};

use crate::engine::params::{
    AbsorptionCurve, ReverbProfile, SpatialDefaults, StagedValues,
};
use crate::error::{EngineError, Result};

/// Name used for the fallback profile when nothing else is available
pub const NEUTRAL_PRESET: &str = "neutral";

/// One acoustic scenario
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScenarioPreset {
    pub name: String,
    pub defaults: SpatialDefaults,
    pub reverb: ReverbProfile,
    pub absorption: AbsorptionCurve,
    /// Scenario intensity 0..1 is mapped linearly into this range
    pub intensity_range: (f32, f32),
}

impl Default for ScenarioPreset {
    fn default() -> Self {
        Self::neutral(NEUTRAL_PRESET)
    }
}

impl ScenarioPreset {
    /// Preset carrying the engine defaults
    pub fn neutral(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            defaults: SpatialDefaults::default(),
            reverb: ReverbProfile::default(),
            absorption: AbsorptionCurve::default(),
            intensity_range: (0.0, 1.0),
        }
    }

    /// Parse a preset from JSON text
    pub fn from_json_str(text: &str) -> Result<Self> {
        let preset: ScenarioPreset = serde_json::from_str(text)?;
        preset.validate()?;
        Ok(preset)
    }

    /// Map a scenario intensity (0..1) into `intensity_range`
    pub fn effective_intensity(&self, intensity: f32) -> f32 {
        let (lo, hi) = self.intensity_range;
        (lo + (hi - lo) * intensity.clamp(0.0, 1.0)).clamp(0.0, 1.0)
    }

    /// Values this preset stages into the parameter store
    pub fn staged(&self) -> StagedValues {
        StagedValues {
            main: self.defaults,
            reverb: self.reverb,
            absorption: self.absorption,
        }
    }

    /// Reject values outside their documented ranges
    pub fn validate(&self) -> Result<()> {
        let unit = [
            ("room_size", self.defaults.room_size),
            ("brightness", self.defaults.brightness),
            ("width", self.defaults.width),
            ("dry_wet", self.defaults.dry_wet),
            ("intensity", self.defaults.intensity),
            ("diffusion", self.reverb.diffusion),
            ("modulation", self.reverb.modulation),
            ("lofi", self.reverb.lofi),
            ("absorption.low", self.absorption.low),
            ("absorption.mid", self.absorption.mid),
            ("absorption.high", self.absorption.high),
            ("intensity_range.0", self.intensity_range.0),
            ("intensity_range.1", self.intensity_range.1),
        ];
        for (param, value) in unit {
            if !(0.0..=1.0).contains(&value) {
                return Err(invalid(param, value, "0.0 to 1.0"));
            }
        }
        if !(self.defaults.distance.is_finite() && self.defaults.distance >= 0.0) {
            return Err(invalid("distance", self.defaults.distance, ">= 0"));
        }
        if !(self.reverb.decay_time_sec.is_finite() && self.reverb.decay_time_sec >= 0.0) {
            return Err(invalid(
                "decay_time_sec",
                self.reverb.decay_time_sec,
                ">= 0 seconds",
            ));
        }
        if self.intensity_range.0 > self.intensity_range.1 {
            return Err(invalid(
                "intensity_range",
                self.intensity_range.0,
                "min <= max",
            ));
        }
        Ok(())
    }
}

fn invalid(param: &str, value: f32, expected: &str) -> EngineError {
    EngineError::InvalidParameter {
        param: param.to_string(),
        value: value.to_string(),
        expected: expected.to_string(),
    }
}

// ============================================================================
// Built-in presets
// ============================================================================

/// Compact row of the built-in table
///
/// `brightness` is -1..1 and `width` 0..2 here; both are rescaled into
/// the engine's 0..1 ranges by [`Row::into_preset`].
struct Row {
    name: &'static str,
    distance: f32,
    room_size: f32,
    brightness: f32,
    width: f32,
    dry_wet: f32,
    decay: f32,
    diffusion: f32,
    lofi: f32,
    modulation: f32,
    absorption: [f32; 3],
}

impl Row {
    fn into_preset(self) -> ScenarioPreset {
        ScenarioPreset {
            name: self.name.to_string(),
            defaults: SpatialDefaults {
                distance: self.distance,
                room_size: self.room_size,
                brightness: (self.brightness + 1.0) * 0.5,
                width: self.width * 0.5,
                dry_wet: self.dry_wet,
                intensity: 1.0,
            },
            reverb: ReverbProfile {
                decay_time_sec: self.decay,
                diffusion: self.diffusion,
                modulation: self.modulation,
                lofi: self.lofi,
            },
            absorption: AbsorptionCurve {
                low: self.absorption[0],
                mid: self.absorption[1],
                high: self.absorption[2],
            },
            intensity_range: (0.0, 1.0),
        }
    }
}

macro_rules! row {
    ($name:literal, $dist:expr, $room:expr, $bright:expr, $width:expr, $wet:expr,
     $decay:expr, $diff:expr, $lofi:expr, $modu:expr, $abs:expr) => {
        Row {
            name: $name,
            distance: $dist,
            room_size: $room,
            brightness: $bright,
            width: $width,
            dry_wet: $wet,
            decay: $decay,
            diffusion: $diff,
            lofi: $lofi,
            modulation: $modu,
            absorption: $abs,
        }
    };
}

/// Names of the built-in presets, in catalog order
pub const BUILTIN_NAMES: [&str; 17] = [
    "deep_sea",
    "cave",
    "forest",
    "cathedral",
    "tension",
    "nostalgia",
    "intimate",
    "open_field",
    "space",
    "office",
    "tunnel",
    "small_room",
    "radio",
    "telephone",
    "dream",
    "chaos",
    "ethereal",
];

/// The built-in preset table
pub fn builtin_presets() -> Vec<ScenarioPreset> {
    let rows = [
        //    name          dist   room  bright width  wet   decay diff  lofi  mod   absorption
        row!("deep_sea",    50.0,  0.85, -0.5,  1.6,  0.7,  8.0,  0.8,  0.1,  0.2,  [0.0, 0.3, 0.8]),
        row!("cave",        20.0,  0.7,   0.0,  1.5,  0.65, 6.0,  0.7,  0.0,  0.1,  [0.0, 0.3, 0.4]),
        row!("forest",      15.0,  0.3,  -0.2,  1.2,  0.4,  1.5,  0.5,  0.0,  0.0,  [0.2, 0.6, 0.7]),
        row!("cathedral",   30.0,  0.9,  -0.1,  1.6,  0.75, 10.0, 0.9,  0.0,  0.2,  [0.0, 0.4, 0.5]),
        row!("tension",     5.0,   0.35,  0.4,  0.6,  0.5,  1.2,  0.4,  0.1,  0.4,  [0.3, 0.5, 0.3]),
        row!("nostalgia",   8.0,   0.45, -0.3,  1.0,  0.55, 2.2,  0.5,  0.5,  0.2,  [0.2, 0.5, 0.7]),
        row!("intimate",    1.0,   0.15,  0.1,  0.4,  0.25, 0.6,  0.3,  0.0,  0.0,  [0.1, 0.6, 0.5]),
        row!("open_field",  100.0, 0.0,  -0.2,  1.0,  0.1,  0.2,  0.1,  0.0,  0.0,  [0.3, 0.8, 0.6]),
        row!("space",       200.0, 0.0,  -0.8,  1.2,  0.2,  0.2,  0.2,  0.0,  0.0,  [0.0, 0.5, 0.9]),
        row!("office",      10.0,  0.2,  -0.1,  0.9,  0.3,  0.8,  0.3,  0.0,  0.0,  [0.3, 0.7, 0.6]),
        row!("tunnel",      12.0,  0.4,   0.1,  1.1,  0.45, 2.5,  0.6,  0.0,  0.2,  [0.0, 0.3, 0.4]),
        row!("small_room",  4.0,   0.2,   0.0,  0.8,  0.4,  0.7,  0.4,  0.0,  0.0,  [0.2, 0.6, 0.5]),
        row!("radio",       8.0,   0.2,  -0.4,  0.7,  0.6,  1.0,  0.2,  0.7,  0.0,  [0.8, 0.5, 0.8]),
        row!("telephone",   12.0,  0.2,  -0.3,  0.7,  0.6,  1.0,  0.2,  0.6,  0.0,  [0.9, 0.5, 0.8]),
        row!("dream",       20.0,  0.7,  -0.1,  1.4,  0.7,  6.0,  0.7,  0.2,  0.5,  [0.1, 0.4, 0.6]),
        row!("chaos",       10.0,  0.5,   0.2,  1.4,  0.8,  3.0,  0.3,  0.9,  0.8,  [0.2, 0.4, 0.3]),
        row!("ethereal",    25.0,  0.8,   0.1,  1.8,  0.75, 7.0,  0.9,  0.1,  0.6,  [0.0, 0.4, 0.4]),
    ];
    rows.into_iter().map(Row::into_preset).collect()
}

/// Built-in preset by name
pub fn builtin(name: &str) -> Option<ScenarioPreset> {
    builtin_presets().into_iter().find(|p| p.name == name)
}

// ============================================================================
// Tests
// ============================================================================
