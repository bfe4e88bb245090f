//! Scenario System
//!
//! Named acoustic environments and the control expressions that drive them:
//! - Preset records and the built-in table
//! - Catalog loading from a data directory
//! - Weighted blending of several presets
//! - Compact control expressions

pub mod catalog;
pub mod expression;
pub mod preset;

pub use catalog::ScenarioCatalog;
pub use expression::{Expression, ExpressionAction, ExpressionKey, ExpressionTerm};
pub use preset::{ScenarioPreset, BUILTIN_NAMES};

use crate::engine::params::{Param, StagedValues, PARAM_COUNT};

/// Weighted average of several presets' staged values
///
/// Weights are normalized by their sum, which must be positive.
pub fn blend_staged(parts: &[(&ScenarioPreset, f32)]) -> Option<StagedValues> {
    let total: f32 = parts.iter().map(|(_, w)| *w).sum();
    if !(total.is_finite() && total > 0.0) {
        return None;
    }

    let mut sums = [0.0_f32; PARAM_COUNT];
    for (preset, weight) in parts {
        let share = weight / total;
        for (sum, value) in sums.iter_mut().zip(preset.staged().to_array()) {
            if let Some(value) = value {
                *sum += value * share;
            }
        }
    }

    let mut out = StagedValues::default();
    let get = |param: Param| sums[param.index()];
    out.main.distance = get(Param::Distance);
    out.main.room_size = get(Param::RoomSize);
    out.main.brightness = get(Param::Brightness);
    out.main.width = get(Param::Width);
    out.main.dry_wet = get(Param::DryWet);
    out.main.intensity = get(Param::Intensity);
    out.reverb.decay_time_sec = get(Param::DecayTime);
    out.reverb.diffusion = get(Param::Diffusion);
    out.reverb.modulation = get(Param::Modulation);
    out.reverb.lofi = get(Param::Lofi);
    out.absorption.low = get(Param::AbsorptionLow);
    out.absorption.mid = get(Param::AbsorptionMid);
    out.absorption.high = get(Param::AbsorptionHigh);
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_blend_normalizes_weights() {
        let cave = preset::builtin("cave").unwrap();
        let forest = preset::builtin("forest").unwrap();
        let blended = blend_staged(&[(&cave, 3.0), (&forest, 1.0)]).unwrap();

        assert_relative_eq!(blended.main.room_size, 0.75 * 0.7 + 0.25 * 0.3, epsilon = 1e-6);
        assert_relative_eq!(blended.reverb.decay_time_sec, 0.75 * 6.0 + 0.25 * 1.5, epsilon = 1e-5);
        assert_relative_eq!(blended.absorption.mid, 0.75 * 0.3 + 0.25 * 0.6, epsilon = 1e-6);
    }

    #[test]
    fn test_single_preset_blend_is_identity() {
        let radio = preset::builtin("radio").unwrap();
        let blended = blend_staged(&[(&radio, 0.2)]).unwrap();
        assert_relative_eq!(blended.main.brightness, radio.defaults.brightness, epsilon = 1e-6);
        assert_relative_eq!(blended.reverb.lofi, radio.reverb.lofi, epsilon = 1e-6);
    }

    #[test]
    fn test_zero_total_weight_rejected() {
        let cave = preset::builtin("cave").unwrap();
        assert!(blend_staged(&[(&cave, 0.0)]).is_none());
        assert!(blend_staged(&[]).is_none());
    }
}
