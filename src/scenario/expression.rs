//! Control expressions
//!
//! A compact way to set several parameters at once, e.g.
//! `"distance:0.2, room_size:0.7 warmth=0.5"`. Pairs are separated by
//! commas or whitespace, keys and values by `:` or `=`. Every value is
//! normalized 0-1 and clamped.

use std::str::FromStr;

use log::warn;

use crate::engine::params::Param;
use crate::error::{EngineError, Result};

/// Keys understood by [`parse`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpressionKey {
    Distance,
    RoomSize,
    Brightness,
    Width,
    DryWet,
    Intensity,
    /// Darkens the tone
    Warmth,
    /// Brightens and adds movement
    Tension,
    /// Pulls the source close and dries it out
    Intimacy,
    /// Lo-fi grit plus heavy modulation
    Chaos,
    /// Applies the `deep_sea` scenario at full intensity, whatever the value
    Underwater,
}

impl FromStr for ExpressionKey {
    type Err = ();

    fn from_str(key: &str) -> std::result::Result<Self, ()> {
        Ok(match key {
            "distance" => Self::Distance,
            "room_size" => Self::RoomSize,
            "brightness" => Self::Brightness,
            "width" => Self::Width,
            "dry_wet" => Self::DryWet,
            "intensity" => Self::Intensity,
            "warmth" => Self::Warmth,
            "tension" => Self::Tension,
            "intimacy" => Self::Intimacy,
            "chaos" => Self::Chaos,
            "underwater" => Self::Underwater,
            _ => return Err(()),
        })
    }
}

/// Scenario applied by the `underwater` key
pub const UNDERWATER_SCENARIO: &str = "deep_sea";

/// Distance reached by `intimacy:1`
const INTIMACY_MAX_DISTANCE: f32 = 5.0;

/// One concrete change requested by an expression
#[derive(Debug, Clone, PartialEq)]
pub enum ExpressionAction {
    /// Direct write of one parameter
    Set(Param, f32),
    /// Apply a scenario at the given intensity
    Scenario(&'static str, f32),
}

/// One parsed `key:value` pair
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExpressionTerm {
    pub key: ExpressionKey,
    pub value: f32,
}

impl ExpressionTerm {
    /// Actions for this term; `max_distance` scales the `distance` key
    pub fn actions(&self, max_distance: f32) -> Vec<ExpressionAction> {
        use ExpressionAction::{Scenario, Set};
        let v = self.value;
        match self.key {
            ExpressionKey::Distance => vec![Set(Param::Distance, v * max_distance)],
            ExpressionKey::RoomSize => vec![Set(Param::RoomSize, v)],
            ExpressionKey::Brightness => vec![Set(Param::Brightness, v)],
            ExpressionKey::Width => vec![Set(Param::Width, v)],
            ExpressionKey::DryWet => vec![Set(Param::DryWet, v)],
            ExpressionKey::Intensity => vec![Set(Param::Intensity, v)],
            ExpressionKey::Warmth => vec![Set(Param::Brightness, 0.5 - 0.5 * v)],
            ExpressionKey::Tension => vec![
                Set(Param::Brightness, 0.5 + 0.5 * v),
                Set(Param::Modulation, v),
            ],
            ExpressionKey::Intimacy => vec![
                Set(Param::Distance, v * INTIMACY_MAX_DISTANCE),
                Set(Param::DryWet, 0.3),
                Set(Param::Width, 0.3),
            ],
            ExpressionKey::Chaos => vec![Set(Param::Lofi, v), Set(Param::Modulation, v)],
            ExpressionKey::Underwater => vec![Scenario(UNDERWATER_SCENARIO, 1.0)],
        }
    }
}

/// Parsed expression
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Expression {
    pub terms: Vec<ExpressionTerm>,
    /// Keys that were not recognized
    pub skipped: Vec<String>,
}

fn is_separator(c: char) -> bool {
    c == ',' || c.is_whitespace()
}

/// Parse a control expression
///
/// Unknown keys are skipped with a warning. A missing or malformed value
/// rejects the whole expression.
pub fn parse(expression: &str) -> Result<Expression> {
    let mut out = Expression::default();
    let mut rest = expression.trim_start_matches(is_separator);

    while !rest.is_empty() {
        let key_end = rest.find([':', '=']).ok_or_else(|| malformed(rest.trim(), ""))?;
        let key = rest[..key_end].trim();
        rest = rest[key_end + 1..].trim_start();

        let value_end = rest.find(is_separator).unwrap_or(rest.len());
        let raw = &rest[..value_end];
        rest = rest[value_end..].trim_start_matches(is_separator);

        if key.is_empty() || key.contains(is_separator) {
            return Err(malformed(key, raw));
        }
        let value: f32 = raw.parse().map_err(|_| malformed(key, raw))?;
        if !value.is_finite() {
            return Err(malformed(key, raw));
        }

        match key.parse::<ExpressionKey>() {
            Ok(parsed) => out.terms.push(ExpressionTerm {
                key: parsed,
                value: value.clamp(0.0, 1.0),
            }),
            Err(()) => {
                warn!("Ignoring unknown expression key '{}'", key);
                out.skipped.push(key.to_string());
            }
        }
    }
    Ok(out)
}

fn malformed(key: &str, value: &str) -> EngineError {
    EngineError::InvalidParameter {
        param: if key.is_empty() { "expression".to_string() } else { key.to_string() },
        value: value.to_string(),
        expected: "key:value with a number between 0 and 1".to_string(),
    }
}

// ============================================================================
// Tests
// ============================================================================
