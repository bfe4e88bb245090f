//! Engine Module
//!
//! The engine is split in two halves sharing one [`ParameterStore`]:
//! - [`Engine`] owns the audio-side pipeline and is driven by one audio
//!   thread through `process`.
//! - [`EngineController`] is a cheap `Clone + Send + Sync` handle for any
//!   number of control threads. Its setters only stage targets.

pub mod buffer;
pub mod config;
pub mod params;
pub mod pipeline;

pub use buffer::{AudioBuffer, AudioBufferMut, ChannelLayout, Layout, StereoScratch};
pub use config::{DistanceCurve, DistanceModel, EngineConfig};
pub use params::{
    AbsorptionCurve, Param, ParameterStore, ReverbProfile, SourceRoute, SpatialDefaults,
};
pub use pipeline::Pipeline;

use std::sync::Arc;

use log::{debug, info, warn};

use crate::error::{EngineError, Result};
use crate::scenario::{self, expression, Expression, ExpressionAction, ScenarioCatalog, ScenarioPreset};
use crate::spatial::HrtfStore;

// ============================================================================
// Engine
// ============================================================================

/// One spatial-audio engine instance
///
/// `process` must only be called from one thread at a time. Parameter
/// changes go through [`Engine::controller`].
#[derive(Debug)]
pub struct Engine {
    controller: EngineController,
    pipeline: Pipeline,
}

impl Engine {
    /// Validate `config`, load the catalog and HRTF data, allocate all DSP state
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let catalog = ScenarioCatalog::load(&config)?;
        let hrtf = Arc::new(HrtfStore::new(&config)?);
        let store = Arc::new(ParameterStore::new(&config));
        let pipeline = Pipeline::new(&config, Arc::clone(&store), Arc::clone(&hrtf));

        info!(
            "Engine created: {} Hz, {} frames max, {} scenarios",
            config.sample_rate,
            config.max_buffer_size,
            catalog.len()
        );
        Ok(Self {
            controller: EngineController {
                shared: Arc::new(Shared {
                    config,
                    store,
                    catalog,
                    hrtf,
                }),
            },
            pipeline,
        })
    }

    /// Control handle; clone it to hand to other threads
    pub fn controller(&self) -> &EngineController {
        &self.controller
    }

    pub fn config(&self) -> &EngineConfig {
        self.controller.config()
    }

    /// Render `input` into `output`
    ///
    /// Fails with `InvalidBuffer` and touches neither buffer when the shapes
    /// are unusable. Never allocates or blocks.
    pub fn process(&mut self, input: &AudioBuffer<'_>, output: &mut AudioBufferMut<'_>) -> Result<()> {
        Ok(self.pipeline.process(input, output)?)
    }

    /// Render `buffer` in place
    pub fn process_in_place(&mut self, buffer: &mut AudioBufferMut<'_>) -> Result<()> {
        Ok(self.pipeline.process_in_place(buffer)?)
    }

    /// Clear all DSP state at the start of the next buffer
    pub fn reset(&self) {
        self.controller.reset();
    }

    /// Smoothed (audio-side) value of `param` after the last buffer
    pub fn current_value(&self, param: Param) -> f32 {
        self.pipeline.current(param)
    }
}

// ============================================================================
// Controller
// ============================================================================

#[derive(Debug)]
struct Shared {
    config: EngineConfig,
    store: Arc<ParameterStore>,
    catalog: ScenarioCatalog,
    hrtf: Arc<HrtfStore>,
}

/// Control-thread handle of an [`Engine`]
#[derive(Debug, Clone)]
pub struct EngineController {
    shared: Arc<Shared>,
}

fn nan_error(param: &str) -> EngineError {
    EngineError::InvalidParameter {
        param: param.to_string(),
        value: "NaN".to_string(),
        expected: "a number".to_string(),
    }
}

impl EngineController {
    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    fn store(&self) -> &ParameterStore {
        &self.shared.store
    }

    /// Stage a direct write of one parameter
    ///
    /// The value is clamped into range and becomes the base that scenarios
    /// blend from. NaN is ignored; returns the value actually staged.
    pub fn set_param(&self, param: Param, value: f32) -> Option<f32> {
        let staged = self.store().stage().set_direct(param, value);
        if staged.is_none() {
            debug!("Ignoring NaN for {}", param.name());
        }
        staged
    }

    pub fn set_distance(&self, value: f32) -> Option<f32> {
        self.set_param(Param::Distance, value)
    }

    pub fn set_room_size(&self, value: f32) -> Option<f32> {
        self.set_param(Param::RoomSize, value)
    }

    pub fn set_brightness(&self, value: f32) -> Option<f32> {
        self.set_param(Param::Brightness, value)
    }

    pub fn set_width(&self, value: f32) -> Option<f32> {
        self.set_param(Param::Width, value)
    }

    pub fn set_dry_wet(&self, value: f32) -> Option<f32> {
        self.set_param(Param::DryWet, value)
    }

    pub fn set_intensity(&self, value: f32) -> Option<f32> {
        self.set_param(Param::Intensity, value)
    }

    /// Current target of `param`
    pub fn target(&self, param: Param) -> f32 {
        self.store().target(param)
    }

    /// Stage all six main parameters as one group
    pub fn set_main_params(&self, params: &SpatialDefaults) {
        let mut guard = self.store().stage();
        for param in Param::MAIN {
            if let Some(value) = params.get(param) {
                guard.set_direct(param, value);
            }
        }
    }

    /// Targets of the six main parameters
    pub fn main_params(&self) -> SpatialDefaults {
        self.store().main_targets()
    }

    /// Stage the extended reverb parameters as one group
    pub fn set_reverb_profile(&self, profile: &ReverbProfile) {
        let mut guard = self.store().stage();
        guard.set_direct(Param::DecayTime, profile.decay_time_sec);
        guard.set_direct(Param::Diffusion, profile.diffusion);
        guard.set_direct(Param::Modulation, profile.modulation);
        guard.set_direct(Param::Lofi, profile.lofi);
    }

    /// Stage an absorption curve as one group
    pub fn set_absorption(&self, curve: &AbsorptionCurve) {
        let mut guard = self.store().stage();
        guard.set_direct(Param::AbsorptionLow, curve.low);
        guard.set_direct(Param::AbsorptionMid, curve.mid);
        guard.set_direct(Param::AbsorptionHigh, curve.high);
    }

    // ------------------------------------------------------------------------
    // Scenarios
    // ------------------------------------------------------------------------

    /// Blend every target from its base toward scenario `name`
    ///
    /// Intensity is clamped to 0..1. An unknown name changes nothing.
    pub fn apply_scenario(&self, name: &str, intensity: f32) -> Result<()> {
        if intensity.is_nan() {
            return Err(nan_error("intensity"));
        }
        let intensity = intensity.clamp(0.0, 1.0);
        let (index, preset) = self.shared.catalog.resolve(name)?;
        let amount = preset.effective_intensity(intensity);

        let mut guard = self.store().stage();
        guard.blend_from_base(&preset.staged(), amount);
        guard.set_scenario(Some(index), intensity);
        drop(guard);

        info!("Applied scenario '{}' at intensity {:.2}", name, intensity);
        Ok(())
    }

    /// Return every target to its base value
    pub fn clear_scenario(&self) {
        let mut guard = self.store().stage();
        guard.restore_base();
        guard.set_scenario(None, 0.0);
        drop(guard);
        debug!("Scenario cleared");
    }

    /// Stage the weighted average of several scenarios
    ///
    /// Weights must be finite and non-negative with a positive sum. Every
    /// name must exist. On error nothing is staged.
    pub fn blend_scenarios(&self, parts: &[(&str, f32)]) -> Result<()> {
        let mut resolved: Vec<(&ScenarioPreset, f32)> = Vec::with_capacity(parts.len());
        let mut heaviest: Option<(usize, f32)> = None;
        for &(name, weight) in parts {
            if !(weight.is_finite() && weight >= 0.0) {
                return Err(EngineError::InvalidParameter {
                    param: format!("weight[{}]", name),
                    value: weight.to_string(),
                    expected: "finite and >= 0".to_string(),
                });
            }
            let (index, preset) = self.shared.catalog.resolve(name)?;
            if heaviest.map_or(true, |(_, w)| weight > w) {
                heaviest = Some((index, weight));
            }
            resolved.push((preset, weight));
        }
        let staged = scenario::blend_staged(&resolved).ok_or_else(|| EngineError::InvalidParameter {
            param: "weights".to_string(),
            value: "0".to_string(),
            expected: "a positive sum".to_string(),
        })?;

        let mut guard = self.store().stage();
        guard.blend_from_base(&staged, 1.0);
        guard.set_scenario(heaviest.map(|(index, _)| index), 1.0);
        drop(guard);

        debug!("Blended {} scenarios", parts.len());
        Ok(())
    }

    /// Preset record of scenario `name`
    pub fn scenario_defaults(&self, name: &str) -> Result<ScenarioPreset> {
        Ok(self.shared.catalog.resolve(name)?.1.clone())
    }

    /// All scenario names in catalog order
    pub fn scenario_names(&self) -> Vec<String> {
        self.shared
            .catalog
            .names()
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    /// Name of the active scenario, if any
    pub fn active_scenario(&self) -> Option<String> {
        let index = self.store().active_scenario()?;
        self.shared.catalog.name(index).map(str::to_string)
    }

    pub fn scenario_intensity(&self) -> f32 {
        self.store().scenario_intensity()
    }

    // ------------------------------------------------------------------------
    // Source position
    // ------------------------------------------------------------------------

    /// Position the direct sound at `azimuth_deg`, `elevation_deg`
    ///
    /// Loads the HRTF dataset on first use. Azimuth wraps into -180..180,
    /// elevation is clamped to -90..90.
    pub fn set_source_position(&self, azimuth_deg: f32, elevation_deg: f32) -> Result<()> {
        if !azimuth_deg.is_finite() {
            return Err(EngineError::InvalidParameter {
                param: "azimuth".to_string(),
                value: azimuth_deg.to_string(),
                expected: "a finite angle in degrees".to_string(),
            });
        }
        if elevation_deg.is_nan() {
            return Err(nan_error("elevation"));
        }
        let azimuth = wrap_degrees(azimuth_deg);
        let elevation = elevation_deg.clamp(-90.0, 90.0);

        let dataset = self.shared.hrtf.dataset();
        let distance = self.store().target(Param::Distance);
        let route = dataset.route_for(azimuth, elevation, Some(distance));

        let mut guard = self.store().stage();
        guard.set_direct(Param::Azimuth, azimuth);
        guard.set_direct(Param::Elevation, elevation);
        guard.set_route(route);
        drop(guard);

        debug!(
            "Source at azimuth {:.1}, elevation {:.1} -> {:?}",
            azimuth, elevation, route
        );
        Ok(())
    }

    /// Stop spatializing the direct path
    pub fn clear_source_position(&self) {
        self.store().stage().set_route(SourceRoute::Unpositioned);
    }

    pub fn source_route(&self) -> SourceRoute {
        self.store().route()
    }

    // ------------------------------------------------------------------------
    // Expressions and reset
    // ------------------------------------------------------------------------

    /// Apply a control expression such as `"distance:0.2, warmth:0.5"`
    ///
    /// Parameter writes are staged as one group before any scenario the
    /// expression names. Returns the parsed expression.
    pub fn apply_expression(&self, text: &str) -> Result<Expression> {
        let parsed = expression::parse(text)?;
        let max_distance = self.shared.config.distance_model.max_distance;
        let actions: Vec<ExpressionAction> = parsed
            .terms
            .iter()
            .flat_map(|term| term.actions(max_distance))
            .collect();

        {
            let mut guard = self.store().stage();
            for action in &actions {
                if let ExpressionAction::Set(param, value) = action {
                    guard.set_direct(*param, *value);
                }
            }
        }
        for action in &actions {
            if let ExpressionAction::Scenario(name, intensity) = action {
                if let Err(err) = self.apply_scenario(name, *intensity) {
                    warn!("Expression scenario '{}' failed: {}", name, err);
                    return Err(err);
                }
            }
        }
        Ok(parsed)
    }

    /// Clear all DSP state at the start of the next buffer
    pub fn reset(&self) {
        self.store().request_reset();
    }
}

/// Wrap an angle into [-180, 180)
fn wrap_degrees(degrees: f32) -> f32 {
    let wrapped = (degrees + 180.0).rem_euclid(360.0) - 180.0;
    if wrapped >= 180.0 {
        -180.0
    } else {
        wrapped
    }
}

// ============================================================================
// Tests
// ============================================================================
