//! Parameter store and smoothing
//!
//! Targets live in atomics written by any number of control threads and read
//! once per buffer by the audio thread. A sequence counter brackets each staged
//! group so the audio thread either sees the whole group or keeps its previous
//! snapshot for one more buffer; it never waits. Current values and their
//! per-buffer ramps are owned by the audio thread alone ([`Smoother`]).

use std::sync::atomic::{fence, AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use super::config::EngineConfig;

// ============================================================================
// Atomic f32
// ============================================================================

/// `f32` stored as its bit pattern in an `AtomicU32`
#[derive(Debug, Default)]
pub struct AtomicF32(AtomicU32);

impl AtomicF32 {
    pub fn new(value: f32) -> Self {
        Self(AtomicU32::new(value.to_bits()))
    }

    #[inline]
    pub fn load(&self, order: Ordering) -> f32 {
        f32::from_bits(self.0.load(order))
    }

    #[inline]
    pub fn store(&self, value: f32, order: Ordering) {
        self.0.store(value.to_bits(), order);
    }
}

// ============================================================================
// Parameter identifiers
// ============================================================================

/// Every smoothed engine parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Param {
    Distance,
    RoomSize,
    Brightness,
    Width,
    DryWet,
    Intensity,
    /// RT60 in seconds, 0 derives it from room size
    DecayTime,
    Diffusion,
    Modulation,
    Lofi,
    AbsorptionLow,
    AbsorptionMid,
    AbsorptionHigh,
    Azimuth,
    Elevation,
}

pub const PARAM_COUNT: usize = 15;

impl Param {
    pub const ALL: [Param; PARAM_COUNT] = [
        Param::Distance,
        Param::RoomSize,
        Param::Brightness,
        Param::Width,
        Param::DryWet,
        Param::Intensity,
        Param::DecayTime,
        Param::Diffusion,
        Param::Modulation,
        Param::Lofi,
        Param::AbsorptionLow,
        Param::AbsorptionMid,
        Param::AbsorptionHigh,
        Param::Azimuth,
        Param::Elevation,
    ];

    /// The six main spatial parameters
    pub const MAIN: [Param; 6] = [
        Param::Distance,
        Param::RoomSize,
        Param::Brightness,
        Param::Width,
        Param::DryWet,
        Param::Intensity,
    ];

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            Param::Distance => "distance",
            Param::RoomSize => "room_size",
            Param::Brightness => "brightness",
            Param::Width => "width",
            Param::DryWet => "dry_wet",
            Param::Intensity => "intensity",
            Param::DecayTime => "decay_time",
            Param::Diffusion => "diffusion",
            Param::Modulation => "modulation",
            Param::Lofi => "lofi",
            Param::AbsorptionLow => "absorption_low",
            Param::AbsorptionMid => "absorption_mid",
            Param::AbsorptionHigh => "absorption_high",
            Param::Azimuth => "azimuth",
            Param::Elevation => "elevation",
        }
    }
}

// ============================================================================
// Value groups
// ============================================================================

/// The six main spatial parameters as one record
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpatialDefaults {
    /// Source distance (engine units, >= 0)
    pub distance: f32,
    /// Room size 0-1
    pub room_size: f32,
    /// Spectral tilt 0-1 (0.5 = neutral)
    pub brightness: f32,
    /// Stereo width 0-1 (0.5 = unchanged)
    pub width: f32,
    /// Dry/wet mix 0-1 (0 = fully dry)
    pub dry_wet: f32,
    /// Overall effect strength 0-1
    pub intensity: f32,
}

impl Default for SpatialDefaults {
    fn default() -> Self {
        Self {
            distance: 1.0,
            room_size: 0.5,
            brightness: 0.5,
            width: 0.5,
            dry_wet: 0.5,
            intensity: 1.0,
        }
    }
}

impl SpatialDefaults {
    pub fn get(&self, param: Param) -> Option<f32> {
        Some(match param {
            Param::Distance => self.distance,
            Param::RoomSize => self.room_size,
            Param::Brightness => self.brightness,
            Param::Width => self.width,
            Param::DryWet => self.dry_wet,
            Param::Intensity => self.intensity,
            _ => return None,
        })
    }

    fn set(&mut self, param: Param, value: f32) {
        match param {
            Param::Distance => self.distance = value,
            Param::RoomSize => self.room_size = value,
            Param::Brightness => self.brightness = value,
            Param::Width => self.width = value,
            Param::DryWet => self.dry_wet = value,
            Param::Intensity => self.intensity = value,
            _ => {}
        }
    }
}

/// Reverb character staged by scenarios or set directly
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReverbProfile {
    /// RT60 in seconds (0 = derived from room size)
    pub decay_time_sec: f32,
    /// Early-reflection density 0-1
    pub diffusion: f32,
    /// Delay-line modulation depth 0-1
    pub modulation: f32,
    /// Bit-crush and noise amount 0-1
    pub lofi: f32,
}

impl Default for ReverbProfile {
    fn default() -> Self {
        Self {
            decay_time_sec: 0.0,
            diffusion: 0.5,
            modulation: 0.0,
            lofi: 0.0,
        }
    }
}

/// Frequency-dependent absorption, each band 0-1
///
/// `low` thins the tail's bass, `mid` shortens the decay time, `high`
/// darkens the tail. The default is the neutral curve.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AbsorptionCurve {
    pub low: f32,
    pub mid: f32,
    pub high: f32,
}

impl Default for AbsorptionCurve {
    fn default() -> Self {
        Self {
            low: 0.0,
            mid: 0.5,
            high: 0.5,
        }
    }
}

/// Full set of values one scenario stages
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct StagedValues {
    pub main: SpatialDefaults,
    pub reverb: ReverbProfile,
    pub absorption: AbsorptionCurve,
}

impl StagedValues {
    pub fn to_array(&self) -> [Option<f32>; PARAM_COUNT] {
        let mut out = [None; PARAM_COUNT];
        for param in Param::MAIN {
            out[param.index()] = self.main.get(param);
        }
        out[Param::DecayTime.index()] = Some(self.reverb.decay_time_sec);
        out[Param::Diffusion.index()] = Some(self.reverb.diffusion);
        out[Param::Modulation.index()] = Some(self.reverb.modulation);
        out[Param::Lofi.index()] = Some(self.reverb.lofi);
        out[Param::AbsorptionLow.index()] = Some(self.absorption.low);
        out[Param::AbsorptionMid.index()] = Some(self.absorption.mid);
        out[Param::AbsorptionHigh.index()] = Some(self.absorption.high);
        out
    }
}

#[inline]
pub fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

// ============================================================================
// Source routing
// ============================================================================

/// How the direct path is spatialized
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SourceRoute {
    /// No source position: direct path passes through
    #[default]
    Unpositioned,
    /// Position set but no measurement close enough: ITD/ILD model
    Parametric,
    /// Convolve with the measurement at this index
    Hrtf(usize),
}

impl SourceRoute {
    fn encode(self) -> usize {
        match self {
            SourceRoute::Unpositioned => 0,
            SourceRoute::Parametric => 1,
            SourceRoute::Hrtf(index) => index + 2,
        }
    }

    fn decode(raw: usize) -> Self {
        match raw {
            0 => SourceRoute::Unpositioned,
            1 => SourceRoute::Parametric,
            n => SourceRoute::Hrtf(n - 2),
        }
    }
}

/// Marker for "no scenario applied"
pub const NO_SCENARIO: usize = usize::MAX;

// ============================================================================
// Parameter Store
// ============================================================================

/// Consistent copy of every target, taken once per buffer
#[derive(Debug, Clone, Copy)]
pub struct ParamSnapshot {
    pub values: [f32; PARAM_COUNT],
    pub route: SourceRoute,
    pub sequence: u64,
}

impl ParamSnapshot {
    #[inline]
    pub fn get(&self, param: Param) -> f32 {
        self.values[param.index()]
    }
}

/// Control-side bookkeeping, only touched under the writer lock
#[derive(Debug, Clone)]
struct ControlState {
    /// Last values set through direct setters
    base: [f32; PARAM_COUNT],
}

/// Shared targets for one engine
#[derive(Debug)]
pub struct ParameterStore {
    targets: [AtomicF32; PARAM_COUNT],
    ranges: [(f32, f32); PARAM_COUNT],
    route: AtomicUsize,
    active_scenario: AtomicUsize,
    scenario_intensity: AtomicF32,
    reset_requested: AtomicBool,
    sequence: AtomicU64,
    control: Mutex<ControlState>,
}

/// Exclusive staging access for one group of writes
pub struct StagingGuard<'a> {
    store: &'a ParameterStore,
    control: MutexGuard<'a, ControlState>,
    sequence: u64,
}

impl ParameterStore {
    /// Create a store holding the engine defaults
    pub fn new(config: &EngineConfig) -> Self {
        let mut ranges = [(0.0_f32, 1.0_f32); PARAM_COUNT];
        ranges[Param::Distance.index()] = (0.0, config.distance_model.max_distance);
        ranges[Param::DecayTime.index()] = (0.0, config.max_reverb_time_sec);
        ranges[Param::Azimuth.index()] = (-180.0, 180.0);
        ranges[Param::Elevation.index()] = (-90.0, 90.0);

        let defaults = Self::default_values();
        Self {
            targets: std::array::from_fn(|i| AtomicF32::new(defaults[i])),
            ranges,
            route: AtomicUsize::new(SourceRoute::Unpositioned.encode()),
            active_scenario: AtomicUsize::new(NO_SCENARIO),
            scenario_intensity: AtomicF32::new(0.0),
            reset_requested: AtomicBool::new(false),
            sequence: AtomicU64::new(0),
            control: Mutex::new(ControlState { base: defaults }),
        }
    }

    /// Engine default for every parameter
    pub fn default_values() -> [f32; PARAM_COUNT] {
        let staged = StagedValues::default().to_array();
        let mut values = [0.0; PARAM_COUNT];
        for (value, staged) in values.iter_mut().zip(staged) {
            *value = staged.unwrap_or(0.0);
        }
        values
    }

    /// Clamp `value` into the documented range of `param`
    ///
    /// Returns `None` for NaN so a bad write leaves the target untouched.
    pub fn sanitize(&self, param: Param, value: f32) -> Option<f32> {
        if value.is_nan() {
            return None;
        }
        let (lo, hi) = self.ranges[param.index()];
        Some(value.clamp(lo, hi))
    }

    /// Begin a group of writes
    pub fn stage(&self) -> StagingGuard<'_> {
        let control = self
            .control
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let sequence = self.sequence.load(Ordering::Relaxed);
        self.sequence.store(sequence + 1, Ordering::Relaxed);
        fence(Ordering::Release);
        StagingGuard {
            store: self,
            control,
            sequence,
        }
    }

    /// Current target of `param`
    pub fn target(&self, param: Param) -> f32 {
        self.targets[param.index()].load(Ordering::Acquire)
    }

    /// Targets of the six main parameters
    pub fn main_targets(&self) -> SpatialDefaults {
        let mut out = SpatialDefaults::default();
        for param in Param::MAIN {
            out.set(param, self.target(param));
        }
        out
    }

    pub fn active_scenario(&self) -> Option<usize> {
        match self.active_scenario.load(Ordering::Acquire) {
            NO_SCENARIO => None,
            index => Some(index),
        }
    }

    pub fn scenario_intensity(&self) -> f32 {
        self.scenario_intensity.load(Ordering::Acquire)
    }

    pub fn route(&self) -> SourceRoute {
        SourceRoute::decode(self.route.load(Ordering::Acquire))
    }

    /// Ask the audio thread to clear all DSP state before the next buffer
    pub fn request_reset(&self) {
        self.reset_requested.store(true, Ordering::Release);
    }

    /// Audio thread: consume a pending reset request
    pub fn take_reset(&self) -> bool {
        self.reset_requested.swap(false, Ordering::AcqRel)
    }

    /// Audio thread: refresh `snapshot` if a complete new group is visible
    ///
    /// Never blocks. Returns `false` when a writer is mid-group, in which case
    /// `snapshot` keeps its previous contents.
    pub fn read_snapshot(&self, snapshot: &mut ParamSnapshot) -> bool {
        let before = self.sequence.load(Ordering::Acquire);
        if before & 1 == 1 {
            return false;
        }
        if before == snapshot.sequence {
            return true;
        }
        let mut values = [0.0; PARAM_COUNT];
        for (value, target) in values.iter_mut().zip(&self.targets) {
            *value = target.load(Ordering::Relaxed);
        }
        let route = SourceRoute::decode(self.route.load(Ordering::Relaxed));
        fence(Ordering::Acquire);
        let after = self.sequence.load(Ordering::Relaxed);
        if before != after {
            return false;
        }
        snapshot.values = values;
        snapshot.route = route;
        snapshot.sequence = before;
        true
    }

    /// Snapshot for initializing the audio side
    pub fn initial_snapshot(&self) -> ParamSnapshot {
        let mut snapshot = ParamSnapshot {
            values: Self::default_values(),
            route: SourceRoute::Unpositioned,
            sequence: u64::MAX,
        };
        // No writers exist yet, so this cannot observe a half-written group.
        self.read_snapshot(&mut snapshot);
        snapshot
    }
}

impl<'a> StagingGuard<'a> {
    /// Write a target directly and remember it as the base value
    pub fn set_direct(&mut self, param: Param, value: f32) -> Option<f32> {
        let value = self.store.sanitize(param, value)?;
        self.control.base[param.index()] = value;
        self.store.targets[param.index()].store(value, Ordering::Relaxed);
        Some(value)
    }

    /// Write a target without touching the base value
    pub fn set_target(&mut self, param: Param, value: f32) -> Option<f32> {
        let value = self.store.sanitize(param, value)?;
        self.store.targets[param.index()].store(value, Ordering::Relaxed);
        Some(value)
    }

    /// Base value of `param` (last direct write or engine default)
    pub fn base(&self, param: Param) -> f32 {
        self.control.base[param.index()]
    }

    /// Stage `lerp(base, staged, amount)` for every value in `staged`
    pub fn blend_from_base(&mut self, staged: &StagedValues, amount: f32) {
        for (param, value) in Param::ALL.iter().zip(staged.to_array()) {
            if let Some(value) = value {
                let base = self.base(*param);
                self.set_target(*param, lerp(base, value, amount));
            }
        }
    }

    /// Point every target back at its base value
    pub fn restore_base(&mut self) {
        for param in Param::ALL {
            let base = self.base(param);
            self.store.targets[param.index()].store(base, Ordering::Relaxed);
        }
    }

    pub fn set_route(&mut self, route: SourceRoute) {
        self.store.route.store(route.encode(), Ordering::Relaxed);
    }

    pub fn set_scenario(&mut self, index: Option<usize>, intensity: f32) {
        self.store
            .active_scenario
            .store(index.unwrap_or(NO_SCENARIO), Ordering::Relaxed);
        self.store
            .scenario_intensity
            .store(intensity, Ordering::Relaxed);
    }
}

impl Drop for StagingGuard<'_> {
    fn drop(&mut self) {
        self.store
            .sequence
            .store(self.sequence + 2, Ordering::Release);
    }
}

// ============================================================================
// Smoothing (audio thread)
// ============================================================================

/// Relative distance at which a smoothed value snaps onto its target
pub const SNAP_TOLERANCE: f32 = 1e-6;

/// Linear ramp across one buffer
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ramp {
    pub from: f32,
    pub to: f32,
}

impl Ramp {
    pub fn constant(value: f32) -> Self {
        Self {
            from: value,
            to: value,
        }
    }

    #[inline]
    pub fn is_constant(&self) -> bool {
        self.from == self.to
    }

    /// Value after sample `i` of an `n`-sample buffer (reaches `to` at `n - 1`)
    #[inline]
    pub fn at(&self, i: usize, n: usize) -> f32 {
        if self.is_constant() || i + 1 >= n {
            return self.to;
        }
        self.from + (self.to - self.from) * ((i + 1) as f32 / n as f32)
    }

    /// Map both ends through `f`
    pub fn map(&self, f: impl Fn(f32) -> f32) -> Ramp {
        if self.is_constant() {
            Ramp::constant(f(self.to))
        } else {
            Ramp {
                from: f(self.from),
                to: f(self.to),
            }
        }
    }
}

/// Current values of every parameter, advanced once per buffer
#[derive(Debug, Clone)]
pub struct Smoother {
    current: [f32; PARAM_COUNT],
    ramps: [Ramp; PARAM_COUNT],
    /// Time constant in samples, 0 = snap
    tau_samples: f32,
}

impl Smoother {
    pub fn new(initial: &ParamSnapshot, smoothing_time_ms: f32, sample_rate: u32) -> Self {
        Self {
            current: initial.values,
            ramps: initial.values.map(Ramp::constant),
            tau_samples: smoothing_time_ms * 0.001 * sample_rate as f32,
        }
    }

    /// Move every current value toward its target by one buffer of `frames`
    pub fn advance(&mut self, targets: &ParamSnapshot, frames: usize) {
        let coeff = if self.tau_samples > 0.0 {
            (-(frames as f32) / self.tau_samples).exp()
        } else {
            0.0
        };
        for i in 0..PARAM_COUNT {
            let from = self.current[i];
            let target = targets.values[i];
            let mut to = target + (from - target) * coeff;
            if (to - target).abs() <= SNAP_TOLERANCE * target.abs().max(1.0) {
                to = target;
            }
            self.current[i] = to;
            self.ramps[i] = Ramp { from, to };
        }
    }

    /// Jump straight to the targets (used after a reset)
    pub fn snap(&mut self, targets: &ParamSnapshot) {
        self.current = targets.values;
        self.ramps = targets.values.map(Ramp::constant);
    }

    #[inline]
    pub fn ramp(&self, param: Param) -> Ramp {
        self.ramps[param.index()]
    }

    #[inline]
    pub fn current(&self, param: Param) -> f32 {
        self.current[param.index()]
    }
}

// ============================================================================
// Tests
// ============================================================================
