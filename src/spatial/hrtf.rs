//! HRTF datasets
//!
//! A dataset is a set of head-related impulse response pairs measured at
//! known directions. Datasets are loaded from JSON or synthesized from a
//! spherical-head model, and looked up by nearest great-circle angle on the
//! control thread.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use super::binaural::{lateral_sine, SPEED_OF_SOUND};
use crate::dsp::{db_to_linear, filter::one_pole_alpha, OnePole};
use crate::engine::config::EngineConfig;
use crate::engine::params::SourceRoute;
use crate::error::{EngineError, Result};

// ============================================================================
// Constants
// ============================================================================

/// Longest accepted impulse response
pub const MAX_HRTF_TAPS: usize = 512;

/// Beyond this angle to the nearest measurement the parametric model is used
pub const HRTF_MAX_LOOKUP_ANGLE_DEG: f32 = 30.0;

/// Two lookups closer than this (degrees) are treated as a tie
const ANGLE_TIE_DEG: f32 = 1e-3;

/// Spherical head radius for the synthesized set
const HEAD_RADIUS_M: f32 = 0.0875;

/// Far-ear attenuation at 90 degrees in the synthesized set
const SYNTH_ILD_DB: f32 = 10.0;

/// Azimuth grid step and elevations of the synthesized set
const SYNTH_AZIMUTH_STEP_DEG: usize = 15;
const SYNTH_ELEVATIONS_DEG: [f32; 6] = [-40.0, -20.0, 0.0, 20.0, 40.0, 60.0];

/// Pinna reflection level in the synthesized set
const PINNA_GAIN: f32 = 0.2;

// ============================================================================
// Dataset
// ============================================================================

/// One measured direction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HrirMeasurement {
    /// Degrees, positive to the right
    pub azimuth: f32,
    /// Degrees, positive upward
    pub elevation: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance: Option<f32>,
    pub left: Vec<f32>,
    pub right: Vec<f32>,
}

#[derive(Debug, Serialize, Deserialize)]
struct HrtfFile {
    sample_rate: u32,
    measurements: Vec<HrirMeasurement>,
}

/// Validated set of measurements sharing one length and sample rate
#[derive(Debug, Clone)]
pub struct HrtfDataset {
    sample_rate: u32,
    taps: usize,
    measurements: Vec<HrirMeasurement>,
    directions: Vec<[f32; 3]>,
}

impl HrtfDataset {
    /// Validate `measurements` and build the lookup table
    pub fn new(sample_rate: u32, measurements: Vec<HrirMeasurement>) -> Result<Self> {
        let first = measurements.first().ok_or_else(|| EngineError::InvalidParameter {
            param: "measurements".to_string(),
            value: "0".to_string(),
            expected: "at least one measurement".to_string(),
        })?;
        let taps = first.left.len();
        if taps == 0 || taps > MAX_HRTF_TAPS {
            return Err(EngineError::InvalidParameter {
                param: "taps".to_string(),
                value: taps.to_string(),
                expected: format!("1..={}", MAX_HRTF_TAPS),
            });
        }
        for (i, m) in measurements.iter().enumerate() {
            if m.left.len() != taps || m.right.len() != taps {
                return Err(EngineError::InvalidParameter {
                    param: format!("measurements[{}]", i),
                    value: format!("{}/{} taps", m.left.len(), m.right.len()),
                    expected: format!("{} taps per ear", taps),
                });
            }
            let finite = m.azimuth.is_finite()
                && m.elevation.is_finite()
                && m.distance.map_or(true, f32::is_finite)
                && m.left.iter().chain(&m.right).all(|x| x.is_finite());
            if !finite {
                return Err(EngineError::InvalidParameter {
                    param: format!("measurements[{}]", i),
                    value: "non-finite".to_string(),
                    expected: "finite values".to_string(),
                });
            }
        }

        let directions = measurements
            .iter()
            .map(|m| unit_vector(m.azimuth, m.elevation))
            .collect();
        Ok(Self {
            sample_rate,
            taps,
            measurements,
            directions,
        })
    }

    /// Parse a JSON dataset and check it matches `sample_rate`
    pub fn from_json_str(text: &str, sample_rate: u32) -> Result<Self> {
        let file: HrtfFile = serde_json::from_str(text)?;
        if file.sample_rate != sample_rate {
            return Err(EngineError::InvalidParameter {
                param: "sample_rate".to_string(),
                value: file.sample_rate.to_string(),
                expected: format!("{} (engine rate)", sample_rate),
            });
        }
        Self::new(file.sample_rate, file.measurements)
    }

    /// Load a JSON dataset from disk
    pub fn from_json_file(path: &Path, sample_rate: u32) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| EngineError::load_failure(path, e))?;
        let dataset =
            Self::from_json_str(&text, sample_rate).map_err(|e| EngineError::load_failure(path, e))?;
        info!(
            "Loaded HRTF dataset {} ({} measurements, {} taps)",
            path.display(),
            dataset.len(),
            dataset.taps()
        );
        Ok(dataset)
    }

    /// Serialize in the on-disk format
    pub fn to_json_string(&self) -> Result<String> {
        #[derive(Serialize)]
        struct Out<'a> {
            sample_rate: u32,
            measurements: &'a [HrirMeasurement],
        }
        Ok(serde_json::to_string(&Out {
            sample_rate: self.sample_rate,
            measurements: &self.measurements,
        })?)
    }

    /// Spherical-head dataset for `sample_rate`
    ///
    /// Woodworth ITD, a broadband far-ear level drop, a head-shadow lowpass
    /// on the far ear and a small elevation-dependent pinna echo.
    pub fn synthesized(sample_rate: u32) -> Self {
        let sr = sample_rate as f32;
        let taps = ((sr / 500.0).ceil() as usize).clamp(16, MAX_HRTF_TAPS);
        let mut measurements = Vec::new();
        for el in SYNTH_ELEVATIONS_DEG {
            for az in (0..360).step_by(SYNTH_AZIMUTH_STEP_DEG) {
                let az = az as f32 - 180.0;
                let (left, right) = synth_pair(az, el, sr, taps);
                measurements.push(HrirMeasurement {
                    azimuth: az,
                    elevation: el,
                    distance: None,
                    left,
                    right,
                });
            }
        }
        let directions = measurements
            .iter()
            .map(|m| unit_vector(m.azimuth, m.elevation))
            .collect();
        debug!(
            "Synthesized HRTF dataset: {} measurements, {} taps",
            measurements.len(),
            taps
        );
        Self {
            sample_rate,
            taps,
            measurements,
            directions,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Impulse response length shared by every measurement
    pub fn taps(&self) -> usize {
        self.taps
    }

    pub fn len(&self) -> usize {
        self.measurements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.measurements.is_empty()
    }

    pub fn measurement(&self, index: usize) -> Option<&HrirMeasurement> {
        self.measurements.get(index)
    }

    /// Index of the nearest measurement and its angle in degrees
    ///
    /// Ties on angle go to the measurement whose distance is closest to
    /// `distance`.
    pub fn nearest(&self, azimuth: f32, elevation: f32, distance: Option<f32>) -> Option<(usize, f32)> {
        let target = unit_vector(azimuth, elevation);
        let mut best: Option<(usize, f32)> = None;
        for (i, dir) in self.directions.iter().enumerate() {
            let dot = (dir[0] * target[0] + dir[1] * target[1] + dir[2] * target[2]).clamp(-1.0, 1.0);
            let angle = dot.acos().to_degrees();
            best = match best {
                None => Some((i, angle)),
                Some((_, best_angle)) if angle < best_angle - ANGLE_TIE_DEG => Some((i, angle)),
                Some((b, best_angle)) if (angle - best_angle).abs() <= ANGLE_TIE_DEG => {
                    if distance_error(&self.measurements[i], distance)
                        < distance_error(&self.measurements[b], distance)
                    {
                        Some((i, angle))
                    } else {
                        Some((b, best_angle))
                    }
                }
                keep => keep,
            };
        }
        best
    }

    /// Route for a source at the given direction
    pub fn route_for(&self, azimuth: f32, elevation: f32, distance: Option<f32>) -> SourceRoute {
        match self.nearest(azimuth, elevation, distance) {
            Some((index, angle)) if angle <= HRTF_MAX_LOOKUP_ANGLE_DEG => SourceRoute::Hrtf(index),
            _ => SourceRoute::Parametric,
        }
    }
}

fn distance_error(m: &HrirMeasurement, distance: Option<f32>) -> f32 {
    match (m.distance, distance) {
        (Some(a), Some(b)) => (a - b).abs(),
        _ => 0.0,
    }
}

/// Cartesian direction: x forward, y right, z up
fn unit_vector(azimuth: f32, elevation: f32) -> [f32; 3] {
    let (az, el) = (azimuth.to_radians(), elevation.to_radians());
    [el.cos() * az.cos(), el.cos() * az.sin(), el.sin()]
}

/// Add a fractionally delayed impulse to `ir`
fn place(ir: &mut [f32], delay: f32, gain: f32) {
    let i = delay.floor() as usize;
    let frac = delay - delay.floor();
    if let Some(x) = ir.get_mut(i) {
        *x += gain * (1.0 - frac);
    }
    if let Some(x) = ir.get_mut(i + 1) {
        *x += gain * frac;
    }
}

fn synth_pair(azimuth: f32, elevation: f32, sr: f32, taps: usize) -> (Vec<f32>, Vec<f32>) {
    let lateral = lateral_sine(azimuth, elevation);
    let theta = lateral.abs().clamp(0.0, 1.0).asin();
    let itd_samples = HEAD_RADIUS_M / SPEED_OF_SOUND * (theta + theta.sin()) * sr;
    let pinna_delay = (0.0002 + 0.0001 * (1.0 - elevation.to_radians().sin())) * sr;

    let base = 1.0;
    let mut near = vec![0.0; taps];
    let mut far = vec![0.0; taps];
    place(&mut near, base, 1.0);
    place(&mut near, base + pinna_delay, PINNA_GAIN);
    let far_gain = db_to_linear(-SYNTH_ILD_DB * lateral.abs());
    place(&mut far, base + itd_samples, far_gain);
    place(&mut far, base + itd_samples + pinna_delay, PINNA_GAIN * far_gain);

    let shadow = lateral.abs();
    let alpha = one_pole_alpha(2000.0 + (1.0 - shadow) * 8000.0, sr);
    if shadow > 0.0 {
        let mut lp = OnePole::default();
        for x in far.iter_mut() {
            *x = lp.process(*x, alpha);
        }
    }

    // Sources behind the listener lose some top end in both ears
    let behind = (-azimuth.to_radians().cos()).max(0.0) * elevation.to_radians().cos();
    if behind > 0.0 {
        let alpha = one_pole_alpha(16000.0 - 8000.0 * behind, sr);
        for ir in [&mut near, &mut far] {
            let mut lp = OnePole::default();
            for x in ir.iter_mut() {
                *x = lp.process(*x, alpha);
            }
        }
    }

    if lateral > 0.0 {
        (far, near)
    } else {
        (near, far)
    }
}

// ============================================================================
// Lazy store
// ============================================================================

/// Dataset shared between the control side and the audio side
///
/// The control thread loads it on demand; the audio thread only ever calls
/// [`HrtfStore::loaded`], which never blocks.
#[derive(Debug)]
pub struct HrtfStore {
    path: Option<PathBuf>,
    sample_rate: u32,
    dataset: OnceLock<HrtfDataset>,
}

impl HrtfStore {
    /// Create the store, loading the dataset now if `preload_hrtf` is set
    pub fn new(config: &EngineConfig) -> Result<Self> {
        let store = Self {
            path: config.hrtf_file().map(Path::to_path_buf),
            sample_rate: config.sample_rate,
            dataset: OnceLock::new(),
        };
        if config.preload_hrtf {
            let dataset = store.load()?;
            let _ = store.dataset.set(dataset);
        }
        Ok(store)
    }

    fn load(&self) -> Result<HrtfDataset> {
        match &self.path {
            Some(path) => HrtfDataset::from_json_file(path, self.sample_rate),
            None => Ok(HrtfDataset::synthesized(self.sample_rate)),
        }
    }

    /// Dataset, loading it on first use (control thread)
    ///
    /// A load failure falls back to the synthesized dataset.
    pub fn dataset(&self) -> &HrtfDataset {
        self.dataset.get_or_init(|| {
            self.load().unwrap_or_else(|err| {
                warn!("{}; using synthesized HRTF", err);
                HrtfDataset::synthesized(self.sample_rate)
            })
        })
    }

    /// Dataset if it has been loaded (audio thread)
    #[inline]
    pub fn loaded(&self) -> Option<&HrtfDataset> {
        self.dataset.get()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::fs;
    use tempfile::TempDir;
    use test_case::test_case;

    fn impulse_measurement(azimuth: f32, elevation: f32, distance: Option<f32>) -> HrirMeasurement {
        HrirMeasurement {
            azimuth,
            elevation,
            distance,
            left: vec![1.0, 0.0, 0.0, 0.0],
            right: vec![0.5, 0.0, 0.0, 0.0],
        }
    }

    #[test]
    fn test_synthesized_grid() {
        let dataset = HrtfDataset::synthesized(48000);
        assert_eq!(dataset.len(), 24 * 6);
        assert_eq!(dataset.taps(), 96);
        assert!(dataset.taps() <= MAX_HRTF_TAPS);
    }

    #[test]
    fn test_synthesized_front_is_symmetric() {
        let dataset = HrtfDataset::synthesized(48000);
        let (index, angle) = dataset.nearest(0.0, 0.0, None).unwrap();
        assert!(angle < 1e-2);
        let m = dataset.measurement(index).unwrap();
        for (l, r) in m.left.iter().zip(&m.right) {
            assert_relative_eq!(*l, *r, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_synthesized_right_source_favours_right_ear() {
        let dataset = HrtfDataset::synthesized(48000);
        let (index, _) = dataset.nearest(90.0, 0.0, None).unwrap();
        let m = dataset.measurement(index).unwrap();
        let energy = |ir: &[f32]| ir.iter().map(|x| x * x).sum::<f32>();
        assert!(energy(&m.right) > energy(&m.left) * 2.0);
        let onset = |ir: &[f32]| ir.iter().position(|x| x.abs() > 0.05).unwrap();
        assert!(onset(&m.left) > onset(&m.right));
    }

    #[test_case(10.0, 5.0, 15.0, 0.0 ; "snaps to grid")]
    #[test_case(179.0, 0.0, -180.0, 0.0 ; "wraps around the back")]
    #[test_case(-30.0, 55.0, -30.0, 60.0 ; "upper ring")]
    fn test_nearest_lookup(az: f32, el: f32, want_az: f32, want_el: f32) {
        let dataset = HrtfDataset::synthesized(48000);
        let (index, angle) = dataset.nearest(az, el, None).unwrap();
        let m = dataset.measurement(index).unwrap();
        assert_relative_eq!(m.azimuth, want_az);
        assert_relative_eq!(m.elevation, want_el);
        assert!(angle <= HRTF_MAX_LOOKUP_ANGLE_DEG);
    }

    #[test]
    fn test_far_direction_uses_parametric_route() {
        let dataset = HrtfDataset::synthesized(48000);
        assert_eq!(dataset.route_for(0.0, -90.0, None), SourceRoute::Parametric);
        assert!(matches!(dataset.route_for(30.0, 0.0, None), SourceRoute::Hrtf(_)));
    }

    #[test]
    fn test_distance_breaks_ties() {
        let dataset = HrtfDataset::new(
            48000,
            vec![
                impulse_measurement(0.0, 0.0, Some(1.0)),
                impulse_measurement(0.0, 0.0, Some(3.0)),
            ],
        )
        .unwrap();
        assert_eq!(dataset.nearest(0.0, 0.0, Some(2.9)).unwrap().0, 1);
        assert_eq!(dataset.nearest(0.0, 0.0, Some(0.5)).unwrap().0, 0);
    }

    #[test]
    fn test_invalid_datasets_rejected() {
        assert!(HrtfDataset::new(48000, vec![]).is_err());

        let mut uneven = impulse_measurement(0.0, 0.0, None);
        uneven.right.push(0.0);
        assert!(HrtfDataset::new(48000, vec![uneven]).is_err());

        let mut long = impulse_measurement(0.0, 0.0, None);
        long.left = vec![0.0; MAX_HRTF_TAPS + 1];
        long.right = vec![0.0; MAX_HRTF_TAPS + 1];
        assert!(HrtfDataset::new(48000, vec![long]).is_err());

        let mut nan = impulse_measurement(0.0, 0.0, None);
        nan.left[1] = f32::NAN;
        assert!(HrtfDataset::new(48000, vec![nan]).is_err());
    }

    #[test]
    fn test_json_file_round_trip_and_rate_check() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("hrtf.json");
        let dataset =
            HrtfDataset::new(44100, vec![impulse_measurement(-90.0, 0.0, None)]).unwrap();
        fs::write(&path, dataset.to_json_string().unwrap()).unwrap();

        let loaded = HrtfDataset::from_json_file(&path, 44100).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded.taps(), 4);

        let err = HrtfDataset::from_json_file(&path, 48000).unwrap_err();
        assert!(matches!(err, EngineError::LoadFailure { .. }));
    }

    #[test]
    fn test_store_preload_failure_is_fatal() {
        let dir = TempDir::new().unwrap();
        let config = EngineConfig {
            hrtf_path: Some(dir.path().join("missing.json")),
            preload_hrtf: true,
            ..EngineConfig::default()
        };
        assert!(matches!(
            HrtfStore::new(&config).unwrap_err(),
            EngineError::LoadFailure { .. }
        ));
    }

    #[test]
    fn test_store_lazy_failure_falls_back() {
        let dir = TempDir::new().unwrap();
        let config = EngineConfig {
            hrtf_path: Some(dir.path().join("missing.json")),
            preload_hrtf: false,
            ..EngineConfig::default()
        };
        let store = HrtfStore::new(&config).unwrap();
        assert!(store.loaded().is_none());
        assert_eq!(store.dataset().len(), 24 * 6);
        assert!(store.loaded().is_some());
    }
}
