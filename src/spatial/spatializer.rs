//! Direct-path spatializer
//!
//! Renders the direct sound for the current [`SourceRoute`]: a pass-through
//! copy when no position is set, HRTF convolution when a measurement is
//! close enough, and the parametric ITD/ILD model otherwise. Route changes
//! crossfade over one buffer. Air absorption darkens distant sources.
//!
//! All storage is allocated in [`Spatializer::new`].

use std::sync::Arc;

use super::binaural::{BinauralCues, BROADBAND_ILD_FREQ_HZ};
use super::hrtf::{HrtfStore, MAX_HRTF_TAPS};
use crate::dsp::filter::one_pole_alpha;
use crate::dsp::OnePole;
use crate::engine::buffer::StereoScratch;
use crate::engine::params::{Ramp, SourceRoute};

/// Past input kept for convolution
const HISTORY: usize = MAX_HRTF_TAPS - 1;

/// Longest parametric ear delay in seconds
const MAX_ITD_DELAY_SEC: f32 = 0.01;

/// Air absorption cutoff limits
const AIR_MAX_CUTOFF_HZ: f32 = 20000.0;
const AIR_MIN_CUTOFF_HZ: f32 = 1000.0;

/// Lowpass cutoff for air absorption, `None` inside the reference distance
pub fn air_absorption_cutoff(distance: f32, reference_distance: f32) -> Option<f32> {
    if !(distance > reference_distance) {
        return None;
    }
    let excess = distance - reference_distance;
    Some((AIR_MAX_CUTOFF_HZ / (1.0 + 0.01 * excess)).clamp(AIR_MIN_CUTOFF_HZ, AIR_MAX_CUTOFF_HZ))
}

/// Mid/side width: 0 = mono, 0.5 = unchanged, 1 = doubled side
pub fn apply_width(left: &mut [f32], right: &mut [f32], width: Ramp) {
    if width.is_constant() && width.to == 0.5 {
        return;
    }
    let n = left.len();
    for (i, (l, r)) in left.iter_mut().zip(right.iter_mut()).enumerate() {
        let side_gain = 2.0 * width.at(i, n);
        let mid = 0.5 * (*l + *r);
        let side = 0.5 * (*l - *r) * side_gain;
        *l = mid + side;
        *r = mid - side;
    }
}

// ============================================================================
// Parametric model
// ============================================================================

/// ITD delay line, ILD gains and head shadow for one mono source
#[derive(Debug)]
struct Parametric {
    ring: Vec<f32>,
    mask: usize,
    write: usize,
    max_delay: f32,
    shadow: [OnePole; 2],
}

impl Parametric {
    fn new(sample_rate: f32) -> Self {
        let len = ((MAX_ITD_DELAY_SEC * sample_rate).ceil() as usize + 2).next_power_of_two();
        Self {
            ring: vec![0.0; len],
            mask: len - 1,
            write: 0,
            max_delay: (len - 2) as f32,
            shadow: [OnePole::default(); 2],
        }
    }

    #[inline]
    fn push(&mut self, x: f32) {
        self.ring[self.write] = x;
        self.write = (self.write + 1) & self.mask;
    }

    /// Sample `delay` samples before the most recent one
    #[inline]
    fn read(&self, delay: f32) -> f32 {
        let delay = delay.clamp(0.0, self.max_delay);
        let whole = delay as usize;
        let frac = delay - whole as f32;
        let newest = self.write.wrapping_sub(1);
        let a = self.ring[newest.wrapping_sub(whole) & self.mask];
        let b = self.ring[newest.wrapping_sub(whole + 1) & self.mask];
        a + (b - a) * frac
    }

    fn feed(&mut self, mono: &[f32]) {
        for &x in mono {
            self.push(x);
        }
    }

    fn render(
        &mut self,
        mono: &[f32],
        left: &mut [f32],
        right: &mut [f32],
        azimuth: Ramp,
        elevation: Ramp,
        sample_rate: f32,
    ) {
        let n = mono.len();
        let fixed = azimuth.is_constant() && elevation.is_constant();
        let mut cues = BinauralCues::for_direction(azimuth.to, elevation.to, BROADBAND_ILD_FREQ_HZ);
        for i in 0..n {
            if !fixed {
                cues = BinauralCues::for_direction(
                    azimuth.at(i, n),
                    elevation.at(i, n),
                    BROADBAND_ILD_FREQ_HZ,
                );
            }
            self.push(mono[i]);
            let (dl, dr) = cues.ear_delays(sample_rate);
            let (gl, gr) = cues.ear_gains();
            let alpha = cues.shadow_alpha(sample_rate);
            let mut l = self.read(dl) * gl;
            let mut r = self.read(dr) * gr;
            if cues.left_is_far() {
                l = self.shadow[0].process(l, alpha);
                self.shadow[1].follow(r);
            } else if cues.itd_us < 0.0 {
                r = self.shadow[1].process(r, alpha);
                self.shadow[0].follow(l);
            } else {
                self.shadow[0].follow(l);
                self.shadow[1].follow(r);
            }
            left[i] = l;
            right[i] = r;
        }
    }

    fn reset(&mut self) {
        self.ring.fill(0.0);
        self.write = 0;
        for filter in &mut self.shadow {
            filter.reset();
        }
    }
}

// ============================================================================
// Spatializer
// ============================================================================

/// Per-buffer inputs of the direct path
#[derive(Debug, Clone, Copy)]
pub struct DirectControls {
    pub route: SourceRoute,
    /// Degrees, positive to the right
    pub azimuth: Ramp,
    /// Degrees, positive upward
    pub elevation: Ramp,
    pub distance: Ramp,
}

impl Default for DirectControls {
    fn default() -> Self {
        Self {
            route: SourceRoute::Unpositioned,
            azimuth: Ramp::constant(0.0),
            elevation: Ramp::constant(0.0),
            distance: Ramp::constant(0.0),
        }
    }
}

/// Direct-path renderer
#[derive(Debug)]
pub struct Spatializer {
    sample_rate: f32,
    reference_distance: f32,
    hrtf: Arc<HrtfStore>,
    /// Route rendered by the previous buffer; `None` right after a reset
    route: Option<SourceRoute>,
    /// `HISTORY` past mono samples followed by the current block
    mono: Vec<f32>,
    fade: StereoScratch,
    parametric: Parametric,
    air: [OnePole; 2],
}

impl Spatializer {
    pub fn new(
        sample_rate: u32,
        max_frames: usize,
        reference_distance: f32,
        hrtf: Arc<HrtfStore>,
    ) -> Self {
        let sr = sample_rate as f32;
        Self {
            sample_rate: sr,
            reference_distance,
            hrtf,
            route: None,
            mono: vec![0.0; HISTORY + max_frames],
            fade: StereoScratch::new(max_frames),
            parametric: Parametric::new(sr),
            air: [OnePole::default(); 2],
        }
    }

    /// Render the direct path of `dry` into `left`/`right`
    ///
    /// All four slices must have the same length, no larger than the
    /// `max_frames` given at construction.
    pub fn process(
        &mut self,
        dry_left: &[f32],
        dry_right: &[f32],
        left: &mut [f32],
        right: &mut [f32],
        controls: &DirectControls,
    ) {
        let frames = dry_left.len();
        for (dst, (l, r)) in self.mono[HISTORY..HISTORY + frames]
            .iter_mut()
            .zip(dry_left.iter().zip(dry_right))
        {
            *dst = 0.5 * (l + r);
        }

        let route = controls.route;
        let previous = self.route.unwrap_or(route);
        self.render(route, controls, dry_left, dry_right, left, right);

        if previous != route {
            let mut fade = std::mem::take(&mut self.fade);
            let (fl, fr) = fade.channels_mut(frames);
            self.render(previous, controls, dry_left, dry_right, fl, fr);
            for i in 0..frames {
                let t = (i + 1) as f32 / frames as f32;
                left[i] = fl[i] + (left[i] - fl[i]) * t;
                right[i] = fr[i] + (right[i] - fr[i]) * t;
            }
            self.fade = fade;
        }
        if previous != SourceRoute::Parametric && route != SourceRoute::Parametric {
            self.parametric.feed(&self.mono[HISTORY..HISTORY + frames]);
        }
        self.mono.copy_within(frames..frames + HISTORY, 0);
        self.route = Some(route);

        self.absorb(left, right, controls.distance);
    }

    fn render(
        &mut self,
        route: SourceRoute,
        controls: &DirectControls,
        dry_left: &[f32],
        dry_right: &[f32],
        left: &mut [f32],
        right: &mut [f32],
    ) {
        let frames = dry_left.len();
        match route {
            SourceRoute::Unpositioned => {
                left.copy_from_slice(dry_left);
                right.copy_from_slice(dry_right);
            }
            SourceRoute::Parametric => {
                self.parametric.render(
                    &self.mono[HISTORY..HISTORY + frames],
                    left,
                    right,
                    controls.azimuth,
                    controls.elevation,
                    self.sample_rate,
                );
            }
            SourceRoute::Hrtf(index) => {
                let Some(measurement) = self.hrtf.loaded().and_then(|d| d.measurement(index))
                else {
                    left.copy_from_slice(dry_left);
                    right.copy_from_slice(dry_right);
                    return;
                };
                convolve(&self.mono, frames, &measurement.left, left);
                convolve(&self.mono, frames, &measurement.right, right);
            }
        }
    }

    fn absorb(&mut self, left: &mut [f32], right: &mut [f32], distance: Ramp) {
        let n = left.len();
        let reference = self.reference_distance;
        let sr = self.sample_rate;
        let alpha_at = |d: f32| air_absorption_cutoff(d, reference).map(|fc| one_pole_alpha(fc, sr));
        let fixed = distance.is_constant().then(|| alpha_at(distance.to));

        for (c, channel) in [left, right].into_iter().enumerate() {
            let filter = &mut self.air[c];
            for (i, x) in channel.iter_mut().enumerate() {
                let alpha = match fixed {
                    Some(alpha) => alpha,
                    None => alpha_at(distance.at(i, n)),
                };
                match alpha {
                    Some(alpha) => *x = filter.process(*x, alpha),
                    None => filter.follow(*x),
                }
            }
        }
    }

    /// Clear all history; the next buffer starts without a crossfade
    pub fn reset(&mut self) {
        self.mono.fill(0.0);
        self.fade.clear();
        self.parametric.reset();
        for filter in &mut self.air {
            filter.reset();
        }
        self.route = None;
    }
}

/// Direct-form FIR over `mono`, whose first `HISTORY` samples are past input
fn convolve(mono: &[f32], frames: usize, ir: &[f32], out: &mut [f32]) {
    for (n, y) in out.iter_mut().enumerate().take(frames) {
        let now = HISTORY + n;
        let mut acc = 0.0;
        for (k, h) in ir.iter().enumerate() {
            acc += h * mono[now - k];
        }
        *y = acc;
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::config::EngineConfig;
    use crate::spatial::hrtf::{HrirMeasurement, HrtfDataset};
    use approx::assert_relative_eq;

    const SR: u32 = 48000;
    const FRAMES: usize = 256;

    fn store() -> Arc<HrtfStore> {
        Arc::new(HrtfStore::new(&EngineConfig::default()).unwrap())
    }

    fn spatializer() -> Spatializer {
        Spatializer::new(SR, FRAMES, 10.0, store())
    }

    fn sine(frequency: f32, frames: usize) -> Vec<f32> {
        (0..frames)
            .map(|i| (2.0 * std::f32::consts::PI * frequency * i as f32 / SR as f32).sin())
            .collect()
    }

    fn energy(x: &[f32]) -> f32 {
        x.iter().map(|s| s * s).sum()
    }

    #[test]
    fn test_unpositioned_is_exact_copy() {
        let mut s = spatializer();
        let dry_l = sine(440.0, FRAMES);
        let dry_r = sine(660.0, FRAMES);
        let (mut l, mut r) = (vec![0.0; FRAMES], vec![0.0; FRAMES]);
        let controls = DirectControls {
            distance: Ramp::constant(1.0),
            ..DirectControls::default()
        };
        s.process(&dry_l, &dry_r, &mut l, &mut r, &controls);
        assert_eq!(l, dry_l);
        assert_eq!(r, dry_r);
    }

    #[test]
    fn test_hrtf_route_convolves_measurement() {
        let dataset = HrtfDataset::new(
            SR,
            vec![HrirMeasurement {
                azimuth: 0.0,
                elevation: 0.0,
                distance: None,
                left: vec![0.0, 1.0],
                right: vec![0.5, 0.0],
            }],
        )
        .unwrap();
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("h.json");
        std::fs::write(&path, dataset.to_json_string().unwrap()).unwrap();

        let config = EngineConfig {
            hrtf_path: Some(path),
            ..EngineConfig::default()
        };
        let hrtf = Arc::new(HrtfStore::new(&config).unwrap());
        let mut s = Spatializer::new(SR, FRAMES, 10.0, hrtf);

        let mut impulse = vec![0.0; 8];
        impulse[0] = 1.0;
        let (mut l, mut r) = (vec![0.0; 8], vec![0.0; 8]);
        let controls = DirectControls {
            route: SourceRoute::Hrtf(0),
            ..DirectControls::default()
        };
        s.process(&impulse, &impulse, &mut l, &mut r, &controls);
        assert_eq!(l, vec![0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
        assert_eq!(r, vec![0.5, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_convolution_spans_buffers() {
        let mono_ir = vec![0.0, 0.0, 1.0];
        let mut mono = vec![0.0; HISTORY + 2];
        mono[HISTORY + 1] = 1.0;
        let mut out = vec![0.0; 2];
        convolve(&mono, 2, &mono_ir, &mut out);
        assert_eq!(out, vec![0.0, 0.0]);

        mono.copy_within(2..2 + HISTORY, 0);
        mono[HISTORY] = 0.0;
        mono[HISTORY + 1] = 0.0;
        convolve(&mono, 2, &mono_ir, &mut out);
        assert_eq!(out, vec![0.0, 1.0]);
    }

    #[test]
    fn test_parametric_right_source() {
        let mut s = spatializer();
        let dry = sine(1000.0, FRAMES);
        let (mut l, mut r) = (vec![0.0; FRAMES], vec![0.0; FRAMES]);
        let controls = DirectControls {
            route: SourceRoute::Parametric,
            azimuth: Ramp::constant(90.0),
            ..DirectControls::default()
        };
        for _ in 0..4 {
            s.process(&dry, &dry, &mut l, &mut r, &controls);
        }
        assert!(energy(&r) > energy(&l) * 1.5);
    }

    #[test]
    fn test_route_change_is_crossfaded() {
        let mut s = spatializer();
        let dry = vec![0.5; FRAMES];
        let (mut l, mut r) = (vec![0.0; FRAMES], vec![0.0; FRAMES]);
        let mut controls = DirectControls {
            azimuth: Ramp::constant(90.0),
            ..DirectControls::default()
        };
        s.process(&dry, &dry, &mut l, &mut r, &controls);
        let last = l[FRAMES - 1];
        controls.route = SourceRoute::Parametric;
        s.process(&dry, &dry, &mut l, &mut r, &controls);
        // First sample is still almost entirely the old route
        assert!((l[0] - last).abs() < 0.05);
    }

    #[test]
    fn test_air_absorption_darkens_far_sources() {
        assert_eq!(air_absorption_cutoff(5.0, 10.0), None);
        assert_eq!(air_absorption_cutoff(f32::NAN, 10.0), None);
        assert_relative_eq!(air_absorption_cutoff(110.0, 10.0).unwrap(), 10000.0);
        assert_relative_eq!(air_absorption_cutoff(1e6, 10.0).unwrap(), 1000.0);

        let mut s = spatializer();
        let dry = sine(8000.0, FRAMES);
        let (mut l, mut r) = (vec![0.0; FRAMES], vec![0.0; FRAMES]);
        let controls = DirectControls {
            distance: Ramp::constant(500.0),
            ..DirectControls::default()
        };
        s.process(&dry, &dry, &mut l, &mut r, &controls);
        assert!(energy(&l) < energy(&dry) * 0.5);
    }

    #[test]
    fn test_width_extremes() {
        let mut l = vec![1.0, 0.5];
        let mut r = vec![0.0, -0.5];
        apply_width(&mut l, &mut r, Ramp::constant(0.0));
        assert_eq!(l, r);

        let mut l = vec![1.0];
        let mut r = vec![0.0];
        apply_width(&mut l, &mut r, Ramp::constant(0.5));
        assert_eq!((l[0], r[0]), (1.0, 0.0));

        apply_width(&mut l, &mut r, Ramp::constant(1.0));
        assert_relative_eq!(l[0], 1.5);
        assert_relative_eq!(r[0], -0.5);
    }

    #[test]
    fn test_reset_clears_history() {
        let mut s = spatializer();
        let dry = vec![1.0; FRAMES];
        let (mut l, mut r) = (vec![0.0; FRAMES], vec![0.0; FRAMES]);
        let controls = DirectControls {
            route: SourceRoute::Parametric,
            azimuth: Ramp::constant(45.0),
            ..DirectControls::default()
        };
        s.process(&dry, &dry, &mut l, &mut r, &controls);
        s.reset();
        let silent = vec![0.0; FRAMES];
        s.process(&silent, &silent, &mut l, &mut r, &controls);
        assert!(l.iter().chain(&r).all(|x| *x == 0.0));
    }
}
