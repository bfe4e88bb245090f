//! Filters used by the pipeline
//!
//! - Cascaded biquads (Audio EQ Cookbook) for the brightness tilt and the
//!   reverb's low-end absorption
//! - One-pole lowpass for air absorption, head shadow and FDN damping

use std::f64::consts::PI;

use crate::engine::params::Ramp;

/// Frames between coefficient updates while a parameter is ramping
pub const CONTROL_BLOCK: usize = 32;

/// Corner frequency of the brightness tilt
pub const TILT_FREQUENCY_HZ: f64 = 1000.0;

/// Shelf gain at brightness 0 or 1
pub const TILT_MAX_GAIN_DB: f64 = 12.0;

/// Shelf Q for a slope of 1 (maximally steep without overshoot)
const SHELF_Q: f64 = std::f64::consts::FRAC_1_SQRT_2;

// ============================================================================
// Biquad
// ============================================================================

/// Filter shapes the engine needs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterType {
    /// Boost/cut below frequency
    LowShelf,
    /// Boost/cut above frequency
    HighShelf,
    /// Remove below frequency
    HighPass,
}

/// Biquad filter coefficients
/// Transfer function: H(z) = (b0 + b1*z^-1 + b2*z^-2) / (a0 + a1*z^-1 + a2*z^-2)
/// Normalized: all coefficients divided by a0
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BiquadCoeffs {
    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,
}

impl Default for BiquadCoeffs {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl BiquadCoeffs {
    pub const IDENTITY: BiquadCoeffs = BiquadCoeffs {
        b0: 1.0,
        b1: 0.0,
        b2: 0.0,
        a1: 0.0,
        a2: 0.0,
    };

    /// Calculate biquad coefficients using Audio EQ Cookbook formulas
    /// Reference: https://www.w3.org/2011/audio/audio-eq-cookbook.html
    pub fn calculate(
        filter_type: FilterType,
        sample_rate: f64,
        frequency: f64,
        gain_db: f64,
        q: f64,
    ) -> Self {
        let freq = frequency.clamp(10.0, sample_rate / 2.0 - 1.0);
        let q = q.clamp(0.1, 10.0);

        let w0 = 2.0 * PI * freq / sample_rate;
        let cos_w0 = w0.cos();
        let sin_w0 = w0.sin();
        let alpha = sin_w0 / (2.0 * q);

        let a = (10.0_f64).powf(gain_db / 40.0);

        let (b0, b1, b2, a0, a1, a2) = match filter_type {
            FilterType::LowShelf => {
                let two_sqrt_a_alpha = 2.0 * a.sqrt() * alpha;
                (
                    a * ((a + 1.0) - (a - 1.0) * cos_w0 + two_sqrt_a_alpha),
                    2.0 * a * ((a - 1.0) - (a + 1.0) * cos_w0),
                    a * ((a + 1.0) - (a - 1.0) * cos_w0 - two_sqrt_a_alpha),
                    (a + 1.0) + (a - 1.0) * cos_w0 + two_sqrt_a_alpha,
                    -2.0 * ((a - 1.0) + (a + 1.0) * cos_w0),
                    (a + 1.0) + (a - 1.0) * cos_w0 - two_sqrt_a_alpha,
                )
            }
            FilterType::HighShelf => {
                let two_sqrt_a_alpha = 2.0 * a.sqrt() * alpha;
                (
                    a * ((a + 1.0) + (a - 1.0) * cos_w0 + two_sqrt_a_alpha),
                    -2.0 * a * ((a - 1.0) + (a + 1.0) * cos_w0),
                    a * ((a + 1.0) + (a - 1.0) * cos_w0 - two_sqrt_a_alpha),
                    (a + 1.0) - (a - 1.0) * cos_w0 + two_sqrt_a_alpha,
                    2.0 * ((a - 1.0) - (a + 1.0) * cos_w0),
                    (a + 1.0) - (a - 1.0) * cos_w0 - two_sqrt_a_alpha,
                )
            }
            FilterType::HighPass => (
                (1.0 + cos_w0) / 2.0,
                -(1.0 + cos_w0),
                (1.0 + cos_w0) / 2.0,
                1.0 + alpha,
                -2.0 * cos_w0,
                1.0 - alpha,
            ),
        };

        BiquadCoeffs {
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b2 / a0,
            a1: a1 / a0,
            a2: a2 / a0,
        }
    }
}

/// Biquad filter state for one channel
#[derive(Debug, Clone, Copy, Default)]
pub struct BiquadState {
    x1: f64,
    x2: f64,
    y1: f64,
    y2: f64,
}

impl BiquadState {
    /// Process a single sample (Direct Form I)
    #[inline]
    pub fn process(&mut self, input: f64, coeffs: &BiquadCoeffs) -> f64 {
        let output = coeffs.b0 * input + coeffs.b1 * self.x1 + coeffs.b2 * self.x2
            - coeffs.a1 * self.y1
            - coeffs.a2 * self.y2;

        self.x2 = self.x1;
        self.x1 = input;
        self.y2 = self.y1;
        self.y1 = output;

        output
    }

    /// Track one sample that bypassed the filter
    #[inline]
    pub fn pass_sample(&mut self, sample: f32) {
        let s = sample as f64;
        self.x2 = self.x1;
        self.x1 = s;
        self.y2 = self.y1;
        self.y1 = s;
    }

    /// Track samples that bypassed the filter so re-entry is seamless
    pub fn pass_through(&mut self, samples: &[f32]) {
        let start = samples.len().saturating_sub(2);
        for &s in &samples[start..] {
            self.pass_sample(s);
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

// ============================================================================
// Brightness tilt
// ============================================================================

/// Shelf gain in dB for a brightness value (0.5 = flat)
#[inline]
pub fn tilt_gain_db(brightness: f32) -> f64 {
    (brightness.clamp(0.0, 1.0) as f64 - 0.5) * 2.0 * TILT_MAX_GAIN_DB
}

/// Stereo spectral tilt: low shelf cut plus high shelf boost around 1 kHz
///
/// Exactly transparent at brightness 0.5.
#[derive(Debug, Clone)]
pub struct TiltFilter {
    sample_rate: f64,
    low: [BiquadState; 2],
    high: [BiquadState; 2],
    low_coeffs: BiquadCoeffs,
    high_coeffs: BiquadCoeffs,
    gain_db: f64,
}

impl TiltFilter {
    pub fn new(sample_rate: f64) -> Self {
        Self {
            sample_rate,
            low: [BiquadState::default(); 2],
            high: [BiquadState::default(); 2],
            low_coeffs: BiquadCoeffs::IDENTITY,
            high_coeffs: BiquadCoeffs::IDENTITY,
            gain_db: 0.0,
        }
    }

    fn update(&mut self, gain_db: f64) {
        if gain_db == self.gain_db {
            return;
        }
        self.gain_db = gain_db;
        self.low_coeffs = BiquadCoeffs::calculate(
            FilterType::LowShelf,
            self.sample_rate,
            TILT_FREQUENCY_HZ,
            -gain_db,
            SHELF_Q,
        );
        self.high_coeffs = BiquadCoeffs::calculate(
            FilterType::HighShelf,
            self.sample_rate,
            TILT_FREQUENCY_HZ,
            gain_db,
            SHELF_Q,
        );
    }

    /// Filter both channels in place, following `brightness` per control block
    pub fn process(&mut self, left: &mut [f32], right: &mut [f32], brightness: Ramp) {
        let n = left.len();
        let mut start = 0;
        while start < n {
            let end = (start + CONTROL_BLOCK).min(n);
            let gain_db = tilt_gain_db(brightness.at(end - 1, n));
            for (ch, samples) in [&mut left[start..end], &mut right[start..end]]
                .into_iter()
                .enumerate()
            {
                if gain_db == 0.0 {
                    self.low[ch].pass_through(samples);
                    self.high[ch].pass_through(samples);
                    continue;
                }
                self.update(gain_db);
                for s in samples.iter_mut() {
                    let y = self.low[ch].process(*s as f64, &self.low_coeffs);
                    *s = self.high[ch].process(y, &self.high_coeffs) as f32;
                }
            }
            start = end;
        }
    }

    pub fn reset(&mut self) {
        self.low.iter_mut().for_each(BiquadState::reset);
        self.high.iter_mut().for_each(BiquadState::reset);
    }
}

// ============================================================================
// One-pole lowpass
// ============================================================================

/// Smoothing coefficient of an RC lowpass at `cutoff_hz`
#[inline]
pub fn one_pole_alpha(cutoff_hz: f32, sample_rate: f32) -> f32 {
    let rc = 1.0 / (2.0 * std::f32::consts::PI * cutoff_hz.max(1.0));
    let dt = 1.0 / sample_rate;
    dt / (rc + dt)
}

/// First-order lowpass `y += alpha * (x - y)`
#[derive(Debug, Clone, Copy, Default)]
pub struct OnePole {
    state: f32,
}

impl OnePole {
    #[inline]
    pub fn process(&mut self, input: f32, alpha: f32) -> f32 {
        self.state += alpha * (input - self.state);
        self.state
    }

    /// Track `input` without filtering so a later `process` starts from it
    #[inline]
    pub fn follow(&mut self, input: f32) {
        self.state = input;
    }

    pub fn reset(&mut self) {
        self.state = 0.0;
    }
}

// ============================================================================
// Tests
// ============================================================================
