//! Feedback-delay-network reverb
//!
//! Signal flow (mono in, stereo out):
//! - Optional low-end absorption (high-pass)
//! - Pre-delay scaled by room size
//! - 2 series allpass diffusers
//! - 12-tap early reflections panned across the stereo field
//! - 8-line FDN with Hadamard feedback, per-line damping and LFO-modulated
//!   delay lengths
//! - Optional lofi (bit reduction plus noise) on the output
//!
//! Every delay line is allocated at its largest possible length up front.
//! Lengths are fractional and follow the room-size ramp sample by sample, so
//! a room change glides instead of clicking and never reallocates.

use super::filter::{BiquadCoeffs, BiquadState, FilterType, CONTROL_BLOCK};
use crate::engine::params::Ramp;

// ============================================================================
// Constants
// ============================================================================

/// Sample rate the base delay lengths are tuned for
const REFERENCE_SAMPLE_RATE: f32 = 44100.0;

/// Number of FDN lines
pub const FDN_LINES: usize = 8;

/// FDN delays at 44100 Hz
const FDN_DELAYS: [f32; FDN_LINES] = [
    1116.0, 1188.0, 1277.0, 1356.0, 1422.0, 1491.0, 1557.0, 1617.0,
];

/// Allpass diffuser delays at 44100 Hz
const DIFFUSER_DELAYS: [f32; 2] = [142.0, 107.0];

/// Number of early-reflection taps
pub const EARLY_TAPS: usize = 12;

/// Early-reflection tap times in milliseconds at room size 0.5
const EARLY_TAP_MS: [f32; EARLY_TAPS] = [
    7.0, 11.0, 17.0, 23.0, 29.0, 37.0, 45.0, 53.0, 61.0, 73.0, 89.0, 101.0,
];

/// Pre-delay at room size 1
const MAX_PRE_DELAY_SEC: f32 = 0.08;

/// LFO rate for delay modulation
const LFO_RATE_HZ: f32 = 0.25;

/// Peak delay excursion at modulation 1, as a fraction of the line length
const MODULATION_DEPTH: f32 = 0.01;

/// Cutoff of the low-end absorption filter at absorption 1
const MAX_LOW_CUT_HZ: f64 = 400.0;

/// Shortest decay the network is asked for
pub const MIN_RT60_SEC: f32 = 0.1;

/// Delay scale for a room size (0.7 at 0, 1.5 at 1)
#[inline]
fn room_scale(room_size: f32) -> f32 {
    0.7 + 0.8 * room_size
}

/// Early-reflection spread for a room size (0.6 at 0, 1.4 at 1)
#[inline]
fn early_scale(room_size: f32) -> f32 {
    0.6 + 0.8 * room_size
}

// ============================================================================
// Controls
// ============================================================================

/// Smoothed controls for one buffer
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReverbControls {
    pub room_size: Ramp,
    /// Decay time in seconds
    pub rt60: Ramp,
    pub diffusion: Ramp,
    /// One-pole damping inside the feedback loop, 0 (bright) to 1 (dark)
    pub damping: Ramp,
    pub modulation: Ramp,
    pub lofi: Ramp,
    /// Low-end absorption 0-1
    pub low_absorption: Ramp,
}

impl Default for ReverbControls {
    fn default() -> Self {
        Self {
            room_size: Ramp::constant(0.5),
            rt60: Ramp::constant(3.0),
            diffusion: Ramp::constant(0.5),
            damping: Ramp::constant(0.5),
            modulation: Ramp::constant(0.0),
            lofi: Ramp::constant(0.0),
            low_absorption: Ramp::constant(0.0),
        }
    }
}

// ============================================================================
// Delay Line
// ============================================================================

/// Power-of-two ring buffer with fractional reads
#[derive(Debug, Clone)]
struct DelayLine {
    buffer: Vec<f32>,
    /// Next slot to write
    write_pos: usize,
    /// Buffer size mask for efficient wrapping
    mask: usize,
}

impl DelayLine {
    /// Create a delay line able to hold `max_delay` samples of history
    fn new(max_delay: usize) -> Self {
        let size = (max_delay + 2).next_power_of_two();
        Self {
            buffer: vec![0.0; size],
            write_pos: 0,
            mask: size - 1,
        }
    }

    /// Longest delay `read` accepts
    #[inline]
    fn max_delay(&self) -> f32 {
        (self.mask - 1) as f32
    }

    /// Sample written `delay` samples ago (1 = most recent), linearly interpolated
    #[inline]
    fn read(&self, delay: f32) -> f32 {
        let delay = delay.clamp(1.0, self.max_delay());
        let whole = delay as usize;
        let frac = delay - whole as f32;
        let newer = (self.write_pos + self.mask + 1 - whole) & self.mask;
        let older = (newer + self.mask) & self.mask;
        let a = self.buffer[newer];
        a + (self.buffer[older] - a) * frac
    }

    #[inline]
    fn push(&mut self, input: f32) {
        self.buffer[self.write_pos] = input;
        self.write_pos = (self.write_pos + 1) & self.mask;
    }

    fn clear(&mut self) {
        self.buffer.fill(0.0);
        self.write_pos = 0;
    }
}

// ============================================================================
// Network Components
// ============================================================================

/// Schroeder allpass diffuser
#[derive(Debug, Clone)]
struct Diffuser {
    line: DelayLine,
    base_delay: f32,
}

impl Diffuser {
    #[inline]
    fn process(&mut self, input: f32, delay: f32, feedback: f32) -> f32 {
        let delayed = self.line.read(delay);
        let output = delayed - input;
        self.line.push(input + delayed * feedback);
        output
    }
}

/// One FDN line with its damping lowpass
#[derive(Debug, Clone)]
struct FdnLine {
    line: DelayLine,
    base_delay: f32,
    damping_state: f32,
    feedback: f32,
}

/// Bit reduction plus dither-like noise
#[derive(Debug, Clone)]
struct Lofi {
    rng: u32,
}

impl Lofi {
    const SEED: u32 = 0x9E37_79B9;

    fn new() -> Self {
        Self { rng: Self::SEED }
    }

    /// Uniform noise in [-1, 1] (xorshift32)
    #[inline]
    fn noise(&mut self) -> f32 {
        let mut x = self.rng;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.rng = x;
        (x as f32 / u32::MAX as f32) * 2.0 - 1.0
    }

    #[inline]
    fn process(&mut self, left: f32, right: f32, amount: f32) -> (f32, f32) {
        if amount <= 0.0 {
            return (left, right);
        }
        let amount = amount.min(1.0);
        let bits = (16.0 - amount * 12.0).max(4.0) as i32;
        let step = 1.0 / (1_i32 << bits) as f32;
        let noise = amount * 0.002 * self.noise();
        let quantize = |s: f32| ((s + noise) / step + 0.5).floor() * step;
        (quantize(left), quantize(right))
    }
}

/// In-place 8-point fast Walsh-Hadamard transform
#[inline]
fn hadamard_8(v: &mut [f32; FDN_LINES]) {
    let mut h = 1;
    while h < FDN_LINES {
        for i in (0..FDN_LINES).step_by(h * 2) {
            for j in i..i + h {
                let a = v[j];
                let b = v[j + h];
                v[j] = a + b;
                v[j + h] = a - b;
            }
        }
        h *= 2;
    }
}

// ============================================================================
// Reverb
// ============================================================================

/// Stereo FDN reverberator
#[derive(Debug, Clone)]
pub struct Reverb {
    sample_rate: f32,
    /// sample_rate / 44100
    rate_scale: f32,

    low_cut: BiquadState,
    low_cut_coeffs: BiquadCoeffs,
    low_cut_amount: f32,

    pre_delay: DelayLine,
    diffusers: [Diffuser; 2],
    early: DelayLine,
    lines: [FdnLine; FDN_LINES],

    lfo_phase: f32,
    lofi: Lofi,
}

impl Reverb {
    /// Allocate every delay line at its maximum length for `sample_rate`
    pub fn new(sample_rate: u32) -> Self {
        let sample_rate = sample_rate as f32;
        let rate_scale = sample_rate / REFERENCE_SAMPLE_RATE;
        let max_room = room_scale(1.0) * (1.0 + MODULATION_DEPTH);

        let capacity = |base: f32| (base * rate_scale * max_room).ceil() as usize + 2;

        let diffusers = DIFFUSER_DELAYS.map(|base| Diffuser {
            line: DelayLine::new(capacity(base)),
            base_delay: base,
        });
        let lines = FDN_DELAYS.map(|base| FdnLine {
            line: DelayLine::new(capacity(base)),
            base_delay: base,
            damping_state: 0.0,
            feedback: 0.0,
        });

        let max_early_ms = EARLY_TAP_MS[EARLY_TAPS - 1] * early_scale(1.0);
        let early = DelayLine::new((max_early_ms * 0.001 * sample_rate).ceil() as usize + 2);
        let pre_delay = DelayLine::new((MAX_PRE_DELAY_SEC * sample_rate).ceil() as usize + 2);

        Self {
            sample_rate,
            rate_scale,
            low_cut: BiquadState::default(),
            low_cut_coeffs: BiquadCoeffs::IDENTITY,
            low_cut_amount: 0.0,
            pre_delay,
            diffusers,
            early,
            lines,
            lfo_phase: 0.0,
            lofi: Lofi::new(),
        }
    }

    /// Clear all delay lines and filter states
    pub fn reset(&mut self) {
        self.low_cut.reset();
        self.pre_delay.clear();
        for diffuser in &mut self.diffusers {
            diffuser.line.clear();
        }
        self.early.clear();
        for line in &mut self.lines {
            line.line.clear();
            line.damping_state = 0.0;
        }
        self.lfo_phase = 0.0;
        self.lofi = Lofi::new();
    }

    fn update_block(&mut self, room_size: f32, rt60: f32, low_absorption: f32) {
        let rt60 = rt60.max(MIN_RT60_SEC);
        let scale = room_scale(room_size) * self.rate_scale;
        for line in &mut self.lines {
            let delay = line.base_delay * scale;
            line.feedback = 10.0_f32.powf(-3.0 * delay / (rt60 * self.sample_rate));
        }

        if low_absorption != self.low_cut_amount {
            self.low_cut_amount = low_absorption;
            if low_absorption > 0.0 {
                self.low_cut_coeffs = BiquadCoeffs::calculate(
                    FilterType::HighPass,
                    self.sample_rate as f64,
                    low_absorption as f64 * MAX_LOW_CUT_HZ,
                    0.0,
                    std::f64::consts::FRAC_1_SQRT_2,
                );
            }
        }
    }

    /// Render the stereo tail of `input` into `out_left` / `out_right`
    pub fn process(
        &mut self,
        input: &[f32],
        out_left: &mut [f32],
        out_right: &mut [f32],
        controls: &ReverbControls,
    ) {
        let n = input.len();
        let norm = 1.0 / (FDN_LINES as f32).sqrt();
        let lfo_step = LFO_RATE_HZ / self.sample_rate;

        let mut start = 0;
        while start < n {
            let end = (start + CONTROL_BLOCK).min(n);
            let block_end = end - 1;
            self.update_block(
                controls.room_size.at(block_end, n),
                controls.rt60.at(block_end, n),
                controls.low_absorption.at(block_end, n).clamp(0.0, 1.0),
            );
            let damping = controls.damping.at(block_end, n).clamp(0.0, 0.95);
            let diffusion = controls.diffusion.at(block_end, n).clamp(0.0, 1.0);
            let modulation = controls.modulation.at(block_end, n).clamp(0.0, 1.0);
            let lofi = controls.lofi.at(block_end, n);
            let diffuser_feedback = 0.5 + 0.4 * diffusion;
            // Taps fade out past 4 + 8 * diffusion
            let active_taps = 4.0 + 8.0 * diffusion;

            for i in start..end {
                let room = controls.room_size.at(i, n).clamp(0.0, 1.0);
                let scale = room_scale(room) * self.rate_scale;

                let mut x = input[i];
                if self.low_cut_amount > 0.0 {
                    x = self.low_cut.process(x as f64, &self.low_cut_coeffs) as f32;
                } else {
                    self.low_cut.pass_sample(input[i]);
                }

                let pre_delay = (room * MAX_PRE_DELAY_SEC * self.sample_rate).max(1.0);
                let pre = self.pre_delay.read(pre_delay);
                self.pre_delay.push(x);

                let mut diffused = pre;
                for diffuser in &mut self.diffusers {
                    let delay = diffuser.base_delay * scale;
                    diffused = diffuser.process(diffused, delay, diffuser_feedback);
                }

                // Early reflections
                let er_scale = early_scale(room) * 0.001 * self.sample_rate;
                let mut er_left = 0.0;
                let mut er_right = 0.0;
                let mut gain = 0.6;
                for (t, &ms) in EARLY_TAP_MS.iter().enumerate() {
                    let weight = (active_taps - t as f32).clamp(0.0, 1.0);
                    if weight > 0.0 {
                        let tap = self.early.read(ms * er_scale) * gain * weight;
                        let pan = -0.8 + 1.6 * t as f32 / (EARLY_TAPS - 1) as f32;
                        er_left += tap * 0.5 * (1.0 - pan);
                        er_right += tap * 0.5 * (1.0 + pan);
                    }
                    gain *= 0.75;
                }
                self.early.push(diffused);

                // Feedback delay network
                let lfo = (2.0 * std::f32::consts::PI * self.lfo_phase).sin();
                self.lfo_phase += lfo_step;
                if self.lfo_phase >= 1.0 {
                    self.lfo_phase -= 1.0;
                }

                let mut outputs = [0.0_f32; FDN_LINES];
                for (c, line) in self.lines.iter_mut().enumerate() {
                    let delay = line.base_delay * scale;
                    // Alternate LFO polarity across lines to decorrelate them
                    let polarity = if c % 2 == 0 { 1.0 } else { -1.0 };
                    let modulated = delay * (1.0 + modulation * MODULATION_DEPTH * lfo * polarity);
                    let sample = line.line.read(modulated);
                    line.damping_state = sample + (line.damping_state - sample) * damping;
                    outputs[c] = line.damping_state;
                }

                let mut mixed = outputs;
                hadamard_8(&mut mixed);
                for (c, line) in self.lines.iter_mut().enumerate() {
                    line.line.push(diffused + mixed[c] * norm * line.feedback);
                }

                let tail_left = 0.25 * (outputs[0] + outputs[1] + outputs[2] + outputs[3]);
                let tail_right = 0.25 * (outputs[4] + outputs[5] + outputs[6] + outputs[7]);

                let (l, r) = self.lofi.process(er_left + tail_left, er_right + tail_right, lofi);
                out_left[i] = l;
                out_right[i] = r;
            }
            start = end;
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
