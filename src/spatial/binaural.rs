//! Parametric binaural cues
//!
//! Spherical-head approximations used when no HRTF measurement is close
//! enough to the requested direction. Positive azimuth is to the right.

use crate::dsp::filter::one_pole_alpha;

/// Speed of sound in m/s
pub const SPEED_OF_SOUND: f32 = 343.0;

/// Ear-to-ear distance in metres
pub const HEAD_WIDTH_M: f32 = 0.215;

/// Largest interaural time difference in microseconds
pub const MAX_ITD_US: f32 = 625.0;

/// Largest interaural level difference in dB
pub const MAX_ILD_DB: f32 = 20.0;

/// Head-shadow cutoff at full shadow and with no shadow
const SHADOW_MIN_CUTOFF_HZ: f32 = 2000.0;
const SHADOW_MAX_CUTOFF_HZ: f32 = 10000.0;

/// Frequency used to evaluate the ILD for broadband sources
pub const BROADBAND_ILD_FREQ_HZ: f32 = 1000.0;

/// Interaural cues for one direction
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BinauralCues {
    /// Positive when the left ear hears the source later
    pub itd_us: f32,
    /// Positive when the right ear is louder
    pub ild_db: f32,
    /// 0 = facing, 1 = fully to one side
    pub shadow: f32,
}

impl BinauralCues {
    /// Cues for a source at `azimuth_deg`, `elevation_deg`
    ///
    /// `frequency_hz` weights the ILD: it grows from zero at 500 Hz to full
    /// strength at 2 kHz.
    pub fn for_direction(azimuth_deg: f32, elevation_deg: f32, frequency_hz: f32) -> Self {
        let lateral = lateral_sine(azimuth_deg, elevation_deg);
        let itd_us = (HEAD_WIDTH_M * lateral / SPEED_OF_SOUND * 1e6).clamp(-MAX_ITD_US, MAX_ITD_US);
        let weight = ((frequency_hz - 500.0) / 1500.0).clamp(0.0, 1.0);
        let ild_db = (20.0 * lateral * weight).clamp(-MAX_ILD_DB, MAX_ILD_DB);
        Self {
            itd_us,
            ild_db,
            shadow: lateral.abs(),
        }
    }

    /// Delays in samples applied to the (left, right) ear
    pub fn ear_delays(&self, sample_rate: f32) -> (f32, f32) {
        let samples = self.itd_us * 1e-6 * sample_rate;
        if samples >= 0.0 {
            (samples, 0.0)
        } else {
            (0.0, -samples)
        }
    }

    /// Linear (left, right) gains splitting the ILD between both ears
    pub fn ear_gains(&self) -> (f32, f32) {
        (
            crate::dsp::db_to_linear(-0.5 * self.ild_db),
            crate::dsp::db_to_linear(0.5 * self.ild_db),
        )
    }

    /// One-pole coefficient of the shadowed ear's lowpass
    pub fn shadow_alpha(&self, sample_rate: f32) -> f32 {
        let cutoff = SHADOW_MIN_CUTOFF_HZ + (1.0 - self.shadow) * (SHADOW_MAX_CUTOFF_HZ - SHADOW_MIN_CUTOFF_HZ);
        one_pole_alpha(cutoff, sample_rate)
    }

    /// True when the left ear is the far (shadowed) one
    pub fn left_is_far(&self) -> bool {
        self.itd_us > 0.0
    }
}

/// Sine of the angle between the source and the median plane
pub fn lateral_sine(azimuth_deg: f32, elevation_deg: f32) -> f32 {
    azimuth_deg.to_radians().sin() * elevation_deg.to_radians().cos()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_front_source_has_no_cues() {
        let cues = BinauralCues::for_direction(0.0, 0.0, 4000.0);
        assert_relative_eq!(cues.itd_us, 0.0);
        assert_relative_eq!(cues.ild_db, 0.0);
        let (l, r) = cues.ear_gains();
        assert_relative_eq!(l, 1.0);
        assert_relative_eq!(r, 1.0);
    }

    #[test]
    fn test_right_source_delays_left_ear() {
        let cues = BinauralCues::for_direction(90.0, 0.0, 4000.0);
        assert_relative_eq!(cues.itd_us, 625.0);
        assert_relative_eq!(cues.ild_db, 20.0);
        assert!(cues.left_is_far());

        let (dl, dr) = cues.ear_delays(48000.0);
        assert_relative_eq!(dl, 30.0, epsilon = 1e-3);
        assert_eq!(dr, 0.0);
        let (gl, gr) = cues.ear_gains();
        assert!(gr > 1.0 && gl < 1.0);
    }

    #[test]
    fn test_low_frequencies_carry_no_ild() {
        let cues = BinauralCues::for_direction(-90.0, 0.0, 300.0);
        assert_eq!(cues.ild_db, 0.0);
        assert!(cues.itd_us < 0.0);
        assert!(!cues.left_is_far());
    }

    #[test]
    fn test_elevation_reduces_lateral_cues() {
        let level = BinauralCues::for_direction(60.0, 0.0, 4000.0);
        let raised = BinauralCues::for_direction(60.0, 60.0, 4000.0);
        assert!(raised.itd_us.abs() < level.itd_us.abs());
        assert!(raised.shadow < level.shadow);
    }

    #[test]
    fn test_shadow_lowers_cutoff() {
        let front = BinauralCues::for_direction(0.0, 0.0, 2000.0).shadow_alpha(48000.0);
        let side = BinauralCues::for_direction(90.0, 0.0, 2000.0).shadow_alpha(48000.0);
        assert!(side < front);
    }
}
