//! Audio-thread processing pipeline
//!
//! Per buffer: take a parameter snapshot, advance smoothing, then
//! distance gain -> reverb tail -> direct path -> width -> tilt -> dry/wet
//! mix. Everything is allocated in [`Pipeline::new`]; `process` never
//! allocates, locks or blocks.

use std::sync::Arc;

use super::buffer::{AudioBuffer, AudioBufferMut, StereoScratch};
use super::config::{DistanceModel, EngineConfig};
use super::params::{Param, ParamSnapshot, ParameterStore, Ramp, Smoother, SourceRoute};
use crate::dsp::reverb::MIN_RT60_SEC;
use crate::dsp::{Reverb, ReverbControls, TiltFilter};
use crate::error::BufferError;
use crate::spatial::{apply_width, DirectControls, HrtfStore, Spatializer};

/// RT60 range derived from room size when no explicit decay time is set
const ROOM_RT60_MIN_SEC: f32 = 0.3;
const ROOM_RT60_SPAN_SEC: f32 = 9.7;

/// Decay time for the given profile values
///
/// An explicit `decay` wins over the room-size estimate. Mid absorption
/// shortens (above 0.5) or lengthens (below 0.5) the result.
pub fn rt60_for(decay: f32, room_size: f32, mid_absorption: f32, max_reverb_time: f32) -> f32 {
    let base = if decay > 0.0 {
        decay
    } else {
        ROOM_RT60_MIN_SEC + ROOM_RT60_SPAN_SEC * room_size
    };
    (base * (1.5 - mid_absorption)).clamp(MIN_RT60_SEC, max_reverb_time.max(MIN_RT60_SEC))
}

/// In-loop damping for the given brightness and high absorption
pub fn damping_for(brightness: f32, high_absorption: f32) -> f32 {
    ((0.9 - 0.6 * brightness) * (0.5 + high_absorption)).clamp(0.1, 0.9)
}

/// Audio-side state of one engine
#[derive(Debug)]
pub struct Pipeline {
    max_frames: usize,
    max_reverb_time: f32,
    distance_model: DistanceModel,
    store: Arc<ParameterStore>,
    snapshot: ParamSnapshot,
    smoother: Smoother,
    /// Input, then the final mix
    dry: StereoScratch,
    /// Direct path, then the whole wet signal
    wet: StereoScratch,
    tail: StereoScratch,
    mono: Vec<f32>,
    reverb: Reverb,
    spatializer: Spatializer,
    tilt: TiltFilter,
}

impl Pipeline {
    pub fn new(config: &EngineConfig, store: Arc<ParameterStore>, hrtf: Arc<HrtfStore>) -> Self {
        let frames = config.max_buffer_size;
        let snapshot = store.initial_snapshot();
        let smoother = Smoother::new(&snapshot, config.smoothing_time_ms, config.sample_rate);
        Self {
            max_frames: frames,
            max_reverb_time: config.max_reverb_time_sec,
            distance_model: config.distance_model,
            store,
            snapshot,
            smoother,
            dry: StereoScratch::new(frames),
            wet: StereoScratch::new(frames),
            tail: StereoScratch::new(frames),
            mono: vec![0.0; frames],
            reverb: Reverb::new(config.sample_rate),
            spatializer: Spatializer::new(
                config.sample_rate,
                frames,
                config.distance_model.reference_distance,
                hrtf,
            ),
            tilt: TiltFilter::new(config.sample_rate as f64),
        }
    }

    fn check_frames(&self, frames: usize) -> Result<(), BufferError> {
        if frames == 0 {
            return Err(BufferError::Empty);
        }
        if frames > self.max_frames {
            return Err(BufferError::TooManyFrames {
                frames,
                max: self.max_frames,
            });
        }
        Ok(())
    }

    /// Process `input` into `output`; on error neither buffer is touched
    pub fn process(
        &mut self,
        input: &AudioBuffer<'_>,
        output: &mut AudioBufferMut<'_>,
    ) -> Result<(), BufferError> {
        let frames = input.frames();
        if output.frames() != frames {
            return Err(BufferError::FrameCountMismatch {
                input: frames,
                output: output.frames(),
            });
        }
        self.check_frames(frames)?;
        self.dry.load(input);
        self.render(frames);
        self.dry.store(output);
        Ok(())
    }

    /// Process `buffer` in place
    pub fn process_in_place(&mut self, buffer: &mut AudioBufferMut<'_>) -> Result<(), BufferError> {
        let frames = buffer.frames();
        self.check_frames(frames)?;
        self.dry.load(&buffer.as_buffer());
        self.render(frames);
        self.dry.store(buffer);
        Ok(())
    }

    /// Clear every delay line and filter and jump to the current targets
    pub fn reset(&mut self) {
        self.reverb.reset();
        self.spatializer.reset();
        self.tilt.reset();
        self.store.read_snapshot(&mut self.snapshot);
        self.smoother.snap(&self.snapshot);
    }

    /// Smoothed value of `param` after the last buffer
    pub fn current(&self, param: Param) -> f32 {
        self.smoother.current(param)
    }

    fn render(&mut self, frames: usize) {
        if self.store.take_reset() {
            self.reset();
        } else {
            self.store.read_snapshot(&mut self.snapshot);
            self.smoother.advance(&self.snapshot, frames);
        }
        let s = &self.smoother;

        // Distance attenuation
        let model = self.distance_model;
        let distance = s.ramp(Param::Distance);
        let gain = distance.map(|d| model.gain(d));
        if !(gain.is_constant() && gain.to == 1.0) {
            let (left, right) = self.dry.channels_mut(frames);
            for i in 0..frames {
                let g = gain.at(i, frames);
                left[i] *= g;
                right[i] *= g;
            }
        }

        // Reverb tail
        let (dry_left, dry_right) = self.dry.channels(frames);
        for (m, (l, r)) in self.mono[..frames].iter_mut().zip(dry_left.iter().zip(dry_right)) {
            *m = 0.5 * (l + r);
        }
        let controls = self.reverb_controls();
        let (tail_left, tail_right) = self.tail.channels_mut(frames);
        self.reverb
            .process(&self.mono[..frames], tail_left, tail_right, &controls);
        let intensity = s.ramp(Param::Intensity);
        if !(intensity.is_constant() && intensity.to == 1.0) {
            for i in 0..frames {
                let k = intensity.at(i, frames);
                tail_left[i] *= k;
                tail_right[i] *= k;
            }
        }

        // Direct path
        let route = self.snapshot.route;
        let direct = DirectControls {
            route,
            azimuth: s.ramp(Param::Azimuth),
            elevation: s.ramp(Param::Elevation),
            distance,
        };
        let (wet_left, wet_right) = self.wet.channels_mut(frames);
        self.spatializer
            .process(dry_left, dry_right, wet_left, wet_right, &direct);

        // Width, then wet = direct + tail
        let width = s.ramp(Param::Width);
        if route != SourceRoute::Unpositioned {
            apply_width(tail_left, tail_right, width);
        }
        for i in 0..frames {
            wet_left[i] += tail_left[i];
            wet_right[i] += tail_right[i];
        }
        if route == SourceRoute::Unpositioned {
            apply_width(wet_left, wet_right, width);
        }

        self.tilt
            .process(wet_left, wet_right, s.ramp(Param::Brightness));

        // Dry/wet mix into the dry scratch
        let mix = s.ramp(Param::DryWet);
        if mix.is_constant() && mix.to == 0.0 {
            return;
        }
        let (out_left, out_right) = self.dry.channels_mut(frames);
        for i in 0..frames {
            let w = mix.at(i, frames);
            out_left[i] = out_left[i] * (1.0 - w) + wet_left[i] * w;
            out_right[i] = out_right[i] * (1.0 - w) + wet_right[i] * w;
        }
    }

    fn reverb_controls(&self) -> ReverbControls {
        let s = &self.smoother;
        let room = s.ramp(Param::RoomSize);
        let decay = s.ramp(Param::DecayTime);
        let mid = s.ramp(Param::AbsorptionMid);
        let brightness = s.ramp(Param::Brightness);
        let high = s.ramp(Param::AbsorptionHigh);
        let max = self.max_reverb_time;
        ReverbControls {
            room_size: room,
            rt60: Ramp {
                from: rt60_for(decay.from, room.from, mid.from, max),
                to: rt60_for(decay.to, room.to, mid.to, max),
            },
            diffusion: s.ramp(Param::Diffusion),
            damping: Ramp {
                from: damping_for(brightness.from, high.from),
                to: damping_for(brightness.to, high.to),
            },
            modulation: s.ramp(Param::Modulation),
            lofi: s.ramp(Param::Lofi),
            low_absorption: s.ramp(Param::AbsorptionLow),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_rt60_mapping() {
        assert_relative_eq!(rt60_for(0.0, 0.5, 0.5, 10.0), 5.15);
        assert_relative_eq!(rt60_for(2.0, 0.9, 0.5, 10.0), 2.0);
        assert_relative_eq!(rt60_for(2.0, 0.9, 1.0, 10.0), 1.0);
        assert_relative_eq!(rt60_for(8.0, 0.5, 0.0, 10.0), 10.0);
        assert_relative_eq!(rt60_for(0.01, 0.0, 1.0, 10.0), MIN_RT60_SEC);
    }

    #[test]
    fn test_damping_mapping() {
        assert_relative_eq!(damping_for(0.5, 0.5), 0.6);
        assert!(damping_for(0.0, 0.5) > damping_for(1.0, 0.5));
        assert!(damping_for(0.5, 1.0) > damping_for(0.5, 0.0));
        assert_relative_eq!(damping_for(1.0, 0.0), 0.15);
        assert_relative_eq!(damping_for(0.0, 1.0), 0.9);
    }
}
