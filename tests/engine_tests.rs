//! Integration Tests
//!
//! End-to-end tests for the spatial audio engine through its Rust API.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use approx::assert_relative_eq;
use pretty_assertions::assert_eq;
use test_case::test_case;

use acoustic_engine::engine::SourceRoute;
use acoustic_engine::error::BufferError;
use acoustic_engine::{
    AudioBuffer, AudioBufferMut, Engine, EngineConfig, EngineError, Layout, Param, SpatialDefaults,
};

const SAMPLE_RATE: u32 = 48000;
const BLOCK: usize = 256;

/// Interleaved stereo sine, slightly different per channel
fn stereo_sine(frequency: f32, frames: usize) -> Vec<f32> {
    (0..frames)
        .flat_map(|i| {
            let t = i as f32 / SAMPLE_RATE as f32;
            let s = (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.5;
            [s, s * 0.8]
        })
        .collect()
}

fn engine_with(smoothing_time_ms: f32) -> Engine {
    Engine::new(EngineConfig {
        sample_rate: SAMPLE_RATE,
        max_buffer_size: 1024,
        smoothing_time_ms,
        ..EngineConfig::default()
    })
    .unwrap()
}

/// Process interleaved stereo in place, block by block
fn render(engine: &mut Engine, samples: &mut [f32]) {
    for chunk in samples.chunks_mut(BLOCK * 2) {
        let mut buffer = AudioBufferMut::interleaved(chunk, 2).unwrap();
        engine.process_in_place(&mut buffer).unwrap();
    }
}

fn max_step(samples: &[f32], channels: usize) -> f32 {
    let mut worst = 0.0_f32;
    for c in 0..channels {
        let mut prev = samples[c];
        for frame in samples.chunks(channels).skip(1) {
            worst = worst.max((frame[c] - prev).abs());
            prev = frame[c];
        }
    }
    worst
}

// === Pass-through ===

#[test]
fn test_dry_only_is_bit_exact() {
    let mut engine = engine_with(50.0);
    engine.controller().set_dry_wet(0.0);
    engine.controller().reset();

    let input = stereo_sine(440.0, 4096);
    let mut output = input.clone();
    render(&mut engine, &mut output);

    assert_eq!(output, input);
}

#[test_case(Layout::Interleaved ; "interleaved")]
#[test_case(Layout::Planar ; "planar")]
fn test_dry_only_preserves_layout(layout: Layout) {
    let mut engine = engine_with(0.0);
    engine.controller().set_dry_wet(0.0);
    engine.controller().reset();

    let frames = 128;
    let input: Vec<f32> = (0..frames * 2).map(|i| (i as f32 * 0.01).sin()).collect();
    let mut output = vec![0.0; frames * 2];
    let in_buf = AudioBuffer::new(&input, frames, 2, layout).unwrap();
    let mut out_buf = AudioBufferMut::new(&mut output, frames, 2, layout).unwrap();
    engine.process(&in_buf, &mut out_buf).unwrap();

    assert_eq!(output, input);
}

#[test]
fn test_mono_round_trip() {
    let mut engine = engine_with(0.0);
    engine.controller().set_dry_wet(0.0);
    engine.controller().reset();

    let input: Vec<f32> = (0..512).map(|i| (i as f32 * 0.02).sin() * 0.3).collect();
    let mut output = vec![0.0; 512];
    engine
        .process(
            &AudioBuffer::interleaved(&input, 1).unwrap(),
            &mut AudioBufferMut::interleaved(&mut output, 1).unwrap(),
        )
        .unwrap();
    assert_eq!(output, input);
}

#[test]
fn test_silence_in_silence_out() {
    let mut engine = engine_with(50.0);
    engine.controller().apply_scenario("cathedral", 1.0).unwrap();
    engine.controller().set_source_position(45.0, 10.0).unwrap();
    engine.controller().reset();

    let mut samples = vec![0.0_f32; 8192];
    render(&mut engine, &mut samples);
    assert!(samples.iter().all(|&s| s == 0.0));
}

// === Smoothing ===

#[test]
fn test_parameter_jump_is_glitch_free() {
    let mut engine = engine_with(50.0);
    engine.controller().set_dry_wet(0.0);
    engine.controller().reset();

    let mut samples = stereo_sine(220.0, 8192);
    let natural = max_step(&samples, 2);
    let (first, second) = samples.split_at_mut(4096 * 2);
    render(&mut engine, first);
    engine.controller().set_distance(200.0);
    render(&mut engine, second);

    // An unsmoothed jump from unity to 0.05 gain would step by ~0.45
    assert!(max_step(&samples, 2) < natural + 0.01);
}

#[test]
fn test_room_size_jump_with_wet_path_is_glitch_free() {
    let mut engine = engine_with(200.0);
    engine.controller().set_main_params(&SpatialDefaults {
        room_size: 0.1,
        dry_wet: 1.0,
        ..SpatialDefaults::default()
    });
    engine.controller().reset();

    let frames = 16384;
    let mut samples = stereo_sine(220.0, frames * 2);
    let (first, second) = samples.split_at_mut(frames * 2);
    render(&mut engine, first);
    engine.controller().set_room_size(0.9);
    render(&mut engine, second);

    // Settled wet output just before the change
    let settled = max_step(&samples[(frames - 4096) * 2..frames * 2], 2);
    let boundary = max_step(&samples[(frames - 16) * 2..(frames + 16) * 2], 2);
    let after = max_step(&samples[frames * 2..], 2);

    assert!(settled > 0.0);
    assert!(boundary < settled * 2.0 + 0.005, "boundary {} settled {}", boundary, settled);
    assert!(after < settled * 4.0 + 0.02, "after {} settled {}", after, settled);
    assert!(samples.iter().all(|s| s.is_finite()));
}

#[test]
fn test_current_values_converge_to_targets() {
    let mut engine = engine_with(20.0);
    engine.controller().apply_scenario("cave", 1.0).unwrap();

    let mut samples = vec![0.0_f32; SAMPLE_RATE as usize * 2];
    render(&mut engine, &mut samples);

    for param in [Param::RoomSize, Param::Brightness, Param::DryWet, Param::Distance] {
        assert_relative_eq!(
            engine.current_value(param),
            engine.controller().target(param),
            max_relative = 1e-4
        );
    }
}

#[test]
fn test_zero_smoothing_applies_at_next_buffer() {
    let mut engine = engine_with(0.0);
    engine.controller().set_room_size(0.9);
    let mut samples = vec![0.0_f32; BLOCK * 2];
    render(&mut engine, &mut samples);
    assert_relative_eq!(engine.current_value(Param::RoomSize), 0.9);
}

// === Wet path ===

#[test]
fn test_reverb_tail_rings_after_input_stops() {
    let mut engine = engine_with(0.0);
    let c = engine.controller();
    c.set_main_params(&SpatialDefaults {
        room_size: 0.8,
        dry_wet: 1.0,
        ..SpatialDefaults::default()
    });

    let mut samples = vec![0.0_f32; 48000 * 2];
    samples[0] = 1.0;
    samples[1] = 1.0;
    render(&mut engine, &mut samples);

    let late_energy: f32 = samples[24000 * 2..].iter().map(|s| s * s).sum();
    assert!(late_energy > 0.0);
    assert!(samples.iter().all(|s| s.is_finite()));
}

#[test]
fn test_in_place_matches_separate_output() {
    let configure = |engine: &Engine| {
        let c = engine.controller();
        c.apply_scenario("cathedral", 1.0).unwrap();
        c.set_dry_wet(0.6);
        c.set_source_position(30.0, 0.0).unwrap();
        c.reset();
    };
    let mut in_place = engine_with(50.0);
    let mut separate = engine_with(50.0);
    configure(&in_place);
    configure(&separate);

    let input = stereo_sine(330.0, 4096);
    let mut rendered = input.clone();
    render(&mut in_place, &mut rendered);

    let mut output = vec![0.0_f32; input.len()];
    for (src, dst) in input.chunks(BLOCK * 2).zip(output.chunks_mut(BLOCK * 2)) {
        separate
            .process(
                &AudioBuffer::interleaved(src, 2).unwrap(),
                &mut AudioBufferMut::interleaved(dst, 2).unwrap(),
            )
            .unwrap();
    }

    assert!(output.iter().zip(&input).any(|(o, i)| o != i));
    assert_eq!(rendered, output);
}

#[test]
fn test_positioned_source_favors_near_ear() {
    let mut engine = engine_with(0.0);
    let c = engine.controller();
    c.set_main_params(&SpatialDefaults {
        room_size: 0.0,
        dry_wet: 1.0,
        intensity: 0.0,
        ..SpatialDefaults::default()
    });
    c.set_source_position(90.0, 0.0).unwrap();

    let mono: Vec<f32> = (0..4096)
        .map(|i| (2.0 * std::f32::consts::PI * 500.0 * i as f32 / SAMPLE_RATE as f32).sin())
        .collect();
    let mut samples: Vec<f32> = mono.iter().flat_map(|&s| [s, s]).collect();
    render(&mut engine, &mut samples);

    let energy = |channel: usize| -> f32 { samples.iter().skip(channel).step_by(2).map(|s| s * s).sum() };
    assert!(energy(1) > energy(0) * 2.0, "right {} left {}", energy(1), energy(0));
}

#[test]
fn test_scenarios_render_finite_output() {
    let mut engine = engine_with(10.0);
    let names = engine.controller().scenario_names();
    assert_eq!(names.len(), 17);

    for name in names {
        engine.controller().apply_scenario(&name, 1.0).unwrap();
        let mut samples = stereo_sine(330.0, 2048);
        render(&mut engine, &mut samples);
        assert!(samples.iter().all(|s| s.is_finite() && s.abs() < 10.0), "{}", name);
    }
}

// === Buffer validation ===

#[test]
fn test_invalid_buffers_leave_output_untouched() {
    let mut engine = engine_with(0.0);

    let input = vec![0.5_f32; 64 * 2];
    let mut output = vec![7.0_f32; 32 * 2];
    let err = engine
        .process(
            &AudioBuffer::interleaved(&input, 2).unwrap(),
            &mut AudioBufferMut::interleaved(&mut output, 2).unwrap(),
        )
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::InvalidBuffer(BufferError::FrameCountMismatch { input: 64, output: 32 })
    ));
    assert!(output.iter().all(|&s| s == 7.0));

    let mut huge = vec![7.0_f32; 2048 * 2];
    let err = engine
        .process_in_place(&mut AudioBufferMut::interleaved(&mut huge, 2).unwrap())
        .unwrap_err();
    assert_eq!(err.error_code(), acoustic_engine::error::status::INVALID_BUFFER);
    assert!(huge.iter().all(|&s| s == 7.0));
}

#[test]
fn test_buffer_shape_errors() {
    let data = [0.0_f32; 6];
    assert_eq!(
        AudioBuffer::new(&data, 3, 3, Layout::Interleaved).unwrap_err(),
        BufferError::UnsupportedChannels { channels: 3 }
    );
    assert_eq!(
        AudioBuffer::new(&data, 4, 2, Layout::Planar).unwrap_err(),
        BufferError::LengthMismatch { expected: 8, actual: 6 }
    );
    assert_eq!(AudioBuffer::new(&[], 0, 2, Layout::Planar).unwrap_err(), BufferError::Empty);
}

// === Control ===

#[test]
fn test_source_position_requires_no_audio_thread() {
    let engine = engine_with(0.0);
    let c = engine.controller();
    c.set_source_position(400.0, 0.0).unwrap();
    assert_relative_eq!(c.target(Param::Azimuth), 40.0);
    assert!(matches!(c.source_route(), SourceRoute::Hrtf(_)));
}

#[test]
fn test_concurrent_control_and_processing() {
    let mut engine = engine_with(20.0);
    let controller = engine.controller().clone();
    let stop = Arc::new(AtomicBool::new(false));

    let writer = {
        let stop = Arc::clone(&stop);
        thread::spawn(move || {
            let mut step = 0_u32;
            while !stop.load(Ordering::Relaxed) {
                let v = (step % 100) as f32 / 100.0;
                controller.set_room_size(v);
                controller.set_width(1.0 - v);
                controller.set_distance(v * 50.0);
                if step % 10 == 0 {
                    let _ = controller.apply_scenario("forest", v);
                }
                if step % 17 == 0 {
                    let _ = controller.set_source_position(v * 360.0, 0.0);
                }
                step += 1;
            }
        })
    };

    let mut samples = stereo_sine(440.0, 48000);
    render(&mut engine, &mut samples);
    stop.store(true, Ordering::Relaxed);
    writer.join().unwrap();

    assert!(samples.iter().all(|s| s.is_finite()));
}

#[test]
fn test_reset_clears_reverb_state() {
    let mut engine = engine_with(0.0);
    engine.controller().set_main_params(&SpatialDefaults {
        room_size: 0.9,
        dry_wet: 1.0,
        ..SpatialDefaults::default()
    });
    let mut samples = stereo_sine(440.0, 4096);
    render(&mut engine, &mut samples);

    engine.controller().reset();
    let mut silence = vec![0.0_f32; 1024];
    render(&mut engine, &mut silence);
    assert!(silence.iter().all(|&s| s == 0.0));
}
