//! CLI Command Implementations
//!
//! Implements the actual logic for each CLI command.

use std::path::Path;

use anyhow::{bail, Context, Result};
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use log::{info, warn};

use super::{ConfigArgs, RenderParams};
use crate::dsp::linear_to_db;
use crate::{AudioBufferMut, Engine, EngineConfig, EngineController};

/// Build the engine configuration from a file and flag overrides
pub fn load_config(args: &ConfigArgs) -> Result<EngineConfig> {
    let mut config = match &args.config {
        Some(path) => EngineConfig::from_json_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => EngineConfig::default(),
    };
    if let Some(path) = &args.data_path {
        config.data_path = Some(path.clone());
    }
    if let Some(path) = &args.hrtf_path {
        config.hrtf_path = Some(path.clone());
    }
    Ok(config)
}

/// Render `input` through the engine into `output`
pub fn render(
    input: &Path,
    output: &Path,
    config: &ConfigArgs,
    params: &RenderParams,
    tail_sec: f32,
    bits: u16,
) -> Result<()> {
    let (mut samples, spec) = read_wav(input)?;
    let channels = spec.channels as usize;
    if channels != 1 && channels != 2 {
        bail!("{}: only mono and stereo files are supported, got {} channels", input.display(), channels);
    }

    let mut config = load_config(config)?;
    config.sample_rate = spec.sample_rate;
    let block = config.max_buffer_size;
    let mut engine = build_engine(config, params)?;

    let input_peak = peak(&samples);
    if tail_sec > 0.0 {
        let tail_frames = (tail_sec * spec.sample_rate as f32).round() as usize;
        samples.resize(samples.len() + tail_frames * channels, 0.0);
    }

    info!(
        "Rendering {} frames at {} Hz in blocks of {}",
        samples.len() / channels,
        spec.sample_rate,
        block
    );
    for chunk in samples.chunks_mut(block * channels) {
        let mut buffer = AudioBufferMut::interleaved(chunk, channels)?;
        engine.process_in_place(&mut buffer)?;
    }

    write_wav(output, &samples, spec.channels, spec.sample_rate, bits)?;

    let output_peak = peak(&samples);
    println!("Rendered: {}", output.display());
    println!(
        "  Peak: {:.1} dBFS -> {:.1} dBFS",
        linear_to_db(input_peak),
        linear_to_db(output_peak)
    );
    if output_peak > 1.0 {
        warn!("Output exceeds full scale and was clipped in integer formats");
    }
    Ok(())
}

/// List the scenario catalog
pub fn list_scenarios(config: &ConfigArgs, json: bool) -> Result<()> {
    let engine = Engine::new(load_config(config)?).context("creating engine")?;
    let controller = engine.controller();
    let names = controller.scenario_names();

    println!("Scenarios ({}):", names.len());
    println!("{:-<60}", "");
    for name in &names {
        let preset = controller.scenario_defaults(name)?;
        if json {
            println!("{}", serde_json::to_string_pretty(&preset)?);
        } else {
            let d = &preset.defaults;
            println!(
                "{:<20} distance {:>6.1}  room {:.2}  bright {:.2}  width {:.2}  mix {:.2}",
                name, d.distance, d.room_size, d.brightness, d.width, d.dry_wet
            );
        }
    }
    Ok(())
}

/// Print the effective configuration
pub fn show_config(config: &ConfigArgs) -> Result<()> {
    let config = load_config(config)?;
    config.validate()?;
    println!("{}", config.to_json_string()?);
    Ok(())
}

/// Engine with `params` applied and the smoothing settled on them
fn build_engine(config: EngineConfig, params: &RenderParams) -> Result<Engine> {
    let engine = Engine::new(config).context("creating engine")?;
    apply_params(engine.controller(), params)?;
    // Start from the requested settings instead of ramping up from the defaults
    engine.reset();
    Ok(engine)
}

fn apply_params(controller: &EngineController, params: &RenderParams) -> Result<()> {
    if let Some(name) = &params.scenario {
        controller
            .apply_scenario(name, params.intensity)
            .with_context(|| format!("applying scenario '{}'", name))?;
    }
    if let Some(text) = &params.expression {
        let parsed = controller.apply_expression(text)?;
        for key in &parsed.skipped {
            println!("  Ignored expression key: {}", key);
        }
    }
    let setters: [(Option<f32>, fn(&EngineController, f32) -> Option<f32>); 6] = [
        (params.distance, EngineController::set_distance),
        (params.room_size, EngineController::set_room_size),
        (params.brightness, EngineController::set_brightness),
        (params.width, EngineController::set_width),
        (params.dry_wet, EngineController::set_dry_wet),
        (params.effect_intensity, EngineController::set_intensity),
    ];
    for (value, set) in setters {
        if let Some(value) = value {
            set(controller, value);
        }
    }
    if let Some(azimuth) = params.azimuth {
        controller.set_source_position(azimuth, params.elevation.unwrap_or(0.0))?;
    }
    Ok(())
}

fn read_wav(path: &Path) -> Result<(Vec<f32>, WavSpec)> {
    let mut reader =
        WavReader::open(path).with_context(|| format!("opening {}", path.display()))?;
    let spec = reader.spec();
    let samples = match (spec.sample_format, spec.bits_per_sample) {
        (SampleFormat::Float, 32) => reader.samples::<f32>().collect::<Result<Vec<_>, _>>()?,
        (SampleFormat::Int, 16) => reader
            .samples::<i16>()
            .map(|s| s.map(|v| v as f32 / 32768.0))
            .collect::<Result<Vec<_>, _>>()?,
        (SampleFormat::Int, 24) => reader
            .samples::<i32>()
            .map(|s| s.map(|v| v as f32 / 8388608.0))
            .collect::<Result<Vec<_>, _>>()?,
        (SampleFormat::Int, 32) => reader
            .samples::<i32>()
            .map(|s| s.map(|v| v as f32 / 2147483648.0))
            .collect::<Result<Vec<_>, _>>()?,
        (format, bits) => bail!("unsupported WAV format: {:?} {}-bit", format, bits),
    };
    Ok((samples, spec))
}

fn write_wav(path: &Path, samples: &[f32], channels: u16, sample_rate: u32, bits: u16) -> Result<()> {
    let spec = WavSpec {
        channels,
        sample_rate,
        bits_per_sample: bits,
        sample_format: if bits == 32 {
            SampleFormat::Float
        } else {
            SampleFormat::Int
        },
    };
    let mut writer =
        WavWriter::create(path, spec).with_context(|| format!("creating {}", path.display()))?;
    match bits {
        16 => {
            for &sample in samples {
                writer.write_sample((sample * 32767.0).clamp(-32768.0, 32767.0) as i16)?;
            }
        }
        24 => {
            for &sample in samples {
                writer.write_sample((sample * 8388607.0).clamp(-8388608.0, 8388607.0) as i32)?;
            }
        }
        32 => {
            for &sample in samples {
                writer.write_sample(sample)?;
            }
        }
        _ => bail!("unsupported output bit depth {} (16, 24 or 32)", bits),
    }
    writer.finalize()?;
    Ok(())
}

fn peak(samples: &[f32]) -> f32 {
    samples.iter().fold(0.0_f32, |acc, s| acc.max(s.abs()))
}
