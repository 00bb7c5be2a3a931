// Whip demo CLI: sonify a data series and write the result to MIDI.
//
// Builds an engine, loads a CSV series (or synthesizes one), puts a playhead
// on it, binds the playhead to drummer density and soloist activity, runs
// the requested number of ticks and writes everything the engine played to
// a Standard MIDI File.
//
// Usage:
//   cargo run -p whip_engine -- [output.mid] [--ticks N] [--seed N]
//     [--csv PATH] [--window N] [--config PATH] [--style S] [--pool KEY]
//
// Progression styles: pop, jazz, blues, classical, modal
// Pool keys: 0, 1#..7#, 1b..7b
//
// Logging goes through `tracing`; set RUST_LOG (default `info`).

use std::path::Path;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use whip_engine::binding::{Binding, BindingSource, BindingTarget, MappingFunction};
use whip_engine::config::EngineConfig;
use whip_engine::engine::Engine;
use whip_engine::output::MidiFileOutput;
use whip_engine::persistence::MemoryStore;
use whip_engine::playhead::Playhead;
use whip_engine::pool::note_name;
use whip_engine::timeline::SeriesTimeline;

const VISUALIZATION_ID: &str = "series";
const PLAYHEAD_ID: &str = "main";

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args: Vec<String> = std::env::args().collect();
    let output_path = args
        .get(1)
        .filter(|s| !s.starts_with("--"))
        .map(|s| s.as_str())
        .unwrap_or("output.mid");

    let mut config = match parse_flag::<String>(&args, "--config") {
        Some(path) => EngineConfig::load_or_default(Path::new(&path)),
        None => EngineConfig::default(),
    };
    if let Some(seed) = parse_flag(&args, "--seed") {
        config.seed = seed;
    }
    if let Some(style) = parse_flag(&args, "--style") {
        config.harmony.style = style;
    }
    if let Some(pool) = parse_flag(&args, "--pool") {
        config.harmony.pool_key = pool;
    }
    let ticks: u64 = parse_flag(&args, "--ticks").unwrap_or(config.clock.ticks_per_bar() * 32);
    let window: usize = parse_flag(&args, "--window").unwrap_or(1);

    let series = match parse_flag::<String>(&args, "--csv") {
        Some(path) => match SeriesTimeline::load_csv(Path::new(&path)) {
            Ok(s) => s,
            Err(e) => {
                error!(path = %path, error = %e, "could not load series");
                std::process::exit(1);
            }
        },
        None => synthetic_series(config.seed),
    };
    let series = if window > 1 { series.moving_average(window) } else { series };

    println!("=== Whip ===");
    println!("Output: {}", output_path);
    println!("Seed: {}", config.seed);
    println!("Tempo: {} BPM, {} ticks", config.clock.bpm, ticks);
    println!(
        "Harmony: {} pool {}, tonic {}",
        config.harmony.style,
        config.harmony.pool_key,
        note_name(config.harmony.tonic)
    );
    println!("Series: {} points", series.values().len());
    println!();

    let bpm = config.clock.bpm;
    let mut engine = Engine::with_config(config, MidiFileOutput::new(bpm), Box::new(MemoryStore::new()));
    if let Err(e) = wire(&mut engine, series) {
        error!(error = %e, "could not set up bindings");
        std::process::exit(1);
    }

    let end_ms = engine.run(ticks, 0.0);
    let flushed = engine.flush();
    info!(end_ms, flushed, "run complete");

    let chords: Vec<String> = engine
        .composer()
        .progression()
        .iter()
        .map(|c| c.to_string())
        .collect();
    println!("Progression: {}", chords.join(" "));

    let output = engine.into_output();
    println!("Notes: {} on channels {:?}", output.note_count(), output.channels());
    match output.write(Path::new(output_path)) {
        Ok(()) => println!("Done! Duration: {:.1}s", end_ms / 1000.0),
        Err(e) => {
            eprintln!("Error writing MIDI: {}", e);
            std::process::exit(1);
        }
    }
}

fn wire(engine: &mut Engine<MidiFileOutput>, series: SeriesTimeline) -> whip_engine::error::EngineResult<()> {
    engine.add_visualization(VISUALIZATION_ID, Box::new(series))?;
    engine.add_playhead(VISUALIZATION_ID, Playhead::new(PLAYHEAD_ID))?;
    let source = BindingSource::new(VISUALIZATION_ID, PLAYHEAD_ID);
    engine.register_binding(Binding::new(
        "density",
        source.clone(),
        BindingTarget::new("drummer", "density"),
    ))?;
    engine.register_binding(
        Binding::new("activity", source, BindingTarget::new("soloist", "activity"))
            .with_mapping(MappingFunction::Exponential, 1.5),
    )?;
    Ok(())
}

/// A slow sine with a seeded wobble, so the demo has rises and falls.
fn synthetic_series(seed: u64) -> SeriesTimeline {
    let mut rng = whip_prng::EngineRng::new(seed);
    let values = (0..64)
        .map(|i| {
            let t = i as f64 / 64.0 * std::f64::consts::TAU;
            t.sin() + 0.5 * (3.0 * t).sin() + rng.range_f64(-0.2, 0.2)
        })
        .collect();
    SeriesTimeline::new(values)
}

fn parse_flag<T: std::str::FromStr>(args: &[String], flag: &str) -> Option<T> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .and_then(|v| v.parse().ok())
}
