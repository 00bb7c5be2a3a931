// Whip: a generative music engine that sonifies data.
//
// Playheads sweep across numeric timelines in step with a musical clock.
// Each sample they cross is routed through user-defined bindings into the
// parameters of four generators (composer, drummer, bassist, soloist), which
// improvise against a shared harmonic pool. Everything is deterministic given
// a seed.
//
// Architecture:
// - bus.rs: Topic-based event bus with queued deliveries and a last-value map
// - clock.rs: Tick/step/bar arithmetic (ppqn, bpm, 16 steps per bar)
// - config.rs: `EngineConfig` and its JSON loading
// - error.rs: `EngineError` / `EngineResult`
// - timeline.rs: The `Timeline` capability trait and `SeriesTimeline` (CSV)
// - playhead.rs: Playheads, lookahead windows and trend fitting, visualizations
// - param.rs: Typed generator parameters and the `ParameterTarget` trait
// - binding.rs: One playhead → parameter binding and its mapping curves
// - binding_manager.rs: Binding registry, validation, cascades, persistence
// - persistence.rs: `StateStore` trait, in-memory and JSON-file stores
// - chord.rs: Chord qualities, spelling and voicings
// - pool.rs: Key-signature pools, tonic centres, `HarmonicPoolService`
// - composer.rs: Progression generator (weighted, style-aware state machine)
// - pattern.rs: Density-layered step patterns shared by drums and bass
// - drummer.rs: Drum styles, fills, density-driven patterns
// - bassist.rs: Role-based bass lines resolved against the progression
// - soloist.rs: Data-driven phrase planning for the lead voice
// - humanize.rs: Coherent-noise timing/velocity drift, moods
// - timer.rs: Cancellable timer queue for deferred note onsets
// - output.rs: `AudioOutput` trait, recording / fan-out / MIDI file outputs
// - engine.rs: `Engine`, which owns all of the above and runs the tick loop

pub mod bassist;
pub mod binding;
pub mod binding_manager;
pub mod bus;
pub mod chord;
pub mod clock;
pub mod composer;
pub mod config;
pub mod drummer;
pub mod engine;
pub mod error;
pub mod humanize;
pub mod output;
pub mod param;
pub mod pattern;
pub mod persistence;
pub mod playhead;
pub mod pool;
pub mod soloist;
pub mod timeline;
pub mod timer;
