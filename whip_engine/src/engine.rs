// The engine: one owner for every service, driven one tick at a time.
//
// `Engine` holds the bus, the harmonic pool service, the visualizations and
// their playheads, the binding registry, the four generators, the
// humanizer, the timer queue and the audio output. All mutation happens
// through `&mut Engine`, so there is never concurrent access to shared
// state; the single cooperative timeline of the engine is the call sequence
// on this value.
//
// Tick pipeline (`tick(now_ms)`):
//
//   1. Fire deferred notes due by `now_ms`; publish `clock:tick`.
//   2. Advance every visualization's playheads. New samples are published
//      with their lookahead windows.
//   3. Drain the bus: playhead values go through the binding registry into
//      generator parameters; `context:mood` / `context:density` messages
//      update the humanizer and the rhythm generators.
//   4. Let the composer react (regenerate / advance on bar lines). On a
//      chord change the soloist plans a phrase from the latest lookahead.
//   5. On sixteenth boundaries, collect note requests from the drummer,
//      bassist and soloist, humanize them and either send them now (offset
//      <= 0) or schedule them on the timer queue.
//
// Failures inside a tick never escape it: bad payloads and rejected
// parameter values are logged and skipped. Operations invoked from outside
// the tick loop (registering bindings, managing playheads, persistence)
// return `EngineResult`.
//
// Randomness: one root `EngineRng` seeded from the config is forked once per
// generator, so each generator's stream is independent of how often the
// others draw.

use crate::bassist::{self, Bassist};
use crate::binding::{Binding, BindingSource, BindingTarget, MappingFunction};
use crate::binding_manager::{BindingManager, Endpoints, RoutedValue};
use crate::bus::{Delivery, EventBus, Payload, SubscriptionId, topics};
use crate::clock::{Clock, TickMessage};
use crate::composer::{self, Composer};
use crate::config::EngineConfig;
use crate::drummer::{self, Drummer};
use crate::error::{EngineError, EngineResult};
use crate::humanize::{Humanizer, Mood, MoodMessage};
use crate::output::{AudioOutput, Note, NoteRequest};
use crate::param::{ParameterTarget, ParameterValue};
use crate::persistence::{MemoryStore, StateStore, playheads_key};
use crate::playhead::{Lookahead, Playhead, Visualization};
use crate::pool::HarmonicPoolService;
use crate::soloist::{self, Soloist};
use crate::timeline::Timeline;
use crate::timer::TimerQueue;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};
use whip_prng::EngineRng;

/// Payload of `context:density`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DensityMessage {
    pub density: f64,
}

/// Context topics the engine itself listens to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ContextTopic {
    Mood,
    Density,
}

/// A humanized note waiting for its onset.
#[derive(Debug, Clone, Copy, PartialEq)]
struct DeferredNote {
    at_ms: f64,
    note: Note,
}

pub struct Engine<O: AudioOutput> {
    config: EngineConfig,
    clock: Clock,
    bus: EventBus,
    pool: HarmonicPoolService,
    visualizations: BTreeMap<String, Visualization>,
    primary: Option<String>,
    bindings: BindingManager,
    store: Box<dyn StateStore>,
    composer: Composer,
    drummer: Drummer,
    bassist: Bassist,
    soloist: Soloist,
    humanizer: Humanizer,
    timers: TimerQueue<DeferredNote>,
    output: O,
    context_subscriptions: BTreeMap<SubscriptionId, ContextTopic>,
    /// Next tick to process.
    tick: u64,
    now_ms: f64,
}

impl<O: AudioOutput> Engine<O> {
    /// Default configuration, in-memory state.
    pub fn new(output: O) -> Self {
        Self::with_config(EngineConfig::default(), output, Box::new(MemoryStore::new()))
    }

    pub fn with_config(config: EngineConfig, output: O, store: Box<dyn StateStore>) -> Self {
        let clock = config.clock.sanitized();
        let mut bus = EventBus::new();
        let mut context_subscriptions = BTreeMap::new();
        context_subscriptions.insert(bus.subscribe(topics::CONTEXT_MOOD), ContextTopic::Mood);
        context_subscriptions.insert(bus.subscribe(topics::CONTEXT_DENSITY), ContextTopic::Density);

        let mut pool = HarmonicPoolService::new();
        pool.set_pool_and_tonic(&config.harmony.pool_key, config.harmony.tonic, &mut bus);

        let (composer, drummer, bassist, soloist, humanizer) = build_generators(&config);
        info!(seed = config.seed, bpm = clock.bpm, ppqn = clock.ppqn, "engine created");
        Engine {
            config,
            clock,
            bus,
            pool,
            visualizations: BTreeMap::new(),
            primary: None,
            bindings: BindingManager::new(),
            store,
            composer,
            drummer,
            bassist,
            soloist,
            humanizer,
            timers: TimerQueue::new(),
            output,
            context_subscriptions,
            tick: 0,
            now_ms: 0.0,
        }
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn pool(&self) -> &HarmonicPoolService {
        &self.pool
    }

    pub fn composer(&self) -> &Composer {
        &self.composer
    }

    pub fn drummer(&self) -> &Drummer {
        &self.drummer
    }

    pub fn bassist(&self) -> &Bassist {
        &self.bassist
    }

    pub fn soloist(&self) -> &Soloist {
        &self.soloist
    }

    pub fn humanizer(&self) -> &Humanizer {
        &self.humanizer
    }

    pub fn bindings(&self) -> &BindingManager {
        &self.bindings
    }

    pub fn store(&self) -> &dyn StateStore {
        self.store.as_ref()
    }

    pub fn output(&self) -> &O {
        &self.output
    }

    pub fn into_output(self) -> O {
        self.output
    }

    /// Index of the next tick `tick()` will process.
    pub fn current_tick(&self) -> u64 {
        self.tick
    }

    pub fn pending_notes(&self) -> usize {
        self.timers.len()
    }

    pub fn visualization(&self, id: &str) -> Option<&Visualization> {
        self.visualizations.get(id)
    }

    pub fn visualization_ids(&self) -> Vec<String> {
        self.visualizations.keys().cloned().collect()
    }

    pub fn primary_visualization(&self) -> Option<&str> {
        self.primary.as_deref()
    }

    pub fn component(&self, id: &str) -> Option<&dyn ParameterTarget> {
        match id {
            composer::COMPONENT_ID => Some(&self.composer),
            drummer::COMPONENT_ID => Some(&self.drummer),
            bassist::COMPONENT_ID => Some(&self.bassist),
            soloist::COMPONENT_ID => Some(&self.soloist),
            _ => None,
        }
    }

    fn component_mut(&mut self, id: &str) -> Option<&mut dyn ParameterTarget> {
        match id {
            composer::COMPONENT_ID => Some(&mut self.composer),
            drummer::COMPONENT_ID => Some(&mut self.drummer),
            bassist::COMPONENT_ID => Some(&mut self.bassist),
            soloist::COMPONENT_ID => Some(&mut self.soloist),
            _ => None,
        }
    }

    fn components(&self) -> [&dyn ParameterTarget; 4] {
        [&self.composer, &self.drummer, &self.bassist, &self.soloist]
    }

    /// Snapshot of every live binding source and target.
    pub fn endpoints(&self) -> Endpoints {
        let mut endpoints = Endpoints::new();
        for viz in self.visualizations.values() {
            for p in viz.playheads() {
                endpoints.add_source(BindingSource::new(viz.id(), &p.id));
            }
        }
        for component in self.components() {
            for (param, kind) in component.parameters().iter() {
                endpoints.add_target(BindingTarget::new(component.component_id(), param), kind.clone());
            }
        }
        endpoints
    }

    // -----------------------------------------------------------------------
    // Harmony and context
    // -----------------------------------------------------------------------

    pub fn set_pool_and_tonic(&mut self, pool_key: &str, tonic: u8) {
        self.pool.set_pool_and_tonic(pool_key, tonic, &mut self.bus);
    }

    /// Publish a message for the engine (or anyone else) to pick up on the
    /// next tick.
    pub fn publish(&mut self, topic: &str, payload: Payload) {
        self.bus.publish(topic, payload);
    }

    pub fn set_mood(&mut self, mood: Mood) {
        self.humanizer.set_mood(mood);
    }

    /// Set a parameter directly, bypassing bindings.
    pub fn set_parameter(&mut self, component_id: &str, parameter_id: &str, value: &ParameterValue) -> bool {
        match self.component_mut(component_id) {
            Some(c) => c.set_parameter(parameter_id, value),
            None => false,
        }
    }

    // -----------------------------------------------------------------------
    // Visualizations and playheads
    // -----------------------------------------------------------------------

    /// Add a data timeline. The first visualization becomes the primary one,
    /// whose first playhead feeds `data:lookahead`.
    pub fn add_visualization(&mut self, id: &str, timeline: Box<dyn Timeline>) -> EngineResult<()> {
        if self.visualizations.contains_key(id) {
            return Err(EngineError::DuplicateVisualization(id.to_string()));
        }
        self.visualizations.insert(id.to_string(), Visualization::new(id, timeline));
        if self.primary.is_none() {
            self.primary = Some(id.to_string());
        }
        info!(visualization = id, "visualization added");
        Ok(())
    }

    /// Remove a visualization, its playheads, their bindings and their
    /// persisted state.
    pub fn remove_visualization(&mut self, id: &str) -> EngineResult<()> {
        if self.visualizations.remove(id).is_none() {
            return Err(EngineError::UnknownVisualization(id.to_string()));
        }
        let removed = self.bindings.remove_for_visualization(id, &mut self.bus);
        if self.primary.as_deref() == Some(id) {
            self.primary = self.visualizations.keys().next().cloned();
        }
        self.store.remove(&playheads_key(id))?;
        if !removed.is_empty() {
            self.bindings.persist(self.store.as_mut())?;
        }
        info!(visualization = id, bindings_removed = removed.len(), "visualization removed");
        Ok(())
    }

    fn visualization_mut(&mut self, id: &str) -> EngineResult<&mut Visualization> {
        self.visualizations
            .get_mut(id)
            .ok_or_else(|| EngineError::UnknownVisualization(id.to_string()))
    }

    fn persist_playheads(&mut self, visualization_id: &str) -> EngineResult<()> {
        let json = match self.visualizations.get(visualization_id) {
            Some(viz) => viz.playheads_to_json()?,
            None => return Ok(()),
        };
        self.store.save(&playheads_key(visualization_id), &json)
    }

    /// Add (or replace) a playhead and persist the visualization's list.
    pub fn add_playhead(&mut self, visualization_id: &str, mut playhead: Playhead) -> EngineResult<()> {
        let (pos, speed) = (playhead.position, playhead.speed);
        playhead.set_position(pos);
        playhead.set_speed(speed);
        debug!(visualization = visualization_id, playhead = %playhead.id, "playhead added");
        self.visualization_mut(visualization_id)?.add_playhead(playhead);
        self.persist_playheads(visualization_id)
    }

    /// Remove a playhead and every binding that reads from it.
    pub fn remove_playhead(&mut self, visualization_id: &str, playhead_id: &str) -> EngineResult<Option<Playhead>> {
        let removed = self.visualization_mut(visualization_id)?.remove_playhead(playhead_id);
        if removed.is_none() {
            return Ok(None);
        }
        let source = BindingSource::new(visualization_id, playhead_id);
        let cascaded = self.bindings.remove_for_source(&source, &mut self.bus);
        info!(
            visualization = visualization_id,
            playhead = playhead_id,
            bindings_removed = cascaded.len(),
            "playhead removed"
        );
        self.persist_playheads(visualization_id)?;
        self.bindings.persist(self.store.as_mut())?;
        Ok(removed)
    }

    pub fn set_playhead_position(&mut self, visualization_id: &str, playhead_id: &str, position: f64) -> EngineResult<bool> {
        self.update_playhead(visualization_id, playhead_id, |p| p.set_position(position))
    }

    pub fn set_playhead_speed(&mut self, visualization_id: &str, playhead_id: &str, speed: f64) -> EngineResult<bool> {
        self.update_playhead(visualization_id, playhead_id, |p| p.set_speed(speed))
    }

    pub fn set_playhead_enabled(&mut self, visualization_id: &str, playhead_id: &str, enabled: bool) -> EngineResult<bool> {
        self.update_playhead(visualization_id, playhead_id, |p| p.enabled = enabled)
    }

    fn update_playhead(
        &mut self,
        visualization_id: &str,
        playhead_id: &str,
        update: impl FnOnce(&mut Playhead),
    ) -> EngineResult<bool> {
        let Some(playhead) = self.visualization_mut(visualization_id)?.playhead_mut(playhead_id) else {
            return Ok(false);
        };
        update(playhead);
        self.persist_playheads(visualization_id)?;
        Ok(true)
    }

    /// Re-create a visualization's playheads from the store. Returns how
    /// many were restored.
    pub fn restore_playheads(&mut self, visualization_id: &str) -> EngineResult<usize> {
        let Some(json) = self.store.load(&playheads_key(visualization_id))? else {
            return Ok(0);
        };
        let list = Playhead::list_from_json(&json)?;
        let viz = self.visualization_mut(visualization_id)?;
        let count = list.len();
        for p in list {
            viz.add_playhead(p);
        }
        info!(visualization = visualization_id, count, "playheads restored");
        Ok(count)
    }

    // -----------------------------------------------------------------------
    // Bindings
    // -----------------------------------------------------------------------

    pub fn register_binding(&mut self, binding: Binding) -> EngineResult<()> {
        let endpoints = self.endpoints();
        self.bindings.register(binding, &endpoints, &mut self.bus)?;
        self.bindings.persist(self.store.as_mut())
    }

    pub fn remove_binding(&mut self, id: &str) -> EngineResult<Option<Binding>> {
        let removed = self.bindings.remove(id, &mut self.bus);
        if removed.is_some() {
            self.bindings.persist(self.store.as_mut())?;
        }
        Ok(removed)
    }

    pub fn set_binding_enabled(&mut self, id: &str, enabled: bool) -> EngineResult<bool> {
        let found = self.bindings.set_enabled(id, enabled);
        if found {
            self.bindings.persist(self.store.as_mut())?;
        }
        Ok(found)
    }

    pub fn update_binding_mapping(&mut self, id: &str, function: MappingFunction, curve: f64) -> EngineResult<bool> {
        let found = self.bindings.update_mapping(id, function, curve);
        if found {
            self.bindings.persist(self.store.as_mut())?;
        }
        Ok(found)
    }

    /// Remove every binding targeting a component's parameters.
    pub fn disconnect_component(&mut self, component_id: &str) -> EngineResult<usize> {
        let removed = self.bindings.remove_for_component(component_id, &mut self.bus);
        if !removed.is_empty() {
            self.bindings.persist(self.store.as_mut())?;
        }
        Ok(removed.len())
    }

    /// Remove every binding targeting one parameter, as when the parameter
    /// goes away.
    pub fn disconnect_parameter(&mut self, component_id: &str, parameter_id: &str) -> EngineResult<usize> {
        let target = BindingTarget::new(component_id, parameter_id);
        let removed = self.bindings.remove_for_target(&target, &mut self.bus);
        if !removed.is_empty() {
            debug!(component = component_id, parameter = parameter_id, count = removed.len(), "parameter disconnected");
            self.bindings.persist(self.store.as_mut())?;
        }
        Ok(removed.len())
    }

    /// Re-register persisted bindings whose endpoints exist now.
    pub fn restore_bindings(&mut self) -> EngineResult<usize> {
        let endpoints = self.endpoints();
        self.bindings.restore(self.store.as_ref(), &endpoints, &mut self.bus)
    }

    // -----------------------------------------------------------------------
    // Tick loop
    // -----------------------------------------------------------------------

    /// Process the next tick as happening at `now_ms`.
    pub fn tick(&mut self, now_ms: f64) {
        let tick = self.tick;
        self.now_ms = now_ms;
        self.poll_timers(now_ms);
        self.bus.publish_message(
            topics::CLOCK_TICK,
            &TickMessage {
                tick,
                ppqn: self.clock.ppqn,
            },
        );

        let ticks_until_chord = Some(self.composer.ticks_until_change(tick, &self.clock));
        let primary = self.primary.clone();
        for (id, viz) in self.visualizations.iter_mut() {
            let is_primary = primary.as_deref() == Some(id.as_str());
            viz.tick(&self.clock, &mut self.bus, self.config.lookahead_ticks, ticks_until_chord, is_primary);
        }

        self.drain_bus();

        if let Some(chord) = self.composer.on_tick(tick, &self.clock, &self.pool, &mut self.bus) {
            let lookahead: Option<Lookahead> = self.bus.last_message(topics::DATA_LOOKAHEAD);
            let next = self.composer.next_chord().cloned();
            self.soloist
                .plan_phrase(Some(&chord), next.as_ref(), lookahead.as_ref(), &self.pool);
        }

        if let Some(step) = self.clock.step_at(tick) {
            let bar = self.clock.bar_of(tick);
            let mut requests = self.drummer.on_step(bar, step, &self.clock);
            let current = self.composer.current_chord();
            let next = self.composer.next_chord();
            requests.extend(self.bassist.on_step(step, &self.clock, current, next, &self.pool));
            requests.extend(self.soloist.on_step(step, &self.clock, current, &self.pool));
            for request in requests {
                self.emit(request);
            }
        }

        self.tick += 1;
    }

    /// Run `count` ticks spaced by the clock's tick length, starting at
    /// `start_ms`. Returns the time just after the last tick.
    pub fn run(&mut self, count: u64, start_ms: f64) -> f64 {
        let ms_per_tick = self.clock.ms_per_tick();
        for i in 0..count {
            self.tick(start_ms + i as f64 * ms_per_tick);
        }
        start_ms + count as f64 * ms_per_tick
    }

    /// Send every deferred note due by `now_ms`.
    pub fn poll_timers(&mut self, now_ms: f64) -> usize {
        let due = self.timers.drain_due(now_ms);
        let count = due.len();
        for d in due {
            self.output.send_note(d.at_ms, d.note);
        }
        count
    }

    /// Send every deferred note regardless of time.
    pub fn flush(&mut self) -> usize {
        let due = self.timers.drain_all();
        let count = due.len();
        for d in due {
            self.output.send_note(d.at_ms, d.note);
        }
        count
    }

    fn drain_bus(&mut self) {
        while let Some(delivery) = self.bus.pop_delivery() {
            if let Some(routed) = self.bindings.handle_delivery(&delivery) {
                self.apply_routed(routed);
            } else if let Some(&topic) = self.context_subscriptions.get(&delivery.subscription) {
                self.handle_context(topic, &delivery);
            }
        }
    }

    fn apply_routed(&mut self, routed: RoutedValue) {
        let accepted = match self.component_mut(&routed.target.component_id) {
            Some(c) => c.set_parameter(&routed.target.parameter_id, &routed.value),
            None => false,
        };
        if !accepted {
            debug!(binding = %routed.binding_id, target = %routed.target, "routed value rejected");
        }
    }

    fn handle_context(&mut self, topic: ContextTopic, delivery: &Delivery) {
        match topic {
            ContextTopic::Mood => match serde_json::from_value::<MoodMessage>(delivery.payload.clone()) {
                Ok(m) => self.humanizer.set_mood(Mood::parse(&m.mood)),
                Err(e) => warn!(topic = %delivery.topic, error = %e, "malformed mood message"),
            },
            ContextTopic::Density => match serde_json::from_value::<DensityMessage>(delivery.payload.clone()) {
                Ok(m) => {
                    let value = ParameterValue::Number(m.density);
                    self.drummer.set_parameter("density", &value);
                    self.bassist.set_parameter("density", &value);
                }
                Err(e) => warn!(topic = %delivery.topic, error = %e, "malformed density message"),
            },
        }
    }

    /// Humanize a request and send or schedule it.
    fn emit(&mut self, request: NoteRequest) {
        let h = self
            .humanizer
            .humanize(request.voice, request.strong_beat, request.velocity);
        let note = Note {
            channel: request.channel,
            note: request.note.min(127),
            velocity: h.velocity,
            duration_ms: self.clock.ticks_to_ms(request.duration_ticks),
        };
        if h.timing_ms <= 0.0 {
            // Cannot start in the past; early notes play now.
            self.output.send_note(self.now_ms, note);
        } else {
            self.timers.schedule(self.now_ms + h.timing_ms, DeferredNote {
                at_ms: self.now_ms + h.timing_ms,
                note,
            });
        }
    }

    /// Silence the output, drop pending notes and rebuild every generator
    /// from the config. Visualizations, playheads and bindings survive.
    pub fn reset(&mut self) {
        self.output.panic(self.now_ms);
        self.timers = TimerQueue::new();
        self.pool.reset();
        self.pool
            .set_pool_and_tonic(&self.config.harmony.pool_key, self.config.harmony.tonic, &mut self.bus);
        let (composer, drummer, bassist, soloist, humanizer) = build_generators(&self.config);
        self.composer = composer;
        self.drummer = drummer;
        self.bassist = bassist;
        self.soloist = soloist;
        self.humanizer = humanizer;
        self.tick = 0;
        info!("engine reset");
    }
}

fn build_generators(config: &EngineConfig) -> (Composer, Drummer, Bassist, Soloist, Humanizer) {
    let mut root = EngineRng::new(config.seed);
    let composer = Composer::new(&config.harmony, root.fork(1));
    let drummer = Drummer::new(&config.rhythm, config.channels.drums, root.fork(2));
    let bassist = Bassist::new(&config.rhythm, config.channels.bass, root.fork(3));
    let soloist = Soloist::new(&config.solo, config.channels.lead, root.fork(4));
    let humanizer = Humanizer::new(root.next_u64(), config.humanize.clone());
    (composer, drummer, bassist, soloist, humanizer)
}
