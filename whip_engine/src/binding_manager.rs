// Binding registry: the patch bay between playheads and generator parameters.
//
// `BindingManager` owns every binding and three indexes over them: by bus
// subscription (to dispatch deliveries), by source playhead and by target
// parameter (to cascade removals). The indexes are only ever changed together
// with the binding map, so a binding is either fully registered (active,
// indexed) or absent. There is no half-active state.
//
// Endpoint checks go through an `Endpoints` snapshot the caller builds from
// its live playheads and generators. Registration fails with an error if
// either end is missing; restoration drops such bindings with a warning,
// since a persisted binding whose playhead was deleted while the engine was
// down is normal, not exceptional. A record that no longer parses is
// dropped the same way; only a store value that is not a JSON list at all
// fails the restore.
//
// Registering an id that already exists replaces the old binding: its
// subscription is released before the new one is taken, so an id never holds
// two subscriptions. Restoring likewise replaces, which makes restore
// idempotent. Neither registers nor restores replay the source's last bus
// value into the target; the first routed value is the next sample.
//
// Lifecycle events are published on `whip:binding:register` and
// `whip:binding:remove` with the binding record as payload.

use crate::binding::{Binding, BindingSource, BindingTarget, MappingFunction};
use crate::bus::{Delivery, EventBus, SubscriptionId, topics};
use crate::error::{EngineError, EngineResult};
use crate::param::{ParameterKind, ParameterValue};
use crate::persistence::{BINDINGS_KEY, StateStore};
use crate::playhead::PlayheadValueMessage;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

/// Which sources and targets currently exist.
#[derive(Debug, Clone, Default)]
pub struct Endpoints {
    sources: BTreeSet<BindingSource>,
    targets: BTreeMap<BindingTarget, ParameterKind>,
}

impl Endpoints {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_source(&mut self, source: BindingSource) {
        self.sources.insert(source);
    }

    pub fn add_target(&mut self, target: BindingTarget, kind: ParameterKind) {
        self.targets.insert(target, kind);
    }

    pub fn has_source(&self, source: &BindingSource) -> bool {
        self.sources.contains(source)
    }

    pub fn target_kind(&self, target: &BindingTarget) -> Option<&ParameterKind> {
        self.targets.get(target)
    }

    fn check(&self, binding: &Binding) -> EngineResult<ParameterKind> {
        if !self.has_source(&binding.source) {
            return Err(EngineError::MissingSource(binding.source.clone()));
        }
        self.target_kind(&binding.target)
            .cloned()
            .ok_or_else(|| EngineError::MissingTarget(binding.target.clone()))
    }
}

/// A value ready to be applied to a generator.
#[derive(Debug, Clone, PartialEq)]
pub struct RoutedValue {
    pub binding_id: String,
    pub target: BindingTarget,
    pub value: ParameterValue,
}

#[derive(Debug, Default)]
pub struct BindingManager {
    bindings: BTreeMap<String, Binding>,
    by_subscription: BTreeMap<SubscriptionId, String>,
    by_source: BTreeMap<BindingSource, Vec<String>>,
    by_target: BTreeMap<BindingTarget, Vec<String>>,
}

impl BindingManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Binding> {
        self.bindings.get(id)
    }

    pub fn bindings(&self) -> impl Iterator<Item = &Binding> {
        self.bindings.values()
    }

    pub fn ids(&self) -> Vec<String> {
        self.bindings.keys().cloned().collect()
    }

    pub fn for_source(&self, source: &BindingSource) -> Vec<&Binding> {
        self.lookup(self.by_source.get(source))
    }

    pub fn for_target(&self, target: &BindingTarget) -> Vec<&Binding> {
        self.lookup(self.by_target.get(target))
    }

    fn lookup(&self, ids: Option<&Vec<String>>) -> Vec<&Binding> {
        ids.into_iter()
            .flatten()
            .filter_map(|id| self.bindings.get(id))
            .collect()
    }

    /// Validate, activate and index a binding, replacing any binding with
    /// the same id.
    pub fn register(&mut self, binding: Binding, endpoints: &Endpoints, bus: &mut EventBus) -> EngineResult<()> {
        let kind = endpoints.check(&binding)?;
        let id = binding.id.clone();
        self.attach(binding, kind, bus);
        if let Some(b) = self.bindings.get(&id) {
            bus.publish_message(topics::BINDING_REGISTER, b);
        }
        info!(binding = %id, "binding registered");
        Ok(())
    }

    fn attach(&mut self, mut binding: Binding, kind: ParameterKind, bus: &mut EventBus) {
        if self.bindings.contains_key(&binding.id) {
            self.detach(&binding.id, bus);
        }
        let subscription = binding.activate(kind, bus);
        let id = binding.id.clone();
        self.by_subscription.insert(subscription, id.clone());
        self.by_source.entry(binding.source.clone()).or_default().push(id.clone());
        self.by_target.entry(binding.target.clone()).or_default().push(id.clone());
        self.bindings.insert(id, binding);
    }

    fn detach(&mut self, id: &str, bus: &mut EventBus) -> Option<Binding> {
        let mut binding = self.bindings.remove(id)?;
        if let Some(sub) = binding.subscription() {
            self.by_subscription.remove(&sub);
        }
        binding.deactivate(bus);
        remove_from_index(&mut self.by_source, &binding.source, id);
        remove_from_index(&mut self.by_target, &binding.target, id);
        Some(binding)
    }

    /// Deactivate and forget a binding.
    pub fn remove(&mut self, id: &str, bus: &mut EventBus) -> Option<Binding> {
        let binding = self.detach(id, bus)?;
        bus.publish_message(topics::BINDING_REMOVE, &binding);
        info!(binding = %id, "binding removed");
        Some(binding)
    }

    fn remove_all(&mut self, ids: Vec<String>, bus: &mut EventBus) -> Vec<Binding> {
        ids.iter().filter_map(|id| self.remove(id, bus)).collect()
    }

    /// Cascade for a deleted playhead.
    pub fn remove_for_source(&mut self, source: &BindingSource, bus: &mut EventBus) -> Vec<Binding> {
        let ids = self.by_source.get(source).cloned().unwrap_or_default();
        self.remove_all(ids, bus)
    }

    /// Cascade for a deleted visualization.
    pub fn remove_for_visualization(&mut self, visualization_id: &str, bus: &mut EventBus) -> Vec<Binding> {
        let ids = self
            .bindings
            .values()
            .filter(|b| b.source.visualization_id == visualization_id)
            .map(|b| b.id.clone())
            .collect();
        self.remove_all(ids, bus)
    }

    /// Cascade for a deleted parameter.
    pub fn remove_for_target(&mut self, target: &BindingTarget, bus: &mut EventBus) -> Vec<Binding> {
        let ids = self.by_target.get(target).cloned().unwrap_or_default();
        self.remove_all(ids, bus)
    }

    /// Cascade for a deleted generator.
    pub fn remove_for_component(&mut self, component_id: &str, bus: &mut EventBus) -> Vec<Binding> {
        let ids = self
            .bindings
            .values()
            .filter(|b| b.target.component_id == component_id)
            .map(|b| b.id.clone())
            .collect();
        self.remove_all(ids, bus)
    }

    pub fn clear(&mut self, bus: &mut EventBus) {
        for id in self.ids() {
            self.detach(&id, bus);
        }
    }

    pub fn set_enabled(&mut self, id: &str, enabled: bool) -> bool {
        match self.bindings.get_mut(id) {
            Some(b) => {
                b.enabled = enabled;
                true
            }
            None => false,
        }
    }

    pub fn update_mapping(&mut self, id: &str, function: MappingFunction, curve: f64) -> bool {
        match self.bindings.get_mut(id) {
            Some(b) => {
                b.set_mapping(function, curve);
                true
            }
            None => false,
        }
    }

    /// Route one bus delivery. `None` if the delivery does not belong to a
    /// binding or produces no value.
    pub fn handle_delivery(&mut self, delivery: &Delivery) -> Option<RoutedValue> {
        let id = self.by_subscription.get(&delivery.subscription)?;
        let binding = self.bindings.get_mut(id)?;
        let message: PlayheadValueMessage = match serde_json::from_value(delivery.payload.clone()) {
            Ok(m) => m,
            Err(e) => {
                warn!(binding = %id, error = %e, "malformed playhead value dropped");
                return None;
            }
        };
        let value = binding.route(message.value)?;
        Some(RoutedValue {
            binding_id: binding.id.clone(),
            target: binding.target.clone(),
            value,
        })
    }

    /// True if a subscription id belongs to one of our bindings.
    pub fn owns(&self, subscription: SubscriptionId) -> bool {
        self.by_subscription.contains_key(&subscription)
    }

    pub fn to_json(&self) -> EngineResult<String> {
        let list: Vec<&Binding> = self.bindings.values().collect();
        Ok(serde_json::to_string(&list)?)
    }

    pub fn persist(&self, store: &mut dyn StateStore) -> EngineResult<()> {
        store.save(BINDINGS_KEY, &self.to_json()?)
    }

    /// Register every binding in `json` whose endpoints exist. Returns how
    /// many were restored.
    pub fn restore_json(&mut self, json: &str, endpoints: &Endpoints, bus: &mut EventBus) -> EngineResult<usize> {
        let records: Vec<serde_json::Value> = serde_json::from_str(json)?;
        let mut restored = 0;
        for (i, record) in records.into_iter().enumerate() {
            let binding: Binding = match serde_json::from_value(record) {
                Ok(b) => b,
                Err(e) => {
                    warn!(index = i, error = %e, "dropping malformed persisted binding");
                    continue;
                }
            };
            match endpoints.check(&binding) {
                Ok(kind) => {
                    debug!(binding = %binding.id, "binding restored");
                    self.attach(binding, kind, bus);
                    restored += 1;
                }
                Err(e) => warn!(binding = %binding.id, error = %e, "dropping persisted binding"),
            }
        }
        info!(restored, total = self.len(), "bindings restored");
        Ok(restored)
    }

    /// Restore from the store's binding list, if one was saved.
    pub fn restore(&mut self, store: &dyn StateStore, endpoints: &Endpoints, bus: &mut EventBus) -> EngineResult<usize> {
        match store.load(BINDINGS_KEY)? {
            Some(json) => self.restore_json(&json, endpoints, bus),
            None => Ok(0),
        }
    }
}

fn remove_from_index<K: Ord>(index: &mut BTreeMap<K, Vec<String>>, key: &K, id: &str) {
    if let Some(ids) = index.get_mut(key) {
        ids.retain(|x| x != id);
        if ids.is_empty() {
            index.remove(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MemoryStore;
    use crate::playhead::PlayheadValueMessage;

    fn endpoints() -> Endpoints {
        let mut e = Endpoints::new();
        e.add_source(BindingSource::new("viz", "a"));
        e.add_source(BindingSource::new("viz", "b"));
        e.add_target(BindingTarget::new("drummer", "density"), ParameterKind::number(0.0, 1.0));
        e.add_target(BindingTarget::new("soloist", "activity"), ParameterKind::number(0.0, 1.0));
        e
    }

    fn binding(id: &str, playhead: &str, component: &str, param: &str) -> Binding {
        Binding::new(id, BindingSource::new("viz", playhead), BindingTarget::new(component, param))
    }

    fn publish_value(bus: &mut EventBus, playhead: &str, value: f64) {
        let msg = PlayheadValueMessage {
            value,
            raw_value: value,
            position: 0.0,
            color: String::new(),
        };
        bus.publish_message(&topics::playhead_value("viz", playhead), &msg);
    }

    #[test]
    fn register_validates_endpoints() {
        let mut bus = EventBus::new();
        let mut mgr = BindingManager::new();
        let e = endpoints();
        let err = mgr.register(binding("x", "zzz", "drummer", "density"), &e, &mut bus);
        assert!(matches!(err, Err(EngineError::MissingSource(_))));
        let err = mgr.register(binding("x", "a", "drummer", "tempo"), &e, &mut bus);
        assert!(matches!(err, Err(EngineError::MissingTarget(_))));
        assert!(mgr.is_empty());
        assert_eq!(bus.subscription_count(), 0);
    }

    #[test]
    fn deliveries_are_routed() {
        let mut bus = EventBus::new();
        let mut mgr = BindingManager::new();
        let b = binding("inv", "a", "drummer", "density").with_mapping(MappingFunction::Inverse, 1.0);
        mgr.register(b, &endpoints(), &mut bus).unwrap();

        publish_value(&mut bus, "a", 0.3);
        let d = bus.pop_delivery().unwrap();
        let routed = mgr.handle_delivery(&d).unwrap();
        assert_eq!(routed.target, BindingTarget::new("drummer", "density"));
        let v = routed.value.as_number().unwrap();
        assert!((v - 0.7).abs() < 1e-9);
    }

    #[test]
    fn re_register_replaces_subscription() {
        let mut bus = EventBus::new();
        let mut mgr = BindingManager::new();
        let e = endpoints();
        mgr.register(binding("b", "a", "drummer", "density"), &e, &mut bus).unwrap();
        mgr.register(binding("b", "b", "drummer", "density"), &e, &mut bus).unwrap();
        assert_eq!(mgr.len(), 1);
        assert_eq!(bus.subscription_count(), 1);
        assert_eq!(bus.subscriber_count(&topics::playhead_value("viz", "a")), 0);
        assert!(mgr.for_source(&BindingSource::new("viz", "a")).is_empty());
    }

    #[test]
    fn removing_source_cascades() {
        let mut bus = EventBus::new();
        let mut mgr = BindingManager::new();
        let e = endpoints();
        mgr.register(binding("b1", "a", "drummer", "density"), &e, &mut bus).unwrap();
        mgr.register(binding("b2", "a", "soloist", "activity"), &e, &mut bus).unwrap();
        mgr.register(binding("b3", "b", "soloist", "activity"), &e, &mut bus).unwrap();

        let removed = mgr.remove_for_source(&BindingSource::new("viz", "a"), &mut bus);
        assert_eq!(removed.len(), 2);
        assert_eq!(mgr.ids(), vec!["b3".to_string()]);
        assert_eq!(bus.subscriber_count(&topics::playhead_value("viz", "a")), 0);

        let removed = mgr.remove_for_component("soloist", &mut bus);
        assert_eq!(removed.len(), 1);
        assert_eq!(bus.subscription_count(), 0);
    }

    #[test]
    fn removing_target_cascades_only_that_parameter() {
        let mut bus = EventBus::new();
        let mut mgr = BindingManager::new();
        let e = endpoints();
        mgr.register(binding("b1", "a", "drummer", "density"), &e, &mut bus).unwrap();
        mgr.register(binding("b2", "b", "drummer", "density"), &e, &mut bus).unwrap();
        mgr.register(binding("b3", "a", "soloist", "activity"), &e, &mut bus).unwrap();

        let removed = mgr.remove_for_target(&BindingTarget::new("drummer", "density"), &mut bus);
        let ids: Vec<&str> = removed.iter().map(|b| b.id.as_str()).collect();
        assert_eq!(ids, vec!["b1", "b2"]);
        assert_eq!(mgr.ids(), vec!["b3".to_string()]);
        assert_eq!(bus.subscriber_count(&topics::playhead_value("viz", "b")), 0);
        assert_eq!(bus.subscriber_count(&topics::playhead_value("viz", "a")), 1);
        assert!(mgr.remove_for_target(&BindingTarget::new("drummer", "density"), &mut bus).is_empty());
    }

    #[test]
    fn removed_binding_gets_no_queued_value() {
        let mut bus = EventBus::new();
        let mut mgr = BindingManager::new();
        mgr.register(binding("b", "a", "drummer", "density"), &endpoints(), &mut bus).unwrap();
        publish_value(&mut bus, "a", 0.5);
        mgr.remove("b", &mut bus);
        // The queued delivery's subscription is gone; only lifecycle noise
        // (which nobody subscribed to) remains.
        assert!(bus.pop_delivery().is_none());
    }

    #[test]
    fn enable_and_update_mapping() {
        let mut bus = EventBus::new();
        let mut mgr = BindingManager::new();
        mgr.register(binding("b", "a", "drummer", "density"), &endpoints(), &mut bus).unwrap();
        assert!(mgr.set_enabled("b", false));
        publish_value(&mut bus, "a", 0.5);
        let d = bus.pop_delivery().unwrap();
        assert!(mgr.handle_delivery(&d).is_none());

        assert!(mgr.set_enabled("b", true));
        assert!(mgr.update_mapping("b", MappingFunction::Exponential, 2.0));
        publish_value(&mut bus, "a", 0.5);
        let d = bus.pop_delivery().unwrap();
        let v = mgr.handle_delivery(&d).unwrap().value.as_number().unwrap();
        assert!((v - 0.25).abs() < 1e-9);
        assert!(!mgr.set_enabled("nope", true));
    }

    #[test]
    fn restore_is_idempotent_and_prunes() {
        let mut bus = EventBus::new();
        let mut mgr = BindingManager::new();
        let mut store = MemoryStore::new();
        let e = endpoints();
        mgr.register(binding("b1", "a", "drummer", "density"), &e, &mut bus).unwrap();
        mgr.register(binding("b2", "b", "soloist", "activity"), &e, &mut bus).unwrap();
        mgr.persist(&mut store).unwrap();

        // Playhead b disappeared while the engine was down.
        let mut fewer = Endpoints::new();
        fewer.add_source(BindingSource::new("viz", "a"));
        fewer.add_target(BindingTarget::new("drummer", "density"), ParameterKind::number(0.0, 1.0));
        fewer.add_target(BindingTarget::new("soloist", "activity"), ParameterKind::number(0.0, 1.0));

        let mut bus2 = EventBus::new();
        let mut restored = BindingManager::new();
        assert_eq!(restored.restore(&store, &fewer, &mut bus2).unwrap(), 1);
        assert_eq!(restored.restore(&store, &fewer, &mut bus2).unwrap(), 1);
        assert_eq!(restored.ids(), vec!["b1".to_string()]);
        assert_eq!(bus2.subscription_count(), 1);
    }

    #[test]
    fn restore_never_replays_last_value() {
        let mut bus = EventBus::new();
        publish_value(&mut bus, "a", 0.9);
        let mut mgr = BindingManager::new();
        let json = serde_json::to_string(&vec![binding("b", "a", "drummer", "density")]).unwrap();
        mgr.restore_json(&json, &endpoints(), &mut bus).unwrap();
        assert!(bus.pop_delivery().is_none());
    }

    #[test]
    fn malformed_records_are_skipped_on_restore() {
        let mut bus = EventBus::new();
        let mut mgr = BindingManager::new();
        let mut records = vec![serde_json::to_value(binding("good", "a", "drummer", "density")).unwrap()];
        let mut bad = serde_json::to_value(binding("bad", "b", "soloist", "activity")).unwrap();
        bad["mappingFunction"] = serde_json::json!("sigmoid");
        records.push(bad);
        records.push(serde_json::json!({"id": "partial"}));
        let json = serde_json::to_string(&records).unwrap();

        assert_eq!(mgr.restore_json(&json, &endpoints(), &mut bus).unwrap(), 1);
        assert_eq!(mgr.ids(), vec!["good".to_string()]);
        assert!(mgr.restore_json("{}", &endpoints(), &mut bus).is_err());
    }

    #[test]
    fn lifecycle_events_published() {
        let mut bus = EventBus::new();
        let reg = bus.subscribe(topics::BINDING_REGISTER);
        let rem = bus.subscribe(topics::BINDING_REMOVE);
        let mut mgr = BindingManager::new();
        mgr.register(binding("b", "a", "drummer", "density"), &endpoints(), &mut bus).unwrap();
        mgr.remove("b", &mut bus);
        let first = bus.pop_delivery().unwrap();
        assert_eq!(first.subscription, reg);
        assert_eq!(first.payload["id"], "b");
        assert_eq!(bus.pop_delivery().unwrap().subscription, rem);
    }
}
