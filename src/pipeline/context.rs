// In: src/pipeline/context.rs

//! Global (process lifetime) and session (single run) state shared by actions.
//!
//! Both contexts are safe for concurrent use from item-wise workers. Typed
//! per-concern maps replace a single bag of heterogeneous values: plain JSON
//! values, preloaded entity stores, occurrence indexes and run-once guards.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, SecondsFormat, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use hashbrown::HashMap;
use serde_json::Value;

use crate::expr::EntitySource;
use crate::pipeline::occurrence::{OccurrenceIndex, SequenceKey};
use crate::types::Record;
use crate::utils::generate_session_key;

pub const SESSION_KEY_FIELD: &str = "sessionKey";
pub const SESSION_STARTED_FIELD: &str = "startedAt";

//==================================================================================
// 1. Global Context
//==================================================================================

#[derive(Debug, Default)]
pub struct GlobalContext {
    values: DashMap<String, Value>,
}

impl GlobalContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.values.get(key).map(|v| v.value().clone())
    }

    pub fn insert(&self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.values.insert(key.into(), value)
    }

    /// Inserts only when absent and returns the value that ends up stored.
    pub fn get_or_insert_with(&self, key: &str, init: impl FnOnce() -> Value) -> Value {
        self.values
            .entry(key.to_string())
            .or_insert_with(init)
            .value()
            .clone()
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.values.remove(key).map(|(_, v)| v)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Point-in-time copy with keys in sorted order.
    pub fn snapshot(&self) -> Record {
        sorted_snapshot(&self.values, |_| true)
    }
}

//==================================================================================
// 2. Entity Stores
//==================================================================================

/// A preloaded reference dataset: the rows plus an id index over them.
#[derive(Debug, Clone, Default)]
pub struct EntityStore {
    pub list: Vec<Record>,
    pub by_id: HashMap<String, Value>,
}

impl EntityStore {
    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }
}

//==================================================================================
// 3. Session Context
//==================================================================================

#[derive(Debug)]
pub struct SessionContext {
    key: String,
    started_at: DateTime<Utc>,
    started: Instant,
    values: DashMap<String, Value>,
    entities: DashMap<String, Arc<EntityStore>>,
    occurrences: DashMap<String, OccurrenceIndex>,
    guards: DashSet<String>,
}

impl Default for SessionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionContext {
    pub fn new() -> Self {
        Self::with_key(generate_session_key())
    }

    pub fn with_key(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            started_at: Utc::now(),
            started: Instant::now(),
            values: DashMap::new(),
            entities: DashMap::new(),
            occurrences: DashMap::new(),
            guards: DashSet::new(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    // --- Plain values ---

    pub fn get(&self, key: &str) -> Option<Value> {
        self.values.get(key).map(|v| v.value().clone())
    }

    pub fn insert(&self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.values.insert(key.into(), value)
    }

    /// True if any typed map holds `key`.
    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
            || self.entities.contains_key(key)
            || self.occurrences.contains_key(key)
    }

    /// Session identity plus every scalar value, for template envelopes.
    pub fn scalar_snapshot(&self) -> Record {
        let mut out = Record::new();
        out.insert(SESSION_KEY_FIELD.to_string(), Value::String(self.key.clone()));
        out.insert(
            SESSION_STARTED_FIELD.to_string(),
            Value::String(self.started_at.to_rfc3339_opts(SecondsFormat::Millis, true)),
        );
        out.extend(sorted_snapshot(&self.values, |v| !(v.is_array() || v.is_object())));
        out
    }

    /// Every plain value, sorted by key.
    pub fn values_snapshot(&self) -> Record {
        sorted_snapshot(&self.values, |_| true)
    }

    // --- Entity stores ---

    pub fn entities(&self, key: &str) -> Option<Arc<EntityStore>> {
        self.entities.get(key).map(|s| Arc::clone(s.value()))
    }

    /// Stores `store` unless another writer got there first. Returns true when
    /// this call inserted it.
    pub fn insert_entities_if_absent(&self, key: &str, store: EntityStore) -> bool {
        match self.entities.entry(key.to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(store));
                true
            }
        }
    }

    pub fn entity_keys(&self) -> Vec<(String, usize)> {
        let mut keys: Vec<_> = self
            .entities
            .iter()
            .map(|e| (e.key().clone(), e.value().len()))
            .collect();
        keys.sort();
        keys
    }

    /// Resolves entity lookups against the stores present right now.
    pub fn entity_view(&self, maps: impl IntoIterator<Item = impl AsRef<str>>) -> EntityView {
        let stores = maps
            .into_iter()
            .filter_map(|m| {
                let name = m.as_ref().to_string();
                self.entities(&name).map(|store| (name, store))
            })
            .collect();
        EntityView { stores }
    }

    // --- Occurrence indexes ---

    pub fn record_occurrence(&self, key: &str, sequence: SequenceKey, info: Record) {
        self.occurrences
            .entry(key.to_string())
            .or_default()
            .insert(sequence, info);
    }

    pub fn with_occurrences<R>(&self, key: &str, f: impl FnOnce(&OccurrenceIndex) -> R) -> Option<R> {
        self.occurrences.get(key).map(|index| f(index.value()))
    }

    /// Occurrence map keys, sorted.
    pub fn occurrence_keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self.occurrences.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    // --- Guards ---

    /// Returns true exactly once per guard name for the lifetime of the session.
    pub fn run_once(&self, guard: &str) -> bool {
        self.guards.insert(guard.to_string())
    }

    pub fn has_run(&self, guard: &str) -> bool {
        self.guards.contains(guard)
    }
}

/// Entity stores captured for one template-rendering pass.
#[derive(Debug, Default)]
pub struct EntityView {
    stores: HashMap<String, Arc<EntityStore>>,
}

impl EntitySource for EntityView {
    fn entity(&self, map: &str, id: &str) -> Option<&Value> {
        self.stores.get(map)?.by_id.get(id)
    }
}

fn sorted_snapshot(map: &DashMap<String, Value>, keep: impl Fn(&Value) -> bool) -> Record {
    let mut pairs: Vec<(String, Value)> = map
        .iter()
        .filter(|e| keep(e.value()))
        .map(|e| (e.key().clone(), e.value().clone()))
        .collect();
    pairs.sort_by(|a, b| a.0.cmp(&b.0));
    pairs.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::thread;

    #[test]
    fn test_session_identity_and_snapshot() {
        let session = SessionContext::new();
        assert_eq!(session.key().len(), 20);
        session.insert("zeta", json!(1));
        session.insert("alpha", json!("a"));
        session.insert("list", json!([1, 2]));

        let snap = session.scalar_snapshot();
        let keys: Vec<_> = snap.keys().cloned().collect();
        assert_eq!(keys, vec!["sessionKey", "startedAt", "alpha", "zeta"]);
        assert!(session.contains_key("list"));
    }

    #[test]
    fn test_run_once_is_race_free() {
        let session = SessionContext::with_key("S");
        let winners: usize = thread::scope(|s| {
            let handles: Vec<_> = (0..8).map(|_| s.spawn(|| session.run_once("sort"))).collect();
            handles.into_iter().map(|h| h.join().unwrap() as usize).sum()
        });
        assert_eq!(winners, 1);
        assert!(session.has_run("sort"));
    }

    #[test]
    fn test_entities_insert_if_absent_and_view() {
        let session = SessionContext::with_key("S");
        let mut store = EntityStore::default();
        store.by_id.insert("7".into(), json!({"name": "Ann"}));
        assert!(session.insert_entities_if_absent("agents", store));
        assert!(!session.insert_entities_if_absent("agents", EntityStore::default()));

        let view = session.entity_view(["agents", "missing"]);
        assert_eq!(view.entity("agents", "7"), Some(&json!({"name": "Ann"})));
        assert_eq!(view.entity("missing", "7"), None);
    }

    #[test]
    fn test_global_get_or_insert() {
        let global = GlobalContext::new();
        assert_eq!(global.get_or_insert_with("k", || json!(1)), json!(1));
        assert_eq!(global.get_or_insert_with("k", || json!(2)), json!(1));
        assert_eq!(global.snapshot().len(), 1);
    }
}
