//! Per-source runtime state.
//!
//! Sources live in an arena indexed by id. Configuration is immutable and
//! shared; only the scheduling state and the in-flight flag change.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use crate::domain::{DataSource, Priority, SourceCategory};
use crate::{Error, Result};

#[derive(Debug, Clone, Default)]
struct SourceState {
    enabled: bool,
    last_update: Option<DateTime<Utc>>,
    next_update: Option<DateTime<Utc>>,
}

/// Read-only view of one source for status queries.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceStatus {
    pub id: String,
    pub name: String,
    pub category: SourceCategory,
    pub priority: Priority,
    pub enabled: bool,
    pub in_flight: bool,
    pub last_update: Option<DateTime<Utc>>,
    pub next_update: Option<DateTime<Utc>>,
    pub consecutive_errors: u32,
}

/// One source and its mutable state.
#[derive(Debug)]
pub struct SourceSlot {
    pub source: Arc<DataSource>,
    state: Mutex<SourceState>,
    in_flight: AtomicBool,
}

/// Marks a source's cycle as running until dropped.
#[derive(Debug)]
pub struct InFlightGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

impl SourceSlot {
    fn new(source: DataSource) -> Self {
        let enabled = source.enabled;
        Self {
            source: Arc::new(source),
            state: Mutex::new(SourceState {
                enabled,
                ..Default::default()
            }),
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &str {
        &self.source.id
    }

    /// Claim the source for a cycle. Returns `None` if a cycle is already running.
    pub fn try_begin(&self) -> Option<InFlightGuard<'_>> {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| InFlightGuard {
                flag: &self.in_flight,
            })
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn is_enabled(&self) -> bool {
        self.state.lock().enabled
    }

    /// Set enablement, returning the previous value.
    pub fn set_enabled(&self, enabled: bool) -> bool {
        let mut state = self.state.lock();
        std::mem::replace(&mut state.enabled, enabled)
    }

    /// Disable the source. Returns true only on an enabled to disabled transition.
    pub fn force_disable(&self) -> bool {
        self.set_enabled(false)
    }

    pub fn mark_success(&self, at: DateTime<Utc>) {
        self.state.lock().last_update = Some(at);
    }

    pub fn set_next_update(&self, at: Option<DateTime<Utc>>) {
        self.state.lock().next_update = at;
    }

    pub fn last_update(&self) -> Option<DateTime<Utc>> {
        self.state.lock().last_update
    }

    pub fn next_update(&self) -> Option<DateTime<Utc>> {
        self.state.lock().next_update
    }

    pub fn status(&self, consecutive_errors: u32) -> SourceStatus {
        let state = self.state.lock().clone();
        SourceStatus {
            id: self.source.id.clone(),
            name: self.source.name.clone(),
            category: self.source.category,
            priority: self.source.priority,
            enabled: state.enabled,
            in_flight: self.is_in_flight(),
            last_update: state.last_update,
            next_update: state.next_update,
            consecutive_errors,
        }
    }
}

/// Arena of sources with an id index.
#[derive(Debug, Default)]
pub struct SourceRegistry {
    slots: Vec<SourceSlot>,
    index: HashMap<String, usize>,
}

impl SourceRegistry {
    pub fn new(sources: Vec<DataSource>) -> Result<Self> {
        let mut registry = Self::default();
        for source in sources {
            if registry.index.contains_key(&source.id) {
                return Err(Error::config(format!("duplicate source id '{}'", source.id)));
            }
            registry.index.insert(source.id.clone(), registry.slots.len());
            registry.slots.push(SourceSlot::new(source));
        }
        Ok(registry)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&SourceSlot> {
        self.index.get(id).map(|&i| &self.slots[i])
    }

    /// Look up a source, failing with `NotFound` for an unknown id.
    pub fn require(&self, id: &str) -> Result<&SourceSlot> {
        self.get(id).ok_or_else(|| Error::not_found("DataSource", id))
    }

    pub fn iter(&self) -> impl Iterator<Item = &SourceSlot> {
        self.slots.iter()
    }

    /// Ids of enabled sources, highest priority first, configuration order within a tier.
    pub fn enabled_by_priority(&self) -> Vec<String> {
        let mut enabled: Vec<&SourceSlot> = self.slots.iter().filter(|s| s.is_enabled()).collect();
        enabled.sort_by_key(|s| s.source.priority.rank());
        enabled.into_iter().map(|s| s.source.id.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(id: &str, priority: Priority) -> DataSource {
        DataSource::new(id, id, "/status/", SourceCategory::Universe, 5).with_priority(priority)
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let result = SourceRegistry::new(vec![
            source("a", Priority::Normal),
            source("a", Priority::High),
        ]);
        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[test]
    fn test_priority_order() {
        let registry = SourceRegistry::new(vec![
            source("low", Priority::Low),
            source("normal-1", Priority::Normal),
            source("high", Priority::High),
            source("normal-2", Priority::Normal),
            source("off", Priority::High).disabled(),
        ])
        .unwrap();

        assert_eq!(
            registry.enabled_by_priority(),
            vec!["high", "normal-1", "normal-2", "low"]
        );
    }

    #[test]
    fn test_in_flight_guard() {
        let registry = SourceRegistry::new(vec![source("a", Priority::Normal)]).unwrap();
        let slot = registry.require("a").unwrap();

        let guard = slot.try_begin().unwrap();
        assert!(slot.is_in_flight());
        assert!(slot.try_begin().is_none());
        drop(guard);
        assert!(!slot.is_in_flight());
        assert!(slot.try_begin().is_some());
    }

    #[test]
    fn test_force_disable_transition() {
        let registry = SourceRegistry::new(vec![source("a", Priority::Normal)]).unwrap();
        let slot = registry.require("a").unwrap();
        assert!(slot.force_disable());
        assert!(!slot.force_disable());
        assert!(!slot.set_enabled(true));
        assert!(slot.is_enabled());
    }

    #[test]
    fn test_unknown_id() {
        let registry = SourceRegistry::new(vec![]).unwrap();
        assert!(registry.require("missing").unwrap_err().is_not_found());
    }
}
