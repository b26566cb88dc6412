//! Registry of units currently attached to events.
//!
//! # Design
//! - Explicitly owned and shared through `Arc`; every access goes through
//!   the methods below, which hold the lock only for the copy or mutation.
//! - Each registration gets a generation number. Probe-driven eviction names
//!   the generation it probed, so a unit that re-registers mid-cycle survives.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use telematic_core::RegisteredUnit;

/// One registry entry together with the registration it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct RegistryEntry {
    /// Registered unit.
    pub unit: RegisteredUnit,
    /// Registration generation; increases with every upsert.
    pub generation: u64,
}

#[derive(Default)]
struct RegistryState {
    entries: HashMap<String, RegistryEntry>,
    next_generation: u64,
}

/// Concurrent map of registered units keyed by unit id.
#[derive(Default)]
pub struct UnitRegistry {
    state: RwLock<RegistryState>,
}

impl UnitRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, RegistryState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, RegistryState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert or replace the entry for `unit.unit_id`; returns its generation.
    pub fn upsert(&self, unit: RegisteredUnit) -> u64 {
        let mut state = self.write();
        state.next_generation += 1;
        let generation = state.next_generation;
        state
            .entries
            .insert(unit.unit_id.clone(), RegistryEntry { unit, generation });
        generation
    }

    /// Remove a unit regardless of generation. Absent ids are a no-op.
    pub fn remove(&self, unit_id: &str) -> bool {
        self.write().entries.remove(unit_id).is_some()
    }

    /// Remove a unit only if it is still the registration `generation`.
    pub fn evict(&self, unit_id: &str, generation: u64) -> bool {
        let mut state = self.write();
        match state.entries.get(unit_id) {
            Some(entry) if entry.generation == generation => {
                state.entries.remove(unit_id);
                true
            }
            _ => false,
        }
    }

    /// Current entry for one unit.
    #[must_use]
    pub fn get(&self, unit_id: &str) -> Option<RegisteredUnit> {
        self.read().entries.get(unit_id).map(|entry| entry.unit.clone())
    }

    /// Point-in-time copy of all entries in registration order.
    #[must_use]
    pub fn entries(&self) -> Vec<RegistryEntry> {
        let mut entries: Vec<RegistryEntry> = self.read().entries.values().cloned().collect();
        entries.sort_by_key(|entry| entry.generation);
        entries
    }

    /// Point-in-time copy of all units in registration order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<RegisteredUnit> {
        self.entries().into_iter().map(|entry| entry.unit).collect()
    }

    /// Number of registered units.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read().entries.len()
    }

    /// Whether no unit is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().entries.is_empty()
    }
}
