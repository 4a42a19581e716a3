//! Execution data records and the store that collects them.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::result::{SondaError, SondaResult};

use super::probes::{ProbeArray, ProbeMode};

/// Recorded probe values of one unit, keyed by its content hash.
#[derive(Debug, Clone)]
pub struct ExecutionData {
    /// Content hash of the original unit bytes
    pub class_id: u64,
    /// Unit name, for diagnostics
    pub name: String,
    pub probes: ProbeArray,
}

impl ExecutionData {
    #[must_use]
    pub fn new(class_id: u64, name: impl Into<String>, probes: ProbeArray) -> Self {
        Self {
            class_id,
            name: name.into(),
            probes,
        }
    }

    /// Checks that `other` describes the same unit and probe layout.
    pub fn assert_compatibility(&self, other: &Self) -> SondaResult<()> {
        if self.class_id != other.class_id {
            return Err(SondaError::ClassIdMismatch {
                name: self.name.clone(),
                expected: self.class_id,
                actual: other.class_id,
            });
        }
        if self.name != other.name {
            return Err(SondaError::IncompatibleData {
                name: self.name.clone(),
                reason: format!("name {} vs {}", self.name, other.name),
            });
        }
        if self.probes.len() != other.probes.len() {
            return Err(SondaError::IncompatibleData {
                name: self.name.clone(),
                reason: format!(
                    "probe count {} vs {}",
                    self.probes.len(),
                    other.probes.len()
                ),
            });
        }
        Ok(())
    }

    /// Merges another record for the same unit into this one.
    pub fn merge(&mut self, other: &Self) -> SondaResult<()> {
        self.assert_compatibility(other)?;
        self.probes.merge(&other.probes, &self.name)
    }
}

/// Collects execution data across units and sessions.
///
/// The store is a passed-in capability: runtimes and readers receive a
/// reference rather than reaching for global state. A single lock covers
/// lookup, merge and snapshot so that snapshot-with-reset is atomic.
#[derive(Debug, Default)]
pub struct ProbeStore {
    entries: Mutex<HashMap<u64, ExecutionData>>,
}

impl ProbeStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges a record into the store, creating the entry on first sight.
    pub fn put(&self, data: ExecutionData) -> SondaResult<()> {
        let mut entries = self.entries.lock().map_err(lock_poisoned)?;
        match entries.get_mut(&data.class_id) {
            Some(existing) => existing.merge(&data),
            None => {
                entries.insert(data.class_id, data);
                Ok(())
            }
        }
    }

    /// Returns a copy of the record for `class_id`, if any.
    pub fn get(&self, class_id: u64) -> SondaResult<Option<ExecutionData>> {
        let entries = self.entries.lock().map_err(lock_poisoned)?;
        Ok(entries.get(&class_id).cloned())
    }

    /// Returns the record for `class_id`, creating a zeroed one on first
    /// access. Probe count and mode are fixed at creation.
    pub fn get_or_create(
        &self,
        class_id: u64,
        name: &str,
        mode: ProbeMode,
        probe_count: usize,
    ) -> SondaResult<ExecutionData> {
        let mut entries = self.entries.lock().map_err(lock_poisoned)?;
        let entry = entries.entry(class_id).or_insert_with(|| {
            ExecutionData::new(class_id, name, ProbeArray::new(mode, probe_count))
        });
        if entry.probes.len() != probe_count {
            return Err(SondaError::IncompatibleData {
                name: name.to_string(),
                reason: format!(
                    "probe count {} vs {}",
                    entry.probes.len(),
                    probe_count
                ),
            });
        }
        Ok(entry.clone())
    }

    /// Copies out all records, optionally resetting them in the same
    /// critical section so no hit is lost between copy and reset.
    pub fn snapshot(&self, reset: bool) -> SondaResult<Vec<ExecutionData>> {
        let mut entries = self.entries.lock().map_err(lock_poisoned)?;
        let mut all: Vec<ExecutionData> = entries.values().cloned().collect();
        all.sort_by_key(|d| d.class_id);
        if reset {
            for entry in entries.values_mut() {
                entry.probes.reset();
            }
        }
        Ok(all)
    }
}

fn lock_poisoned<T>(_: std::sync::PoisonError<T>) -> SondaError {
    SondaError::malformed("probe store lock poisoned")
}
