//! Session-wide archive of the best value ever observed per coverage
//! objective, spanning every test execution of a search.
//!
//! Besides the archive itself the recorder owns two auxiliary structures:
//!
//! - an id-compaction table mapping descriptive string ids to small numeric
//!   ids (stable for the lifetime of the session, never reused), so that
//!   cross-execution references stay cheap and valid;
//! - a "first seen" queue, drained by the search client, so newly discovered
//!   objectives are communicated exactly once.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Mutex;

use log::debug;

/// Compact numeric id of a coverage objective, assigned by the recorder.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct ObjectiveId(u32);

impl ObjectiveId {
    pub fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ObjectiveId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Best observed state of one objective.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetInfo {
    pub descriptive_id: String,
    /// Best heuristic value in `[0,1]`; 1 means fully covered.
    pub value: f64,
    /// Index of the test action that first achieved `value`.
    pub action_index: u32,
}

#[derive(Debug, Clone, Copy)]
struct ArchiveEntry {
    value: f64,
    action_index: u32,
}

#[derive(Default)]
struct IdMapping {
    by_name: HashMap<String, ObjectiveId>,
    names: Vec<String>,
}

impl IdMapping {
    fn get_or_assign(&mut self, descriptive_id: &str) -> ObjectiveId {
        if let Some(&id) = self.by_name.get(descriptive_id) {
            return id;
        }
        let id = ObjectiveId(self.names.len() as u32);
        self.names.push(descriptive_id.to_string());
        self.by_name.insert(descriptive_id.to_string(), id);
        id
    }
}

/// The multi-execution objective archive.
///
/// All methods take `&self`; internal maps are behind mutexes so probes on
/// concurrent SUT threads can update freely. Resets must not race with
/// in-flight updates of a previous test; quiescing the SUT before a reset is
/// the controller's responsibility.
pub struct ObjectiveRecorder {
    archive: Mutex<HashMap<ObjectiveId, ArchiveEntry>>,
    mapping: Mutex<IdMapping>,
    first_seen: Mutex<Vec<String>>,
    /// Objectives known to exist statically, whether or not ever executed.
    static_targets: Mutex<HashSet<String>>,
}

impl ObjectiveRecorder {
    /// Default capacity of the archive. Even mid-sized programs easily reach
    /// tens of thousands of objectives.
    pub const DEFAULT_CAPACITY: usize = 65_536;

    pub fn new() -> Self {
        Self::with_capacity(Self::DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            archive: Mutex::new(HashMap::with_capacity(capacity)),
            mapping: Mutex::new(IdMapping::default()),
            first_seen: Mutex::new(Vec::new()),
            static_targets: Mutex::new(HashSet::with_capacity(capacity)),
        }
    }

    /// Declare that an objective statically exists, independently of whether
    /// it is ever covered. Used to compute coverage fractions that include
    /// never-executed objectives.
    ///
    /// # Panics
    ///
    /// Panics if the id is empty.
    pub fn register_target(&self, descriptive_id: &str) {
        assert!(!descriptive_id.is_empty(), "Empty objective id");
        self.static_targets
            .lock()
            .unwrap()
            .insert(descriptive_id.to_string());
    }

    /// Record an observed heuristic value for an objective, keeping the
    /// maximum over the whole session. The first time an id is seen it is
    /// also appended to the first-seen queue.
    ///
    /// # Panics
    ///
    /// Panics if the id is empty or the value is outside `[0,1]`.
    pub fn update(&self, descriptive_id: &str, value: f64, action_index: u32) {
        assert!(!descriptive_id.is_empty(), "Empty objective id");
        assert!(
            (0.0..=1.0).contains(&value),
            "Invalid value {} out of range [0,1]",
            value
        );

        let id = self.mapped_id(descriptive_id);

        let mut archive = self.archive.lock().unwrap();
        match archive.get_mut(&id) {
            Some(entry) => {
                if value > entry.value {
                    entry.value = value;
                    entry.action_index = action_index;
                }
            }
            None => {
                debug!("new objective encountered: {}", descriptive_id);
                archive.insert(
                    id,
                    ArchiveEntry {
                        value,
                        action_index,
                    },
                );
                self.first_seen
                    .lock()
                    .unwrap()
                    .push(descriptive_id.to_string());
            }
        }
    }

    /// Compact id for a descriptive id, assigning a fresh one if needed.
    /// The mapping is stable: ids are never reused within a session.
    pub fn mapped_id(&self, descriptive_id: &str) -> ObjectiveId {
        self.mapping.lock().unwrap().get_or_assign(descriptive_id)
    }

    /// Reverse lookup of the compaction table.
    pub fn descriptive_id(&self, id: ObjectiveId) -> Option<String> {
        self.mapping
            .lock()
            .unwrap()
            .names
            .get(id.0 as usize)
            .cloned()
    }

    /// Best value recorded for the objective, if it was ever updated.
    pub fn best_value(&self, descriptive_id: &str) -> Option<f64> {
        let id = *self.mapping.lock().unwrap().by_name.get(descriptive_id)?;
        self.archive.lock().unwrap().get(&id).map(|e| e.value)
    }

    /// Best known state for a numeric id.
    pub fn target_info(&self, id: ObjectiveId) -> Option<TargetInfo> {
        let descriptive_id = self.descriptive_id(id)?;
        let entry = *self.archive.lock().unwrap().get(&id)?;
        Some(TargetInfo {
            descriptive_id,
            value: entry.value,
            action_index: entry.action_index,
        })
    }

    /// Return and clear the queue of objectives seen for the first time since
    /// the previous drain.
    pub fn drain_first_seen(&self) -> Vec<String> {
        std::mem::take(&mut *self.first_seen.lock().unwrap())
    }

    /// Registered (static) targets whose id starts with `prefix`.
    pub fn registered_targets(&self, prefix: &str) -> Vec<String> {
        let mut targets: Vec<String> = self
            .static_targets
            .lock()
            .unwrap()
            .iter()
            .filter(|t| t.starts_with(prefix))
            .cloned()
            .collect();
        targets.sort();
        targets
    }

    pub fn number_of_registered_targets(&self, prefix: &str) -> usize {
        self.static_targets
            .lock()
            .unwrap()
            .iter()
            .filter(|t| t.starts_with(prefix))
            .count()
    }

    /// Fraction of registered targets under `prefix` whose best recorded
    /// value is exactly 1. Vacuously 1 if no targets match.
    pub fn compute_coverage(&self, prefix: &str) -> f64 {
        let targets = self.registered_targets(prefix);
        if targets.is_empty() {
            return 1.0;
        }

        let mapping = self.mapping.lock().unwrap();
        let archive = self.archive.lock().unwrap();
        let covered = targets
            .iter()
            .filter(|t| {
                mapping
                    .by_name
                    .get(*t)
                    .and_then(|id| archive.get(id))
                    .is_some_and(|e| e.value == 1.0)
            })
            .count();

        covered as f64 / targets.len() as f64
    }

    /// Clear the archive, the id mapping, and the first-seen queue. The
    /// static target set reflects load-time facts about the program, not
    /// execution results, so it is only cleared when explicitly requested.
    pub fn reset(&self, also_clear_static_targets: bool) {
        self.archive.lock().unwrap().clear();
        {
            let mut mapping = self.mapping.lock().unwrap();
            mapping.by_name.clear();
            mapping.names.clear();
        }
        self.first_seen.lock().unwrap().clear();
        if also_clear_static_targets {
            self.static_targets.lock().unwrap().clear();
        }
    }
}

impl Default for ObjectiveRecorder {
    fn default() -> Self {
        Self::new()
    }
}
