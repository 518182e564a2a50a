//! Per-session registry of method graphs and the control-dependence export.
//!
//! Registration happens at class-loading time, which may be concurrent;
//! entries are keyed by (class, method, descriptor) so unrelated methods never
//! contend. The export log is append-only behind one coarse lock: exports are
//! rare compared to registrations, and an offset handed to a client stays
//! valid because entries are tombstoned, never removed or shifted.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use log::{debug, warn};

use crate::cdg::ControlDependenceGraph;
use crate::cfg::{ControlFlowGraph, GraphError, MethodKey, RawMethodGraph};
use crate::naming;
use crate::recorder::{ObjectiveId, ObjectiveRecorder};

/// Registration progress of one method, derived from which tables hold it.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum RegistrationState {
    Unregistered,
    RawBuilt,
    ActualBuilt,
    DependenceBuilt,
    Exported,
}

/// One objective of an exported control-dependence graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CdgObjective {
    pub id: ObjectiveId,
    pub descriptive_id: String,
}

/// Parent objective must be covered before the child becomes reachable.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct DependencyEdge {
    pub parent: ObjectiveId,
    pub child: ObjectiveId,
}

/// Flattened control-dependence graph of one method, ready for the search
/// client. Numeric ids come from the recorder's compaction table.
#[derive(Debug, Clone)]
pub struct CdgExport {
    pub key: MethodKey,
    pub objectives: Vec<CdgObjective>,
    pub root_ids: Vec<ObjectiveId>,
    pub edges: Vec<DependencyEdge>,
}

/// A slice of the export log, starting at the offset the client asked for.
/// `total` is the log length to pass as the next offset.
#[derive(Debug)]
pub struct CdgSnapshot {
    pub entries: Vec<CdgExport>,
    pub total: usize,
}

struct ExportSlot {
    key: MethodKey,
    superseded: bool,
    export: CdgExport,
}

/// Owns every graph computed for the session.
pub struct GraphPool {
    recorder: Arc<ObjectiveRecorder>,
    raw: RwLock<HashMap<MethodKey, RawMethodGraph>>,
    cfgs: RwLock<HashMap<MethodKey, Arc<ControlFlowGraph>>>,
    cdgs: RwLock<HashMap<MethodKey, Arc<ControlDependenceGraph>>>,
    export_log: Mutex<Vec<ExportSlot>>,
}

impl GraphPool {
    pub fn new(recorder: Arc<ObjectiveRecorder>) -> Self {
        Self {
            recorder,
            raw: RwLock::new(HashMap::new()),
            cfgs: RwLock::new(HashMap::new()),
            cdgs: RwLock::new(HashMap::new()),
            export_log: Mutex::new(Vec::new()),
        }
    }

    /// Run the whole registration pipeline for one method: validate and build
    /// the CFG, derive the CDG, register the method's static targets, and
    /// append its control-dependence export.
    ///
    /// Re-registering an already known key replaces the previous entry
    /// wholesale (class re-instrumentation); a malformed stream leaves every
    /// previously registered method untouched.
    pub fn register_method(&self, raw: RawMethodGraph) -> Result<RegistrationState, GraphError> {
        let key = raw.key.clone();

        let cfg = match ControlFlowGraph::build(&raw) {
            Ok(cfg) => Arc::new(cfg),
            Err(e) => {
                warn!("not registering {}: {}", key, e);
                return Err(e);
            }
        };
        self.raw.write().unwrap().insert(key.clone(), raw);
        self.cfgs.write().unwrap().insert(key.clone(), Arc::clone(&cfg));

        let cdg = Arc::new(ControlDependenceGraph::build(&cfg));
        self.cdgs.write().unwrap().insert(key.clone(), Arc::clone(&cdg));

        self.register_static_targets(&cfg);

        let export = self.build_export(&cfg, &cdg);
        let state = match export {
            Some(export) => {
                self.append_export(export);
                RegistrationState::Exported
            }
            None => RegistrationState::DependenceBuilt,
        };
        debug!("registered {} -> {:?}", key, state);
        Ok(state)
    }

    /// Everything this method statically promises: its class, its lines, and
    /// both outcomes of each of its two-way branches. Registering them up
    /// front lets coverage fractions account for never-executed objectives.
    fn register_static_targets(&self, cfg: &ControlFlowGraph) {
        let class = cfg.class_name();
        self.recorder
            .register_target(&naming::class_objective_name(class));

        let mut lines: Vec<u32> = cfg
            .blocks()
            .iter()
            .flat_map(|b| {
                (b.start_instruction_index()..=b.end_instruction_index())
                    .filter_map(|i| cfg.line_of_instruction(i))
            })
            .collect();
        lines.sort_unstable();
        lines.dedup();
        for line in lines {
            self.recorder
                .register_target(&naming::line_objective_name(class, line));
        }

        for (_, then_id, else_id) in self.branch_objective_ids(cfg) {
            self.recorder.register_target(&then_id);
            self.recorder.register_target(&else_id);
        }
    }

    /// Descriptive then/else ids for every two-way branch of the method. The
    /// branch position in the id is the branch's instruction index, which is
    /// also what probes report at run time.
    fn branch_objective_ids(&self, cfg: &ControlFlowGraph) -> Vec<(usize, String, String)> {
        cfg.branch_instruction_indices()
            .iter()
            .filter(|&&idx| cfg.two_way_outcomes(idx).is_some())
            .map(|&idx| {
                let line = cfg.line_of_instruction(idx).unwrap_or(0);
                let then_id = naming::branch_objective_name(cfg.class_name(), line, idx, true);
                let else_id = naming::branch_objective_name(cfg.class_name(), line, idx, false);
                (idx, then_id, else_id)
            })
            .collect()
    }

    fn build_export(
        &self,
        cfg: &ControlFlowGraph,
        cdg: &ControlDependenceGraph,
    ) -> Option<CdgExport> {
        let branch_ids = self.branch_objective_ids(cfg);
        if branch_ids.is_empty() {
            return None;
        }

        let mut objectives = Vec::with_capacity(branch_ids.len() * 2);
        let mut by_branch: HashMap<usize, (ObjectiveId, ObjectiveId)> = HashMap::new();
        for (idx, then_id, else_id) in &branch_ids {
            let then_mapped = self.recorder.mapped_id(then_id);
            let else_mapped = self.recorder.mapped_id(else_id);
            objectives.push(CdgObjective {
                id: then_mapped,
                descriptive_id: then_id.clone(),
            });
            objectives.push(CdgObjective {
                id: else_mapped,
                descriptive_id: else_id.clone(),
            });
            by_branch.insert(*idx, (then_mapped, else_mapped));
        }

        let mut root_ids = Vec::new();
        for &root in cdg.roots() {
            if let Some(&(then_mapped, else_mapped)) = by_branch.get(&root) {
                root_ids.push(then_mapped);
                root_ids.push(else_mapped);
            }
        }

        let mut edges = Vec::new();
        for (idx, _, _) in &branch_ids {
            let Some(&(child_then, child_else)) = by_branch.get(idx) else {
                continue;
            };
            for dep in cdg.dependencies_of(*idx) {
                let Some(&(parent_then, parent_else)) = by_branch.get(&dep.branch_instruction)
                else {
                    continue;
                };
                let parent = if dep.outcome { parent_then } else { parent_else };
                edges.push(DependencyEdge {
                    parent,
                    child: child_then,
                });
                edges.push(DependencyEdge {
                    parent,
                    child: child_else,
                });
            }
        }

        Some(CdgExport {
            key: cfg.key().clone(),
            objectives,
            root_ids,
            edges,
        })
    }

    fn append_export(&self, export: CdgExport) {
        let mut log = self.export_log.lock().unwrap();
        for slot in log.iter_mut() {
            if slot.key == export.key {
                slot.superseded = true;
            }
        }
        log.push(ExportSlot {
            key: export.key.clone(),
            superseded: false,
            export,
        });
    }

    /// Snapshot of the export log from `offset` on, skipping superseded
    /// entries. Safe to call while other threads keep registering; pass the
    /// returned `total` as the next offset to only receive what is new.
    pub fn export_from(&self, offset: usize) -> CdgSnapshot {
        let log = self.export_log.lock().unwrap();
        let start = offset.min(log.len());
        let entries = log[start..]
            .iter()
            .filter(|slot| !slot.superseded)
            .map(|slot| slot.export.clone())
            .collect();
        CdgSnapshot {
            entries,
            total: log.len(),
        }
    }

    /// Rebuild the whole export log from the stored CDGs, remapping objective
    /// ids through the recorder. Used after the recorder was reset for a new
    /// search: the old numeric ids are gone, so offsets restart at zero.
    pub fn refresh_exports(&self) {
        self.export_log.lock().unwrap().clear();
        let cdgs: Vec<(Arc<ControlFlowGraph>, Arc<ControlDependenceGraph>)> = {
            let cfgs = self.cfgs.read().unwrap();
            self.cdgs
                .read()
                .unwrap()
                .iter()
                .filter_map(|(key, cdg)| {
                    cfgs.get(key).map(|cfg| (Arc::clone(cfg), Arc::clone(cdg)))
                })
                .collect()
        };
        for (cfg, cdg) in cdgs {
            if let Some(export) = self.build_export(&cfg, &cdg) {
                self.append_export(export);
            }
        }
    }

    pub fn cfg(&self, key: &MethodKey) -> Option<Arc<ControlFlowGraph>> {
        self.cfgs.read().unwrap().get(key).cloned()
    }

    pub fn cdg(&self, key: &MethodKey) -> Option<Arc<ControlDependenceGraph>> {
        let found = self.cdgs.read().unwrap().get(key).cloned();
        if found.is_none() {
            warn!("no control-dependence graph registered for {}", key);
        }
        found
    }

    pub fn state(&self, key: &MethodKey) -> RegistrationState {
        let exported = self
            .export_log
            .lock()
            .unwrap()
            .iter()
            .any(|slot| !slot.superseded && slot.key == *key);
        if exported {
            RegistrationState::Exported
        } else if self.cdgs.read().unwrap().contains_key(key) {
            RegistrationState::DependenceBuilt
        } else if self.cfgs.read().unwrap().contains_key(key) {
            RegistrationState::ActualBuilt
        } else if self.raw.read().unwrap().contains_key(key) {
            RegistrationState::RawBuilt
        } else {
            RegistrationState::Unregistered
        }
    }

    /// Drop one method.
    pub fn clear_method(&self, key: &MethodKey) {
        self.raw.write().unwrap().remove(key);
        self.cfgs.write().unwrap().remove(key);
        self.cdgs.write().unwrap().remove(key);
        let mut log = self.export_log.lock().unwrap();
        for slot in log.iter_mut() {
            if slot.key == *key {
                slot.superseded = true;
            }
        }
    }

    /// Drop every method of one class.
    pub fn clear_class(&self, class_name: &str) {
        self.raw
            .write()
            .unwrap()
            .retain(|k, _| k.class_name != class_name);
        self.cfgs
            .write()
            .unwrap()
            .retain(|k, _| k.class_name != class_name);
        self.cdgs
            .write()
            .unwrap()
            .retain(|k, _| k.class_name != class_name);
        let mut log = self.export_log.lock().unwrap();
        for slot in log.iter_mut() {
            if slot.key.class_name == class_name {
                slot.superseded = true;
            }
        }
    }

    /// Drop everything, export log included.
    pub fn clear(&self) {
        self.raw.write().unwrap().clear();
        self.cfgs.write().unwrap().clear();
        self.cdgs.write().unwrap().clear();
        self.export_log.lock().unwrap().clear();
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;
    use crate::cfg::{EdgeKind, RawEdge, RawInstruction};

    fn insn(index: usize, line: u32) -> RawInstruction {
        RawInstruction {
            index,
            opcode: 0,
            line: Some(line),
        }
    }

    fn edge(source: usize, target: usize) -> RawEdge {
        RawEdge {
            source,
            target,
            kind: EdgeKind::Normal,
        }
    }

    /// One root branch at instruction 1 (line 11), one nested branch at
    /// instruction 2 (line 12) on the false path.
    fn nested_method(class: &str, method: &str) -> RawMethodGraph {
        RawMethodGraph {
            key: MethodKey::new(class, method, "()V"),
            instructions: (0..=6).map(|i| insn(i, 10 + i as u32)).collect(),
            edges: vec![
                edge(0, 1),
                edge(1, 2),
                edge(1, 6),
                edge(2, 3),
                edge(2, 4),
                edge(3, 5),
                edge(4, 5),
                edge(5, 6),
            ],
        }
    }

    fn straight_method(class: &str, method: &str) -> RawMethodGraph {
        RawMethodGraph {
            key: MethodKey::new(class, method, "()V"),
            instructions: (0..=2).map(|i| insn(i, 20 + i as u32)).collect(),
            edges: vec![edge(0, 1), edge(1, 2)],
        }
    }

    fn pool() -> (Arc<ObjectiveRecorder>, GraphPool) {
        let recorder = Arc::new(ObjectiveRecorder::new());
        let pool = GraphPool::new(Arc::clone(&recorder));
        (recorder, pool)
    }

    #[test]
    fn test_register_and_export() {
        let (recorder, pool) = pool();
        let raw = nested_method("Foo", "m");
        let key = raw.key.clone();

        let state = pool.register_method(raw).unwrap();
        assert_eq!(state, RegistrationState::Exported);
        assert_eq!(pool.state(&key), RegistrationState::Exported);

        let snapshot = pool.export_from(0);
        assert_eq!(snapshot.total, 1);
        assert_eq!(snapshot.entries.len(), 1);

        let export = &snapshot.entries[0];
        // two branches, two objectives each
        assert_eq!(export.objectives.len(), 4);
        // only the outer branch is a root
        assert_eq!(export.root_ids.len(), 2);
        // the nested branch depends on one outcome of the outer one, with
        // both of its objectives as children
        assert_eq!(export.edges.len(), 2);

        let outer_else = recorder.mapped_id(&naming::branch_objective_name("Foo", 11, 1, false));
        for edge in &export.edges {
            assert_eq!(edge.parent, outer_else);
        }

        // ids resolve back through the recorder
        for objective in &export.objectives {
            assert_eq!(
                recorder.descriptive_id(objective.id).as_deref(),
                Some(objective.descriptive_id.as_str())
            );
        }
    }

    #[test]
    fn test_static_targets_are_registered() {
        let (recorder, pool) = pool();
        pool.register_method(nested_method("Foo", "m")).unwrap();

        assert_eq!(recorder.number_of_registered_targets(naming::CLASS), 1);
        // lines 10..=16
        assert_eq!(recorder.number_of_registered_targets(naming::LINE), 7);
        assert_eq!(recorder.number_of_registered_targets(naming::BRANCH), 4);
        // nothing executed yet
        assert_eq!(recorder.compute_coverage(naming::BRANCH), 0.0);
    }

    #[test]
    fn test_method_without_branches_is_not_exported() {
        let (_, pool) = pool();
        let raw = straight_method("Foo", "straight");
        let key = raw.key.clone();

        let state = pool.register_method(raw).unwrap();
        assert_eq!(state, RegistrationState::DependenceBuilt);
        assert_eq!(pool.state(&key), RegistrationState::DependenceBuilt);
        assert_eq!(pool.export_from(0).total, 0);
    }

    #[test]
    fn test_incremental_export_offsets() {
        let (_, pool) = pool();
        pool.register_method(nested_method("Foo", "a")).unwrap();

        let first = pool.export_from(0);
        assert_eq!(first.entries.len(), 1);

        pool.register_method(nested_method("Foo", "b")).unwrap();

        let second = pool.export_from(first.total);
        assert_eq!(second.entries.len(), 1);
        assert_eq!(second.entries[0].key.method_name, "b");
        assert_eq!(second.total, 2);

        // nothing new
        assert!(pool.export_from(second.total).entries.is_empty());
    }

    #[test]
    fn test_reregistration_supersedes_old_export() {
        let (_, pool) = pool();
        let raw = nested_method("Foo", "m");
        let key = raw.key.clone();

        pool.register_method(raw.clone()).unwrap();
        pool.register_method(raw).unwrap();

        // a full export reflects only the latest version
        let snapshot = pool.export_from(0);
        assert_eq!(snapshot.entries.len(), 1);
        assert_eq!(snapshot.total, 2);
        assert_eq!(pool.state(&key), RegistrationState::Exported);
    }

    #[test]
    fn test_malformed_method_leaves_pool_intact() {
        let (_, pool) = pool();
        pool.register_method(nested_method("Foo", "good")).unwrap();

        let bad = RawMethodGraph {
            key: MethodKey::new("Foo", "bad", "()V"),
            instructions: vec![insn(0, 1)],
            edges: vec![edge(0, 99)],
        };
        let err = pool.register_method(bad).unwrap_err();
        assert_eq!(err, GraphError::DanglingEdge { source: 0, target: 99 });

        assert_eq!(
            pool.state(&MethodKey::new("Foo", "bad", "()V")),
            RegistrationState::Unregistered
        );
        assert_eq!(
            pool.state(&MethodKey::new("Foo", "good", "()V")),
            RegistrationState::Exported
        );
        assert_eq!(pool.export_from(0).entries.len(), 1);
    }

    #[test]
    fn test_cfg_and_cdg_lookup() {
        let (_, pool) = pool();
        let raw = nested_method("Foo", "m");
        let key = raw.key.clone();
        pool.register_method(raw).unwrap();

        let cfg = pool.cfg(&key).unwrap();
        assert_eq!(cfg.branch_instruction_indices().len(), 2);
        let cdg = pool.cdg(&key).unwrap();
        assert_eq!(cdg.roots().len(), 1);

        let unknown = MethodKey::new("Foo", "nope", "()V");
        assert!(pool.cfg(&unknown).is_none());
        assert!(pool.cdg(&unknown).is_none());
    }

    #[test]
    fn test_clearing() {
        let (_, pool) = pool();
        let a = nested_method("Foo", "a");
        let b = nested_method("Foo", "b");
        let c = nested_method("Bar", "c");
        let (ka, kb, kc) = (a.key.clone(), b.key.clone(), c.key.clone());
        pool.register_method(a).unwrap();
        pool.register_method(b).unwrap();
        pool.register_method(c).unwrap();

        pool.clear_method(&ka);
        assert_eq!(pool.state(&ka), RegistrationState::Unregistered);
        assert_eq!(pool.state(&kb), RegistrationState::Exported);

        pool.clear_class("Foo");
        assert_eq!(pool.state(&kb), RegistrationState::Unregistered);
        assert_eq!(pool.state(&kc), RegistrationState::Exported);
        assert_eq!(pool.export_from(0).entries.len(), 1);

        pool.clear();
        assert_eq!(pool.state(&kc), RegistrationState::Unregistered);
        assert_eq!(pool.export_from(0).total, 0);
    }

    #[test]
    fn test_refresh_exports_after_recorder_reset() {
        let (recorder, pool) = pool();
        pool.register_method(nested_method("Foo", "m")).unwrap();
        let before = pool.export_from(0);

        recorder.reset(false);
        pool.refresh_exports();

        let after = pool.export_from(0);
        assert_eq!(after.entries.len(), 1);
        assert_eq!(after.total, 1);
        // same descriptive ids, freshly compacted numeric ids
        assert_eq!(
            before.entries[0]
                .objectives
                .iter()
                .map(|o| o.descriptive_id.clone())
                .collect::<Vec<_>>(),
            after.entries[0]
                .objectives
                .iter()
                .map(|o| o.descriptive_id.clone())
                .collect::<Vec<_>>()
        );
        for objective in &after.entries[0].objectives {
            assert_eq!(
                recorder.descriptive_id(objective.id).as_deref(),
                Some(objective.descriptive_id.as_str())
            );
        }
    }
}
