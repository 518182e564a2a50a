//! Per-execution coverage tracing.
//!
//! One `ExecutionTracer` scores one test execution: probes injected into the
//! program under test call into it with raw operand values, it computes the
//! corresponding [`Truthness`] and keeps the best heuristic value observed per
//! objective during that single execution. Every update is also forwarded to
//! the session-wide [`ObjectiveRecorder`], whose archive is independent and
//! monotonic across executions.
//!
//! Probes may fire on whatever threads the program under test uses to serve
//! one test, so all methods take `&self` and the per-execution map keeps its
//! max atomically under one lock. `reset` must be called between tests, with
//! the program quiesced.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use crate::jumps::{
    for_null_comparison, for_ref_comparison, for_single_value_jump, for_value_comparison,
    BinaryCmp, NullCmp, RefCmp, UnaryCmp,
};
use crate::naming;
use crate::recorder::{ObjectiveId, ObjectiveRecorder, TargetInfo};
use crate::truthness::Truthness;

/// Tracks what a single test execution covers.
pub struct ExecutionTracer {
    recorder: Arc<ObjectiveRecorder>,
    /// Keyed by the descriptive id of the objective.
    objective_coverage: Mutex<HashMap<String, TargetInfo>>,
    /// A test is composed of one or more actions (e.g. HTTP calls); updates
    /// are stamped with the action that produced them.
    action_index: AtomicU32,
}

impl ExecutionTracer {
    pub fn new(recorder: Arc<ObjectiveRecorder>) -> Self {
        Self {
            recorder,
            objective_coverage: Mutex::new(HashMap::new()),
            action_index: AtomicU32::new(0),
        }
    }

    /// Clear all per-execution state. Must be called before each test
    /// execution; the session-wide recorder is left untouched.
    pub fn reset(&self) {
        self.objective_coverage.lock().unwrap().clear();
        self.action_index.store(0, Ordering::Relaxed);
    }

    /// Mark that subsequent updates belong to the `index`-th action of the
    /// current test.
    pub fn set_action_index(&self, index: u32) {
        self.action_index.store(index, Ordering::Relaxed);
    }

    pub fn action_index(&self) -> u32 {
        self.action_index.load(Ordering::Relaxed)
    }

    /// Shared update primitive: keep the per-execution maximum and forward to
    /// the recorder unconditionally.
    ///
    /// # Panics
    ///
    /// Panics if `value` is outside `[0,1]` or the id is empty.
    fn update_objective(&self, descriptive_id: &str, value: f64) {
        assert!(!descriptive_id.is_empty(), "Empty objective id");
        assert!(
            (0.0..=1.0).contains(&value),
            "Invalid value {} out of range [0,1]",
            value
        );

        let action_index = self.action_index();
        {
            let mut coverage = self.objective_coverage.lock().unwrap();
            match coverage.get_mut(descriptive_id) {
                // A target can be reached several times within one execution;
                // keep the best value found so far.
                Some(info) => {
                    if value > info.value {
                        info.value = value;
                        info.action_index = action_index;
                    }
                }
                None => {
                    coverage.insert(
                        descriptive_id.to_string(),
                        TargetInfo {
                            descriptive_id: descriptive_id.to_string(),
                            value,
                            action_index,
                        },
                    );
                }
            }
        }

        self.recorder.update(descriptive_id, value, action_index);
    }

    /// Report that a given line has been executed. Covers both the line
    /// objective and the class objective.
    pub fn executed_line(&self, class_name: &str, line: u32) {
        self.update_objective(&naming::line_objective_name(class_name, line), 1.0);
        self.update_objective(&naming::class_objective_name(class_name), 1.0);
    }

    /// Report whether a method call completed without throwing. A call that
    /// threw still scores 0.5: reached-but-failed beats never-reached.
    pub fn executing_method(&self, class_name: &str, line: u32, index: usize, completed: bool) {
        let id = naming::success_call_objective_name(class_name, line, index);
        self.update_objective(&id, if completed { 1.0 } else { 0.5 });
    }

    /// Report the three heuristic values of a three-way numeric comparison
    /// (e.g. comparing longs or doubles before a jump on the sign).
    pub fn executed_numeric_comparison(&self, id_template: &str, lt: f64, eq: f64, gt: f64) {
        self.update_objective(&naming::numeric_comparison_objective_name(id_template, -1), lt);
        self.update_objective(&naming::numeric_comparison_objective_name(id_template, 0), eq);
        self.update_objective(&naming::numeric_comparison_objective_name(id_template, 1), gt);
    }

    /// Record one evaluated branch condition. Derives the two outcome
    /// objectives and feeds the truthness pair to both.
    ///
    /// Note the inversion: given `if (x > 0) {}`, the jump goes to the "else"
    /// branch when the condition is false, i.e. the evaluated jump condition
    /// is the negation of the source-level one. The "else" objective therefore
    /// receives `of_true` and the "then" objective `of_false`.
    pub fn record_branch_outcome(
        &self,
        class_name: &str,
        line: u32,
        branch_id: usize,
        t: Truthness,
    ) {
        let for_then = naming::branch_objective_name(class_name, line, branch_id, true);
        let for_else = naming::branch_objective_name(class_name, line, branch_id, false);

        self.update_objective(&for_else, t.of_true());
        self.update_objective(&for_then, t.of_false());
    }

    /// Probe for a jump testing a single value against zero.
    pub fn executing_branch_jump_unary(
        &self,
        value: i64,
        cmp: UnaryCmp,
        class_name: &str,
        line: u32,
        branch_id: usize,
    ) {
        let t = for_single_value_jump(value, cmp);
        self.record_branch_outcome(class_name, line, branch_id, t);
    }

    /// Probe for a jump comparing two values.
    pub fn executing_branch_jump_binary(
        &self,
        first: i64,
        second: i64,
        cmp: BinaryCmp,
        class_name: &str,
        line: u32,
        branch_id: usize,
    ) {
        let t = for_value_comparison(first, second, cmp);
        self.record_branch_outcome(class_name, line, branch_id, t);
    }

    /// Probe for a jump comparing two references for identity.
    pub fn executing_branch_jump_ref(
        &self,
        same: bool,
        cmp: RefCmp,
        class_name: &str,
        line: u32,
        branch_id: usize,
    ) {
        let t = for_ref_comparison(same, cmp);
        self.record_branch_outcome(class_name, line, branch_id, t);
    }

    /// Probe for a null-check jump.
    pub fn executing_branch_jump_null(
        &self,
        is_null: bool,
        cmp: NullCmp,
        class_name: &str,
        line: u32,
        branch_id: usize,
    ) {
        let t = for_null_comparison(is_null, cmp);
        self.record_branch_outcome(class_name, line, branch_id, t);
    }

    // ---- queries on the per-execution state ----------------------------

    /// Number of objectives encountered during this execution whose id starts
    /// with `prefix` (`""` matches everything).
    pub fn number_of_objectives(&self, prefix: &str) -> usize {
        self.objective_coverage
            .lock()
            .unwrap()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .count()
    }

    /// Objectives encountered but not fully covered during this execution.
    ///
    /// Only objectives encountered so far can be reported, so this is
    /// relative to the executed parts of the program, not its whole code.
    pub fn non_covered_objectives(&self, prefix: &str) -> HashSet<String> {
        self.objective_coverage
            .lock()
            .unwrap()
            .iter()
            .filter(|(k, info)| k.starts_with(prefix) && info.value < 1.0)
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Best value observed for the objective during this execution.
    pub fn value(&self, descriptive_id: &str) -> Option<f64> {
        self.objective_coverage
            .lock()
            .unwrap()
            .get(descriptive_id)
            .map(|info| info.value)
    }

    /// Per-execution state of the requested objectives, resolved through the
    /// recorder's id-compaction table. `None` for ids never mapped or not
    /// encountered in this execution.
    pub fn target_infos(&self, ids: &[ObjectiveId]) -> Vec<Option<TargetInfo>> {
        let coverage = self.objective_coverage.lock().unwrap();
        ids.iter()
            .map(|&id| {
                let descriptive = self.recorder.descriptive_id(id)?;
                coverage.get(&descriptive).cloned()
            })
            .collect()
    }
}
