//! The search session: one run of the search process, spanning many test
//! executions, each spanning many probe invocations.
//!
//! All process-wide state of the engine lives here, explicitly owned, instead
//! of in globals: the objective recorder and the graph pool. This makes it
//! possible to run several independent sessions in one process (e.g. tests in
//! parallel), and gives resets an explicit home.

use std::sync::Arc;

use log::debug;

use crate::pool::GraphPool;
use crate::recorder::ObjectiveRecorder;
use crate::tracer::ExecutionTracer;

/// Owns the session-scoped registries and hands out per-execution tracers.
pub struct Session {
    recorder: Arc<ObjectiveRecorder>,
    graphs: Arc<GraphPool>,
}

impl Session {
    pub fn new() -> Self {
        let recorder = Arc::new(ObjectiveRecorder::new());
        let graphs = Arc::new(GraphPool::new(Arc::clone(&recorder)));
        Self { recorder, graphs }
    }

    pub fn recorder(&self) -> &Arc<ObjectiveRecorder> {
        &self.recorder
    }

    pub fn graphs(&self) -> &Arc<GraphPool> {
        &self.graphs
    }

    /// A fresh tracer for one test execution, sharing this session's
    /// recorder.
    pub fn tracer(&self) -> ExecutionTracer {
        ExecutionTracer::new(Arc::clone(&self.recorder))
    }

    /// Start a new search over the same loaded program: clear the archive
    /// and the id mapping, then rebuild the control-dependence exports so
    /// their numeric ids match the fresh mapping. Static targets reflect
    /// load-time facts and survive unless explicitly cleared.
    ///
    /// The controller must quiesce the program under test first; a reset
    /// racing an in-flight probe of a previous test is a protocol violation.
    pub fn reset_for_new_search(&self, also_clear_static_targets: bool) {
        debug!(
            "resetting session (clear_static_targets = {})",
            also_clear_static_targets
        );
        self.recorder.reset(also_clear_static_targets);
        self.graphs.refresh_exports();
    }
}

impl Default for Session {
    fn default() -> Self {
        Session::new()
    }
}
