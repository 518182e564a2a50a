//! # landscape-rs: fitness landscapes for search-based test generation
//!
//! **`landscape-rs`** turns the binary pass/fail branch outcomes of a program
//! under test into continuous, gradient-bearing signals ("truthness") that a
//! search algorithm can climb, and organizes all discovered coverage
//! objectives (lines, branch outcomes, method-call successes) into a
//! control-dependence structure that tells the search which objectives are
//! plausibly reachable next.
//!
//! ## How it fits together
//!
//! Probes injected into the program under test call into an
//! [`ExecutionTracer`][crate::tracer::ExecutionTracer] with the raw operand
//! values of each conditional test. The [`jumps`] heuristics turn those into a
//! [`Truthness`][crate::truthness::Truthness] pair, the tracer keeps the best
//! value per objective for the current test execution, and forwards every
//! update to the session-wide
//! [`ObjectiveRecorder`][crate::recorder::ObjectiveRecorder] archive.
//! Independently, a class-loading hook hands each analyzed method's
//! instruction stream to the [`GraphPool`][crate::pool::GraphPool], which
//! builds its [`ControlFlowGraph`][crate::cfg::ControlFlowGraph] and
//! [`ControlDependenceGraph`][crate::cdg::ControlDependenceGraph] and appends
//! a flattened export the search client fetches incrementally.
//!
//! All of this state is owned by one [`Session`][crate::session::Session];
//! several sessions can coexist in one process.
//!
//! ## Quick start
//!
//! ```
//! use landscape_rs::jumps::UnaryCmp;
//! use landscape_rs::session::Session;
//!
//! let session = Session::new();
//! let tracer = session.tracer();
//!
//! // a probe reports: "the jump tested `value == 0` with value = 5"
//! tracer.executing_branch_jump_unary(5, UnaryCmp::Eq, "com.example.Foo", 10, 0);
//!
//! // the untaken outcome got partial credit: gradient for the search
//! let non_covered = tracer.non_covered_objectives("Branch");
//! assert_eq!(non_covered.len(), 1);
//! ```
//!
//! ## Core components
//!
//! - **[`distance`]**: numeric distance primitives and `[0,1]` normalization.
//! - **[`truthness`]**: the `(of_true, of_false)` pair and its builders.
//! - **[`jumps`]**: per-comparison-kind truthness for conditional jumps.
//! - **[`scalar`]**: distances between heterogeneous scalar operands.
//! - **[`naming`]**: the descriptive-id scheme for objectives.
//! - **[`tracer`] / [`recorder`]**: per-execution and per-session coverage.
//! - **[`block`] / [`cfg`] / [`cdg`] / [`pool`]**: the static graph model.
//! - **[`session`]**: explicit owner of everything above.

pub mod block;
pub mod cdg;
pub mod cfg;
pub mod distance;
pub mod jumps;
pub mod naming;
pub mod pool;
pub mod recorder;
pub mod scalar;
pub mod session;
pub mod tracer;
pub mod truthness;
