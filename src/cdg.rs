//! Control dependence between branch outcomes.
//!
//! A block is control-dependent on a branch outcome when it is reachable
//! through that outcome's successor but not through the other one. Applied to
//! the branch blocks themselves, this yields a DAG from *root* objectives
//! (branches reachable unconditionally) down through nested branch outcomes.
//! The search consumes this DAG, not the raw CFG: an uncovered branch is only
//! plausibly reachable next once its controlling ancestor has been taken the
//! right way.

use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};

use crate::block::BlockId;
use crate::cfg::{ControlFlowGraph, MethodKey};

/// "Reaching this objective requires `branch_instruction` to resolve with
/// `outcome`."
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct ControlDependency {
    /// Instruction index of the controlling branch.
    pub branch_instruction: usize,
    /// Required outcome of that branch.
    pub outcome: bool,
}

/// Read-only dependence view derived from exactly one [`ControlFlowGraph`].
#[derive(Debug)]
pub struct ControlDependenceGraph {
    key: MethodKey,
    /// Per two-way branch instruction, the set of controlling dependencies.
    dependencies: BTreeMap<usize, BTreeSet<ControlDependency>>,
    /// Branches with no dependency at all.
    roots: BTreeSet<usize>,
}

impl ControlDependenceGraph {
    pub fn build(cfg: &ControlFlowGraph) -> Self {
        // Reachable block sets along each outcome of each two-way branch.
        let mut outcome_reach: Vec<(usize, bool, HashSet<BlockId>)> = Vec::new();
        let mut two_way: Vec<usize> = Vec::new();
        for &branch in cfg.branch_instruction_indices() {
            let Some(outcomes) = cfg.two_way_outcomes(branch) else {
                continue;
            };
            two_way.push(branch);
            outcome_reach.push((branch, true, reachable_from(cfg, outcomes.on_true)));
            outcome_reach.push((branch, false, reachable_from(cfg, outcomes.on_false)));
        }

        let mut dependencies: BTreeMap<usize, BTreeSet<ControlDependency>> =
            two_way.iter().map(|&b| (b, BTreeSet::new())).collect();

        for &(parent, outcome, ref reach) in &outcome_reach {
            let other: &HashSet<BlockId> = outcome_reach
                .iter()
                .find(|(b, o, _)| *b == parent && *o != outcome)
                .map(|(_, _, r)| r)
                .expect("both outcomes are always recorded");

            for &child in &two_way {
                if child == parent {
                    continue;
                }
                let child_block = cfg
                    .block_id_for_instruction(child)
                    .expect("branch instruction belongs to a block");
                if reach.contains(&child_block) && !other.contains(&child_block) {
                    dependencies.get_mut(&child).unwrap().insert(ControlDependency {
                        branch_instruction: parent,
                        outcome,
                    });
                }
            }
        }

        let roots = dependencies
            .iter()
            .filter(|(_, deps)| deps.is_empty())
            .map(|(&b, _)| b)
            .collect();

        Self {
            key: cfg.key().clone(),
            dependencies,
            roots,
        }
    }

    pub fn key(&self) -> &MethodKey {
        &self.key
    }

    /// Dependencies that must hold before the given branch is reachable.
    /// Empty for roots and for instructions that are not two-way branches.
    pub fn dependencies_of(&self, branch_instruction: usize) -> &BTreeSet<ControlDependency> {
        static EMPTY: BTreeSet<ControlDependency> = BTreeSet::new();
        self.dependencies.get(&branch_instruction).unwrap_or(&EMPTY)
    }

    /// Branch instructions reachable without resolving any other branch.
    pub fn roots(&self) -> &BTreeSet<usize> {
        &self.roots
    }

    /// All two-way branches this graph knows about.
    pub fn branches(&self) -> impl Iterator<Item = usize> + '_ {
        self.dependencies.keys().copied()
    }
}

fn reachable_from(cfg: &ControlFlowGraph, start: BlockId) -> HashSet<BlockId> {
    let mut seen = HashSet::new();
    let mut queue = VecDeque::new();
    seen.insert(start);
    queue.push_back(start);
    while let Some(id) = queue.pop_front() {
        for &succ in cfg.block(id).successors() {
            if seen.insert(succ) {
                queue.push_back(succ);
            }
        }
    }
    seen
}
