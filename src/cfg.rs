//! Control-flow graph of one method body.
//!
//! The input is a linear stream of instruction indices with opcodes and
//! optional source lines, plus the control-transfer edges between them
//! (normal flow and exceptional flow marked distinctly). How instructions are
//! discovered or rewritten is not this crate's concern; a class-loading hook
//! supplies the stream once per method, before any probe for that method can
//! fire.
//!
//! Building partitions the stream into [`BasicBlock`]s using the standard
//! leader rules: a block begins at the first instruction, at every jump
//! target, and right after every instruction that can transfer control
//! elsewhere. Only instructions with two or more distinct normal successors
//! are recorded as branches; the goto family has exactly one successor and no
//! control-dependence meaning.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;

use log::debug;

use crate::block::{BasicBlock, BlockId};

/// Unique identity of a method: class, method, descriptor.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct MethodKey {
    pub class_name: String,
    pub method_name: String,
    pub descriptor: String,
}

impl MethodKey {
    pub fn new(
        class_name: impl Into<String>,
        method_name: impl Into<String>,
        descriptor: impl Into<String>,
    ) -> Self {
        Self {
            class_name: class_name.into(),
            method_name: method_name.into(),
            descriptor: descriptor.into(),
        }
    }
}

impl fmt::Display for MethodKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}{}",
            self.class_name, self.method_name, self.descriptor
        )
    }
}

/// Kind of a control-transfer edge.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum EdgeKind {
    /// Fall-through or jump.
    Normal,
    /// Transfer into an exception handler.
    Exception,
}

/// One instruction of the raw stream. Indices need not be dense, but must be
/// unique; stream order is ascending index order.
#[derive(Debug, Copy, Clone)]
pub struct RawInstruction {
    pub index: usize,
    pub opcode: u16,
    pub line: Option<u32>,
}

/// One control-transfer edge between instruction indices.
#[derive(Debug, Copy, Clone)]
pub struct RawEdge {
    pub source: usize,
    pub target: usize,
    pub kind: EdgeKind,
}

/// The per-method input handed over by the class-loading hook.
#[derive(Debug, Clone)]
pub struct RawMethodGraph {
    pub key: MethodKey,
    pub instructions: Vec<RawInstruction>,
    pub edges: Vec<RawEdge>,
}

/// A malformed instruction stream. The offending method is simply not
/// registered; graphs of other methods are never affected.
#[derive(Debug, PartialEq, Eq)]
pub enum GraphError {
    MissingIdentity,
    EmptyInstructionStream,
    DuplicateInstruction(usize),
    DanglingEdge { source: usize, target: usize },
}

impl fmt::Display for GraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GraphError::MissingIdentity => write!(f, "missing class/method identity"),
            GraphError::EmptyInstructionStream => write!(f, "empty instruction stream"),
            GraphError::DuplicateInstruction(index) => {
                write!(f, "duplicate instruction index {index}")
            }
            GraphError::DanglingEdge { source, target } => write!(
                f,
                "edge {source} -> {target} references an unknown instruction"
            ),
        }
    }
}

impl std::error::Error for GraphError {}

/// The two block-level outcomes of a two-way branch.
///
/// By convention the fall-through successor is the *false* outcome and the
/// jump target the *true* one.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct BranchOutcomes {
    pub on_true: BlockId,
    pub on_false: BlockId,
}

impl BranchOutcomes {
    /// The successor block for the given outcome.
    pub fn successor(&self, outcome: bool) -> BlockId {
        if outcome {
            self.on_true
        } else {
            self.on_false
        }
    }
}

/// Block-structured view of one method.
pub struct ControlFlowGraph {
    key: MethodKey,
    /// Arena of blocks; `BlockId` is the index into this vector.
    blocks: Vec<BasicBlock>,
    entry_block: BlockId,
    instruction_to_block: HashMap<usize, BlockId>,
    instruction_to_line: HashMap<usize, u32>,
    line_to_instructions: BTreeMap<u32, Vec<usize>>,
    instruction_to_opcode: HashMap<usize, u16>,
    branch_instructions: BTreeSet<usize>,
    branch_outcomes: HashMap<usize, BranchOutcomes>,
}

impl ControlFlowGraph {
    /// Partition the raw stream into blocks and index everything.
    pub fn build(raw: &RawMethodGraph) -> Result<Self, GraphError> {
        if raw.key.class_name.is_empty() || raw.key.method_name.is_empty() {
            return Err(GraphError::MissingIdentity);
        }
        if raw.instructions.is_empty() {
            return Err(GraphError::EmptyInstructionStream);
        }

        let mut ordered: Vec<usize> = raw.instructions.iter().map(|i| i.index).collect();
        ordered.sort_unstable();
        for pair in ordered.windows(2) {
            if pair[0] == pair[1] {
                return Err(GraphError::DuplicateInstruction(pair[0]));
            }
        }

        let known: HashSet<usize> = ordered.iter().copied().collect();
        for edge in &raw.edges {
            if !known.contains(&edge.source) || !known.contains(&edge.target) {
                return Err(GraphError::DanglingEdge {
                    source: edge.source,
                    target: edge.target,
                });
            }
        }

        debug!(
            "building CFG for {} ({} instructions, {} edges)",
            raw.key,
            raw.instructions.len(),
            raw.edges.len()
        );

        let next_of: HashMap<usize, usize> = ordered
            .windows(2)
            .map(|pair| (pair[0], pair[1]))
            .collect();

        let mut normal_successors: HashMap<usize, BTreeSet<usize>> = HashMap::new();
        let mut exception_successors: HashMap<usize, BTreeSet<usize>> = HashMap::new();
        for edge in &raw.edges {
            let map = match edge.kind {
                EdgeKind::Normal => &mut normal_successors,
                EdgeKind::Exception => &mut exception_successors,
            };
            map.entry(edge.source).or_default().insert(edge.target);
        }

        // Leader rules.
        let mut leaders: BTreeSet<usize> = BTreeSet::new();
        leaders.insert(ordered[0]);
        for edge in &raw.edges {
            match edge.kind {
                // every jump target starts a block; a plain fall-through does not
                EdgeKind::Normal => {
                    if next_of.get(&edge.source) != Some(&edge.target) {
                        leaders.insert(edge.target);
                    }
                }
                EdgeKind::Exception => {
                    leaders.insert(edge.target);
                }
            }
        }
        for &i in &ordered {
            let Some(&next) = next_of.get(&i) else {
                continue;
            };
            let falls_plainly = normal_successors
                .get(&i)
                .is_some_and(|s| s.len() == 1 && s.contains(&next));
            // jumps, returns and throws all end the block here
            if !falls_plainly {
                leaders.insert(next);
            }
        }

        // Partition into blocks along the sorted leaders.
        let position: HashMap<usize, usize> = ordered
            .iter()
            .enumerate()
            .map(|(pos, &idx)| (idx, pos))
            .collect();
        let sorted_leaders: Vec<usize> = leaders.iter().copied().collect();

        let mut blocks: Vec<BasicBlock> = Vec::with_capacity(sorted_leaders.len());
        let mut instruction_to_block: HashMap<usize, BlockId> = HashMap::new();
        for (n, &start) in sorted_leaders.iter().enumerate() {
            let start_pos = position[&start];
            let end_pos = match sorted_leaders.get(n + 1) {
                Some(&next_leader) => position[&next_leader] - 1,
                None => ordered.len() - 1,
            };
            let id = BlockId(blocks.len() as u32);
            blocks.push(BasicBlock::new(id, start, ordered[end_pos]));
            for &idx in &ordered[start_pos..=end_pos] {
                instruction_to_block.insert(idx, id);
            }
        }
        let entry_block = instruction_to_block[&ordered[0]];

        // Block edges: normal flow leaves from the last instruction only;
        // exceptional flow can leave from any instruction in the block.
        let mut block_edges: Vec<(BlockId, BlockId)> = Vec::new();
        for block in &blocks {
            if let Some(targets) = normal_successors.get(&block.end_instruction_index()) {
                for target in targets {
                    block_edges.push((block.id(), instruction_to_block[target]));
                }
            }
            for &idx in ordered
                .iter()
                .filter(|&&idx| block.covers_instruction(idx))
            {
                if let Some(targets) = exception_successors.get(&idx) {
                    for target in targets {
                        block_edges.push((block.id(), instruction_to_block[target]));
                    }
                }
            }
        }
        for (from, to) in block_edges {
            blocks[from.index()].add_successor(to);
            blocks[to.index()].add_predecessor(from);
        }

        // Only true decision points count as branches.
        let branch_instructions: BTreeSet<usize> = normal_successors
            .iter()
            .filter(|(_, targets)| targets.len() >= 2)
            .map(|(&idx, _)| idx)
            .collect();

        let mut branch_outcomes = HashMap::new();
        for &idx in &branch_instructions {
            let targets = &normal_successors[&idx];
            if targets.len() != 2 {
                continue;
            }
            let mut iter = targets.iter();
            let a = *iter.next().unwrap();
            let b = *iter.next().unwrap();
            let next = next_of.get(&idx);
            let (on_false, on_true) = if next == Some(&a) {
                (a, b)
            } else if next == Some(&b) {
                (b, a)
            } else {
                // no fall-through side; outcomes cannot be told apart
                continue;
            };
            branch_outcomes.insert(
                idx,
                BranchOutcomes {
                    on_true: instruction_to_block[&on_true],
                    on_false: instruction_to_block[&on_false],
                },
            );
        }

        let mut instruction_to_line = HashMap::new();
        let mut line_to_instructions: BTreeMap<u32, Vec<usize>> = BTreeMap::new();
        let mut instruction_to_opcode = HashMap::new();
        for insn in &raw.instructions {
            instruction_to_opcode.insert(insn.index, insn.opcode);
            if let Some(line) = insn.line {
                instruction_to_line.insert(insn.index, line);
                line_to_instructions.entry(line).or_default().push(insn.index);
            }
        }
        for indices in line_to_instructions.values_mut() {
            indices.sort_unstable();
        }

        Ok(Self {
            key: raw.key.clone(),
            blocks,
            entry_block,
            instruction_to_block,
            instruction_to_line,
            line_to_instructions,
            instruction_to_opcode,
            branch_instructions,
            branch_outcomes,
        })
    }

    pub fn key(&self) -> &MethodKey {
        &self.key
    }
    pub fn class_name(&self) -> &str {
        &self.key.class_name
    }
    pub fn method_name(&self) -> &str {
        &self.key.method_name
    }
    pub fn descriptor(&self) -> &str {
        &self.key.descriptor
    }

    pub fn blocks(&self) -> &[BasicBlock] {
        &self.blocks
    }
    pub fn block(&self, id: BlockId) -> &BasicBlock {
        &self.blocks[id.index()]
    }
    pub fn entry_block(&self) -> BlockId {
        self.entry_block
    }

    pub fn block_id_for_instruction(&self, instruction_index: usize) -> Option<BlockId> {
        self.instruction_to_block.get(&instruction_index).copied()
    }

    pub fn line_of_instruction(&self, instruction_index: usize) -> Option<u32> {
        self.instruction_to_line.get(&instruction_index).copied()
    }

    /// Instruction indices compiled from the given source line (a line may
    /// span several instructions).
    pub fn instructions_at_line(&self, line: u32) -> &[usize] {
        self.line_to_instructions
            .get(&line)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn opcode_of_instruction(&self, instruction_index: usize) -> Option<u16> {
        self.instruction_to_opcode.get(&instruction_index).copied()
    }

    /// Indices of the true decision points of this method.
    pub fn branch_instruction_indices(&self) -> &BTreeSet<usize> {
        &self.branch_instructions
    }

    /// The two outcome successors of a two-way branch, if `instruction_index`
    /// is one.
    pub fn two_way_outcomes(&self, instruction_index: usize) -> Option<BranchOutcomes> {
        self.branch_outcomes.get(&instruction_index).copied()
    }
}

impl fmt::Debug for ControlFlowGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControlFlowGraph")
            .field("key", &self.key)
            .field("blocks", &self.blocks.len())
            .field("branches", &self.branch_instructions.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;

    fn insn(index: usize, opcode: u16) -> RawInstruction {
        RawInstruction {
            index,
            opcode,
            line: Some(100 + index as u32),
        }
    }

    fn edge(source: usize, target: usize) -> RawEdge {
        RawEdge {
            source,
            target,
            kind: EdgeKind::Normal,
        }
    }

    /// 0: entry, 1: branch (true -> 4, false -> 2), 2-3: else path,
    /// 4: then path, 5: join + return.
    fn diamond() -> RawMethodGraph {
        RawMethodGraph {
            key: MethodKey::new("com.example.Foo", "sample", "()V"),
            instructions: (0..=5).map(|i| insn(i, i as u16)).collect(),
            edges: vec![
                edge(0, 1),
                edge(1, 2), // fall-through: false outcome
                edge(1, 4), // jump: true outcome
                edge(2, 3),
                edge(3, 5), // goto over the then path
                edge(4, 5),
            ],
        }
    }

    #[test]
    fn test_diamond_blocks() {
        let cfg = ControlFlowGraph::build(&diamond()).unwrap();

        // blocks: [0,1], [2,3], [4], [5]
        assert_eq!(cfg.blocks().len(), 4);
        assert_eq!(cfg.entry_block(), BlockId(0));

        let entry = cfg.block(cfg.entry_block());
        assert_eq!(entry.start_instruction_index(), 0);
        assert_eq!(entry.end_instruction_index(), 1);

        // every instruction maps to exactly one block, and block start/end
        // map back to the block itself
        for i in 0..=5 {
            let id = cfg.block_id_for_instruction(i).unwrap();
            assert!(cfg.block(id).covers_instruction(i));
        }
        for block in cfg.blocks() {
            assert_eq!(
                cfg.block_id_for_instruction(block.start_instruction_index()),
                Some(block.id())
            );
            assert_eq!(
                cfg.block_id_for_instruction(block.end_instruction_index()),
                Some(block.id())
            );
        }
    }

    #[test]
    fn test_diamond_edges() {
        let cfg = ControlFlowGraph::build(&diamond()).unwrap();

        let entry = cfg.block(cfg.entry_block());
        let else_block = cfg.block_id_for_instruction(2).unwrap();
        let then_block = cfg.block_id_for_instruction(4).unwrap();
        let join = cfg.block_id_for_instruction(5).unwrap();

        assert_eq!(
            entry.successors().iter().copied().collect::<Vec<_>>(),
            vec![else_block, then_block]
        );
        assert!(cfg.block(else_block).successors().contains(&join));
        assert!(cfg.block(then_block).successors().contains(&join));
        assert!(cfg.block(join).predecessors().contains(&else_block));
        assert!(cfg.block(join).predecessors().contains(&then_block));
    }

    #[test]
    fn test_goto_is_not_a_branch() {
        let cfg = ControlFlowGraph::build(&diamond()).unwrap();

        // instruction 1 has two successors; instruction 3 (goto) has one
        assert_eq!(
            cfg.branch_instruction_indices().iter().copied().collect::<Vec<_>>(),
            vec![1]
        );
    }

    #[test]
    fn test_two_way_outcomes_follow_fall_through_convention() {
        let cfg = ControlFlowGraph::build(&diamond()).unwrap();

        let outcomes = cfg.two_way_outcomes(1).unwrap();
        assert_eq!(outcomes.on_false, cfg.block_id_for_instruction(2).unwrap());
        assert_eq!(outcomes.on_true, cfg.block_id_for_instruction(4).unwrap());
        assert_eq!(outcomes.successor(false), outcomes.on_false);

        assert_eq!(cfg.two_way_outcomes(3), None);
    }

    #[test]
    fn test_loop_back_edge() {
        // 0 -> 1 (header), 1 -> 2 | 4, 2 -> 3, 3 -> 1 (back edge), 4: return
        let raw = RawMethodGraph {
            key: MethodKey::new("Foo", "looping", "()V"),
            instructions: (0..=4).map(|i| insn(i, 0)).collect(),
            edges: vec![edge(0, 1), edge(1, 2), edge(1, 4), edge(2, 3), edge(3, 1)],
        };
        let cfg = ControlFlowGraph::build(&raw).unwrap();

        let header = cfg.block_id_for_instruction(1).unwrap();
        let body_end = cfg.block_id_for_instruction(3).unwrap();
        assert_ne!(cfg.entry_block(), header);
        assert!(cfg.block(body_end).successors().contains(&header));
        assert!(cfg.block(header).predecessors().contains(&body_end));
        assert_eq!(
            cfg.branch_instruction_indices().iter().copied().collect::<Vec<_>>(),
            vec![1]
        );
    }

    #[test]
    fn test_sparse_instruction_indices() {
        let raw = RawMethodGraph {
            key: MethodKey::new("Foo", "sparse", "()V"),
            instructions: vec![insn(10, 1), insn(20, 2), insn(40, 3)],
            edges: vec![edge(10, 20), edge(20, 40)],
        };
        let cfg = ControlFlowGraph::build(&raw).unwrap();
        assert_eq!(cfg.blocks().len(), 1);
        assert_eq!(cfg.block_id_for_instruction(20), Some(BlockId(0)));
        assert_eq!(cfg.block_id_for_instruction(30), None);
    }

    #[test]
    fn test_exception_edges_split_blocks() {
        // 0 -> 1 -> 2 (handler entry at 2 via exception edge from 0..=1)
        let raw = RawMethodGraph {
            key: MethodKey::new("Foo", "guarded", "()V"),
            instructions: (0..=2).map(|i| insn(i, 0)).collect(),
            edges: vec![
                edge(0, 1),
                RawEdge {
                    source: 0,
                    target: 2,
                    kind: EdgeKind::Exception,
                },
                RawEdge {
                    source: 1,
                    target: 2,
                    kind: EdgeKind::Exception,
                },
            ],
        };
        let cfg = ControlFlowGraph::build(&raw).unwrap();

        // the handler starts its own block even without a normal jump to it
        let handler = cfg.block_id_for_instruction(2).unwrap();
        assert_ne!(handler, cfg.entry_block());
        assert!(cfg.block(cfg.entry_block()).successors().contains(&handler));
        // exceptional flow does not make instruction 0 or 1 a branch
        assert!(cfg.branch_instruction_indices().is_empty());
    }

    #[test]
    fn test_line_and_opcode_indexes() {
        let raw = RawMethodGraph {
            key: MethodKey::new("Foo", "lines", "()V"),
            instructions: vec![
                RawInstruction { index: 0, opcode: 7, line: Some(30) },
                RawInstruction { index: 1, opcode: 8, line: Some(30) },
                RawInstruction { index: 2, opcode: 9, line: Some(31) },
                RawInstruction { index: 3, opcode: 1, line: None },
            ],
            edges: vec![edge(0, 1), edge(1, 2), edge(2, 3)],
        };
        let cfg = ControlFlowGraph::build(&raw).unwrap();

        assert_eq!(cfg.instructions_at_line(30), &[0, 1]);
        assert_eq!(cfg.instructions_at_line(31), &[2]);
        assert_eq!(cfg.instructions_at_line(99), &[] as &[usize]);
        assert_eq!(cfg.line_of_instruction(0), Some(30));
        assert_eq!(cfg.line_of_instruction(3), None);
        assert_eq!(cfg.opcode_of_instruction(2), Some(9));
        assert_eq!(cfg.opcode_of_instruction(42), None);
    }

    #[test]
    fn test_malformed_streams_are_rejected() {
        let missing_identity = RawMethodGraph {
            key: MethodKey::new("", "m", "()V"),
            instructions: vec![insn(0, 0)],
            edges: vec![],
        };
        assert_eq!(
            ControlFlowGraph::build(&missing_identity).unwrap_err(),
            GraphError::MissingIdentity
        );

        let empty = RawMethodGraph {
            key: MethodKey::new("Foo", "m", "()V"),
            instructions: vec![],
            edges: vec![],
        };
        assert_eq!(
            ControlFlowGraph::build(&empty).unwrap_err(),
            GraphError::EmptyInstructionStream
        );

        let dangling = RawMethodGraph {
            key: MethodKey::new("Foo", "m", "()V"),
            instructions: vec![insn(0, 0)],
            edges: vec![edge(0, 7)],
        };
        assert_eq!(
            ControlFlowGraph::build(&dangling).unwrap_err(),
            GraphError::DanglingEdge { source: 0, target: 7 }
        );

        let duplicated = RawMethodGraph {
            key: MethodKey::new("Foo", "m", "()V"),
            instructions: vec![insn(0, 0), insn(0, 1)],
            edges: vec![],
        };
        assert_eq!(
            ControlFlowGraph::build(&duplicated).unwrap_err(),
            GraphError::DuplicateInstruction(0)
        );
    }
}
