// Copyright (c) Asymptotic Labs
// SPDX-License-Identifier: Apache-2.0

//! Basic blocks, edge coordinates and the validated block graph of a method.

use crate::error::GraphError;
use crate::instr::Instr;
use log::warn;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::DfsPostOrder;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockId(pub u32);

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A maximal straight-line run of instructions.
///
/// `succs` is ordered: for a block ending in `If`, the first successor is the
/// taken target and the second the fallthrough.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasicBlock {
    pub id: BlockId,
    pub instrs: Vec<Instr>,
    #[serde(default)]
    pub succs: Vec<BlockId>,
}

impl BasicBlock {
    pub fn terminator(&self) -> Option<&Instr> {
        self.instrs.last()
    }

    pub fn ends_in_branch(&self) -> bool {
        matches!(self.terminator(), Some(Instr::If { .. }))
    }

    pub fn ends_in_return(&self) -> bool {
        matches!(self.terminator(), Some(Instr::Return { .. }))
    }

    /// Number of successors implied by the last instruction. A block without
    /// instructions falls through.
    pub fn expected_successors(&self) -> usize {
        self.terminator().map_or(1, Instr::successor_count)
    }
}

/// Which edge out of a block a [`Coord`] designates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Branch {
    /// The unique way out of the block: its single successor, or its return.
    Exit,
    Taken,
    NotTaken,
}

/// The point where control leaves `block` along `branch`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Coord {
    pub block: BlockId,
    pub branch: Branch,
}

impl Coord {
    pub fn exit(block: BlockId) -> Self {
        Coord {
            block,
            branch: Branch::Exit,
        }
    }

    pub fn taken(block: BlockId) -> Self {
        Coord {
            block,
            branch: Branch::Taken,
        }
    }

    pub fn not_taken(block: BlockId) -> Self {
        Coord {
            block,
            branch: Branch::NotTaken,
        }
    }
}

impl fmt::Display for Coord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.branch {
            Branch::Exit => write!(f, "{}", self.block),
            Branch::Taken => write!(f, "{}+", self.block),
            Branch::NotTaken => write!(f, "{}-", self.block),
        }
    }
}

/// The reachable part of a method's block graph, checked for well-formedness.
#[derive(Debug, Clone)]
pub struct BlockGraph {
    entry: BlockId,
    blocks: BTreeMap<BlockId, BasicBlock>,
    preds: BTreeMap<BlockId, Vec<(Coord, BlockId)>>,
    /// Reverse post-order position of every reachable block.
    rpo: BTreeMap<BlockId, usize>,
}

impl BlockGraph {
    pub fn new(entry: BlockId, blocks: &[BasicBlock]) -> Result<Self, GraphError> {
        let mut all = BTreeMap::new();
        for block in blocks {
            if all.insert(block.id, block.clone()).is_some() {
                return Err(GraphError::DuplicateBlock(block.id));
            }
        }
        if !all.contains_key(&entry) {
            return Err(GraphError::MissingEntry(entry));
        }
        for block in all.values() {
            if block.instrs.iter().rev().skip(1).any(|i| i.successor_count() != 1) {
                return Err(GraphError::MisplacedTerminator(block.id));
            }
            let expected = block.expected_successors();
            if block.succs.len() != expected {
                return Err(GraphError::SuccessorMismatch {
                    block: block.id,
                    expected,
                    found: block.succs.len(),
                });
            }
            if let Some(missing) = block.succs.iter().find(|s| !all.contains_key(s)) {
                return Err(GraphError::MissingSuccessor {
                    block: block.id,
                    target: *missing,
                });
            }
        }

        let mut graph = DiGraph::<BlockId, ()>::new();
        let nodes: BTreeMap<BlockId, NodeIndex> =
            all.keys().map(|id| (*id, graph.add_node(*id))).collect();
        for block in all.values() {
            for succ in &block.succs {
                graph.add_edge(nodes[&block.id], nodes[succ], ());
            }
        }
        let mut postorder = vec![];
        let mut dfs = DfsPostOrder::new(&graph, nodes[&entry]);
        while let Some(node) = dfs.next(&graph) {
            postorder.push(graph[node]);
        }
        let rpo: BTreeMap<BlockId, usize> = postorder
            .iter()
            .rev()
            .enumerate()
            .map(|(i, id)| (*id, i))
            .collect();

        let unreachable: Vec<BlockId> = all.keys().filter(|id| !rpo.contains_key(id)).copied().collect();
        if !unreachable.is_empty() {
            warn!("dropping unreachable blocks {:?}", unreachable);
            for id in &unreachable {
                all.remove(id);
            }
        }

        let mut preds: BTreeMap<BlockId, Vec<(Coord, BlockId)>> = BTreeMap::new();
        for block in all.values() {
            for (coord, succ) in Self::out_edges_of(block) {
                preds.entry(succ).or_default().push((coord, block.id));
            }
        }

        Ok(Self {
            entry,
            blocks: all,
            preds,
            rpo,
        })
    }

    fn out_edges_of(block: &BasicBlock) -> Vec<(Coord, BlockId)> {
        if block.ends_in_branch() {
            vec![
                (Coord::taken(block.id), block.succs[0]),
                (Coord::not_taken(block.id), block.succs[1]),
            ]
        } else {
            block.succs.iter().map(|s| (Coord::exit(block.id), *s)).collect()
        }
    }

    pub fn entry(&self) -> BlockId {
        self.entry
    }

    pub fn block(&self, id: BlockId) -> &BasicBlock {
        &self.blocks[&id]
    }

    pub fn blocks(&self) -> impl Iterator<Item = &BasicBlock> {
        self.blocks.values()
    }

    pub fn block_ids(&self) -> BTreeSet<BlockId> {
        self.blocks.keys().copied().collect()
    }

    pub fn contains(&self, id: BlockId) -> bool {
        self.blocks.contains_key(&id)
    }

    /// Outgoing edges of a block, each tagged with its coordinate.
    pub fn out_edges(&self, id: BlockId) -> Vec<(Coord, BlockId)> {
        Self::out_edges_of(&self.blocks[&id])
    }

    /// Incoming edges of a block as `(coord, source)` pairs.
    pub fn in_edges(&self, id: BlockId) -> &[(Coord, BlockId)] {
        self.preds.get(&id).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn rpo_index(&self, id: BlockId) -> usize {
        self.rpo[&id]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instr::{Expr, Operand};

    fn goto(id: u32, succ: u32) -> BasicBlock {
        BasicBlock {
            id: BlockId(id),
            instrs: vec![Instr::Goto],
            succs: vec![BlockId(succ)],
        }
    }

    fn ret(id: u32) -> BasicBlock {
        BasicBlock {
            id: BlockId(id),
            instrs: vec![Instr::Return { value: None }],
            succs: vec![],
        }
    }

    #[test]
    fn test_coords_order_by_block_then_branch() {
        let mut coords = vec![
            Coord::not_taken(BlockId(1)),
            Coord::exit(BlockId(2)),
            Coord::taken(BlockId(1)),
            Coord::exit(BlockId(1)),
        ];
        coords.sort();
        assert_eq!(
            coords,
            vec![
                Coord::exit(BlockId(1)),
                Coord::taken(BlockId(1)),
                Coord::not_taken(BlockId(1)),
                Coord::exit(BlockId(2)),
            ]
        );
    }

    #[test]
    fn test_rejects_successor_mismatch() {
        let branch = BasicBlock {
            id: BlockId(0),
            instrs: vec![Instr::If {
                cond: Expr::Use(Operand::Bool(true)),
            }],
            succs: vec![BlockId(1)],
        };
        let err = BlockGraph::new(BlockId(0), &[branch, ret(1)]).unwrap_err();
        assert!(matches!(
            err,
            GraphError::SuccessorMismatch {
                expected: 2,
                found: 1,
                ..
            }
        ));
    }

    #[test]
    fn test_rejects_missing_successor() {
        let err = BlockGraph::new(BlockId(0), &[goto(0, 7)]).unwrap_err();
        assert!(matches!(err, GraphError::MissingSuccessor { .. }));
    }

    #[test]
    fn test_drops_unreachable_blocks() {
        let graph = BlockGraph::new(BlockId(0), &[goto(0, 1), ret(1), ret(5)]).unwrap();
        assert_eq!(graph.block_ids().len(), 2);
        assert!(!graph.contains(BlockId(5)));
        assert_eq!(graph.in_edges(BlockId(1)), &[(Coord::exit(BlockId(0)), BlockId(0))]);
    }

    #[test]
    fn test_rpo_is_topological_on_acyclic_graphs() {
        let branch = BasicBlock {
            id: BlockId(0),
            instrs: vec![Instr::If {
                cond: Expr::Use(Operand::Bool(true)),
            }],
            succs: vec![BlockId(2), BlockId(1)],
        };
        let graph = BlockGraph::new(BlockId(0), &[branch, goto(1, 3), goto(2, 3), ret(3)]).unwrap();
        assert_eq!(graph.rpo_index(BlockId(0)), 0);
        assert_eq!(graph.rpo_index(BlockId(3)), 3);
        let again = BlockGraph::new(BlockId(0), &[graph.block(BlockId(0)).clone(), goto(1, 3), goto(2, 3), ret(3)]).unwrap();
        assert_eq!(again.rpo_index(BlockId(1)), graph.rpo_index(BlockId(1)));
    }
}
