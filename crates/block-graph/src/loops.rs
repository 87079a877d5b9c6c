// Copyright (c) Asymptotic Labs
// SPDX-License-Identifier: Apache-2.0

//! Loop nesting forest.
//!
//! Loops are found as strongly connected components of a region. The blocks
//! of a component that are entered from outside it are its entries; edges
//! from inside the component back to an entry are its back edges. Removing the
//! back edges and decomposing the component again yields the nested loops.
//! A loop with a single entry is a natural loop; a loop with several entries
//! is irreducible and is later structured through a merge node.
//!
//! A returning block reached only from inside a loop belongs to that loop, so
//! the return happens inside the generated loop function.

use crate::block::{BlockGraph, BlockId};
use log::debug;
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{BTreeMap, BTreeSet};

pub type LoopId = usize;

#[derive(Debug, Clone)]
pub struct LoopInfo {
    /// Smallest entry; names the loop.
    pub head: BlockId,
    pub entries: BTreeSet<BlockId>,
    pub body: BTreeSet<BlockId>,
    pub parent: Option<LoopId>,
    pub children: Vec<LoopId>,
}

impl LoopInfo {
    pub fn is_irreducible(&self) -> bool {
        self.entries.len() > 1
    }
}

#[derive(Debug, Clone, Default)]
pub struct LoopForest {
    loops: Vec<LoopInfo>,
    top: Vec<LoopId>,
    innermost: BTreeMap<BlockId, LoopId>,
    entry_of: BTreeMap<BlockId, LoopId>,
}

impl LoopForest {
    pub fn compute(graph: &BlockGraph) -> Self {
        let mut forest = LoopForest::default();
        let all = graph.block_ids();
        forest.top = forest.discover(graph, &all, &BTreeSet::new(), None);
        forest
    }

    fn discover(
        &mut self,
        graph: &BlockGraph,
        region: &BTreeSet<BlockId>,
        back_edge_targets: &BTreeSet<BlockId>,
        parent: Option<LoopId>,
    ) -> Vec<LoopId> {
        let mut g = DiGraph::<BlockId, ()>::new();
        let nodes: BTreeMap<BlockId, NodeIndex> =
            region.iter().map(|b| (*b, g.add_node(*b))).collect();
        for block in region {
            for (_, succ) in graph.out_edges(*block) {
                if region.contains(&succ) && !back_edge_targets.contains(&succ) {
                    g.add_edge(nodes[block], nodes[&succ], ());
                }
            }
        }

        let mut components: Vec<BTreeSet<BlockId>> = tarjan_scc(&g)
            .into_iter()
            .filter(|scc| scc.len() > 1 || g.find_edge(scc[0], scc[0]).is_some())
            .map(|scc| scc.into_iter().map(|n| g[n]).collect())
            .collect();
        components.sort_by_key(|scc| scc.iter().next().copied());

        let mut ids = vec![];
        for mut body in components {
            let tails = return_tails(graph, region, &body);
            body.extend(tails);
            let entries: BTreeSet<BlockId> = body
                .iter()
                .filter(|b| {
                    **b == graph.entry()
                        || graph
                            .in_edges(**b)
                            .iter()
                            .any(|(_, src)| !body.contains(src))
                })
                .copied()
                .collect();
            assert!(
                !entries.is_empty(),
                "BUG: reachable loop without an entry block"
            );
            let head = *entries.iter().next().expect("non-empty entries");
            let id = self.loops.len();
            debug!(
                "loop {} at block {} with entries {:?} ({} blocks)",
                id,
                head,
                entries,
                body.len()
            );
            for block in &body {
                self.innermost.insert(*block, id);
            }
            for entry in &entries {
                self.entry_of.insert(*entry, id);
            }
            self.loops.push(LoopInfo {
                head,
                entries: entries.clone(),
                body: body.clone(),
                parent,
                children: vec![],
            });
            let children = self.discover(graph, &body, &entries, Some(id));
            self.loops[id].children = children;
            ids.push(id);
        }
        ids
    }

    pub fn get(&self, id: LoopId) -> &LoopInfo {
        &self.loops[id]
    }

    pub fn len(&self) -> usize {
        self.loops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loops.is_empty()
    }

    pub fn top_level(&self) -> &[LoopId] {
        &self.top
    }

    /// Innermost loop whose body contains `block`.
    pub fn innermost(&self, block: BlockId) -> Option<LoopId> {
        self.innermost.get(&block).copied()
    }

    /// The loop `block` is an entry of, if any.
    pub fn loop_with_entry(&self, block: BlockId) -> Option<LoopId> {
        self.entry_of.get(&block).copied()
    }

    pub fn contains(&self, id: LoopId, block: BlockId) -> bool {
        self.loops[id].body.contains(&block)
    }

    /// If the edge `source -> target` re-enters a loop that contains `source`,
    /// returns that loop: the edge is a continue of it.
    pub fn continued_loop(&self, source: BlockId, target: BlockId) -> Option<LoopId> {
        self.loop_with_entry(target)
            .filter(|l| self.contains(*l, source))
    }

    /// The loop directly nested in `region` (or top level when `None`) that
    /// contains `block`, if `block` is not a plain block of the region.
    pub fn child_containing(&self, region: Option<LoopId>, block: BlockId) -> Option<LoopId> {
        let mut current = self.innermost(block)?;
        loop {
            let parent = self.loops[current].parent;
            if parent == region {
                return Some(current);
            }
            current = parent?;
        }
    }
}

/// Blocks of `region` outside `body` that end in a return and are entered
/// from `body` alone.
fn return_tails(
    graph: &BlockGraph,
    region: &BTreeSet<BlockId>,
    body: &BTreeSet<BlockId>,
) -> Vec<BlockId> {
    region
        .iter()
        .filter(|b| !body.contains(b) && **b != graph.entry())
        .filter(|b| graph.block(**b).ends_in_return())
        .filter(|b| {
            let preds = graph.in_edges(**b);
            !preds.is_empty() && preds.iter().all(|(_, src)| body.contains(src))
        })
        .copied()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::MethodBuilder;

    #[test]
    fn test_while_loop_has_single_entry() {
        // 0 -> 1; 1 -> 2 | 3; 2 -> 1; 3 return
        let mut b = MethodBuilder::new();
        b.goto(0, 1);
        b.branch(1, 2, 3);
        b.goto(2, 1);
        b.ret(3);
        let graph = b.graph();
        let forest = LoopForest::compute(&graph);
        assert_eq!(forest.len(), 1);
        let l = forest.get(0);
        assert_eq!(l.head, BlockId(1));
        assert_eq!(
            l.body,
            [BlockId(1), BlockId(2), BlockId(3)].into_iter().collect()
        );
        assert!(!l.is_irreducible());
        assert_eq!(forest.innermost(BlockId(3)), Some(0));
        assert_eq!(forest.continued_loop(BlockId(2), BlockId(1)), Some(0));
        assert_eq!(forest.continued_loop(BlockId(0), BlockId(1)), None);
    }

    #[test]
    fn test_nested_loops_are_children() {
        // 0 -> 1; 1 -> 2 | 5; 2 -> 3; 3 -> 2 | 4; 4 -> 1; 5 return
        let mut b = MethodBuilder::new();
        b.goto(0, 1);
        b.branch(1, 2, 5);
        b.goto(2, 3);
        b.branch(3, 2, 4);
        b.goto(4, 1);
        b.ret(5);
        let forest = LoopForest::compute(&b.graph());
        assert_eq!(forest.len(), 2);
        assert_eq!(forest.top_level(), &[0]);
        let inner = forest.get(0).children[0];
        assert_eq!(forest.get(inner).head, BlockId(2));
        assert_eq!(forest.get(inner).parent, Some(0));
        assert_eq!(forest.innermost(BlockId(3)), Some(inner));
        assert_eq!(forest.innermost(BlockId(4)), Some(0));
        assert_eq!(forest.child_containing(None, BlockId(3)), Some(0));
        assert_eq!(forest.child_containing(Some(0), BlockId(3)), Some(inner));
        assert_eq!(forest.child_containing(Some(0), BlockId(4)), None);
    }

    #[test]
    fn test_two_entry_cycle_is_irreducible() {
        // 0 -> 1 | 2; 1 -> 2; 2 -> 1 | 3; 3 return
        let mut b = MethodBuilder::new();
        b.branch(0, 1, 2);
        b.goto(1, 2);
        b.branch(2, 1, 3);
        b.ret(3);
        let forest = LoopForest::compute(&b.graph());
        assert_eq!(forest.len(), 1);
        let l = forest.get(0);
        assert!(l.is_irreducible());
        assert_eq!(l.head, BlockId(1));
        assert_eq!(l.entries.len(), 2);
        assert!(l.children.is_empty());
    }

    #[test]
    fn test_self_loop() {
        let mut b = MethodBuilder::new();
        b.goto(0, 1);
        b.branch(1, 1, 2);
        b.ret(2);
        let forest = LoopForest::compute(&b.graph());
        assert_eq!(forest.len(), 1);
        assert_eq!(
            forest.get(0).body,
            [BlockId(1), BlockId(2)].into_iter().collect()
        );
        assert_eq!(forest.get(0).entries.len(), 1);
        assert_eq!(forest.continued_loop(BlockId(1), BlockId(1)), Some(0));
    }

    #[test]
    fn test_shared_return_stays_outside_the_loop() {
        // 0 -> 1 | 3; 1 -> 2 | 3; 2 -> 1; 3 return
        let mut b = MethodBuilder::new();
        b.branch(0, 1, 3);
        b.branch(1, 2, 3);
        b.goto(2, 1);
        b.ret(3);
        let forest = LoopForest::compute(&b.graph());
        assert_eq!(forest.len(), 1);
        assert_eq!(
            forest.get(0).body,
            [BlockId(1), BlockId(2)].into_iter().collect()
        );
        assert_eq!(forest.innermost(BlockId(3)), None);
    }

    #[test]
    fn test_return_tail_joins_the_innermost_loop() {
        // 0 -> 1; 1 -> 2 | 5; 2 -> 3; 3 -> 4 | 6; 4 -> 2 | 1; 5, 6 return
        let mut b = MethodBuilder::new();
        b.goto(0, 1);
        b.branch(1, 2, 5);
        b.goto(2, 3);
        b.branch(3, 4, 6);
        b.branch(4, 2, 1);
        b.ret(5);
        b.ret(6);
        let forest = LoopForest::compute(&b.graph());
        assert_eq!(forest.len(), 2);
        let outer = forest.top_level()[0];
        let inner = forest.get(outer).children[0];
        assert_eq!(forest.get(inner).head, BlockId(2));
        assert_eq!(forest.innermost(BlockId(6)), Some(inner));
        assert_eq!(forest.innermost(BlockId(5)), Some(outer));
    }
}
