// Copyright (c) Asymptotic Labs
// SPDX-License-Identifier: Apache-2.0

//! Recovers a structured tree from a block graph.
//!
//! Works region by region. The method body is the outermost region, every
//! loop body is a region of its own. Inside a region, directly nested loops are
//! collapsed into single units and the region's back edges are dropped, which
//! leaves a DAG. Units are then placed following the DAG's dominator tree:
//!
//! - a block whose only incoming edge is an arm of its immediate dominator is
//!   nested inside that arm;
//! - every other dominator-tree child follows its parent in a sequence, in
//!   reverse post-order.
//!
//! A region with several entries (an irreducible loop) is rooted at a virtual
//! node; its entries become the alternatives of a merge node.

use super::{Continuation, ElemKind, GraphElem, Jumps};
use crate::block::{BlockGraph, BlockId, Coord};
use crate::error::GraphError;
use crate::loops::{LoopForest, LoopId};
use log::debug;
use petgraph::algo::dominators::simple_fast;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::DfsPostOrder;
use std::collections::{BTreeMap, BTreeSet};

/// Result of reconstruction: the tree plus the coords of every loop's own
/// back edges, which become recursive calls.
#[derive(Debug, Clone)]
pub struct StructuredMethod {
    pub root: GraphElem,
    pub recurse_locations: BTreeSet<Coord>,
    pub loops: LoopForest,
}

pub fn reconstruct(graph: &BlockGraph) -> Result<StructuredMethod, GraphError> {
    let loops = LoopForest::compute(graph);
    let mut reconstructor = Reconstructor {
        graph,
        loops: &loops,
        recurse_locations: BTreeSet::new(),
        placed: BTreeSet::new(),
    };
    let region = Region::build(graph, &loops, None)?;
    let root = GraphElem::sequence(reconstructor.place(&region, region.root)?);

    let unplaced: Vec<BlockId> = graph
        .block_ids()
        .into_iter()
        .filter(|b| !reconstructor.placed.contains(b))
        .collect();
    if !unplaced.is_empty() {
        return Err(GraphError::UnplacedBlocks(unplaced));
    }
    assert!(
        root.jumps.brk.is_empty() && root.jumps.cont.is_empty(),
        "BUG: loop exits escape the method body"
    );
    debug!("reconstructed structure:\n{}", root);

    let recurse_locations = reconstructor.recurse_locations;
    Ok(StructuredMethod {
        root,
        recurse_locations,
        loops,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Unit {
    /// Virtual root of a region with several entries.
    Root,
    Block(BlockId),
    Loop(LoopId),
}

/// The acyclic view of one region and its dominator tree.
struct Region {
    owner: Option<LoopId>,
    blocks: BTreeSet<BlockId>,
    entries: BTreeSet<BlockId>,
    root: Unit,
    idom: BTreeMap<Unit, Unit>,
    children: BTreeMap<Unit, Vec<Unit>>,
    in_degree: BTreeMap<Unit, usize>,
}

impl Region {
    fn build(
        graph: &BlockGraph,
        loops: &LoopForest,
        owner: Option<LoopId>,
    ) -> Result<Self, GraphError> {
        let (blocks, entries) = match owner {
            Some(l) => (loops.get(l).body.clone(), loops.get(l).entries.clone()),
            None => (graph.block_ids(), [graph.entry()].into_iter().collect()),
        };
        let unit_of = |b: BlockId| loops.child_containing(owner, b).map_or(Unit::Block(b), Unit::Loop);

        let mut dag = DiGraph::<Unit, ()>::new();
        let mut nodes: BTreeMap<Unit, NodeIndex> = BTreeMap::new();
        for block in &blocks {
            let unit = unit_of(*block);
            nodes.entry(unit).or_insert_with(|| dag.add_node(unit));
        }
        let mut in_degree: BTreeMap<Unit, usize> = BTreeMap::new();
        let root = if entries.len() == 1 {
            unit_of(*entries.iter().next().expect("one entry"))
        } else {
            let root = dag.add_node(Unit::Root);
            nodes.insert(Unit::Root, root);
            for entry in &entries {
                dag.add_edge(root, nodes[&Unit::Block(*entry)], ());
            }
            Unit::Root
        };
        for block in &blocks {
            for (_, succ) in graph.out_edges(*block) {
                if !blocks.contains(&succ) || entries.contains(&succ) {
                    continue;
                }
                let (from, to) = (unit_of(*block), unit_of(succ));
                if from != to {
                    dag.add_edge(nodes[&from], nodes[&to], ());
                    *in_degree.entry(to).or_default() += 1;
                }
            }
        }

        let mut rpo = vec![];
        let mut dfs = DfsPostOrder::new(&dag, nodes[&root]);
        while let Some(node) = dfs.next(&dag) {
            rpo.push(dag[node]);
        }
        rpo.reverse();
        let order: BTreeMap<Unit, usize> = rpo.iter().enumerate().map(|(i, u)| (*u, i)).collect();
        let unreached: Vec<BlockId> = blocks
            .iter()
            .filter(|b| !order.contains_key(&unit_of(**b)))
            .copied()
            .collect();
        if !unreached.is_empty() {
            return Err(GraphError::UnplacedBlocks(unreached));
        }

        let dominators = simple_fast(&dag, nodes[&root]);
        let mut idom = BTreeMap::new();
        let mut children: BTreeMap<Unit, Vec<Unit>> = BTreeMap::new();
        for (unit, node) in &nodes {
            if *unit == root {
                continue;
            }
            if let Some(dom) = dominators.immediate_dominator(*node) {
                idom.insert(*unit, dag[dom]);
                children.entry(dag[dom]).or_default().push(*unit);
            }
        }
        for kids in children.values_mut() {
            kids.sort_by_key(|u| order[u]);
        }

        Ok(Self {
            owner,
            blocks,
            entries,
            root,
            idom,
            children,
            in_degree,
        })
    }

    fn children(&self, unit: Unit) -> &[Unit] {
        self.children.get(&unit).map(|v| v.as_slice()).unwrap_or(&[])
    }
}

struct Reconstructor<'a> {
    graph: &'a BlockGraph,
    loops: &'a LoopForest,
    recurse_locations: BTreeSet<Coord>,
    placed: BTreeSet<BlockId>,
}

impl<'a> Reconstructor<'a> {
    /// Structures the dominator subtree rooted at `unit`, returning the
    /// elements of the sequence it forms.
    fn place(&mut self, region: &Region, unit: Unit) -> Result<Vec<GraphElem>, GraphError> {
        let mut nested = BTreeSet::new();
        let node = match unit {
            Unit::Root => self.merge_node(region, &mut nested)?,
            Unit::Block(block) => self.block_node(region, block, &mut nested)?,
            Unit::Loop(l) => self.loop_node(l)?,
        };
        let mut elems = vec![node];
        for child in region.children(unit) {
            if !nested.contains(child) {
                elems.extend(self.place(region, *child)?);
            }
        }
        Ok(elems)
    }

    fn merge_node(
        &mut self,
        region: &Region,
        nested: &mut BTreeSet<Unit>,
    ) -> Result<GraphElem, GraphError> {
        let mut alternatives = vec![];
        let mut incoming = BTreeMap::new();
        let mut jumps = Jumps::default();
        for entry in &region.entries {
            nested.insert(Unit::Block(*entry));
            let alternative = GraphElem::sequence(self.place(region, Unit::Block(*entry))?);
            jumps.extend(&alternative.jumps);
            alternatives.push(alternative);
            incoming.insert(
                *entry,
                self.graph.in_edges(*entry).iter().map(|(c, _)| *c).collect(),
            );
        }
        let head = *region.entries.iter().next().expect("merge with entries");
        Ok(GraphElem::new(
            head,
            ElemKind::Merge {
                alternatives,
                incoming,
            },
            jumps,
        ))
    }

    fn block_node(
        &mut self,
        region: &Region,
        block: BlockId,
        nested: &mut BTreeSet<Unit>,
    ) -> Result<GraphElem, GraphError> {
        self.placed.insert(block);
        let edges = self.graph.out_edges(block);
        if self.graph.block(block).ends_in_branch() {
            let (taken_coord, taken_target) = edges[0];
            let (not_taken_coord, not_taken_target) = edges[1];
            let taken = self.arm(region, block, taken_coord, taken_target, nested)?;
            let not_taken = self.arm(region, block, not_taken_coord, not_taken_target, nested)?;
            let mut jumps = taken.jumps().clone();
            jumps.extend(not_taken.jumps());
            return Ok(GraphElem::new(
                block,
                ElemKind::Conditional { taken, not_taken },
                jumps,
            ));
        }

        let coord = Coord::exit(block);
        let jumps = match edges.first() {
            Some((_, target)) => self.classify(region, block, coord, *target),
            None if self.graph.block(block).ends_in_return() => Jumps::ret(coord),
            None => Jumps::default(),
        };
        Ok(GraphElem::new(block, ElemKind::Jump { coord }, jumps))
    }

    fn arm(
        &mut self,
        region: &Region,
        block: BlockId,
        coord: Coord,
        target: BlockId,
        nested: &mut BTreeSet<Unit>,
    ) -> Result<Continuation, GraphError> {
        let unit = Unit::Block(target);
        let nestable = region.blocks.contains(&target)
            && !region.entries.contains(&target)
            && self.loops.child_containing(region.owner, target).is_none()
            && region.idom.get(&unit) == Some(&Unit::Block(block))
            && region.in_degree.get(&unit) == Some(&1);
        if nestable {
            nested.insert(unit);
            let elem = GraphElem::sequence(self.place(region, unit)?);
            Ok(Continuation::Elem(Box::new(elem)))
        } else {
            Ok(Continuation::Jump {
                coord,
                jumps: self.classify(region, block, coord, target),
            })
        }
    }

    fn classify(&self, region: &Region, source: BlockId, coord: Coord, target: BlockId) -> Jumps {
        if let Some(l) = self.loops.continued_loop(source, target) {
            Jumps::cont(coord, self.loops.get(l).head)
        } else if region.blocks.contains(&target) {
            Jumps::flow(coord, target)
        } else {
            Jumps::brk(coord, target)
        }
    }

    fn loop_node(&mut self, l: LoopId) -> Result<GraphElem, GraphError> {
        let loops = self.loops;
        let info = loops.get(l);
        let region = Region::build(self.graph, loops, Some(l))?;
        let body = GraphElem::sequence(self.place(&region, region.root)?);
        assert!(
            body.jumps.flow.is_empty(),
            "BUG: loop body at {} has flows leaving the loop",
            info.head
        );

        let mut jumps = Jumps::default();
        for (coord, head) in &body.jumps.cont {
            if *head == info.head {
                // Continues issued from inside a nested loop are resolved by
                // that loop's recurse gate, not at the jump site.
                if loops.innermost(coord.block) == Some(l) {
                    self.recurse_locations.insert(*coord);
                }
            } else {
                jumps.cont.insert((*coord, *head));
            }
        }
        for (coord, target) in &body.jumps.brk {
            let stays_in_parent = info.parent.map_or(true, |p| loops.contains(p, *target));
            if stays_in_parent {
                jumps.flow.insert((*coord, *target));
            } else {
                jumps.brk.insert(*coord, *target);
            }
        }
        jumps.ret = body.jumps.ret.clone();

        Ok(GraphElem::new(
            info.head,
            ElemKind::Loop {
                entries: info.entries.clone(),
                body: Box::new(body),
            },
            jumps,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::MethodBuilder;

    fn structure(builder: &MethodBuilder) -> StructuredMethod {
        reconstruct(&builder.graph()).unwrap()
    }

    fn kinds(elem: &GraphElem) -> Vec<&'static str> {
        let mut out = vec![];
        elem.visit(&mut |e| {
            out.push(match e.kind {
                ElemKind::Jump { .. } => "jump",
                ElemKind::Conditional { .. } => "cond",
                ElemKind::Sequence(_) => "seq",
                ElemKind::Loop { .. } => "loop",
                ElemKind::Merge { .. } => "merge",
            })
        });
        out
    }

    #[test]
    fn test_straight_line_chain_is_one_sequence() {
        let mut b = MethodBuilder::new();
        b.goto(0, 1);
        b.goto(1, 2);
        b.ret(2);
        let s = structure(&b);
        assert_eq!(kinds(&s.root), vec!["seq", "jump", "jump", "jump"]);
        assert_eq!(s.root.jumps.ret, [Coord::exit(BlockId(2))].into_iter().collect());
        assert!(s.root.jumps.flow.is_empty());
    }

    #[test]
    fn test_diamond_nests_arms_and_sequences_join() {
        // 0 -> 1 | 2; 1 -> 3; 2 -> 3; 3 return
        let mut b = MethodBuilder::new();
        b.branch(0, 1, 2);
        b.goto(1, 3);
        b.goto(2, 3);
        b.ret(3);
        let s = structure(&b);
        assert_eq!(kinds(&s.root), vec!["seq", "cond", "jump", "jump", "jump"]);
        let ElemKind::Sequence(elems) = &s.root.kind else {
            panic!("expected a sequence")
        };
        assert_eq!(elems.len(), 2);
        assert_eq!(elems[1].head, BlockId(3));
        let ElemKind::Conditional { taken, not_taken } = &elems[0].kind else {
            panic!("expected a conditional")
        };
        assert_eq!(taken.elem().map(|e| e.head), Some(BlockId(1)));
        assert_eq!(not_taken.elem().map(|e| e.head), Some(BlockId(2)));
        assert_eq!(
            elems[0].jumps.flow,
            [
                (Coord::exit(BlockId(1)), BlockId(3)),
                (Coord::exit(BlockId(2)), BlockId(3))
            ]
            .into_iter()
            .collect()
        );
    }

    #[test]
    fn test_early_exit_arm_is_a_jump() {
        // 0 -> 3 | 1; 1 -> 3; 3 return
        let mut b = MethodBuilder::new();
        b.branch(0, 3, 1);
        b.goto(1, 3);
        b.ret(3);
        let s = structure(&b);
        let ElemKind::Sequence(elems) = &s.root.kind else {
            panic!("expected a sequence")
        };
        let ElemKind::Conditional { taken, not_taken } = &elems[0].kind else {
            panic!("expected a conditional")
        };
        assert!(matches!(taken, Continuation::Jump { coord, .. } if *coord == Coord::taken(BlockId(0))));
        assert!(not_taken.elem().is_some());
        assert_eq!(elems[1].head, BlockId(3));
    }

    #[test]
    fn test_while_true_loop_with_break_and_continue() {
        // 0 -> 1; 1 -> 2 (break) | 1 (continue); 2 -> 3; 3 return
        let mut b = MethodBuilder::new();
        b.goto(0, 1);
        b.branch(1, 2, 1);
        b.goto(2, 3);
        b.ret(3);
        let s = structure(&b);
        assert_eq!(
            kinds(&s.root),
            vec!["seq", "jump", "loop", "cond", "jump", "jump"]
        );
        assert_eq!(
            s.recurse_locations,
            [Coord::not_taken(BlockId(1))].into_iter().collect()
        );
        let ElemKind::Sequence(elems) = &s.root.kind else {
            panic!("expected a sequence")
        };
        let l = &elems[1];
        assert!(l.is_loop());
        assert_eq!(
            l.jumps.flow,
            [(Coord::taken(BlockId(1)), BlockId(2))].into_iter().collect()
        );
        assert!(l.jumps.brk.is_empty() && l.jumps.cont.is_empty() && l.jumps.ret.is_empty());
        let ElemKind::Loop { body, .. } = &l.kind else {
            panic!("expected a loop")
        };
        assert_eq!(
            body.jumps.brk,
            [(Coord::taken(BlockId(1)), BlockId(2))].into_iter().collect()
        );
    }

    #[test]
    fn test_nested_loop_break_to_outer_exit_stays_a_break() {
        // 0 -> 1; 1 -> 2 | 6; 2 -> 3; 3 -> 6 (break both) | 4; 4 -> 2 | 5; 5 -> 1; 6 -> 7; 7 return
        let mut b = MethodBuilder::new();
        b.goto(0, 1);
        b.branch(1, 2, 6);
        b.goto(2, 3);
        b.branch(3, 6, 4);
        b.branch(4, 2, 5);
        b.goto(5, 1);
        b.goto(6, 7);
        b.ret(7);
        let s = structure(&b);
        let mut inner = None;
        s.root.visit(&mut |e| {
            if e.is_loop() && e.head == BlockId(2) {
                inner = Some(e.jumps.clone());
            }
        });
        let inner = inner.expect("inner loop");
        assert_eq!(
            inner.brk,
            [(Coord::taken(BlockId(3)), BlockId(6))].into_iter().collect()
        );
        assert_eq!(
            inner.flow,
            [(Coord::not_taken(BlockId(4)), BlockId(5))].into_iter().collect()
        );
        assert_eq!(
            s.recurse_locations,
            [Coord::taken(BlockId(4)), Coord::exit(BlockId(5))]
                .into_iter()
                .collect()
        );
    }

    #[test]
    fn test_continue_to_outer_loop_is_escaping_cont() {
        // 0 -> 1; 1 -> 2 | 5; 2 -> 1 (continue outer) | 3; 3 -> 2 | 4; 4 -> 1; 5 return
        let mut b = MethodBuilder::new();
        b.goto(0, 1);
        b.branch(1, 2, 5);
        b.branch(2, 1, 3);
        b.branch(3, 2, 4);
        b.goto(4, 1);
        b.ret(5);
        let s = structure(&b);
        let mut inner = None;
        s.root.visit(&mut |e| {
            if e.is_loop() && e.head == BlockId(2) {
                inner = Some(e.jumps.clone());
            }
        });
        let inner = inner.expect("inner loop");
        assert_eq!(
            inner.cont,
            [(Coord::taken(BlockId(2)), BlockId(1))].into_iter().collect()
        );
        assert!(s.recurse_locations.contains(&Coord::taken(BlockId(3))));
        assert!(!s.recurse_locations.contains(&Coord::taken(BlockId(2))));
    }

    #[test]
    fn test_irreducible_loop_becomes_merge() {
        // 0 -> 1 | 2; 1 -> 2; 2 -> 1 | 3; 3 return
        let mut b = MethodBuilder::new();
        b.branch(0, 1, 2);
        b.goto(1, 2);
        b.branch(2, 1, 3);
        b.ret(3);
        let s = structure(&b);
        assert_eq!(
            kinds(&s.root),
            vec!["seq", "cond", "loop", "merge", "jump", "cond", "jump"]
        );
        let mut incoming = None;
        s.root.visit(&mut |e| {
            if let ElemKind::Merge { incoming: i, .. } = &e.kind {
                incoming = Some(i.clone());
            }
        });
        let incoming = incoming.expect("merge node");
        assert_eq!(
            incoming[&BlockId(1)],
            [Coord::taken(BlockId(0)), Coord::taken(BlockId(2))]
                .into_iter()
                .collect()
        );
        assert_eq!(
            incoming[&BlockId(2)],
            [Coord::not_taken(BlockId(0)), Coord::exit(BlockId(1))]
                .into_iter()
                .collect()
        );
    }

    #[test]
    fn test_every_reachable_block_is_placed_once() {
        let mut b = MethodBuilder::new();
        b.branch(0, 1, 4);
        b.branch(1, 2, 3);
        b.goto(2, 5);
        b.goto(3, 5);
        b.goto(4, 5);
        b.ret(5);
        let s = structure(&b);
        let mut heads = vec![];
        s.root.visit(&mut |e| {
            if matches!(e.kind, ElemKind::Jump { .. } | ElemKind::Conditional { .. }) {
                heads.push(e.head);
            }
        });
        heads.sort();
        assert_eq!(heads, (0..6).map(BlockId).collect::<Vec<_>>());
    }

    #[test]
    fn test_return_reached_from_loop_is_placed_in_its_body() {
        // 0 -> 1; 1 -> 2 | 3; 2 return; 3 -> 1
        let mut b = MethodBuilder::new();
        b.goto(0, 1);
        b.branch(1, 2, 3);
        b.ret(2);
        b.goto(3, 1);
        let s = structure(&b);
        assert_eq!(kinds(&s.root), vec!["seq", "jump", "loop", "cond", "jump", "jump"]);
        let ElemKind::Sequence(elems) = &s.root.kind else {
            panic!("expected a sequence")
        };
        let l = &elems[1];
        assert_eq!(l.jumps.ret, [Coord::exit(BlockId(2))].into_iter().collect());
        assert!(l.jumps.flow.is_empty() && l.jumps.brk.is_empty());
        assert_eq!(
            s.recurse_locations,
            [Coord::exit(BlockId(3))].into_iter().collect()
        );
    }
}
