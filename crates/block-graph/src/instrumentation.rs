// Copyright (c) Asymptotic Labs
// SPDX-License-Identifier: Apache-2.0

//! Decides which jumps must record themselves in the control cell and
//! attaches the gates that read it back.
//!
//! A structured tree loses the exact edge by which control reached a node.
//! Wherever that edge matters (a sequence element that can be skipped, a merge
//! choosing an alternative, a loop call deciding whether to recurse or return)
//! the jumps that can lead there are marked in `set_flag` and the node is
//! annotated with the coords it waits for.

use crate::block::{BlockId, Coord};
use crate::structure::{
    ChooseBy, Continuation, ElemKind, GateOn, GraphElem, Jumps, RecurseOn, ReturnOn,
    StructuredMethod, ValueLoop,
};
use log::debug;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlagSets {
    /// Jumps that store their coord in the control cell.
    pub set_flag: BTreeSet<Coord>,
    /// Jumps that leave the current loop function.
    pub return_jump: BTreeSet<Coord>,
    /// Back edges that re-invoke their own loop function.
    pub recurse_flag: BTreeSet<Coord>,
}

impl FlagSets {
    /// Whether taking `coord` has to produce any code at all.
    pub fn emits_code(&self, coord: &Coord) -> bool {
        self.set_flag.contains(coord)
            || self.return_jump.contains(coord)
            || self.recurse_flag.contains(coord)
    }

    /// Post-order walk. `parent_loop` is the head of the innermost loop
    /// enclosing `elem`, not counting `elem` itself.
    fn assign(&mut self, elem: &mut GraphElem, parent_loop: Option<BlockId>) {
        let child_loop = if elem.is_loop() {
            Some(elem.head)
        } else {
            parent_loop
        };

        match &mut elem.kind {
            ElemKind::Jump { .. } => {}
            ElemKind::Conditional { taken, not_taken } => {
                for arm in [taken, not_taken] {
                    match arm {
                        Continuation::Elem(nested) => self.assign(nested, child_loop),
                        Continuation::Jump { jumps, .. } => {
                            self.return_jump.extend(jumps.brk.keys().copied())
                        }
                    }
                }
            }
            ElemKind::Sequence(elems) => {
                for nested in elems.iter_mut() {
                    self.assign(nested, child_loop);
                }
                self.gate_sequence(elems);
            }
            ElemKind::Loop { body, .. } => self.assign(body, child_loop),
            ElemKind::Merge {
                alternatives,
                incoming,
            } => {
                for alternative in alternatives.iter_mut() {
                    self.assign(alternative, child_loop);
                }
                self.set_flag
                    .extend(incoming.values().flat_map(|c| c.iter().copied()));
                elem.annotations.set(ChooseBy(incoming.clone()));
            }
        }

        let jumps = &elem.jumps;
        match parent_loop {
            None => assert!(
                jumps.brk.is_empty() && jumps.cont.is_empty(),
                "BUG: node at {} leaves a loop but is not inside one",
                elem.head
            ),
            Some(_) => self.set_flag.extend(jumps.ret.iter().copied()),
        }
        if parent_loop.is_some() && elem.is_loop() {
            for (coord, _) in &jumps.cont {
                assert!(
                    !self.recurse_flag.contains(coord),
                    "BUG: {} both recurses and escapes its loop",
                    coord
                );
                self.set_flag.insert(*coord);
                self.return_jump.insert(*coord);
            }
        }
        self.set_flag.extend(jumps.brk.keys().copied());
        self.return_jump.extend(jumps.brk.keys().copied());

        if elem.is_loop() {
            let (recurse_on, return_on) = loop_exits(&elem.jumps, parent_loop);
            let value_loop = !elem.jumps.ret.is_empty();
            elem.annotations.set(RecurseOn(recurse_on));
            elem.annotations.set(ReturnOn(return_on));
            elem.annotations.set(ValueLoop(value_loop));
        }
    }

    /// Gates every sequence element that control may skip over.
    fn gate_sequence(&mut self, elems: &mut [GraphElem]) {
        let Some((first, rest)) = elems.split_first_mut() else {
            return;
        };
        let mut pending: BTreeMap<BlockId, BTreeSet<Coord>> = BTreeMap::new();
        add_flows(&mut pending, &first.jumps);

        for elem in rest {
            let heads = elem.heads();
            let reaching: BTreeSet<Coord> = heads
                .iter()
                .filter_map(|h| pending.get(h))
                .flat_map(|c| c.iter().copied())
                .collect();
            assert!(
                !reaching.is_empty(),
                "BUG: sequence element at {} is not reached by any flow",
                elem.head
            );
            let uniform = pending.keys().all(|target| heads.contains(target));
            if !uniform {
                // The cell is shared with nested loop functions, so every
                // alternative has to overwrite it before the gate reads it.
                self.set_flag
                    .extend(pending.values().flat_map(|c| c.iter().copied()));
                elem.annotations.set(GateOn(reaching.clone()));
            }
            if heads.len() > 1 {
                self.set_flag.extend(reaching.iter().copied());
            }
            for head in &heads {
                pending.remove(head);
            }
            add_flows(&mut pending, &elem.jumps);
        }
    }
}

fn add_flows(pending: &mut BTreeMap<BlockId, BTreeSet<Coord>>, jumps: &Jumps) {
    for (coord, target) in &jumps.flow {
        pending.entry(*target).or_default().insert(*coord);
    }
}

/// Splits a loop's exits into those that continue the enclosing loop and
/// those that return from the enclosing function.
fn loop_exits(jumps: &Jumps, parent_loop: Option<BlockId>) -> (BTreeSet<Coord>, BTreeSet<Coord>) {
    let mut recurse_on = BTreeSet::new();
    let mut return_on = BTreeSet::new();
    for (coord, head) in &jumps.cont {
        if Some(*head) == parent_loop {
            recurse_on.insert(*coord);
        } else {
            return_on.insert(*coord);
        }
    }
    return_on.extend(jumps.brk.keys().copied());
    return_on.extend(jumps.ret.iter().copied());
    (recurse_on, return_on)
}

/// Computes the flag sets of a reconstructed method and annotates its tree.
pub fn instrument(method: &mut StructuredMethod) -> FlagSets {
    let mut flags = FlagSets {
        recurse_flag: method.recurse_locations.clone(),
        ..Default::default()
    };
    flags.assign(&mut method.root, None);
    debug!(
        "flags: set {:?}, return {:?}, recurse {:?}",
        flags.set_flag, flags.return_jump, flags.recurse_flag
    );
    flags
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::MethodBuilder;
    use crate::loops::LoopForest;
    use crate::structure::reconstruct;

    fn instrumented(builder: &MethodBuilder) -> (StructuredMethod, FlagSets) {
        let mut method = reconstruct(&builder.graph()).unwrap();
        let flags = instrument(&mut method);
        (method, flags)
    }

    fn coords(list: &[Coord]) -> BTreeSet<Coord> {
        list.iter().copied().collect()
    }

    fn find_loop(root: &GraphElem, head: u32) -> GraphElem {
        let mut found = None;
        root.visit(&mut |e| {
            if e.is_loop() && e.head == BlockId(head) {
                found = Some(e.clone());
            }
        });
        found.unwrap()
    }

    fn every_waited_coord(root: &GraphElem) -> BTreeSet<Coord> {
        let mut waited = BTreeSet::new();
        root.visit(&mut |e| {
            if let Some(GateOn(c)) = e.annotations.get::<GateOn>() {
                waited.extend(c.iter().copied());
            }
            if let Some(ChooseBy(by)) = e.annotations.get::<ChooseBy>() {
                waited.extend(by.values().flat_map(|c| c.iter().copied()));
            }
            if let Some(RecurseOn(c)) = e.annotations.get::<RecurseOn>() {
                waited.extend(c.iter().copied());
            }
            if let Some(ReturnOn(c)) = e.annotations.get::<ReturnOn>() {
                waited.extend(c.iter().copied());
            }
        });
        waited
    }

    #[test]
    fn test_while_true_with_break_and_continue() {
        // 0 -> 1; 1 -> 2 | 1; 2 -> 3; 3 return
        let mut b = MethodBuilder::new();
        b.goto(0, 1);
        b.branch(1, 2, 1);
        b.goto(2, 3);
        b.ret(3);
        let (method, flags) = instrumented(&b);

        let l = find_loop(&method.root, 1);
        assert_eq!(l.annotations.get::<ValueLoop>(), Some(&ValueLoop(false)));
        assert!(flags.return_jump.contains(&Coord::taken(BlockId(1))));
        assert_eq!(flags.recurse_flag, coords(&[Coord::not_taken(BlockId(1))]));
        assert!(!flags.emits_code(&Coord::exit(BlockId(0))));
        assert!(flags.emits_code(&Coord::not_taken(BlockId(1))));
    }

    #[test]
    fn test_loop_with_return_is_a_value_loop() {
        // 0 -> 1; 1 -> 2 | 3; 2 return; 3 -> 1
        let mut b = MethodBuilder::new();
        b.goto(0, 1);
        b.branch(1, 2, 3);
        b.ret(2);
        b.goto(3, 1);
        let (method, flags) = instrumented(&b);
        let l = find_loop(&method.root, 1);
        assert_eq!(l.annotations.get::<ValueLoop>(), Some(&ValueLoop(true)));
        assert_eq!(
            l.annotations.get::<ReturnOn>(),
            Some(&ReturnOn(coords(&[Coord::exit(BlockId(2))])))
        );
        assert!(flags.set_flag.contains(&Coord::exit(BlockId(2))));
    }

    #[test]
    fn test_continue_of_outer_loop_recurses_from_inner_call_site() {
        // 0 -> 1; 1 -> 2 | 5; 2 -> 1 | 3; 3 -> 2 | 4; 4 -> 1; 5 return
        let mut b = MethodBuilder::new();
        b.goto(0, 1);
        b.branch(1, 2, 5);
        b.branch(2, 1, 3);
        b.branch(3, 2, 4);
        b.goto(4, 1);
        b.ret(5);
        let (method, flags) = instrumented(&b);
        let inner = find_loop(&method.root, 2);
        assert_eq!(
            inner.annotations.get::<RecurseOn>(),
            Some(&RecurseOn(coords(&[Coord::taken(BlockId(2))])))
        );
        assert!(flags.set_flag.contains(&Coord::taken(BlockId(2))));
        assert!(flags.return_jump.contains(&Coord::taken(BlockId(2))));
        assert!(!flags.recurse_flag.contains(&Coord::taken(BlockId(2))));
    }

    #[test]
    fn test_break_out_of_two_loops_returns_from_inner() {
        // 0 -> 1; 1 -> 2 | 6; 2 -> 3; 3 -> 6 | 4; 4 -> 2 | 5; 5 -> 1; 6 -> 7; 7 return
        let mut b = MethodBuilder::new();
        b.goto(0, 1);
        b.branch(1, 2, 6);
        b.goto(2, 3);
        b.branch(3, 6, 4);
        b.branch(4, 2, 5);
        b.goto(5, 1);
        b.goto(6, 7);
        b.ret(7);
        let (method, flags) = instrumented(&b);
        let escape = Coord::taken(BlockId(3));
        let inner = find_loop(&method.root, 2);
        let ReturnOn(return_on) = inner.annotations.get::<ReturnOn>().unwrap();
        assert!(return_on.contains(&escape));
        assert!(flags.set_flag.contains(&escape));
        assert!(flags.return_jump.contains(&escape));

        // Both exits of the outer loop meet at block 6 without a gate.
        let outer = find_loop(&method.root, 1);
        assert_eq!(
            outer.jumps.flow,
            [
                (Coord::not_taken(BlockId(1)), BlockId(6)),
                (escape, BlockId(6))
            ]
            .into_iter()
            .collect()
        );
        let mut gated = false;
        method.root.visit(&mut |e| {
            if e.head == BlockId(6) && e.annotations.has::<GateOn>() {
                gated = true;
            }
        });
        assert!(!gated);
    }

    #[test]
    fn test_skippable_sequence_element_is_gated() {
        // 0 -> 1 | 3; 1 -> 1 | 2; 2 -> 3; 3 return
        let mut b = MethodBuilder::new();
        b.branch(0, 1, 3);
        b.branch(1, 1, 2);
        b.goto(2, 3);
        b.ret(3);
        let (method, flags) = instrumented(&b);
        let l = find_loop(&method.root, 1);
        assert_eq!(
            l.annotations.get::<GateOn>(),
            Some(&GateOn(coords(&[Coord::taken(BlockId(0))])))
        );
        assert!(flags.set_flag.contains(&Coord::taken(BlockId(0))));
        assert!(flags.set_flag.contains(&Coord::not_taken(BlockId(0))));
    }

    #[test]
    fn test_irreducible_merge_chooses_by_incoming_edges() {
        let mut b = MethodBuilder::new();
        b.branch(0, 1, 2);
        b.goto(1, 2);
        b.branch(2, 1, 3);
        b.ret(3);
        let (method, flags) = instrumented(&b);
        let mut choose = None;
        method.root.visit(&mut |e| {
            if let Some(c) = e.annotations.get::<ChooseBy>() {
                choose = Some(c.clone());
            }
        });
        let ChooseBy(by) = choose.unwrap();
        assert_eq!(by.len(), 2);
        for coord in by.values().flatten() {
            assert!(flags.set_flag.contains(coord));
        }
        assert!(flags.recurse_flag.contains(&Coord::taken(BlockId(2))));
        assert!(flags.recurse_flag.contains(&Coord::exit(BlockId(1))));
    }

    #[test]
    fn test_every_waited_coord_is_flagged() {
        let graphs = {
            let mut nested = MethodBuilder::new();
            nested.goto(0, 1);
            nested.branch(1, 2, 6);
            nested.goto(2, 3);
            nested.branch(3, 6, 4);
            nested.branch(4, 2, 5);
            nested.goto(5, 1);
            nested.goto(6, 7);
            nested.ret(7);
            let mut gated = MethodBuilder::new();
            gated.branch(0, 1, 3);
            gated.branch(1, 1, 2);
            gated.goto(2, 3);
            gated.ret(3);
            let mut irreducible = MethodBuilder::new();
            irreducible.branch(0, 1, 2);
            irreducible.goto(1, 2);
            irreducible.branch(2, 1, 3);
            irreducible.ret(3);
            vec![nested, gated, irreducible]
        };
        for builder in &graphs {
            let (method, flags) = instrumented(builder);
            let missing: Vec<_> = every_waited_coord(&method.root)
                .difference(&flags.set_flag)
                .copied()
                .collect();
            assert!(missing.is_empty(), "unflagged coords {:?}", missing);
        }
    }

    #[test]
    fn test_recurse_and_return_exits_are_disjoint() {
        let mut b = MethodBuilder::new();
        b.goto(0, 1);
        b.branch(1, 2, 5);
        b.branch(2, 1, 3);
        b.branch(3, 2, 4);
        b.goto(4, 1);
        b.ret(5);
        let (method, _) = instrumented(&b);
        method.root.visit(&mut |e| {
            if let (Some(RecurseOn(r)), Some(ReturnOn(t))) =
                (e.annotations.get::<RecurseOn>(), e.annotations.get::<ReturnOn>())
            {
                assert!(r.is_disjoint(t));
            }
        });
    }

    #[test]
    fn test_instrumentation_is_deterministic() {
        let mut b = MethodBuilder::new();
        b.branch(0, 1, 2);
        b.goto(1, 2);
        b.branch(2, 1, 3);
        b.ret(3);
        let (_, first) = instrumented(&b);
        let (_, second) = instrumented(&b);
        assert_eq!(first, second);
    }

    #[test]
    #[should_panic(expected = "BUG")]
    fn test_break_outside_loop_is_rejected() {
        let coord = Coord::exit(BlockId(0));
        let mut method = StructuredMethod {
            root: GraphElem::new(BlockId(0), ElemKind::Jump { coord }, Jumps::brk(coord, BlockId(1))),
            recurse_locations: BTreeSet::new(),
            loops: LoopForest::default(),
        };
        instrument(&mut method);
    }
}
