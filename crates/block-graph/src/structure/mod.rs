// Copyright (c) Asymptotic Labs
// SPDX-License-Identifier: Apache-2.0

//! Structured representation of a method body.
//!
//! A method's block graph is turned into a tree of [`GraphElem`] nodes:
//! jumps, two-way conditionals, sequences, loops and merges. Every node
//! summarizes in its [`Jumps`] record the edges by which control can leave it.

pub mod annotations;
pub mod reconstructor;

pub use annotations::{Annotations, ChooseBy, GateOn, RecurseOn, ReturnOn, ValueLoop};
pub use reconstructor::{reconstruct, StructuredMethod};

use crate::block::{BlockId, Coord};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Ways control can leave a structured node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Jumps {
    /// Normal edges to a block of the enclosing region.
    pub flow: BTreeSet<(Coord, BlockId)>,
    /// Edges leaving an enclosing loop, with their target block.
    pub brk: BTreeMap<Coord, BlockId>,
    /// Edges back to the head of a loop, with the head they target.
    pub cont: BTreeSet<(Coord, BlockId)>,
    /// Method returns.
    pub ret: BTreeSet<Coord>,
}

impl Jumps {
    pub fn flow(coord: Coord, target: BlockId) -> Self {
        let mut jumps = Jumps::default();
        jumps.flow.insert((coord, target));
        jumps
    }

    pub fn brk(coord: Coord, target: BlockId) -> Self {
        let mut jumps = Jumps::default();
        jumps.brk.insert(coord, target);
        jumps
    }

    pub fn cont(coord: Coord, head: BlockId) -> Self {
        let mut jumps = Jumps::default();
        jumps.cont.insert((coord, head));
        jumps
    }

    pub fn ret(coord: Coord) -> Self {
        let mut jumps = Jumps::default();
        jumps.ret.insert(coord);
        jumps
    }

    pub fn extend(&mut self, other: &Jumps) {
        self.flow.extend(other.flow.iter().copied());
        self.brk.extend(other.brk.iter().map(|(c, t)| (*c, *t)));
        self.cont.extend(other.cont.iter().copied());
        self.ret.extend(other.ret.iter().copied());
    }

    pub fn is_empty(&self) -> bool {
        self.flow.is_empty() && self.brk.is_empty() && self.cont.is_empty() && self.ret.is_empty()
    }

    /// Every coord mentioned, whatever its kind.
    pub fn coords(&self) -> BTreeSet<Coord> {
        self.flow
            .iter()
            .map(|(c, _)| *c)
            .chain(self.brk.keys().copied())
            .chain(self.cont.iter().map(|(c, _)| *c))
            .chain(self.ret.iter().copied())
            .collect()
    }
}

/// One arm of a conditional.
#[derive(Debug, Clone)]
pub enum Continuation {
    /// Control leaves the conditional along `coord`.
    Jump { coord: Coord, jumps: Jumps },
    /// The arm's target is nested inside the conditional.
    Elem(Box<GraphElem>),
}

impl Continuation {
    pub fn jumps(&self) -> &Jumps {
        match self {
            Continuation::Jump { jumps, .. } => jumps,
            Continuation::Elem(elem) => &elem.jumps,
        }
    }

    pub fn elem(&self) -> Option<&GraphElem> {
        match self {
            Continuation::Elem(elem) => Some(elem),
            Continuation::Jump { .. } => None,
        }
    }
}

#[derive(Debug, Clone)]
pub enum ElemKind {
    /// A block left along a single coord: a fallthrough, goto or return.
    Jump { coord: Coord },
    /// A block ending in a two-way branch.
    Conditional {
        taken: Continuation,
        not_taken: Continuation,
    },
    Sequence(Vec<GraphElem>),
    Loop {
        entries: BTreeSet<BlockId>,
        body: Box<GraphElem>,
    },
    /// Alternatives entered at different heads, selected at runtime. `incoming`
    /// lists, per head, every coord of an edge into it.
    Merge {
        alternatives: Vec<GraphElem>,
        incoming: BTreeMap<BlockId, BTreeSet<Coord>>,
    },
}

#[derive(Debug, Clone)]
pub struct GraphElem {
    pub head: BlockId,
    pub kind: ElemKind,
    pub jumps: Jumps,
    pub annotations: Annotations,
}

impl GraphElem {
    pub fn new(head: BlockId, kind: ElemKind, jumps: Jumps) -> Self {
        Self {
            head,
            kind,
            jumps,
            annotations: Annotations::default(),
        }
    }

    /// Chains elements into a sequence, splicing nested sequences and
    /// dropping flows that are consumed by a later element.
    pub fn sequence(elems: Vec<GraphElem>) -> GraphElem {
        let mut flat = Vec::with_capacity(elems.len());
        for elem in elems {
            match elem.kind {
                ElemKind::Sequence(inner) if elem.annotations.is_empty() => flat.extend(inner),
                kind => flat.push(GraphElem { kind, ..elem }),
            }
        }
        assert!(!flat.is_empty(), "BUG: empty sequence");
        if flat.len() == 1 {
            if let Some(only) = flat.pop() {
                return only;
            }
        }

        let mut jumps = Jumps::default();
        for (i, elem) in flat.iter().enumerate() {
            let downstream: BTreeSet<BlockId> =
                flat[i + 1..].iter().flat_map(|e| e.heads()).collect();
            jumps.flow.extend(
                elem.jumps
                    .flow
                    .iter()
                    .filter(|(_, target)| !downstream.contains(target))
                    .copied(),
            );
            jumps.brk.extend(elem.jumps.brk.iter().map(|(c, t)| (*c, *t)));
            jumps.cont.extend(elem.jumps.cont.iter().copied());
            jumps.ret.extend(elem.jumps.ret.iter().copied());
        }
        GraphElem::new(flat[0].head, ElemKind::Sequence(flat), jumps)
    }

    /// Blocks through which control can enter this node.
    pub fn heads(&self) -> BTreeSet<BlockId> {
        match &self.kind {
            ElemKind::Sequence(elems) => elems[0].heads(),
            ElemKind::Loop { entries, .. } => entries.clone(),
            ElemKind::Merge { alternatives, .. } => {
                alternatives.iter().flat_map(|a| a.heads()).collect()
            }
            ElemKind::Jump { .. } | ElemKind::Conditional { .. } => [self.head].into_iter().collect(),
        }
    }

    pub fn is_loop(&self) -> bool {
        matches!(self.kind, ElemKind::Loop { .. })
    }

    /// Visits this node and all nested nodes in pre-order.
    pub fn visit<'a>(&'a self, f: &mut dyn FnMut(&'a GraphElem)) {
        f(self);
        match &self.kind {
            ElemKind::Jump { .. } => {}
            ElemKind::Conditional { taken, not_taken } => {
                for arm in [taken, not_taken] {
                    if let Continuation::Elem(elem) = arm {
                        elem.visit(f);
                    }
                }
            }
            ElemKind::Sequence(elems) | ElemKind::Merge { alternatives: elems, .. } => {
                for elem in elems {
                    elem.visit(f);
                }
            }
            ElemKind::Loop { body, .. } => body.visit(f),
        }
    }

    fn fmt_indented(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        let pad = "  ".repeat(depth);
        let gate = self
            .annotations
            .get::<GateOn>()
            .map(|g| format!(" gate{:?}", g.0.iter().map(|c| c.to_string()).collect::<Vec<_>>()))
            .unwrap_or_default();
        match &self.kind {
            ElemKind::Jump { coord } => writeln!(f, "{}jump {}{}", pad, coord, gate),
            ElemKind::Conditional { taken, not_taken } => {
                writeln!(f, "{}cond {}{}", pad, self.head, gate)?;
                for (label, arm) in [("+", taken), ("-", not_taken)] {
                    match arm {
                        Continuation::Jump { coord, .. } => {
                            writeln!(f, "{}  {} jump {}", pad, label, coord)?
                        }
                        Continuation::Elem(elem) => {
                            writeln!(f, "{}  {}", pad, label)?;
                            elem.fmt_indented(f, depth + 2)?;
                        }
                    }
                }
                Ok(())
            }
            ElemKind::Sequence(elems) => {
                writeln!(f, "{}seq{}", pad, gate)?;
                elems.iter().try_for_each(|e| e.fmt_indented(f, depth + 1))
            }
            ElemKind::Loop { body, .. } => {
                writeln!(f, "{}loop {}{}", pad, self.head, gate)?;
                body.fmt_indented(f, depth + 1)
            }
            ElemKind::Merge { alternatives, .. } => {
                writeln!(f, "{}merge{}", pad, gate)?;
                alternatives.iter().try_for_each(|e| e.fmt_indented(f, depth + 1))
            }
        }
    }
}

impl fmt::Display for GraphElem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_indented(f, 0)
    }
}
