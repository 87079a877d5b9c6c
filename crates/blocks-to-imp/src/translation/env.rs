// Copyright (c) Asymptotic Labs
// SPDX-License-Identifier: Apache-2.0

//! Lexical state threaded through the translation of one method.

use block_graph::{Binding, Coord, LocalName};
use im::OrdMap;
use std::collections::BTreeMap;
use std::rc::Rc;

/// Name of the control cell every flagged method allocates.
pub const CONTROL_CELL: &str = "__ctl";

/// The loop function being generated.
#[derive(Debug)]
pub struct LoopContext {
    pub name: String,
    pub params: Vec<String>,
    /// Whether the function returns the method's value rather than unit.
    pub value: bool,
}

/// Locals in scope at a point of the output.
///
/// Cloned whenever the output opens a nested block; bindings made inside the
/// block are dropped with the clone.
#[derive(Debug, Clone, Default)]
pub struct Env {
    bound: OrdMap<LocalName, Binding>,
    /// Locals introduced at their first definition rather than up front.
    pending: OrdMap<LocalName, Binding>,
    loop_ctx: Option<Rc<LoopContext>>,
}

impl Env {
    pub fn binding(&self, local: &str) -> Option<Binding> {
        self.bound.get(local).copied()
    }

    pub fn bind(&mut self, local: &str, binding: Binding) {
        self.pending.remove(local);
        self.bound.insert(local.to_string(), binding);
    }

    pub fn defer(&mut self, local: &str, binding: Binding) {
        self.pending.insert(local.to_string(), binding);
    }

    pub fn deferred(&self, local: &str) -> Option<Binding> {
        self.pending.get(local).copied()
    }

    /// Bound locals in name order.
    pub fn bound_locals(&self) -> impl Iterator<Item = &LocalName> {
        self.bound.keys()
    }

    pub fn loop_ctx(&self) -> Option<&LoopContext> {
        self.loop_ctx.as_deref()
    }

    pub fn enter_loop(&self, ctx: LoopContext) -> Env {
        Env {
            loop_ctx: Some(Rc::new(ctx)),
            ..self.clone()
        }
    }
}

/// Flag ids of a method, handed out in first-use order from 1.
#[derive(Debug, Default)]
pub struct CoordTable {
    ids: BTreeMap<Coord, i64>,
    order: Vec<Coord>,
}

impl CoordTable {
    pub fn id(&mut self, coord: Coord) -> i64 {
        if let Some(id) = self.ids.get(&coord) {
            return *id;
        }
        self.order.push(coord);
        let id = self.order.len() as i64;
        self.ids.insert(coord, id);
        id
    }

    pub fn entries(&self) -> Vec<(i64, Coord)> {
        self.order
            .iter()
            .enumerate()
            .map(|(i, c)| (i as i64 + 1, *c))
            .collect()
    }
}
