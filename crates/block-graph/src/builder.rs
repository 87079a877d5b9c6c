// Copyright (c) Asymptotic Labs
// SPDX-License-Identifier: Apache-2.0

//! Concise construction of method bodies, mostly for tests and tools.

use crate::block::{BasicBlock, BlockGraph, BlockId};
use crate::error::GraphError;
use crate::instr::{Expr, Instr, Operand};
use crate::model::{BindingPlan, LocalDecl, MethodBody, Type};

#[derive(Debug, Clone)]
pub struct MethodBuilder {
    blocks: Vec<BasicBlock>,
    locals: Vec<LocalDecl>,
    params: Vec<Type>,
    return_type: Type,
    is_static: bool,
    bindings: Option<BindingPlan>,
}

impl Default for MethodBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl MethodBuilder {
    /// A static void method without blocks. The first block added is the entry.
    pub fn new() -> Self {
        Self {
            blocks: vec![],
            locals: vec![],
            params: vec![],
            return_type: Type::Void,
            is_static: true,
            bindings: None,
        }
    }

    pub fn local(&mut self, name: &str, ty: Type) -> &mut Self {
        self.locals.push(LocalDecl {
            name: name.to_string(),
            ty,
        });
        self
    }

    pub fn param(&mut self, ty: Type) -> &mut Self {
        self.params.push(ty);
        self
    }

    pub fn returns(&mut self, ty: Type) -> &mut Self {
        self.return_type = ty;
        self
    }

    pub fn instance(&mut self) -> &mut Self {
        self.is_static = false;
        self
    }

    pub fn bindings(&mut self, plan: BindingPlan) -> &mut Self {
        self.bindings = Some(plan);
        self
    }

    pub fn block(&mut self, id: u32, instrs: Vec<Instr>, succs: &[u32]) -> &mut Self {
        self.blocks.push(BasicBlock {
            id: BlockId(id),
            instrs,
            succs: succs.iter().map(|s| BlockId(*s)).collect(),
        });
        self
    }

    pub fn goto(&mut self, id: u32, succ: u32) -> &mut Self {
        self.block(id, vec![Instr::Goto], &[succ])
    }

    /// A block ending in a nondeterministic branch.
    pub fn branch(&mut self, id: u32, taken: u32, not_taken: u32) -> &mut Self {
        self.branch_on(id, vec![], Expr::Nondet, taken, not_taken)
    }

    pub fn branch_on(
        &mut self,
        id: u32,
        mut instrs: Vec<Instr>,
        cond: Expr,
        taken: u32,
        not_taken: u32,
    ) -> &mut Self {
        instrs.push(Instr::If { cond });
        self.block(id, instrs, &[taken, not_taken])
    }

    pub fn ret(&mut self, id: u32) -> &mut Self {
        self.block(id, vec![Instr::Return { value: None }], &[])
    }

    pub fn ret_value(&mut self, id: u32, mut instrs: Vec<Instr>, value: Operand) -> &mut Self {
        instrs.push(Instr::Return { value: Some(value) });
        self.block(id, instrs, &[])
    }

    fn entry(&self) -> BlockId {
        self.blocks.first().map_or(BlockId(0), |b| b.id)
    }

    pub fn try_graph(&self) -> Result<BlockGraph, GraphError> {
        BlockGraph::new(self.entry(), &self.blocks)
    }

    /// # Panics
    ///
    /// When the blocks do not form a well-formed graph.
    pub fn graph(&self) -> BlockGraph {
        match self.try_graph() {
            Ok(graph) => graph,
            Err(err) => panic!("malformed test graph: {}", err),
        }
    }

    pub fn build(&self, class: &str, name: &str) -> MethodBody {
        MethodBody {
            class: class.to_string(),
            name: name.to_string(),
            is_static: self.is_static,
            params: self.params.clone(),
            return_type: self.return_type.clone(),
            locals: self.locals.clone(),
            entry: self.entry(),
            blocks: self.blocks.clone(),
            bindings: self.bindings.clone(),
        }
    }
}
