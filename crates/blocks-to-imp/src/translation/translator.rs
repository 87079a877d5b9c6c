// Copyright (c) Asymptotic Labs
// SPDX-License-Identifier: Apache-2.0

//! Walks an instrumented method and emits its imp function plus one function
//! per loop.

use crate::error::{TranslationError, TranslationResult};
use crate::program_builder::Discovery;
use crate::storage::{BindingTable, ObjectModel, StorageLayout};
use crate::translation::env::{CoordTable, Env, LoopContext, CONTROL_CELL};
use crate::translation::names::TempNames;
use crate::translation::values::default_value;
use block_graph::instr::{IdentitySource, Instr, Operand};
use block_graph::structure::annotations::{ChooseBy, GateOn, RecurseOn, ReturnOn, ValueLoop};
use block_graph::structure::{Continuation, ElemKind};
use block_graph::{
    instrument, reconstruct, Binding, BlockGraph, BlockId, Coord, FlagSets, GraphElem,
    LocalName, MethodBody, MethodId, ProgramModel, Type,
};
use imp_format::{ImpExpr, ImpFunction, InstructionStream, Stmt};
use log::debug;
use std::collections::BTreeSet;

/// An incoming argument of the generated function.
#[derive(Debug, Clone)]
pub(crate) struct IncomingParam {
    pub name: String,
    pub local: Option<LocalName>,
    pub ty: Type,
}

/// Everything one method translates to.
#[derive(Debug)]
pub struct MethodOutput {
    /// Loop and dispatch functions first, the method's own function last.
    pub functions: Vec<ImpFunction>,
    /// Flag ids handed out in this method.
    pub flags: Vec<(i64, Coord)>,
}

/// Program-wide inputs shared by every method translation.
pub struct ProgramContext<'a> {
    pub program: &'a ProgramModel,
    pub layout: &'a StorageLayout,
    pub model: &'a dyn ObjectModel,
}

pub struct MethodTranslator<'a> {
    pub(super) cx: &'a ProgramContext<'a>,
    pub(super) discovery: &'a mut Discovery,
    pub(super) id: &'a MethodId,
    pub(super) method: &'a MethodBody,
    pub(super) mangled: String,
    pub(super) incoming: Vec<IncomingParam>,
    pub(super) side_functions: Vec<ImpFunction>,
    flags: FlagSets,
    coords: CoordTable,
    bindings: BindingTable,
}

impl<'a> MethodTranslator<'a> {
    pub fn new(
        cx: &'a ProgramContext<'a>,
        discovery: &'a mut Discovery,
        id: &'a MethodId,
        method: &'a MethodBody,
    ) -> TranslationResult<Self> {
        let mangled = discovery.request(id, method);
        let bindings = BindingTable::new(method)?;
        Ok(Self {
            cx,
            discovery,
            id,
            method,
            mangled,
            incoming: incoming_params(method),
            side_functions: vec![],
            flags: FlagSets::default(),
            coords: CoordTable::default(),
            bindings,
        })
    }

    pub fn translate(mut self) -> TranslationResult<MethodOutput> {
        let id = self.id;
        let graph_error = |source| TranslationError::Graph {
            method: id.clone(),
            source,
        };
        let graph = BlockGraph::new(self.method.entry, &self.method.blocks).map_err(graph_error)?;
        let mut structured = reconstruct(&graph).map_err(graph_error)?;
        self.flags = instrument(&mut structured);

        let mut env = Env::default();
        let mut out = InstructionStream::new();
        if self.uses_control() {
            out.let_ref(CONTROL_CELL, ImpExpr::Int(0));
        }
        self.bind_entry(&mut env, &mut out)?;
        self.translate_elem(&structured.root, &mut env, &mut out)?;
        if !out.is_terminal() {
            out.ret(self.default_return(&env));
        }

        let params = self.incoming.iter().map(|p| p.name.clone()).collect();
        let function = ImpFunction::new(self.mangled.clone(), params, out.finish());
        debug!(
            "translated {} into {} with {} helper functions",
            self.id,
            self.mangled,
            self.side_functions.len()
        );
        let mut functions = std::mem::take(&mut self.side_functions);
        functions.push(function);
        Ok(MethodOutput {
            functions,
            flags: self.coords.entries(),
        })
    }

    fn uses_control(&self) -> bool {
        !self.flags.set_flag.is_empty()
    }

    pub(super) fn temps(&mut self, block: BlockId, index: usize) -> TempNames {
        TempNames::new(self.discovery.unit(self.id, block, index))
    }

    pub(super) fn unsupported(
        &self,
        construct: impl Into<String>,
        instr: &Instr,
        operand_types: Vec<String>,
    ) -> TranslationError {
        TranslationError::Unsupported {
            method: self.id.clone(),
            construct: construct.into(),
            instruction: instr.to_string(),
            operand_types,
        }
    }

    /// Value returned when control leaves the current function without an
    /// explicit return value.
    fn default_return(&self, env: &Env) -> ImpExpr {
        match env.loop_ctx() {
            Some(ctx) if !ctx.value => ImpExpr::Unit,
            _ => default_value(&self.method.return_type),
        }
    }

    fn bind_entry(&mut self, env: &mut Env, out: &mut InstructionStream) -> TranslationResult<()> {
        for (local, binding) in self.bindings.entry().clone() {
            let param = self
                .incoming
                .iter()
                .find(|p| p.local.as_deref() == Some(local.as_str()));
            match (param, binding) {
                (Some(param), Binding::Mutable) => {
                    out.let_ref(local.clone(), ImpExpr::var(param.name.clone()))
                }
                (Some(param), Binding::Const) => {
                    out.let_var(local.clone(), ImpExpr::var(param.name.clone()))
                }
                (None, Binding::Mutable) => {
                    let init = default_value(self.local_type(&local)?);
                    out.let_ref(local.clone(), init);
                }
                (None, Binding::Const) => {
                    env.defer(&local, Binding::Const);
                    continue;
                }
            }
            env.bind(&local, binding);
        }
        Ok(())
    }

    pub(super) fn local_type(&self, local: &str) -> TranslationResult<&'a Type> {
        self.method.local_type(local).ok_or_else(|| {
            TranslationError::Malformed(format!(
                "local {} of {} is not declared",
                local, self.id
            ))
        })
    }

    pub(super) fn translate_elem(
        &mut self,
        elem: &GraphElem,
        env: &mut Env,
        out: &mut InstructionStream,
    ) -> TranslationResult<()> {
        match &elem.kind {
            ElemKind::Jump { coord } => {
                let returned = self.translate_block(elem.head, env, out)?.1;
                if !returned {
                    self.jump(*coord, env, out)?;
                }
            }
            ElemKind::Conditional { taken, not_taken } => {
                let cond = self.translate_block(elem.head, env, out)?.0.ok_or_else(|| {
                    TranslationError::Internal(format!(
                        "block {} of {} is a conditional without a condition",
                        elem.head, self.id
                    ))
                })?;
                let then_branch = self.translate_arm(taken, env)?;
                let else_branch = self.translate_arm(not_taken, env)?;
                out.push(Stmt::If {
                    cond,
                    then_branch,
                    else_branch,
                });
            }
            ElemKind::Sequence(elems) => {
                for child in elems {
                    match child.annotations.get::<GateOn>() {
                        Some(GateOn(coords)) => {
                            let cond = self.gate(coords);
                            let mut inner_env = env.clone();
                            let mut inner = InstructionStream::new();
                            self.translate_elem(child, &mut inner_env, &mut inner)?;
                            let then_branch = inner.finish();
                            if !then_branch.is_empty() {
                                out.push(Stmt::If {
                                    cond,
                                    then_branch,
                                    else_branch: vec![],
                                });
                            }
                        }
                        None => self.translate_elem(child, env, out)?,
                    }
                }
            }
            ElemKind::Loop { body, .. } => self.translate_loop(elem, body, env, out)?,
            ElemKind::Merge { alternatives, .. } => {
                self.translate_merge(elem, alternatives, env, out)?
            }
        }
        Ok(())
    }

    fn translate_arm(&mut self, arm: &Continuation, env: &Env) -> TranslationResult<Vec<Stmt>> {
        let mut env = env.clone();
        let mut out = InstructionStream::new();
        match arm {
            Continuation::Jump { coord, .. } => self.jump(*coord, &env, &mut out)?,
            Continuation::Elem(elem) => self.translate_elem(elem, &mut env, &mut out)?,
        }
        Ok(out.finish())
    }

    /// Emits what leaving along `coord` means at this point of the output.
    fn jump(&mut self, coord: Coord, env: &Env, out: &mut InstructionStream) -> TranslationResult<()> {
        if self.flags.set_flag.contains(&coord) {
            self.set_flag(coord, out);
        }
        if self.flags.recurse_flag.contains(&coord) {
            let ctx = env.loop_ctx().ok_or_else(|| {
                TranslationError::Internal(format!(
                    "back edge {} of {} outside of any loop",
                    coord, self.id
                ))
            })?;
            out.ret(loop_call(ctx));
        } else if self.flags.return_jump.contains(&coord) {
            out.ret(self.default_return(env));
        }
        Ok(())
    }

    fn set_flag(&mut self, coord: Coord, out: &mut InstructionStream) {
        let id = self.coords.id(coord);
        out.assign(CONTROL_CELL, ImpExpr::Int(id));
    }

    fn gate(&mut self, coords: &BTreeSet<Coord>) -> ImpExpr {
        let ids: Vec<i64> = coords.iter().map(|c| self.coords.id(*c)).collect();
        ImpExpr::any_of(&ImpExpr::deref(CONTROL_CELL), &ids)
    }

    fn translate_loop(
        &mut self,
        elem: &GraphElem,
        body: &GraphElem,
        env: &Env,
        out: &mut InstructionStream,
    ) -> TranslationResult<()> {
        let value = elem.annotations.get::<ValueLoop>().map_or(false, |v| v.0);
        let name = format!("{}__loop_{}", self.mangled, elem.head);
        let mut params = vec![];
        if self.uses_control() {
            params.push(CONTROL_CELL.to_string());
        }
        params.extend(self.incoming.iter().map(|p| p.name.clone()));
        params.extend(env.bound_locals().cloned());

        let mut inner_env = env.enter_loop(LoopContext {
            name: name.clone(),
            params: params.clone(),
            value,
        });
        let mut inner = InstructionStream::new();
        self.translate_elem(body, &mut inner_env, &mut inner)?;
        if !inner.is_terminal() {
            inner.ret(self.default_return(&inner_env));
        }
        debug!(
            "loop at block {} of {} becomes {}({})",
            elem.head,
            self.id,
            name,
            params.join(", ")
        );
        let call = ImpExpr::call(name.clone(), params.iter().map(ImpExpr::var).collect());
        self.side_functions
            .push(ImpFunction::new(name, params, inner.finish()));

        let result = format!("__loop_res_{}", elem.head);
        if value {
            out.let_var(result.clone(), call);
        } else {
            out.push(Stmt::Expr(call));
        }

        if let Some(RecurseOn(coords)) = elem
            .annotations
            .get::<RecurseOn>()
            .filter(|r| !r.0.is_empty())
        {
            let outer = env.loop_ctx().ok_or_else(|| {
                TranslationError::Internal(format!(
                    "loop at block {} of {} continues an enclosing loop it does not have",
                    elem.head, self.id
                ))
            })?;
            let again = loop_call(outer);
            let cond = self.gate(coords);
            out.push(Stmt::If {
                cond,
                then_branch: vec![Stmt::Return(again)],
                else_branch: vec![],
            });
        }
        if let Some(ReturnOn(coords)) = elem
            .annotations
            .get::<ReturnOn>()
            .filter(|r| !r.0.is_empty())
        {
            let (returns, exits): (BTreeSet<Coord>, BTreeSet<Coord>) =
                coords.iter().partition(|c| elem.jumps.ret.contains(*c));
            if !returns.is_empty() {
                let cond = self.gate(&returns);
                out.push(Stmt::If {
                    cond,
                    then_branch: vec![Stmt::Return(ImpExpr::var(result))],
                    else_branch: vec![],
                });
            }
            if !exits.is_empty() {
                let cond = self.gate(&exits);
                out.push(Stmt::If {
                    cond,
                    then_branch: vec![Stmt::Return(self.default_return(env))],
                    else_branch: vec![],
                });
            }
        }
        Ok(())
    }

    fn translate_merge(
        &mut self,
        elem: &GraphElem,
        alternatives: &[GraphElem],
        env: &Env,
        out: &mut InstructionStream,
    ) -> TranslationResult<()> {
        let ChooseBy(choose) = elem.annotations.get::<ChooseBy>().ok_or_else(|| {
            TranslationError::Internal(format!(
                "merge at block {} of {} was not instrumented",
                elem.head, self.id
            ))
        })?;
        let mut arms = vec![];
        for alt in alternatives {
            let coords = choose.get(&alt.head).ok_or_else(|| {
                TranslationError::Internal(format!(
                    "no selector for entry {} of the merge at block {}",
                    alt.head, elem.head
                ))
            })?;
            let mut ids: Vec<i64> = coords.iter().map(|c| self.coords.id(*c)).collect();
            // Reached from the start of the method, before any flag is set.
            if alt.head == self.method.entry {
                ids.insert(0, 0);
            }
            let cond = ImpExpr::any_of(&ImpExpr::deref(CONTROL_CELL), &ids);
            let mut alt_env = env.clone();
            let mut alt_out = InstructionStream::new();
            self.translate_elem(alt, &mut alt_env, &mut alt_out)?;
            arms.push((cond, alt_out.finish()));
        }
        let chain = arms
            .into_iter()
            .rev()
            .fold(vec![Stmt::assert_false()], |else_branch, (cond, then_branch)| {
                vec![Stmt::If {
                    cond,
                    then_branch,
                    else_branch,
                }]
            });
        out.extend(chain);
        Ok(())
    }

    /// Emits the block's instructions. Returns the branch condition when the
    /// block ends in one, and whether it ended in a return.
    fn translate_block(
        &mut self,
        id: BlockId,
        env: &mut Env,
        out: &mut InstructionStream,
    ) -> TranslationResult<(Option<ImpExpr>, bool)> {
        let method = self.method;
        let block = method.block(id).ok_or_else(|| {
            TranslationError::Internal(format!("block {} of {} disappeared", id, self.id))
        })?;
        self.open_block_scope(id, block.instrs.iter().filter_map(Instr::defined_local), env, out)?;

        let mut cond = None;
        let mut returned = false;
        for (index, instr) in block.instrs.iter().enumerate() {
            let mut temps = self.temps(id, index);
            match instr {
                Instr::If { cond: c } => {
                    let mut after = vec![];
                    cond = Some(self.translate_expr(c, instr, &mut temps, env, out, &mut after)?);
                    out.extend(after);
                }
                Instr::Goto => {}
                Instr::Return { value } => {
                    self.translate_return(value.as_ref(), Coord::exit(id), env, out)?;
                    returned = true;
                }
                Instr::Identity { local, source } => {
                    if env.binding(local).is_none() {
                        let param = self.identity_param(*source, instr)?;
                        self.assign_local(local, ImpExpr::var(param), env, out)?;
                    }
                }
                _ => self.translate_instr(instr, &mut temps, env, out)?,
            }
        }
        Ok((cond, returned))
    }

    fn open_block_scope<'b>(
        &self,
        id: BlockId,
        defined: impl Iterator<Item = &'b str>,
        env: &mut Env,
        out: &mut InstructionStream,
    ) -> TranslationResult<()> {
        let defined: BTreeSet<&str> = defined.collect();
        for (local, binding) in self.bindings.block(id) {
            if defined.contains(local.as_str()) {
                env.defer(local, *binding);
            } else if *binding == Binding::Mutable {
                out.let_ref(local.clone(), default_value(self.local_type(local)?));
                env.bind(local, Binding::Mutable);
            } else {
                return Err(TranslationError::Malformed(format!(
                    "local {} of {} is bound CONST at block {} which never defines it",
                    local, self.id, id
                )));
            }
        }
        Ok(())
    }

    fn identity_param(&self, source: IdentitySource, instr: &Instr) -> TranslationResult<String> {
        let index = match source {
            IdentitySource::This if !self.method.is_static => 0,
            IdentitySource::Param(i) if i < self.method.params.len() => {
                i + usize::from(!self.method.is_static)
            }
            _ => {
                return Err(TranslationError::Malformed(format!(
                    "`{}` in {} names a missing parameter",
                    instr, self.id
                )))
            }
        };
        Ok(self.incoming[index].name.clone())
    }

    fn translate_return(
        &mut self,
        value: Option<&Operand>,
        coord: Coord,
        env: &Env,
        out: &mut InstructionStream,
    ) -> TranslationResult<()> {
        let value = match value {
            Some(op) => self.operand(op, env)?,
            None => ImpExpr::Unit,
        };
        if self.flags.set_flag.contains(&coord) {
            self.set_flag(coord, out);
        }
        for param in &self.incoming {
            if let Some(local) = &param.local {
                if param.ty.is_reference() && env.binding(local) == Some(Binding::Const) {
                    out.push(Stmt::alias(
                        ImpExpr::var(param.name.clone()),
                        ImpExpr::var(local.clone()),
                    ));
                }
            }
        }
        out.ret(value);
        Ok(())
    }
}

fn loop_call(ctx: &LoopContext) -> ImpExpr {
    ImpExpr::call(ctx.name.clone(), ctx.params.iter().map(ImpExpr::var).collect())
}

fn incoming_params(method: &MethodBody) -> Vec<IncomingParam> {
    let identity = method.identity_locals();
    let receiver = (!method.is_static).then(|| IncomingParam {
        name: "__this".to_string(),
        local: identity.get(&IdentitySource::This).cloned(),
        ty: Type::Ref(method.class.clone()),
    });
    let params = method.params.iter().enumerate().map(|(i, ty)| {
        let local = identity.get(&IdentitySource::Param(i)).cloned();
        let name = match &local {
            Some(local) => format!("__in_{}", local),
            None => format!("__arg{}", i),
        };
        IncomingParam {
            name,
            local,
            ty: ty.clone(),
        }
    });
    receiver.into_iter().chain(params).collect()
}
