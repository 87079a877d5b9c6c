// Copyright (c) Asymptotic Labs
// SPDX-License-Identifier: Apache-2.0

//! Call sites: static calls, direct instance calls and devirtualized virtual
//! calls.

use crate::error::{TranslationError, TranslationResult};
use crate::storage::FieldHandle;
use crate::translation::env::Env;
use crate::translation::names::TempNames;
use crate::translation::translator::MethodTranslator;
use crate::translation::values::default_value;
use block_graph::instr::{Instr, InvokeExpr, InvokeKind, Operand};
use block_graph::{Binding, ClassName, MethodId, Type, CONSTRUCTOR_NAME};
use imp_format::{ImpExpr, ImpFunction, InstructionStream, Stmt};
use log::{debug, warn};
use std::collections::{BTreeMap, BTreeSet};

impl<'a> MethodTranslator<'a> {
    /// The call expression for `call`, or `None` when the call is dropped.
    pub(super) fn translate_call(
        &mut self,
        call: &InvokeExpr,
        instr: &Instr,
        temps: &mut TempNames,
        env: &Env,
        out: &mut InstructionStream,
        after: &mut Vec<Stmt>,
    ) -> TranslationResult<Option<ImpExpr>> {
        let target = &call.method;
        let program = self.cx.program;
        let func = match call.kind {
            InvokeKind::Static => {
                let callee = program
                    .find_method(&target.class, &target.name, target.arity)
                    .ok_or_else(|| self.unsupported("call to a method without a body", instr, vec![]))?;
                self.request(&callee)?
            }
            InvokeKind::Special => {
                let callee = program
                    .resolve_virtual(&target.class, &target.name, target.arity)
                    .or_else(|| program.find_method(&target.class, &target.name, target.arity));
                match callee {
                    Some(callee) => self.request(&callee)?,
                    None if target.name == CONSTRUCTOR_NAME => {
                        warn!(
                            "dropping call to {}.{} in {}: no body available",
                            target.class, target.name, self.id
                        );
                        return Ok(None);
                    }
                    None => {
                        return Err(self.unsupported(
                            "call to a method without a body",
                            instr,
                            vec![],
                        ))
                    }
                }
            }
            InvokeKind::Virtual => {
                let targets = self.dispatch_targets(call, instr)?;
                if targets.len() == 1 {
                    let callee = targets.keys().next().cloned().ok_or_else(|| {
                        TranslationError::Internal("empty dispatch table".to_string())
                    })?;
                    self.request(&callee)?
                } else {
                    self.dispatch_function(call, &targets, instr, temps)?
                }
            }
        };

        let mut args = vec![];
        if call.kind != InvokeKind::Static {
            let receiver = call.receiver.as_ref().ok_or_else(|| {
                TranslationError::Malformed(format!(
                    "instance call `{}` in {} has no receiver",
                    instr, self.id
                ))
            })?;
            args.push(Operand::Local(receiver.clone()));
        }
        args.extend(call.args.iter().cloned());
        let args = args
            .iter()
            .enumerate()
            .map(|(position, arg)| self.pass(arg, position, temps, env, out, after))
            .collect::<TranslationResult<Vec<_>>>()?;
        Ok(Some(ImpExpr::call(func, args)))
    }

    /// Output name of `callee`, queueing it for translation.
    fn request(&mut self, callee: &MethodId) -> TranslationResult<String> {
        let body = self.cx.program.method(callee).ok_or_else(|| {
            TranslationError::Internal(format!("resolved callee {} has no body", callee))
        })?;
        Ok(self.discovery.request(callee, body))
    }

    /// Reference cells are passed by their object value; the temporary is
    /// aliased back to the cell once the call returns.
    fn pass(
        &self,
        arg: &Operand,
        position: usize,
        temps: &TempNames,
        env: &Env,
        out: &mut InstructionStream,
        after: &mut Vec<Stmt>,
    ) -> TranslationResult<ImpExpr> {
        if let Operand::Local(local) = arg {
            if env.binding(local) == Some(Binding::Mutable) && self.local_type(local)?.is_reference()
            {
                let tmp = temps.call_arg(position);
                out.let_var(tmp.clone(), ImpExpr::deref(local));
                after.push(Stmt::alias(ImpExpr::var(tmp.clone()), ImpExpr::deref(local)));
                return Ok(ImpExpr::var(tmp));
            }
        }
        self.operand(arg, env)
    }

    /// Implementations reachable from a virtual call site, each with the
    /// receiver classes that select it.
    fn dispatch_targets(
        &self,
        call: &InvokeExpr,
        instr: &Instr,
    ) -> TranslationResult<BTreeMap<MethodId, BTreeSet<ClassName>>> {
        if call.possible_receivers.is_empty() {
            return Err(TranslationError::Internal(format!(
                "virtual call `{}` in {} has an empty points-to set",
                instr, self.id
            )));
        }
        let mut targets: BTreeMap<MethodId, BTreeSet<ClassName>> = BTreeMap::new();
        for class in &call.possible_receivers {
            let callee = self
                .cx
                .program
                .resolve_virtual(class, &call.method.name, call.method.arity)
                .ok_or_else(|| {
                    self.unsupported(
                        format!("virtual call with no implementation for receiver {}", class),
                        instr,
                        vec![],
                    )
                })?;
            targets.entry(callee).or_default().insert(class.clone());
        }
        Ok(targets)
    }

    /// Emits `__vtable_<n>`, which selects the implementation from the
    /// receiver's tag.
    fn dispatch_function(
        &mut self,
        call: &InvokeExpr,
        targets: &BTreeMap<MethodId, BTreeSet<ClassName>>,
        instr: &Instr,
        temps: &TempNames,
    ) -> TranslationResult<String> {
        let layout = self.cx.layout;
        let widths = call
            .possible_receivers
            .iter()
            .map(|class| layout.width(class))
            .collect::<Option<BTreeSet<usize>>>()
            .ok_or_else(|| {
                TranslationError::Internal(format!(
                    "receiver of `{}` in {} has no layout",
                    instr, self.id
                ))
            })?;
        let width = match (widths.len(), widths.first()) {
            (1, Some(width)) => *width,
            _ => {
                return Err(self.unsupported(
                    "virtual call over receivers with different representations",
                    instr,
                    call.possible_receivers.iter().cloned().collect(),
                ))
            }
        };

        let name = format!("__vtable_{}", temps.unit());
        let mut params = vec!["this".to_string()];
        params.extend((0..call.method.arity).map(|i| format!("__p{}", i)));
        let forwarded: Vec<ImpExpr> = params.iter().map(ImpExpr::var).collect();

        let mut body = InstructionStream::new();
        let tag = self.cx.model.read_field(
            &FieldHandle {
                base: ImpExpr::var("this"),
                slot: 0,
                width,
                cell: "__tag".to_string(),
            },
            &mut body,
        );
        let mut return_type = Type::Void;
        for (callee, classes) in targets {
            let tags = classes
                .iter()
                .map(|class| layout.tag(class))
                .collect::<Option<Vec<_>>>()
                .ok_or_else(|| {
                    TranslationError::Internal(format!("receiver class of {} has no tag", callee))
                })?;
            let func = self.request(callee)?;
            if let Some(callee_body) = self.cx.program.method(callee) {
                return_type = callee_body.return_type.clone();
            }
            body.push(Stmt::If {
                cond: ImpExpr::any_of(&tag, &tags),
                then_branch: vec![Stmt::Return(ImpExpr::call(func, forwarded.clone()))],
                else_branch: vec![],
            });
        }
        body.push(Stmt::assert_false());
        body.push(Stmt::Return(default_value(&return_type)));
        debug!(
            "devirtualized `{}` in {} over {} implementations",
            instr,
            self.id,
            targets.len()
        );
        self.side_functions
            .push(ImpFunction::new(name.clone(), params, body.finish()));
        Ok(name)
    }
}
