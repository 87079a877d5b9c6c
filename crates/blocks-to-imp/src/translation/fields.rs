// Copyright (c) Asymptotic Labs
// SPDX-License-Identifier: Apache-2.0

//! Field accesses, allocations and alias paths.

use crate::error::{TranslationError, TranslationResult};
use crate::storage::{FieldHandle, FieldOwner, FieldSlot, SlotError};
use crate::translation::env::Env;
use crate::translation::names::TempNames;
use crate::translation::translator::MethodTranslator;
use crate::translation::values::default_value;
use block_graph::instr::{AccessPath, Instr};
use block_graph::{Binding, ClassName, FieldRef};
use imp_format::{ImpExpr, InstructionStream, Stmt};
use std::collections::BTreeSet;

impl<'a> MethodTranslator<'a> {
    fn slot(
        &self,
        field: &FieldRef,
        possible_types: &BTreeSet<ClassName>,
        instr: &Instr,
    ) -> TranslationResult<FieldSlot> {
        self.cx
            .layout
            .slot_for(field, possible_types)
            .map_err(|err| {
                let classes = match &err {
                    SlotError::Missing { class, .. } => vec![class.clone()],
                    SlotError::Disagreement { candidates, .. } => {
                        candidates.keys().cloned().collect()
                    }
                };
                self.unsupported(format!("field access ({})", err), instr, classes)
            })
    }

    #[allow(clippy::too_many_arguments)]
    fn field_handle(
        &self,
        base: &str,
        field: &FieldRef,
        possible_types: &BTreeSet<ClassName>,
        instr: &Instr,
        temps: &mut TempNames,
        env: &Env,
        out: &mut InstructionStream,
    ) -> TranslationResult<(FieldHandle, FieldOwner)> {
        let FieldSlot { slot, width } = self.slot(field, possible_types, instr)?;
        let owner = FieldOwner {
            local: base.to_string(),
            mutable: match env.binding(base) {
                Some(binding) => binding == Binding::Mutable,
                None => {
                    return Err(TranslationError::Malformed(format!(
                        "local {} of {} is read outside the scope of its binding",
                        base, self.id
                    )))
                }
            },
        };
        let object = if owner.mutable {
            let ptr = temps.fresh("__base_ptr");
            out.let_var(ptr.clone(), ImpExpr::deref(base));
            ImpExpr::var(ptr)
        } else {
            ImpExpr::var(base)
        };
        let handle = FieldHandle {
            base: object,
            slot,
            width,
            cell: temps.fresh("__field"),
        };
        Ok((handle, owner))
    }

    #[allow(clippy::too_many_arguments)]
    pub(super) fn read_field(
        &self,
        base: &str,
        field: &FieldRef,
        possible_types: &BTreeSet<ClassName>,
        instr: &Instr,
        temps: &mut TempNames,
        env: &Env,
        out: &mut InstructionStream,
        after: &mut Vec<Stmt>,
    ) -> TranslationResult<ImpExpr> {
        let (handle, owner) =
            self.field_handle(base, field, possible_types, instr, temps, env, out)?;
        let value = self.cx.model.read_field(&handle, out);
        self.cx.model.cleanup(&handle, &owner, after);
        Ok(value)
    }

    #[allow(clippy::too_many_arguments)]
    pub(super) fn write_field(
        &self,
        base: &str,
        field: &FieldRef,
        possible_types: &BTreeSet<ClassName>,
        value: ImpExpr,
        instr: &Instr,
        temps: &mut TempNames,
        env: &Env,
        out: &mut InstructionStream,
        after: &mut Vec<Stmt>,
    ) -> TranslationResult<()> {
        let (handle, owner) =
            self.field_handle(base, field, possible_types, instr, temps, env, out)?;
        self.cx
            .model
            .write_field(&handle, &owner, value, out)
            .map_err(|reason| self.unsupported(reason, instr, vec![]))?;
        self.cx.model.cleanup(&handle, &owner, after);
        Ok(())
    }

    /// A fresh object of `class` with every field at its default.
    pub(super) fn allocate(&self, class: &str, instr: &Instr) -> TranslationResult<ImpExpr> {
        let layout = self.cx.layout;
        let (tag, slots) = layout
            .tag(class)
            .zip(layout.slot_types(class))
            .ok_or_else(|| self.unsupported("allocation of an unknown class", instr, vec![]))?;
        let fields = slots
            .iter()
            .map(|ty| ty.as_ref().map_or(ImpExpr::Int(0), default_value))
            .collect();
        Ok(self.cx.model.allocate(tag, fields))
    }

    pub(super) fn access_path(
        &self,
        path: &AccessPath,
        instr: &Instr,
        env: &Env,
    ) -> TranslationResult<ImpExpr> {
        let mut value = self.local_value(&path.local, env)?;
        for field in &path.fields {
            let FieldSlot { slot, .. } = self.slot(field, &BTreeSet::new(), instr)?;
            value = self.cx.model.extend_path(value, slot);
        }
        Ok(value)
    }
}
