// Copyright (c) Asymptotic Labs
// SPDX-License-Identifier: Apache-2.0

//! The two ways objects are represented in the output.
//!
//! With [`MutableModel`] an object is a tuple of reference cells, one per slot,
//! and a field write updates the cell in place. With [`FunctionalModel`] an
//! object is a plain tuple and a field write rebuilds the tuple and stores it
//! back into the owning variable.

use crate::storage::layout::Tag;
use imp_format::{ImpExpr, InstructionStream, Pattern, Stmt};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    #[default]
    Mutable,
    Functional,
}

impl ModelKind {
    pub fn object_model(self) -> Box<dyn ObjectModel> {
        match self {
            ModelKind::Mutable => Box::new(MutableModel),
            ModelKind::Functional => Box::new(FunctionalModel),
        }
    }
}

/// One slot of an object value that is about to be accessed.
#[derive(Debug, Clone)]
pub struct FieldHandle {
    /// The object value (a tuple, never a cell holding one).
    pub base: ImpExpr,
    pub slot: usize,
    pub width: usize,
    /// Name bound to the slot.
    pub cell: String,
}

impl FieldHandle {
    fn projection(&self) -> Pattern {
        Pattern::Tuple(
            (0..self.width)
                .map(|i| (i == self.slot).then(|| self.cell.clone()))
                .collect(),
        )
    }
}

/// The variable an accessed object was loaded from.
#[derive(Debug, Clone)]
pub struct FieldOwner {
    pub local: String,
    pub mutable: bool,
}

pub trait ObjectModel {
    fn kind(&self) -> ModelKind;

    /// A fresh object with tag `tag` whose remaining slots hold `fields`.
    fn allocate(&self, tag: Tag, fields: Vec<ImpExpr>) -> ImpExpr;

    /// Binds the slot and returns an expression for its value.
    fn read_field(&self, handle: &FieldHandle, out: &mut InstructionStream) -> ImpExpr;

    /// Stores `value` into the slot. Fails when the model cannot update the
    /// owner in place.
    fn write_field(
        &self,
        handle: &FieldHandle,
        owner: &FieldOwner,
        value: ImpExpr,
        out: &mut InstructionStream,
    ) -> Result<(), String>;

    /// Extends the value denoted by `path` by one field step.
    fn extend_path(&self, path: ImpExpr, slot: usize) -> ImpExpr;

    /// Statements re-establishing aliasing once the access is done.
    fn cleanup(&self, _handle: &FieldHandle, _owner: &FieldOwner, _after: &mut Vec<Stmt>) {}
}

pub struct MutableModel;

impl ObjectModel for MutableModel {
    fn kind(&self) -> ModelKind {
        ModelKind::Mutable
    }

    fn allocate(&self, tag: Tag, fields: Vec<ImpExpr>) -> ImpExpr {
        ImpExpr::Tuple(
            std::iter::once(ImpExpr::Int(tag))
                .chain(fields)
                .map(ImpExpr::mkref)
                .collect(),
        )
    }

    fn read_field(&self, handle: &FieldHandle, out: &mut InstructionStream) -> ImpExpr {
        out.bind(handle.projection(), handle.base.clone());
        ImpExpr::deref(handle.cell.clone())
    }

    fn write_field(
        &self,
        handle: &FieldHandle,
        _owner: &FieldOwner,
        value: ImpExpr,
        out: &mut InstructionStream,
    ) -> Result<(), String> {
        out.bind(handle.projection(), handle.base.clone());
        out.assign(handle.cell.clone(), value);
        Ok(())
    }

    fn extend_path(&self, path: ImpExpr, slot: usize) -> ImpExpr {
        ImpExpr::Deref(Box::new(ImpExpr::proj(path, slot)))
    }

    fn cleanup(&self, handle: &FieldHandle, owner: &FieldOwner, after: &mut Vec<Stmt>) {
        after.push(Stmt::alias(
            ImpExpr::var(handle.cell.clone()),
            ImpExpr::proj(handle.base.clone(), handle.slot),
        ));
        if owner.mutable {
            after.push(Stmt::alias(handle.base.clone(), ImpExpr::deref(owner.local.clone())));
        }
    }
}

pub struct FunctionalModel;

impl ObjectModel for FunctionalModel {
    fn kind(&self) -> ModelKind {
        ModelKind::Functional
    }

    fn allocate(&self, tag: Tag, fields: Vec<ImpExpr>) -> ImpExpr {
        ImpExpr::Tuple(std::iter::once(ImpExpr::Int(tag)).chain(fields).collect())
    }

    fn read_field(&self, handle: &FieldHandle, out: &mut InstructionStream) -> ImpExpr {
        out.bind(handle.projection(), handle.base.clone());
        ImpExpr::var(handle.cell.clone())
    }

    fn write_field(
        &self,
        handle: &FieldHandle,
        owner: &FieldOwner,
        value: ImpExpr,
        out: &mut InstructionStream,
    ) -> Result<(), String> {
        if !owner.mutable {
            return Err(format!(
                "field write through the immutable binding {}",
                owner.local
            ));
        }
        let names: Vec<String> = (0..handle.width)
            .map(|i| format!("{}_{}", handle.cell, i))
            .collect();
        out.bind(
            Pattern::Tuple(names.iter().cloned().map(Some).collect()),
            handle.base.clone(),
        );
        let mut rebuilt: Vec<ImpExpr> = names.iter().map(|n| ImpExpr::var(n.clone())).collect();
        rebuilt[handle.slot] = value;
        out.assign(owner.local.clone(), ImpExpr::Tuple(rebuilt));
        Ok(())
    }

    fn extend_path(&self, path: ImpExpr, slot: usize) -> ImpExpr {
        ImpExpr::proj(path, slot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use imp_format::{render::render_block, render_to_string};

    fn handle() -> FieldHandle {
        FieldHandle {
            base: ImpExpr::var("__base_ptr_4"),
            slot: 1,
            width: 3,
            cell: "__field_4".to_string(),
        }
    }

    fn owner(mutable: bool) -> FieldOwner {
        FieldOwner {
            local: "o".to_string(),
            mutable,
        }
    }

    fn render(out: InstructionStream, after: Vec<Stmt>) -> String {
        let mut out = out;
        out.extend(after);
        let stmts = out.finish();
        render_to_string(|w| render_block(w, &stmts))
    }

    #[test]
    fn test_mutable_model_writes_the_slot_cell() {
        let model = MutableModel;
        let mut out = InstructionStream::new();
        let mut after = vec![];
        model
            .write_field(&handle(), &owner(true), ImpExpr::Int(7), &mut out)
            .unwrap();
        model.cleanup(&handle(), &owner(true), &mut after);
        let expected = "\
{
  let (_, __field_4, _) = __base_ptr_4 in {
    __field_4 := 7;
    alias(__field_4 = __base_ptr_4.1);
    alias(__base_ptr_4 = *o)
  }
}";
        assert_eq!(render(out, after), expected);
        assert_eq!(
            model.allocate(2, vec![ImpExpr::Int(0)]).to_string(),
            "(mkref 2, mkref 0)"
        );
    }

    #[test]
    fn test_functional_model_rebuilds_the_owner() {
        let model = FunctionalModel;
        let mut out = InstructionStream::new();
        model
            .write_field(&handle(), &owner(true), ImpExpr::Int(7), &mut out)
            .unwrap();
        let expected = "\
{
  let (__field_4_0, __field_4_1, __field_4_2) = __base_ptr_4 in {
    o := (__field_4_0, 7, __field_4_2)
  }
}";
        assert_eq!(render(out, vec![]), expected);
    }

    #[test]
    fn test_functional_model_rejects_immutable_owner() {
        let mut out = InstructionStream::new();
        let err = FunctionalModel
            .write_field(&handle(), &owner(false), ImpExpr::Int(7), &mut out)
            .unwrap_err();
        assert!(err.contains("immutable binding o"));
    }

    #[test]
    fn test_read_returns_slot_value() {
        let mut out = InstructionStream::new();
        let value = MutableModel.read_field(&handle(), &mut out);
        assert_eq!(value.to_string(), "*__field_4");
        let mut out = InstructionStream::new();
        let value = FunctionalModel.read_field(&handle(), &mut out);
        assert_eq!(value.to_string(), "__field_4");
        assert_eq!(
            MutableModel.extend_path(ImpExpr::var("o"), 2).to_string(),
            "*(o.2)"
        );
    }
}
