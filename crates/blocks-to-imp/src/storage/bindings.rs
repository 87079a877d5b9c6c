// Copyright (c) Asymptotic Labs
// SPDX-License-Identifier: Apache-2.0

//! Checked view of a method's binding plan.

use crate::error::{TranslationError, TranslationResult};
use block_graph::{Binding, BindingPlan, BlockId, LocalName, MethodBody};
use std::collections::BTreeMap;

/// Where and how every local of a method is introduced.
#[derive(Debug, Clone, Default)]
pub struct BindingTable {
    entry: BTreeMap<LocalName, Binding>,
    blocks: BTreeMap<BlockId, BTreeMap<LocalName, Binding>>,
}

impl BindingTable {
    /// Checks that every planned local is declared and introduced exactly once.
    pub fn new(method: &MethodBody) -> TranslationResult<Self> {
        let plan: BindingPlan = method.binding_plan();
        let mut introduced: BTreeMap<&str, String> = BTreeMap::new();
        let scopes = std::iter::once(("entry".to_string(), &plan.entry)).chain(
            plan.blocks
                .iter()
                .map(|(block, locals)| (format!("block {}", block), locals)),
        );
        for (scope, locals) in scopes {
            for local in locals.keys() {
                if method.local_type(local).is_none() {
                    return Err(TranslationError::Malformed(format!(
                        "binding plan of {}.{} mentions undeclared local {}",
                        method.class, method.name, local
                    )));
                }
                if let Some(previous) = introduced.insert(local, scope.clone()) {
                    return Err(TranslationError::Malformed(format!(
                        "local {} of {}.{} is bound both at {} and at {}",
                        local, method.class, method.name, previous, scope
                    )));
                }
            }
        }
        Ok(Self {
            entry: plan.entry,
            blocks: plan.blocks,
        })
    }

    pub fn entry(&self) -> &BTreeMap<LocalName, Binding> {
        &self.entry
    }

    pub fn block(&self, block: BlockId) -> impl Iterator<Item = (&LocalName, &Binding)> {
        self.blocks.get(&block).into_iter().flat_map(|m| m.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use block_graph::builder::MethodBuilder;
    use block_graph::Type;

    #[test]
    fn test_missing_plan_binds_everything_mutably_at_entry() {
        let mut b = MethodBuilder::new();
        b.local("x", Type::Int).local("y", Type::Bool);
        b.ret(0);
        let table = BindingTable::new(&b.build("Main", "main")).unwrap();
        assert_eq!(table.entry().len(), 2);
        assert!(table.entry().values().all(|b| *b == Binding::Mutable));
        assert_eq!(table.block(BlockId(0)).count(), 0);
    }

    #[test]
    fn test_local_bound_twice_is_malformed() {
        let mut plan = BindingPlan::default();
        plan.entry.insert("x".to_string(), Binding::Mutable);
        plan.blocks.insert(
            BlockId(1),
            [("x".to_string(), Binding::Const)].into_iter().collect(),
        );
        let mut b = MethodBuilder::new();
        b.local("x", Type::Int).bindings(plan);
        b.ret(0);
        let err = BindingTable::new(&b.build("Main", "main")).unwrap_err();
        assert_eq!(
            err,
            TranslationError::Malformed(
                "local x of Main.main is bound both at entry and at block 1".to_string()
            )
        );
    }

    #[test]
    fn test_undeclared_local_is_malformed() {
        let mut plan = BindingPlan::default();
        plan.entry.insert("ghost".to_string(), Binding::Const);
        let mut b = MethodBuilder::new();
        b.bindings(plan);
        b.ret(0);
        assert!(BindingTable::new(&b.build("Main", "main")).is_err());
    }
}
