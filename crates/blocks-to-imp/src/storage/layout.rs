// Copyright (c) Asymptotic Labs
// SPDX-License-Identifier: Apache-2.0

//! Flat slot numbering of object fields.
//!
//! Slot 0 of every object holds its class tag. A class lays out its
//! superclass' slots first and then its own fields, so an inherited field keeps
//! its slot in every subclass. Classes that can flow into the same variable
//! (according to the points-to sets found on field accesses and call sites)
//! form a family and are padded to the family's widest layout, which gives all
//! of them the same representation.

use crate::error::{TranslationError, TranslationResult};
use bimap::BiBTreeMap;
use block_graph::instr::{Expr, Instr, Place};
use block_graph::{ClassName, FieldRef, ProgramModel, Type};
use itertools::Itertools;
use log::debug;
use petgraph::unionfind::UnionFind;
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

pub type Tag = i64;

/// One field slot of a class: the class declaring the field, its name and type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotDecl {
    pub owner: ClassName,
    pub name: String,
    pub ty: Type,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSlot {
    pub slot: usize,
    pub width: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SlotError {
    #[error("class {class} has no field {field}")]
    Missing { class: ClassName, field: String },
    #[error("field {field} has a different representation in {}", describe(.candidates))]
    Disagreement {
        field: String,
        candidates: BTreeMap<ClassName, FieldSlot>,
    },
}

fn describe(candidates: &BTreeMap<ClassName, FieldSlot>) -> String {
    candidates
        .iter()
        .map(|(class, s)| format!("{} (slot {} of {})", class, s.slot, s.width))
        .join(", ")
}

#[derive(Debug, Clone, Default)]
pub struct StorageLayout {
    /// Field slots of each class, starting at slot 1.
    slots: BTreeMap<ClassName, Vec<SlotDecl>>,
    superclass: BTreeMap<ClassName, ClassName>,
    /// Width of each class' family, tag included.
    widths: BTreeMap<ClassName, usize>,
    tags: BiBTreeMap<ClassName, Tag>,
}

impl StorageLayout {
    pub fn build(program: &ProgramModel) -> TranslationResult<Self> {
        let mut layout = StorageLayout::default();
        let classes = referenced_classes(program);

        for class in program.classes.iter() {
            if let Some(parent) = &class.superclass {
                layout.superclass.insert(class.name.clone(), parent.clone());
            }
        }
        for class in &classes {
            let slots = layout.own_layout(program, class)?;
            layout.slots.insert(class.clone(), slots);
        }
        for (i, class) in classes.iter().enumerate() {
            layout.tags.insert(class.clone(), i as Tag + 1);
        }

        let index: BTreeMap<&ClassName, usize> =
            classes.iter().enumerate().map(|(i, c)| (c, i)).collect();
        let mut families = UnionFind::new(classes.len());
        for set in points_to_sets(program) {
            let mut members = set.iter().filter_map(|c| index.get(c).copied());
            if let Some(first) = members.next() {
                for other in members {
                    families.union(first, other);
                }
            }
        }
        let mut family_width: BTreeMap<usize, usize> = BTreeMap::new();
        for (class, i) in &index {
            let width = layout.slots[*class].len() + 1;
            let entry = family_width.entry(families.find(*i)).or_default();
            *entry = (*entry).max(width);
        }
        for (class, i) in &index {
            layout
                .widths
                .insert((*class).clone(), family_width[&families.find(*i)]);
        }
        debug!("storage layout: {:?}", layout.widths);
        Ok(layout)
    }

    /// Superclass slots followed by the class' own fields.
    fn own_layout(&self, program: &ProgramModel, class: &str) -> TranslationResult<Vec<SlotDecl>> {
        let mut chain = vec![];
        let mut current = Some(class.to_string());
        while let Some(name) = current {
            if chain.contains(&name) {
                return Err(TranslationError::Malformed(format!(
                    "class {} inherits from itself",
                    name
                )));
            }
            current = self.superclass.get(&name).cloned();
            chain.push(name);
        }
        Ok(chain
            .iter()
            .rev()
            .filter_map(|name| program.class(name))
            .flat_map(|decl| {
                decl.fields.iter().map(|f| SlotDecl {
                    owner: decl.name.clone(),
                    name: f.name.clone(),
                    ty: f.ty.clone(),
                })
            })
            .collect())
    }

    pub fn tag(&self, class: &str) -> Option<Tag> {
        self.tags.get_by_left(class).copied()
    }

    pub fn class_of_tag(&self, tag: Tag) -> Option<&ClassName> {
        self.tags.get_by_right(&tag)
    }

    /// All tags in increasing order.
    pub fn tags(&self) -> Vec<(Tag, &ClassName)> {
        let mut tags: Vec<_> = self.tags.iter().map(|(c, t)| (*t, c)).collect();
        tags.sort();
        tags
    }

    pub fn width(&self, class: &str) -> Option<usize> {
        self.widths.get(class).copied()
    }

    /// Types of slots `1..width` of `class`; `None` marks padding.
    pub fn slot_types(&self, class: &str) -> Option<Vec<Option<Type>>> {
        let width = self.width(class)?;
        let slots = self.slots.get(class)?;
        Some(
            (1..width)
                .map(|i| slots.get(i - 1).map(|s| s.ty.clone()))
                .collect(),
        )
    }

    /// Slot of the field named `name` as seen from `class`: the nearest
    /// declaration walking up from `class`.
    pub fn slot(&self, class: &str, name: &str) -> Option<usize> {
        self.slot_from(class, class, name)
    }

    /// Slot in `class`' layout of the nearest declaration of `name` walking
    /// up from `from`, which is `class` itself or one of its superclasses.
    fn slot_from(&self, class: &str, from: &str, name: &str) -> Option<usize> {
        let slots = self.slots.get(class)?;
        self.ancestors(from)
            .find_map(|owner| slots.iter().position(|s| s.owner == owner && s.name == name))
            .map(|i| i + 1)
    }

    /// `class` followed by its superclass chain.
    fn ancestors<'b>(&'b self, class: &'b str) -> impl Iterator<Item = &'b str> + 'b {
        std::iter::successors(Some(class), move |c| {
            self.superclass.get(*c).map(String::as_str)
        })
    }

    /// Resolves `field` for an access whose receiver may be any of
    /// `possible_types`. Every candidate must agree on slot and width.
    pub fn slot_for(
        &self,
        field: &FieldRef,
        possible_types: &BTreeSet<ClassName>,
    ) -> Result<FieldSlot, SlotError> {
        let declared = BTreeSet::from([field.class.clone()]);
        let candidates = if possible_types.is_empty() {
            &declared
        } else {
            possible_types
        };
        let mut resolved = BTreeMap::new();
        for class in candidates {
            // A subclass may redeclare the name; the access still means the
            // declaration visible from the field's static class.
            let from = if self.ancestors(class).any(|c| c == field.class) {
                field.class.as_str()
            } else {
                class.as_str()
            };
            let slot = self.slot_from(class, from, &field.name);
            let (Some(slot), Some(width)) = (slot, self.width(class)) else {
                return Err(SlotError::Missing {
                    class: class.clone(),
                    field: field.name.clone(),
                });
            };
            resolved.insert(class.clone(), FieldSlot { slot, width });
        }
        let mut values = resolved.values();
        let first = values.next().cloned();
        match first {
            Some(first) if values.all(|s| *s == first) => Ok(first),
            _ => Err(SlotError::Disagreement {
                field: field.to_string(),
                candidates: resolved,
            }),
        }
    }
}

/// Every class that is declared, allocated or named by a points-to set.
fn referenced_classes(program: &ProgramModel) -> BTreeSet<ClassName> {
    let mut classes: BTreeSet<ClassName> = program.classes.iter().map(|c| c.name.clone()).collect();
    for set in points_to_sets(program) {
        classes.extend(set);
    }
    for instr in all_instrs(program) {
        if let Instr::Assign {
            value: Expr::New(class),
            ..
        } = instr
        {
            classes.insert(class.clone());
        }
    }
    classes
}

fn all_instrs(program: &ProgramModel) -> impl Iterator<Item = &Instr> {
    program
        .methods
        .values()
        .flat_map(|m| m.blocks.iter())
        .flat_map(|b| b.instrs.iter())
}

fn points_to_sets(program: &ProgramModel) -> Vec<BTreeSet<ClassName>> {
    let mut sets = vec![];
    for instr in all_instrs(program) {
        match instr {
            Instr::Assign { target, value } => {
                if let Place::Field { possible_types, .. } = target {
                    sets.push(possible_types.clone());
                }
                match value {
                    Expr::FieldRead { possible_types, .. } => sets.push(possible_types.clone()),
                    Expr::Invoke(call) => sets.push(call.possible_receivers.clone()),
                    _ => {}
                }
            }
            Instr::Invoke(call) => sets.push(call.possible_receivers.clone()),
            _ => {}
        }
    }
    sets.retain(|s| !s.is_empty());
    sets
}

#[cfg(test)]
mod tests {
    use super::*;
    use block_graph::builder::MethodBuilder;
    use block_graph::instr::Operand;
    use block_graph::{ClassDecl, FieldDecl, MethodId};

    fn class(name: &str, superclass: Option<&str>, fields: &[&str]) -> ClassDecl {
        ClassDecl {
            name: name.to_string(),
            superclass: superclass.map(str::to_string),
            fields: fields
                .iter()
                .map(|f| FieldDecl {
                    name: f.to_string(),
                    ty: Type::Int,
                })
                .collect(),
        }
    }

    fn field(class: &str, name: &str) -> FieldRef {
        FieldRef {
            class: class.to_string(),
            name: name.to_string(),
        }
    }

    fn set(classes: &[&str]) -> BTreeSet<ClassName> {
        classes.iter().map(|c| c.to_string()).collect()
    }

    /// A program whose only method reads `field` through a receiver that may
    /// be any of `possible`.
    fn program(classes: Vec<ClassDecl>, field: FieldRef, possible: &[&str]) -> ProgramModel {
        let mut b = MethodBuilder::new();
        b.local("o", Type::Ref(field.class.clone()));
        b.local("x", Type::Int);
        b.block(
            0,
            vec![
                Instr::Assign {
                    target: Place::Local("x".to_string()),
                    value: Expr::FieldRead {
                        base: "o".to_string(),
                        field,
                        possible_types: set(possible),
                    },
                },
                Instr::Return {
                    value: Some(Operand::Local("x".to_string())),
                },
            ],
            &[],
        );
        let entry = MethodId::new("Main", "main");
        ProgramModel {
            classes,
            methods: [(entry.clone(), b.build("Main", "main"))].into_iter().collect(),
            entry,
        }
    }

    #[test]
    fn test_inherited_field_keeps_its_slot_in_sibling_subtypes() {
        let classes = vec![
            class("A", None, &["x"]),
            class("B", Some("A"), &[]),
            class("C", Some("A"), &[]),
        ];
        let program = program(classes, field("A", "x"), &["B", "C"]);
        let layout = StorageLayout::build(&program).unwrap();
        assert_eq!(layout.slot("B", "x"), Some(1));
        assert_eq!(layout.slot("C", "x"), Some(1));
        assert_eq!(
            layout.slot_for(&field("A", "x"), &set(&["B", "C"])),
            Ok(FieldSlot { slot: 1, width: 2 })
        );
    }

    #[test]
    fn test_redeclared_field_resolves_from_the_static_class() {
        let classes = vec![class("A", None, &["x"]), class("B", Some("A"), &["x"])];
        let program = program(classes, field("A", "x"), &["A", "B"]);
        let layout = StorageLayout::build(&program).unwrap();
        assert_eq!(layout.slot("B", "x"), Some(2));
        assert_eq!(
            layout.slot_for(&field("A", "x"), &set(&["A", "B"])),
            Ok(FieldSlot { slot: 1, width: 3 })
        );
        assert_eq!(
            layout.slot_for(&field("B", "x"), &set(&["B"])),
            Ok(FieldSlot { slot: 2, width: 3 })
        );
    }

    #[test]
    fn test_family_members_are_padded_to_the_same_width() {
        let classes = vec![
            class("A", None, &["x"]),
            class("B", Some("A"), &["y", "z"]),
            class("C", Some("A"), &[]),
        ];
        let program = program(classes, field("A", "x"), &["B", "C"]);
        let layout = StorageLayout::build(&program).unwrap();
        assert_eq!(layout.width("B"), Some(4));
        assert_eq!(layout.width("C"), Some(4));
        assert_eq!(layout.width("A"), Some(2));
        assert_eq!(
            layout.slot_types("C"),
            Some(vec![Some(Type::Int), None, None])
        );
    }

    #[test]
    fn test_independent_declarations_disagree() {
        let classes = vec![
            class("A", None, &[]),
            class("B", Some("A"), &["f"]),
            class("C", Some("A"), &["g", "f"]),
        ];
        let program = program(classes, field("B", "f"), &["B", "C"]);
        let layout = StorageLayout::build(&program).unwrap();
        let err = layout
            .slot_for(&field("B", "f"), &set(&["B", "C"]))
            .unwrap_err();
        assert!(matches!(err, SlotError::Disagreement { .. }));
        assert!(err.to_string().contains("C (slot 2 of 3)"));
    }

    #[test]
    fn test_tags_are_dense_and_invertible() {
        let classes = vec![class("A", None, &[]), class("B", Some("A"), &[])];
        let program = program(classes, field("A", "x"), &[]);
        let layout = StorageLayout::build(&program).unwrap();
        assert_eq!(layout.tag("A"), Some(1));
        assert_eq!(layout.tag("B"), Some(2));
        assert_eq!(layout.class_of_tag(2).map(String::as_str), Some("B"));
        assert_eq!(layout.tags().len(), 2);
        assert!(matches!(
            layout.slot_for(&field("A", "x"), &BTreeSet::new()),
            Err(SlotError::Missing { .. })
        ));
    }

    #[test]
    fn test_inheritance_cycle_is_malformed() {
        let classes = vec![class("A", Some("B"), &[]), class("B", Some("A"), &[])];
        let program = program(classes, field("A", "x"), &[]);
        assert!(matches!(
            StorageLayout::build(&program),
            Err(TranslationError::Malformed(_))
        ));
    }
}
