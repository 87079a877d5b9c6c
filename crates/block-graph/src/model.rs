// Copyright (c) Asymptotic Labs
// SPDX-License-Identifier: Apache-2.0

//! Program model handed over by the front end: classes, method bodies and types.
//!
//! Everything in here is immutable once loaded. Method bodies are already split
//! into basic blocks, virtual call sites already carry their points-to sets and
//! each method optionally carries the binding plan chosen by the let-binding
//! allocator.

use crate::block::{BasicBlock, BlockId};
use crate::instr::{IdentitySource, Instr};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

pub type ClassName = String;
pub type LocalName = String;

/// Name of the constructor pseudo-method.
pub const CONSTRUCTOR_NAME: &str = "<init>";

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Type {
    Int,
    Bool,
    Ref(ClassName),
    Array(Box<Type>),
    Void,
}

impl Type {
    /// Whether values of this type live on the heap and are passed by reference.
    pub fn is_reference(&self) -> bool {
        matches!(self, Type::Ref(_) | Type::Array(_))
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Int => write!(f, "int"),
            Type::Bool => write!(f, "boolean"),
            Type::Ref(class) => write!(f, "{}", class),
            Type::Array(elem) => write!(f, "{}[]", elem),
            Type::Void => write!(f, "void"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDecl {
    pub name: String,
    pub ty: Type,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassDecl {
    pub name: ClassName,
    #[serde(default)]
    pub superclass: Option<ClassName>,
    #[serde(default)]
    pub fields: Vec<FieldDecl>,
}

/// A field reference as it appears in an instruction: the declaring class and the name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FieldRef {
    pub class: ClassName,
    pub name: String,
}

impl fmt::Display for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.class, self.name)
    }
}

/// Storage discipline of a local at a program point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Binding {
    Const,
    Mutable,
}

/// Per-method output of the let-binding allocator.
///
/// `entry` bindings are introduced once at function entry, `blocks` bindings
/// are introduced when the structured translation reaches the block.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindingPlan {
    #[serde(default)]
    pub entry: BTreeMap<LocalName, Binding>,
    #[serde(default)]
    pub blocks: BTreeMap<BlockId, BTreeMap<LocalName, Binding>>,
}

impl BindingPlan {
    /// The plan used when the allocator did not provide one: every local is a
    /// reference cell introduced at function entry.
    pub fn conservative(locals: &[LocalDecl]) -> Self {
        Self {
            entry: locals
                .iter()
                .map(|l| (l.name.clone(), Binding::Mutable))
                .collect(),
            blocks: BTreeMap::new(),
        }
    }

    pub fn block_bindings(&self, block: BlockId) -> Option<&BTreeMap<LocalName, Binding>> {
        self.blocks.get(&block)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalDecl {
    pub name: LocalName,
    pub ty: Type,
}

/// Identifies a method: `<class>.<name>`, optionally suffixed with `/<arity>`
/// when the class overloads the name.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MethodId(pub String);

impl MethodId {
    pub fn new(class: &str, name: &str) -> Self {
        MethodId(format!("{}.{}", class, name))
    }

    pub fn with_arity(class: &str, name: &str, arity: usize) -> Self {
        MethodId(format!("{}.{}/{}", class, name, arity))
    }
}

impl fmt::Display for MethodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodBody {
    pub class: ClassName,
    pub name: String,
    #[serde(default)]
    pub is_static: bool,
    #[serde(default)]
    pub params: Vec<Type>,
    pub return_type: Type,
    #[serde(default)]
    pub locals: Vec<LocalDecl>,
    pub entry: BlockId,
    pub blocks: Vec<BasicBlock>,
    #[serde(default)]
    pub bindings: Option<BindingPlan>,
}

impl MethodBody {
    pub fn local_type(&self, name: &str) -> Option<&Type> {
        self.locals.iter().find(|l| l.name == name).map(|l| &l.ty)
    }

    pub fn block(&self, id: BlockId) -> Option<&BasicBlock> {
        self.blocks.iter().find(|b| b.id == id)
    }

    /// The binding plan chosen by the allocator, or the conservative fallback.
    pub fn binding_plan(&self) -> BindingPlan {
        self.bindings
            .clone()
            .unwrap_or_else(|| BindingPlan::conservative(&self.locals))
    }

    /// The local each identity instruction introduces, keyed by its source.
    pub fn identity_locals(&self) -> BTreeMap<IdentitySource, LocalName> {
        self.blocks
            .iter()
            .flat_map(|b| b.instrs.iter())
            .filter_map(|instr| match instr {
                Instr::Identity { local, source } => Some((*source, local.clone())),
                _ => None,
            })
            .collect()
    }
}

/// Whole-program input: class table, method bodies and the entry point.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramModel {
    #[serde(default)]
    pub classes: Vec<ClassDecl>,
    pub methods: BTreeMap<MethodId, MethodBody>,
    pub entry: MethodId,
}

impl ProgramModel {
    pub fn class(&self, name: &str) -> Option<&ClassDecl> {
        self.classes.iter().find(|c| c.name == name)
    }

    pub fn method(&self, id: &MethodId) -> Option<&MethodBody> {
        self.methods.get(id)
    }

    /// Looks up the body of `class.name` taking `arity` arguments, trying the
    /// plain id before the overload-qualified one.
    pub fn find_method(&self, class: &str, name: &str, arity: usize) -> Option<MethodId> {
        [MethodId::new(class, name), MethodId::with_arity(class, name, arity)]
            .into_iter()
            .find(|id| {
                self.methods
                    .get(id)
                    .map_or(false, |m| m.params.len() == arity)
            })
    }

    /// Resolves a virtual call on a receiver whose runtime class is `class`,
    /// walking up the superclass chain until an implementation is found.
    pub fn resolve_virtual(&self, class: &str, name: &str, arity: usize) -> Option<MethodId> {
        let mut seen = BTreeSet::new();
        let mut current = Some(class.to_string());
        while let Some(cls) = current {
            if !seen.insert(cls.clone()) {
                return None;
            }
            if let Some(id) = self.find_method(&cls, name, arity) {
                if !self.methods[&id].is_static {
                    return Some(id);
                }
            }
            current = self.class(&cls).and_then(|c| c.superclass.clone());
        }
        None
    }
}
