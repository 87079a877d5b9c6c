// Copyright (c) Asymptotic Labs
// SPDX-License-Identifier: Apache-2.0

//! Three-address instructions found inside basic blocks.

use crate::model::{ClassName, FieldRef, LocalName, Type};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentitySource {
    This,
    Param(usize),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operand {
    Local(LocalName),
    Int(i64),
    Bool(bool),
    Null,
}

impl Operand {
    pub fn as_local(&self) -> Option<&str> {
        match self {
            Operand::Local(name) => Some(name),
            _ => None,
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Local(name) => write!(f, "{}", name),
            Operand::Int(v) => write!(f, "{}", v),
            Operand::Bool(v) => write!(f, "{}", v),
            Operand::Null => write!(f, "null"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Rem => "%",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::And => "&",
            BinOp::Or => "|",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvokeKind {
    Static,
    Special,
    Virtual,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodRef {
    pub class: ClassName,
    pub name: String,
    pub arity: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvokeExpr {
    pub kind: InvokeKind,
    pub method: MethodRef,
    #[serde(default)]
    pub receiver: Option<LocalName>,
    #[serde(default)]
    pub args: Vec<Operand>,
    /// Points-to result for the receiver of a virtual call.
    #[serde(default)]
    pub possible_receivers: BTreeSet<ClassName>,
}

impl fmt::Display for InvokeExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            InvokeKind::Static => "staticinvoke",
            InvokeKind::Special => "specialinvoke",
            InvokeKind::Virtual => "virtualinvoke",
        };
        write!(f, "{} ", kind)?;
        if let Some(receiver) = &self.receiver {
            write!(f, "{}.", receiver)?;
        }
        write!(f, "<{}.{}>(", self.method.class, self.method.name)?;
        for (i, arg) in self.args.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", arg)?;
        }
        write!(f, ")")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expr {
    Use(Operand),
    Binary {
        op: BinOp,
        lhs: Operand,
        rhs: Operand,
    },
    Unary {
        op: UnOp,
        operand: Operand,
    },
    FieldRead {
        base: LocalName,
        field: FieldRef,
        #[serde(default)]
        possible_types: BTreeSet<ClassName>,
    },
    ArrayRead {
        base: LocalName,
        index: Operand,
    },
    ArrayLength(LocalName),
    New(ClassName),
    NewArray {
        elem: Type,
        size: Operand,
    },
    Invoke(InvokeExpr),
    /// The nondeterministic-integer intrinsic.
    Nondet,
    Cast {
        operand: Operand,
        ty: Type,
    },
    /// An expression form the front end could not map onto this model.
    Unmodelled {
        text: String,
        #[serde(default)]
        operand_types: Vec<Type>,
    },
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Use(op) => write!(f, "{}", op),
            Expr::Binary { op, lhs, rhs } => write!(f, "{} {} {}", lhs, op.symbol(), rhs),
            Expr::Unary { op: UnOp::Neg, operand } => write!(f, "neg {}", operand),
            Expr::Unary { op: UnOp::Not, operand } => write!(f, "!{}", operand),
            Expr::FieldRead { base, field, .. } => write!(f, "{}.<{}>", base, field),
            Expr::ArrayRead { base, index } => write!(f, "{}[{}]", base, index),
            Expr::ArrayLength(base) => write!(f, "lengthof {}", base),
            Expr::New(class) => write!(f, "new {}", class),
            Expr::NewArray { elem, size } => write!(f, "newarray ({})[{}]", elem, size),
            Expr::Invoke(invoke) => write!(f, "{}", invoke),
            Expr::Nondet => write!(f, "nondet()"),
            Expr::Cast { operand, ty } => write!(f, "({}) {}", ty, operand),
            Expr::Unmodelled { text, .. } => write!(f, "{}", text),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Place {
    Local(LocalName),
    Field {
        base: LocalName,
        field: FieldRef,
        #[serde(default)]
        possible_types: BTreeSet<ClassName>,
    },
    ArrayElem {
        base: LocalName,
        index: Operand,
    },
}

impl fmt::Display for Place {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Place::Local(name) => write!(f, "{}", name),
            Place::Field { base, field, .. } => write!(f, "{}.<{}>", base, field),
            Place::ArrayElem { base, index } => write!(f, "{}[{}]", base, index),
        }
    }
}

/// A heap path rooted at a local, used by explicit alias instructions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessPath {
    pub local: LocalName,
    #[serde(default)]
    pub fields: Vec<FieldRef>,
}

impl fmt::Display for AccessPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.local)?;
        for field in &self.fields {
            write!(f, ".<{}>", field)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Instr {
    Identity {
        local: LocalName,
        source: IdentitySource,
    },
    Assign {
        target: Place,
        value: Expr,
    },
    If {
        cond: Expr,
    },
    Goto,
    Return {
        #[serde(default)]
        value: Option<Operand>,
    },
    Invoke(InvokeExpr),
    Nop {
        #[serde(default)]
        unreachable: bool,
    },
    Throw {
        value: Operand,
    },
    Alias {
        left: AccessPath,
        right: AccessPath,
    },
}

impl Instr {
    /// Number of successors this instruction implies when it ends a block.
    pub fn successor_count(&self) -> usize {
        match self {
            Instr::If { .. } => 2,
            Instr::Return { .. } | Instr::Throw { .. } => 0,
            _ => 1,
        }
    }

    /// The local defined by this instruction, if any.
    pub fn defined_local(&self) -> Option<&str> {
        match self {
            Instr::Identity { local, .. } => Some(local),
            Instr::Assign {
                target: Place::Local(local),
                ..
            } => Some(local),
            _ => None,
        }
    }

    /// Locals read by this instruction.
    pub fn used_locals(&self) -> BTreeSet<&str> {
        fn operand<'a>(op: &'a Operand, out: &mut BTreeSet<&'a str>) {
            if let Some(l) = op.as_local() {
                out.insert(l);
            }
        }
        fn invoke<'a>(call: &'a InvokeExpr, out: &mut BTreeSet<&'a str>) {
            if let Some(r) = &call.receiver {
                out.insert(r);
            }
            for arg in &call.args {
                operand(arg, out);
            }
        }
        fn expr<'a>(e: &'a Expr, out: &mut BTreeSet<&'a str>) {
            match e {
                Expr::Use(op) | Expr::Unary { operand: op, .. } | Expr::Cast { operand: op, .. } => {
                    operand(op, out)
                }
                Expr::Binary { lhs, rhs, .. } => {
                    operand(lhs, out);
                    operand(rhs, out);
                }
                Expr::FieldRead { base, .. } | Expr::ArrayLength(base) => {
                    out.insert(base);
                }
                Expr::ArrayRead { base, index } => {
                    out.insert(base);
                    operand(index, out);
                }
                Expr::NewArray { size, .. } => operand(size, out),
                Expr::Invoke(call) => invoke(call, out),
                Expr::New(_) | Expr::Nondet | Expr::Unmodelled { .. } => {}
            }
        }

        let mut out = BTreeSet::new();
        match self {
            Instr::Assign { target, value } => {
                match target {
                    Place::Local(_) => {}
                    Place::Field { base, .. } => {
                        out.insert(base.as_str());
                    }
                    Place::ArrayElem { base, index } => {
                        out.insert(base.as_str());
                        operand(index, &mut out);
                    }
                }
                expr(value, &mut out);
            }
            Instr::If { cond } => expr(cond, &mut out),
            Instr::Return { value: Some(v) } | Instr::Throw { value: v } => operand(v, &mut out),
            Instr::Invoke(call) => invoke(call, &mut out),
            Instr::Alias { left, right } => {
                out.insert(left.local.as_str());
                out.insert(right.local.as_str());
            }
            Instr::Identity { .. } | Instr::Goto | Instr::Return { value: None } | Instr::Nop { .. } => {}
        }
        out
    }
}

impl fmt::Display for Instr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instr::Identity { local, source } => match source {
                IdentitySource::This => write!(f, "{} := @this", local),
                IdentitySource::Param(i) => write!(f, "{} := @parameter{}", local, i),
            },
            Instr::Assign { target, value } => write!(f, "{} = {}", target, value),
            Instr::If { cond } => write!(f, "if {}", cond),
            Instr::Goto => write!(f, "goto"),
            Instr::Return { value: Some(v) } => write!(f, "return {}", v),
            Instr::Return { value: None } => write!(f, "return"),
            Instr::Invoke(call) => write!(f, "{}", call),
            Instr::Nop { unreachable: true } => write!(f, "nop (unreachable)"),
            Instr::Nop { unreachable: false } => write!(f, "nop"),
            Instr::Throw { value } => write!(f, "throw {}", value),
            Instr::Alias { left, right } => write!(f, "alias({}, {})", left, right),
        }
    }
}
