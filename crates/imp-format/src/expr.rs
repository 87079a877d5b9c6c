// Copyright (c) Asymptotic Labs
// SPDX-License-Identifier: Apache-2.0

//! Expressions of the structured output language.

use itertools::Itertools;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImpBinOp {
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

impl ImpBinOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            ImpBinOp::Add => "+",
            ImpBinOp::Sub => "-",
            ImpBinOp::Mul => "*",
            ImpBinOp::Div => "/",
            ImpBinOp::Rem => "%",
            ImpBinOp::Eq => "=",
            ImpBinOp::Ne => "!=",
            ImpBinOp::Lt => "<",
            ImpBinOp::Le => "<=",
            ImpBinOp::Gt => ">",
            ImpBinOp::Ge => ">=",
            ImpBinOp::And => "&&",
            ImpBinOp::Or => "||",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImpUnOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImpExpr {
    Var(String),
    Int(i64),
    Bool(bool),
    Null,
    Unit,
    /// Nondeterministic value.
    Nondet,
    /// Read of a reference cell: `*x`.
    Deref(Box<ImpExpr>),
    /// Allocation of a fresh reference cell.
    MkRef(Box<ImpExpr>),
    MkArray(Box<ImpExpr>),
    Index {
        base: Box<ImpExpr>,
        index: Box<ImpExpr>,
    },
    Length(Box<ImpExpr>),
    Tuple(Vec<ImpExpr>),
    /// Position `index` of a tuple. Only used inside alias paths.
    Proj {
        base: Box<ImpExpr>,
        index: usize,
    },
    Binary {
        op: ImpBinOp,
        lhs: Box<ImpExpr>,
        rhs: Box<ImpExpr>,
    },
    Unary {
        op: ImpUnOp,
        operand: Box<ImpExpr>,
    },
    Call {
        func: String,
        args: Vec<ImpExpr>,
    },
}

impl ImpExpr {
    pub fn var(name: impl Into<String>) -> Self {
        ImpExpr::Var(name.into())
    }

    pub fn deref(name: impl Into<String>) -> Self {
        ImpExpr::Deref(Box::new(ImpExpr::var(name)))
    }

    pub fn mkref(init: ImpExpr) -> Self {
        ImpExpr::MkRef(Box::new(init))
    }

    pub fn binary(op: ImpBinOp, lhs: ImpExpr, rhs: ImpExpr) -> Self {
        ImpExpr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    pub fn call(func: impl Into<String>, args: Vec<ImpExpr>) -> Self {
        ImpExpr::Call {
            func: func.into(),
            args,
        }
    }

    pub fn proj(base: ImpExpr, index: usize) -> Self {
        ImpExpr::Proj {
            base: Box::new(base),
            index,
        }
    }

    /// `scrutinee = v1 || scrutinee = v2 || ...`. `values` must not be empty.
    pub fn any_of(scrutinee: &ImpExpr, values: &[i64]) -> Self {
        let mut tests = values
            .iter()
            .map(|v| ImpExpr::binary(ImpBinOp::Eq, scrutinee.clone(), ImpExpr::Int(*v)));
        let first = match tests.next() {
            Some(first) => first,
            None => panic!("BUG: gate without any value"),
        };
        tests.fold(first, |acc, test| ImpExpr::binary(ImpBinOp::Or, acc, test))
    }

    fn is_atomic(&self) -> bool {
        !matches!(
            self,
            ImpExpr::Binary { .. } | ImpExpr::Unary { .. } | ImpExpr::MkRef(_) | ImpExpr::MkArray(_)
        )
    }

    fn is_selector(&self) -> bool {
        matches!(
            self,
            ImpExpr::Proj { .. } | ImpExpr::Index { .. } | ImpExpr::Length(_)
        )
    }

    fn fmt_operand(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_atomic() {
            write!(f, "{}", self)
        } else {
            write!(f, "({})", self)
        }
    }

    /// Like `fmt_operand`, but also brackets a dereference so that postfix
    /// selectors apply to the cell's content.
    fn fmt_base(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImpExpr::Deref(_) => write!(f, "({})", self),
            _ => self.fmt_operand(f),
        }
    }
}

impl fmt::Display for ImpExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImpExpr::Var(name) => f.write_str(name),
            ImpExpr::Int(v) => write!(f, "{}", v),
            ImpExpr::Bool(v) => write!(f, "{}", v),
            ImpExpr::Null => f.write_str("null"),
            ImpExpr::Unit => f.write_str("()"),
            ImpExpr::Nondet => f.write_str("_"),
            // `*(o.2)`, never `*o.2`.
            ImpExpr::Deref(inner) if inner.is_selector() => write!(f, "*({})", inner),
            ImpExpr::Deref(inner) => {
                f.write_str("*")?;
                inner.fmt_operand(f)
            }
            ImpExpr::MkRef(init) => {
                f.write_str("mkref ")?;
                init.fmt_operand(f)
            }
            ImpExpr::MkArray(size) => {
                f.write_str("mkarray ")?;
                size.fmt_operand(f)
            }
            ImpExpr::Index { base, index } => {
                base.fmt_base(f)?;
                write!(f, "[{}]", index)
            }
            ImpExpr::Length(base) => {
                base.fmt_base(f)?;
                f.write_str(".length")
            }
            ImpExpr::Tuple(elems) => write!(f, "({})", elems.iter().join(", ")),
            ImpExpr::Proj { base, index } => {
                base.fmt_base(f)?;
                write!(f, ".{}", index)
            }
            ImpExpr::Binary { op, lhs, rhs } => {
                lhs.fmt_operand(f)?;
                write!(f, " {} ", op.symbol())?;
                rhs.fmt_operand(f)
            }
            ImpExpr::Unary { op, operand } => {
                f.write_str(match op {
                    ImpUnOp::Neg => "-",
                    ImpUnOp::Not => "!",
                })?;
                operand.fmt_operand(f)
            }
            ImpExpr::Call { func, args } => write!(f, "{}({})", func, args.iter().join(", ")),
        }
    }
}
