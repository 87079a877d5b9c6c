// Copyright (c) Asymptotic Labs
// SPDX-License-Identifier: Apache-2.0

//! Statements and the instruction stream used to build them.

use crate::expr::ImpExpr;
use itertools::Itertools;
use std::fmt;

/// Left-hand side of a `let`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pattern {
    Var(String),
    /// Destructures a tuple; `None` positions are ignored.
    Tuple(Vec<Option<String>>),
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pattern::Var(name) => f.write_str(name),
            Pattern::Tuple(slots) => write!(
                f,
                "({})",
                slots
                    .iter()
                    .map(|s| s.as_deref().unwrap_or("_"))
                    .join(", ")
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stmt {
    /// `let p = e in { body }`
    Let {
        pattern: Pattern,
        value: ImpExpr,
        body: Vec<Stmt>,
    },
    /// `x := e`, a write to the reference cell `x`.
    Assign { target: String, value: ImpExpr },
    /// `a[i] <- v`
    ArrayStore {
        array: ImpExpr,
        index: ImpExpr,
        value: ImpExpr,
    },
    If {
        cond: ImpExpr,
        then_branch: Vec<Stmt>,
        else_branch: Vec<Stmt>,
    },
    Return(ImpExpr),
    Assert(ImpExpr),
    /// `alias(p = q)`
    Alias { left: ImpExpr, right: ImpExpr },
    /// An expression evaluated for its effects, usually a call.
    Expr(ImpExpr),
}

impl Stmt {
    pub fn assert_false() -> Self {
        Stmt::Assert(ImpExpr::Bool(false))
    }

    pub fn alias(left: ImpExpr, right: ImpExpr) -> Self {
        Stmt::Alias { left, right }
    }

    /// Whether control never falls out of this statement.
    pub fn is_terminal(&self) -> bool {
        match self {
            Stmt::Return(_) => true,
            Stmt::Assert(ImpExpr::Bool(false)) => true,
            Stmt::Let { body, .. } => is_terminal(body),
            Stmt::If {
                then_branch,
                else_branch,
                ..
            } => is_terminal(then_branch) && is_terminal(else_branch),
            _ => false,
        }
    }
}

/// Whether a statement list always ends by leaving the function.
pub fn is_terminal(stmts: &[Stmt]) -> bool {
    stmts.last().map_or(false, Stmt::is_terminal)
}

struct Frame {
    binder: Option<(Pattern, ImpExpr)>,
    stmts: Vec<Stmt>,
}

/// Append-only builder for a statement list.
///
/// A `let` opened with [`InstructionStream::bind`] scopes over everything
/// pushed after it, so the stream keeps a stack of open scopes and only nests
/// them when it is finished.
pub struct InstructionStream {
    frames: Vec<Frame>,
}

impl Default for InstructionStream {
    fn default() -> Self {
        Self::new()
    }
}

impl InstructionStream {
    pub fn new() -> Self {
        Self {
            frames: vec![Frame {
                binder: None,
                stmts: vec![],
            }],
        }
    }

    fn top(&mut self) -> &mut Frame {
        match self.frames.last_mut() {
            Some(frame) => frame,
            None => panic!("BUG: instruction stream without a root scope"),
        }
    }

    pub fn push(&mut self, stmt: Stmt) {
        self.top().stmts.push(stmt);
    }

    pub fn extend(&mut self, stmts: impl IntoIterator<Item = Stmt>) {
        self.top().stmts.extend(stmts);
    }

    /// Opens `let pattern = value in { .. }` around the rest of the stream.
    pub fn bind(&mut self, pattern: Pattern, value: ImpExpr) {
        self.frames.push(Frame {
            binder: Some((pattern, value)),
            stmts: vec![],
        });
    }

    pub fn let_var(&mut self, name: impl Into<String>, value: ImpExpr) {
        self.bind(Pattern::Var(name.into()), value);
    }

    /// Binds a fresh reference cell holding `init`.
    pub fn let_ref(&mut self, name: impl Into<String>, init: ImpExpr) {
        self.let_var(name, ImpExpr::mkref(init));
    }

    pub fn assign(&mut self, target: impl Into<String>, value: ImpExpr) {
        self.push(Stmt::Assign {
            target: target.into(),
            value,
        });
    }

    pub fn ret(&mut self, value: ImpExpr) {
        self.push(Stmt::Return(value));
    }

    /// Whether the stream built so far never falls through its end.
    pub fn is_terminal(&self) -> bool {
        self.frames.last().map_or(false, |f| is_terminal(&f.stmts))
    }

    pub fn is_empty(&self) -> bool {
        self.frames.len() == 1 && self.frames[0].stmts.is_empty()
    }

    /// Closes every open scope and returns the statement list.
    pub fn finish(mut self) -> Vec<Stmt> {
        while self.frames.len() > 1 {
            let Some(frame) = self.frames.pop() else {
                break;
            };
            if let Some((pattern, value)) = frame.binder {
                self.top().stmts.push(Stmt::Let {
                    pattern,
                    value,
                    body: frame.stmts,
                });
            }
        }
        self.frames.pop().map(|f| f.stmts).unwrap_or_default()
    }
}
