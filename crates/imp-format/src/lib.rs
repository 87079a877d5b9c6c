// Copyright (c) Asymptotic Labs
// SPDX-License-Identifier: Apache-2.0

//! Structured output language
//!
//! Goto-free programs made of named functions whose bodies are nested
//! let-bindings, conditionals, reference-cell reads and writes, tuple and array
//! operations, calls and returns. This crate only holds the tree, the builder
//! used to produce it and the text renderer; the lowering itself lives in
//! `blocks-to-imp`.

mod expr;
mod program;
pub mod render;
mod stmt;
mod writer;

pub use expr::{ImpBinOp, ImpExpr, ImpUnOp};
pub use program::{ImpFunction, ImpProgram};
pub use stmt::{is_terminal, InstructionStream, Pattern, Stmt};
pub use writer::{render_to_string, ImpWriter};
