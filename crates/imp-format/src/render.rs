// Copyright (c) Asymptotic Labs
// SPDX-License-Identifier: Apache-2.0

//! Program text rendering.
//!
//! Statements of a block are separated by `;` and a newline, blocks are
//! braced and indented by two spaces.

use crate::expr::ImpExpr;
use crate::program::{ImpFunction, ImpProgram};
use crate::stmt::Stmt;
use crate::writer::{render_to_string, ImpWriter};

pub fn render_program(program: &ImpProgram) -> String {
    render_to_string(|w| {
        for function in program.functions() {
            render_function(w, function);
            w.newline();
            w.newline();
        }
        if let Some(entry) = program.entry() {
            w.line_fmt(format_args!("{{ {}() }}", entry));
        }
    })
}

pub fn render_function(w: &mut ImpWriter, function: &ImpFunction) {
    w.write(&function.name);
    w.write("(");
    w.sep(", ", &function.params);
    w.write(") ");
    render_block(w, &function.body);
}

pub fn render_block(w: &mut ImpWriter, stmts: &[Stmt]) {
    if stmts.is_empty() {
        w.write("{ }");
        return;
    }
    w.write("{");
    w.indent(true);
    w.sep_with(";\n", stmts, render_stmt);
    w.dedent(true);
    w.write("}");
}

pub fn render_stmt(w: &mut ImpWriter, stmt: &Stmt) {
    match stmt {
        Stmt::Let {
            pattern,
            value,
            body,
        } => {
            w.write_fmt(format_args!("let {} = {} in ", pattern, value));
            render_block(w, body);
        }
        Stmt::Assign { target, value } => w.write_fmt(format_args!("{} := {}", target, value)),
        Stmt::ArrayStore {
            array,
            index,
            value,
        } => {
            let slot = ImpExpr::Index {
                base: Box::new(array.clone()),
                index: Box::new(index.clone()),
            };
            w.write_fmt(format_args!("{} <- {}", slot, value));
        }
        Stmt::If {
            cond,
            then_branch,
            else_branch,
        } => {
            w.write_fmt(format_args!("if {} then ", cond));
            render_block(w, then_branch);
            if !else_branch.is_empty() {
                w.write(" else ");
                render_block(w, else_branch);
            }
        }
        Stmt::Return(value) => w.write_fmt(format_args!("return {}", value)),
        Stmt::Assert(cond) => w.write_fmt(format_args!("assert({})", cond)),
        Stmt::Alias { left, right } => w.write_fmt(format_args!("alias({} = {})", left, right)),
        Stmt::Expr(expr) => w.write_fmt(format_args!("{}", expr)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::ImpBinOp;
    use crate::stmt::{InstructionStream, Pattern};

    #[test]
    fn test_render_program_with_loop_function() {
        let mut body = InstructionStream::new();
        body.push(Stmt::If {
            cond: ImpExpr::binary(ImpBinOp::Lt, ImpExpr::deref("i"), ImpExpr::Int(10)),
            then_branch: vec![
                Stmt::Assign {
                    target: "i".to_string(),
                    value: ImpExpr::binary(ImpBinOp::Add, ImpExpr::deref("i"), ImpExpr::Int(1)),
                },
                Stmt::Return(ImpExpr::call("Main_main__loop_1", vec![ImpExpr::var("i")])),
            ],
            else_branch: vec![Stmt::Return(ImpExpr::Unit)],
        });
        let loop_fn = ImpFunction::new("Main_main__loop_1", vec!["i".to_string()], body.finish());

        let mut main = InstructionStream::new();
        main.let_ref("i", ImpExpr::Int(0));
        main.push(Stmt::Expr(ImpExpr::call("Main_main__loop_1", vec![ImpExpr::var("i")])));
        main.ret(ImpExpr::Unit);
        let main_fn = ImpFunction::new("Main_main", vec![], main.finish());

        let mut program = ImpProgram::new();
        program.push(loop_fn);
        program.push(main_fn);
        program.set_entry("Main_main");

        let expected = "\
Main_main__loop_1(i) {
  if *i < 10 then {
    i := *i + 1;
    return Main_main__loop_1(i)
  } else {
    return ()
  }
}

Main_main() {
  let i = mkref 0 in {
    Main_main__loop_1(i);
    return ()
  }
}

{ Main_main() }
";
        assert_eq!(program.render(), expected);
    }

    #[test]
    fn test_render_heap_statements() {
        let stmts = vec![
            Stmt::Let {
                pattern: Pattern::Tuple(vec![None, Some("f".to_string())]),
                value: ImpExpr::var("o"),
                body: vec![Stmt::alias(ImpExpr::var("f"), ImpExpr::proj(ImpExpr::var("o"), 1))],
            },
            Stmt::ArrayStore {
                array: ImpExpr::deref("a"),
                index: ImpExpr::Int(0),
                value: ImpExpr::Nondet,
            },
            Stmt::assert_false(),
        ];
        let text = render_to_string(|w| render_block(w, &stmts));
        let expected = "\
{
  let (_, f) = o in {
    alias(f = o.1)
  };
  (*a)[0] <- _;
  assert(false)
}";
        assert_eq!(text, expected);
    }

    #[test]
    fn test_empty_else_is_omitted() {
        let stmt = Stmt::If {
            cond: ImpExpr::Bool(true),
            then_branch: vec![],
            else_branch: vec![],
        };
        let text = render_to_string(|w| render_stmt(w, &stmt));
        assert_eq!(text, "if true then { }");
    }
}
