// Copyright (c) Asymptotic Labs
// SPDX-License-Identifier: Apache-2.0

use crate::error::{TranslationError, TranslationResult};
use crate::translation::names::TempNames;
use crate::translation::translator::MethodTranslator;
use crate::translation::env::Env;
use block_graph::instr::{BinOp, Expr, Instr, Operand, Place, UnOp};
use block_graph::{Binding, Type};
use imp_format::{ImpBinOp, ImpExpr, ImpUnOp, InstructionStream, Stmt};

/// Initial value of a cell or slot of type `ty`.
pub fn default_value(ty: &Type) -> ImpExpr {
    match ty {
        Type::Int => ImpExpr::Int(0),
        Type::Bool => ImpExpr::Bool(false),
        Type::Ref(_) | Type::Array(_) => ImpExpr::Null,
        Type::Void => ImpExpr::Unit,
    }
}

fn binop(op: BinOp) -> ImpBinOp {
    match op {
        BinOp::Add => ImpBinOp::Add,
        BinOp::Sub => ImpBinOp::Sub,
        BinOp::Mul => ImpBinOp::Mul,
        BinOp::Div => ImpBinOp::Div,
        BinOp::Rem => ImpBinOp::Rem,
        BinOp::Eq => ImpBinOp::Eq,
        BinOp::Ne => ImpBinOp::Ne,
        BinOp::Lt => ImpBinOp::Lt,
        BinOp::Le => ImpBinOp::Le,
        BinOp::Gt => ImpBinOp::Gt,
        BinOp::Ge => ImpBinOp::Ge,
        BinOp::And => ImpBinOp::And,
        BinOp::Or => ImpBinOp::Or,
    }
}

fn unop(op: UnOp) -> ImpUnOp {
    match op {
        UnOp::Neg => ImpUnOp::Neg,
        UnOp::Not => ImpUnOp::Not,
    }
}

impl<'a> MethodTranslator<'a> {
    /// The current value of `local`.
    pub(super) fn local_value(&self, local: &str, env: &Env) -> TranslationResult<ImpExpr> {
        match env.binding(local) {
            Some(Binding::Mutable) => Ok(ImpExpr::deref(local)),
            Some(Binding::Const) => Ok(ImpExpr::var(local)),
            None => Err(TranslationError::Malformed(format!(
                "local {} of {} is read outside the scope of its binding",
                local, self.id
            ))),
        }
    }

    pub(super) fn operand(&self, op: &Operand, env: &Env) -> TranslationResult<ImpExpr> {
        Ok(match op {
            Operand::Local(local) => self.local_value(local, env)?,
            Operand::Int(v) => ImpExpr::Int(*v),
            Operand::Bool(v) => ImpExpr::Bool(*v),
            Operand::Null => ImpExpr::Null,
        })
    }

    pub(super) fn operand_type(&self, op: &Operand) -> String {
        match op {
            Operand::Local(local) => self
                .method
                .local_type(local)
                .map_or_else(|| "?".to_string(), |ty| ty.to_string()),
            Operand::Int(_) => Type::Int.to_string(),
            Operand::Bool(_) => Type::Bool.to_string(),
            Operand::Null => "null".to_string(),
        }
    }

    /// Stores `value` into `local`, introducing the binding if this is its
    /// first definition.
    pub(super) fn assign_local(
        &self,
        local: &str,
        value: ImpExpr,
        env: &mut Env,
        out: &mut InstructionStream,
    ) -> TranslationResult<()> {
        match (env.binding(local), env.deferred(local)) {
            (Some(Binding::Mutable), _) => out.assign(local, value),
            (Some(Binding::Const), _) => {
                return Err(TranslationError::Malformed(format!(
                    "CONST local {} of {} is defined more than once",
                    local, self.id
                )))
            }
            (None, Some(Binding::Mutable)) => {
                out.let_ref(local, value);
                env.bind(local, Binding::Mutable);
            }
            (None, Some(Binding::Const)) => {
                out.let_var(local, value);
                env.bind(local, Binding::Const);
            }
            (None, None) => {
                return Err(TranslationError::Malformed(format!(
                    "local {} of {} is defined outside the scope of its binding",
                    local, self.id
                )))
            }
        }
        Ok(())
    }

    pub(super) fn translate_expr(
        &mut self,
        expr: &Expr,
        instr: &Instr,
        temps: &mut TempNames,
        env: &Env,
        out: &mut InstructionStream,
        after: &mut Vec<Stmt>,
    ) -> TranslationResult<ImpExpr> {
        Ok(match expr {
            Expr::Use(op) => self.operand(op, env)?,
            Expr::Binary { op, lhs, rhs } => {
                ImpExpr::binary(binop(*op), self.operand(lhs, env)?, self.operand(rhs, env)?)
            }
            Expr::Unary { op, operand } => ImpExpr::Unary {
                op: unop(*op),
                operand: Box::new(self.operand(operand, env)?),
            },
            Expr::FieldRead {
                base,
                field,
                possible_types,
            } => self.read_field(base, field, possible_types, instr, temps, env, out, after)?,
            Expr::ArrayRead { base, index } => ImpExpr::Index {
                base: Box::new(self.local_value(base, env)?),
                index: Box::new(self.operand(index, env)?),
            },
            Expr::ArrayLength(base) => ImpExpr::Length(Box::new(self.local_value(base, env)?)),
            Expr::New(class) => self.allocate(class, instr)?,
            Expr::NewArray { size, .. } => ImpExpr::MkArray(Box::new(self.operand(size, env)?)),
            Expr::Invoke(call) => self
                .translate_call(call, instr, temps, env, out, after)?
                .ok_or_else(|| {
                    TranslationError::Internal(format!(
                        "`{}` in {} was dropped but its value is used",
                        instr, self.id
                    ))
                })?,
            Expr::Nondet => ImpExpr::Nondet,
            // References carry no runtime type in the output.
            Expr::Cast { operand, ty } if ty.is_reference() => self.operand(operand, env)?,
            Expr::Cast { operand, ty } => {
                return Err(self.unsupported(
                    "primitive cast",
                    instr,
                    vec![self.operand_type(operand), ty.to_string()],
                ))
            }
            Expr::Unmodelled { operand_types, .. } => {
                return Err(self.unsupported(
                    "expression",
                    instr,
                    operand_types.iter().map(Type::to_string).collect(),
                ))
            }
        })
    }

    /// Instructions other than the block terminators and identities.
    pub(super) fn translate_instr(
        &mut self,
        instr: &Instr,
        temps: &mut TempNames,
        env: &mut Env,
        out: &mut InstructionStream,
    ) -> TranslationResult<()> {
        let mut after = vec![];
        match instr {
            Instr::Assign { target, value } => {
                let value = self.translate_expr(value, instr, temps, env, out, &mut after)?;
                match target {
                    Place::Local(local) => self.assign_local(local, value, env, out)?,
                    Place::Field {
                        base,
                        field,
                        possible_types,
                    } => self.write_field(
                        base,
                        field,
                        possible_types,
                        value,
                        instr,
                        temps,
                        env,
                        out,
                        &mut after,
                    )?,
                    Place::ArrayElem { base, index } => out.push(Stmt::ArrayStore {
                        array: self.local_value(base, env)?,
                        index: self.operand(index, env)?,
                        value,
                    }),
                }
            }
            Instr::Invoke(call) => {
                if let Some(call) = self.translate_call(call, instr, temps, env, out, &mut after)? {
                    out.push(Stmt::Expr(call));
                }
            }
            Instr::Nop { unreachable: true } => out.push(Stmt::assert_false()),
            Instr::Nop { unreachable: false } => {}
            Instr::Throw { value } => {
                return Err(self.unsupported("exception", instr, vec![self.operand_type(value)]))
            }
            Instr::Alias { left, right } => {
                let left = self.access_path(left, instr, env)?;
                let right = self.access_path(right, instr, env)?;
                out.push(Stmt::alias(left, right));
            }
            Instr::Identity { .. } | Instr::If { .. } | Instr::Goto | Instr::Return { .. } => {
                return Err(TranslationError::Internal(format!(
                    "`{}` in {} reached the instruction translator",
                    instr, self.id
                )))
            }
        }
        out.extend(after);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        assert_eq!(default_value(&Type::Int), ImpExpr::Int(0));
        assert_eq!(default_value(&Type::Bool), ImpExpr::Bool(false));
        assert_eq!(default_value(&Type::Ref("A".into())), ImpExpr::Null);
        assert_eq!(
            default_value(&Type::Array(Box::new(Type::Int))),
            ImpExpr::Null
        );
        assert_eq!(default_value(&Type::Void), ImpExpr::Unit);
    }

    #[test]
    fn test_operators_map_one_to_one() {
        assert_eq!(binop(BinOp::Eq).symbol(), "=");
        assert_eq!(binop(BinOp::And).symbol(), "&&");
        assert_eq!(unop(UnOp::Not), ImpUnOp::Not);
    }
}
