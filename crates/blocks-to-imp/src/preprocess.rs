// Copyright (c) Asymptotic Labs
// SPDX-License-Identifier: Apache-2.0

//! Rewrites applied to the program model before translation.

use crate::error::{TranslationError, TranslationResult};
use block_graph::instr::{IdentitySource, Instr};
use block_graph::{MethodBody, ProgramModel, Type};
use log::debug;

fn is_argument_vector(params: &[Type]) -> bool {
    match params {
        [Type::Array(elem)] => {
            matches!(elem.as_ref(), Type::Ref(class) if class == "String" || class == "java.lang.String")
        }
        _ => false,
    }
}

fn unsupported(method: &MethodBody, program: &ProgramModel, construct: &str, instruction: String) -> TranslationError {
    TranslationError::Unsupported {
        method: program.entry.clone(),
        construct: construct.to_string(),
        instruction,
        operand_types: method.params.iter().map(Type::to_string).collect(),
    }
}

/// Drops the unused `String[]` parameter of the entry method. The entry method
/// must take no other parameter.
pub fn strip_argument_vector(program: &mut ProgramModel) -> TranslationResult<()> {
    let entry_id = program.entry.clone();
    let entry = program.methods.get(&entry_id).ok_or_else(|| {
        TranslationError::Malformed(format!("entry method {} has no body", entry_id))
    })?;
    let signature = format!("{}.{}", entry.class, entry.name);
    if !entry.is_static {
        return Err(unsupported(entry, program, "instance entry method", signature));
    }
    if !is_argument_vector(&entry.params) {
        if entry.params.is_empty() {
            return Ok(());
        }
        return Err(unsupported(entry, program, "entry method with parameters", signature));
    }

    let local = entry.identity_locals().get(&IdentitySource::Param(0)).cloned();
    if let Some(local) = &local {
        let touched = entry
            .blocks
            .iter()
            .flat_map(|b| b.instrs.iter())
            .filter(|instr| !matches!(instr, Instr::Identity { .. }))
            .find(|instr| {
                instr.used_locals().contains(local.as_str())
                    || instr.defined_local() == Some(local.as_str())
            });
        if let Some(instr) = touched {
            return Err(unsupported(entry, program, "use of the argument vector", instr.to_string()));
        }
    }

    let Some(entry) = program.methods.get_mut(&entry_id) else {
        return Ok(());
    };
    for instr in entry.blocks.iter_mut().flat_map(|b| b.instrs.iter_mut()) {
        if matches!(instr, Instr::Identity { source: IdentitySource::Param(0), .. }) {
            *instr = Instr::Nop { unreachable: false };
        }
    }
    if let Some(local) = &local {
        entry.locals.retain(|l| &l.name != local);
        if let Some(plan) = entry.bindings.as_mut() {
            plan.entry.remove(local);
            for bindings in plan.blocks.values_mut() {
                bindings.remove(local);
            }
        }
    }
    entry.params.clear();
    debug!("stripped the argument vector of {}", entry_id);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use block_graph::builder::MethodBuilder;
    use block_graph::instr::{Expr, Operand, Place};
    use block_graph::MethodId;
    use std::collections::BTreeMap;

    fn string_array() -> Type {
        Type::Array(Box::new(Type::Ref("java.lang.String".into())))
    }

    fn program(main: MethodBody) -> ProgramModel {
        let entry = MethodId::new("Main", "main");
        ProgramModel {
            classes: vec![],
            methods: BTreeMap::from([(entry.clone(), main)]),
            entry,
        }
    }

    fn identity() -> Instr {
        Instr::Identity {
            local: "args".into(),
            source: IdentitySource::Param(0),
        }
    }

    #[test]
    fn test_unused_argument_vector_is_removed() {
        let mut b = MethodBuilder::new();
        b.local("args", string_array()).param(string_array());
        b.block(0, vec![identity(), Instr::Return { value: None }], &[]);
        let mut program = program(b.build("Main", "main"));
        strip_argument_vector(&mut program).unwrap();

        let main = &program.methods[&program.entry];
        assert!(main.params.is_empty());
        assert!(main.locals.is_empty());
        assert_eq!(main.blocks[0].instrs[0], Instr::Nop { unreachable: false });
    }

    #[test]
    fn test_read_argument_vector_is_unsupported() {
        let mut b = MethodBuilder::new();
        b.local("args", string_array())
            .local("n", Type::Int)
            .param(string_array());
        b.block(
            0,
            vec![
                identity(),
                Instr::Assign {
                    target: Place::Local("n".into()),
                    value: Expr::ArrayLength("args".into()),
                },
                Instr::Return { value: None },
            ],
            &[],
        );
        let mut program = program(b.build("Main", "main"));
        let err = strip_argument_vector(&mut program).unwrap_err();
        assert!(err.to_string().contains("use of the argument vector"));
    }

    #[test]
    fn test_other_entry_parameters_are_unsupported() {
        let mut b = MethodBuilder::new();
        b.param(Type::Int);
        b.ret_value(0, vec![], Operand::Int(0));
        let err = strip_argument_vector(&mut program(b.build("Main", "main"))).unwrap_err();
        assert!(err.to_string().contains("entry method with parameters"));
    }
}
