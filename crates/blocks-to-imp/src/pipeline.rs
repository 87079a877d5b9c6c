// Copyright (c) Asymptotic Labs
// SPDX-License-Identifier: Apache-2.0

//! High-level translation pipeline from a program model to the imp format.
//!
//! This is the main entry point for drivers. Call `translate_program()` to get
//! the complete program text model together with its flag and tag tables.

use crate::error::TranslationResult;
use crate::preprocess::strip_argument_vector;
use crate::program_builder::{ProgramBuilder, Translation};
use crate::storage::{ModelKind, StorageLayout};
use block_graph::{MethodId, ProgramModel};
use log::info;

#[derive(Debug, Clone, Default)]
pub struct TranslationOptions {
    pub model: ModelKind,
    /// Overrides the program's own entry method.
    pub entry: Option<MethodId>,
}

/// Translate a program model to an imp program.
///
/// 1. Strips the entry method's argument vector
/// 2. Computes the storage layout of every class
/// 3. Translates every method reachable from the entry
pub fn translate_program(
    program: &ProgramModel,
    options: &TranslationOptions,
) -> TranslationResult<Translation> {
    let mut program = program.clone();
    if let Some(entry) = &options.entry {
        program.entry = entry.clone();
    }
    strip_argument_vector(&mut program)?;

    let layout = StorageLayout::build(&program)?;
    info!(
        "translating from {} with the {:?} object model",
        program.entry, options.model
    );
    ProgramBuilder::new(&program, layout, options.model.object_model()).build()
}
