// Copyright (c) Asymptotic Labs
// SPDX-License-Identifier: Apache-2.0

//! Structured block graphs to imp program translation

mod error;
pub mod pipeline;
mod preprocess;
mod program_builder;
pub mod storage;
pub mod translation;

pub use error::{TranslationError, TranslationResult};
pub use pipeline::{translate_program, TranslationOptions};
pub use program_builder::{Discovery, ProgramBuilder, Translation};
pub use storage::ModelKind;
