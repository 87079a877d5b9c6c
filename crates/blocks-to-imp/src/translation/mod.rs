// Copyright (c) Asymptotic Labs
// SPDX-License-Identifier: Apache-2.0

//! Translation of one instrumented method into imp functions.

mod calls;
pub mod env;
mod fields;
pub mod names;
mod translator;
mod values;

pub use names::{NameRegistry, UnitNumberer};
pub use translator::{MethodOutput, MethodTranslator, ProgramContext};
pub use values::default_value;
