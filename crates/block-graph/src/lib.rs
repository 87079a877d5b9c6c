// Copyright (c) Asymptotic Labs
// SPDX-License-Identifier: Apache-2.0

//! Basic block model and control-flow reconstruction
//!
//! Takes method bodies split into basic blocks and recovers a tree of
//! sequences, conditionals, loops and merges, then decides which jumps must
//! leave a trace in the control cell so that the tree can be executed without
//! gotos.

pub mod block;
pub mod builder;
mod error;
pub mod instr;
pub mod instrumentation;
pub mod loops;
pub mod model;
pub mod structure;

pub use block::{BasicBlock, BlockGraph, BlockId, Branch, Coord};
pub use error::GraphError;
pub use instrumentation::{instrument, FlagSets};
pub use loops::{LoopForest, LoopId, LoopInfo};
pub use model::{
    Binding, BindingPlan, ClassDecl, ClassName, FieldDecl, FieldRef, LocalDecl, LocalName,
    MethodBody, MethodId, ProgramModel, Type, CONSTRUCTOR_NAME,
};
pub use structure::{reconstruct, GraphElem, StructuredMethod};
