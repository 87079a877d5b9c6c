// Copyright (c) Asymptotic Labs
// SPDX-License-Identifier: Apache-2.0

//! Where values live: object slots, object representations and local bindings.

pub mod bindings;
pub mod layout;
pub mod object_model;

pub use bindings::BindingTable;
pub use layout::{FieldSlot, SlotError, StorageLayout, Tag};
pub use object_model::{FieldHandle, FieldOwner, ModelKind, ObjectModel};
