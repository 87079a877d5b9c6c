// Copyright (c) Asymptotic Labs
// SPDX-License-Identifier: Apache-2.0

//! Type-keyed annotation store attached to structured nodes, plus the
//! annotations the flag instrumentation derives.

use crate::block::{BlockId, Coord};
use std::any::{Any, TypeId};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::rc::Rc;

/// Open key/value store where the key is the type of the stored value.
#[derive(Clone, Default)]
pub struct Annotations {
    map: BTreeMap<TypeId, Rc<dyn Any>>,
}

impl Annotations {
    pub fn get<T: Any>(&self) -> Option<&T> {
        self.map
            .get(&TypeId::of::<T>())
            .and_then(|data| data.downcast_ref::<T>())
    }

    pub fn has<T: Any>(&self) -> bool {
        self.map.contains_key(&TypeId::of::<T>())
    }

    pub fn set<T: Any>(&mut self, value: T) {
        self.map.insert(TypeId::of::<T>(), Rc::new(value));
    }

    pub fn remove<T: Any>(&mut self) {
        self.map.remove(&TypeId::of::<T>());
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl fmt::Debug for Annotations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Annotations({} entries)", self.map.len())
    }
}

/// Arrival at the node is only valid when one of these coords was the last jump taken.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateOn(pub BTreeSet<Coord>);

/// For a merge node: which coords select which alternative head.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChooseBy(pub BTreeMap<BlockId, BTreeSet<Coord>>);

/// For a loop: coords that, once the loop function returns, make the
/// enclosing loop recurse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecurseOn(pub BTreeSet<Coord>);

/// For a loop: coords that, once the loop function returns, make the
/// enclosing function return.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReturnOn(pub BTreeSet<Coord>);

/// Whether the loop contains a method return and so must hand back a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValueLoop(pub bool);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_annotations_are_keyed_by_type() {
        let mut annotations = Annotations::default();
        assert!(annotations.is_empty());
        annotations.set(ValueLoop(true));
        annotations.set(GateOn([Coord::exit(BlockId(3))].into_iter().collect()));
        assert_eq!(annotations.get::<ValueLoop>(), Some(&ValueLoop(true)));
        assert!(annotations.has::<GateOn>());
        assert!(!annotations.has::<ChooseBy>());

        annotations.set(ValueLoop(false));
        assert_eq!(annotations.get::<ValueLoop>(), Some(&ValueLoop(false)));
        annotations.remove::<GateOn>();
        assert!(annotations.get::<GateOn>().is_none());
    }
}
