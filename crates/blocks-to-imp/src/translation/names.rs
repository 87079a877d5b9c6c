// Copyright (c) Asymptotic Labs
// SPDX-License-Identifier: Apache-2.0

//! Stable names for generated functions and temporaries.

use block_graph::{BlockId, MethodId};
use std::collections::{BTreeMap, BTreeSet};

/// Output names of translated methods: `<Class>_<method>`, made unique with a
/// numeric suffix.
#[derive(Debug, Default)]
pub struct NameRegistry {
    names: BTreeMap<MethodId, String>,
    used: BTreeSet<String>,
}

impl NameRegistry {
    pub fn name_of(&mut self, id: &MethodId, class: &str, method: &str) -> String {
        if let Some(name) = self.names.get(id) {
            return name.clone();
        }
        let base = format!("{}_{}", sanitize(class), sanitize(method));
        let mut name = base.clone();
        let mut suffix = 2;
        while self.used.contains(&name) {
            name = format!("{}_{}", base, suffix);
            suffix += 1;
        }
        self.used.insert(name.clone());
        self.names.insert(id.clone(), name.clone());
        name
    }
}

pub fn sanitize(name: &str) -> String {
    name.trim_start_matches('<')
        .trim_end_matches('>')
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect()
}

/// Numbers instruction sites across the whole program in first-request order.
#[derive(Debug, Default)]
pub struct UnitNumberer {
    units: BTreeMap<(MethodId, BlockId, usize), usize>,
}

impl UnitNumberer {
    pub fn number(&mut self, method: &MethodId, block: BlockId, index: usize) -> usize {
        let next = self.units.len();
        *self
            .units
            .entry((method.clone(), block, index))
            .or_insert(next)
    }
}

/// Temporaries introduced while translating one instruction.
#[derive(Debug)]
pub struct TempNames {
    unit: usize,
    issued: BTreeMap<String, usize>,
}

impl TempNames {
    pub fn new(unit: usize) -> Self {
        Self {
            unit,
            issued: BTreeMap::new(),
        }
    }

    pub fn unit(&self) -> usize {
        self.unit
    }

    /// `<stem>_<unit>`, then `<stem>_<unit>_1`, ... on repeated requests.
    pub fn fresh(&mut self, stem: &str) -> String {
        let count = self.issued.entry(stem.to_string()).or_default();
        let name = match *count {
            0 => format!("{}_{}", stem, self.unit),
            n => format!("{}_{}_{}", stem, self.unit, n),
        };
        *count += 1;
        name
    }

    /// Temporary for the argument in position `position` of this site's call.
    pub fn call_arg(&self, position: usize) -> String {
        format!("__call{}_{}", self.unit, position)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_names_are_unique() {
        let mut names = NameRegistry::default();
        let a = MethodId::new("pkg.A", "m");
        let b = MethodId::with_arity("pkg.A", "m", 2);
        assert_eq!(names.name_of(&a, "pkg.A", "m"), "pkg_A_m");
        assert_eq!(names.name_of(&b, "pkg.A", "m"), "pkg_A_m_2");
        assert_eq!(names.name_of(&a, "pkg.A", "m"), "pkg_A_m");
        assert_eq!(sanitize("<init>"), "init");
    }

    #[test]
    fn test_units_are_numbered_on_first_request() {
        let mut units = UnitNumberer::default();
        let m = MethodId::new("A", "m");
        assert_eq!(units.number(&m, BlockId(3), 1), 0);
        assert_eq!(units.number(&m, BlockId(0), 0), 1);
        assert_eq!(units.number(&m, BlockId(3), 1), 0);
    }

    #[test]
    fn test_temporaries_do_not_collide() {
        let mut temps = TempNames::new(4);
        assert_eq!(temps.fresh("__field"), "__field_4");
        assert_eq!(temps.fresh("__field"), "__field_4_1");
        assert_eq!(temps.fresh("__base_ptr"), "__base_ptr_4");
        assert_eq!(temps.call_arg(0), "__call4_0");
    }
}
