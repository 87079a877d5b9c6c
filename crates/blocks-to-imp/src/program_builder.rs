// Copyright (c) Asymptotic Labs
// SPDX-License-Identifier: Apache-2.0

//! Builds the complete imp program from the entry method outward.
//!
//! Methods are translated on first reference: every call site queues its
//! callee, so only methods reachable from the entry end up in the output.

use crate::error::{TranslationError, TranslationResult};
use crate::storage::{ObjectModel, StorageLayout, Tag};
use crate::translation::{MethodTranslator, NameRegistry, ProgramContext, UnitNumberer};
use block_graph::{BlockId, ClassName, Coord, MethodBody, MethodId, ProgramModel};
use imp_format::ImpProgram;
use log::{debug, info};
use std::collections::{BTreeSet, VecDeque};

/// Methods still to translate, with the names already handed out for them.
#[derive(Debug, Default)]
pub struct Discovery {
    names: NameRegistry,
    units: UnitNumberer,
    queue: VecDeque<MethodId>,
    seen: BTreeSet<MethodId>,
}

impl Discovery {
    /// Output name of `id`. The first request queues the method.
    pub fn request(&mut self, id: &MethodId, body: &MethodBody) -> String {
        if self.seen.insert(id.clone()) {
            self.queue.push_back(id.clone());
        }
        self.names.name_of(id, &body.class, &body.name)
    }

    pub fn unit(&mut self, method: &MethodId, block: BlockId, index: usize) -> usize {
        self.units.number(method, block, index)
    }

    fn next(&mut self) -> Option<MethodId> {
        self.queue.pop_front()
    }
}

/// Output of a whole-program translation.
#[derive(Debug)]
pub struct Translation {
    pub program: ImpProgram,
    /// Flag ids of each generated method, in translation order.
    pub flags: Vec<(String, Vec<(i64, Coord)>)>,
    pub tags: Vec<(Tag, ClassName)>,
}

impl Translation {
    /// The flag and tag tables as s-expressions.
    pub fn flag_table(&self) -> String {
        let methods: String = self
            .flags
            .iter()
            .filter(|(_, flags)| !flags.is_empty())
            .map(|(name, flags)| {
                let entries: String = flags
                    .iter()
                    .map(|(id, coord)| format!(" ({} \"{}\")", id, coord))
                    .collect();
                format!("\n  ({}{})", name, entries)
            })
            .collect();
        let tags: String = self
            .tags
            .iter()
            .map(|(tag, class)| format!("\n  ({} \"{}\")", tag, class))
            .collect();
        format!("(flags{})\n(tags{})\n", methods, tags)
    }
}

pub struct ProgramBuilder<'a> {
    program: &'a ProgramModel,
    layout: StorageLayout,
    model: Box<dyn ObjectModel>,
    discovery: Discovery,
    output: ImpProgram,
    flags: Vec<(String, Vec<(i64, Coord)>)>,
}

impl<'a> ProgramBuilder<'a> {
    pub fn new(program: &'a ProgramModel, layout: StorageLayout, model: Box<dyn ObjectModel>) -> Self {
        Self {
            program,
            layout,
            model,
            discovery: Discovery::default(),
            output: ImpProgram::new(),
            flags: vec![],
        }
    }

    pub fn build(mut self) -> TranslationResult<Translation> {
        let program = self.program;
        let entry = &program.entry;
        let entry_body = program.method(entry).ok_or_else(|| {
            TranslationError::Malformed(format!("entry method {} has no body", entry))
        })?;
        let entry_name = self.discovery.request(entry, entry_body);

        let cx = ProgramContext {
            program,
            layout: &self.layout,
            model: self.model.as_ref(),
        };
        while let Some(id) = self.discovery.next() {
            let body = program.method(&id).ok_or_else(|| {
                TranslationError::Internal(format!("queued method {} has no body", id))
            })?;
            debug!("translating {}", id);
            let output = MethodTranslator::new(&cx, &mut self.discovery, &id, body)?.translate()?;
            let name = output
                .functions
                .last()
                .map(|f| f.name.clone())
                .unwrap_or_default();
            for function in output.functions {
                self.output.push(function);
            }
            self.flags.push((name, output.flags));
        }
        self.output.set_entry(entry_name);
        info!(
            "generated {} functions for {} methods",
            self.output.functions().len(),
            self.flags.len()
        );

        Ok(Translation {
            program: self.output,
            flags: self.flags,
            tags: self
                .layout
                .tags()
                .into_iter()
                .map(|(tag, class)| (tag, class.clone()))
                .collect(),
        })
    }
}
