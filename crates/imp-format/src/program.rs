// Copyright (c) Asymptotic Labs
// SPDX-License-Identifier: Apache-2.0

use crate::render::render_program;
use crate::stmt::Stmt;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImpFunction {
    pub name: String,
    pub params: Vec<String>,
    pub body: Vec<Stmt>,
}

impl ImpFunction {
    pub fn new(name: impl Into<String>, params: Vec<String>, body: Vec<Stmt>) -> Self {
        Self {
            name: name.into(),
            params,
            body,
        }
    }
}

/// A whole output program: its functions in emission order and the function
/// invoked by the trailing entry directive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImpProgram {
    functions: Vec<ImpFunction>,
    entry: Option<String>,
}

impl ImpProgram {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, function: ImpFunction) {
        self.functions.push(function);
    }

    pub fn functions(&self) -> &[ImpFunction] {
        &self.functions
    }

    pub fn function(&self, name: &str) -> Option<&ImpFunction> {
        self.functions.iter().find(|f| f.name == name)
    }

    pub fn set_entry(&mut self, name: impl Into<String>) {
        self.entry = Some(name.into());
    }

    pub fn entry(&self) -> Option<&str> {
        self.entry.as_deref()
    }

    pub fn render(&self) -> String {
        render_program(self)
    }
}

impl fmt::Display for ImpProgram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}
