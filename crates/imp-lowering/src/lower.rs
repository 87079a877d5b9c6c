// Copyright (c) Asymptotic Labs
// SPDX-License-Identifier: Apache-2.0

use crate::diagnostics::{report_parse_error, report_translation_error};
use crate::options::Settings;
use anyhow::{anyhow, Context};
use block_graph::ProgramModel;
use blocks_to_imp::{translate_program, TranslationOptions};
use codespan_reporting::term::termcolor::{ColorChoice, StandardStream};
use log::{debug, info};
use std::fs;
use std::path::Path;

fn write_output(path: &Path, contents: &str) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    fs::write(path, contents).with_context(|| format!("failed to write {}", path.display()))
}

pub fn execute(input: &Path, settings: Settings) -> anyhow::Result<()> {
    let source = fs::read_to_string(input)
        .with_context(|| format!("failed to read {}", input.display()))?;
    let file_name = input.display().to_string();
    let mut stderr = StandardStream::stderr(ColorChoice::Auto);

    let program: ProgramModel = match serde_json::from_str(&source) {
        Ok(program) => program,
        Err(err) => {
            report_parse_error(&mut stderr, &file_name, &source, &err)?;
            return Err(anyhow!(err)).context(format!("failed to parse {}", file_name));
        }
    };
    debug!(
        "loaded {} classes and {} methods from {}",
        program.classes.len(),
        program.methods.len(),
        file_name
    );

    let options = TranslationOptions {
        model: settings.model,
        entry: settings.entry,
    };
    let translation = match translate_program(&program, &options) {
        Ok(translation) => translation,
        Err(err) => {
            report_translation_error(&mut stderr, &file_name, &source, &err)?;
            return Err(anyhow!(err)).context("exiting with translation errors");
        }
    };

    let text = translation.program.render();
    match &settings.output {
        Some(path) => {
            write_output(path, &text)?;
            info!("wrote {}", path.display());
        }
        None => print!("{}", text),
    }
    if let Some(path) = &settings.flags {
        write_output(path, &translation.flag_table())?;
        info!("wrote flag table to {}", path.display());
    }
    Ok(())
}
