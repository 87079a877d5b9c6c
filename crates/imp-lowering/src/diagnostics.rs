// Copyright (c) Asymptotic Labs
// SPDX-License-Identifier: Apache-2.0

//! Reports input and translation errors against the input file.

use blocks_to_imp::TranslationError;
use codespan_reporting::diagnostic::{Diagnostic, Label};
use codespan_reporting::files::SimpleFiles;
use codespan_reporting::term::{self, termcolor::WriteColor};
use std::error::Error;
use std::ops::Range;

/// Byte range of the JSON key naming `method`, if it occurs in `source`.
fn method_key(source: &str, method: &str) -> Option<Range<usize>> {
    let key = format!("\"{}\"", method);
    source.find(&key).map(|start| start..start + key.len())
}

/// Byte offset of a 1-based line and column.
fn offset_of(source: &str, line: usize, column: usize) -> usize {
    let line_start: usize = source
        .split_inclusive('\n')
        .take(line.saturating_sub(1))
        .map(str::len)
        .sum();
    (line_start + column.saturating_sub(1)).min(source.len())
}

fn emit<W: WriteColor>(
    writer: &mut W,
    file_name: &str,
    source: &str,
    build: impl FnOnce(usize) -> Diagnostic<usize>,
) -> anyhow::Result<()> {
    let mut files = SimpleFiles::new();
    let file_id = files.add(file_name.to_string(), source.to_string());
    term::emit(writer, &term::Config::default(), &files, &build(file_id))?;
    Ok(())
}

pub fn report_translation_error<W: WriteColor>(
    writer: &mut W,
    file_name: &str,
    source: &str,
    err: &TranslationError,
) -> anyhow::Result<()> {
    emit(writer, file_name, source, |file_id| {
        let mut diagnostic = Diagnostic::error().with_message(err.to_string());
        if let Some(range) = err.method().and_then(|m| method_key(source, &m.0)) {
            diagnostic = diagnostic
                .with_labels(vec![Label::primary(file_id, range).with_message("in this method")]);
        }
        let mut notes = vec![];
        let mut cause = err.source();
        while let Some(inner) = cause {
            notes.push(format!("caused by: {}", inner));
            cause = inner.source();
        }
        diagnostic.with_notes(notes)
    })
}

pub fn report_parse_error<W: WriteColor>(
    writer: &mut W,
    file_name: &str,
    source: &str,
    err: &serde_json::Error,
) -> anyhow::Result<()> {
    emit(writer, file_name, source, |file_id| {
        let at = offset_of(source, err.line(), err.column());
        Diagnostic::error()
            .with_message("invalid program description")
            .with_labels(vec![Label::primary(file_id, at..at).with_message(err.to_string())])
    })
}
