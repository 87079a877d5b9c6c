// Copyright (c) Asymptotic Labs
// SPDX-License-Identifier: Apache-2.0

//! Line-based writer for program text with indentation.

use std::fmt::Display;

/// Tracks indentation and handles line-based output.
pub struct ImpWriter {
    out: String,
    indent: usize,
    at_line_start: bool,
}

impl Default for ImpWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl ImpWriter {
    pub fn new() -> Self {
        Self {
            out: String::new(),
            indent: 0,
            at_line_start: true,
        }
    }

    /// Write a string, indenting at line starts.
    pub fn write(&mut self, s: &str) {
        for c in s.chars() {
            if c == '\n' {
                self.out.push('\n');
                self.at_line_start = true;
            } else {
                if self.at_line_start {
                    for _ in 0..self.indent {
                        self.out.push_str("  ");
                    }
                }
                self.at_line_start = false;
                self.out.push(c);
            }
        }
    }

    /// Write a complete line (adds newline at end).
    pub fn line(&mut self, s: &str) {
        self.write(s);
        self.newline();
    }

    /// Increase indentation for subsequent lines.
    /// If `newline` is true, writes a newline before indenting (for block starts).
    pub fn indent(&mut self, newline: bool) {
        if newline {
            self.newline();
        }
        self.indent += 1;
    }

    /// Decrease indentation for subsequent lines.
    /// If `newline` is true, writes a newline after dedenting (for block ends).
    pub fn dedent(&mut self, newline: bool) {
        self.indent = self.indent.saturating_sub(1);
        if newline {
            self.newline();
        }
    }

    pub fn write_fmt(&mut self, args: std::fmt::Arguments<'_>) {
        self.write(&args.to_string());
    }

    pub fn line_fmt(&mut self, args: std::fmt::Arguments<'_>) {
        self.line(&args.to_string());
    }

    pub fn newline(&mut self) {
        self.write("\n");
    }

    /// Write items separated by a separator string.
    pub fn sep<I, T>(&mut self, separator: &str, items: I)
    where
        I: IntoIterator<Item = T>,
        T: Display,
    {
        self.sep_with(separator, items, |w, item| w.write(&item.to_string()));
    }

    /// Write items with a separator, using a custom render function for each item.
    pub fn sep_with<I, T, F>(&mut self, separator: &str, items: I, mut render: F)
    where
        I: IntoIterator<Item = T>,
        F: FnMut(&mut Self, T),
    {
        let mut first = true;
        for item in items {
            if !first {
                self.write(separator);
            }
            first = false;
            render(self, item);
        }
    }

    pub fn into_inner(self) -> String {
        self.out
    }
}

/// Render to a string.
pub fn render_to_string<F>(f: F) -> String
where
    F: FnOnce(&mut ImpWriter),
{
    let mut writer = ImpWriter::new();
    f(&mut writer);
    writer.into_inner()
}
