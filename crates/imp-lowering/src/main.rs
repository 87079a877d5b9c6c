// Copyright (c) Asymptotic Labs
// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;

use clap::*;
use colored::Colorize;
use log::{debug, LevelFilter};
use options::{LoweringConfig, Settings};
use simplelog::WriteLogger;

mod diagnostics;
mod lower;
mod options;

#[derive(Parser)]
#[clap(
    name = env!("CARGO_BIN_NAME"),
    about = "Lowers a program description made of basic-block method bodies into a structured imp program",
    rename_all = "kebab-case",
    author,
    version = env!("CARGO_PKG_VERSION"),
)]
pub struct Args {
    /// Program description (JSON)
    pub input: PathBuf,

    #[clap(flatten)]
    pub config: LoweringConfig,
}

fn main() {
    #[cfg(windows)]
    colored::control::set_virtual_terminal(true).unwrap();

    let args = Args::parse();
    let level = if args.config.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Warn
    };
    let _ = WriteLogger::init(level, simplelog::Config::default(), std::io::stderr());

    debug!("imp-lowering version: {}", env!("CARGO_PKG_VERSION"));

    let result = Settings::resolve(&args.config).and_then(|settings| lower::execute(&args.input, settings));

    match result {
        Ok(_) => (),
        Err(err) => {
            let err = format!("{:#}", err);
            eprintln!("{}", err.bold().red());
            std::process::exit(1);
        }
    }
}
