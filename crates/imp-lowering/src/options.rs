// Copyright (c) Asymptotic Labs
// SPDX-License-Identifier: Apache-2.0

use anyhow::Context;
use blocks_to_imp::ModelKind;
use block_graph::MethodId;
use clap::{Args, ValueEnum};
use serde::Deserialize;
use std::fmt::{Display, Formatter};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(ValueEnum, Default, Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelArg {
    /// Objects are tuples of reference cells, updated in place
    #[default]
    Mutable,
    /// Objects are plain tuples, rebuilt on every field write
    Functional,
}

impl Display for ModelArg {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelArg::Mutable => write!(f, "mutable"),
            ModelArg::Functional => write!(f, "functional"),
        }
    }
}

impl From<ModelArg> for ModelKind {
    fn from(model: ModelArg) -> Self {
        match model {
            ModelArg::Mutable => ModelKind::Mutable,
            ModelArg::Functional => ModelKind::Functional,
        }
    }
}

/// Lowering options
#[derive(Args, Default, Debug)]
#[clap(next_help_heading = "Lowering Options")]
pub struct LoweringConfig {
    /// Write the program here instead of standard output
    #[clap(name = "output", long, short = 'o')]
    pub output: Option<PathBuf>,

    /// Write the flag and tag tables here
    #[clap(name = "flags", long, short = 'f')]
    pub flags: Option<PathBuf>,

    /// Object representation
    #[clap(name = "model", long, short = 'm')]
    pub model: Option<ModelArg>,

    /// Entry method, overriding the one named by the input (e.g. `Main.main`)
    #[clap(name = "entry", long)]
    pub entry: Option<String>,

    /// TOML file providing defaults for the options above
    #[clap(name = "config", long, short = 'c')]
    pub config: Option<PathBuf>,

    /// Display per-method translation progress
    #[clap(name = "verbose", long, short = 'v')]
    pub verbose: bool,
}

/// Contents of the `--config` file.
#[derive(Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub model: Option<ModelArg>,
    pub output: Option<PathBuf>,
    pub flags: Option<PathBuf>,
    pub entry: Option<String>,
}

impl FileConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        toml::from_str(&text)
            .with_context(|| format!("failed to parse config file {}", path.display()))
    }
}

/// Options after merging the command line over the config file.
#[derive(Debug, PartialEq, Eq)]
pub struct Settings {
    pub model: ModelKind,
    pub output: Option<PathBuf>,
    pub flags: Option<PathBuf>,
    pub entry: Option<MethodId>,
}

impl Settings {
    pub fn resolve(config: &LoweringConfig) -> anyhow::Result<Self> {
        let file = match &config.config {
            Some(path) => FileConfig::load(path)?,
            None => FileConfig::default(),
        };
        Ok(Self::merge(config, file))
    }

    fn merge(config: &LoweringConfig, file: FileConfig) -> Self {
        Self {
            model: config.model.or(file.model).unwrap_or_default().into(),
            output: config.output.clone().or(file.output),
            flags: config.flags.clone().or(file.flags),
            entry: config.entry.clone().or(file.entry).map(MethodId),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_line_overrides_config_file() {
        let file: FileConfig = toml::from_str(
            r#"
            model = "functional"
            output = "out.imp"
            entry = "Main.run"
            "#,
        )
        .unwrap();
        let config = LoweringConfig {
            model: Some(ModelArg::Mutable),
            ..Default::default()
        };
        let settings = Settings::merge(&config, file);
        assert_eq!(settings.model, ModelKind::Mutable);
        assert_eq!(settings.output, Some(PathBuf::from("out.imp")));
        assert_eq!(settings.entry, Some(MethodId("Main.run".to_string())));
        assert_eq!(settings.flags, None);
    }

    #[test]
    fn test_defaults_without_config() {
        let settings = Settings::merge(&LoweringConfig::default(), FileConfig::default());
        assert_eq!(settings.model, ModelKind::Mutable);
        assert_eq!(settings.entry, None);
    }

    #[test]
    fn test_unknown_config_keys_are_rejected() {
        assert!(toml::from_str::<FileConfig>("backend = \"lean\"").is_err());
    }
}
