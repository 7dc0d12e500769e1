use std::fs;
use std::path::Path;

use anyhow::{Context, Result, ensure};
use serde::Deserialize;

/// Ceiling on recorded snapshots before a run is aborted as a probable infinite loop.
pub const DEFAULT_MAX_STEPS: usize = 50_000;

/// Ceiling on nested function invocations.
pub const DEFAULT_MAX_CALL_DEPTH: usize = 10_000;

/// Tunables for one interpreter run.
///
/// Every field has a default, so a config file only needs the keys it overrides:
///
/// ```yaml
/// max_steps: 2000
/// ```
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct InterpreterOptions {
    pub max_steps: usize,
    pub max_call_depth: usize,
}

impl Default for InterpreterOptions {
    fn default() -> Self {
        Self {
            max_steps: DEFAULT_MAX_STEPS,
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
        }
    }
}

impl InterpreterOptions {
    pub fn from_yaml(raw: &str) -> Result<Self> {
        let options: Self = serde_yaml::from_str(raw).context("Parsing interpreter options")?;
        options.validate()?;
        Ok(options)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
        Self::from_yaml(&raw).with_context(|| format!("Loading {}", path.display()))
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(self.max_steps > 0, "max_steps must be greater than zero");
        ensure!(
            self.max_call_depth > 0,
            "max_call_depth must be greater than zero"
        );
        Ok(())
    }
}
