//! Build-argument accumulation for repeated `-b key=value` flags.

use crate::error::{Error, Result};
use std::collections::BTreeMap;

/// Effective build-argument overrides handed to the compiler.
pub type BuildArgOverrides = BTreeMap<String, String>;

/// Collects `key=value` pairs in command-line order. Later values win.
#[derive(Debug, Clone, Default)]
pub struct BuildArgs {
    values: BuildArgOverrides,
}

impl BuildArgs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one raw `key=value` string, replacing any earlier value for `key`.
    pub fn set(&mut self, raw: &str) -> Result<()> {
        let (key, value) = parse_build_arg(raw)?;
        self.insert(key, value);
        Ok(())
    }

    pub fn insert(&mut self, key: String, value: String) {
        if let Some(prev) = self.values.insert(key.clone(), value) {
            tracing::debug!(key = %key, previous = %prev, "build argument overridden");
        }
    }

    pub fn to_overrides(&self) -> BuildArgOverrides {
        self.values.clone()
    }
}

impl FromIterator<(String, String)> for BuildArgs {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        let mut args = BuildArgs::new();
        for (k, v) in iter {
            args.insert(k, v);
        }
        args
    }
}

/// Split `key=value` on the first `=`. The value may be empty or contain `=`.
pub fn parse_build_arg(raw: &str) -> Result<(String, String)> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(Error::MalformedArgument(raw.to_string())),
    }
}
