//! Minimal `.env` reader for compose env files.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
/// Parsed `KEY=value` pairs from a compose env file.
pub struct EnvFile {
    values: BTreeMap<String, String>,
}

impl EnvFile {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Returns the trimmed value for `key`, or an empty string when absent.
    pub fn trimmed(&self, key: &str) -> &str {
        self.get(key).map(str::trim).unwrap_or("")
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Parses env source text. Blank lines, comments, and lines without a key are
/// ignored; a value wrapped in matching single or double quotes is unwrapped.
pub fn parse_env_source(source: &str) -> EnvFile {
    let mut values = BTreeMap::new();
    for raw_line in source.lines() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        values.insert(key.to_string(), unquote(value.trim()).to_string());
    }
    EnvFile { values }
}

pub fn load_env_file(path: &Path) -> Result<EnvFile> {
    let source = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read env file {}", path.display()))?;
    Ok(parse_env_source(&source))
}

fn unquote(value: &str) -> &str {
    if value.len() >= 2 {
        let quoted = (value.starts_with('"') && value.ends_with('"'))
            || (value.starts_with('\'') && value.ends_with('\''));
        if quoted {
            return &value[1..value.len() - 1];
        }
    }
    value
}
