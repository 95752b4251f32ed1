//! Environment maps
//!
//! [`EnvironmentMap`] is the mutable map assembled at startup from the
//! project dotenv file and the process environment. Once resolved it is
//! published as a [`ResolvedEnv`], which is read-only and cheap to clone.

use super::expand::Expander;
use crate::diagnostics::{Diagnostics, Outcome, Severity};
use crate::error::{Result, StackError};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

/// Read access to a set of variables
pub trait VarLookup {
    /// Raw value, which may be empty
    fn lookup(&self, name: &str) -> Option<&str>;

    /// Set and non-empty
    fn is_set(&self, name: &str) -> bool {
        self.lookup(name).is_some_and(|v| !v.is_empty())
    }
}

impl VarLookup for HashMap<String, String> {
    fn lookup(&self, name: &str) -> Option<&str> {
        self.get(name).map(String::as_str)
    }
}

impl VarLookup for BTreeMap<String, String> {
    fn lookup(&self, name: &str) -> Option<&str> {
        self.get(name).map(String::as_str)
    }
}

/// Mutable variable map used while the environment is being built
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvironmentMap {
    vars: BTreeMap<String, String>,
}

impl EnvironmentMap {
    /// Create an empty map
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a map from key/value pairs
    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Snapshot of the process environment
    pub fn from_process() -> Self {
        Self::from_pairs(std::env::vars())
    }

    /// Dotenv file (if present) overlaid by the process environment
    pub fn load(dotenv: Option<&Path>) -> Result<Self> {
        let mut map = match dotenv {
            Some(path) if path.exists() => Self::from_dotenv(path)?,
            Some(path) => {
                tracing::debug!("No dotenv file at {}", path.display());
                Self::new()
            }
            None => Self::new(),
        };
        map.extend(Self::from_process());
        Ok(map)
    }

    /// Parse a dotenv file
    pub fn from_dotenv(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse_dotenv(&content).map_err(|message| StackError::parse(path, message))
    }

    /// Parse dotenv content: `KEY=VALUE` lines, `#` comments, optional
    /// `export ` prefix, optionally quoted values
    pub fn parse_dotenv(content: &str) -> std::result::Result<Self, String> {
        let mut map = Self::new();

        for (idx, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let line = line.strip_prefix("export ").unwrap_or(line);

            let (key, value) = line
                .split_once('=')
                .ok_or_else(|| format!("line {}: expected KEY=VALUE", idx + 1))?;
            let key = key.trim();
            if key.is_empty() {
                return Err(format!("line {}: empty variable name", idx + 1));
            }

            map.set(key, unquote(value.trim()));
        }

        Ok(map)
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(name.into(), value.into());
    }

    /// Overlay `other`; its values win
    pub fn extend(&mut self, other: EnvironmentMap) {
        self.vars.extend(other.vars);
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Expand every value against the map itself and publish the result.
    ///
    /// `:=` assignments land in the map. In strict mode a missing required
    /// variable fails the whole resolution; otherwise it is reported and the
    /// placeholder degrades to empty.
    pub fn resolve(mut self, strict: bool) -> Result<Outcome<ResolvedEnv>> {
        let mut diagnostics = Diagnostics::new();
        let checking = Expander::new().strict(true).mutating(true);
        let lenient = Expander::new().mutating(true);

        let keys: Vec<String> = self.vars.keys().cloned().collect();
        for key in keys {
            let raw = match self.vars.get(&key) {
                Some(raw) if raw.contains('$') => raw.clone(),
                _ => continue,
            };

            let value = match checking.expand_into(&raw, &mut self) {
                Ok(value) => value,
                Err(err) if strict => return Err(err),
                Err(err) => {
                    diagnostics.absorb(
                        Severity::Warning,
                        format!("{} expanded with an empty required placeholder", key),
                        &err,
                    );
                    lenient.expand_into(&raw, &mut self)?
                }
            };
            self.vars.insert(key, value);
        }

        Ok(Outcome::new(self.finalize(), diagnostics))
    }

    /// Publish the map as-is
    pub fn finalize(self) -> ResolvedEnv {
        ResolvedEnv {
            vars: Arc::new(self.vars),
        }
    }
}

impl VarLookup for EnvironmentMap {
    fn lookup(&self, name: &str) -> Option<&str> {
        self.get(name)
    }
}

fn unquote(value: &str) -> String {
    let bytes = value.as_bytes();
    if bytes.len() >= 2 {
        let (first, last) = (bytes[0], bytes[bytes.len() - 1]);
        if (first == b'"' || first == b'\'') && first == last {
            return value[1..value.len() - 1].to_string();
        }
    }
    // Trailing comments only on unquoted values
    match value.find(" #") {
        Some(pos) => value[..pos].trim_end().to_string(),
        None => value.to_string(),
    }
}

/// Read-only, finalized environment shared by every downstream action
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedEnv {
    vars: Arc<BTreeMap<String, String>>,
}

impl ResolvedEnv {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl VarLookup for ResolvedEnv {
    fn lookup(&self, name: &str) -> Option<&str> {
        self.get(name)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ResolvedEnv {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        EnvironmentMap::from_pairs(iter).finalize()
    }
}
