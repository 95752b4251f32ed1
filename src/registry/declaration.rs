//! Static service declarations
//!
//! One `service.yaml` per service, e.g.
//!
//! ```yaml
//! id: lightrag
//! name: LightRAG
//! compose: compose.yaml
//! group: applications
//! provides: [rag]
//! depends: [llm, vectordb]
//! volumes: [data/lightrag]
//! seed:
//!   - from: defaults/config.ini
//!     to: data/lightrag/config.ini
//! profiles: [gpu]
//! enabled: auto
//! ```

use crate::env::{expand, VarLookup};
use crate::error::{Result, StackError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Startup group. Groups start strictly in this order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Group {
    /// Databases, caches, object stores
    #[serde(alias = "data-layer")]
    Data,
    /// Gateways, proxies, model servers
    Middleware,
    /// User-facing applications
    #[default]
    #[serde(alias = "apps")]
    Applications,
}

impl Group {
    pub const ALL: [Group; 3] = [Group::Data, Group::Middleware, Group::Applications];
}

impl fmt::Display for Group {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Group::Data => write!(f, "data"),
            Group::Middleware => write!(f, "middleware"),
            Group::Applications => write!(f, "applications"),
        }
    }
}

/// Enablement setting: on, off, or inferred from dependents
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "SettingRepr", into = "SettingRepr")]
pub enum EnabledSetting {
    On,
    Off,
    #[default]
    Auto,
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum SettingRepr {
    Flag(bool),
    Word(String),
}

impl TryFrom<SettingRepr> for EnabledSetting {
    type Error = String;

    fn try_from(repr: SettingRepr) -> std::result::Result<Self, Self::Error> {
        match repr {
            SettingRepr::Flag(true) => Ok(EnabledSetting::On),
            SettingRepr::Flag(false) => Ok(EnabledSetting::Off),
            SettingRepr::Word(word) => word.parse(),
        }
    }
}

impl From<EnabledSetting> for SettingRepr {
    fn from(setting: EnabledSetting) -> Self {
        match setting {
            EnabledSetting::On => SettingRepr::Flag(true),
            EnabledSetting::Off => SettingRepr::Flag(false),
            EnabledSetting::Auto => SettingRepr::Word("auto".to_string()),
        }
    }
}

impl FromStr for EnabledSetting {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "auto" => Ok(EnabledSetting::Auto),
            "true" | "on" | "yes" | "1" => Ok(EnabledSetting::On),
            "false" | "off" | "no" | "0" => Ok(EnabledSetting::Off),
            other => Err(format!(
                "Invalid enablement '{}'. Valid values: true, false, auto",
                other
            )),
        }
    }
}

impl fmt::Display for EnabledSetting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnabledSetting::On => write!(f, "true"),
            EnabledSetting::Off => write!(f, "false"),
            EnabledSetting::Auto => write!(f, "auto"),
        }
    }
}

/// File or directory copied into a volume before first start
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedSpec {
    /// Relative to the declaration's directory
    pub from: String,
    /// Relative to the project root
    pub to: String,
}

/// Static service declaration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceDeclaration {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Compose manifest, relative to the declaration's directory
    #[serde(default, rename = "compose")]
    pub manifest: String,
    #[serde(default)]
    pub group: Group,
    /// Capabilities offered to other services
    #[serde(default)]
    pub provides: Vec<String>,
    /// Capabilities (or service ids) this service needs
    #[serde(default)]
    pub depends: Vec<String>,
    /// Host paths that must exist, relative to the project root
    #[serde(default)]
    pub volumes: Vec<String>,
    #[serde(default)]
    pub seed: Vec<SeedSpec>,
    #[serde(default)]
    pub profiles: Vec<String>,
    /// Default enablement
    #[serde(default)]
    pub enabled: EnabledSetting,
    /// Declared but switched off; never loaded
    #[serde(default)]
    pub disabled: bool,
    /// Started by hand instead of with its group
    #[serde(default)]
    pub custom_start: bool,
    /// Declaration file
    #[serde(skip)]
    pub source: PathBuf,
}

impl ServiceDeclaration {
    /// Parse a declaration file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut declaration: ServiceDeclaration =
            serde_yaml::from_str(&content).map_err(|e| StackError::parse(path, e))?;
        declaration.source = path.to_path_buf();
        Ok(declaration)
    }

    /// Check required fields
    pub fn validate(&self) -> Result<()> {
        let origin = self.source.display();
        if self.id.trim().is_empty() {
            return Err(StackError::Validation(format!("{}: missing id", origin)));
        }
        if !self
            .id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(StackError::Validation(format!(
                "{}: invalid id '{}'",
                origin, self.id
            )));
        }
        if self.name.trim().is_empty() {
            return Err(StackError::Validation(format!(
                "{}: service '{}' is missing a name",
                origin, self.id
            )));
        }
        if self.manifest.trim().is_empty() {
            return Err(StackError::Validation(format!(
                "{}: service '{}' is missing a compose manifest",
                origin, self.id
            )));
        }
        Ok(())
    }

    /// Directory holding the declaration
    pub fn base_dir(&self) -> &Path {
        self.source.parent().unwrap_or(Path::new("."))
    }

    /// Compose manifest path with placeholders expanded
    pub fn manifest_path<V: VarLookup + ?Sized>(&self, env: &V) -> PathBuf {
        let expanded = PathBuf::from(expand(&self.manifest, env));
        if expanded.is_absolute() {
            expanded
        } else {
            self.base_dir().join(expanded)
        }
    }

    /// Everything this service provides, its own id first
    pub fn capabilities(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.id.as_str()).chain(self.provides.iter().map(String::as_str))
    }

    pub fn provides_capability(&self, capability: &str) -> bool {
        self.capabilities().any(|c| c == capability)
    }
}
