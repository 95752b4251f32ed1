//! Compose manifest types
//!
//! Only `services`, `include`, `extends`, `image`, `build` and
//! `container_name` are interpreted. Everything else is kept verbatim in the
//! flattened `other` maps.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Compose file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ComposeFile {
    /// Services
    #[serde(default)]
    pub services: BTreeMap<String, ServiceConfig>,
    /// Other manifests pulled into this one
    #[serde(default)]
    pub include: Vec<IncludeEntry>,
    /// Uninterpreted top-level keys
    #[serde(flatten)]
    pub other: BTreeMap<String, serde_yaml::Value>,
}

/// Service configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Image reference
    #[serde(default)]
    pub image: Option<String>,
    /// Build configuration
    #[serde(default)]
    pub build: Option<BuildConfig>,
    /// Container name
    #[serde(default)]
    pub container_name: Option<String>,
    /// Service this one extends
    #[serde(default)]
    pub extends: Option<ExtendsConfig>,
    /// Uninterpreted service keys
    #[serde(flatten)]
    pub other: BTreeMap<String, serde_yaml::Value>,
}

/// Build configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BuildConfig {
    /// Simple context path
    Simple(String),
    /// Full build configuration
    Full(BuildConfigFull),
}

/// Full build configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildConfigFull {
    /// Build context
    #[serde(default)]
    pub context: Option<String>,
    /// Dockerfile path, relative to the context
    #[serde(default)]
    pub dockerfile: Option<String>,
    /// Inline Dockerfile content
    #[serde(default)]
    pub dockerfile_inline: Option<String>,
    #[serde(flatten)]
    pub other: BTreeMap<String, serde_yaml::Value>,
}

/// Extends configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExtendsConfig {
    /// Service in the same file
    Service(String),
    /// Service (or whole file) elsewhere
    Full {
        #[serde(default)]
        file: Option<String>,
        #[serde(default)]
        service: Option<String>,
    },
}

impl ExtendsConfig {
    pub fn file(&self) -> Option<&str> {
        match self {
            ExtendsConfig::Service(_) => None,
            ExtendsConfig::Full { file, .. } => file.as_deref(),
        }
    }

    pub fn service(&self) -> Option<&str> {
        match self {
            ExtendsConfig::Service(name) => Some(name),
            ExtendsConfig::Full { service, .. } => service.as_deref(),
        }
    }
}

/// Include entry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IncludeEntry {
    /// Bare path
    Short(String),
    /// Object with a path (or list of paths)
    Long(IncludeLong),
}

impl IncludeEntry {
    /// Paths referenced by this entry, in declaration order
    pub fn paths(&self) -> Vec<&str> {
        match self {
            IncludeEntry::Short(path) => vec![path.as_str()],
            IncludeEntry::Long(long) => match &long.path {
                PathList::Single(path) => vec![path.as_str()],
                PathList::Multiple(paths) => paths.iter().map(String::as_str).collect(),
            },
        }
    }
}

/// Long include syntax
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncludeLong {
    pub path: PathList,
    #[serde(flatten)]
    pub other: BTreeMap<String, serde_yaml::Value>,
}

/// One path or several
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathList {
    Single(String),
    Multiple(Vec<String>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_keys_pass_through() {
        let yaml = r#"
name: demo
networks:
  default: {}
services:
  web:
    image: nginx
    ports:
      - "80:80"
"#;
        let file: ComposeFile = serde_yaml::from_str(yaml).unwrap();
        assert!(file.other.contains_key("name"));
        assert!(file.other.contains_key("networks"));
        let web = &file.services["web"];
        assert!(web.other.contains_key("ports"));
        assert_eq!(web.image.as_deref(), Some("nginx"));
    }

    #[test]
    fn test_include_forms() {
        let yaml = r#"
include:
  - base.yaml
  - path: ./more/compose.yaml
    env_file: .env
  - path:
      - a.yaml
      - b.yaml
"#;
        let file: ComposeFile = serde_yaml::from_str(yaml).unwrap();
        let paths: Vec<&str> = file.include.iter().flat_map(|i| i.paths()).collect();
        assert_eq!(
            paths,
            vec!["base.yaml", "./more/compose.yaml", "a.yaml", "b.yaml"]
        );
    }

    #[test]
    fn test_extends_forms() {
        let yaml = r#"
services:
  a:
    extends: b
  c:
    extends:
      file: other.yaml
      service: d
  e:
    extends:
      file: other.yaml
"#;
        let file: ComposeFile = serde_yaml::from_str(yaml).unwrap();
        let a = file.services["a"].extends.as_ref().unwrap();
        assert_eq!((a.file(), a.service()), (None, Some("b")));
        let c = file.services["c"].extends.as_ref().unwrap();
        assert_eq!((c.file(), c.service()), (Some("other.yaml"), Some("d")));
        let e = file.services["e"].extends.as_ref().unwrap();
        assert_eq!((e.file(), e.service()), (Some("other.yaml"), None));
    }

    #[test]
    fn test_build_forms() {
        let yaml = r#"
services:
  short:
    build: ./app
  long:
    build:
      context: ./api
      dockerfile: Dockerfile.dev
      args:
        A: "1"
"#;
        let file: ComposeFile = serde_yaml::from_str(yaml).unwrap();
        assert!(matches!(
            file.services["short"].build,
            Some(BuildConfig::Simple(ref ctx)) if ctx == "./app"
        ));
        match &file.services["long"].build {
            Some(BuildConfig::Full(full)) => {
                assert_eq!(full.context.as_deref(), Some("./api"));
                assert_eq!(full.dockerfile.as_deref(), Some("Dockerfile.dev"));
                assert!(full.other.contains_key("args"));
            }
            other => panic!("unexpected build config: {other:?}"),
        }
    }
}
