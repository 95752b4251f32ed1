//! Compose file parser

use super::config::ComposeFile;
use crate::error::{Result, StackError};
use std::path::{Path, PathBuf};

/// Default compose file names
pub const DEFAULT_COMPOSE_FILES: &[&str] = &[
    "compose.yaml",
    "compose.yml",
    "docker-compose.yaml",
    "docker-compose.yml",
];

/// Compose file parser
pub struct ComposeParser;

impl ComposeParser {
    /// Find compose file in directory
    pub fn find_compose_file(dir: &Path) -> Option<PathBuf> {
        DEFAULT_COMPOSE_FILES
            .iter()
            .map(|name| dir.join(name))
            .find(|path| path.is_file())
    }

    /// Parse compose content; `origin` is only used in error messages
    pub fn parse_str(content: &str, origin: &Path) -> Result<ComposeFile> {
        if content.trim().is_empty() {
            return Ok(ComposeFile::default());
        }
        serde_yaml::from_str(content).map_err(|e| StackError::parse(origin, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_parse_simple_compose() {
        let yaml = r#"
services:
  web:
    image: nginx:latest
  db:
    image: postgres:13
    environment:
      POSTGRES_PASSWORD: secret
"#;

        let file = ComposeParser::parse_str(yaml, Path::new("compose.yaml")).unwrap();
        assert_eq!(file.services.len(), 2);
        assert!(file.services.contains_key("web"));
        assert!(file.services.contains_key("db"));
    }

    #[test]
    fn test_parse_error_names_file() {
        let err = ComposeParser::parse_str("services: [", Path::new("/x/compose.yaml"))
            .unwrap_err();
        assert!(matches!(err, StackError::Parse { ref path, .. } if path == Path::new("/x/compose.yaml")));
    }

    #[test]
    fn test_empty_file_is_empty_manifest() {
        let file = ComposeParser::parse_str("\n", Path::new("compose.yaml")).unwrap();
        assert!(file.services.is_empty());
        assert!(file.include.is_empty());
    }

    #[test]
    fn test_find_compose_file_prefers_canonical_name() {
        let temp = tempdir().unwrap();
        std::fs::write(temp.path().join("docker-compose.yml"), "services: {}").unwrap();
        std::fs::write(temp.path().join("compose.yaml"), "services: {}").unwrap();

        let found = ComposeParser::find_compose_file(temp.path()).unwrap();
        assert_eq!(found, temp.path().join("compose.yaml"));
    }
}
