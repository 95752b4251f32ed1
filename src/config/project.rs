//! Persisted project configuration
//!
//! Records, per service, the enablement setting and profile list. Lives at
//! `<root>/.stackup/config.json`:
//!
//! ```json
//! {
//!   "version": 1,
//!   "updated_at": "2026-01-01T00:00:00Z",
//!   "services": {
//!     "ollama": { "enabled": "auto", "profiles": ["gpu"] }
//!   }
//! }
//! ```

use crate::diagnostics::{DiagnosticKind, Diagnostics, Outcome};
use crate::error::{Result, StackError};
use crate::registry::{EnabledSetting, ServiceDeclaration};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Current schema version
pub const CONFIG_VERSION: u32 = 1;

/// Persisted settings for one service
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSettings {
    #[serde(default)]
    pub enabled: EnabledSetting,
    #[serde(default)]
    pub profiles: Vec<String>,
}

/// Project configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectConfig {
    #[serde(default)]
    pub version: u32,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub services: BTreeMap<String, ServiceSettings>,
    #[serde(skip)]
    path: PathBuf,
}

impl ProjectConfig {
    /// Template built from the declarations' own defaults
    pub fn template<'a>(declarations: impl IntoIterator<Item = &'a ServiceDeclaration>) -> Self {
        let services = declarations
            .into_iter()
            .map(|decl| {
                (
                    decl.id.clone(),
                    ServiceSettings {
                        enabled: decl.enabled,
                        profiles: decl.profiles.clone(),
                    },
                )
            })
            .collect();
        Self {
            version: CONFIG_VERSION,
            updated_at: None,
            services,
            path: PathBuf::new(),
        }
    }

    /// Read the config at `path`, creating it from `template` on first run and
    /// backfilling it on schema drift. Either case rewrites the file.
    pub fn load_or_init(path: &Path, template: &ProjectConfig) -> Result<Outcome<Self>> {
        let mut diagnostics = Diagnostics::new();

        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let mut config: ProjectConfig =
                serde_json::from_str(&content).map_err(|e| StackError::parse(path, e))?;
            config.path = path.to_path_buf();
            if config.backfill(template) {
                diagnostics.info(
                    DiagnosticKind::Note,
                    format!("Backfilled project config {}", path.display()),
                );
                config.save()?;
            }
            config
        } else {
            let mut config = template.clone();
            config.path = path.to_path_buf();
            config.save()?;
            diagnostics.info(
                DiagnosticKind::Note,
                format!("Created project config {}", path.display()),
            );
            config
        };

        config.version = CONFIG_VERSION;
        Ok(Outcome::new(config, diagnostics))
    }

    /// Add services missing from this config and bump an old version stamp.
    /// Existing entries are never touched. Returns whether anything changed.
    pub fn backfill(&mut self, template: &ProjectConfig) -> bool {
        let mut changed = false;

        for (id, settings) in &template.services {
            if !self.services.contains_key(id) {
                tracing::debug!("Adding {} to project config", id);
                self.services.insert(id.clone(), settings.clone());
                changed = true;
            }
        }

        if self.version != CONFIG_VERSION {
            tracing::info!(
                "Upgrading project config from version {} to {}",
                self.version,
                CONFIG_VERSION
            );
            self.version = CONFIG_VERSION;
            changed = true;
        }

        changed
    }

    /// Write the config atomically: temp file then rename
    pub fn save(&mut self) -> Result<()> {
        if self.path.as_os_str().is_empty() {
            return Err(StackError::Validation(
                "project config has no backing file".to_string(),
            ));
        }
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        self.updated_at = Some(Utc::now());
        let content = serde_json::to_string_pretty(self)?;
        let temp = self.path.with_extension("json.tmp");
        std::fs::write(&temp, content)?;
        std::fs::rename(&temp, &self.path)?;

        tracing::debug!("Saved project config to {}", self.path.display());
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn service(&self, id: &str) -> Option<&ServiceSettings> {
        self.services.get(id)
    }

    pub fn enabled_setting(&self, id: &str) -> Option<EnabledSetting> {
        self.services.get(id).map(|s| s.enabled)
    }

    pub fn set_enabled(&mut self, id: &str, enabled: EnabledSetting) {
        self.services.entry(id.to_string()).or_default().enabled = enabled;
    }

    pub fn set_profiles(&mut self, id: &str, profiles: Vec<String>) {
        self.services.entry(id.to_string()).or_default().profiles = profiles;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn declarations() -> Vec<ServiceDeclaration> {
        vec![
            ServiceDeclaration {
                id: "db".to_string(),
                enabled: EnabledSetting::On,
                ..Default::default()
            },
            ServiceDeclaration {
                id: "ollama".to_string(),
                profiles: vec!["gpu".to_string()],
                ..Default::default()
            },
        ]
    }

    #[test]
    fn test_init_creates_file_from_template() {
        let temp = tempdir().unwrap();
        let path = temp.path().join(".stackup/config.json");
        let decls = declarations();
        let template = ProjectConfig::template(&decls);

        let outcome = ProjectConfig::load_or_init(&path, &template).unwrap();
        assert!(path.exists());
        assert!(outcome.diagnostics.contains_kind(DiagnosticKind::Note));

        let config = outcome.value;
        assert_eq!(config.version, CONFIG_VERSION);
        assert!(config.updated_at.is_some());
        assert_eq!(config.enabled_setting("db"), Some(EnabledSetting::On));
        assert_eq!(config.service("ollama").unwrap().profiles, vec!["gpu"]);
    }

    #[test]
    fn test_backfill_keeps_existing_entries() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("config.json");
        std::fs::write(
            &path,
            r#"{ "version": 0, "services": { "db": { "enabled": false } } }"#,
        )
        .unwrap();

        let decls = declarations();
        let template = ProjectConfig::template(&decls);
        let config = ProjectConfig::load_or_init(&path, &template).unwrap().value;

        assert_eq!(config.enabled_setting("db"), Some(EnabledSetting::Off));
        assert_eq!(config.enabled_setting("ollama"), Some(EnabledSetting::Auto));

        let written: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written["version"], CONFIG_VERSION);
        assert_eq!(written["services"]["ollama"]["enabled"], "auto");
        assert!(!temp.path().join("config.json.tmp").exists());
    }

    #[test]
    fn test_backfill_reports_no_change() {
        let decls = declarations();
        let template = ProjectConfig::template(&decls);
        let mut config = template.clone();
        assert!(!config.backfill(&template));
    }

    #[test]
    fn test_set_and_save() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("config.json");
        let template = ProjectConfig::template(std::iter::empty());
        let mut config = ProjectConfig::load_or_init(&path, &template).unwrap().value;

        config.set_enabled("web", EnabledSetting::Off);
        config.set_profiles("web", vec!["dev".to_string()]);
        config.save().unwrap();

        let reloaded = ProjectConfig::load_or_init(&path, &template).unwrap();
        assert!(reloaded.is_clean());
        assert_eq!(reloaded.value.enabled_setting("web"), Some(EnabledSetting::Off));
        assert_eq!(reloaded.value.service("web").unwrap().profiles, vec!["dev"]);
    }

    #[test]
    fn test_corrupt_config_is_a_parse_error() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("config.json");
        std::fs::write(&path, "{ nope").unwrap();
        let err = ProjectConfig::load_or_init(&path, &ProjectConfig::default()).unwrap_err();
        assert!(matches!(err, StackError::Parse { .. }));
    }
}
