//! Process-wide settings
//!
//! Built once in `main` from CLI flags and the environment, then passed by
//! reference to everything that needs it.

use crate::env::VarLookup;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Project root override
pub const HOME_VAR: &str = "STACKUP_HOME";
/// Comma-separated active profiles
pub const PROFILES_VAR: &str = "STACKUP_PROFILES";
/// Truthy to fail on missing required variables
pub const STRICT_ENV_VAR: &str = "STACKUP_STRICT_ENV";
/// `warn` or `fail`
pub const CONFLICT_POLICY_VAR: &str = "STACKUP_CONFLICT_POLICY";

/// What to do when a dependency forces a disabled service on
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConflictPolicy {
    /// Record a warning and start the service anyway
    #[default]
    Warn,
    /// Record a failure-level diagnostic
    Fail,
}

impl FromStr for ConflictPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "warn" | "warning" => Ok(ConflictPolicy::Warn),
            "fail" | "error" => Ok(ConflictPolicy::Fail),
            other => Err(format!(
                "Invalid conflict policy '{}'. Valid values: warn, fail",
                other
            )),
        }
    }
}

impl fmt::Display for ConflictPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictPolicy::Warn => write!(f, "warn"),
            ConflictPolicy::Fail => write!(f, "fail"),
        }
    }
}

/// Settings
#[derive(Debug, Clone)]
pub struct Settings {
    /// Project root
    pub root: PathBuf,
    /// Directory holding the service declarations
    pub services_dir: PathBuf,
    /// Persisted project configuration
    pub config_path: PathBuf,
    /// Dotenv file merged under the process environment
    pub dotenv: Option<PathBuf>,
    /// Fail on missing required variables
    pub strict_env: bool,
    pub conflict_policy: ConflictPolicy,
    /// Active profiles
    pub profiles: Vec<String>,
}

impl Settings {
    /// Defaults for a project rooted at `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            services_dir: root.join("services"),
            config_path: root.join(".stackup").join("config.json"),
            dotenv: Some(root.join(".env")),
            root,
            strict_env: false,
            conflict_policy: ConflictPolicy::default(),
            profiles: Vec::new(),
        }
    }

    /// Settings from the environment. An explicit `root` beats `STACKUP_HOME`,
    /// which beats the current directory.
    pub fn from_env<V: VarLookup + ?Sized>(root: Option<PathBuf>, vars: &V) -> Self {
        let root = root
            .or_else(|| vars.lookup(HOME_VAR).filter(|v| !v.is_empty()).map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from("."));

        let mut settings = Self::new(root);
        if let Some(profiles) = vars.lookup(PROFILES_VAR) {
            settings.profiles = split_list(profiles);
        }
        settings.strict_env = vars.lookup(STRICT_ENV_VAR).is_some_and(is_truthy);
        if let Some(raw) = vars.lookup(CONFLICT_POLICY_VAR).filter(|v| !v.is_empty()) {
            match raw.parse() {
                Ok(policy) => settings.conflict_policy = policy,
                Err(e) => tracing::warn!("Ignoring {}: {}", CONFLICT_POLICY_VAR, e),
            }
        }
        settings
    }

    /// Add profiles, skipping ones already active
    pub fn with_profiles(mut self, profiles: impl IntoIterator<Item = String>) -> Self {
        for profile in profiles {
            if !self.profiles.contains(&profile) {
                self.profiles.push(profile);
            }
        }
        self
    }

    pub fn with_strict_env(mut self, strict: bool) -> Self {
        self.strict_env = self.strict_env || strict;
        self
    }

    pub fn with_conflict_policy(mut self, policy: ConflictPolicy) -> Self {
        self.conflict_policy = policy;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// `1/true/yes/on`, case-insensitive
pub fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_layout_under_root() {
        let settings = Settings::new("/srv/stack");
        assert_eq!(settings.services_dir, PathBuf::from("/srv/stack/services"));
        assert_eq!(
            settings.config_path,
            PathBuf::from("/srv/stack/.stackup/config.json")
        );
        assert_eq!(settings.dotenv, Some(PathBuf::from("/srv/stack/.env")));
        assert_eq!(settings.conflict_policy, ConflictPolicy::Warn);
    }

    #[test]
    fn test_from_env() {
        let env = vars(&[
            (HOME_VAR, "/opt/stack"),
            (PROFILES_VAR, "gpu, , dev"),
            (STRICT_ENV_VAR, "yes"),
            (CONFLICT_POLICY_VAR, "fail"),
        ]);
        let settings = Settings::from_env(None, &env);
        assert_eq!(settings.root, PathBuf::from("/opt/stack"));
        assert_eq!(settings.profiles, vec!["gpu", "dev"]);
        assert!(settings.strict_env);
        assert_eq!(settings.conflict_policy, ConflictPolicy::Fail);

        let flagged = Settings::from_env(Some(PathBuf::from("/here")), &env);
        assert_eq!(flagged.root, PathBuf::from("/here"));
    }

    #[test]
    fn test_bad_policy_is_ignored() {
        let env = vars(&[(CONFLICT_POLICY_VAR, "explode")]);
        let settings = Settings::from_env(None, &env);
        assert_eq!(settings.conflict_policy, ConflictPolicy::Warn);
        assert_eq!(settings.root, PathBuf::from("."));
    }

    #[test]
    fn test_with_profiles_dedups() {
        let settings = Settings::new("/x")
            .with_profiles(vec!["gpu".to_string()])
            .with_profiles(vec!["gpu".to_string(), "dev".to_string()]);
        assert_eq!(settings.profiles, vec!["gpu", "dev"]);
    }
}
