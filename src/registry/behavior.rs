//! Per-service behavior
//!
//! Most services share [`DefaultBehavior`]. A service that needs something
//! different gets an entry in the [`BehaviorRegistry`] under its id; the
//! registry is filled before and during loading and looked up once per
//! service.

use super::declaration::ServiceDeclaration;
use crate::env::{expand, ResolvedEnv};
use crate::error::{Result, StackError};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Inputs for preparing a service on the host
pub struct PrepareContext<'a> {
    /// Project root; volume and seed targets are relative to it
    pub root: &'a Path,
    pub env: &'a ResolvedEnv,
}

/// Service behavior
pub trait ServiceBehavior: Send + Sync {
    /// Behavior name, for logs
    fn name(&self) -> &'static str;

    /// Get the host ready for the service's containers. Returns the paths
    /// that were created.
    fn prepare(
        &self,
        declaration: &ServiceDeclaration,
        ctx: &PrepareContext<'_>,
    ) -> Result<Vec<PathBuf>>;

    /// Whether the service is left out of its group's batch
    fn manual_start(&self, declaration: &ServiceDeclaration) -> bool {
        declaration.custom_start
    }
}

/// Creates required volumes and copies seed files that are not there yet
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultBehavior;

impl ServiceBehavior for DefaultBehavior {
    fn name(&self) -> &'static str {
        "default"
    }

    fn prepare(
        &self,
        declaration: &ServiceDeclaration,
        ctx: &PrepareContext<'_>,
    ) -> Result<Vec<PathBuf>> {
        let mut created = Vec::new();

        for volume in &declaration.volumes {
            let path = under(ctx.root, &expand(volume, ctx.env));
            if !path.exists() {
                std::fs::create_dir_all(&path)?;
                tracing::debug!("Created volume {} for {}", path.display(), declaration.id);
                created.push(path);
            }
        }

        for seed in &declaration.seed {
            let from = under(declaration.base_dir(), &expand(&seed.from, ctx.env));
            let to = under(ctx.root, &expand(&seed.to, ctx.env));
            if to.exists() {
                continue;
            }
            if !from.exists() {
                return Err(StackError::NotFound(format!(
                    "seed {} for service {}",
                    from.display(),
                    declaration.id
                )));
            }
            copy_tree(&from, &to)?;
            tracing::debug!("Seeded {} from {}", to.display(), from.display());
            created.push(to);
        }

        Ok(created)
    }
}

/// Prepared like the default, but started by hand
#[derive(Debug, Clone, Copy, Default)]
pub struct ManualStartBehavior;

impl ServiceBehavior for ManualStartBehavior {
    fn name(&self) -> &'static str {
        "manual-start"
    }

    fn prepare(
        &self,
        declaration: &ServiceDeclaration,
        ctx: &PrepareContext<'_>,
    ) -> Result<Vec<PathBuf>> {
        DefaultBehavior.prepare(declaration, ctx)
    }

    fn manual_start(&self, _declaration: &ServiceDeclaration) -> bool {
        true
    }
}

/// Service id to behavior
#[derive(Clone)]
pub struct BehaviorRegistry {
    overrides: HashMap<String, Arc<dyn ServiceBehavior>>,
    fallback: Arc<dyn ServiceBehavior>,
}

impl BehaviorRegistry {
    pub fn new() -> Self {
        Self {
            overrides: HashMap::new(),
            fallback: Arc::new(DefaultBehavior),
        }
    }

    /// Register a behavior for one service, replacing any previous one
    pub fn register(&mut self, id: impl Into<String>, behavior: Arc<dyn ServiceBehavior>) {
        self.overrides.insert(id.into(), behavior);
    }

    pub fn has_override(&self, id: &str) -> bool {
        self.overrides.contains_key(id)
    }

    /// Behavior for a service, the default when none was registered
    pub fn lookup(&self, id: &str) -> Arc<dyn ServiceBehavior> {
        self.overrides
            .get(id)
            .cloned()
            .unwrap_or_else(|| self.fallback.clone())
    }
}

impl Default for BehaviorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn under(base: &Path, raw: &str) -> PathBuf {
    let path = PathBuf::from(raw);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
    }
}

fn copy_tree(from: &Path, to: &Path) -> Result<()> {
    if from.is_file() {
        if let Some(parent) = to.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::copy(from, to)?;
        return Ok(());
    }

    for entry in walkdir::WalkDir::new(from) {
        let entry = entry.map_err(|e| StackError::Io(e.into()))?;
        let relative = entry
            .path()
            .strip_prefix(from)
            .map_err(|e| StackError::Validation(e.to_string()))?;
        let target = to.join(relative);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)?;
        } else {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::declaration::SeedSpec;
    use tempfile::tempdir;

    fn declaration(dir: &Path) -> ServiceDeclaration {
        ServiceDeclaration {
            id: "search".to_string(),
            name: "Search".to_string(),
            manifest: "compose.yaml".to_string(),
            volumes: vec!["data/${SEARCH_DIR:-search}".to_string()],
            seed: vec![
                SeedSpec {
                    from: "defaults/settings.yml".to_string(),
                    to: "data/search/settings.yml".to_string(),
                },
                SeedSpec {
                    from: "defaults/templates".to_string(),
                    to: "data/search/templates".to_string(),
                },
            ],
            source: dir.join("service.yaml"),
            ..Default::default()
        }
    }

    #[test]
    fn test_default_prepare_creates_volumes_and_seeds() {
        let temp = tempdir().unwrap();
        let service_dir = temp.path().join("services/search");
        std::fs::create_dir_all(service_dir.join("defaults/templates/nested")).unwrap();
        std::fs::write(service_dir.join("defaults/settings.yml"), "a: 1").unwrap();
        std::fs::write(service_dir.join("defaults/templates/nested/t.html"), "<p>").unwrap();

        let env = ResolvedEnv::default();
        let ctx = PrepareContext {
            root: temp.path(),
            env: &env,
        };
        let decl = declaration(&service_dir);

        let created = DefaultBehavior.prepare(&decl, &ctx).unwrap();
        assert_eq!(created.len(), 3);
        assert!(temp.path().join("data/search").is_dir());
        assert_eq!(
            std::fs::read_to_string(temp.path().join("data/search/settings.yml")).unwrap(),
            "a: 1"
        );
        assert!(temp
            .path()
            .join("data/search/templates/nested/t.html")
            .is_file());

        // Existing seeds are left alone
        std::fs::write(temp.path().join("data/search/settings.yml"), "edited").unwrap();
        let again = DefaultBehavior.prepare(&decl, &ctx).unwrap();
        assert!(again.is_empty());
        assert_eq!(
            std::fs::read_to_string(temp.path().join("data/search/settings.yml")).unwrap(),
            "edited"
        );
    }

    #[test]
    fn test_missing_seed_source_fails() {
        let temp = tempdir().unwrap();
        let env = ResolvedEnv::default();
        let ctx = PrepareContext {
            root: temp.path(),
            env: &env,
        };
        let decl = declaration(temp.path());
        let err = DefaultBehavior.prepare(&decl, &ctx).unwrap_err();
        assert!(matches!(err, StackError::NotFound(_)));
    }

    #[test]
    fn test_registry_lookup_falls_back_to_default() {
        let mut registry = BehaviorRegistry::new();
        registry.register("supabase", Arc::new(ManualStartBehavior));

        assert_eq!(registry.lookup("supabase").name(), "manual-start");
        assert_eq!(registry.lookup("anything-else").name(), "default");
        assert!(registry.has_override("supabase"));

        let decl = ServiceDeclaration::default();
        assert!(registry.lookup("supabase").manual_start(&decl));
        assert!(!registry.lookup("other").manual_start(&decl));
    }
}
