//! Enablement resolution
//!
//! Whether a service is on is decided once per run, in order: the cached
//! state, an environment override (`STACKUP_<ID>_ENABLED`), the project
//! config (falling back to the declaration), and for `auto` whether any
//! enabled service depends on something it provides.

use crate::config::{ConflictPolicy, ProjectConfig};
use crate::diagnostics::{Diagnostic, DiagnosticKind, Diagnostics, Severity};
use crate::env::VarLookup;
use crate::error::{Result, StackError};
use crate::registry::{EnabledSetting, ServiceRegistry};
use std::collections::{BTreeSet, HashSet};

/// Environment override key for a service id
pub fn override_key(id: &str) -> String {
    let normalized: String = id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("STACKUP_{}_ENABLED", normalized)
}

fn parse_override(raw: &str) -> Option<bool> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Services that must run for a set of roots
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyClosure {
    /// Roots plus every provider they transitively need
    pub members: BTreeSet<String>,
    /// Providers switched on against their own setting
    pub forced: Vec<String>,
}

/// Enablement resolver
pub struct EnablementResolver<'a> {
    registry: &'a mut ServiceRegistry,
    config: &'a ProjectConfig,
    overrides: &'a dyn VarLookup,
    policy: ConflictPolicy,
    in_progress: HashSet<String>,
    /// Times an inference reached a service already being inferred
    cycle_cuts: usize,
    diagnostics: Diagnostics,
}

impl<'a> EnablementResolver<'a> {
    pub fn new(
        registry: &'a mut ServiceRegistry,
        config: &'a ProjectConfig,
        overrides: &'a dyn VarLookup,
    ) -> Self {
        Self {
            registry,
            config,
            overrides,
            policy: ConflictPolicy::default(),
            in_progress: HashSet::new(),
            cycle_cuts: 0,
            diagnostics: Diagnostics::new(),
        }
    }

    pub fn with_policy(mut self, policy: ConflictPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn registry(&self) -> &ServiceRegistry {
        &*self.registry
    }

    /// Resolve and cache whether `id` is enabled.
    ///
    /// An `auto` service reached again through its own inference counts as
    /// off for that step. A `false` that leaned on such a step while an outer
    /// inference is still open is provisional and is not cached.
    pub fn is_enabled(&mut self, id: &str) -> Result<bool> {
        let service = self.registry.require(id)?;
        if let Some(enabled) = service.state.enabled().as_bool() {
            return Ok(enabled);
        }
        let declared = service.declaration.enabled;
        if self.in_progress.contains(id) {
            self.cycle_cuts += 1;
            return Ok(false);
        }
        let cuts_before = self.cycle_cuts;

        let enabled = match self.env_override(id) {
            Some(enabled) => {
                tracing::debug!("{} enabled={} from environment", id, enabled);
                enabled
            }
            None => {
                let setting = self
                    .config
                    .enabled_setting(id)
                    .unwrap_or(declared);
                match setting {
                    EnabledSetting::On => true,
                    EnabledSetting::Off => false,
                    EnabledSetting::Auto => self.infer(id)?,
                }
            }
        };

        let provisional =
            !enabled && self.cycle_cuts > cuts_before && !self.in_progress.is_empty();
        if provisional {
            tracing::debug!("{} provisionally off while inferring through a cycle", id);
        } else {
            self.set_enabled(id, enabled)?;
        }
        Ok(enabled)
    }

    /// Set enablement explicitly, replacing any resolved value
    pub fn set_enabled(&mut self, id: &str, enabled: bool) -> Result<()> {
        let service = self
            .registry
            .get_mut(id)
            .ok_or_else(|| StackError::NotFound(format!("service {}", id)))?;
        service.state.set_enabled(enabled);
        Ok(())
    }

    fn env_override(&mut self, id: &str) -> Option<bool> {
        let key = override_key(id);
        let raw = self.overrides.lookup(&key).filter(|v| !v.is_empty())?;
        match parse_override(raw) {
            Some(enabled) => Some(enabled),
            None => {
                self.diagnostics.warn(
                    DiagnosticKind::ValidationFailure,
                    format!("Ignoring {}={}: expected true or false", key, raw),
                );
                None
            }
        }
    }

    fn infer(&mut self, id: &str) -> Result<bool> {
        self.in_progress.insert(id.to_string());
        let mut enabled = false;
        for dependent in self.registry.dependents_of(id) {
            if self.is_enabled(&dependent)? {
                tracing::debug!("{} inferred on: needed by {}", id, dependent);
                enabled = true;
                break;
            }
        }
        self.in_progress.remove(id);
        Ok(enabled)
    }

    /// Walk the dependencies of `roots` and make sure every needed capability
    /// has an enabled provider, forcing one on when none is.
    ///
    /// A provider whose id equals the capability is preferred, then the
    /// first in id order. Capabilities nobody provides are assumed to be
    /// satisfied outside the stack.
    pub fn enforce_dependencies(&mut self, roots: &[String]) -> Result<DependencyClosure> {
        let mut closure = DependencyClosure::default();
        let mut stack: Vec<String> = roots.iter().rev().cloned().collect();

        while let Some(id) = stack.pop() {
            if !closure.members.insert(id.clone()) {
                continue;
            }
            let depends = self.registry.require(&id)?.declaration.depends.clone();

            for capability in depends {
                let providers = self.registry.providers_of(&capability);
                if providers.is_empty() {
                    self.diagnostics.warn(
                        DiagnosticKind::NotFound,
                        format!(
                            "{} depends on {}, which no service provides; assuming it is satisfied externally",
                            id, capability
                        ),
                    );
                    continue;
                }

                let mut chosen = None;
                for provider in &providers {
                    if closure.members.contains(provider) || self.is_enabled(provider)? {
                        chosen = Some(provider.clone());
                        break;
                    }
                }

                let provider = match chosen {
                    Some(provider) => provider,
                    None => {
                        let provider = providers[0].clone();
                        self.force(&provider, &id, &capability)?;
                        closure.forced.push(provider.clone());
                        provider
                    }
                };
                if !closure.members.contains(&provider) {
                    stack.push(provider);
                }
            }
        }

        Ok(closure)
    }

    fn force(&mut self, provider: &str, dependent: &str, capability: &str) -> Result<()> {
        self.set_enabled(provider, true)?;
        let severity = match self.policy {
            ConflictPolicy::Warn => Severity::Warning,
            ConflictPolicy::Fail => Severity::Error,
        };
        self.diagnostics.push(Diagnostic::new(
            severity,
            DiagnosticKind::DependencyConflict,
            format!(
                "{} is disabled but {} needs {}; enabling it",
                provider, dependent, capability
            ),
        ));
        Ok(())
    }

    /// Diagnostics gathered so far
    pub fn finish(self) -> Diagnostics {
        self.diagnostics
    }
}
