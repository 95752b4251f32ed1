//! Batch planning
//!
//! Turns the registry into an ordered list of batches, one per group. Every
//! service in a batch can start concurrently; batches run strictly in group
//! order.

use super::enablement::EnablementResolver;
use crate::compose::{ServiceImageEntry, TopologyResolver};
use crate::config::{ConflictPolicy, ProjectConfig, Settings};
use crate::diagnostics::{DiagnosticKind, Diagnostics, Outcome, Severity};
use crate::env::{ResolvedEnv, VarLookup};
use crate::error::{Result, StackError};
use crate::registry::{Group, ServiceRegistry};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;

/// What to plan for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// Every enabled service
    All,
    /// One service and whatever it needs
    Service(String),
}

impl From<Option<String>> for Target {
    fn from(service: Option<String>) -> Self {
        service.map_or(Target::All, Target::Service)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::All => write!(f, "all services"),
            Target::Service(id) => write!(f, "{}", id),
        }
    }
}

/// A service scheduled to start
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedService {
    pub id: String,
    pub name: String,
    pub group: Group,
    /// Resolved compose manifest
    pub manifest: PathBuf,
    /// Images the manifest will run
    pub images: Vec<ServiceImageEntry>,
}

/// Services of one group, started together
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    pub group: Group,
    pub services: Vec<PlannedService>,
}

impl Batch {
    pub fn ids(&self) -> Vec<&str> {
        self.services.iter().map(|s| s.id.as_str()).collect()
    }
}

/// Ordered batches plus the services left for a manual start
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchPlan {
    pub batches: Vec<Batch>,
    pub manual: Vec<PlannedService>,
}

impl BatchPlan {
    pub fn is_empty(&self) -> bool {
        self.batches.is_empty() && self.manual.is_empty()
    }

    /// Number of services across all batches, manual ones included
    pub fn len(&self) -> usize {
        self.batches.iter().map(|b| b.services.len()).sum::<usize>() + self.manual.len()
    }

    /// Ids of every batched service in start order
    pub fn ordered_ids(&self) -> Vec<&str> {
        self.batches.iter().flat_map(|b| b.ids()).collect()
    }
}

impl IntoIterator for BatchPlan {
    type Item = Batch;
    type IntoIter = std::vec::IntoIter<Batch>;

    fn into_iter(self) -> Self::IntoIter {
        self.batches.into_iter()
    }
}

impl fmt::Display for BatchPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, batch) in self.batches.iter().enumerate() {
            writeln!(f, "{}. {}", idx + 1, batch.group)?;
            for service in &batch.services {
                writeln!(f, "   {} ({})", service.id, service.manifest.display())?;
                for entry in &service.images {
                    writeln!(f, "     - {}: {}", entry.service, entry.source)?;
                }
            }
        }
        if !self.manual.is_empty() {
            writeln!(f, "manual start:")?;
            for service in &self.manual {
                writeln!(f, "   {} ({})", service.id, service.manifest.display())?;
            }
        }
        Ok(())
    }
}

/// Batch planner
pub struct Planner<'a> {
    config: &'a ProjectConfig,
    topology: &'a TopologyResolver,
    env: &'a ResolvedEnv,
    overrides: &'a dyn VarLookup,
    policy: ConflictPolicy,
    profiles: Vec<String>,
}

impl<'a> Planner<'a> {
    /// Planner reading enablement overrides from the resolved environment
    pub fn new(
        config: &'a ProjectConfig,
        topology: &'a TopologyResolver,
        env: &'a ResolvedEnv,
    ) -> Self {
        Self {
            config,
            topology,
            env,
            overrides: env,
            policy: ConflictPolicy::default(),
            profiles: Vec::new(),
        }
    }

    /// Apply policy and profiles from settings
    pub fn with_settings(mut self, settings: &Settings) -> Self {
        self.policy = settings.conflict_policy;
        self.profiles = settings.profiles.clone();
        self
    }

    pub fn with_overrides(mut self, overrides: &'a dyn VarLookup) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn with_policy(mut self, policy: ConflictPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_profiles(mut self, profiles: Vec<String>) -> Self {
        self.profiles = profiles;
        self
    }

    /// Build the batch plan for `target`.
    ///
    /// An unknown target is an error. Everything else that goes wrong is
    /// recorded and the affected service is left out.
    pub fn plan(&self, registry: &mut ServiceRegistry, target: &Target) -> Result<Outcome<BatchPlan>> {
        let mut diagnostics = Diagnostics::new();

        let closure = {
            let mut resolver = EnablementResolver::new(registry, self.config, self.overrides)
                .with_policy(self.policy);

            let roots = match target {
                Target::All => {
                    let mut roots = Vec::new();
                    for id in resolver.registry().ids() {
                        if !resolver.is_enabled(&id)? {
                            continue;
                        }
                        if !self.profile_active(resolver.registry(), &id) {
                            diagnostics.info(
                                DiagnosticKind::Note,
                                format!("Skipping {}: none of its profiles is active", id),
                            );
                            continue;
                        }
                        roots.push(id);
                    }
                    roots
                }
                Target::Service(id) => {
                    if !resolver.registry().contains(id) {
                        return Err(StackError::NotFound(format!("service {}", id)));
                    }
                    resolver.set_enabled(id, true)?;
                    vec![id.clone()]
                }
            };

            let closure = resolver.enforce_dependencies(&roots)?;
            diagnostics.append(resolver.finish());
            closure
        };

        self.check_group_order(registry, &closure.members, &mut diagnostics);

        let mut groups: BTreeMap<Group, Vec<PlannedService>> = BTreeMap::new();
        let mut manual = Vec::new();

        for id in &closure.members {
            let service = registry.require(id)?;
            let declaration = &service.declaration;
            let manifest = declaration.manifest_path(self.env);

            let images = match self.topology.resolve(&manifest) {
                Ok(outcome) => {
                    let (node, found) = outcome.into_parts();
                    diagnostics.append(found);
                    node.entries.clone()
                }
                Err(err) => {
                    diagnostics.absorb(
                        Severity::Error,
                        format!("Cannot resolve the compose manifest of {}", id),
                        &err,
                    );
                    continue;
                }
            };

            let planned = PlannedService {
                id: id.clone(),
                name: declaration.name.clone(),
                group: declaration.group,
                manifest,
                images,
            };
            if service.behavior.manual_start(declaration) {
                manual.push(planned);
            } else {
                groups.entry(declaration.group).or_default().push(planned);
            }
        }

        let batches = groups
            .into_iter()
            .map(|(group, services)| Batch { group, services })
            .collect::<Vec<_>>();

        tracing::info!(
            "Planned {} batches for {} ({} manual)",
            batches.len(),
            target,
            manual.len()
        );
        Ok(Outcome::new(BatchPlan { batches, manual }, diagnostics))
    }

    /// Profiles from the project config, else the declaration. No profiles
    /// means always active.
    fn profile_active(&self, registry: &ServiceRegistry, id: &str) -> bool {
        let declared = registry
            .get(id)
            .map(|s| s.declaration.profiles.as_slice())
            .unwrap_or_default();
        let profiles = match self.config.service(id) {
            Some(settings) if !settings.profiles.is_empty() => settings.profiles.as_slice(),
            _ => declared,
        };
        profiles.is_empty() || profiles.iter().any(|p| self.profiles.contains(p))
    }

    /// Warn about services whose dependency is only satisfied by a later group
    fn check_group_order(
        &self,
        registry: &ServiceRegistry,
        members: &BTreeSet<String>,
        diagnostics: &mut Diagnostics,
    ) {
        for id in members {
            let Some(service) = registry.get(id) else {
                continue;
            };
            let group = service.declaration.group;

            for capability in &service.declaration.depends {
                let providers: Vec<Group> = registry
                    .providers_of(capability)
                    .iter()
                    .filter(|p| members.contains(*p))
                    .filter_map(|p| registry.get(p))
                    .map(|p| p.declaration.group)
                    .collect();
                if !providers.is_empty() && providers.iter().all(|g| *g > group) {
                    diagnostics.warn(
                        DiagnosticKind::ValidationFailure,
                        format!(
                            "{} ({}) depends on {}, which only starts in a later group",
                            id, group, capability
                        ),
                    );
                }
            }
        }
    }
}
