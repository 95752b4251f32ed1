//! Service registry
//!
//! Loads every `service.yaml` under the services root and keeps the static
//! declaration, the chosen behavior and the runtime state of each service.

use super::behavior::{BehaviorRegistry, ManualStartBehavior, ServiceBehavior};
use super::declaration::ServiceDeclaration;
use super::state::{ServiceState, StateListener};
use crate::diagnostics::{DiagnosticKind, Diagnostics, Outcome, Severity};
use crate::error::{Result, StackError};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

/// Declaration file names
pub const DECLARATION_FILES: &[&str] = &["service.yaml", "service.yml"];

/// How deep below the services root declarations are searched for
const MAX_DEPTH: usize = 3;

/// A loaded service
pub struct RegisteredService {
    pub declaration: ServiceDeclaration,
    pub behavior: Arc<dyn ServiceBehavior>,
    pub state: ServiceState,
}

impl RegisteredService {
    pub fn id(&self) -> &str {
        &self.declaration.id
    }
}

/// All loaded services, keyed by id
#[derive(Default)]
pub struct ServiceRegistry {
    services: BTreeMap<String, RegisteredService>,
}

impl ServiceRegistry {
    /// Load declarations under `root`.
    ///
    /// An unreadable root is an error. Broken, invalid, duplicate and
    /// declaration-disabled services are reported and skipped. Services
    /// flagged `custom_start` without a registered behavior get
    /// [`ManualStartBehavior`].
    pub fn load(root: &Path, behaviors: &mut BehaviorRegistry) -> Result<Outcome<Self>> {
        std::fs::read_dir(root).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StackError::NotFound(format!("services directory {}", root.display()))
            } else {
                StackError::Io(e)
            }
        })?;

        let mut diagnostics = Diagnostics::new();
        let mut declarations = Vec::new();

        let walker = walkdir::WalkDir::new(root)
            .max_depth(MAX_DEPTH)
            .sort_by_file_name();
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    diagnostics.warn(
                        DiagnosticKind::NotFound,
                        format!("Skipping unreadable entry under {}: {}", root.display(), e),
                    );
                    continue;
                }
            };
            let is_declaration = entry.file_type().is_file()
                && entry
                    .file_name()
                    .to_str()
                    .is_some_and(|name| DECLARATION_FILES.contains(&name));
            if !is_declaration {
                continue;
            }

            match ServiceDeclaration::from_file(entry.path()) {
                Ok(declaration) => declarations.push(declaration),
                Err(err) => diagnostics.absorb(
                    Severity::Warning,
                    format!("Skipping {}", entry.path().display()),
                    &err,
                ),
            }
        }

        for declaration in &declarations {
            if declaration.custom_start && !behaviors.has_override(&declaration.id) {
                behaviors.register(declaration.id.clone(), Arc::new(ManualStartBehavior));
            }
        }

        let outcome = Self::from_declarations(declarations, behaviors);
        diagnostics.append(outcome.diagnostics);
        tracing::info!("Loaded {} services from {}", outcome.value.len(), root.display());
        Ok(Outcome::new(outcome.value, diagnostics))
    }

    /// Build a registry from already-parsed declarations
    pub fn from_declarations(
        declarations: Vec<ServiceDeclaration>,
        behaviors: &BehaviorRegistry,
    ) -> Outcome<Self> {
        let mut diagnostics = Diagnostics::new();
        let mut services = BTreeMap::new();

        for declaration in declarations {
            if let Err(err) = declaration.validate() {
                diagnostics.absorb(Severity::Warning, "Skipping invalid service", &err);
                continue;
            }
            if declaration.disabled {
                diagnostics.info(
                    DiagnosticKind::Note,
                    format!("Service {} is disabled in its declaration", declaration.id),
                );
                continue;
            }
            if services.contains_key(&declaration.id) {
                diagnostics.warn(
                    DiagnosticKind::ValidationFailure,
                    format!(
                        "Duplicate service id {} in {}; keeping the first",
                        declaration.id,
                        declaration.source.display()
                    ),
                );
                continue;
            }

            let behavior = behaviors.lookup(&declaration.id);
            tracing::debug!("Registered {} ({})", declaration.id, behavior.name());
            services.insert(
                declaration.id.clone(),
                RegisteredService {
                    state: ServiceState::new(declaration.id.clone()),
                    behavior,
                    declaration,
                },
            );
        }

        Outcome::new(Self { services }, diagnostics)
    }

    pub fn get(&self, id: &str) -> Option<&RegisteredService> {
        self.services.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut RegisteredService> {
        self.services.get_mut(id)
    }

    /// Service or a NotFound error
    pub fn require(&self, id: &str) -> Result<&RegisteredService> {
        self.get(id)
            .ok_or_else(|| StackError::NotFound(format!("service {}", id)))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.services.contains_key(id)
    }

    /// Ids in sorted order
    pub fn ids(&self) -> Vec<String> {
        self.services.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RegisteredService> {
        self.services.values()
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// Services providing `capability`. A service whose id equals the
    /// capability comes first; the rest follow in id order.
    pub fn providers_of(&self, capability: &str) -> Vec<String> {
        let mut providers: Vec<String> = self
            .iter()
            .filter(|s| s.declaration.provides_capability(capability))
            .map(|s| s.id().to_string())
            .collect();
        providers.sort_by_key(|id| id != capability);
        providers
    }

    /// Services depending on anything `id` provides
    pub fn dependents_of(&self, id: &str) -> Vec<String> {
        let Some(service) = self.get(id) else {
            return Vec::new();
        };
        let capabilities: Vec<&str> = service.declaration.capabilities().collect();
        self.iter()
            .filter(|s| s.id() != id)
            .filter(|s| {
                s.declaration
                    .depends
                    .iter()
                    .any(|d| capabilities.contains(&d.as_str()))
            })
            .map(|s| s.id().to_string())
            .collect()
    }

    /// Attach a listener to every service's state
    pub fn subscribe_all(&mut self, listener: StateListener) {
        for service in self.services.values_mut() {
            service.state.subscribe(listener.clone());
        }
    }
}
