//! Batch execution
//!
//! Hands a [`BatchPlan`] to the container runtime. Services of one batch are
//! launched concurrently; the next batch starts only once the current one
//! has settled, and not at all if anything in it failed.

use super::plan::{BatchPlan, PlannedService};
use crate::diagnostics::{DiagnosticKind, Diagnostics, Outcome, Severity};
use crate::env::ResolvedEnv;
use crate::error::{Result, StackError};
use crate::registry::{PrepareContext, ServiceRegistry};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::process::Command;
use tokio::task::JoinSet;

/// Starts the containers of one planned service
#[async_trait]
pub trait ServiceLauncher: Send + Sync {
    /// Launcher name, for logs
    fn name(&self) -> &'static str;

    /// Start the service and return once the runtime has accepted it
    async fn launch(&self, service: &PlannedService, env: &ResolvedEnv) -> Result<()>;
}

/// Logs what would start and starts nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct DryRunLauncher;

#[async_trait]
impl ServiceLauncher for DryRunLauncher {
    fn name(&self) -> &'static str {
        "dry-run"
    }

    async fn launch(&self, service: &PlannedService, _env: &ResolvedEnv) -> Result<()> {
        tracing::info!(
            "Would start {} ({}) from {}",
            service.id,
            service.group,
            service.manifest.display()
        );
        for entry in &service.images {
            tracing::info!("  {} -> {}", entry.service, entry.source);
        }
        Ok(())
    }
}

/// Runs `docker compose -f <manifest> up -d`
#[derive(Debug, Clone)]
pub struct ComposeCliLauncher {
    program: String,
}

impl ComposeCliLauncher {
    pub fn new() -> Self {
        Self::with_program("docker")
    }

    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for ComposeCliLauncher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ServiceLauncher for ComposeCliLauncher {
    fn name(&self) -> &'static str {
        "compose"
    }

    async fn launch(&self, service: &PlannedService, env: &ResolvedEnv) -> Result<()> {
        let manifest = service.manifest.to_string_lossy().to_string();
        let mut command = Command::new(&self.program);
        command
            .args(["compose", "-f", manifest.as_str(), "up", "-d"])
            .envs(env.iter());
        if let Some(dir) = service.manifest.parent() {
            command.current_dir(dir);
        }

        tracing::info!("Starting {}: {} compose -f {} up -d", service.id, self.program, manifest);
        let output = command.output().await.map_err(|e| StackError::Launch {
            service: service.id.clone(),
            message: format!("failed to run {}: {}", self.program, e),
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(StackError::Launch {
                service: service.id.clone(),
                message: format!("{} ({})", stderr.trim(), output.status),
            });
        }
        Ok(())
    }
}

/// What happened during execution
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionReport {
    pub started: Vec<String>,
    pub failed: Vec<String>,
    /// Never attempted because an earlier group failed
    pub skipped: Vec<String>,
    /// Left for a manual start
    pub manual: Vec<String>,
}

impl ExecutionReport {
    pub fn succeeded(&self) -> bool {
        self.failed.is_empty() && self.skipped.is_empty()
    }
}

/// Batch executor
pub struct BatchExecutor {
    launcher: Arc<dyn ServiceLauncher>,
    env: ResolvedEnv,
    root: PathBuf,
}

impl BatchExecutor {
    pub fn new(launcher: Arc<dyn ServiceLauncher>, env: ResolvedEnv, root: impl Into<PathBuf>) -> Self {
        Self {
            launcher,
            env,
            root: root.into(),
        }
    }

    /// Prepare and launch every batch in order
    pub async fn execute(
        &self,
        plan: BatchPlan,
        registry: &mut ServiceRegistry,
    ) -> Result<Outcome<ExecutionReport>> {
        let mut diagnostics = Diagnostics::new();
        let mut report = ExecutionReport::default();

        for service in &plan.manual {
            diagnostics.info(
                DiagnosticKind::Note,
                format!("{} needs a manual start", service.id),
            );
            report.manual.push(service.id.clone());
        }

        let mut batches = plan.batches.into_iter();
        while let Some(batch) = batches.next() {
            tracing::info!(
                "Starting {} group with {} services via {}",
                batch.group,
                batch.services.len(),
                self.launcher.name()
            );

            let mut tasks = JoinSet::new();
            let mut batch_failed = false;

            for service in batch.services {
                if let Err(err) = self.prepare(&service, registry) {
                    diagnostics.absorb(
                        Severity::Error,
                        format!("Failed to prepare {}", service.id),
                        &err,
                    );
                    report.failed.push(service.id);
                    batch_failed = true;
                    continue;
                }

                let launcher = self.launcher.clone();
                let env = self.env.clone();
                tasks.spawn(async move {
                    let result = launcher.launch(&service, &env).await;
                    (service.id, result)
                });
            }

            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok((id, Ok(()))) => {
                        if let Some(service) = registry.get_mut(&id) {
                            service.state.set_started(true);
                        }
                        report.started.push(id);
                    }
                    Ok((id, Err(err))) => {
                        diagnostics.absorb(Severity::Error, format!("Failed to start {}", id), &err);
                        report.failed.push(id);
                        batch_failed = true;
                    }
                    Err(err) => {
                        diagnostics.error(
                            DiagnosticKind::Runtime,
                            format!("Launch task did not complete: {}", err),
                        );
                        batch_failed = true;
                    }
                }
            }

            if batch_failed {
                for rest in batches.by_ref() {
                    report
                        .skipped
                        .extend(rest.services.into_iter().map(|s| s.id));
                }
                if !report.skipped.is_empty() {
                    diagnostics.warn(
                        DiagnosticKind::Runtime,
                        format!(
                            "Stopped after the {} group failed; not started: {}",
                            batch.group,
                            report.skipped.join(", ")
                        ),
                    );
                }
                break;
            }
        }

        Ok(Outcome::new(report, diagnostics))
    }

    fn prepare(&self, service: &PlannedService, registry: &ServiceRegistry) -> Result<()> {
        let registered = registry.require(&service.id)?;
        let ctx = PrepareContext {
            root: &self.root,
            env: &self.env,
        };
        let created = registered.behavior.prepare(&registered.declaration, &ctx)?;
        for path in created {
            tracing::info!("Prepared {} for {}", path.display(), service.id);
        }
        Ok(())
    }
}
