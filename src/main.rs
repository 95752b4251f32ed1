//! Stackup - resolve, order and launch a fleet of compose-managed services
//!
//! This is the main CLI entry point for Stackup.

use clap::{Parser, Subcommand};
use stackup::compose::TopologyResolver;
use stackup::config::{ProjectConfig, Settings};
use stackup::env::{EnvironmentMap, ResolvedEnv};
use stackup::error::Result;
use stackup::registry::{BehaviorRegistry, EnabledSetting, ServiceRegistry};
use stackup::resolver::{
    BatchExecutor, ComposeCliLauncher, DryRunLauncher, EnablementResolver, Planner,
    ServiceLauncher, Target,
};
use stackup::{Diagnostics, Severity};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Stackup - compose service fleet orchestrator
#[derive(Parser)]
#[command(name = "stackup")]
#[command(version)]
#[command(about = "Resolve, order and launch a fleet of compose-managed services", long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Project root (defaults to STACKUP_HOME, then the current directory)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Activate a profile
    #[arg(short, long = "profile", global = true)]
    profiles: Vec<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the batch plan
    Plan {
        /// Plan for one service and its dependencies
        service: Option<String>,
    },

    /// Start services group by group
    Up {
        /// Start one service and its dependencies
        service: Option<String>,
        /// Log what would start without starting it
        #[arg(long)]
        dry_run: bool,
    },

    /// Print the resolved environment
    Env {
        /// Fail on missing required variables
        #[arg(long)]
        strict: bool,
    },

    /// Show the images a compose manifest runs
    Images {
        /// Manifest, or a directory holding one
        path: PathBuf,
        /// Treat an unreadable manifest as empty
        #[arg(long)]
        probe: bool,
    },

    /// List declared services
    #[command(name = "list", alias = "ls")]
    List,

    /// Always enable a service
    Enable {
        service: String,
    },

    /// Always disable a service
    Disable {
        service: String,
    },

    /// Enable a service only when something needs it
    Auto {
        service: String,
    },
}

/// Everything loaded for commands that work on the service fleet
struct Project {
    settings: Settings,
    env: ResolvedEnv,
    registry: ServiceRegistry,
    config: ProjectConfig,
}

impl Project {
    fn open(settings: Settings, diagnostics: &mut Diagnostics) -> Result<Self> {
        let env = resolve_env(&settings, settings.strict_env, diagnostics)?;

        let mut behaviors = BehaviorRegistry::new();
        let (registry, found) =
            ServiceRegistry::load(&settings.services_dir, &mut behaviors)?.into_parts();
        diagnostics.append(found);

        let template = ProjectConfig::template(registry.iter().map(|s| &s.declaration));
        let (config, found) =
            ProjectConfig::load_or_init(&settings.config_path, &template)?.into_parts();
        diagnostics.append(found);

        Ok(Self {
            settings,
            env,
            registry,
            config,
        })
    }

    fn set_enabled(&mut self, service: &str, setting: EnabledSetting) -> Result<()> {
        self.registry.require(service)?;
        self.config.set_enabled(service, setting);
        self.config.save()?;
        println!("{}: enabled = {}", service, setting);
        Ok(())
    }
}

fn resolve_env(
    settings: &Settings,
    strict: bool,
    diagnostics: &mut Diagnostics,
) -> Result<ResolvedEnv> {
    let map = EnvironmentMap::load(settings.dotenv.as_deref())?;
    let (env, found) = map.resolve(strict)?.into_parts();
    diagnostics.append(found);
    Ok(env)
}

fn print_diagnostics(diagnostics: &Diagnostics) {
    for (severity, entries) in diagnostics.by_severity() {
        if entries.is_empty() {
            continue;
        }
        let heading = match severity {
            Severity::Error => "Errors",
            Severity::Warning => "Warnings",
            Severity::Info => "Notes",
        };
        eprintln!("{}:", heading);
        for diagnostic in entries {
            eprintln!("  {}", diagnostic);
        }
    }
}

async fn run(cli: Cli, diagnostics: &mut Diagnostics) -> Result<()> {
    let process_env = EnvironmentMap::from_process();
    let settings = Settings::from_env(cli.root, &process_env).with_profiles(cli.profiles);

    match cli.command {
        Commands::Env { strict } => {
            let env = resolve_env(&settings, settings.strict_env || strict, diagnostics)?;
            for (key, value) in env.iter() {
                println!("{}={}", key, value);
            }
        }

        Commands::Images { path, probe } => {
            let env = resolve_env(&settings, settings.strict_env, diagnostics)?;
            let topology = TopologyResolver::new(env);
            let (node, found) = if probe {
                topology.probe(&path).into_parts()
            } else {
                topology.resolve(&path)?.into_parts()
            };
            diagnostics.append(found);

            println!("{}", node.path.display());
            for entry in &node.entries {
                match &entry.container_name {
                    Some(container) => {
                        println!("  {} -> {} [{}]", entry.service, entry.source, container)
                    }
                    None => println!("  {} -> {}", entry.service, entry.source),
                }
            }
        }

        Commands::List => {
            let Project {
                settings,
                env,
                mut registry,
                config,
            } = Project::open(settings, diagnostics)?;

            let mut resolver = EnablementResolver::new(&mut registry, &config, &env)
                .with_policy(settings.conflict_policy);
            let mut rows = Vec::new();
            for id in resolver.registry().ids() {
                let enabled = resolver.is_enabled(&id)?;
                if let Some(service) = resolver.registry().get(&id) {
                    rows.push(format!(
                        "{:<20} {:<13} {:<8} {}",
                        id,
                        service.declaration.group.to_string(),
                        if enabled { "on" } else { "off" },
                        service.declaration.name
                    ));
                }
            }
            diagnostics.append(resolver.finish());

            println!("{:<20} {:<13} {:<8} NAME", "ID", "GROUP", "ENABLED");
            for row in rows {
                println!("{}", row);
            }
        }

        Commands::Plan { service } => {
            let mut project = Project::open(settings, diagnostics)?;
            let topology = TopologyResolver::new(project.env.clone());
            let (plan, found) = Planner::new(&project.config, &topology, &project.env)
                .with_settings(&project.settings)
                .plan(&mut project.registry, &Target::from(service))?
                .into_parts();
            diagnostics.append(found);

            if plan.is_empty() {
                println!("Nothing to start");
            } else {
                print!("{}", plan);
            }
        }

        Commands::Up { service, dry_run } => {
            let mut project = Project::open(settings, diagnostics)?;
            let topology = TopologyResolver::new(project.env.clone());
            let (plan, found) = Planner::new(&project.config, &topology, &project.env)
                .with_settings(&project.settings)
                .plan(&mut project.registry, &Target::from(service))?
                .into_parts();
            diagnostics.append(found);

            if diagnostics.has_failures() {
                tracing::error!("Not starting anything: planning failed");
                return Ok(());
            }

            let launcher: Arc<dyn ServiceLauncher> = if dry_run {
                Arc::new(DryRunLauncher)
            } else {
                Arc::new(ComposeCliLauncher::new())
            };
            let executor =
                BatchExecutor::new(launcher, project.env.clone(), project.settings.root.clone());
            let (report, found) = executor
                .execute(plan, &mut project.registry)
                .await?
                .into_parts();
            diagnostics.append(found);

            println!(
                "Started {} services ({} failed, {} skipped, {} manual)",
                report.started.len(),
                report.failed.len(),
                report.skipped.len(),
                report.manual.len()
            );
            for id in &report.manual {
                println!("  {} needs a manual start", id);
            }
        }

        Commands::Enable { service } => {
            Project::open(settings, diagnostics)?.set_enabled(&service, EnabledSetting::On)?;
        }

        Commands::Disable { service } => {
            Project::open(settings, diagnostics)?.set_enabled(&service, EnabledSetting::Off)?;
        }

        Commands::Auto { service } => {
            Project::open(settings, diagnostics)?.set_enabled(&service, EnabledSetting::Auto)?;
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let mut diagnostics = Diagnostics::new();
    let result = run(cli, &mut diagnostics).await;
    print_diagnostics(&diagnostics);
    result?;

    if diagnostics.has_failures() {
        std::process::exit(1);
    }
    Ok(())
}
