//! Compose topology resolution
//!
//! Walks `include` and `extends` relationships starting at one manifest and
//! flattens everything reachable into a list of [`ServiceImageEntry`]. Each
//! manifest is parsed at most once per [`ManifestCache`]; a manifest that is
//! already on the current resolution chain is a cycle and contributes
//! nothing.
//!
//! A flattened node depends on the chain it was reached through only when a
//! cycle was cut below it. Such nodes are rebuilt from the cached parse on
//! every resolution, so resolving a manifest gives the same entries no matter
//! what was resolved before it.

use super::config::{BuildConfig, ComposeFile, ExtendsConfig, ServiceConfig};
use super::parser::ComposeParser;
use crate::diagnostics::{DiagnosticKind, Diagnostics, Outcome, Severity};
use crate::env::{expand, ResolvedEnv};
use crate::error::{Result, StackError};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

/// Where a service's container image comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    /// Image reference, recorded as written (after expansion)
    Image(String),
    /// Build from a context directory
    Build {
        context: PathBuf,
        dockerfile: Option<PathBuf>,
        /// Tag given by a sibling `image` key
        tag: Option<String>,
    },
    /// Inline Dockerfile with no resolvable context
    InlineBuild,
}

impl fmt::Display for ImageSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageSource::Image(image) => write!(f, "{}", image),
            ImageSource::Build {
                context,
                dockerfile,
                tag,
            } => {
                write!(f, "build:{}", context.display())?;
                if let Some(dockerfile) = dockerfile {
                    write!(f, " ({})", dockerfile.display())?;
                }
                if let Some(tag) = tag {
                    write!(f, " as {}", tag)?;
                }
                Ok(())
            }
            ImageSource::InlineBuild => write!(f, "build:<inline>"),
        }
    }
}

/// One flattened service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceImageEntry {
    pub service: String,
    pub source: ImageSource,
    pub container_name: Option<String>,
}

/// Relationship between two manifests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    Include,
    Extends,
}

/// Edge from one manifest to another
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposeEdge {
    pub kind: EdgeKind,
    pub target: PathBuf,
}

/// A resolved manifest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposeNode {
    /// Canonical path
    pub path: PathBuf,
    /// Flattened services reachable from this manifest
    pub entries: Vec<ServiceImageEntry>,
    /// Manifests referenced by this one
    pub edges: Vec<ComposeEdge>,
}

impl ComposeNode {
    fn empty(path: PathBuf) -> Self {
        Self {
            path,
            entries: Vec::new(),
            edges: Vec::new(),
        }
    }

    /// Entry for a service name
    pub fn entry(&self, service: &str) -> Option<&ServiceImageEntry> {
        self.entries.iter().find(|e| e.service == service)
    }
}

/// Reads manifests. Exists so reads can be observed and swapped in tests.
pub trait ManifestSource: Send + Sync {
    /// Canonical form of `path`; fails when the manifest does not exist
    fn canonicalize(&self, path: &Path) -> std::io::Result<PathBuf>;

    /// Manifest content
    fn read(&self, path: &Path) -> std::io::Result<String>;
}

/// Manifests on the local filesystem
#[derive(Debug, Clone, Copy, Default)]
pub struct FsSource;

impl ManifestSource for FsSource {
    fn canonicalize(&self, path: &Path) -> std::io::Result<PathBuf> {
        std::fs::canonicalize(path)
    }

    fn read(&self, path: &Path) -> std::io::Result<String> {
        std::fs::read_to_string(path)
    }
}

/// Parsed manifests and resolved nodes, keyed by canonical path.
///
/// Every parse is kept. A resolved node is kept only when no cycle was cut
/// while building it below or at its own path; those nodes are flattened
/// again on each resolution. Clones share storage. Concurrent resolutions of
/// the same path may both insert; the content is identical, so the last
/// write wins.
#[derive(Debug, Clone, Default)]
pub struct ManifestCache {
    files: Arc<RwLock<HashMap<PathBuf, Arc<ComposeFile>>>>,
    nodes: Arc<RwLock<HashMap<PathBuf, Arc<ComposeNode>>>>,
}

impl ManifestCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &Path) -> Result<Option<Arc<ComposeNode>>> {
        let nodes = self
            .nodes
            .read()
            .map_err(|_| StackError::Lock("Failed to acquire read lock".to_string()))?;
        Ok(nodes.get(path).cloned())
    }

    fn insert(&self, node: Arc<ComposeNode>) -> Result<()> {
        let mut nodes = self
            .nodes
            .write()
            .map_err(|_| StackError::Lock("Failed to acquire write lock".to_string()))?;
        nodes.insert(node.path.clone(), node);
        Ok(())
    }

    fn parsed(&self, path: &Path) -> Result<Option<Arc<ComposeFile>>> {
        let files = self
            .files
            .read()
            .map_err(|_| StackError::Lock("Failed to acquire read lock".to_string()))?;
        Ok(files.get(path).cloned())
    }

    fn insert_parsed(&self, path: &Path, file: Arc<ComposeFile>) -> Result<()> {
        let mut files = self
            .files
            .write()
            .map_err(|_| StackError::Lock("Failed to acquire write lock".to_string()))?;
        files.insert(path.to_path_buf(), file);
        Ok(())
    }

    /// Number of resolved nodes held
    pub fn len(&self) -> usize {
        self.nodes.read().map(|nodes| nodes.len()).unwrap_or(0)
    }

    /// Number of parsed manifests held
    pub fn parsed_len(&self) -> usize {
        self.files.read().map(|files| files.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Compose topology resolver
#[derive(Clone)]
pub struct TopologyResolver {
    source: Arc<dyn ManifestSource>,
    cache: ManifestCache,
    env: ResolvedEnv,
}

impl TopologyResolver {
    /// Resolver over the local filesystem with a fresh cache
    pub fn new(env: ResolvedEnv) -> Self {
        Self::with_source(Arc::new(FsSource), ManifestCache::new(), env)
    }

    pub fn with_source(
        source: Arc<dyn ManifestSource>,
        cache: ManifestCache,
        env: ResolvedEnv,
    ) -> Self {
        Self { source, cache, env }
    }

    pub fn cache(&self) -> &ManifestCache {
        &self.cache
    }

    /// Resolve a manifest (or a directory holding one).
    ///
    /// Failing to read or parse the top-level manifest is an error. Failures
    /// further down an include/extends chain are recorded and that branch
    /// contributes nothing.
    pub fn resolve(&self, path: &Path) -> Result<Outcome<Arc<ComposeNode>>> {
        let path = if path.is_dir() {
            ComposeParser::find_compose_file(path).ok_or_else(|| {
                StackError::NotFound(format!("no compose file in {}", path.display()))
            })?
        } else {
            path.to_path_buf()
        };

        let mut diagnostics = Diagnostics::new();
        let mut chain = Chain::default();
        let node = self.resolve_node(&path, &mut chain, &mut diagnostics)?;
        Ok(Outcome::new(node, diagnostics))
    }

    /// Tolerant variant of [`resolve`](Self::resolve) for existence checks:
    /// a top-level failure is logged and yields an empty node.
    pub fn probe(&self, path: &Path) -> Outcome<Arc<ComposeNode>> {
        match self.resolve(path) {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::debug!("Probe of {} failed: {}", path.display(), err);
                let mut diagnostics = Diagnostics::new();
                diagnostics.absorb(
                    Severity::Info,
                    format!("{} contributes no services", path.display()),
                    &err,
                );
                Outcome::new(
                    Arc::new(ComposeNode::empty(path.to_path_buf())),
                    diagnostics,
                )
            }
        }
    }

    fn resolve_node(
        &self,
        path: &Path,
        chain: &mut Chain,
        diagnostics: &mut Diagnostics,
    ) -> Result<Arc<ComposeNode>> {
        let canonical = self.source.canonicalize(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StackError::NotFound(path.display().to_string())
            } else {
                StackError::Io(e)
            }
        })?;

        if let Some(node) = self.cache.get(&canonical)? {
            return Ok(node);
        }

        if let Some(position) = chain.position(&canonical) {
            let trail: Vec<String> = chain
                .paths
                .iter()
                .chain(std::iter::once(&canonical))
                .map(|p| p.display().to_string())
                .collect();
            chain.cut(position);
            diagnostics.absorb(
                Severity::Warning,
                format!("{} contributes nothing on this branch", canonical.display()),
                &StackError::CycleDetected(trail.join(" -> ")),
            );
            return Ok(Arc::new(ComposeNode::empty(canonical)));
        }

        tracing::debug!("Resolving manifest {}", canonical.display());
        let depth = chain.paths.len();
        chain.paths.push(canonical.clone());
        let built = self.build_node(&canonical, chain, diagnostics);
        chain.paths.pop();
        let complete = chain.settle(depth);

        let node = Arc::new(built?);
        if complete {
            self.cache.insert(node.clone())?;
        } else {
            tracing::debug!("Not caching {}: built across a cycle", canonical.display());
        }
        Ok(node)
    }

    fn parse(&self, canonical: &Path) -> Result<Arc<ComposeFile>> {
        if let Some(file) = self.cache.parsed(canonical)? {
            return Ok(file);
        }
        let content = self.source.read(canonical)?;
        let file = Arc::new(ComposeParser::parse_str(&content, canonical)?);
        self.cache.insert_parsed(canonical, file.clone())?;
        Ok(file)
    }

    fn build_node(
        &self,
        canonical: &Path,
        chain: &mut Chain,
        diagnostics: &mut Diagnostics,
    ) -> Result<ComposeNode> {
        let file = self.parse(canonical)?;
        let dir = canonical.parent().unwrap_or(Path::new("/")).to_path_buf();

        let mut node = ComposeNode::empty(canonical.to_path_buf());

        for include in &file.include {
            for raw in include.paths() {
                let target = self.resolve_path(&dir, raw);
                node.edges.push(ComposeEdge {
                    kind: EdgeKind::Include,
                    target: target.clone(),
                });
                match self.resolve_node(&target, chain, diagnostics) {
                    Ok(included) => node.entries.extend(included.entries.iter().cloned()),
                    Err(err) => diagnostics.absorb(
                        Severity::Warning,
                        format!(
                            "Include {} from {} skipped",
                            target.display(),
                            canonical.display()
                        ),
                        &err,
                    ),
                }
            }
        }

        let mut ctx = FileContext {
            file: &*file,
            dir: &dir,
            canonical,
            inherited: Vec::new(),
        };

        let mut own = Vec::new();
        for name in file.services.keys() {
            let mut seen = HashSet::new();
            match self.effective_entry(&mut ctx, name, &mut seen, chain, &mut node, diagnostics) {
                Some(entry) => own.push(entry),
                None => tracing::debug!(
                    "Service {} in {} has no image or build",
                    name,
                    canonical.display()
                ),
            }
        }

        node.entries.append(&mut ctx.inherited);
        node.entries.extend(own);
        Ok(node)
    }

    /// Image entry for `name` in the current file, following `extends`.
    /// The service's own image or build always wins over an inherited one.
    fn effective_entry(
        &self,
        ctx: &mut FileContext<'_>,
        name: &str,
        seen: &mut HashSet<String>,
        chain: &mut Chain,
        node: &mut ComposeNode,
        diagnostics: &mut Diagnostics,
    ) -> Option<ServiceImageEntry> {
        let file = ctx.file;
        let service = file.services.get(name)?;
        if !seen.insert(name.to_string()) {
            diagnostics.absorb(
                Severity::Warning,
                format!("Service {} contributes nothing", name),
                &StackError::CycleDetected(format!(
                    "{} extends itself in {}",
                    name,
                    ctx.canonical.display()
                )),
            );
            return None;
        }

        let direct = self.direct_source(ctx.dir, service);
        let container_name = service
            .container_name
            .as_deref()
            .map(|c| expand(c, &self.env));

        let inherited = match &service.extends {
            None => None,
            Some(extends) => {
                self.inherited_entry(ctx, name, extends, seen, chain, node, diagnostics)
            }
        };

        match (direct, inherited) {
            (Some(source), inherited) => Some(ServiceImageEntry {
                service: name.to_string(),
                source,
                container_name: container_name
                    .or_else(|| inherited.and_then(|e| e.container_name)),
            }),
            (None, Some(inherited)) => Some(ServiceImageEntry {
                service: name.to_string(),
                source: inherited.source,
                container_name: container_name.or(inherited.container_name),
            }),
            (None, None) => None,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn inherited_entry(
        &self,
        ctx: &mut FileContext<'_>,
        name: &str,
        extends: &ExtendsConfig,
        seen: &mut HashSet<String>,
        chain: &mut Chain,
        node: &mut ComposeNode,
        diagnostics: &mut Diagnostics,
    ) -> Option<ServiceImageEntry> {
        let Some(file) = extends.file() else {
            let target = extends.service()?;
            if !ctx.file.services.contains_key(target) {
                diagnostics.warn(
                    DiagnosticKind::NotFound,
                    format!(
                        "Service {} extends {} which is not in {}",
                        name,
                        target,
                        ctx.canonical.display()
                    ),
                );
                return None;
            }
            return self.effective_entry(ctx, target, seen, chain, node, diagnostics);
        };

        let target = self.resolve_path(ctx.dir, file);
        node.edges.push(ComposeEdge {
            kind: EdgeKind::Extends,
            target: target.clone(),
        });

        let extended = match self.resolve_node(&target, chain, diagnostics) {
            Ok(extended) => extended,
            Err(err) => {
                diagnostics.absorb(
                    Severity::Warning,
                    format!("Service {} cannot extend {}", name, target.display()),
                    &err,
                );
                return None;
            }
        };

        match extends.service() {
            Some(target_service) => {
                let found = extended.entry(target_service).cloned();
                if found.is_none() {
                    diagnostics.warn(
                        DiagnosticKind::NotFound,
                        format!(
                            "Service {} extends {} which is not in {}",
                            name,
                            target_service,
                            target.display()
                        ),
                    );
                }
                found
            }
            None => {
                ctx.inherited.extend(extended.entries.iter().cloned());
                None
            }
        }
    }

    fn direct_source(&self, dir: &Path, service: &ServiceConfig) -> Option<ImageSource> {
        let image = service
            .image
            .as_deref()
            .map(|i| expand(i, &self.env))
            .filter(|i| !i.is_empty());

        match &service.build {
            Some(BuildConfig::Simple(context)) => Some(ImageSource::Build {
                context: self.resolve_path(dir, context),
                dockerfile: None,
                tag: image,
            }),
            Some(BuildConfig::Full(full)) => {
                let context = match (&full.context, &full.dockerfile_inline) {
                    (Some(context), _) => self.resolve_path(dir, context),
                    (None, Some(_)) => return Some(ImageSource::InlineBuild),
                    (None, None) => dir.to_path_buf(),
                };
                let dockerfile = full
                    .dockerfile
                    .as_deref()
                    .map(|d| self.resolve_path(&context, d));
                Some(ImageSource::Build {
                    context,
                    dockerfile,
                    tag: image,
                })
            }
            None => image.map(ImageSource::Image),
        }
    }

    fn resolve_path(&self, base: &Path, raw: &str) -> PathBuf {
        let expanded = PathBuf::from(expand(raw, &self.env));
        if expanded.is_absolute() {
            expanded
        } else {
            base.join(expanded)
        }
    }
}

/// Manifests on the current resolution path
#[derive(Debug, Default)]
struct Chain {
    paths: Vec<PathBuf>,
    /// Shallowest chain index a cut cycle pointed back to
    cut_at: Option<usize>,
}

impl Chain {
    fn position(&self, path: &Path) -> Option<usize> {
        self.paths.iter().position(|p| p == path)
    }

    fn cut(&mut self, index: usize) {
        self.cut_at = Some(self.cut_at.map_or(index, |at| at.min(index)));
    }

    /// Called once the node at `depth` is built. Returns whether it is
    /// complete on its own and may be cached.
    fn settle(&mut self, depth: usize) -> bool {
        match self.cut_at {
            Some(at) if at < depth => false,
            Some(_) => {
                self.cut_at = None;
                false
            }
            None => true,
        }
    }
}

struct FileContext<'a> {
    file: &'a ComposeFile,
    dir: &'a Path,
    canonical: &'a Path,
    /// Entries inherited wholesale from `extends: { file }` without a service
    inherited: Vec<ServiceImageEntry>,
}
