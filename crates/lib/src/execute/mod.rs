//! Build execution module.
//!
//! This module provides the entry points for running a build. It handles:
//! - Config and filesystem hooks, run once before anything is resolved
//! - Graph resolution from the requested roots
//! - Parallel, dependency-ordered execution of stale steps
//! - Failure propagation according to the configured [`FailurePolicy`]

pub mod actions;
pub mod dag;
mod engine;
pub mod progress;
pub mod stale;
pub mod types;

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::env::EnvContext;
use crate::step::{ProducerContext, StepId, StepRegistry};

pub use dag::{StepGraph, StepNode};
pub use progress::{BuildObserver, NoProgress};
pub use stale::{StaleReason, Staleness};
pub use types::{
  BuildError, BuildResult, BuildStatus, BuildSummary, ExecuteConfig, ExecuteError, FailurePolicy, GraphError,
  SkipReason, StepReport, StepState, StepSummary,
};

type InitFn<'a> = Box<dyn FnOnce(EnvContext) -> anyhow::Result<EnvContext> + Send + 'a>;
type InitFsFn<'a> = Box<dyn FnOnce(&Path, &EnvContext) -> anyhow::Result<()> + Send + 'a>;

/// A setup hook run once before graph resolution.
pub enum Hook<'a> {
  /// Replace the config mapping.
  Init(InitFn<'a>),
  /// Prepare the filesystem under the build root.
  InitFs(InitFsFn<'a>),
}

impl<'a> Hook<'a> {
  pub fn init<F>(f: F) -> Self
  where
    F: FnOnce(EnvContext) -> anyhow::Result<EnvContext> + Send + 'a,
  {
    Hook::Init(Box::new(f))
  }

  pub fn init_fs<F>(f: F) -> Self
  where
    F: FnOnce(&Path, &EnvContext) -> anyhow::Result<()> + Send + 'a,
  {
    Hook::InitFs(Box::new(f))
  }

  fn name(&self) -> &'static str {
    match self {
      Hook::Init(_) => "init",
      Hook::InitFs(_) => "init_fs",
    }
  }
}

/// Everything needed to run a build.
pub struct BuildRequest<'a> {
  pub registry: &'a StepRegistry,
  pub roots: Vec<StepId>,
  pub root_dir: PathBuf,
  pub config: EnvContext,
  pub execute: ExecuteConfig,
  pub hooks: Vec<Hook<'a>>,
}

impl<'a> BuildRequest<'a> {
  pub fn new(registry: &'a StepRegistry, root_dir: impl Into<PathBuf>) -> Self {
    Self {
      registry,
      roots: Vec::new(),
      root_dir: root_dir.into(),
      config: EnvContext::new(),
      execute: ExecuteConfig::default(),
      hooks: Vec::new(),
    }
  }

  pub fn root(mut self, id: StepId) -> Self {
    self.roots.push(id);
    self
  }

  pub fn roots(mut self, ids: impl IntoIterator<Item = StepId>) -> Self {
    self.roots.extend(ids);
    self
  }

  pub fn config(mut self, config: EnvContext) -> Self {
    self.config = config;
    self
  }

  pub fn execute(mut self, execute: ExecuteConfig) -> Self {
    self.execute = execute;
    self
  }

  /// Append a hook. Hooks run in the order they were added.
  pub fn hook(mut self, hook: Hook<'a>) -> Self {
    self.hooks.push(hook);
    self
  }
}

/// A resolved graph, ready to execute.
#[derive(Debug)]
pub struct PreparedBuild {
  graph: StepGraph,
  root_dir: PathBuf,
  config: EnvContext,
  execute: ExecuteConfig,
}

impl PreparedBuild {
  pub fn graph(&self) -> &StepGraph {
    &self.graph
  }

  pub fn root_dir(&self) -> &Path {
    &self.root_dir
  }

  /// The config after all `init` hooks ran.
  pub fn config(&self) -> &EnvContext {
    &self.config
  }

  /// Execute the graph.
  ///
  /// Step failures are reported in the result, never as an `Err`.
  pub async fn execute(&self) -> BuildResult {
    self.execute_observed(&NoProgress).await
  }

  /// Execute the graph, reporting step starts and completions to `observer`.
  pub async fn execute_observed(&self, observer: &dyn BuildObserver) -> BuildResult {
    engine::run_graph(&self.graph, &self.root_dir, &self.config, &self.execute, observer).await
  }
}

/// Run hooks and resolve the graph without executing anything.
///
/// # Errors
///
/// - `Hook` if a hook returns an error
/// - `Io` if the build root is not a directory after the hooks ran
/// - `Graph` if the graph has a cycle, a dangling reference or a duplicate output
pub fn prepare(request: BuildRequest<'_>) -> Result<PreparedBuild, BuildError> {
  let BuildRequest {
    registry,
    roots,
    root_dir,
    mut config,
    execute,
    hooks,
  } = request;

  for hook in hooks {
    let name = hook.name();
    debug!(hook = name, "running hook");
    let result = match hook {
      Hook::Init(f) => f(config.clone()).map(|updated| config = updated),
      Hook::InitFs(f) => f(&root_dir, &config),
    };
    result.map_err(|e| BuildError::Hook {
      hook: name,
      message: format!("{e:#}"),
    })?;
  }

  if !root_dir.is_dir() {
    return Err(BuildError::Io {
      path: root_dir,
      message: "not a directory".to_string(),
    });
  }

  let ctx = ProducerContext::new(root_dir.clone(), config.clone());
  let graph = StepGraph::resolve(registry, &roots, &ctx)?;
  info!(steps = graph.len(), roots = roots.len(), "resolved step graph");

  Ok(PreparedBuild {
    graph,
    root_dir,
    config,
    execute,
  })
}

/// Run hooks, resolve the graph and execute it.
///
/// # Errors
///
/// Returns an error only if the build could not start. See [`prepare`].
pub async fn run_build(request: BuildRequest<'_>) -> Result<BuildResult, BuildError> {
  let prepared = prepare(request)?;
  Ok(prepared.execute().await)
}
