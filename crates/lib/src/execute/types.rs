//! Types for graph resolution and step execution.
//!
//! This module defines the error types, result types, and configuration
//! for running a build.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::env::{EnvContext, EnvError};
use crate::step::StepId;

/// Errors detected while resolving the step graph.
///
/// These abort the build before any step runs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
  /// A dependency chain revisits a step still under resolution.
  #[error("dependency cycle detected: {}", .cycle.join(" -> "))]
  Cycle { cycle: Vec<String> },

  /// A required id has no producer.
  #[error("unresolved dependency {dependency} required by {dependent}")]
  UnresolvedDependency { dependency: String, dependent: String },

  /// Two steps declare the same output path.
  #[error("output {} is declared by both {first} and {second}", .path.display())]
  DuplicateOutput { path: PathBuf, first: String, second: String },

  /// The id was not issued by this registry.
  #[error("unknown step {0}")]
  UnknownStep(StepId),

  /// A producer was attached twice to the same id.
  #[error("step {0} is already defined")]
  AlreadyDefined(String),
}

/// Errors that terminate a single step.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecuteError {
  /// The process could not be launched.
  #[error("failed to spawn {program}: {message}")]
  Spawn { program: String, message: String },

  /// The process exited unsuccessfully.
  #[error("command failed with exit code {}: {cmd}", display_code(.code))]
  CommandFailed {
    cmd: String,
    code: Option<i32>,
    stderr: String,
    stderr_file: Option<PathBuf>,
  },

  /// An assertion evaluated to false. Carries the rendered message.
  #[error("assertion failed: {0}")]
  AssertionFailed(String),

  /// An evaluator read a variable that is not bound.
  #[error("unbound variable: {0}")]
  UnboundVariable(String),

  /// An evaluator failed for another reason.
  #[error("evaluation failed: {0}")]
  Eval(String),

  /// A deferred action resolved to an output another step already owns.
  #[error("output {} is already produced by {owner}", .path.display())]
  DuplicateOutput { path: PathBuf, owner: String },

  /// A required step failed, so this one never ran.
  #[error("dependency failed: {0}")]
  DependencyFailed(String),

  /// I/O error while handling command output.
  #[error("io error on {}: {message}", .path.display())]
  Io { path: PathBuf, message: String },

  /// The step's task panicked.
  #[error("step panicked: {0}")]
  Panicked(String),
}

fn display_code(code: &Option<i32>) -> String {
  code.map(|c| c.to_string()).unwrap_or_else(|| "none (terminated by signal)".to_string())
}

impl From<EnvError> for ExecuteError {
  fn from(error: EnvError) -> Self {
    match error {
      EnvError::Unbound(name) => ExecuteError::UnboundVariable(name),
      other => ExecuteError::Eval(other.to_string()),
    }
  }
}

/// Errors that prevent a build from running at all.
#[derive(Debug, Error)]
pub enum BuildError {
  #[error(transparent)]
  Graph(#[from] GraphError),

  /// An `init` or `init_fs` hook failed.
  #[error("{hook} hook failed: {message}")]
  Hook { hook: &'static str, message: String },

  /// The build root is not usable.
  #[error("invalid build root {}: {message}", .path.display())]
  Io { path: PathBuf, message: String },
}

/// Why a step did not run its action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
  /// The step's condition evaluated to false.
  Condition,
  /// The command's output is newer than its inputs.
  UpToDate,
}

impl fmt::Display for SkipReason {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      SkipReason::Condition => write!(f, "condition false"),
      SkipReason::UpToDate => write!(f, "up to date"),
    }
  }
}

/// Terminal state of a step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepState {
  Succeeded,
  Skipped(SkipReason),
  Failed(ExecuteError),
  /// Never started because the run stopped after a failure.
  Cancelled,
}

impl StepState {
  pub fn is_failed(&self) -> bool {
    matches!(self, StepState::Failed(_))
  }

  /// Succeeded or Skipped: dependents may proceed.
  pub fn is_ok(&self) -> bool {
    matches!(self, StepState::Succeeded | StepState::Skipped(_))
  }

  pub fn label(&self) -> &'static str {
    match self {
      StepState::Succeeded => "succeeded",
      StepState::Skipped(SkipReason::Condition) => "skipped",
      StepState::Skipped(SkipReason::UpToDate) => "up to date",
      StepState::Failed(_) => "failed",
      StepState::Cancelled => "cancelled",
    }
  }
}

/// What happened to one step.
#[derive(Debug, Clone)]
pub struct StepReport {
  pub id: StepId,
  pub name: String,
  pub note: Option<String>,
  pub state: StepState,
  pub duration: Duration,
  /// A process was spawned for this step.
  pub ran_process: bool,
  pub exit_code: Option<i32>,
  pub stdout_file: Option<PathBuf>,
  pub stderr_file: Option<PathBuf>,
}

impl StepReport {
  pub fn new(id: StepId, name: impl Into<String>, note: Option<String>, state: StepState) -> Self {
    Self {
      id,
      name: name.into(),
      note,
      state,
      duration: Duration::ZERO,
      ran_process: false,
      exit_code: None,
      stdout_file: None,
      stderr_file: None,
    }
  }

  pub fn error(&self) -> Option<&ExecuteError> {
    match &self.state {
      StepState::Failed(e) => Some(e),
      _ => None,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildStatus {
  Succeeded,
  Failed,
}

/// Aggregate result of a build run.
#[derive(Debug, Default)]
pub struct BuildResult {
  /// Terminal state of every step in the graph.
  pub steps: BTreeMap<StepId, StepReport>,

  /// Output context of every step that Succeeded or was Skipped.
  pub contexts: BTreeMap<StepId, EnvContext>,

  /// Steps that failed on their own, in completion order. Steps failed by
  /// propagation are not listed.
  pub failures: Vec<StepId>,

  pub duration: Duration,
}

impl BuildResult {
  /// Returns true if no step failed or was cancelled.
  pub fn is_success(&self) -> bool {
    self
      .steps
      .values()
      .all(|r| !matches!(r.state, StepState::Failed(_) | StepState::Cancelled))
  }

  pub fn status(&self) -> BuildStatus {
    if self.is_success() {
      BuildStatus::Succeeded
    } else {
      BuildStatus::Failed
    }
  }

  pub fn state(&self, id: StepId) -> Option<&StepState> {
    self.steps.get(&id).map(|r| &r.state)
  }

  pub fn report(&self, id: StepId) -> Option<&StepReport> {
    self.steps.get(&id)
  }

  pub fn context(&self, id: StepId) -> Option<&EnvContext> {
    self.contexts.get(&id)
  }

  /// The first step that failed on its own.
  pub fn first_failure(&self) -> Option<&StepReport> {
    self.failures.first().and_then(|id| self.steps.get(id))
  }

  /// Steps that spawned a process.
  pub fn executed(&self) -> impl Iterator<Item = StepId> + '_ {
    self.steps.values().filter(|r| r.ran_process).map(|r| r.id)
  }

  pub fn process_count(&self) -> usize {
    self.executed().count()
  }

  pub fn count(&self, f: impl Fn(&StepState) -> bool) -> usize {
    self.steps.values().filter(|r| f(&r.state)).count()
  }

  /// Merge of all step output contexts, in id order.
  pub fn final_context(&self) -> EnvContext {
    self.contexts.values().fold(EnvContext::new(), |acc, ctx| acc.merge(ctx))
  }

  pub fn summary(&self) -> BuildSummary {
    BuildSummary {
      status: self.status(),
      duration_ms: self.duration.as_millis() as u64,
      steps: self
        .steps
        .values()
        .map(|r| StepSummary {
          id: r.id,
          name: r.name.clone(),
          note: r.note.clone(),
          state: r.state.label().to_string(),
          error: r.error().map(ToString::to_string),
          duration_ms: r.duration.as_millis() as u64,
          exit_code: r.exit_code,
          stdout_file: r.stdout_file.clone(),
          stderr_file: r.stderr_file.clone(),
        })
        .collect(),
      first_failure: self.first_failure().map(|r| r.id),
    }
  }
}

/// Serializable view of a [`BuildResult`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildSummary {
  pub status: BuildStatus,
  pub duration_ms: u64,
  pub steps: Vec<StepSummary>,
  pub first_failure: Option<StepId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepSummary {
  pub id: StepId,
  pub name: String,
  pub note: Option<String>,
  pub state: String,
  pub error: Option<String>,
  pub duration_ms: u64,
  pub exit_code: Option<i32>,
  pub stdout_file: Option<PathBuf>,
  pub stderr_file: Option<PathBuf>,
}

/// What the engine does with the rest of the graph once a step fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
  /// Keep scheduling steps that do not depend on the failure.
  Continue,
  /// Stop scheduling new steps; let running ones finish.
  #[default]
  Drain,
  /// Stop scheduling and kill running steps.
  Abort,
}

/// Configuration for build execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecuteConfig {
  /// Maximum number of steps running at once.
  pub parallelism: usize,

  /// Run every command, even if its output is up to date.
  pub refresh: bool,

  /// Echo captured command stdout/stderr after each command completes.
  pub transparent: bool,

  pub failure_policy: FailurePolicy,

  /// Seed for fresh-variable tokens. A random seed is drawn when unset.
  pub seed: Option<u64>,
}

impl Default for ExecuteConfig {
  fn default() -> Self {
    Self {
      parallelism: num_cpus(),
      refresh: false,
      transparent: false,
      failure_policy: FailurePolicy::default(),
      seed: None,
    }
  }
}

/// Get the number of CPUs for default parallelism.
pub(crate) fn num_cpus() -> usize {
  std::thread::available_parallelism().map(|p| p.get()).unwrap_or(4)
}
