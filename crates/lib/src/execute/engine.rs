//! Ready-queue scheduler and per-step task.
//!
//! Steps become ready once every dependency is terminal. Ready steps are
//! started in ascending id order while semaphore permits are available, each
//! in its own task on a `JoinSet`.

use std::any::Any;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::env::{EnvContext, process_overrides};
use crate::step::{Command, StepId};
use crate::util::hash::{fresh_token, run_seed};

use super::actions::{ResolvedAction, check_assertion, evaluate_expression, resolve_action, run_command};
use super::dag::{StepGraph, StepNode};
use super::progress::BuildObserver;
use super::stale::{self, Staleness};
use super::types::{BuildResult, ExecuteConfig, ExecuteError, FailurePolicy, SkipReason, StepReport, StepState};

/// Outputs claimed so far, with the owning step's name.
type Claims = Arc<Mutex<HashMap<PathBuf, (StepId, String)>>>;

/// What a finished task hands back to the scheduler.
struct Outcome {
  report: StepReport,
  context: Option<EnvContext>,
  dirty: bool,
}

/// Run every step of `graph`.
pub(crate) async fn run_graph(
  graph: &StepGraph,
  root_dir: &Path,
  config: &EnvContext,
  execute: &ExecuteConfig,
  observer: &dyn BuildObserver,
) -> BuildResult {
  let start = Instant::now();
  let seed = execute.seed.unwrap_or_else(run_seed);
  let parallelism = execute.parallelism.max(1);

  info!(steps = graph.len(), parallelism, "starting build");

  let claims: Claims = Arc::new(Mutex::new(
    graph
      .literal_outputs()
      .iter()
      .map(|(path, id)| (path.clone(), (*id, graph.name(*id).to_string())))
      .collect(),
  ));

  let mut scheduler = Scheduler::new(graph);
  let semaphore = Arc::new(Semaphore::new(parallelism));
  let mut join_set: JoinSet<Outcome> = JoinSet::new();
  let mut tasks: HashMap<tokio::task::Id, StepId> = HashMap::new();
  let mut halted = false;

  loop {
    while !halted && let Some(id) = scheduler.next_ready() {
      if let Some(failed) = scheduler.failed_dependency(id) {
        scheduler.take_ready(id);
        warn!(step = %id, name = %graph.name(id), dependency = %graph.name(failed), "skipping step: dependency failed");
        let error = ExecuteError::DependencyFailed(graph.name(failed).to_string());
        let report = report_for(graph, id, StepState::Failed(error));
        observer.step_finished(&report);
        scheduler.record(report, None, false);
        continue;
      }

      let Ok(permit) = semaphore.clone().try_acquire_owned() else {
        break;
      };
      scheduler.take_ready(id);

      let Some(node) = graph.node(id) else {
        continue;
      };
      let task = NodeTask {
        node: node.clone(),
        inherited: scheduler.inherited_context(config, id),
        ancestor_dirty: scheduler.ancestor_dirty(id),
        root_dir: root_dir.to_path_buf(),
        seed,
        refresh: execute.refresh,
        transparent: execute.transparent,
        claims: claims.clone(),
      };

      let handle = join_set.spawn(async move {
        let _permit = permit;
        task.run().await
      });
      tasks.insert(handle.id(), id);
      observer.step_started(id, graph.name(id));
    }

    let Some(joined) = join_set.join_next_with_id().await else {
      break;
    };

    let outcome = match joined {
      Ok((task_id, outcome)) => {
        tasks.remove(&task_id);
        outcome
      }
      Err(e) => {
        let Some(id) = tasks.remove(&e.id()) else {
          error!(error = %e, "unknown step task failed");
          continue;
        };
        let state = if e.is_panic() {
          error!(step = %id, name = %graph.name(id), "step task panicked");
          StepState::Failed(ExecuteError::Panicked(panic_message(e.into_panic())))
        } else {
          StepState::Cancelled
        };
        Outcome {
          report: report_for(graph, id, state),
          context: None,
          dirty: false,
        }
      }
    };

    let failed = outcome.report.state.is_failed();
    let id = outcome.report.id;
    observer.step_finished(&outcome.report);
    scheduler.record(outcome.report, outcome.context, outcome.dirty);

    if failed {
      scheduler.failures.push(id);
      match execute.failure_policy {
        FailurePolicy::Continue => {}
        FailurePolicy::Drain => {
          if !halted {
            info!(step = %id, "draining running steps after failure");
          }
          halted = true;
        }
        FailurePolicy::Abort => {
          if !halted {
            info!(step = %id, running = join_set.len(), "aborting running steps after failure");
            join_set.abort_all();
          }
          halted = true;
        }
      }
    }
  }

  let result = scheduler.finish(start);
  info!(
    succeeded = result.count(|s| matches!(s, StepState::Succeeded)),
    skipped = result.count(|s| matches!(s, StepState::Skipped(_))),
    failed = result.count(StepState::is_failed),
    cancelled = result.count(|s| matches!(s, StepState::Cancelled)),
    processes = result.process_count(),
    "build finished"
  );
  result
}

fn report_for(graph: &StepGraph, id: StepId, state: StepState) -> StepReport {
  let note = graph.node(id).and_then(|n| n.step.note.clone());
  StepReport::new(id, graph.name(id), note, state)
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
  if let Some(s) = payload.downcast_ref::<&str>() {
    s.to_string()
  } else if let Some(s) = payload.downcast_ref::<String>() {
    s.clone()
  } else {
    "unknown panic".to_string()
  }
}

/// Bookkeeping for the ready queue.
struct Scheduler<'g> {
  graph: &'g StepGraph,
  remaining: HashMap<StepId, usize>,
  ready: BTreeSet<StepId>,
  reports: BTreeMap<StepId, StepReport>,
  contexts: BTreeMap<StepId, EnvContext>,
  dirty: HashMap<StepId, bool>,
  failures: Vec<StepId>,
}

impl<'g> Scheduler<'g> {
  fn new(graph: &'g StepGraph) -> Self {
    let mut remaining = HashMap::new();
    let mut ready = BTreeSet::new();
    for id in graph.ids() {
      let count = graph.dependencies(id).len();
      if count == 0 {
        ready.insert(id);
      }
      remaining.insert(id, count);
    }

    Self {
      graph,
      remaining,
      ready,
      reports: BTreeMap::new(),
      contexts: BTreeMap::new(),
      dirty: HashMap::new(),
      failures: Vec::new(),
    }
  }

  fn next_ready(&self) -> Option<StepId> {
    self.ready.first().copied()
  }

  fn take_ready(&mut self, id: StepId) {
    self.ready.remove(&id);
  }

  /// A dependency that did not end in Succeeded or Skipped.
  fn failed_dependency(&self, id: StepId) -> Option<StepId> {
    self
      .graph
      .dependencies(id)
      .into_iter()
      .find(|dep| self.reports.get(dep).is_some_and(|r| !r.state.is_ok()))
  }

  /// Config overlaid with what each dependency changed relative to config,
  /// in id order.
  ///
  /// A dependency that still carries the config value for a name never hides
  /// another dependency's binding for it.
  fn inherited_context(&self, config: &EnvContext, id: StepId) -> EnvContext {
    self
      .graph
      .dependencies(id)
      .iter()
      .filter_map(|dep| self.contexts.get(dep))
      .fold(config.clone(), |acc, ctx| acc.overlay(&ctx.changes_from(config)))
  }

  fn ancestor_dirty(&self, id: StepId) -> bool {
    self
      .graph
      .dependencies(id)
      .iter()
      .any(|dep| self.dirty.get(dep).copied().unwrap_or(false))
  }

  fn record(&mut self, report: StepReport, context: Option<EnvContext>, dirty: bool) {
    let id = report.id;
    self.dirty.insert(id, dirty);
    if let Some(context) = context {
      self.contexts.insert(id, context);
    }
    self.reports.insert(id, report);

    for dependent in self.graph.dependents(id) {
      if let Some(count) = self.remaining.get_mut(&dependent) {
        *count = count.saturating_sub(1);
        if *count == 0 {
          self.ready.insert(dependent);
        }
      }
    }
  }

  /// Settle steps that never started and assemble the result.
  fn finish(mut self, start: Instant) -> BuildResult {
    for id in self.graph.topological_order() {
      if self.reports.contains_key(&id) {
        continue;
      }
      // only a failure propagates; a dependency that never started leaves this one cancelled too
      let failed = self
        .graph
        .dependencies(id)
        .into_iter()
        .find(|dep| self.reports.get(dep).is_some_and(|r| r.state.is_failed()));
      let state = match failed {
        Some(dep) => StepState::Failed(ExecuteError::DependencyFailed(self.graph.name(dep).to_string())),
        None => StepState::Cancelled,
      };
      debug!(step = %id, name = %self.graph.name(id), state = state.label(), "step never started");
      self.reports.insert(id, report_for(self.graph, id, state));
    }

    BuildResult {
      steps: self.reports,
      contexts: self.contexts,
      failures: self.failures,
      duration: start.elapsed(),
    }
  }
}

/// How a step finished when nothing went wrong.
enum Finish {
  Succeeded(EnvContext),
  /// Outputs were current; dependents still see the step's bindings.
  UpToDate(EnvContext),
  /// The condition was false; the inherited context passes through.
  ConditionFalse,
}

/// Everything one step needs, owned so it can move into a task.
struct NodeTask {
  node: Arc<StepNode>,
  inherited: EnvContext,
  ancestor_dirty: bool,
  root_dir: PathBuf,
  seed: u64,
  refresh: bool,
  transparent: bool,
  claims: Claims,
}

impl NodeTask {
  async fn run(self) -> Outcome {
    let start = Instant::now();
    let id = self.node.id;
    let mut report = StepReport::new(id, self.node.name.clone(), self.node.step.note.clone(), StepState::Succeeded);

    debug!(step = %id, name = %self.node.name, "step started");

    let (state, context) = match self.execute(&mut report).await {
      Ok(Finish::Succeeded(context)) => {
        info!(step = %id, name = %self.node.name, "step succeeded");
        (StepState::Succeeded, Some(context))
      }
      Ok(Finish::UpToDate(context)) => {
        info!(step = %id, name = %self.node.name, reason = %SkipReason::UpToDate, "step skipped");
        (StepState::Skipped(SkipReason::UpToDate), Some(context))
      }
      Ok(Finish::ConditionFalse) => {
        info!(step = %id, name = %self.node.name, reason = %SkipReason::Condition, "step skipped");
        (StepState::Skipped(SkipReason::Condition), Some(self.inherited.clone()))
      }
      Err(e) => {
        error!(step = %id, name = %self.node.name, error = %e, "step failed");
        (StepState::Failed(e), None)
      }
    };

    report.state = state;
    report.duration = start.elapsed();

    Outcome {
      dirty: report.ran_process || self.ancestor_dirty,
      report,
      context,
    }
  }

  async fn execute(&self, report: &mut StepReport) -> Result<Finish, ExecuteError> {
    let step = &self.node.step;
    let mut env = self.inherited.overlay(&step.env);

    if let Some(freshvar) = &step.freshvar {
      let name = freshvar.evaluate(&env)?;
      let token = fresh_token(self.seed, self.node.id, &self.node.name);
      debug!(step = %self.node.id, var = %name, %token, "bound fresh variable");
      env = env.with(name, token);
    }

    if !step.condition.evaluate(&env)? {
      return Ok(Finish::ConditionFalse);
    }

    match resolve_action(&step.action, &env)? {
      ResolvedAction::Command(cmd) => {
        let cmd = cmd.resolved(&self.root_dir);
        self.claim(&cmd)?;

        let check = cmd.clone();
        let (refresh, dirty) = (self.refresh, self.ancestor_dirty);
        let staleness = tokio::task::spawn_blocking(move || stale::check(&check, refresh, dirty))
          .await
          .map_err(|e| ExecuteError::Panicked(e.to_string()))?;

        let Staleness::Stale(reason) = staleness else {
          return Ok(Finish::UpToDate(env));
        };

        info!(step = %self.node.id, name = %self.node.name, cmd = %cmd, %reason, "running command");
        report.stdout_file = cmd.stdout_file.clone();
        report.stderr_file = cmd.stderr_file.clone();

        let result = run_command(&cmd, &process_overrides(&step.env), self.transparent).await;
        report.ran_process = !matches!(result, Err(ExecuteError::Spawn { .. }));
        report.exit_code = match &result {
          Ok(output) => output.code,
          Err(ExecuteError::CommandFailed { code, .. }) => *code,
          Err(_) => None,
        };
        result?;

        Ok(Finish::Succeeded(env))
      }
      ResolvedAction::Expression(expr) => Ok(Finish::Succeeded(evaluate_expression(&expr, &env)?)),
      ResolvedAction::Assertion(assertion) => {
        check_assertion(&assertion, &env)?;
        Ok(Finish::Succeeded(env))
      }
    }
  }

  /// Claim the command's output for this step.
  fn claim(&self, cmd: &Command) -> Result<(), ExecuteError> {
    let Some(output) = &cmd.output else {
      return Ok(());
    };

    let mut claims = self.claims.lock().unwrap_or_else(PoisonError::into_inner);
    match claims.get(output) {
      Some((owner, _)) if *owner == self.node.id => Ok(()),
      Some((_, name)) => Err(ExecuteError::DuplicateOutput {
        path: output.clone(),
        owner: name.clone(),
      }),
      None => {
        claims.insert(output.clone(), (self.node.id, self.node.name.clone()));
        Ok(())
      }
    }
  }
}
