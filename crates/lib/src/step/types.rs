//! Step graph value types.
//!
//! A [`Step`] wraps one unit of work ([`Action`]) together with its dependency
//! references, environment overrides, fresh-variable binding and runtime
//! condition. Steps are immutable once a producer has returned them.

use std::collections::{BTreeMap, BTreeSet};
use std::ffi::{OsStr, OsString};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::env::{EnvContext, EnvError, Value};

use super::registry::StepId;

/// A function of the environment context.
pub type EnvFn<T> = Arc<dyn Fn(&EnvContext) -> Result<T, EnvError> + Send + Sync>;

/// A field that is either known up front or computed from the context when the
/// engine reaches the step.
#[derive(Clone)]
pub enum Deferred<T> {
  Literal(T),
  Computed(EnvFn<T>),
}

impl<T: Clone> Deferred<T> {
  pub fn computed<F>(f: F) -> Self
  where
    F: Fn(&EnvContext) -> Result<T, EnvError> + Send + Sync + 'static,
  {
    Deferred::Computed(Arc::new(f))
  }

  pub fn evaluate(&self, env: &EnvContext) -> Result<T, EnvError> {
    match self {
      Deferred::Literal(value) => Ok(value.clone()),
      Deferred::Computed(f) => f(env),
    }
  }

  pub fn is_literal(&self) -> bool {
    matches!(self, Deferred::Literal(_))
  }
}

impl<T> From<T> for Deferred<T> {
  fn from(value: T) -> Self {
    Deferred::Literal(value)
  }
}

impl From<&str> for Deferred<String> {
  fn from(value: &str) -> Self {
    Deferred::Literal(value.to_string())
  }
}

impl<T: fmt::Debug> fmt::Debug for Deferred<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Deferred::Literal(value) => f.debug_tuple("Literal").field(value).finish(),
      Deferred::Computed(_) => f.write_str("Computed(<fn>)"),
    }
  }
}

/// One external process invocation.
///
/// `args` is the ordered argument vector used to spawn the process, while
/// `inputs` is the unordered set of paths compared against `output` to decide
/// staleness. Link steps that care about argument order put their objects in
/// `args`; the order of `inputs` never matters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Command {
  pub args: Vec<OsString>,
  pub inputs: BTreeSet<PathBuf>,
  pub output: Option<PathBuf>,
  pub cwd: Option<PathBuf>,
  pub env: BTreeMap<String, String>,
  pub stdout_file: Option<PathBuf>,
  pub stderr_file: Option<PathBuf>,
}

impl Command {
  pub fn new(program: impl AsRef<OsStr>) -> Self {
    Self {
      args: vec![program.as_ref().to_os_string()],
      ..Self::default()
    }
  }

  pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
    self.args.push(arg.as_ref().to_os_string());
    self
  }

  pub fn args<I, S>(mut self, args: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
  {
    self.args.extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
    self
  }

  pub fn input(mut self, path: impl Into<PathBuf>) -> Self {
    self.inputs.insert(path.into());
    self
  }

  pub fn inputs<I, P>(mut self, paths: I) -> Self
  where
    I: IntoIterator<Item = P>,
    P: Into<PathBuf>,
  {
    self.inputs.extend(paths.into_iter().map(Into::into));
    self
  }

  pub fn output(mut self, path: impl Into<PathBuf>) -> Self {
    self.output = Some(path.into());
    self
  }

  pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
    self.cwd = Some(dir.into());
    self
  }

  pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
    self.env.insert(key.into(), value.into());
    self
  }

  pub fn stdout_file(mut self, path: impl Into<PathBuf>) -> Self {
    self.stdout_file = Some(path.into());
    self
  }

  pub fn stderr_file(mut self, path: impl Into<PathBuf>) -> Self {
    self.stderr_file = Some(path.into());
    self
  }

  pub fn program(&self) -> Option<&OsStr> {
    self.args.first().map(OsString::as_os_str)
  }

  /// Resolve every relative path against `root`.
  pub fn resolved(&self, root: &Path) -> Command {
    let abs = |p: &PathBuf| if p.is_absolute() { p.clone() } else { root.join(p) };
    Command {
      args: self.args.clone(),
      inputs: self.inputs.iter().map(abs).collect(),
      output: self.output.as_ref().map(abs),
      cwd: Some(self.cwd.as_ref().map(abs).unwrap_or_else(|| root.to_path_buf())),
      env: self.env.clone(),
      stdout_file: self.stdout_file.as_ref().map(abs),
      stderr_file: self.stderr_file.as_ref().map(abs),
    }
  }
}

impl fmt::Display for Command {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let parts: Vec<_> = self.args.iter().map(|a| a.to_string_lossy()).collect();
    write!(f, "{}", parts.join(" "))
  }
}

/// A named value computed in-process and bound for descendant steps.
#[derive(Clone)]
pub struct Expression {
  pub name: String,
  pub eval: EnvFn<Value>,
}

impl Expression {
  pub fn new<F>(name: impl Into<String>, eval: F) -> Self
  where
    F: Fn(&EnvContext) -> Result<Value, EnvError> + Send + Sync + 'static,
  {
    Self {
      name: name.into(),
      eval: Arc::new(eval),
    }
  }

  pub fn constant(name: impl Into<String>, value: impl Into<Value>) -> Self {
    let value = value.into();
    Self::new(name, move |_| Ok(value.clone()))
  }
}

impl fmt::Debug for Expression {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Expression").field("name", &self.name).finish_non_exhaustive()
  }
}

/// A build-time invariant. `message` may reference context variables as
/// `${name}`.
#[derive(Debug, Clone)]
pub struct Assertion {
  pub check: Deferred<bool>,
  pub message: String,
}

impl Assertion {
  pub fn new(check: impl Into<Deferred<bool>>, message: impl Into<String>) -> Self {
    Self {
      check: check.into(),
      message: message.into(),
    }
  }

  pub fn check<F>(check: F, message: impl Into<String>) -> Self
  where
    F: Fn(&EnvContext) -> Result<bool, EnvError> + Send + Sync + 'static,
  {
    Self::new(Deferred::computed(check), message)
  }
}

/// The work a step performs.
#[derive(Clone)]
pub enum Action {
  Command(Command),
  Expression(Expression),
  Assertion(Assertion),
  /// Produce the action from the context at execution time.
  Deferred(EnvFn<Action>),
}

impl Action {
  pub fn deferred<F>(f: F) -> Self
  where
    F: Fn(&EnvContext) -> Result<Action, EnvError> + Send + Sync + 'static,
  {
    Action::Deferred(Arc::new(f))
  }

  pub fn kind(&self) -> &'static str {
    match self {
      Action::Command(_) => "command",
      Action::Expression(_) => "expression",
      Action::Assertion(_) => "assertion",
      Action::Deferred(_) => "deferred",
    }
  }

  /// The output of a literal command, if any.
  pub fn literal_output(&self) -> Option<&Path> {
    match self {
      Action::Command(cmd) => cmd.output.as_deref(),
      _ => None,
    }
  }

  /// Short human-readable label.
  pub fn label(&self) -> String {
    match self {
      Action::Command(cmd) => cmd
        .program()
        .map(|p| {
          Path::new(p)
            .file_name()
            .unwrap_or(p)
            .to_string_lossy()
            .to_string()
        })
        .unwrap_or_default(),
      Action::Expression(expr) => format!("expr {}", expr.name),
      Action::Assertion(_) => "assert".to_string(),
      Action::Deferred(_) => "<dynamic>".to_string(),
    }
  }
}

impl From<Command> for Action {
  fn from(value: Command) -> Self {
    Action::Command(value)
  }
}

impl From<Expression> for Action {
  fn from(value: Expression) -> Self {
    Action::Expression(value)
  }
}

impl From<Assertion> for Action {
  fn from(value: Assertion) -> Self {
    Action::Assertion(value)
  }
}

impl fmt::Debug for Action {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Action::Command(cmd) => f.debug_tuple("Command").field(cmd).finish(),
      Action::Expression(expr) => f.debug_tuple("Expression").field(expr).finish(),
      Action::Assertion(assertion) => f.debug_tuple("Assertion").field(assertion).finish(),
      Action::Deferred(_) => f.write_str("Deferred(<fn>)"),
    }
  }
}

/// A node of the build graph.
#[derive(Debug, Clone)]
pub struct Step {
  pub action: Action,
  pub requires: BTreeSet<StepId>,
  pub env: BTreeMap<String, Value>,
  pub freshvar: Option<Deferred<String>>,
  pub condition: Deferred<bool>,
  pub note: Option<String>,
}

impl Step {
  pub fn new(action: impl Into<Action>) -> Self {
    Self {
      action: action.into(),
      requires: BTreeSet::new(),
      env: BTreeMap::new(),
      freshvar: None,
      condition: Deferred::Literal(true),
      note: None,
    }
  }

  pub fn require(mut self, id: StepId) -> Self {
    self.requires.insert(id);
    self
  }

  pub fn requires(mut self, ids: impl IntoIterator<Item = StepId>) -> Self {
    self.requires.extend(ids);
    self
  }

  pub fn env(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
    self.env.insert(name.into(), value.into());
    self
  }

  /// Bind a build-unique token under `name` before the step runs.
  pub fn freshvar(mut self, name: impl Into<Deferred<String>>) -> Self {
    self.freshvar = Some(name.into());
    self
  }

  pub fn freshvar_with<F>(self, f: F) -> Self
  where
    F: Fn(&EnvContext) -> Result<String, EnvError> + Send + Sync + 'static,
  {
    self.freshvar(Deferred::computed(f))
  }

  pub fn condition(mut self, condition: bool) -> Self {
    self.condition = Deferred::Literal(condition);
    self
  }

  pub fn condition_with<F>(mut self, f: F) -> Self
  where
    F: Fn(&EnvContext) -> Result<bool, EnvError> + Send + Sync + 'static,
  {
    self.condition = Deferred::computed(f);
    self
  }

  pub fn note(mut self, note: impl Into<String>) -> Self {
    self.note = Some(note.into());
    self
  }
}
