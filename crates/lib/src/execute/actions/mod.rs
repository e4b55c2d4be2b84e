//! Action execution module.
//!
//! Resolves a step's (possibly deferred) action against its context and runs
//! the in-process actions. Commands are spawned by [`cmd::run_command`].

pub mod cmd;

use crate::env::EnvContext;
use crate::execute::types::ExecuteError;
use crate::placeholder;
use crate::step::{Action, Assertion, Command, Expression};

pub use cmd::{CmdOutput, run_command};

/// An action with every deferred layer evaluated.
#[derive(Debug, Clone)]
pub enum ResolvedAction {
  Command(Command),
  Expression(Expression),
  Assertion(Assertion),
}

impl ResolvedAction {
  pub fn kind(&self) -> &'static str {
    match self {
      ResolvedAction::Command(_) => "command",
      ResolvedAction::Expression(_) => "expression",
      ResolvedAction::Assertion(_) => "assertion",
    }
  }
}

/// Evaluate deferred producers until a concrete action comes out.
///
/// A deferred producer may return another deferred producer.
pub fn resolve_action(action: &Action, env: &EnvContext) -> Result<ResolvedAction, ExecuteError> {
  let mut current = action.clone();
  loop {
    current = match current {
      Action::Command(cmd) => return Ok(ResolvedAction::Command(cmd)),
      Action::Expression(expr) => return Ok(ResolvedAction::Expression(expr)),
      Action::Assertion(assertion) => return Ok(ResolvedAction::Assertion(assertion)),
      Action::Deferred(f) => f(env)?,
    };
  }
}

/// Evaluate an expression and bind its result.
///
/// Returns the context with the expression's name bound to its value.
pub fn evaluate_expression(expr: &Expression, env: &EnvContext) -> Result<EnvContext, ExecuteError> {
  let value = (expr.eval)(env)?;
  Ok(env.with(expr.name.clone(), value))
}

/// Check an assertion.
///
/// On failure the message is rendered with `${name}` references filled in
/// from `env`.
pub fn check_assertion(assertion: &Assertion, env: &EnvContext) -> Result<(), ExecuteError> {
  if assertion.check.evaluate(env)? {
    Ok(())
  } else {
    Err(ExecuteError::AssertionFailed(placeholder::render(&assertion.message, env)))
  }
}
