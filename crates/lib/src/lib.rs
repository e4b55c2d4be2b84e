//! factory-lib: declarative build-step graphs and incremental execution
//!
//! This crate provides the engine behind factory projects:
//! - `Step`: a command, expression or assertion plus its dependencies
//! - `StepRegistry`: producers addressed by `StepId`
//! - `StepGraph`: the resolved, acyclic graph reachable from the requested roots
//! - `run_build`: parallel, dependency-ordered execution of stale steps
//! - `EnvContext`: variable bindings flowing from dependencies to dependents

pub mod config;
pub mod dot;
pub mod env;
pub mod execute;
pub mod placeholder;
pub mod step;
pub mod util;

pub use config::FactoryConfig;
pub use env::{EnvContext, EnvError, Value};
pub use execute::{
  BuildError, BuildObserver, BuildRequest, BuildResult, ExecuteConfig, ExecuteError, FailurePolicy, GraphError, Hook,
  StepGraph, StepState, prepare, run_build,
};
pub use step::{Action, Assertion, Command, Deferred, Expression, ProducerContext, Step, StepId, StepRegistry};
