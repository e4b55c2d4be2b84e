//! Shared test helpers for engine integration tests.

use std::path::{Path, PathBuf};

use factory_lib::execute::{BuildError, BuildRequest, BuildResult, ExecuteConfig, FailurePolicy, run_build};
use factory_lib::{Command, EnvContext, StepId, StepRegistry};
use tempfile::TempDir;

/// Isolated build root.
pub struct TestEnv {
  pub temp: TempDir,
}

impl TestEnv {
  pub fn new() -> Self {
    Self {
      temp: TempDir::new().unwrap(),
    }
  }

  pub fn root(&self) -> &Path {
    self.temp.path()
  }

  pub fn path(&self, rel: &str) -> PathBuf {
    self.temp.path().join(rel)
  }

  pub fn write(&self, rel: &str, contents: &str) {
    let path = self.path(rel);
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, contents).unwrap();
  }

  pub fn read(&self, rel: &str) -> String {
    std::fs::read_to_string(self.path(rel)).unwrap_or_else(|e| panic!("failed to read {rel}: {e}"))
  }

  pub fn exists(&self, rel: &str) -> bool {
    self.path(rel).exists()
  }

  /// Run a build rooted here.
  pub async fn run(
    &self,
    registry: &StepRegistry,
    roots: &[StepId],
    execute: ExecuteConfig,
  ) -> Result<BuildResult, BuildError> {
    self.run_with(registry, roots, EnvContext::new(), execute).await
  }

  pub async fn run_with(
    &self,
    registry: &StepRegistry,
    roots: &[StepId],
    config: EnvContext,
    execute: ExecuteConfig,
  ) -> Result<BuildResult, BuildError> {
    let request = BuildRequest::new(registry, self.root())
      .roots(roots.iter().copied())
      .config(config)
      .execute(execute);
    run_build(request).await
  }
}

/// Sequential execution with a fixed seed.
pub fn serial() -> ExecuteConfig {
  ExecuteConfig {
    parallelism: 1,
    seed: Some(7),
    ..ExecuteConfig::default()
  }
}

pub fn parallel(threads: usize) -> ExecuteConfig {
  ExecuteConfig {
    parallelism: threads,
    ..serial()
  }
}

pub fn with_policy(config: ExecuteConfig, failure_policy: FailurePolicy) -> ExecuteConfig {
  ExecuteConfig {
    failure_policy,
    ..config
  }
}

/// Run `script` through `/bin/sh -c`.
pub fn sh(script: &str) -> Command {
  Command::new("/bin/sh").args(["-c", script])
}

/// Append `name` to `order.log`, then create `output`.
pub fn logged_touch(name: &str, output: &str) -> Command {
  sh(&format!("echo {name} >> order.log && touch {output}")).output(output)
}

/// Lines of `order.log`, in the order commands ran.
pub fn run_order(env: &TestEnv) -> Vec<String> {
  if !env.exists("order.log") {
    return Vec::new();
  }
  env.read("order.log").lines().map(str::to_string).collect()
}
