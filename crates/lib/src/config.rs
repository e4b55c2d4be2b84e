//! `Factory.toml` execution settings.
//!
//! Every field is optional so that command-line flags can be layered over the
//! file with [`FactoryConfig::merge`]. The `[vars]` table seeds the global
//! environment context.
//!
//! ```toml
//! root-dir = "."
//! threads = 4
//! failure-policy = "continue"
//! default-target = "all"
//!
//! [vars]
//! profile = "release"
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::env::{EnvContext, Value};
use crate::execute::types::{ExecuteConfig, FailurePolicy, num_cpus};

/// Name of the config file looked up in the project directory.
pub const CONFIG_FILE: &str = "Factory.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("failed to read {}: {source}", .path.display())]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("invalid {}: {source}", .path.display())]
  Parse {
    path: PathBuf,
    #[source]
    source: toml::de::Error,
  },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
pub struct FactoryConfig {
  /// Build root. Relative paths are resolved against the config file's directory.
  pub root_dir: Option<PathBuf>,

  /// Number of steps run at once. Defaults to the logical CPU count.
  pub threads: Option<usize>,

  /// Run every command, even if its output is fresh.
  pub refresh: Option<bool>,

  /// Suppress the per-step summary.
  pub quiet: Option<bool>,

  /// Echo command stdout/stderr after completion.
  pub transparent: Option<bool>,

  pub failure_policy: Option<FailurePolicy>,

  /// Seed for fresh-variable tokens.
  pub seed: Option<u64>,

  /// Write the build plan as a graphviz file.
  pub plan_dot: Option<PathBuf>,

  /// Write run statistics as a graphviz file.
  pub stats_dot: Option<PathBuf>,

  /// Target run when none is given on the command line.
  pub default_target: Option<String>,

  /// Initial bindings of the global environment context.
  pub vars: BTreeMap<String, Value>,
}

impl FactoryConfig {
  /// Load `Factory.toml` from `dir`.
  ///
  /// A missing file yields the defaults. The root dir is always set on the
  /// returned config: the configured one, or `dir` itself.
  pub fn load(dir: &Path) -> Result<Self, ConfigError> {
    let path = dir.join(CONFIG_FILE);

    let mut config = if path.is_file() {
      let contents = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
        path: path.clone(),
        source,
      })?;
      debug!(path = %path.display(), "loaded config file");
      Self::from_toml_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.clone(),
        source,
      })?
    } else {
      debug!(path = %path.display(), "no config file, using defaults");
      Self::default()
    };

    let root = match config.root_dir.take() {
      Some(root) if root.is_absolute() => root,
      Some(root) => dir.join(root),
      None => dir.to_path_buf(),
    };
    config.root_dir = Some(dunce::canonicalize(&root).unwrap_or(root));

    Ok(config)
  }

  pub fn from_toml_str(contents: &str) -> Result<Self, toml::de::Error> {
    toml::from_str(contents)
  }

  /// Combine two configs; values set on `self` win.
  ///
  /// `vars` are merged key by key with the same preference.
  pub fn merge(self, other: Self) -> Self {
    let mut vars = other.vars;
    vars.extend(self.vars);

    Self {
      root_dir: self.root_dir.or(other.root_dir),
      threads: self.threads.or(other.threads),
      refresh: self.refresh.or(other.refresh),
      quiet: self.quiet.or(other.quiet),
      transparent: self.transparent.or(other.transparent),
      failure_policy: self.failure_policy.or(other.failure_policy),
      seed: self.seed.or(other.seed),
      plan_dot: self.plan_dot.or(other.plan_dot),
      stats_dot: self.stats_dot.or(other.stats_dot),
      default_target: self.default_target.or(other.default_target),
      vars,
    }
  }

  pub fn threads(&self) -> usize {
    self.threads.filter(|t| *t > 0).unwrap_or_else(num_cpus)
  }

  pub fn quiet(&self) -> bool {
    self.quiet.unwrap_or(false)
  }

  /// The build root, or the current directory if none was configured.
  pub fn root_dir(&self) -> PathBuf {
    self.root_dir.clone().unwrap_or_else(|| PathBuf::from("."))
  }

  pub fn execute_config(&self) -> ExecuteConfig {
    ExecuteConfig {
      parallelism: self.threads(),
      refresh: self.refresh.unwrap_or(false),
      transparent: self.transparent.unwrap_or(false),
      failure_policy: self.failure_policy.unwrap_or_default(),
      seed: self.seed,
    }
  }

  /// The `[vars]` table as a context.
  pub fn initial_vars(&self) -> EnvContext {
    EnvContext::from_map(self.vars.clone())
  }
}
