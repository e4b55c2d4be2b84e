//! factory-cli: command-line front end for factory projects
//!
//! A project binary implements [`Project`] and hands it to [`main`]:
//! - `register` declares the steps and names the buildable targets
//! - `init` and `init_fs` run once before the graph is resolved
//!
//! `main` parses the command line, layers it over `Factory.toml`, builds the
//! selected target and reports the result.

pub mod output;
pub mod progress;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result, anyhow};
use clap::{CommandFactory, FromArgMatches, Parser};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use factory_lib::dot::{plan_to_dot, stats_to_dot};
use factory_lib::util::hash::run_seed;
use factory_lib::{BuildRequest, EnvContext, FactoryConfig, FailurePolicy, Hook, StepId, StepRegistry, prepare};

use crate::output::{OutputFormat, print_error, print_json, print_report, print_targets, print_warning};
use crate::progress::BuildProgress;

/// A buildable project: its steps and setup hooks.
pub trait Project: Sync {
  /// Binary name shown in usage output.
  fn name(&self) -> &'static str;

  /// Adjust the config context before any step is produced.
  ///
  /// `seed` is the seed of this run, for values that must be reproducible
  /// with `--seed`.
  fn init(&self, config: EnvContext, seed: u64) -> Result<EnvContext> {
    let _ = seed;
    Ok(config)
  }

  /// Prepare the filesystem under the build root.
  fn init_fs(&self, root_dir: &Path, config: &EnvContext) -> Result<()> {
    let _ = (root_dir, config);
    Ok(())
  }

  /// Register every step and return the named targets.
  fn register(&self, registry: &mut StepRegistry) -> BTreeMap<String, StepId>;
}

/// Build a factory project
#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
  /// Target to build (default: `default-target` from Factory.toml, or all targets)
  pub target: Option<String>,

  /// Build root directory
  #[arg(short = 'd', long, value_name = "DIR")]
  pub root_dir: Option<PathBuf>,

  /// Number of steps run at once
  #[arg(short = 'p', long, value_name = "N")]
  pub threads: Option<usize>,

  /// Run every command, even if its outputs are up to date
  #[arg(short, long)]
  pub refresh: bool,

  /// Hide the progress bar; only print failures and the final summary
  #[arg(short, long)]
  pub quiet: bool,

  /// Echo command output after each step
  #[arg(short, long)]
  pub transparent: bool,

  /// Keep running independent steps after a failure
  #[arg(short, long, conflicts_with = "fail_fast")]
  pub keep_going: bool,

  /// Kill running steps as soon as one fails
  #[arg(long)]
  pub fail_fast: bool,

  /// Seed for fresh variable tokens
  #[arg(long)]
  pub seed: Option<u64>,

  /// Write the build plan as a graphviz file
  #[arg(long, value_name = "FILE")]
  pub plan_dot: Option<PathBuf>,

  /// Write run statistics as a graphviz file
  #[arg(long, value_name = "FILE")]
  pub stats_dot: Option<PathBuf>,

  /// Output format
  #[arg(long, value_enum, default_value_t)]
  pub format: OutputFormat,

  /// List the targets and exit
  #[arg(short, long)]
  pub list: bool,

  /// Enable debug logging
  #[arg(short, long)]
  pub verbose: bool,
}

impl Cli {
  /// Parse the process arguments, naming the command after the binary.
  pub fn parse_for(name: &'static str) -> Self {
    let matches = Cli::command().name(name).bin_name(name).get_matches();
    Cli::from_arg_matches(&matches).unwrap_or_else(|e| e.exit())
  }

  /// Settings given on the command line. Unset flags are left as `None` so
  /// `Factory.toml` can fill them in.
  fn overrides(&self, cwd: &Path) -> FactoryConfig {
    let failure_policy = if self.keep_going {
      Some(FailurePolicy::Continue)
    } else if self.fail_fast {
      Some(FailurePolicy::Abort)
    } else {
      None
    };

    FactoryConfig {
      root_dir: self.root_dir.as_ref().map(|dir| absolute(cwd, dir)),
      threads: self.threads,
      refresh: self.refresh.then_some(true),
      quiet: self.quiet.then_some(true),
      transparent: self.transparent.then_some(true),
      failure_policy,
      seed: self.seed,
      plan_dot: self.plan_dot.clone(),
      stats_dot: self.stats_dot.clone(),
      default_target: None,
      vars: BTreeMap::new(),
    }
  }
}

fn absolute(cwd: &Path, path: &Path) -> PathBuf {
  let joined = cwd.join(path);
  dunce::canonicalize(&joined).unwrap_or(joined)
}

/// Directory holding `Factory.toml`: the build root when given, else `cwd`.
fn config_dir(cwd: &Path, cli: &Cli) -> PathBuf {
  match &cli.root_dir {
    Some(dir) => absolute(cwd, dir),
    None => cwd.to_path_buf(),
  }
}

fn init_tracing(verbose: bool) {
  let default = if verbose { "debug" } else { "warn" };
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .without_time()
    .init();
}

/// Entry point for project binaries.
pub fn main<P: Project>(project: P) -> ExitCode {
  let cli = Cli::parse_for(project.name());
  init_tracing(cli.verbose);

  match run(&project, &cli) {
    Ok(true) => ExitCode::SUCCESS,
    Ok(false) => ExitCode::FAILURE,
    Err(e) => {
      print_error(&format!("{e:#}"));
      ExitCode::FAILURE
    }
  }
}

/// Run the project as described by `cli`. Returns whether the build succeeded.
pub fn run<P: Project>(project: &P, cli: &Cli) -> Result<bool> {
  let cwd = std::env::current_dir().context("Failed to determine current directory")?;
  let project_dir = config_dir(&cwd, cli);
  let file = FactoryConfig::load(&project_dir).context("Failed to load config")?;
  let settings = cli.overrides(&cwd).merge(file);

  let mut registry = StepRegistry::new();
  let targets = project.register(&mut registry);

  if cli.list {
    print_targets(&targets, cli.format)?;
    return Ok(true);
  }

  let wanted = cli.target.as_deref().or(settings.default_target.as_deref());
  let roots = select_targets(&targets, &registry, wanted)?;
  if roots.is_empty() {
    print_warning("Nothing to build");
    return Ok(true);
  }

  let seed = settings.seed.unwrap_or_else(run_seed);
  let mut execute = settings.execute_config();
  execute.seed = Some(seed);
  debug!(seed, threads = execute.parallelism, "build settings");

  let request = BuildRequest::new(&registry, settings.root_dir())
    .roots(roots)
    .config(settings.initial_vars())
    .execute(execute)
    .hook(Hook::init(move |config| project.init(config, seed)))
    .hook(Hook::init_fs(|root, config| project.init_fs(root, config)));

  let prepared = prepare(request)?;

  if let Some(path) = &settings.plan_dot {
    write_file(path, &plan_to_dot(prepared.graph()))?;
  }

  let progress = if settings.quiet() || cli.format.is_json() {
    BuildProgress::hidden()
  } else {
    BuildProgress::new(prepared.graph().len())
  };

  let runtime = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let result = runtime.block_on(prepared.execute_observed(&progress));
  progress.finish();

  if let Some(path) = &settings.stats_dot {
    write_file(path, &stats_to_dot(prepared.graph(), &result))?;
  }

  if cli.format.is_json() {
    print_json(&result.summary())?;
  } else {
    print_report(&result, settings.quiet());
  }

  Ok(result.is_success())
}

/// Resolve the requested target to root steps.
///
/// Without a target every named target is built. A name that is not a target
/// may still name a registered step.
fn select_targets(
  targets: &BTreeMap<String, StepId>,
  registry: &StepRegistry,
  wanted: Option<&str>,
) -> Result<Vec<StepId>> {
  let Some(name) = wanted else {
    return Ok(targets.values().copied().collect());
  };

  if let Some(id) = targets.get(name).copied().or_else(|| registry.find(name)) {
    return Ok(vec![id]);
  }

  let available: Vec<&str> = targets.keys().map(String::as_str).collect();
  Err(anyhow!(
    "unknown target '{}' (available: {})",
    name,
    available.join(", ")
  ))
}

fn write_file(path: &Path, contents: &str) -> Result<()> {
  if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
    std::fs::create_dir_all(parent).with_context(|| format!("Failed to create directory: {}", parent.display()))?;
  }
  std::fs::write(path, contents).with_context(|| format!("Failed to write {}", path.display()))
}
