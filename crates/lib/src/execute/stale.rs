//! Staleness checks for command steps.
//!
//! A command is up to date when its declared output exists and is at least as
//! new as every declared input. Directories count as their newest entry.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::debug;
use walkdir::WalkDir;

use crate::step::Command;

/// Why a command has to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StaleReason {
  /// The run was started with `refresh`.
  Refresh,
  /// The command declares no output.
  NoOutput,
  /// A transitive dependency ran a process in this run.
  DirtyAncestor,
  MissingOutput,
  MissingInput(PathBuf),
  NewerInput(PathBuf),
}

impl fmt::Display for StaleReason {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      StaleReason::Refresh => write!(f, "refresh requested"),
      StaleReason::NoOutput => write!(f, "no declared output"),
      StaleReason::DirtyAncestor => write!(f, "a dependency was rebuilt"),
      StaleReason::MissingOutput => write!(f, "output does not exist"),
      StaleReason::MissingInput(p) => write!(f, "input {} does not exist", p.display()),
      StaleReason::NewerInput(p) => write!(f, "input {} is newer than the output", p.display()),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Staleness {
  Stale(StaleReason),
  UpToDate,
}

impl Staleness {
  pub fn is_stale(&self) -> bool {
    matches!(self, Staleness::Stale(_))
  }
}

/// Decide whether a command must run.
///
/// `cmd` is expected to have its paths resolved against the build root.
/// This touches the filesystem and should run on the blocking pool.
pub fn check(cmd: &Command, refresh: bool, ancestor_dirty: bool) -> Staleness {
  let staleness = evaluate(cmd, refresh, ancestor_dirty);
  debug!(cmd = %cmd, ?staleness, "staleness check");
  staleness
}

fn evaluate(cmd: &Command, refresh: bool, ancestor_dirty: bool) -> Staleness {
  if refresh {
    return Staleness::Stale(StaleReason::Refresh);
  }

  let Some(output) = &cmd.output else {
    return Staleness::Stale(StaleReason::NoOutput);
  };

  if ancestor_dirty {
    return Staleness::Stale(StaleReason::DirtyAncestor);
  }

  let Some(output_mtime) = newest_mtime(output) else {
    return Staleness::Stale(StaleReason::MissingOutput);
  };

  for input in &cmd.inputs {
    match newest_mtime(input) {
      None => return Staleness::Stale(StaleReason::MissingInput(input.clone())),
      Some(mtime) if mtime > output_mtime => return Staleness::Stale(StaleReason::NewerInput(input.clone())),
      Some(_) => {}
    }
  }

  Staleness::UpToDate
}

/// Modification time of a path; for directories, the newest entry beneath it.
///
/// Returns `None` if the path does not exist.
pub fn newest_mtime(path: &Path) -> Option<SystemTime> {
  let metadata = std::fs::metadata(path).ok()?;
  let own = metadata.modified().ok()?;

  if !metadata.is_dir() {
    return Some(own);
  }

  let newest = WalkDir::new(path)
    .into_iter()
    .filter_map(Result::ok)
    .filter_map(|entry| entry.metadata().ok())
    .filter_map(|m| m.modified().ok())
    .fold(own, |acc, mtime| acc.max(mtime));

  Some(newest)
}
