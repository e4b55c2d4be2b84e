//! Test utilities for factory-lib.
//!
//! Cross-platform command builders and filesystem helpers for tests that
//! spawn processes or depend on modification times.

use std::fs::File;
use std::path::Path;
use std::time::{Duration, SystemTime};

use crate::step::Command;

/// A command running `script` through the platform shell.
#[cfg(unix)]
pub fn shell(script: &str) -> Command {
  Command::new("/bin/sh").args(["-c", script])
}

#[cfg(windows)]
pub fn shell(script: &str) -> Command {
  Command::new("cmd.exe").args(["/C", script])
}

/// A command creating (or updating) `path` and declaring it as output.
#[cfg(unix)]
pub fn touch(path: impl AsRef<Path>) -> Command {
  let path = path.as_ref();
  Command::new("touch").arg(path).output(path)
}

#[cfg(windows)]
pub fn touch(path: impl AsRef<Path>) -> Command {
  let path = path.as_ref();
  Command::new("powershell.exe")
    .args(["-NoProfile", "-Command"])
    .arg(format!("New-Item -ItemType File -Path '{}' -Force | Out-Null", path.display()))
    .output(path)
}

/// A time comfortably in the past, so tests can move mtimes both ways.
pub fn an_hour_ago() -> SystemTime {
  SystemTime::now() - Duration::from_secs(3600)
}

/// Set the modification time of an existing file.
pub fn set_mtime(path: &Path, time: SystemTime) {
  File::options()
    .write(true)
    .open(path)
    .and_then(|f| f.set_modified(time))
    .unwrap_or_else(|e| panic!("failed to set mtime of {}: {e}", path.display()));
}
