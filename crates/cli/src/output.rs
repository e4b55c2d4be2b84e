//! CLI output formatting utilities.
//!
//! Provides consistent formatting for terminal output including colored status
//! messages, per-step build reports and human-readable durations.

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::Context;
use clap::ValueEnum;
use owo_colors::{OwoColorize, Stream};

use factory_lib::execute::{BuildResult, ExecuteError, StepReport};
use factory_lib::{StepId, StepState};

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
  #[default]
  Text,
  Json,
}

impl OutputFormat {
  pub fn is_json(self) -> bool {
    matches!(self, OutputFormat::Json)
  }
}

pub mod symbols {
  pub const SUCCESS: &str = "✓";
  pub const ERROR: &str = "✗";
  pub const WARNING: &str = "⚠";
  pub const INFO: &str = "•";
  pub const SKIP: &str = "-";
}

/// Durations are shown to millisecond precision.
pub fn format_duration(duration: Duration) -> String {
  let millis = Duration::from_millis(duration.as_millis() as u64);
  humantime::format_duration(millis).to_string()
}

pub fn print_success(message: &str) {
  println!(
    "{} {}",
    symbols::SUCCESS.if_supports_color(Stream::Stdout, |s| s.green()),
    message
  );
}

pub fn print_error(message: &str) {
  eprintln!(
    "{} {}",
    symbols::ERROR.if_supports_color(Stream::Stderr, |s| s.red()),
    message.if_supports_color(Stream::Stderr, |s| s.red())
  );
}

pub fn print_warning(message: &str) {
  eprintln!(
    "{} {}",
    symbols::WARNING.if_supports_color(Stream::Stderr, |s| s.yellow()),
    message.if_supports_color(Stream::Stderr, |s| s.yellow())
  );
}

pub fn print_info(message: &str) {
  println!(
    "{} {}",
    symbols::INFO.if_supports_color(Stream::Stdout, |s| s.blue()),
    message
  );
}

pub fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
  let json = serde_json::to_string_pretty(value).context("Failed to serialize to JSON")?;
  println!("{}", json);
  Ok(())
}

fn state_symbol(state: &StepState) -> &'static str {
  match state {
    StepState::Succeeded => symbols::SUCCESS,
    StepState::Skipped(_) => symbols::SKIP,
    StepState::Failed(_) => symbols::ERROR,
    StepState::Cancelled => symbols::WARNING,
  }
}

fn print_step(report: &StepReport) {
  let symbol = state_symbol(&report.state);
  let symbol = match report.state {
    StepState::Succeeded => symbol.if_supports_color(Stream::Stdout, |s| s.green()).to_string(),
    StepState::Skipped(_) => symbol.if_supports_color(Stream::Stdout, |s| s.dimmed()).to_string(),
    StepState::Failed(_) => symbol.if_supports_color(Stream::Stdout, |s| s.red()).to_string(),
    StepState::Cancelled => symbol.if_supports_color(Stream::Stdout, |s| s.yellow()).to_string(),
  };

  let detail = format!("({}, {})", report.state.label(), format_duration(report.duration));
  println!(
    "  {} {} {} {}",
    symbol,
    report.id,
    report.name,
    detail.if_supports_color(Stream::Stdout, |s| s.dimmed())
  );
}

/// Print the failing step, its note, exit code and captured stderr.
fn print_failure(report: &StepReport) {
  let Some(error) = report.error() else {
    return;
  };

  print_error(&format!("{} failed: {}", report.name, error));
  if let Some(note) = &report.note {
    eprintln!("  note: {}", note);
  }

  if let ExecuteError::CommandFailed {
    stderr, stderr_file, ..
  } = error
  {
    for line in stderr.lines() {
      eprintln!("  | {}", line);
    }
    if let Some(path) = stderr_file {
      eprintln!("  stderr: {}", path.display());
    }
  }
}

/// Print the result of a build run.
///
/// Unless `quiet`, every step is listed in id order. The failing steps and a
/// one-line summary are always printed.
pub fn print_report(result: &BuildResult, quiet: bool) {
  if !quiet {
    for report in result.steps.values() {
      print_step(report);
    }
    println!();
  }

  for id in &result.failures {
    if let Some(report) = result.report(*id) {
      print_failure(report);
    }
  }

  let executed = result.executed().count();
  let skipped = result.count(|s| matches!(s, StepState::Skipped(_)));
  let elapsed = format_duration(result.duration);

  if result.is_success() {
    print_success(&format!(
      "Build succeeded: {} step(s), {} executed, {} skipped in {}",
      result.steps.len(),
      executed,
      skipped,
      elapsed
    ));
  } else {
    let cancelled = result.count(|s| matches!(s, StepState::Cancelled));
    print_error(&format!(
      "Build failed: {} failure(s), {} cancelled after {}",
      result.failures.len(),
      cancelled,
      elapsed
    ));
  }
}

/// Print the named targets, in name order.
pub fn print_targets(targets: &BTreeMap<String, StepId>, format: OutputFormat) -> anyhow::Result<()> {
  if format.is_json() {
    return print_json(targets);
  }

  if targets.is_empty() {
    print_info("No targets defined");
    return Ok(());
  }

  println!("Targets:");
  for (name, id) in targets {
    println!("  {} {} ({})", symbols::INFO, name, id);
  }
  Ok(())
}
