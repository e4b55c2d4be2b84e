//! Live progress bar showing which steps are running.

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

use indicatif::{ProgressBar, ProgressStyle};

use factory_lib::execute::StepReport;
use factory_lib::{BuildObserver, StepId};

/// Drives an indicatif bar from scheduler events.
pub struct BuildProgress {
  bar: ProgressBar,
  running: Mutex<BTreeMap<StepId, String>>,
}

impl BuildProgress {
  pub fn new(total: usize) -> Self {
    let bar = ProgressBar::new(total as u64);
    bar.set_style(
      ProgressStyle::with_template("[{elapsed_precise}] {bar:20.cyan/blue} [{pos:>4}/{len:4}] {wide_msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("##-"),
    );
    Self::with_bar(bar)
  }

  /// A bar that tracks progress without drawing, for `--quiet` and JSON output.
  pub fn hidden() -> Self {
    Self::with_bar(ProgressBar::hidden())
  }

  fn with_bar(bar: ProgressBar) -> Self {
    Self {
      bar,
      running: Mutex::new(BTreeMap::new()),
    }
  }

  /// Remove the bar before the report is printed.
  pub fn finish(&self) {
    self.bar.finish_and_clear();
  }

  fn show_running(&self, running: &BTreeMap<StepId, String>) {
    let names: Vec<&str> = running.values().map(String::as_str).collect();
    self.bar.set_message(format!("{}: {}", names.len(), names.join(", ")));
  }
}

impl BuildObserver for BuildProgress {
  fn step_started(&self, id: StepId, name: &str) {
    let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
    running.insert(id, name.to_string());
    self.show_running(&running);
  }

  fn step_finished(&self, report: &StepReport) {
    let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
    running.remove(&report.id);
    self.bar.inc(1);
    self.show_running(&running);
  }
}
