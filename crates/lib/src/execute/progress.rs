//! Step lifecycle notifications for progress displays.

use crate::step::StepId;

use super::types::StepReport;

/// Receives step events while a build runs.
///
/// Events come from the scheduler task in the order they happen, never from
/// inside a running step.
pub trait BuildObserver: Send + Sync {
  /// A step was handed to a worker.
  fn step_started(&self, id: StepId, name: &str) {
    let _ = (id, name);
  }

  /// A step reached its final state.
  fn step_finished(&self, report: &StepReport) {
    let _ = report;
  }
}

/// Observer that ignores every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl BuildObserver for NoProgress {}
