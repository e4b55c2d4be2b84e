//! Graphviz rendering of the step graph.
//!
//! - [`plan_to_dot`]: the resolved graph, one rank per execution wave
//! - [`stats_to_dot`]: the same graph annotated with each step's outcome

use std::fmt::Write;

use crate::execute::{BuildResult, StepGraph, StepState};
use crate::step::StepId;

/// Render the resolved graph before execution.
pub fn plan_to_dot(graph: &StepGraph) -> String {
  render(graph, |id| base_label(graph, id), |_| None)
}

/// Render the graph annotated with the results of a run.
pub fn stats_to_dot(graph: &StepGraph, result: &BuildResult) -> String {
  render(
    graph,
    |id| match result.report(id) {
      Some(report) => format!(
        "{}\\n{} {:.2?}",
        base_label(graph, id),
        report.state.label(),
        report.duration
      ),
      None => base_label(graph, id),
    },
    |id| result.state(id).map(color),
  )
}

fn render(graph: &StepGraph, label: impl Fn(StepId) -> String, fill: impl Fn(StepId) -> Option<&'static str>) -> String {
  let mut dot = String::new();
  dot.push_str("digraph factory {\n");
  dot.push_str("  node [shape=box];\n");

  for id in graph.ids() {
    let peripheries = if graph.roots().contains(&id) { 2 } else { 1 };
    let style = fill(id)
      .map(|c| format!(",style=filled,fillcolor={c}"))
      .unwrap_or_default();
    let _ = writeln!(
      dot,
      "  node{} [peripheries={peripheries}{style},label=\"{}\"];",
      id.index(),
      escape(&label(id))
    );
  }

  for wave in graph.execution_waves() {
    let members: Vec<String> = wave.iter().map(|id| format!("node{}", id.index())).collect();
    let _ = writeln!(dot, "  {{ rank=same; {} }}", members.join("; "));
  }

  for id in graph.ids() {
    for dep in graph.dependencies(id) {
      let _ = writeln!(dot, "  node{} -> node{};", dep.index(), id.index());
    }
  }

  dot.push_str("}\n");
  dot
}

fn base_label(graph: &StepGraph, id: StepId) -> String {
  let name = graph.name(id);
  match graph.node(id).and_then(|n| n.step.note.as_deref()) {
    Some(note) => format!("{id}: {name}\\n{note}"),
    None => format!("{id}: {name}"),
  }
}

fn color(state: &StepState) -> &'static str {
  match state {
    StepState::Succeeded => "palegreen",
    StepState::Skipped(_) => "lightgrey",
    StepState::Failed(_) => "salmon",
    StepState::Cancelled => "khaki",
  }
}

/// Escape double quotes; `\n` sequences produced by the labels are kept.
fn escape(label: &str) -> String {
  label.replace('"', "\\\"")
}
