//! Step graph resolution.
//!
//! This module materializes the steps reachable from a set of roots and
//! arranges them in a directed acyclic graph (DAG):
//! - Every reachable producer is invoked exactly once, so fan-in shares a node
//! - Cycles and dangling references are reported before anything runs
//! - Literal command outputs are checked for uniqueness across the graph

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use petgraph::Direction;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use tracing::debug;

use crate::step::{ProducerContext, Step, StepId, StepRegistry};

use super::types::GraphError;

/// A materialized step together with its registered name.
#[derive(Debug)]
pub struct StepNode {
  pub id: StepId,
  pub name: String,
  pub step: Step,
}

/// The resolved build graph.
///
/// Edges point from a dependency to its dependent.
#[derive(Debug)]
pub struct StepGraph {
  graph: DiGraph<StepId, ()>,
  indices: HashMap<StepId, NodeIndex>,
  nodes: BTreeMap<StepId, Arc<StepNode>>,
  roots: Vec<StepId>,
  outputs: BTreeMap<PathBuf, StepId>,
}

/// Depth-first walk state for [`StepGraph::resolve`].
struct Walk<'a> {
  registry: &'a StepRegistry,
  ctx: &'a ProducerContext,
  done: BTreeMap<StepId, Step>,
  stack: Vec<StepId>,
}

impl Walk<'_> {
  fn visit(&mut self, id: StepId, dependent: Option<StepId>) -> Result<(), GraphError> {
    if self.done.contains_key(&id) {
      return Ok(());
    }

    if let Some(pos) = self.stack.iter().position(|s| *s == id) {
      let mut cycle: Vec<String> = self.stack[pos..].iter().map(|s| self.registry.describe(*s)).collect();
      cycle.push(self.registry.describe(id));
      return Err(GraphError::Cycle { cycle });
    }

    let producer = self
      .registry
      .producer(id)
      .ok_or_else(|| GraphError::UnresolvedDependency {
        dependency: self.registry.describe(id),
        dependent: dependent
          .map(|d| self.registry.describe(d))
          .unwrap_or_else(|| "build roots".to_string()),
      })?;

    let step = producer(self.ctx);
    debug!(step = %id, name = %self.registry.describe(id), requires = step.requires.len(), "materialized step");

    self.stack.push(id);
    for dep in &step.requires {
      self.visit(*dep, Some(id))?;
    }
    self.stack.pop();

    self.done.insert(id, step);
    Ok(())
  }
}

impl StepGraph {
  /// Resolve the graph reachable from `roots`.
  ///
  /// # Errors
  ///
  /// - `Cycle` if a step transitively requires itself
  /// - `UnresolvedDependency` if a required id has no producer
  /// - `DuplicateOutput` if two literal commands declare the same output
  pub fn resolve(registry: &StepRegistry, roots: &[StepId], ctx: &ProducerContext) -> Result<Self, GraphError> {
    let mut walk = Walk {
      registry,
      ctx,
      done: BTreeMap::new(),
      stack: Vec::new(),
    };
    for root in roots {
      walk.visit(*root, None)?;
    }

    let mut graph = DiGraph::new();
    let mut indices = HashMap::new();
    let mut nodes = BTreeMap::new();
    let mut outputs: BTreeMap<PathBuf, StepId> = BTreeMap::new();

    for (id, step) in walk.done {
      if let Some(output) = step.action.literal_output() {
        let output = absolutize(ctx.root_dir(), output);
        if let Some(first) = outputs.get(&output) {
          return Err(GraphError::DuplicateOutput {
            path: output,
            first: registry.describe(*first),
            second: registry.describe(id),
          });
        }
        outputs.insert(output, id);
      }

      indices.insert(id, graph.add_node(id));
      nodes.insert(
        id,
        Arc::new(StepNode {
          id,
          name: registry.describe(id),
          step,
        }),
      );
    }

    for node in nodes.values() {
      let dependent_idx = indices[&node.id];
      for dep in &node.step.requires {
        graph.add_edge(indices[dep], dependent_idx, ());
      }
    }

    let mut seen = HashSet::new();
    let roots: Vec<StepId> = roots.iter().copied().filter(|r| seen.insert(*r)).collect();

    let resolved = Self {
      graph,
      indices,
      nodes,
      roots,
      outputs,
    };
    resolved.verify_acyclic()?;

    Ok(resolved)
  }

  fn verify_acyclic(&self) -> Result<(), GraphError> {
    toposort(&self.graph, None).map_err(|cycle| GraphError::Cycle {
      cycle: vec![self.name(self.graph[cycle.node_id()]).to_string()],
    })?;
    Ok(())
  }

  pub fn node(&self, id: StepId) -> Option<&Arc<StepNode>> {
    self.nodes.get(&id)
  }

  pub fn nodes(&self) -> impl Iterator<Item = &Arc<StepNode>> {
    self.nodes.values()
  }

  /// All step ids in ascending order.
  pub fn ids(&self) -> impl Iterator<Item = StepId> + '_ {
    self.nodes.keys().copied()
  }

  pub fn contains(&self, id: StepId) -> bool {
    self.nodes.contains_key(&id)
  }

  pub fn name(&self, id: StepId) -> &str {
    self.nodes.get(&id).map(|n| n.name.as_str()).unwrap_or("<unknown>")
  }

  /// Direct dependencies of a step, in ascending id order.
  pub fn dependencies(&self, id: StepId) -> Vec<StepId> {
    self.neighbors(id, Direction::Incoming)
  }

  /// Direct dependents of a step, in ascending id order.
  pub fn dependents(&self, id: StepId) -> Vec<StepId> {
    self.neighbors(id, Direction::Outgoing)
  }

  fn neighbors(&self, id: StepId, direction: Direction) -> Vec<StepId> {
    let Some(&idx) = self.indices.get(&id) else {
      return Vec::new();
    };

    let set: BTreeSet<StepId> = self
      .graph
      .neighbors_directed(idx, direction)
      .map(|n| self.graph[n])
      .collect();
    set.into_iter().collect()
  }

  /// All transitive dependencies of a step.
  pub fn ancestors(&self, id: StepId) -> BTreeSet<StepId> {
    let mut seen = BTreeSet::new();
    let mut queue = self.dependencies(id);
    while let Some(dep) = queue.pop() {
      if seen.insert(dep) {
        queue.extend(self.dependencies(dep));
      }
    }
    seen
  }

  /// Steps in an order where dependencies come before dependents.
  pub fn topological_order(&self) -> Vec<StepId> {
    self.execution_waves().into_iter().flatten().collect()
  }

  /// Group steps into waves.
  ///
  /// Each wave contains steps whose dependencies all sit in earlier waves.
  /// Within a wave, ids are ascending.
  pub fn execution_waves(&self) -> Vec<Vec<StepId>> {
    // Kahn's algorithm, level by level
    let mut in_degree: HashMap<NodeIndex, usize> = HashMap::new();
    for idx in self.graph.node_indices() {
      in_degree.insert(idx, self.graph.neighbors_directed(idx, Direction::Incoming).count());
    }

    let mut waves = Vec::new();
    let mut remaining: HashSet<NodeIndex> = self.graph.node_indices().collect();

    while !remaining.is_empty() {
      let ready: Vec<NodeIndex> = remaining.iter().filter(|&&idx| in_degree[&idx] == 0).copied().collect();
      if ready.is_empty() {
        break;
      }

      for &idx in &ready {
        remaining.remove(&idx);
        for neighbor in self.graph.neighbors_directed(idx, Direction::Outgoing) {
          if let Some(deg) = in_degree.get_mut(&neighbor) {
            *deg = deg.saturating_sub(1);
          }
        }
      }

      let mut wave: Vec<StepId> = ready.into_iter().map(|idx| self.graph[idx]).collect();
      wave.sort();
      waves.push(wave);
    }

    waves
  }

  /// The ids the graph was resolved from.
  pub fn roots(&self) -> &[StepId] {
    &self.roots
  }

  /// Root-resolved literal command outputs and their owners.
  pub fn literal_outputs(&self) -> &BTreeMap<PathBuf, StepId> {
    &self.outputs
  }

  pub fn len(&self) -> usize {
    self.nodes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.nodes.is_empty()
  }
}

fn absolutize(root: &Path, path: &Path) -> PathBuf {
  if path.is_absolute() {
    path.to_path_buf()
  } else {
    root.join(path)
  }
}
