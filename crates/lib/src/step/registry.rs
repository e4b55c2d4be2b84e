//! Step producer registration.
//!
//! Producers are functions from a [`ProducerContext`] to a [`Step`]. Each
//! registered producer gets an opaque [`StepId`], and steps refer to their
//! dependencies through those ids. The graph builder invokes every reachable
//! producer exactly once, so a step required by several dependents is
//! materialized as a single shared node.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::env::EnvContext;
use crate::execute::types::GraphError;

use super::types::Step;

/// Opaque handle to a registered step producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepId(u32);

impl StepId {
  pub fn index(self) -> usize {
    self.0 as usize
  }
}

impl fmt::Display for StepId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "#{}", self.0)
  }
}

/// Inputs available to every producer.
#[derive(Debug, Clone)]
pub struct ProducerContext {
  pub root_dir: PathBuf,
  pub config: EnvContext,
}

impl ProducerContext {
  pub fn new(root_dir: impl Into<PathBuf>, config: EnvContext) -> Self {
    Self {
      root_dir: root_dir.into(),
      config,
    }
  }

  pub fn root_dir(&self) -> &Path {
    &self.root_dir
  }

  /// Path relative to the build root.
  pub fn path(&self, relative: impl AsRef<Path>) -> PathBuf {
    self.root_dir.join(relative)
  }

  pub fn config(&self) -> &EnvContext {
    &self.config
  }
}

pub type Producer = Arc<dyn Fn(&ProducerContext) -> Step + Send + Sync>;

struct Entry {
  name: String,
  producer: Option<Producer>,
}

/// Lookup table from [`StepId`] to producer.
#[derive(Default)]
pub struct StepRegistry {
  entries: Vec<Entry>,
}

impl StepRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Reserve an id without a producer yet.
  ///
  /// Use this for forward references; the id must be given a producer with
  /// [`StepRegistry::define`] before the graph is resolved.
  pub fn declare(&mut self, name: impl Into<String>) -> StepId {
    let id = StepId(self.entries.len() as u32);
    self.entries.push(Entry {
      name: name.into(),
      producer: None,
    });
    id
  }

  /// Attach a producer to a previously declared id.
  pub fn define<F>(&mut self, id: StepId, producer: F) -> Result<(), GraphError>
  where
    F: Fn(&ProducerContext) -> Step + Send + Sync + 'static,
  {
    let entry = self
      .entries
      .get_mut(id.index())
      .ok_or_else(|| GraphError::UnknownStep(id))?;
    if entry.producer.is_some() {
      return Err(GraphError::AlreadyDefined(entry.name.clone()));
    }
    entry.producer = Some(Arc::new(producer));
    Ok(())
  }

  /// Declare and define in one go.
  pub fn register<F>(&mut self, name: impl Into<String>, producer: F) -> StepId
  where
    F: Fn(&ProducerContext) -> Step + Send + Sync + 'static,
  {
    let id = StepId(self.entries.len() as u32);
    self.entries.push(Entry {
      name: name.into(),
      producer: Some(Arc::new(producer)),
    });
    id
  }

  pub fn name(&self, id: StepId) -> Option<&str> {
    self.entries.get(id.index()).map(|e| e.name.as_str())
  }

  /// Display name for diagnostics, falling back to the raw id.
  pub fn describe(&self, id: StepId) -> String {
    self.name(id).map(str::to_string).unwrap_or_else(|| id.to_string())
  }

  pub fn find(&self, name: &str) -> Option<StepId> {
    self
      .entries
      .iter()
      .position(|e| e.name == name)
      .map(|i| StepId(i as u32))
  }

  pub fn producer(&self, id: StepId) -> Option<&Producer> {
    self.entries.get(id.index()).and_then(|e| e.producer.as_ref())
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }
}

impl fmt::Debug for StepRegistry {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_list()
      .entries(self.entries.iter().map(|e| (&e.name, e.producer.is_some())))
      .finish()
  }
}
