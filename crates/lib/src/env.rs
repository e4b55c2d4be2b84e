//! Environment context for step evaluation.
//!
//! An [`EnvContext`] is the set of variable bindings visible to a step. It is
//! built by merging the global config, the output contexts of the step's
//! dependencies and the step's own overrides. Contexts are immutable: every
//! update returns a new context and shares the untouched map through an `Arc`,
//! so sibling branches never observe each other's bindings.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A value bound in an environment context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
  Bool(bool),
  Number(f64),
  String(String),
  Path(PathBuf),
  /// Absent value. Merging `Unset` over a context removes the key.
  Unset,
}

impl Value {
  pub fn as_str(&self) -> Option<&str> {
    match self {
      Value::String(s) => Some(s),
      Value::Path(p) => p.to_str(),
      _ => None,
    }
  }

  /// Interpret the value as a path. Strings are accepted as paths.
  pub fn as_path(&self) -> Option<&Path> {
    match self {
      Value::Path(p) => Some(p),
      Value::String(s) => Some(Path::new(s)),
      _ => None,
    }
  }

  pub fn as_bool(&self) -> Option<bool> {
    match self {
      Value::Bool(b) => Some(*b),
      _ => None,
    }
  }

  pub fn as_f64(&self) -> Option<f64> {
    match self {
      Value::Number(n) => Some(*n),
      _ => None,
    }
  }

  pub fn is_unset(&self) -> bool {
    matches!(self, Value::Unset)
  }

  /// Name of the variant, used in type mismatch diagnostics.
  pub fn type_name(&self) -> &'static str {
    match self {
      Value::Bool(_) => "bool",
      Value::Number(_) => "number",
      Value::String(_) => "string",
      Value::Path(_) => "path",
      Value::Unset => "unset",
    }
  }
}

impl fmt::Display for Value {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Value::Bool(b) => write!(f, "{}", b),
      Value::Number(n) => write!(f, "{}", n),
      Value::String(s) => write!(f, "{}", s),
      Value::Path(p) => write!(f, "{}", p.display()),
      Value::Unset => Ok(()),
    }
  }
}

impl From<&str> for Value {
  fn from(value: &str) -> Self {
    Value::String(value.to_string())
  }
}

impl From<String> for Value {
  fn from(value: String) -> Self {
    Value::String(value)
  }
}

impl From<PathBuf> for Value {
  fn from(value: PathBuf) -> Self {
    Value::Path(value)
  }
}

impl From<&Path> for Value {
  fn from(value: &Path) -> Self {
    Value::Path(value.to_path_buf())
  }
}

impl From<bool> for Value {
  fn from(value: bool) -> Self {
    Value::Bool(value)
  }
}

impl From<f64> for Value {
  fn from(value: f64) -> Self {
    Value::Number(value)
  }
}

impl<T: Into<Value>> From<Option<T>> for Value {
  fn from(value: Option<T>) -> Self {
    value.map(Into::into).unwrap_or(Value::Unset)
  }
}

/// Errors raised while reading bindings from a context.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvError {
  #[error("unbound variable: {0}")]
  Unbound(String),

  #[error("variable {name} is a {found}, expected {expected}")]
  Type {
    name: String,
    expected: &'static str,
    found: &'static str,
  },

  /// Free-form failure raised by user evaluators.
  #[error("{0}")]
  Custom(String),
}

/// Immutable mapping from variable name to [`Value`].
///
/// `Unset` values are never stored; they only act as deletions when
/// overlaying.
#[derive(Clone, Default, PartialEq)]
pub struct EnvContext(Arc<BTreeMap<String, Value>>);

impl EnvContext {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn from_map(map: BTreeMap<String, Value>) -> Self {
    Self(Arc::new(map.into_iter().filter(|(_, v)| !v.is_unset()).collect()))
  }

  pub fn get(&self, name: &str) -> Option<&Value> {
    self.0.get(name)
  }

  pub fn contains(&self, name: &str) -> bool {
    self.0.contains_key(name)
  }

  /// Look up a binding that must exist.
  pub fn require(&self, name: &str) -> Result<&Value, EnvError> {
    self.get(name).ok_or_else(|| EnvError::Unbound(name.to_string()))
  }

  pub fn require_str(&self, name: &str) -> Result<&str, EnvError> {
    let value = self.require(name)?;
    value.as_str().ok_or_else(|| EnvError::Type {
      name: name.to_string(),
      expected: "string",
      found: value.type_name(),
    })
  }

  pub fn require_path(&self, name: &str) -> Result<&Path, EnvError> {
    let value = self.require(name)?;
    value.as_path().ok_or_else(|| EnvError::Type {
      name: name.to_string(),
      expected: "path",
      found: value.type_name(),
    })
  }

  pub fn require_bool(&self, name: &str) -> Result<bool, EnvError> {
    let value = self.require(name)?;
    value.as_bool().ok_or_else(|| EnvError::Type {
      name: name.to_string(),
      expected: "bool",
      found: value.type_name(),
    })
  }

  /// Return a new context with `name` bound to `value` (or removed if `Unset`).
  pub fn with(&self, name: impl Into<String>, value: impl Into<Value>) -> Self {
    let mut map = (*self.0).clone();
    let name = name.into();
    match value.into() {
      Value::Unset => {
        map.remove(&name);
      }
      value => {
        map.insert(name, value);
      }
    }
    Self(Arc::new(map))
  }

  /// Apply a set of overrides on top of this context.
  pub fn overlay(&self, overrides: &BTreeMap<String, Value>) -> Self {
    if overrides.is_empty() {
      return self.clone();
    }
    let mut map = (*self.0).clone();
    for (name, value) in overrides {
      if value.is_unset() {
        map.remove(name);
      } else {
        map.insert(name.clone(), value.clone());
      }
    }
    Self(Arc::new(map))
  }

  /// Merge `other` over `self`; bindings in `other` win.
  pub fn merge(&self, other: &EnvContext) -> Self {
    if Arc::ptr_eq(&self.0, &other.0) || other.is_empty() {
      return self.clone();
    }
    if self.is_empty() {
      return other.clone();
    }
    let mut map = (*self.0).clone();
    map.extend(other.0.iter().map(|(k, v)| (k.clone(), v.clone())));
    Self(Arc::new(map))
  }

  /// Bindings that differ from `base`, as overrides for [`EnvContext::overlay`].
  ///
  /// Names bound in `base` but missing here come back as `Unset`.
  pub fn changes_from(&self, base: &EnvContext) -> BTreeMap<String, Value> {
    let mut changes: BTreeMap<String, Value> = self
      .iter()
      .filter(|(name, value)| base.get(name) != Some(*value))
      .map(|(name, value)| (name.to_string(), value.clone()))
      .collect();
    for (name, _) in base.iter().filter(|(name, _)| !self.contains(name)) {
      changes.insert(name.to_string(), Value::Unset);
    }
    changes
  }

  pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
    self.0.iter().map(|(k, v)| (k.as_str(), v))
  }

  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  pub fn to_map(&self) -> BTreeMap<String, Value> {
    (*self.0).clone()
  }

  /// Render every binding as a process environment variable.
  pub fn to_process_env(&self) -> BTreeMap<String, String> {
    self.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
  }
}

/// Render step-local overrides for a child process.
///
/// `None` marks a variable to remove from the inherited environment.
pub fn process_overrides(overrides: &BTreeMap<String, Value>) -> BTreeMap<String, Option<String>> {
  overrides
    .iter()
    .map(|(k, v)| {
      let rendered = if v.is_unset() { None } else { Some(v.to_string()) };
      (k.clone(), rendered)
    })
    .collect()
}

impl fmt::Debug for EnvContext {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_map().entries(self.0.iter()).finish()
  }
}

impl Serialize for EnvContext {
  fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    self.0.serialize(serializer)
  }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for EnvContext {
  fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
    Self::from_map(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
  }
}
