//! Placeholder parsing and rendering for message templates.
//!
//! Assertion messages (and any other text a producer wants to render late) can
//! reference context variables that are only known once the engine reaches the
//! step.
//!
//! # Placeholder Format
//!
//! - `${name}` - the value bound to `name` in the step's environment context
//!
//! Single `$` characters pass through unchanged, so shell variables like
//! `$HOME` need no escaping.
//!
//! # Escaping
//!
//! Use `$${` to produce a literal `${`.
//!
//! # Example
//!
//! ```
//! use factory_lib::placeholder::{parse, Segment};
//!
//! let segments = parse("missing ${output} in $HOME").unwrap();
//! assert_eq!(segments, vec![
//!     Segment::Literal("missing ".to_string()),
//!     Segment::Variable("output".to_string()),
//!     Segment::Literal(" in $HOME".to_string()),
//! ]);
//! ```

use thiserror::Error;

use crate::env::EnvContext;

/// A segment of parsed text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
  /// Literal text (no placeholders)
  Literal(String),

  /// A variable reference to be resolved
  Variable(String),
}

/// Errors that can occur during placeholder parsing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlaceholderError {
  #[error("unclosed placeholder at position {0}")]
  Unclosed(usize),

  #[error("empty placeholder at position {0}")]
  Empty(usize),
}

/// Trait for resolving variable values during rendering.
pub trait Resolver {
  fn resolve(&self, name: &str) -> Option<String>;
}

impl Resolver for EnvContext {
  fn resolve(&self, name: &str) -> Option<String> {
    self.get(name).map(ToString::to_string)
  }
}

/// Parse a string containing placeholders into segments.
///
/// # Errors
///
/// Returns an error if a placeholder is unclosed or empty.
pub fn parse(input: &str) -> Result<Vec<Segment>, PlaceholderError> {
  let mut segments = Vec::new();
  let mut literal = String::new();
  let mut chars = input.char_indices().peekable();

  while let Some((pos, ch)) = chars.next() {
    if ch != '$' {
      literal.push(ch);
      continue;
    }

    match chars.peek() {
      Some((_, '$')) => {
        chars.next(); // consume the second $
        if let Some((_, '{')) = chars.peek() {
          // Escaped: $${ -> ${ (literal)
          chars.next();
          literal.push_str("${");
        } else {
          literal.push_str("$$");
        }
      }
      Some((_, '{')) => {
        chars.next(); // consume the {

        if !literal.is_empty() {
          segments.push(Segment::Literal(std::mem::take(&mut literal)));
        }

        let mut name = String::new();
        let mut found_close = false;
        for (_, c) in chars.by_ref() {
          if c == '}' {
            found_close = true;
            break;
          }
          name.push(c);
        }

        if !found_close {
          return Err(PlaceholderError::Unclosed(pos));
        }
        let name = name.trim();
        if name.is_empty() {
          return Err(PlaceholderError::Empty(pos));
        }
        segments.push(Segment::Variable(name.to_string()));
      }
      _ => literal.push('$'),
    }
  }

  if !literal.is_empty() {
    segments.push(Segment::Literal(literal));
  }

  Ok(segments)
}

/// Best-effort rendering for diagnostics.
///
/// Unknown variables are left as `${name}` and a malformed template is
/// returned verbatim, so rendering an error message never fails.
pub fn render(input: &str, resolver: &impl Resolver) -> String {
  let Ok(segments) = parse(input) else {
    return input.to_string();
  };

  segments
    .iter()
    .map(|segment| match segment {
      Segment::Literal(s) => s.clone(),
      Segment::Variable(name) => resolver.resolve(name).unwrap_or_else(|| format!("${{{}}}", name)),
    })
    .collect()
}
