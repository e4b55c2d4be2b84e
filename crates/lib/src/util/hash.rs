//! Hashing utilities for fresh-variable tokens.
//!
//! A fresh variable is a build-unique token bound for one step instance,
//! typically used to name transient outputs. Tokens are a truncated SHA-256 of
//! the run seed, the step id and the step name, so a fixed seed reproduces the
//! same tokens while different steps never share one.

use sha2::{Digest, Sha256};

use crate::step::StepId;

/// Number of hex characters kept from the digest.
pub const FRESH_TOKEN_LEN: usize = 16;

/// Derive the fresh-variable token for a step.
pub fn fresh_token(seed: u64, id: StepId, name: &str) -> String {
  let mut hasher = Sha256::new();
  hasher.update(seed.to_le_bytes());
  hasher.update((id.index() as u64).to_le_bytes());
  hasher.update(name.as_bytes());
  let full = hex::encode(hasher.finalize());
  full[..FRESH_TOKEN_LEN].to_string()
}

/// Seed for runs that did not configure one.
pub fn run_seed() -> u64 {
  rand::random()
}
