//! Engine integration tests.
//!
//! Each module builds a small project in a temporary directory and runs it
//! through `run_build`, checking both the reported states and the files left
//! on disk. Commands go through `/bin/sh`, so these only run on unix.

#![cfg(unix)]

mod common;
mod context_tests;
mod failure_tests;
mod incremental_tests;
