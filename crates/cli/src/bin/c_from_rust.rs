//! Link a C program against a Rust `cdylib`.
//!
//! Run from (or with `--root-dir` pointing at) `crates/cli/demos/c_from_rust`.
//! The C compiler is taken from the `cc` variable, `gcc` by default:
//!
//! ```toml
//! [vars]
//! cc = "clang"
//! ```

use std::collections::BTreeMap;
use std::env::consts::{DLL_PREFIX, DLL_SUFFIX};
use std::path::Path;
use std::process::ExitCode;

use anyhow::{Context, Result};

use factory_cli::Project;
use factory_lib::{Command, EnvContext, ProducerContext, Step, StepId, StepRegistry};

const LIB_NAME: &str = "example";

struct CFromRust;

fn compiler(ctx: &ProducerContext) -> String {
  ctx
    .config()
    .get("cc")
    .and_then(|v| v.as_str())
    .unwrap_or("gcc")
    .to_string()
}

fn rust_library() -> String {
  format!("target/release/{DLL_PREFIX}{LIB_NAME}{DLL_SUFFIX}")
}

impl Project for CFromRust {
  fn name(&self) -> &'static str {
    "c-from-rust"
  }

  fn init_fs(&self, root_dir: &Path, _config: &EnvContext) -> Result<()> {
    let target = root_dir.join("target");
    std::fs::create_dir_all(&target).with_context(|| format!("Failed to create {}", target.display()))
  }

  fn register(&self, registry: &mut StepRegistry) -> BTreeMap<String, StepId> {
    let build_rust = registry.register("build_rust", |_| {
      Step::new(
        Command::new("cargo")
          .args(["build", "--release"])
          .inputs(["src", "Cargo.toml"])
          .output(rust_library()),
      )
      .note("cargo build of the Rust library")
    });

    let build_c = registry.register("build_c", |ctx| {
      Step::new(
        Command::new(compiler(ctx))
          .args(["-c", "src/example.c", "-o", "target/example.o"])
          .input("src/example.c")
          .output("target/example.o"),
      )
    });

    let link = registry.register("link", move |ctx| {
      // link order matters: objects before the libraries they use
      let objects = ["target/example.o".to_string(), rust_library()];
      Step::new(
        Command::new(compiler(ctx))
          .args(["-o", "target/example"])
          .args(&objects)
          .inputs(objects.clone())
          .output("target/example"),
      )
      .requires([build_rust, build_c])
    });

    BTreeMap::from([
      ("build_c".to_string(), build_c),
      ("build_rust".to_string(), build_rust),
      ("link".to_string(), link),
    ])
  }
}

fn main() -> ExitCode {
  factory_cli::main(CFromRust)
}
