//! Minimal project: scaffold a directory, create a file in it, check it exists.

use std::collections::BTreeMap;
use std::path::Path;
use std::process::ExitCode;

use anyhow::{Context, Result};

use factory_cli::Project;
use factory_lib::{Assertion, Command, EnvContext, Step, StepId, StepRegistry};

const EXAMPLE_DIR: &str = "example_dir";

struct Scaffold;

impl Project for Scaffold {
  fn name(&self) -> &'static str {
    "scaffold"
  }

  fn init(&self, config: EnvContext, seed: u64) -> Result<EnvContext> {
    Ok(config.with("build_tag", format!("build-{:04}", seed % 10_000)))
  }

  fn init_fs(&self, root_dir: &Path, _config: &EnvContext) -> Result<()> {
    let dir = root_dir.join(EXAMPLE_DIR);
    std::fs::create_dir_all(&dir).with_context(|| format!("Failed to create {}", dir.display()))
  }

  fn register(&self, registry: &mut StepRegistry) -> BTreeMap<String, StepId> {
    let touch_first = registry.register("touch_first", |_| {
      let file = format!("{EXAMPLE_DIR}/test.txt");
      Step::new(Command::new("touch").arg(&file).output(&file)).note("create the example file")
    });

    let all = registry.register("all", move |ctx| {
      let file = ctx.path(format!("{EXAMPLE_DIR}/test.txt"));
      Step::new(Assertion::check(
        move |_| Ok(file.exists()),
        "example_dir/test.txt was not created",
      ))
      .require(touch_first)
    });

    BTreeMap::from([
      ("all".to_string(), all),
      ("touch_first".to_string(), touch_first),
    ])
  }
}

fn main() -> ExitCode {
  factory_cli::main(Scaffold)
}
