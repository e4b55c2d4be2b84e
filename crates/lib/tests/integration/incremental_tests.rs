//! Staleness-driven re-execution across runs.

use std::time::{Duration, SystemTime};

use factory_lib::execute::{SkipReason, StepState};
use factory_lib::{Step, StepId, StepRegistry};

use crate::common::{TestEnv, logged_touch, run_order, serial, sh};

/// `a.o` from `a.c`, `b.o` from `b.c`, `app` linked from both.
fn link_project(env: &TestEnv) -> (StepRegistry, StepId, StepId, StepId) {
  env.write("a.c", "int a;");
  env.write("b.c", "int b;");

  let mut registry = StepRegistry::new();
  let a = registry.register("compile_a", |_| Step::new(logged_touch("A", "a.o").input("a.c")));
  let b = registry.register("compile_b", |_| Step::new(logged_touch("B", "b.o").input("b.c")));
  let c = registry.register("link", move |_| {
    Step::new(
      sh("echo C >> order.log && cat a.o b.o > app")
        .inputs(["a.o", "b.o"])
        .output("app"),
    )
    .requires([a, b])
  });
  (registry, a, b, c)
}

#[tokio::test]
async fn link_runs_in_dependency_order() {
  let env = TestEnv::new();
  let (registry, a, b, c) = link_project(&env);

  let result = env.run(&registry, &[c], serial()).await.unwrap();

  assert!(result.is_success());
  assert_eq!(run_order(&env), vec!["A", "B", "C"]);
  assert_eq!(result.executed().collect::<Vec<_>>(), vec![a, b, c]);
  assert!(env.exists("app"));
}

#[tokio::test]
async fn second_run_spawns_nothing() {
  let env = TestEnv::new();
  let (registry, a, b, c) = link_project(&env);

  env.run(&registry, &[c], serial()).await.unwrap();
  let second = env.run(&registry, &[c], serial()).await.unwrap();

  assert!(second.is_success());
  assert_eq!(second.process_count(), 0);
  for id in [a, b, c] {
    assert_eq!(second.state(id), Some(&StepState::Skipped(SkipReason::UpToDate)));
  }
  assert_eq!(run_order(&env), vec!["A", "B", "C"]);
}

#[tokio::test]
async fn removing_final_output_reruns_only_the_link() {
  let env = TestEnv::new();
  let (registry, _, _, c) = link_project(&env);

  env.run(&registry, &[c], serial()).await.unwrap();
  std::fs::remove_file(env.path("app")).unwrap();

  let second = env.run(&registry, &[c], serial()).await.unwrap();

  assert_eq!(second.executed().collect::<Vec<_>>(), vec![c]);
  assert_eq!(run_order(&env), vec!["A", "B", "C", "C"]);
  assert!(env.exists("app"));
}

#[tokio::test]
async fn touching_an_input_rebuilds_its_descendants() {
  let env = TestEnv::new();
  let (registry, a, _, c) = link_project(&env);

  env.run(&registry, &[c], serial()).await.unwrap();

  let later = SystemTime::now() + Duration::from_secs(60);
  std::fs::File::options()
    .write(true)
    .open(env.path("a.c"))
    .unwrap()
    .set_modified(later)
    .unwrap();

  let second = env.run(&registry, &[c], serial()).await.unwrap();

  // compile_a is stale by mtime, link because an ancestor ran
  assert_eq!(second.executed().collect::<Vec<_>>(), vec![a, c]);
  assert_eq!(run_order(&env), vec!["A", "B", "C", "A", "C"]);
}

#[tokio::test]
async fn missing_output_executes() {
  let env = TestEnv::new();
  let mut registry = StepRegistry::new();
  let gen_step = registry.register("generate", |_| Step::new(logged_touch("gen", "gen/out.txt")));
  std::fs::create_dir(env.path("gen")).unwrap();

  let result = env.run(&registry, &[gen_step], serial()).await.unwrap();
  assert_eq!(result.process_count(), 1);

  std::fs::remove_file(env.path("gen/out.txt")).unwrap();
  let result = env.run(&registry, &[gen_step], serial()).await.unwrap();
  assert_eq!(result.process_count(), 1);
  assert_eq!(run_order(&env), vec!["gen", "gen"]);
}

#[tokio::test]
async fn commands_without_output_always_run() {
  let env = TestEnv::new();
  let mut registry = StepRegistry::new();
  let step = registry.register("announce", |_| Step::new(sh("echo hi >> order.log")));

  env.run(&registry, &[step], serial()).await.unwrap();
  env.run(&registry, &[step], serial()).await.unwrap();

  assert_eq!(run_order(&env), vec!["hi", "hi"]);
}

#[tokio::test]
async fn redirects_and_exit_code_are_reported() {
  let env = TestEnv::new();
  let mut registry = StepRegistry::new();
  let step = registry.register("noisy", |_| {
    Step::new(
      sh("echo to-stdout; echo to-stderr >&2")
        .stdout_file("logs/noisy.out")
        .stderr_file("logs/noisy.err"),
    )
  });

  let result = env.run(&registry, &[step], serial()).await.unwrap();
  let report = result.report(step).unwrap();

  assert_eq!(report.exit_code, Some(0));
  assert_eq!(report.stdout_file.as_deref(), Some(env.path("logs/noisy.out").as_path()));
  assert_eq!(env.read("logs/noisy.out"), "to-stdout\n");
  assert_eq!(env.read("logs/noisy.err"), "to-stderr\n");
}
