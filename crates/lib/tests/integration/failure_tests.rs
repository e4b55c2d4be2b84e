//! Node-local failures and failure policies.

use std::time::{Duration, Instant};

use factory_lib::execute::{ExecuteError, FailurePolicy, StepState};
use factory_lib::{Assertion, Command, Step, StepId, StepRegistry};

use crate::common::{TestEnv, logged_touch, parallel, run_order, serial, sh, with_policy};

#[tokio::test]
async fn false_assertion_fails_with_its_message() {
  let env = TestEnv::new();
  let mut registry = StepRegistry::new();
  let check = registry.register("check", |_| Step::new(Assertion::new(false, "bad")).note("sanity check"));
  let after = registry.register("after", move |_| Step::new(logged_touch("after", "after.txt")).require(check));

  let result = env.run(&registry, &[after], serial()).await.unwrap();

  assert!(!result.is_success());
  let failure = result.first_failure().unwrap();
  assert_eq!(failure.id, check);
  assert_eq!(failure.note.as_deref(), Some("sanity check"));
  assert_eq!(failure.error(), Some(&ExecuteError::AssertionFailed("bad".into())));
  assert_eq!(failure.error().unwrap().to_string(), "assertion failed: bad");

  assert!(result.state(after).unwrap().is_failed());
  assert!(!env.exists("after.txt"));
  assert!(run_order(&env).is_empty());
}

#[tokio::test]
async fn non_zero_exit_is_recorded() {
  let env = TestEnv::new();
  let mut registry = StepRegistry::new();
  let step = registry.register("compile", |_| {
    Step::new(sh("echo 'a.c:1: error' >&2; exit 4").stderr_file("compile.err"))
  });

  let result = env.run(&registry, &[step], serial()).await.unwrap();
  let report = result.report(step).unwrap();

  assert_eq!(report.exit_code, Some(4));
  assert!(report.ran_process);
  match report.error() {
    Some(ExecuteError::CommandFailed { code, stderr, stderr_file, .. }) => {
      assert_eq!(*code, Some(4));
      assert_eq!(stderr.trim(), "a.c:1: error");
      assert_eq!(stderr_file.as_deref(), Some(env.path("compile.err").as_path()));
    }
    other => panic!("expected command failure, got {other:?}"),
  }
}

#[tokio::test]
async fn missing_program_is_a_spawn_error() {
  let env = TestEnv::new();
  let mut registry = StepRegistry::new();
  let step = registry.register("tool", |_| Step::new(Command::new("no-such-tool-9c1e").output("x")));

  let result = env.run(&registry, &[step], serial()).await.unwrap();
  let report = result.report(step).unwrap();

  assert!(matches!(report.error(), Some(ExecuteError::Spawn { .. })));
  assert!(!report.ran_process);
  assert_eq!(result.process_count(), 0);
}

/// `broken` fails; `independent` and `later` do not depend on it.
fn split_project() -> (StepRegistry, StepId, StepId, StepId, StepId) {
  let mut registry = StepRegistry::new();
  let broken = registry.register("broken", |_| Step::new(sh("exit 1")));
  let downstream = registry.register("downstream", move |_| {
    Step::new(logged_touch("downstream", "downstream.txt")).require(broken)
  });
  let independent = registry.register("independent", |_| Step::new(logged_touch("independent", "independent.txt")));
  let later = registry.register("later", move |_| {
    Step::new(logged_touch("later", "later.txt")).require(independent)
  });
  (registry, broken, downstream, independent, later)
}

#[tokio::test]
async fn continue_runs_unaffected_branches() {
  let env = TestEnv::new();
  let (registry, broken, downstream, independent, later) = split_project();

  let result = env
    .run(
      &registry,
      &[downstream, later],
      with_policy(serial(), FailurePolicy::Continue),
    )
    .await
    .unwrap();

  assert_eq!(result.failures, vec![broken]);
  assert_eq!(
    result.state(downstream),
    Some(&StepState::Failed(ExecuteError::DependencyFailed("broken".into())))
  );
  assert_eq!(result.state(independent), Some(&StepState::Succeeded));
  assert_eq!(result.state(later), Some(&StepState::Succeeded));
  assert_eq!(run_order(&env), vec!["independent", "later"]);
}

#[tokio::test]
async fn drain_stops_scheduling_after_a_failure() {
  let env = TestEnv::new();
  let (registry, broken, downstream, independent, later) = split_project();

  let result = env
    .run(&registry, &[downstream, later], with_policy(serial(), FailurePolicy::Drain))
    .await
    .unwrap();

  assert_eq!(result.failures, vec![broken]);
  assert!(result.state(downstream).unwrap().is_failed());
  assert_eq!(result.state(independent), Some(&StepState::Cancelled));
  assert_eq!(result.state(later), Some(&StepState::Cancelled));
  assert!(run_order(&env).is_empty());
}

#[tokio::test]
async fn drain_lets_running_steps_finish() {
  let env = TestEnv::new();
  let mut registry = StepRegistry::new();
  let slow = registry.register("slow", |_| Step::new(sh("sleep 0.3 && touch slow.txt").output("slow.txt")));
  let broken = registry.register("broken", |_| Step::new(Assertion::new(false, "broken")));
  let queued = registry.register("queued", |_| Step::new(logged_touch("queued", "queued.txt")));

  let result = env
    .run(&registry, &[slow, broken, queued], with_policy(parallel(2), FailurePolicy::Drain))
    .await
    .unwrap();

  assert_eq!(result.failures, vec![broken]);
  assert_eq!(result.state(slow), Some(&StepState::Succeeded));
  assert_eq!(result.state(queued), Some(&StepState::Cancelled));
  assert!(env.exists("slow.txt"));
  assert!(!env.exists("queued.txt"));
}

#[tokio::test]
async fn abort_kills_running_steps() {
  let env = TestEnv::new();
  let mut registry = StepRegistry::new();
  let slow = registry.register("slow", |_| Step::new(sh("sleep 5 && touch slow.txt").output("slow.txt")));
  let broken = registry.register("broken", |_| Step::new(Assertion::new(false, "broken")));

  let start = Instant::now();
  let result = env
    .run(&registry, &[slow, broken], with_policy(parallel(2), FailurePolicy::Abort))
    .await
    .unwrap();

  assert!(start.elapsed() < Duration::from_secs(4));
  assert_eq!(result.failures, vec![broken]);
  assert_eq!(result.state(slow), Some(&StepState::Cancelled));
  assert!(!env.exists("slow.txt"));
}
