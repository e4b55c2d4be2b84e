//! Environment propagation, fresh variables and conditions.

use factory_lib::execute::{ExecuteConfig, SkipReason, StepState};
use factory_lib::util::hash::fresh_token;
use factory_lib::{Action, Command, EnvContext, Expression, Step, StepId, StepRegistry, Value};

use crate::common::{TestEnv, logged_touch, parallel, run_order, serial, sh};

/// Two independent branches of expressions and file writes joined by `report`.
fn branching_project() -> (StepRegistry, StepId) {
  let mut registry = StepRegistry::new();
  let mut tails = Vec::new();

  for branch in ["left", "right"] {
    let base = registry.register(format!("{branch}_base"), move |_| {
      Step::new(Expression::constant(format!("{branch}_value"), branch))
    });
    let write = registry.register(format!("{branch}_write"), move |_| {
      Step::new(Action::deferred(move |env| {
        let value = env.require_str(&format!("{branch}_value"))?.to_string();
        Ok(
          Command::new("/bin/sh")
            .args(["-c", &format!("printf %s {value} > {branch}.txt")])
            .output(format!("{branch}.txt"))
            .into(),
        )
      }))
      .env(format!("{branch}_written"), true)
      .require(base)
    });
    tails.push(write);
  }

  let report = registry.register("report", move |_| {
    Step::new(Expression::new("summary", |env| {
      Ok(Value::from(format!(
        "{}+{}",
        env.require_str("left_value")?,
        env.require_str("right_value")?
      )))
    }))
    .requires(tails.clone())
  });

  (registry, report)
}

#[tokio::test]
async fn parallel_and_serial_runs_agree() {
  let (registry, report) = branching_project();

  let serial_env = TestEnv::new();
  let serial_result = serial_env.run(&registry, &[report], serial()).await.unwrap();

  let parallel_env = TestEnv::new();
  let parallel_result = parallel_env.run(&registry, &[report], parallel(8)).await.unwrap();

  assert!(serial_result.is_success());
  assert!(parallel_result.is_success());
  assert_eq!(serial_result.contexts, parallel_result.contexts);

  for file in ["left.txt", "right.txt"] {
    assert_eq!(serial_env.read(file), parallel_env.read(file));
  }
  assert_eq!(serial_env.read("left.txt"), "left");

  let summary = serial_result.context(report).unwrap();
  assert_eq!(summary.require_str("summary").unwrap(), "left+right");
  assert!(summary.require_bool("left_written").unwrap());
}

#[tokio::test]
async fn config_is_overridden_by_dependencies_then_step_env() {
  let env = TestEnv::new();
  let mut registry = StepRegistry::new();
  let dep = registry.register("dep", |_| Step::new(Expression::constant("profile", "debug")));
  let step = registry.register("step", move |_| {
    Step::new(Expression::new("seen", |env| {
      Ok(Value::from(format!(
        "{}/{}",
        env.require_str("profile")?,
        env.require_str("arch")?
      )))
    }))
    .env("arch", "arm64")
    .require(dep)
  });

  let config: EnvContext = [("profile", "release"), ("arch", "x86_64")].into_iter().collect();
  let result = env.run_with(&registry, &[step], config, serial()).await.unwrap();

  assert_eq!(result.context(step).unwrap().require_str("seen").unwrap(), "debug/arm64");
}

fn rebind(registry: &mut StepRegistry) -> StepId {
  registry.register("rebind", |_| Step::new(Expression::constant("profile", "debug")))
}

fn plain(registry: &mut StepRegistry) -> StepId {
  registry.register("plain", |_| Step::new(Expression::constant("other", "x")))
}

/// `rebind` sets `profile` and `plain` leaves it alone; `reader` requires both.
fn fan_in_project(rebind_first: bool) -> (StepRegistry, StepId) {
  let mut registry = StepRegistry::new();
  let deps = if rebind_first {
    let a = rebind(&mut registry);
    [a, plain(&mut registry)]
  } else {
    let b = plain(&mut registry);
    [rebind(&mut registry), b]
  };

  let reader = registry.register("reader", move |_| {
    Step::new(Expression::new("seen", |env| Ok(env.require("profile")?.clone()))).requires(deps)
  });
  (registry, reader)
}

#[tokio::test]
async fn dependency_binding_beats_config_on_fan_in() {
  let config: EnvContext = [("profile", "release")].into_iter().collect();

  for rebind_first in [true, false] {
    let env = TestEnv::new();
    let (registry, reader) = fan_in_project(rebind_first);
    let result = env.run_with(&registry, &[reader], config.clone(), serial()).await.unwrap();

    assert_eq!(
      result.context(reader).unwrap().require_str("seen").unwrap(),
      "debug",
      "rebind registered first: {rebind_first}"
    );
  }
}

#[tokio::test]
async fn later_dependency_wins_when_both_rebind() {
  let env = TestEnv::new();
  let mut registry = StepRegistry::new();
  let first = registry.register("first", |_| Step::new(Expression::constant("profile", "debug")));
  let second = registry.register("second", |_| Step::new(Expression::constant("profile", "bench")));
  let reader = registry.register("reader", move |_| {
    Step::new(Expression::new("seen", |env| Ok(env.require("profile")?.clone()))).requires([first, second])
  });

  let config: EnvContext = [("profile", "release")].into_iter().collect();
  let result = env.run_with(&registry, &[reader], config, serial()).await.unwrap();

  assert_eq!(result.context(reader).unwrap().require_str("seen").unwrap(), "bench");
}

#[tokio::test]
async fn up_to_date_step_keeps_its_bindings_for_dependents() {
  let env = TestEnv::new();
  let mut registry = StepRegistry::new();
  let generate = registry.register("gen", |_| {
    Step::new(Command::new("touch").arg("gen.txt").output("gen.txt"))
      .env("gen_out", "gen.txt")
      .freshvar("scratch")
  });
  let consume = registry.register("use", move |_| {
    Step::new(Expression::new("seen", |env| {
      Ok(Value::from(format!(
        "{}:{}",
        env.require_str("gen_out")?,
        env.require_str("scratch")?
      )))
    }))
    .require(generate)
  });

  let first = env.run(&registry, &[consume], serial()).await.unwrap();
  let second = env.run(&registry, &[consume], serial()).await.unwrap();

  assert!(first.is_success());
  assert!(second.is_success(), "second run: {:?}", second.state(consume));
  assert_eq!(second.state(generate), Some(&StepState::Skipped(SkipReason::UpToDate)));
  assert_eq!(second.process_count(), 0);

  let token = fresh_token(7, generate, "gen");
  assert_eq!(
    second.context(consume).unwrap().require_str("seen").unwrap(),
    format!("gen.txt:{token}")
  );
  assert_eq!(first.contexts, second.contexts);
}

#[tokio::test]
async fn rerun_contexts_match_first_run() {
  let env = TestEnv::new();
  let (registry, report) = branching_project();

  let first = env.run(&registry, &[report], serial()).await.unwrap();
  let second = env.run(&registry, &[report], parallel(4)).await.unwrap();

  assert!(first.is_success());
  assert!(second.is_success());
  assert_eq!(first.process_count(), 2);
  assert_eq!(second.process_count(), 0);
  assert_eq!(first.contexts, second.contexts);
}

#[tokio::test]
async fn step_env_reaches_the_process() {
  let env = TestEnv::new();
  let mut registry = StepRegistry::new();
  let step = registry.register("print", |_| {
    Step::new(sh("printf '%s:%s' \"$OPT_LEVEL\" \"${DROPPED-gone}\" > env.txt").output("env.txt"))
      .env("OPT_LEVEL", 3.0)
      .env("DROPPED", Value::Unset)
  });

  let config: EnvContext = [("DROPPED", "present")].into_iter().collect();
  env.run_with(&registry, &[step], config, serial()).await.unwrap();

  assert_eq!(env.read("env.txt"), "3:gone");
}

#[tokio::test]
async fn fresh_variables_are_unique_and_seeded() {
  let env = TestEnv::new();
  let mut registry = StepRegistry::new();

  let mut ids = Vec::new();
  for name in ["first", "second"] {
    let id = registry.register(name, |_| {
      Step::new(Action::deferred(|env| {
        let token = env.require_str("scratch")?;
        Ok(Command::new("touch").arg(format!("{token}.tmp")).into())
      }))
      .freshvar("scratch")
    });
    ids.push(id);
  }

  let result = env.run(&registry, &ids, serial()).await.unwrap();
  assert!(result.is_success());

  let first = fresh_token(7, ids[0], "first");
  let second = fresh_token(7, ids[1], "second");
  assert_ne!(first, second);
  assert!(env.exists(&format!("{first}.tmp")));
  assert!(env.exists(&format!("{second}.tmp")));
  assert_eq!(result.context(ids[0]).unwrap().require_str("scratch").unwrap(), first);
}

#[tokio::test]
async fn false_condition_skips_without_forcing_dependents() {
  let env = TestEnv::new();
  env.write("b.txt", "already built");

  let mut registry = StepRegistry::new();
  let optional = registry.register("optional", |_| {
    Step::new(logged_touch("optional", "a.txt")).condition_with(|env| Ok(env.get("enable").is_some()))
  });
  let dependent = registry.register("dependent", move |_| Step::new(logged_touch("dependent", "b.txt")).require(optional));

  let result = env.run(&registry, &[dependent], serial()).await.unwrap();

  assert!(result.is_success());
  assert_eq!(result.state(optional), Some(&StepState::Skipped(SkipReason::Condition)));
  assert_eq!(result.state(dependent), Some(&StepState::Skipped(SkipReason::UpToDate)));
  assert_eq!(result.process_count(), 0);
  assert!(run_order(&env).is_empty());
}

#[tokio::test]
async fn refresh_reruns_everything() {
  let env = TestEnv::new();
  let mut registry = StepRegistry::new();
  let step = registry.register("gen", |_| Step::new(logged_touch("gen", "gen.txt")));

  env.run(&registry, &[step], serial()).await.unwrap();
  let refreshed = env
    .run(
      &registry,
      &[step],
      ExecuteConfig {
        refresh: true,
        ..serial()
      },
    )
    .await
    .unwrap();

  assert_eq!(refreshed.process_count(), 1);
  assert_eq!(run_order(&env), vec!["gen", "gen"]);
}
