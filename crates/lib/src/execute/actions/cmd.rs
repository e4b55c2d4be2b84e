//! Command action implementation.
//!
//! Spawns the command's program directly (no shell) with the parent
//! environment plus step and command overrides, captures its output and
//! writes the requested redirect files.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;
use std::process::Stdio;

use tracing::debug;

use crate::execute::types::ExecuteError;
use crate::step::Command;

/// Captured result of a successful command.
#[derive(Debug, Clone, Default)]
pub struct CmdOutput {
  pub code: Option<i32>,
  pub stdout: Vec<u8>,
  pub stderr: Vec<u8>,
}

/// Execute a command and wait for it.
///
/// # Arguments
///
/// * `cmd` - The command, with paths already resolved against the build root
/// * `overrides` - Step-level process environment; `None` removes a variable
/// * `transparent` - Echo captured output to our own stdout/stderr
///
/// The child is killed if the returned future is dropped.
pub async fn run_command(
  cmd: &Command,
  overrides: &BTreeMap<String, Option<String>>,
  transparent: bool,
) -> Result<CmdOutput, ExecuteError> {
  let Some((program, args)) = cmd.args.split_first() else {
    return Err(ExecuteError::Spawn {
      program: String::new(),
      message: "empty argument list".to_string(),
    });
  };
  let program_name = program.to_string_lossy().to_string();

  let mut command = tokio::process::Command::new(program);
  command
    .args(args)
    .stdin(Stdio::null())
    .stdout(Stdio::piped())
    .stderr(Stdio::piped())
    .kill_on_drop(true);

  if let Some(cwd) = &cmd.cwd {
    if !cwd.is_dir() {
      return Err(ExecuteError::Spawn {
        program: program_name,
        message: format!("working directory {} does not exist", cwd.display()),
      });
    }
    command.current_dir(cwd);
  }

  for (key, value) in overrides {
    match value {
      Some(value) => command.env(key, value),
      None => command.env_remove(key),
    };
  }
  for (key, value) in &cmd.env {
    command.env(key, value);
  }

  debug!(cmd = %cmd, cwd = ?cmd.cwd, "spawning process");

  let output = command.output().await.map_err(|e| ExecuteError::Spawn {
    program: program_name,
    message: e.to_string(),
  })?;

  if let Some(path) = &cmd.stdout_file {
    write_redirect(path, &output.stdout).await?;
  }
  if let Some(path) = &cmd.stderr_file {
    write_redirect(path, &output.stderr).await?;
  }

  if transparent {
    echo(&output.stdout, &output.stderr);
  }

  if !output.status.success() {
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    if !stderr.is_empty() {
      debug!(stderr = %stderr, "command stderr");
    }

    return Err(ExecuteError::CommandFailed {
      cmd: cmd.to_string(),
      code: output.status.code(),
      stderr,
      stderr_file: cmd.stderr_file.clone(),
    });
  }

  Ok(CmdOutput {
    code: output.status.code(),
    stdout: output.stdout,
    stderr: output.stderr,
  })
}

async fn write_redirect(path: &Path, contents: &[u8]) -> Result<(), ExecuteError> {
  let io_err = |e: std::io::Error| ExecuteError::Io {
    path: path.to_path_buf(),
    message: e.to_string(),
  };

  if let Some(parent) = path.parent() {
    tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
  }
  tokio::fs::write(path, contents).await.map_err(io_err)
}

fn echo(stdout: &[u8], stderr: &[u8]) {
  // write errors are ignored
  let _ = std::io::stdout().lock().write_all(stdout);
  let _ = std::io::stderr().lock().write_all(stderr);
}
