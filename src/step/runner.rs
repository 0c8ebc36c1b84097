//! Runs one rendered step command.

use std::path::Path;

use ensembler::CmdLineRunner;
use indexmap::IndexMap;

use crate::error::Error;

/// What a single command invocation produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutcome {
    pub passed: bool,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub combined: String,
}

/// Runs `argv` in `dir` with `env` layered over the process environment.
///
/// A non-zero exit is a failed outcome, not an error. A command that cannot
/// be started at all also comes back as a failed outcome carrying the
/// [`Error::ToolInvocation`] message, so a missing tool fails its step
/// instead of the run.
pub async fn run_command(
    step: &str,
    argv: &[String],
    dir: &Path,
    env: &IndexMap<String, String>,
    stdin: Option<&str>,
) -> CommandOutcome {
    let Some((program, args)) = argv.split_first() else {
        return invocation_failure(step, "", "empty command".into());
    };
    let mut cmd = CmdLineRunner::new(program)
        .current_dir(dir)
        .show_stderr_on_error(false);
    for arg in args {
        cmd = cmd.arg(arg);
    }
    for (key, value) in env {
        cmd = cmd.env(key, value);
    }
    if let Some(stdin) = stdin {
        cmd = cmd.stdin_string(stdin);
    }
    trace!("{step}: $ {}", argv.join(" "));
    match cmd.execute().await {
        Ok(result) => CommandOutcome {
            passed: true,
            code: result.status.code(),
            stdout: result.stdout,
            stderr: result.stderr,
            combined: result.combined_output,
        },
        Err(ensembler::Error::ScriptFailed(e)) => {
            let result = e.3;
            debug!("{step}: exited with {:?}", result.status.code());
            CommandOutcome {
                passed: false,
                code: result.status.code(),
                stdout: result.stdout,
                stderr: result.stderr,
                combined: result.combined_output,
            }
        }
        Err(err) => {
            let command = argv.last().map(String::as_str).unwrap_or_default();
            invocation_failure(step, command, err.to_string())
        }
    }
}

fn invocation_failure(step: &str, command: &str, message: String) -> CommandOutcome {
    let err = Error::ToolInvocation {
        step: step.to_string(),
        command: command.to_string(),
        message,
    };
    warn!("{err}");
    CommandOutcome {
        passed: false,
        code: None,
        stderr: err.to_string(),
        combined: err.to_string(),
        ..Default::default()
    }
}
