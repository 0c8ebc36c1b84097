//! Runs the test cases embedded in step definitions.
//!
//! Every test gets its own temporary sandbox. Commands always run with the
//! sandbox as their working directory, whatever `dir` the step declares, and
//! files named by the test are passed relative to it.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use eyre::bail;
use indexmap::{IndexMap, IndexSet};
use similar::TextDiff;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::{
    Result,
    config::Config,
    error::Error,
    step::{CommandOutcome, CommandTemplate, RunType, Step, run_command},
    step_test::StepTest,
};

#[derive(Debug, Clone)]
pub struct TestCase {
    pub step: Step,
    pub name: String,
    pub test: StepTest,
}

#[derive(Debug, Clone)]
pub struct TestResult {
    pub step: String,
    pub name: String,
    pub ok: bool,
    pub stdout: String,
    pub stderr: String,
    pub code: i32,
    pub elapsed: Duration,
    pub reasons: Vec<String>,
}

/// Test cases of every step in `config`, narrowed to the given step and test
/// names when any are given. A step shared by several hooks is tested once.
pub fn collect(config: &Config, steps: &[String], names: &[String]) -> Vec<TestCase> {
    let mut seen = IndexSet::new();
    let mut cases = vec![];
    for hook in config.hooks.values() {
        for step in hook.steps.values() {
            if !steps.is_empty() && !steps.contains(&step.name) {
                continue;
            }
            for (name, test) in &step.tests {
                if !names.is_empty() && !names.contains(name) {
                    continue;
                }
                let sig = format!(
                    "{}::{name}::{}",
                    step.name,
                    serde_json::to_string(step).unwrap_or_default()
                );
                if seen.insert(sig) {
                    cases.push(TestCase {
                        step: step.clone(),
                        name: name.clone(),
                        test: test.clone(),
                    });
                }
            }
        }
    }
    cases
}

/// Runs `cases` with at most `jobs` at a time. Results keep the order of
/// `cases`. `root` is where fixture directories are looked up.
pub async fn run_all(cases: Vec<TestCase>, jobs: usize, root: &Path) -> Vec<TestResult> {
    let semaphore = Arc::new(Semaphore::new(jobs.max(1)));
    let mut set = JoinSet::new();
    let count = cases.len();
    for (idx, case) in cases.into_iter().enumerate() {
        let semaphore = semaphore.clone();
        let root = root.to_path_buf();
        set.spawn(async move {
            let _permit = semaphore.acquire_owned().await;
            let result = match run_test(&case.step, &case.name, &case.test, &root).await {
                Ok(result) => result,
                Err(err) => TestResult {
                    step: case.step.name.clone(),
                    name: case.name.clone(),
                    ok: false,
                    stdout: String::new(),
                    stderr: String::new(),
                    code: 1,
                    elapsed: Duration::ZERO,
                    reasons: vec![format!("{err:#}")],
                },
            };
            (idx, result)
        });
    }
    let mut results: Vec<Option<TestResult>> = vec![None; count];
    while let Some(res) = set.join_next().await {
        match res {
            Ok((idx, result)) => results[idx] = Some(result),
            Err(err) => warn!("test task failed: {err}"),
        }
    }
    results.into_iter().flatten().collect()
}

/// Prints one line per test and fails with [`Error::TestsFailed`] if any failed.
pub fn report(results: &[TestResult]) -> Result<()> {
    let mut failures = 0;
    for r in results {
        if r.ok {
            println!("ok - {} :: {} ({}ms)", r.step, r.name, r.elapsed.as_millis());
            continue;
        }
        failures += 1;
        eprintln!(
            "not ok - {} :: {} (code={}; {}ms)",
            r.step,
            r.name,
            r.code,
            r.elapsed.as_millis()
        );
        for reason in &r.reasons {
            eprintln!("  {reason}");
        }
        if !r.stdout.is_empty() {
            eprintln!("  stdout:\n{}", r.stdout);
        }
        if !r.stderr.is_empty() {
            eprintln!("  stderr:\n{}", r.stderr);
        }
    }
    if failures > 0 {
        return Err(Error::TestsFailed(failures).into());
    }
    Ok(())
}

#[tracing::instrument(level = "info", name = "step.test", skip_all, fields(step = %step.name, test = %name))]
pub async fn run_test(step: &Step, name: &str, test: &StepTest, root: &Path) -> Result<TestResult> {
    let started = Instant::now();
    let tmp = tempfile::tempdir()?;
    let sandbox = tmp.path().to_path_buf();

    if let Some(fixture) = &test.fixture {
        xx::file::copy_dir_all(&root.join(fixture), &sandbox)?;
    }
    for (rel, contents) in &test.write {
        xx::file::write(&sandbox.join(rel), contents)?;
    }
    let files: Vec<PathBuf> = match &test.files {
        Some(files) => files.iter().map(PathBuf::from).collect(),
        None => test.write.keys().map(PathBuf::from).collect(),
    };
    let mut env = step.env.clone();
    env.extend(test.env.iter().map(|(k, v)| (k.clone(), v.clone())));

    let script = match RunType::from(test.run) {
        RunType::Check => step.check_script(),
        RunType::Fix => step.fix.as_ref(),
    };
    let Some(script) = script else {
        bail!("{step}: no {} command for test {name}", test.run);
    };

    let mut reasons = vec![];
    if let Some(before) = &test.before {
        let outcome = sandboxed(step, before, &files, &sandbox, &env).await?;
        if !outcome.passed {
            let code = exit_code(&outcome);
            return Ok(TestResult {
                step: step.name.clone(),
                name: name.to_string(),
                ok: false,
                stdout: outcome.stdout,
                stderr: outcome.stderr,
                code,
                elapsed: started.elapsed(),
                reasons: vec![format!("before failed with code {code}")],
            });
        }
    }

    let outcome = sandboxed(step, &script.to_string(), &files, &sandbox, &env).await?;
    let code = exit_code(&outcome);

    if let Some(after) = &test.after {
        let after = sandboxed(step, after, &files, &sandbox, &env).await?;
        if !after.passed {
            reasons.push(format!("after failed with code {}", exit_code(&after)));
        }
    }
    if code != test.expect.code {
        reasons.push(format!("exit code {code} != expected {}", test.expect.code));
    }
    if let Some(needle) = &test.expect.stdout
        && !outcome.stdout.contains(needle)
    {
        reasons.push(format!("stdout missing: {needle}"));
    }
    if let Some(needle) = &test.expect.stderr
        && !outcome.stderr.contains(needle)
    {
        reasons.push(format!("stderr missing: {needle}"));
    }
    for (rel, expected) in &test.expect.files {
        let path = sandbox.join(rel);
        let actual = match xx::file::read_to_string(&path) {
            Ok(actual) => actual,
            Err(err) => {
                reasons.push(format!("{rel}: {err}"));
                continue;
            }
        };
        if &actual != expected {
            reasons.push(format!("file mismatch: {rel}\n{}", unified_diff(expected, &actual)));
        }
    }

    Ok(TestResult {
        step: step.name.clone(),
        name: name.to_string(),
        ok: reasons.is_empty(),
        stdout: outcome.stdout,
        stderr: outcome.stderr,
        code,
        elapsed: started.elapsed(),
        reasons,
    })
}

async fn sandboxed(
    step: &Step,
    script: &str,
    files: &[PathBuf],
    sandbox: &Path,
    env: &IndexMap<String, String>,
) -> Result<CommandOutcome> {
    let argv = CommandTemplate::parse(script)?.argv(step.shell.as_ref(), files);
    Ok(run_command(&step.name, &argv, sandbox, env, None).await)
}

fn exit_code(outcome: &CommandOutcome) -> i32 {
    outcome
        .code
        .unwrap_or(if outcome.passed { 0 } else { 1 })
}

fn unified_diff(expected: &str, actual: &str) -> String {
    TextDiff::from_lines(expected, actual)
        .unified_diff()
        .context_radius(3)
        .header("expected", "actual")
        .to_string()
}
