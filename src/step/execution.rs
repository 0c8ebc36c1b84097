//! The per-step unit of work: skip rules, condition, check/fix plan,
//! profiles, cache, restaging and the step's output block.
//!
//! Each step runs its whole sequence inside its own task so a slow check in
//! one step never holds up another step's check and fix.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use chrono::Utc;
use clx::progress::ProgressStatus;
use indexmap::IndexMap;

use crate::Result;
use crate::cache::{CacheEntry, CacheKey};
use crate::hash;
use crate::hook::{HookContext, SkipReason};
use crate::output::StepBlock;

use super::command::CommandTemplate;
use super::runner::{CommandOutcome, run_command};
use super::types::{OutputSummary, RunType, Script, Step};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepStatus {
    Passed,
    Failed(String),
    Skipped(SkipReason),
    Errored(String),
    /// Abandoned by fail-fast before it started
    NotRun,
}

impl StepStatus {
    pub fn is_failure(&self) -> bool {
        matches!(self, StepStatus::Failed(_) | StepStatus::Errored(_))
    }
}

#[derive(Debug, Clone)]
pub struct StepResult {
    pub name: String,
    pub status: StepStatus,
    /// The step's output block as it was sent to the writer
    pub output: String,
    pub elapsed: Duration,
    /// Files this step added back to the index
    pub staged: Vec<PathBuf>,
}

impl StepResult {
    pub fn new(name: &str, status: StepStatus) -> Self {
        Self {
            name: name.to_string(),
            status,
            output: String::new(),
            elapsed: Duration::ZERO,
            staged: vec![],
        }
    }
}

/// Commands a step will run for one hook run.
#[derive(Debug, Clone, Copy)]
enum Plan<'a> {
    Check(&'a Script),
    Fix(&'a Script),
    /// Check, then fix only if the check failed
    CheckFirst { check: &'a Script, fix: &'a Script },
    /// Check, then fix only the files the check named
    FixListed {
        check: &'a Script,
        kind: ListedBy,
        fix: &'a Script,
    },
}

/// How a narrowing check names the files that need a fix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ListedBy {
    Lines,
    Diff,
}

impl Step {
    /// The command used when this step checks: `check`, else `check_diff`,
    /// else `check_list_files`.
    pub fn check_script(&self) -> Option<&Script> {
        self.check
            .as_ref()
            .or(self.check_diff.as_ref())
            .or(self.check_list_files.as_ref())
    }

    fn plan(&self, run_type: RunType) -> Option<Plan<'_>> {
        let check = self.check_script();
        match (run_type, check, &self.fix) {
            (RunType::Check, Some(check), _) => Some(Plan::Check(check)),
            (RunType::Check, None, _) => None,
            (RunType::Fix, _, Some(fix)) => {
                if let Some(check) = &self.check_diff {
                    Some(Plan::FixListed {
                        check,
                        kind: ListedBy::Diff,
                        fix,
                    })
                } else if let (true, Some(check)) = (self.check_first, &self.check_list_files) {
                    Some(Plan::FixListed {
                        check,
                        kind: ListedBy::Lines,
                        fix,
                    })
                } else if let (true, Some(check)) = (self.check_first, check) {
                    Some(Plan::CheckFirst { check, fix })
                } else {
                    Some(Plan::Fix(fix))
                }
            }
            (RunType::Fix, Some(check), None) => Some(Plan::Check(check)),
            (RunType::Fix, None, None) => None,
        }
    }

    /// Step env layered over the hook's shared env.
    fn effective_env(&self, ctx: &HookContext) -> IndexMap<String, String> {
        let mut env = ctx.env.clone();
        env.extend(self.env.iter().map(|(k, v)| (k.clone(), v.clone())));
        env
    }

    /// Runs this step to completion. Never returns an error: anything that
    /// goes wrong becomes the step's [`StepStatus`].
    pub async fn execute(&self, ctx: &HookContext) -> StepResult {
        let started = Instant::now();
        let mut result = match self.execute_inner(ctx).await {
            Ok(result) => result,
            Err(err) => {
                warn!("{self}: {err:#}");
                StepResult::new(&self.name, StepStatus::Errored(format!("{err:#}")))
            }
        };
        result.elapsed = started.elapsed();
        result
    }

    async fn execute_inner(&self, ctx: &HookContext) -> Result<StepResult> {
        if let Some(reason) = ctx.skip_steps.get(&self.name) {
            return Ok(self.skipped(ctx, reason.clone()));
        }
        if let Some(condition) = &self.condition
            && !ctx.conditions.eval(condition)?
        {
            return Ok(self.skipped(ctx, SkipReason::ConditionFalse));
        }
        let Some(plan) = self.plan(ctx.run_type) else {
            return Ok(self.skipped(ctx, SkipReason::NoCommandForRunType(ctx.run_type)));
        };
        let files = self.job_files(&ctx.files)?;
        if files.is_empty() && self.has_filters() {
            return Ok(self.skipped(ctx, SkipReason::NoFilesToProcess));
        }
        if let Some(reason) = self.profile_skip_reason(&ctx.enabled_profiles, &ctx.disabled_profiles) {
            return Ok(self.skipped(ctx, reason));
        }
        debug!("{self}: {} file(s)", files.len());

        let progress = ctx.progress.then(|| self.build_step_progress(files.len()));
        let mut block = StepBlock::new(&self.name, self.output_summary);
        let mut staged = vec![];
        let outcome = match plan {
            Plan::Check(check) => self.invoke_check(ctx, check, &files).await?,
            Plan::Fix(fix) => {
                let (outcome, modified) = self.invoke_fix(ctx, fix, &files).await?;
                staged = self.restage(ctx, &files, &modified).await?;
                outcome
            }
            Plan::CheckFirst { check, fix } => {
                let checked = self.invoke_check(ctx, check, &files).await?;
                if checked.passed {
                    checked
                } else {
                    debug!("{self}: check failed, running fix");
                    block.push(self.summary_text(&checked));
                    let (outcome, modified) = self.invoke_fix(ctx, fix, &files).await?;
                    staged = self.restage(ctx, &files, &modified).await?;
                    outcome
                }
            }
            Plan::FixListed { check, kind, fix } => {
                let checked = self.invoke_check(ctx, check, &files).await?;
                if checked.passed {
                    checked
                } else {
                    block.push(self.summary_text(&checked));
                    match self.files_to_fix(ctx, kind, &files, &checked.stdout) {
                        Some(listed) => {
                            debug!("{self}: check listed {} file(s), running fix", listed.len());
                            let (outcome, modified) = self.invoke_fix(ctx, fix, &listed).await?;
                            staged = self.restage(ctx, &listed, &modified).await?;
                            outcome
                        }
                        None => {
                            error!("{self}: check failed without listing any files");
                            checked
                        }
                    }
                }
            }
        };
        block.push(self.summary_text(&outcome));

        let status = if outcome.passed {
            StepStatus::Passed
        } else {
            if ctx.run_type == RunType::Check && self.fix.is_some() {
                ctx.suggest_fix();
            }
            let message = match outcome.code {
                Some(code) => format!("exited with code {code}"),
                None => outcome.stderr.trim().to_string(),
            };
            StepStatus::Failed(message)
        };
        if let Some(progress) = &progress {
            progress.set_status(if outcome.passed {
                ProgressStatus::Done
            } else {
                ProgressStatus::Failed
            });
        }
        let output = block.text.clone();
        ctx.output.send(block);
        Ok(StepResult {
            name: self.name.clone(),
            status,
            output,
            elapsed: Duration::ZERO,
            staged,
        })
    }

    fn summary_text<'a>(&self, outcome: &'a CommandOutcome) -> &'a str {
        match self.output_summary {
            OutputSummary::Stdout => &outcome.stdout,
            OutputSummary::Stderr => &outcome.stderr,
            OutputSummary::Combined => &outcome.combined,
            OutputSummary::Hide => "",
        }
    }

    fn skipped(&self, ctx: &HookContext, reason: SkipReason) -> StepResult {
        if ctx.display_skip_reasons.contains(reason.key()) {
            info!("{self}: {}", reason.message());
        } else {
            debug!("{self}: {}", reason.message());
        }
        StepResult::new(&self.name, StepStatus::Skipped(reason))
    }

    fn argv(&self, script: &Script, files: &[PathBuf]) -> Result<Vec<String>> {
        let template = CommandTemplate::parse(&script.to_string())?;
        Ok(template.argv(self.shell.as_ref(), &self.command_paths(files)))
    }

    /// Runs `script`, consulting the cache first. On a miss the key is handed
    /// back so the caller can decide whether the outcome may be stored.
    async fn invoke(
        &self,
        ctx: &HookContext,
        script: &Script,
        files: &[PathBuf],
    ) -> Result<(CommandOutcome, Option<CacheKey>)> {
        let argv = self.argv(script, files)?;
        let env = self.effective_env(ctx);
        let key = if ctx.cache.is_enabled() {
            Some(CacheKey::new(
                &self.name,
                &argv,
                self.dir.as_deref(),
                &ctx.root,
                files,
                &env,
            )?)
        } else {
            None
        };
        if let Some(entry) = key.as_ref().and_then(|k| ctx.cache.lookup(k)) {
            let outcome = CommandOutcome {
                passed: entry.passed,
                code: entry.code,
                stdout: entry.stdout,
                stderr: entry.stderr,
                combined: entry.combined,
            };
            return Ok((outcome, None));
        }
        let dir = match &self.dir {
            Some(dir) => ctx.root.join(dir),
            None => ctx.root.clone(),
        };
        let outcome = run_command(&self.name, &argv, &dir, &env, None).await;
        Ok((outcome, key))
    }

    async fn invoke_check(
        &self,
        ctx: &HookContext,
        check: &Script,
        files: &[PathBuf],
    ) -> Result<CommandOutcome> {
        let (outcome, key) = self.invoke(ctx, check, files).await?;
        if let Some(key) = key {
            ctx.cache.store(&key, entry_for(&outcome));
        }
        Ok(outcome)
    }

    /// Runs a fix and reports which job files it changed. Only a fix that
    /// changed nothing is cached.
    async fn invoke_fix(
        &self,
        ctx: &HookContext,
        fix: &Script,
        files: &[PathBuf],
    ) -> Result<(CommandOutcome, Vec<PathBuf>)> {
        let before = fingerprints(ctx, files)?;
        let (outcome, key) = self.invoke(ctx, fix, files).await?;
        let after = fingerprints(ctx, files)?;
        let modified = files
            .iter()
            .zip(before.iter().zip(after.iter()))
            .filter(|(_, (b, a))| b != a)
            .map(|(f, _)| f.clone())
            .collect::<Vec<_>>();
        if !modified.is_empty() {
            debug!("{self}: modified {}", crate::git::display_paths(&modified));
        } else if let Some(key) = key {
            ctx.cache.store(&key, entry_for(&outcome));
        }
        Ok((outcome, modified))
    }

    /// Job files a failed narrowing check named. A diff naming none of them
    /// means every job file; a file list naming none means the tool itself
    /// failed, so nothing is fixed.
    fn files_to_fix(
        &self,
        ctx: &HookContext,
        kind: ListedBy,
        files: &[PathBuf],
        stdout: &str,
    ) -> Option<Vec<PathBuf>> {
        let (listed, extras) = match kind {
            ListedBy::Lines => self.files_from_check_list(&ctx.root, files, stdout),
            ListedBy::Diff => self.files_from_check_diff(&ctx.root, files, stdout),
        };
        for extra in extras {
            warn!("{self}: check named {}, which is not one of its files", extra.display());
        }
        match (listed.is_empty(), kind) {
            (false, _) => Some(listed),
            (true, ListedBy::Diff) => {
                debug!("{self}: no files found in the diff, fixing all of them");
                Some(files.to_vec())
            }
            (true, ListedBy::Lines) => None,
        }
    }

    /// Adds the fixed files this step is allowed to stage. Index writes are
    /// serialized through the shared repository lock.
    async fn restage(
        &self,
        ctx: &HookContext,
        files: &[PathBuf],
        modified: &[PathBuf],
    ) -> Result<Vec<PathBuf>> {
        if !ctx.stage || modified.is_empty() {
            return Ok(vec![]);
        }
        let stage = self.stage_files(files, modified)?;
        if stage.is_empty() {
            return Ok(vec![]);
        }
        ctx.git.lock().await.add(&stage)?;
        Ok(stage)
    }
}

fn fingerprints(ctx: &HookContext, files: &[PathBuf]) -> Result<Vec<Option<String>>> {
    files
        .iter()
        .map(|f| hash::file_fingerprint(&ctx.root.join(f)))
        .collect()
}

fn entry_for(outcome: &CommandOutcome) -> CacheEntry {
    CacheEntry {
        passed: outcome.passed,
        code: outcome.code,
        stdout: outcome.stdout.clone(),
        stderr: outcome.stderr.clone(),
        combined: outcome.combined.clone(),
        created_at: Utc::now(),
    }
}
