use std::{
    collections::{BTreeSet, HashSet},
    path::{Component, Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use indexmap::{IndexMap, IndexSet};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use tokio::{signal, sync::Mutex};
use tokio_util::sync::CancellationToken;

use crate::{
    Result,
    cache::ResultCache,
    condition::ConditionEvaluator,
    config::Config,
    error::Error,
    git::{Git, GitStatus, StashMethod, display_paths},
    glob,
    hook_options::HookOptions,
    output::{OutputHandle, OutputSink},
    scheduler::StepScheduler,
    settings::Settings,
    stash::{self, WorkingTreeGuard},
    step::{RunType, Step, StepResult, StepStatus},
};

#[derive(Debug, Clone, Eq, PartialEq, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum SkipReason {
    DisabledByEnv(String),
    DisabledByCli(String),
    DisabledByConfig,
    HookDisabled,
    ConditionFalse,
    ProfileNotEnabled(Vec<String>),
    ProfileExplicitlyDisabled,
    NoCommandForRunType(RunType),
    NoFilesToProcess,
}

impl SkipReason {
    /// Names accepted by `display_skip_reasons`.
    pub const KEYS: &[&str] = &[
        "disabled-by-env",
        "disabled-by-cli",
        "disabled-by-config",
        "hook-disabled",
        "condition-false",
        "profile-not-enabled",
        "profile-explicitly-disabled",
        "no-command-for-run-type",
        "no-files-to-process",
    ];

    pub fn key(&self) -> &'static str {
        match self {
            SkipReason::DisabledByEnv(_) => "disabled-by-env",
            SkipReason::DisabledByCli(_) => "disabled-by-cli",
            SkipReason::DisabledByConfig => "disabled-by-config",
            SkipReason::HookDisabled => "hook-disabled",
            SkipReason::ConditionFalse => "condition-false",
            SkipReason::ProfileNotEnabled(_) => "profile-not-enabled",
            SkipReason::ProfileExplicitlyDisabled => "profile-explicitly-disabled",
            SkipReason::NoCommandForRunType(_) => "no-command-for-run-type",
            SkipReason::NoFilesToProcess => "no-files-to-process",
        }
    }

    pub fn message(&self) -> String {
        match self {
            SkipReason::DisabledByEnv(src) | SkipReason::DisabledByCli(src) => {
                format!("skipped: disabled via {src}")
            }
            SkipReason::DisabledByConfig => "skipped: disabled by skip_steps".to_string(),
            SkipReason::HookDisabled => "skipped: hook is disabled".to_string(),
            SkipReason::ConditionFalse => "skipped: condition is false".to_string(),
            SkipReason::ProfileNotEnabled(profiles) => {
                format!("skipped: profile not enabled ({})", profiles.join(", "))
            }
            SkipReason::ProfileExplicitlyDisabled => "skipped: disabled by profile".to_string(),
            SkipReason::NoCommandForRunType(run_type) => {
                format!("skipped: no {run_type} command")
            }
            SkipReason::NoFilesToProcess => "skipped: no files to process".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(debug_assertions, serde(deny_unknown_fields))]
pub struct Hook {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub steps: IndexMap<String, Step>,
    /// Run fix commands; defaults to true for `fix` and `pre-commit`
    pub fix: Option<bool>,
    pub stash: Option<StashMethod>,
    pub fail_fast: Option<bool>,
}

/// Everything a step needs while a hook runs. Shared by all step tasks.
pub struct HookContext {
    pub hook: String,
    pub run_type: RunType,
    pub root: PathBuf,
    /// Candidate files, relative to `root`
    pub files: Vec<PathBuf>,
    pub git: Arc<Mutex<Git>>,
    pub conditions: ConditionEvaluator,
    pub skip_steps: IndexMap<String, SkipReason>,
    pub display_skip_reasons: IndexSet<String>,
    pub enabled_profiles: IndexSet<String>,
    pub disabled_profiles: IndexSet<String>,
    pub env: IndexMap<String, String>,
    pub stage: bool,
    pub progress: bool,
    pub cache: Arc<ResultCache>,
    pub output: OutputHandle,
    fix_suggested: AtomicBool,
}

impl HookContext {
    pub fn new(
        git: Git,
        run_type: RunType,
        conditions: ConditionEvaluator,
        output: OutputHandle,
    ) -> Self {
        Self {
            hook: String::new(),
            run_type,
            root: git.root().to_path_buf(),
            files: vec![],
            git: Arc::new(Mutex::new(git)),
            conditions,
            skip_steps: IndexMap::new(),
            display_skip_reasons: IndexSet::new(),
            enabled_profiles: IndexSet::new(),
            disabled_profiles: IndexSet::new(),
            env: IndexMap::new(),
            stage: true,
            progress: false,
            cache: Arc::new(ResultCache::disabled()),
            output,
            fix_suggested: AtomicBool::new(false),
        }
    }

    pub fn suggest_fix(&self) {
        self.fix_suggested.store(true, Ordering::Relaxed);
    }

    pub fn fix_suggested(&self) -> bool {
        self.fix_suggested.load(Ordering::Relaxed)
    }
}

/// Outcome of one hook run.
#[derive(Debug)]
pub struct HookReport {
    pub hook: String,
    pub run_type: RunType,
    pub results: Vec<StepResult>,
    /// Files written back with conflict markers
    pub conflicts: Vec<PathBuf>,
    pub stashed: bool,
}

impl HookReport {
    pub fn failed(&self) -> Vec<&StepResult> {
        self.results
            .iter()
            .filter(|r| r.status.is_failure())
            .collect()
    }

    /// Steps abandoned by fail-fast or an interrupt.
    pub fn aborted(&self) -> Vec<&StepResult> {
        self.results
            .iter()
            .filter(|r| r.status == StepStatus::NotRun)
            .collect()
    }

    pub fn success(&self) -> bool {
        self.failed().is_empty() && self.aborted().is_empty() && self.conflicts.is_empty()
    }

    /// Failures are reported first, then abandoned steps, then conflicts.
    pub fn into_result(self) -> Result<()> {
        let names = |results: Vec<&StepResult>| {
            results.iter().map(|r| r.name.clone()).collect::<Vec<_>>()
        };
        let failed = names(self.failed());
        if !failed.is_empty() {
            return Err(Error::HookFailed {
                hook: self.hook,
                failed,
            }
            .into());
        }
        let not_run = names(self.aborted());
        if !not_run.is_empty() {
            return Err(Error::HookAborted {
                hook: self.hook,
                not_run,
            }
            .into());
        }
        if !self.conflicts.is_empty() {
            return Err(Error::WorkingTreeConflict {
                files: self.conflicts,
            }
            .into());
        }
        Ok(())
    }
}

impl Hook {
    pub fn init(&mut self, hook_name: &str) {
        self.name = hook_name.to_string();
        for (name, step) in self.steps.iter_mut() {
            step.name = name.clone();
        }
    }

    fn run_type(&self, opts: &HookOptions, settings: &Settings) -> RunType {
        let fix_by_default = self
            .fix
            .unwrap_or(self.name == "fix" || self.name == "pre-commit");
        if opts.check {
            RunType::Check
        } else if opts.fix || (settings.fix && fix_by_default) {
            RunType::Fix
        } else {
            RunType::Check
        }
    }

    /// Only fixing pre-commit runs hide unstaged changes unless told otherwise.
    fn stash_method(&self, opts: &HookOptions, settings: &Settings, run_type: RunType) -> StashMethod {
        opts.stash_method()
            .or(settings.stash)
            .or(self.stash)
            .unwrap_or(if run_type == RunType::Fix && self.name == "pre-commit" {
                StashMethod::Git
            } else {
                StashMethod::None
            })
    }

    fn fail_fast(&self, config: &Config, opts: &HookOptions, settings: &Settings) -> bool {
        opts.fail_fast()
            .or(settings.fail_fast)
            .or(self.fail_fast)
            .or(config.fail_fast)
            .unwrap_or(true)
    }

    /// Later sources override earlier ones for the same step.
    fn skip_steps(
        &self,
        config: &Config,
        opts: &HookOptions,
        settings: &Settings,
    ) -> IndexMap<String, SkipReason> {
        let mut m = IndexMap::new();
        for s in &config.skip_steps {
            m.insert(s.clone(), SkipReason::DisabledByConfig);
        }
        for s in &settings.skip_steps {
            m.insert(
                s.clone(),
                SkipReason::DisabledByEnv("HK_SKIP_STEPS".to_string()),
            );
        }
        for s in &opts.skip_step {
            m.insert(
                s.clone(),
                SkipReason::DisabledByCli(format!("--skip-step {s}")),
            );
        }
        m
    }

    fn selected_steps(&self, opts: &HookOptions) -> Result<IndexMap<String, Step>> {
        if opts.step.is_empty() {
            return Ok(self.steps.clone());
        }
        for name in &opts.step {
            if !self.steps.contains_key(name) {
                let names = self.steps.keys().map(|s| s.as_str()).collect_vec();
                let hint = xx::suggest::did_you_mean(name, &names).unwrap_or_default();
                let message = format!("no such step in hook {}. {hint}", self.name);
                return Err(Error::config(name, message.trim_end().trim_end_matches('.')).into());
            }
        }
        Ok(self
            .steps
            .iter()
            .filter(|(name, _)| opts.step.contains(name))
            .map(|(name, step)| (name.clone(), step.clone()))
            .collect())
    }

    pub async fn run(&self, config: &Config, opts: HookOptions, settings: &Settings) -> Result<HookReport> {
        self.run_with_output(config, opts, settings, OutputSink::stderr())
            .await
    }

    /// Runs every step of this hook, writing step output blocks to `sink`.
    ///
    /// Unstaged changes hidden before the steps start are put back whatever
    /// happens to the steps.
    #[tracing::instrument(level = "info", name = "hook.run", skip_all, fields(hook = %self.name))]
    pub async fn run_with_output(
        &self,
        config: &Config,
        opts: HookOptions,
        settings: &Settings,
        sink: OutputSink,
    ) -> Result<HookReport> {
        let run_type = self.run_type(&opts, settings);
        let mut report = HookReport {
            hook: self.name.clone(),
            run_type,
            results: vec![],
            conflicts: vec![],
            stashed: false,
        };
        if settings.skip_hooks.contains(&self.name) || config.skip_hooks.contains(&self.name) {
            warn!("{}: skipping hook", self.name);
            report.results = self
                .steps
                .keys()
                .map(|name| StepResult::new(name, StepStatus::Skipped(SkipReason::HookDisabled)))
                .collect();
            sink.finish().await?;
            return Ok(report);
        }
        let steps = self.selected_steps(&opts)?;
        let git = match &opts.root {
            Some(root) => Git::open(root)?,
            None => Git::discover(&std::env::current_dir()?)?,
        };
        let status = git.status()?;
        let conditions = ConditionEvaluator::new(&status)?;
        let stash_method = self.stash_method(&opts, settings, run_type);
        let files = file_list(&opts, &git, &status, stash_method != StashMethod::None)?;
        debug!("{}: {run_type} with {} file(s)", self.name, files.len());

        let guard = stash::strategy(stash_method, settings.stash_untracked, &settings.state_dir)
            .map(WorkingTreeGuard::new);
        let entry = match &guard {
            Some(guard) => guard.snapshot(&git, &status)?,
            None => None,
        };
        report.stashed = entry.is_some();

        let cache = if settings.cache {
            ResultCache::new(&settings.cache_dir, git.root())
        } else {
            ResultCache::disabled()
        };
        let mut ctx = HookContext::new(git, run_type, conditions, sink.handle());
        ctx.hook = self.name.clone();
        ctx.files = files;
        ctx.skip_steps = self.skip_steps(config, &opts, settings);
        ctx.display_skip_reasons = config.display_skip_reasons();
        ctx.enabled_profiles = settings.enabled_profiles();
        ctx.disabled_profiles = settings.disabled_profiles();
        ctx.env = config.env.clone();
        ctx.stage = opts.should_stage().unwrap_or(settings.stage);
        ctx.progress = settings.progress;
        ctx.cache = Arc::new(cache);
        let ctx = Arc::new(ctx);

        let cancel = CancellationToken::new();
        watch_for_ctrl_c(cancel.clone());
        let results = StepScheduler::new(settings.jobs.get(), self.fail_fast(config, &opts, settings))
            .with_cancel(cancel)
            .run(ctx.clone(), &steps)
            .await;

        let restored = match (&guard, entry) {
            (Some(guard), Some(entry)) => {
                let git = ctx.git.lock().await;
                Some(guard.restore(&git, entry))
            }
            _ => None,
        };
        let fix_suggested = ctx.fix_suggested();
        drop(ctx);
        sink.finish().await?;

        report.results = results?;
        if let Some(restored) = restored {
            let restored = restored?;
            debug!("{}: restored {}", self.name, display_paths(&restored.restored));
            report.conflicts = restored.conflicts;
        }
        if fix_suggested {
            error!("To fix, run: hk-engine fix");
        }
        Ok(report)
    }
}

/// Files the steps of one run may select from, relative to the repository root.
fn file_list(opts: &HookOptions, git: &Git, status: &GitStatus, stash: bool) -> Result<Vec<PathBuf>> {
    let root = git.root();
    let mut files: BTreeSet<PathBuf> = if !opts.files.is_empty() {
        let mut all_files = None;
        let mut files = BTreeSet::new();
        for f in &opts.files {
            let path = normalize(root, Path::new(f));
            if root.join(&path).is_dir() {
                if all_files.is_none() {
                    all_files = Some(git.all_files()?);
                }
                files.extend(
                    all_files
                        .iter()
                        .flatten()
                        .filter(|f| f.starts_with(&path))
                        .cloned(),
                );
            } else {
                files.insert(path);
            }
        }
        files
    } else if opts.all {
        git.all_files()?
    } else if stash {
        status.staged_files.clone()
    } else {
        status
            .staged_files
            .iter()
            .chain(status.unstaged_files.iter())
            .cloned()
            .collect()
    };
    if !opts.glob.is_empty() {
        let candidates = files.into_iter().collect_vec();
        files = glob::get_matches(&opts.glob, &candidates)?
            .into_iter()
            .collect();
    }
    if !opts.exclude.is_empty() {
        let candidates = files.iter().collect_vec();
        let excluded = glob::get_matches(&opts.exclude, &candidates)?
            .into_iter()
            .collect::<HashSet<_>>();
        files.retain(|f| !excluded.contains(f));
    }
    files.retain(|f| root.join(f).exists());
    let files = files.into_iter().collect_vec();
    trace!("files: {}", display_paths(&files));
    Ok(files)
}

/// Makes `path` relative to `root` and drops `.` components.
fn normalize(root: &Path, path: &Path) -> PathBuf {
    let path = path.strip_prefix(root).unwrap_or(path);
    path.components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect()
}

fn watch_for_ctrl_c(cancel: CancellationToken) {
    tokio::spawn(async move {
        if let Err(err) = signal::ctrl_c().await {
            warn!("failed to watch for ctrl-c: {err}");
            return;
        }
        warn!("interrupted, waiting for running steps");
        cancel.cancel();
    });
}

#[cfg(test)]
mod tests {
    use std::num::NonZero;

    use super::*;
    use crate::merge;
    use crate::test_support::{SharedBuffer, TestRepo};

    fn config(raw: &str) -> Config {
        Config::parse(raw, "toml").unwrap()
    }

    fn settings(state: &tempfile::TempDir) -> Settings {
        Settings {
            state_dir: state.path().to_path_buf(),
            cache_dir: state.path().join("cache"),
            ..Default::default()
        }
    }

    async fn run(
        repo: &TestRepo,
        config: &Config,
        hook: &str,
        mut opts: HookOptions,
        settings: &Settings,
    ) -> (HookReport, String) {
        opts.root = Some(repo.root());
        let buf = SharedBuffer::default();
        let sink = OutputSink::new(Box::new(buf.clone()));
        let report = config.hooks[hook]
            .run_with_output(config, opts, settings, sink)
            .await
            .unwrap();
        (report, buf.contents())
    }

    fn status<'a>(report: &'a HookReport, step: &str) -> &'a StepStatus {
        &report
            .results
            .iter()
            .find(|r| r.name == step)
            .unwrap()
            .status
    }

    #[tokio::test]
    async fn test_without_fail_fast_all_steps_run() {
        let repo = TestRepo::new();
        let state = tempfile::tempdir().unwrap();
        let config = config(
            r#"
            fail_fast = false
            [hooks.check.steps.bad]
            check = "exit 1"
            [hooks.check.steps.good]
            check = "touch good.txt"
            "#,
        );
        let mut settings = settings(&state);
        settings.jobs = NonZero::new(1).unwrap();
        let (report, _) = run(&repo, &config, "check", HookOptions::default(), &settings).await;
        assert!(repo.path("good.txt").exists());
        assert_eq!(*status(&report, "good"), StepStatus::Passed);
        assert!(!report.success());
        let err = report.into_result().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::HookFailed { failed, .. }) if failed == &vec!["bad".to_string()]
        ));
    }

    #[tokio::test]
    async fn test_skipped_steps_never_run() {
        let repo = TestRepo::new();
        let state = tempfile::tempdir().unwrap();
        let config = config(
            r#"
            [hooks.check.steps.writer]
            check = "touch written.txt"
            "#,
        );
        let opts = HookOptions {
            skip_step: vec!["writer".into()],
            ..Default::default()
        };
        let (report, _) = run(&repo, &config, "check", opts, &settings(&state)).await;
        let StepStatus::Skipped(reason) = status(&report, "writer") else {
            panic!("writer was not skipped");
        };
        assert_eq!(reason.message(), "skipped: disabled via --skip-step writer");
        assert!(!repo.path("written.txt").exists());

        let mut settings = settings(&state);
        settings.skip_steps.insert("writer".into());
        let (report, _) = run(&repo, &config, "check", HookOptions::default(), &settings).await;
        assert_eq!(
            *status(&report, "writer"),
            StepStatus::Skipped(SkipReason::DisabledByEnv("HK_SKIP_STEPS".into()))
        );
        assert!(!repo.path("written.txt").exists());
        assert!(report.success());
    }

    #[tokio::test]
    async fn test_explicit_skip_wins_over_condition() {
        let repo = TestRepo::new();
        let state = tempfile::tempdir().unwrap();
        let config = config(
            r#"
            skip_steps = ["gated"]
            [hooks.check.steps.gated]
            condition = "git.staged_files =="
            check = "touch gated.txt"
            "#,
        );
        let (report, _) = run(&repo, &config, "check", HookOptions::default(), &settings(&state)).await;
        assert_eq!(
            *status(&report, "gated"),
            StepStatus::Skipped(SkipReason::DisabledByConfig)
        );
    }

    #[tokio::test]
    async fn test_profiles_gate_steps() {
        let repo = TestRepo::new();
        let state = tempfile::tempdir().unwrap();
        let config = config(
            r#"
            [hooks.check.steps.slow]
            profiles = ["slow"]
            check = "touch slow.txt"
            [hooks.check.steps.quick]
            profiles = ["!slow"]
            check = "touch quick.txt"
            "#,
        );
        let (report, _) = run(&repo, &config, "check", HookOptions::default(), &settings(&state)).await;
        assert_eq!(
            *status(&report, "slow"),
            StepStatus::Skipped(SkipReason::ProfileNotEnabled(vec!["slow".into()]))
        );
        assert_eq!(*status(&report, "quick"), StepStatus::Passed);

        std::fs::remove_file(repo.path("quick.txt")).unwrap();
        let settings = settings(&state).with_profiles(&["slow".into()]);
        let (report, _) = run(&repo, &config, "check", HookOptions::default(), &settings).await;
        assert_eq!(*status(&report, "slow"), StepStatus::Passed);
        assert_eq!(
            *status(&report, "quick"),
            StepStatus::Skipped(SkipReason::ProfileExplicitlyDisabled)
        );
        assert!(!repo.path("quick.txt").exists());
    }

    #[tokio::test]
    async fn test_depends_orders_steps_from_config() {
        let repo = TestRepo::new();
        let state = tempfile::tempdir().unwrap();
        let config = config(
            r#"
            [hooks.check.steps.consumer]
            depends = ["producer"]
            check = "test -e produced.txt"
            [hooks.check.steps.producer]
            check = "sleep 0.2; touch produced.txt"
            "#,
        );
        let mut settings = settings(&state);
        settings.jobs = NonZero::new(4).unwrap();
        let (report, _) = run(&repo, &config, "check", HookOptions::default(), &settings).await;
        assert_eq!(*status(&report, "consumer"), StepStatus::Passed);
        assert!(report.success());
    }

    #[tokio::test]
    async fn test_disabled_hook() {
        let repo = TestRepo::new();
        let state = tempfile::tempdir().unwrap();
        let config = config("[hooks.check.steps.a]\ncheck = \"touch a.txt\"\n");
        let mut settings = settings(&state);
        settings.skip_hooks.insert("check".into());
        let (report, _) = run(&repo, &config, "check", HookOptions::default(), &settings).await;
        assert_eq!(
            *status(&report, "a"),
            StepStatus::Skipped(SkipReason::HookDisabled)
        );
        assert!(!repo.path("a.txt").exists());
    }

    #[tokio::test]
    async fn test_unknown_step_is_a_defect() {
        let repo = TestRepo::new();
        let config = config("[hooks.check.steps.lint]\ncheck = \"true\"\n");
        let opts = HookOptions {
            step: vec!["lnit".into()],
            root: Some(repo.root()),
            ..Default::default()
        };
        let state = tempfile::tempdir().unwrap();
        let err = config.hooks["check"]
            .run_with_output(&config, opts, &settings(&state), OutputSink::new(Box::new(SharedBuffer::default())))
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::ConfigurationDefect { .. })
        ));
    }

    #[tokio::test]
    async fn test_check_first_blocks_are_contiguous() {
        let repo = TestRepo::new();
        let state = tempfile::tempdir().unwrap();
        let config = config(
            r#"
            [hooks.fix.steps.slow]
            check_first = true
            check = 'sleep 0.5; echo slow-check >&2; exit 1'
            fix = 'echo slow-fix >&2'
            [hooks.fix.steps.fast]
            check_first = true
            check = 'echo fast-check >&2; exit 1'
            fix = 'echo fast-fix >&2'
            "#,
        );
        let mut settings = settings(&state);
        settings.jobs = NonZero::new(2).unwrap();
        let (report, out) = run(&repo, &config, "fix", HookOptions::default(), &settings).await;
        assert!(report.success(), "{report:?}");
        let pos = |s: &str| out.find(s).unwrap_or_else(|| panic!("{s} missing from {out}"));
        assert!(pos("fast-check") < pos("fast-fix"));
        assert!(pos("fast-fix") < pos("slow-check"));
        assert!(pos("slow-check") < pos("slow-fix"));
    }

    fn fix_and_touch_other(stage: &str) -> Config {
        config(&format!(
            r#"
            [hooks.fix.steps.fixer]
            glob = "src/*.txt"
            fix = 'for f in {{{{files}}}}; do echo fixed >> "$f"; done; echo touched >> other.txt'
            stage = {stage}
            "#
        ))
    }

    fn fixer_repo() -> TestRepo {
        let repo = TestRepo::new();
        repo.write("src/a.txt", "a\n");
        repo.write("other.txt", "other\n");
        repo.commit_all("files");
        repo.write("src/a.txt", "x\n");
        repo.add(&["src/a.txt"]);
        repo
    }

    #[tokio::test]
    async fn test_restage_never_leaves_the_job_set() {
        let repo = fixer_repo();
        let state = tempfile::tempdir().unwrap();
        let config = fix_and_touch_other(r#"["*"]"#);
        let (report, _) = run(&repo, &config, "fix", HookOptions::default(), &settings(&state)).await;
        assert!(report.success(), "{report:?}");
        assert_eq!(repo.staged_names(), vec!["src/a.txt"]);
        assert_eq!(repo.staged("src/a.txt"), "x\nfixed\n");
        assert_eq!(repo.read("other.txt"), "other\ntouched\n");
    }

    #[tokio::test]
    async fn test_directory_only_stage_glob_stages_nothing() {
        let repo = fixer_repo();
        let state = tempfile::tempdir().unwrap();
        let config = fix_and_touch_other(r#"["src/**/"]"#);
        let (report, _) = run(&repo, &config, "fix", HookOptions::default(), &settings(&state)).await;
        assert!(report.success(), "{report:?}");
        assert_eq!(repo.staged("src/a.txt"), "x\n");
        assert_eq!(repo.read("src/a.txt"), "x\nfixed\n");
    }

    #[tokio::test]
    async fn test_condition_uses_status_from_run_start() {
        let state = tempfile::tempdir().unwrap();
        let config = config(
            r#"
            [hooks.check.steps.maker]
            check = "touch made.txt"
            [hooks.check.steps.gated]
            condition = "git.untracked_files == []"
            check = "touch gated.txt"
            "#,
        );
        let mut settings = settings(&state);
        settings.jobs = NonZero::new(1).unwrap();

        let repo = TestRepo::new();
        let (report, _) = run(&repo, &config, "check", HookOptions::default(), &settings).await;
        assert!(repo.path("made.txt").exists());
        assert_eq!(*status(&report, "gated"), StepStatus::Passed);
        assert!(repo.path("gated.txt").exists());

        let repo = TestRepo::new();
        repo.write("junk.txt", "");
        let (report, _) = run(&repo, &config, "check", HookOptions::default(), &settings).await;
        assert_eq!(
            *status(&report, "gated"),
            StepStatus::Skipped(SkipReason::ConditionFalse)
        );
        assert!(!repo.path("gated.txt").exists());
    }

    #[tokio::test]
    async fn test_bad_condition_errors_the_step() {
        let repo = TestRepo::new();
        let state = tempfile::tempdir().unwrap();
        let config = config("[hooks.check.steps.a]\ncondition = \"git.staged_files ==\"\ncheck = \"true\"\n");
        let (report, _) = run(&repo, &config, "check", HookOptions::default(), &settings(&state)).await;
        assert!(matches!(status(&report, "a"), StepStatus::Errored(_)));
        assert!(!report.success());
    }

    fn conflict_repo() -> TestRepo {
        let repo = TestRepo::new();
        repo.write("a.txt", "line1\nline2\nline3\n");
        repo.commit_all("a");
        repo.write("a.txt", "staged1\nline2\nline3\n");
        repo.add(&["a.txt"]);
        repo.write("a.txt", "staged1\nunstaged2\nline3\n");
        repo
    }

    #[tokio::test]
    async fn test_pre_commit_conflict_keeps_both_sides() {
        let repo = conflict_repo();
        let state = tempfile::tempdir().unwrap();
        let config = config(
            r#"
            [hooks.pre-commit.steps.fixer]
            glob = "a.txt"
            fix = "printf 'staged1\nfixed2\nline3\n' > {{files}}"
            "#,
        );
        let (report, _) = run(&repo, &config, "pre-commit", HookOptions::default(), &settings(&state)).await;
        assert!(report.stashed);
        assert_eq!(report.conflicts, vec![PathBuf::from("a.txt")]);
        assert_eq!(repo.staged("a.txt"), "staged1\nfixed2\nline3\n");
        let content = repo.read("a.txt");
        assert!(content.contains(merge::OURS_MARKER), "{content}");
        assert!(content.contains(merge::THEIRS_MARKER), "{content}");
        assert!(content.contains("fixed2"));
        assert!(content.contains("unstaged2"));
        assert_eq!(repo.stash_list(), "");
        let err = report.into_result().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::WorkingTreeConflict { .. })
        ));
    }

    #[tokio::test]
    async fn test_pre_commit_with_untracked_file() {
        let repo = TestRepo::new();
        repo.write("a.txt", "line1\nline2\nline3\n");
        repo.commit_all("a");
        repo.write("a.txt", "line1\nline2\nline3\nstaged\n");
        repo.add(&["a.txt"]);
        repo.write("a.txt", "line1 unstaged\nline2\nline3\nstaged\n");
        repo.write("notes.txt", "notes\n");
        let state = tempfile::tempdir().unwrap();
        let config = config(
            r#"
            [hooks.pre-commit.steps.fixer]
            glob = "*.txt"
            fix = "test ! -e notes.txt && printf 'line1\nline2\nline3\nSTAGED\n' > {{files}}"
            "#,
        );
        let (report, _) = run(&repo, &config, "pre-commit", HookOptions::default(), &settings(&state)).await;
        assert!(report.success(), "{report:?}");
        assert!(report.stashed);
        assert_eq!(repo.staged("a.txt"), "line1\nline2\nline3\nSTAGED\n");
        assert_eq!(repo.read("a.txt"), "line1 unstaged\nline2\nline3\nSTAGED\n");
        assert_eq!(repo.read("notes.txt"), "notes\n");
        assert_eq!(repo.staged_names(), vec!["a.txt"]);
        assert_eq!(repo.stash_list(), "");
    }

    #[tokio::test]
    async fn test_untracked_file_outside_job_set_stays_untracked() {
        let repo = fixer_repo();
        repo.write("notes.txt", "notes\n");
        let state = tempfile::tempdir().unwrap();
        let config = config(
            r#"
            [hooks.fix.steps.fixer]
            glob = "src/*.txt"
            fix = 'for f in {{files}}; do echo fixed >> "$f"; done; echo touched >> notes.txt'
            stage = ["*"]
            "#,
        );
        let (report, _) = run(&repo, &config, "fix", HookOptions::default(), &settings(&state)).await;
        assert!(report.success(), "{report:?}");
        assert!(!report.stashed);
        assert_eq!(repo.staged_names(), vec!["src/a.txt"]);
        assert_eq!(repo.read("notes.txt"), "notes\ntouched\n");
        assert_eq!(repo.git(&["status", "--porcelain", "--", "notes.txt"]), "?? notes.txt\n");
    }

    #[test]
    fn test_abandoned_steps_fail_the_run() {
        let report = HookReport {
            hook: "check".into(),
            run_type: RunType::Check,
            results: vec![
                StepResult::new("a", StepStatus::Passed),
                StepResult::new("b", StepStatus::NotRun),
            ],
            conflicts: vec![],
            stashed: false,
        };
        assert!(!report.success());
        let err = report.into_result().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::HookAborted { not_run, .. }) if not_run == &vec!["b".to_string()]
        ));
    }

    #[tokio::test]
    async fn test_patch_file_stash_matches_native() {
        let repo = conflict_repo();
        let state = tempfile::tempdir().unwrap();
        let config = config(
            r#"
            [hooks.pre-commit]
            stash = "patch-file"
            [hooks.pre-commit.steps.fixer]
            glob = "a.txt"
            fix = "printf 'staged1\nfixed2\nline3\n' > {{files}}"
            "#,
        );
        let (report, _) = run(&repo, &config, "pre-commit", HookOptions::default(), &settings(&state)).await;
        assert!(report.stashed);
        assert_eq!(report.conflicts, vec![PathBuf::from("a.txt")]);
        assert!(repo.read("a.txt").contains(merge::OURS_MARKER));
        let leftover = xx::file::ls(&state.path().join("patches")).unwrap_or_default();
        assert!(leftover.is_empty(), "{leftover:?}");
    }

    #[tokio::test]
    async fn test_check_run_does_not_stash() {
        let repo = conflict_repo();
        let state = tempfile::tempdir().unwrap();
        let config = config(
            r#"
            [hooks.pre-commit.steps.lint]
            glob = "a.txt"
            check = "cat {{files}}"
            "#,
        );
        let opts = HookOptions {
            check: true,
            ..Default::default()
        };
        let (report, _) = run(&repo, &config, "pre-commit", opts, &settings(&state)).await;
        assert_eq!(report.run_type, RunType::Check);
        assert!(!report.stashed);
        assert_eq!(repo.read("a.txt"), "staged1\nunstaged2\nline3\n");
        assert_eq!(repo.stash_list(), "");
    }

    #[tokio::test]
    async fn test_unchanged_step_hits_cache() {
        let repo = TestRepo::new();
        repo.write("a.txt", "a\n");
        repo.commit_all("a");
        let state = tempfile::tempdir().unwrap();
        let log = state.path().join("runs.log");
        let config = config(&format!(
            r#"
            [hooks.check.steps.counter]
            glob = "*.txt"
            check = 'echo ran >> "{}"'
            "#,
            log.display()
        ));
        let mut settings = settings(&state);
        settings.cache = true;
        let opts = HookOptions {
            all: true,
            ..Default::default()
        };
        run(&repo, &config, "check", opts.clone(), &settings).await;
        run(&repo, &config, "check", opts.clone(), &settings).await;
        assert_eq!(std::fs::read_to_string(&log).unwrap().lines().count(), 1);

        repo.write("a.txt", "b\n");
        run(&repo, &config, "check", opts, &settings).await;
        assert_eq!(std::fs::read_to_string(&log).unwrap().lines().count(), 2);
    }

    #[tokio::test]
    async fn test_fix_that_changes_files_is_not_cached() {
        let repo = TestRepo::new();
        repo.write("a.txt", "a\n");
        repo.commit_all("a");
        let state = tempfile::tempdir().unwrap();
        let log = state.path().join("runs.log");
        let config = config(&format!(
            r#"
            [hooks.fix.steps.appender]
            glob = "*.txt"
            fix = 'echo ran >> "{}"; echo x >> {{{{files}}}}'
            [hooks.fix.steps.noop]
            glob = "*.txt"
            fix = 'echo noop >> "{}"'
            "#,
            log.display(),
            log.display()
        ));
        let mut settings = settings(&state);
        settings.cache = true;
        settings.jobs = NonZero::new(1).unwrap();
        let opts = HookOptions {
            all: true,
            ..Default::default()
        };
        for _ in 0..2 {
            repo.write("a.txt", "a\n");
            run(&repo, &config, "fix", opts.clone(), &settings).await;
        }
        let log = std::fs::read_to_string(&log).unwrap();
        assert_eq!(log.lines().filter(|l| *l == "ran").count(), 2);
        assert_eq!(log.lines().filter(|l| *l == "noop").count(), 1);
    }

    #[tokio::test]
    async fn test_file_list_narrowing() {
        let repo = TestRepo::new();
        repo.write("src/a.ts", "");
        repo.write("src/b.js", "");
        repo.write("vendor/c.ts", "");
        repo.commit_all("files");
        let git = Git::open(&repo.root()).unwrap();
        let status = git.status().unwrap();

        let opts = HookOptions {
            all: true,
            glob: vec!["*.ts".into()],
            exclude: vec!["vendor/**".into()],
            ..Default::default()
        };
        let files = file_list(&opts, &git, &status, false).unwrap();
        assert_eq!(files, vec![PathBuf::from("src/a.ts")]);

        let opts = HookOptions {
            files: vec!["./src".into(), repo.path("vendor/c.ts").display().to_string(), "gone.ts".into()],
            ..Default::default()
        };
        let files = file_list(&opts, &git, &status, false).unwrap();
        assert_eq!(
            files,
            vec![
                PathBuf::from("src/a.ts"),
                PathBuf::from("src/b.js"),
                PathBuf::from("vendor/c.ts")
            ]
        );
    }

    #[test]
    fn test_run_type() {
        let settings = Settings::default();
        let hook = |name: &str| Hook {
            name: name.into(),
            ..Default::default()
        };
        let opts = HookOptions::default();
        assert_eq!(hook("pre-commit").run_type(&opts, &settings), RunType::Fix);
        assert_eq!(hook("fix").run_type(&opts, &settings), RunType::Fix);
        assert_eq!(hook("check").run_type(&opts, &settings), RunType::Check);
        let check = HookOptions {
            check: true,
            ..Default::default()
        };
        assert_eq!(hook("pre-commit").run_type(&check, &settings), RunType::Check);
        let no_fix = Settings {
            fix: false,
            ..Default::default()
        };
        assert_eq!(hook("pre-commit").run_type(&opts, &no_fix), RunType::Check);
    }

    #[test]
    fn test_stash_default() {
        let settings = Settings::default();
        let opts = HookOptions::default();
        let pre_commit = Hook {
            name: "pre-commit".into(),
            ..Default::default()
        };
        assert_eq!(
            pre_commit.stash_method(&opts, &settings, RunType::Fix),
            StashMethod::Git
        );
        assert_eq!(
            pre_commit.stash_method(&opts, &settings, RunType::Check),
            StashMethod::None
        );
        let opts = HookOptions {
            stash: Some("patch-file".into()),
            ..Default::default()
        };
        assert_eq!(
            pre_commit.stash_method(&opts, &settings, RunType::Check),
            StashMethod::PatchFile
        );
    }
}
