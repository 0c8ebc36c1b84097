use std::{num::NonZero, path::PathBuf};

use indexmap::IndexSet;

use crate::env;
use crate::git::StashMethod;
use crate::trace::TraceMode;

/// Run configuration, resolved once at startup from the environment and
/// global flags and then only read.
///
/// Per-invocation hook flags (`--skip-step`, `--stash`, ...) are applied on
/// top of this when a hook runs; see [`crate::hook::Hook::run`].
#[derive(Debug, Clone)]
pub struct Settings {
    pub jobs: NonZero<usize>,
    /// `None` defers to the hook, which defaults to true.
    pub fail_fast: Option<bool>,
    /// Whether fix runs are allowed at all (`HK_FIX=0` forces check mode).
    pub fix: bool,
    pub stage: bool,
    pub stash: Option<StashMethod>,
    pub stash_untracked: bool,
    pub skip_steps: IndexSet<String>,
    pub skip_hooks: IndexSet<String>,
    /// Profile names; a `!` prefix disables one
    pub profiles: IndexSet<String>,
    pub cache: bool,
    pub cache_dir: PathBuf,
    pub state_dir: PathBuf,
    pub trace: TraceMode,
    pub progress: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            jobs: default_jobs(),
            fail_fast: None,
            fix: true,
            stage: true,
            stash: None,
            stash_untracked: true,
            skip_steps: IndexSet::new(),
            skip_hooks: IndexSet::new(),
            profiles: IndexSet::new(),
            cache: false,
            cache_dir: env::HK_CACHE_DIR.clone(),
            state_dir: env::HK_STATE_DIR.clone(),
            trace: TraceMode::Off,
            progress: false,
        }
    }
}

impl Settings {
    pub fn from_env() -> Self {
        let trace = match *env::HK_TRACE {
            TraceMode::Text if *env::HK_JSON => TraceMode::Json,
            mode => mode,
        };
        Self {
            jobs: env::HK_JOBS
                .and_then(NonZero::new)
                .unwrap_or_else(default_jobs),
            fail_fast: *env::HK_FAIL_FAST,
            fix: *env::HK_FIX,
            stage: *env::HK_STAGE,
            stash: *env::HK_STASH,
            stash_untracked: *env::HK_STASH_UNTRACKED,
            skip_steps: env::HK_SKIP_STEPS.clone(),
            skip_hooks: env::HK_SKIP_HOOK.clone(),
            profiles: env::HK_PROFILE.clone(),
            cache: *env::HK_CACHE,
            cache_dir: env::HK_CACHE_DIR.clone(),
            state_dir: env::HK_STATE_DIR.clone(),
            trace,
            progress: *env::HK_PROGRESS
                && !is_ci::cached()
                && console::user_attended_stderr(),
        }
    }

    pub fn with_jobs(mut self, jobs: Option<NonZero<usize>>) -> Self {
        if let Some(jobs) = jobs {
            self.jobs = jobs;
        }
        self
    }

    /// `--trace` turns on text tracing unless the environment already asked
    /// for more; `--json` upgrades whichever mode is active to JSON.
    pub fn with_trace(mut self, trace: bool, json: bool) -> Self {
        if trace && self.trace == TraceMode::Off {
            self.trace = TraceMode::Text;
        }
        if json && self.trace != TraceMode::Off {
            self.trace = TraceMode::Json;
        }
        self
    }

    /// `--profile` flags layered over `HK_PROFILE`. `!name` disables a
    /// profile the environment enabled and the other way round.
    pub fn with_profiles(mut self, profiles: &[String]) -> Self {
        for profile in profiles {
            match profile.strip_prefix('!') {
                Some(name) => self.profiles.shift_remove(name),
                None => self.profiles.shift_remove(&format!("!{profile}")),
            };
            self.profiles.insert(profile.clone());
        }
        self
    }

    pub fn enabled_profiles(&self) -> IndexSet<String> {
        self.profiles
            .iter()
            .filter(|p| !p.starts_with('!'))
            .cloned()
            .collect()
    }

    pub fn disabled_profiles(&self) -> IndexSet<String> {
        self.profiles
            .iter()
            .filter_map(|p| p.strip_prefix('!'))
            .map(str::to_string)
            .collect()
    }

    pub fn with_progress(mut self, progress: bool) -> Self {
        self.progress = self.progress && progress;
        self
    }
}

fn default_jobs() -> NonZero<usize> {
    std::thread::available_parallelism().unwrap_or(NonZero::<usize>::MIN)
}
