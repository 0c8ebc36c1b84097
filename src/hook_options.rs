use std::path::PathBuf;

use crate::git::StashMethod;

/// Per-invocation flags shared by `run`, `check` and `fix`.
#[derive(Debug, Clone, Default, clap::Args)]
pub struct HookOptions {
    /// Run on specific files
    #[clap(conflicts_with = "all", value_hint = clap::ValueHint::FilePath)]
    pub files: Vec<String>,
    /// Run on all files instead of just staged files
    #[clap(short, long)]
    pub all: bool,
    /// Run check commands
    #[clap(short, long, overrides_with = "fix")]
    pub check: bool,
    /// Exclude files matching these globs
    #[clap(short, long)]
    pub exclude: Vec<String>,
    /// Run fix commands (the default for `fix` and `pre-commit` unless HK_FIX=0)
    #[clap(short, long, overrides_with = "check")]
    pub fix: bool,
    /// Only run on files matching these globs
    #[clap(short, long)]
    pub glob: Vec<String>,
    /// Run only specific step(s)
    #[clap(short = 'S', long)]
    pub step: Vec<String>,
    /// Skip specific step(s)
    #[clap(long, value_name = "STEP")]
    pub skip_step: Vec<String>,
    /// Abandon steps that have not started after the first failure
    #[clap(long, overrides_with = "no_fail_fast")]
    pub fail_fast: bool,
    /// Run every step even if some fail
    #[clap(long, overrides_with = "fail_fast")]
    pub no_fail_fast: bool,
    /// How to hide unstaged changes while steps run
    #[clap(long, value_parser = ["git", "patch-file", "none"])]
    pub stash: Option<String>,
    /// Add fixed files back to the index
    #[clap(long, overrides_with = "no_stage")]
    pub stage: bool,
    /// Leave fixed files unstaged
    #[clap(long, overrides_with = "stage")]
    pub no_stage: bool,
    /// Repository root; discovered from the working directory when unset
    #[clap(skip)]
    pub root: Option<PathBuf>,
}

impl HookOptions {
    pub fn fail_fast(&self) -> Option<bool> {
        if self.fail_fast {
            Some(true)
        } else if self.no_fail_fast {
            Some(false)
        } else {
            None
        }
    }

    pub fn should_stage(&self) -> Option<bool> {
        if self.stage {
            Some(true)
        } else if self.no_stage {
            Some(false)
        } else {
            None
        }
    }

    pub fn stash_method(&self) -> Option<StashMethod> {
        self.stash.as_deref().and_then(|s| s.parse().ok())
    }
}
