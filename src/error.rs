use std::path::PathBuf;

use itertools::Itertools;

/// Failures the engine names explicitly.
///
/// Most plumbing errors travel as plain [`eyre::Report`]s; these variants are
/// the ones callers match on or that decide how a run is reported.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A step or hook definition that cannot be run as written.
    #[error("invalid step {step}: {message}")]
    ConfigurationDefect { step: String, message: String },

    /// Hidden changes collided with a fixer's edits; markers were written.
    #[error("conflict markers written to {}", .files.iter().map(|f| f.display()).join(", "))]
    WorkingTreeConflict { files: Vec<PathBuf> },

    /// The result cache could not be read or written.
    #[error("cache {}: {message}", .path.display())]
    CacheStoreFailure { path: PathBuf, message: String },

    /// The step command could not be started at all.
    #[error("{step}: failed to run `{command}`: {message}")]
    ToolInvocation {
        step: String,
        command: String,
        message: String,
    },

    #[error("{0} test(s) failed")]
    TestsFailed(usize),

    #[error("{hook} failed: {}", .failed.join(", "))]
    HookFailed { hook: String, failed: Vec<String> },

    /// The run was interrupted before every step could start.
    #[error("{hook} aborted; not run: {}", .not_run.join(", "))]
    HookAborted { hook: String, not_run: Vec<String> },
}

impl Error {
    pub fn config(step: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConfigurationDefect {
            step: step.into(),
            message: message.into(),
        }
    }
}
