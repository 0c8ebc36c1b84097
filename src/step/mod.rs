//! Steps: one check/fix unit of a hook.
//!
//! - [`types`] - config types (Step, Pattern, Script, RunType, OutputSummary)
//! - [`check_parsing`] - files named by `check_list_files` and `check_diff`
//! - [`command`] - `{{files}}` templates and shell quoting
//! - [`filtering`] - job and restage file selection
//! - [`runner`] - running a single command
//! - [`execution`] - the whole per-step sequence and its [`StepResult`]

mod check_parsing;
mod command;
mod execution;
mod filtering;
mod progress;
mod runner;
mod types;

pub use command::{CommandTemplate, ShellType};
pub use execution::{StepResult, StepStatus};
pub use filtering::restage_files;
pub use runner::{CommandOutcome, run_command};
pub use types::{OutputSummary, Pattern, RunType, Script, Step};
