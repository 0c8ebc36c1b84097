//! Git hook execution engine.
//!
//! A [`hook::Hook`] is a named set of [`step::Step`]s. Running a hook resolves
//! each step's files, hides changes the steps must not see, runs the steps
//! concurrently, restages what fixers changed and finally puts the hidden
//! changes back.

#[macro_use]
extern crate log;

pub mod cache;
pub mod cli;
pub mod condition;
pub mod config;
pub mod env;
pub mod error;
pub mod git;
pub mod glob;
pub mod hash;
pub mod hook;
pub mod hook_options;
pub mod logger;
pub mod merge;
pub mod output;
pub mod scheduler;
pub mod settings;
pub mod stash;
pub mod step;
pub mod test_runner;
pub mod trace;

#[cfg(test)]
pub(crate) mod test_support;

pub use eyre::Result;
