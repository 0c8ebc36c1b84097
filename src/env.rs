//! Raw process environment.
//!
//! These statics are read once, when [`crate::settings::Settings::from_env`]
//! builds the run configuration. Nothing else in the engine should reach for
//! them.

pub use std::env::*;
use std::{path::PathBuf, sync::LazyLock};

use indexmap::IndexSet;

use crate::git::StashMethod;
use crate::trace::TraceMode;

pub static HOME_DIR: LazyLock<PathBuf> = LazyLock::new(|| dirs::home_dir().unwrap_or_default());
pub static HK_STATE_DIR: LazyLock<PathBuf> = LazyLock::new(|| {
    var_path("HK_STATE_DIR").unwrap_or(
        dirs::state_dir()
            .unwrap_or(HOME_DIR.join(".local").join("state"))
            .join("hk-engine"),
    )
});
pub static HK_CACHE_DIR: LazyLock<PathBuf> = LazyLock::new(|| {
    var_path("HK_CACHE_DIR").unwrap_or(
        dirs::cache_dir()
            .unwrap_or(HOME_DIR.join(".cache"))
            .join("hk-engine"),
    )
});
pub static HK_FILE: LazyLock<Option<PathBuf>> = LazyLock::new(|| var_path("HK_FILE"));
pub static HK_LOG: LazyLock<log::LevelFilter> = LazyLock::new(|| {
    var_log_level("HK_LOG")
        .or(var_log_level("HK_LOG_LEVEL"))
        .unwrap_or(log::LevelFilter::Info)
});

pub static HK_STASH: LazyLock<Option<StashMethod>> = LazyLock::new(|| {
    if var_false("HK_STASH") {
        Some(StashMethod::None)
    } else {
        var("HK_STASH").ok().and_then(|v| match v.parse() {
            Ok(method) => Some(method),
            Err(_) => {
                warn!("ignoring invalid HK_STASH value: {v}");
                None
            }
        })
    }
});
pub static HK_STASH_UNTRACKED: LazyLock<bool> = LazyLock::new(|| !var_false("HK_STASH_UNTRACKED"));
pub static HK_FIX: LazyLock<bool> = LazyLock::new(|| !var_false("HK_FIX"));
pub static HK_STAGE: LazyLock<bool> = LazyLock::new(|| !var_false("HK_STAGE"));
pub static HK_FAIL_FAST: LazyLock<Option<bool>> = LazyLock::new(|| {
    var("HK_FAIL_FAST")
        .ok()
        .map(|_| !var_false("HK_FAIL_FAST"))
});
pub static HK_JOBS: LazyLock<Option<usize>> =
    LazyLock::new(|| var("HK_JOBS").ok().and_then(|v| v.parse().ok()));
pub static HK_PROGRESS: LazyLock<bool> = LazyLock::new(|| !var_false("HK_PROGRESS"));

pub static HK_SKIP_HOOK: LazyLock<IndexSet<String>> =
    LazyLock::new(|| var_csv("HK_SKIP_HOOK").unwrap_or_default());
pub static HK_PROFILE: LazyLock<IndexSet<String>> = LazyLock::new(|| {
    var_csv("HK_PROFILE")
        .or(var_csv("HK_PROFILES"))
        .unwrap_or_default()
});
pub static HK_SKIP_STEPS: LazyLock<IndexSet<String>> = LazyLock::new(|| {
    var_csv("HK_SKIP_STEPS")
        .or(var_csv("HK_SKIP_STEP"))
        .unwrap_or_default()
});

// Defaults to enabled in release builds and disabled in debug builds
pub static HK_CACHE: LazyLock<bool> = LazyLock::new(|| {
    var("HK_CACHE")
        .map(|_| !var_false("HK_CACHE"))
        .unwrap_or(!cfg!(debug_assertions))
});

pub static HK_TRACE: LazyLock<TraceMode> =
    LazyLock::new(|| match var("HK_TRACE").map(|v| v.to_lowercase()) {
        Ok(v) if v == "json" => TraceMode::Json,
        Ok(v) if v == "1" || v == "true" || v == "text" => TraceMode::Text,
        _ => TraceMode::Off,
    });
pub static HK_JSON: LazyLock<bool> = LazyLock::new(|| var_true("HK_JSON"));

pub static GIT_INDEX_FILE: LazyLock<Option<PathBuf>> = LazyLock::new(|| var_path("GIT_INDEX_FILE"));

fn var_path(name: &str) -> Option<PathBuf> {
    var(name).map(PathBuf::from).ok()
}

fn var_csv(name: &str) -> Option<IndexSet<String>> {
    var(name).ok().map(|val| split_list(&val))
}

/// Splits a comma and/or whitespace separated list, dropping empty entries.
pub fn split_list(val: &str) -> IndexSet<String> {
    val.split(|c: char| c == ',' || c.is_whitespace())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn var_log_level(name: &str) -> Option<log::LevelFilter> {
    var(name).ok().and_then(|level| level.parse().ok())
}

fn var_true(name: &str) -> bool {
    var(name)
        .map(|val| val.to_lowercase())
        .map(|val| val == "true" || val == "1")
        .unwrap_or(false)
}

fn var_false(name: &str) -> bool {
    var(name)
        .map(|val| val.to_lowercase())
        .map(|val| val == "false" || val == "0")
        .unwrap_or(false)
}
