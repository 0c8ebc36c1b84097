//! Step definition types.
//!
//! - [`Step`] - one check/fix unit as declared in the config file
//! - [`Pattern`] - file selection (globs or a regex)
//! - [`Script`] - a command, optionally varying by platform
//! - [`RunType`] - check or fix
//! - [`OutputSummary`] - which captured stream goes into a step's output block

use std::{fmt, fmt::Display, str::FromStr};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_with::{DisplayFromStr, PickFirst, serde_as};

use crate::step_test::StepTest;

/// Globs or a regex selecting the files a step works on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Pattern {
    Regex {
        #[serde(skip_serializing)]
        _type: String,
        pattern: String,
    },
    Globs(Vec<String>),
}

impl<'de> Deserialize<'de> for Pattern {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        use serde::de::Error;
        use serde_json::Value;

        let value = Value::deserialize(deserializer)?;
        match value {
            Value::Object(ref map)
                if map.get("_type").and_then(Value::as_str) == Some("regex") =>
            {
                let pattern = map
                    .get("pattern")
                    .and_then(Value::as_str)
                    .ok_or_else(|| D::Error::custom("regex pattern requires `pattern`"))?;
                Ok(Pattern::Regex {
                    _type: "regex".to_string(),
                    pattern: pattern.to_string(),
                })
            }
            Value::String(s) => Ok(Pattern::Globs(vec![s])),
            Value::Array(arr) => arr
                .into_iter()
                .map(|v| match v {
                    Value::String(s) => Ok(s),
                    _ => Err(D::Error::custom("array elements must be strings")),
                })
                .collect::<Result<Vec<_>, _>>()
                .map(Pattern::Globs),
            _ => Err(D::Error::custom(
                "expected regex object, string, or array of strings",
            )),
        }
    }
}

/// A check/fix unit.
///
/// ```toml
/// [hooks.pre-commit.steps.prettier]
/// glob = ["*.ts", "*.html"]
/// dir = "ui"
/// check = "prettier --check {{files}}"
/// fix = "prettier --write {{files}}"
/// ```
#[serde_as]
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(debug_assertions, serde(deny_unknown_fields))]
pub struct Step {
    /// Set from the map key when the config is loaded
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub glob: Option<Pattern>,

    /// Files matching this are dropped even if `glob` matched them
    #[serde(default)]
    pub exclude: Option<Pattern>,

    /// Working directory for commands, relative to the repository root.
    /// Only files under it are selected and they are passed relative to it.
    pub dir: Option<String>,

    /// Shell used to run commands (default: `sh -o errexit -c`)
    #[serde_as(as = "Option<PickFirst<(_, DisplayFromStr)>>")]
    pub shell: Option<Script>,

    #[serde_as(as = "Option<PickFirst<(_, DisplayFromStr)>>")]
    pub check: Option<Script>,

    /// Prints the files needing a fix, one per line, and exits non-zero
    #[serde_as(as = "Option<PickFirst<(_, DisplayFromStr)>>")]
    pub check_list_files: Option<Script>,

    /// Prints a unified diff of the changes a fix would make
    #[serde_as(as = "Option<PickFirst<(_, DisplayFromStr)>>")]
    pub check_diff: Option<Script>,

    #[serde_as(as = "Option<PickFirst<(_, DisplayFromStr)>>")]
    pub fix: Option<Script>,

    /// In fix runs, run a check first and only run `fix` if it fails
    #[serde(default)]
    pub check_first: bool,

    /// Steps in the same hook that must finish before this one starts
    #[serde(default)]
    pub depends: Vec<String>,

    /// Run with no other step alongside
    #[serde(default)]
    pub exclusive: bool,

    /// Globs (relative to `dir`) of fixed files to add back to the index.
    /// Defaults to every job file the fix changed.
    pub stage: Option<Vec<String>>,

    #[serde(default)]
    pub env: IndexMap<String, String>,

    /// Expression that must not evaluate to `false` for the step to run
    pub condition: Option<String>,

    /// Profiles that must be enabled for the step to run; `!name` instead
    /// skips the step while `name` is enabled
    pub profiles: Option<Vec<String>>,

    #[serde(default)]
    pub tests: IndexMap<String, StepTest>,

    #[serde(default)]
    pub output_summary: OutputSummary,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum RunType {
    Check,
    Fix,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OutputSummary {
    #[default]
    Stderr,
    Stdout,
    Combined,
    Hide,
}

/// A command that may differ per platform; `other` is the fallback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Script {
    pub linux: Option<String>,
    pub macos: Option<String>,
    pub windows: Option<String>,
    pub other: Option<String>,
}

impl FromStr for Script {
    type Err = eyre::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self {
            linux: None,
            macos: None,
            windows: None,
            other: Some(s.to_string()),
        })
    }
}

impl Display for Script {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let other = self.other.as_deref().unwrap_or_default();
        if cfg!(target_os = "macos") {
            write!(f, "{}", self.macos.as_deref().unwrap_or(other))
        } else if cfg!(target_os = "linux") {
            write!(f, "{}", self.linux.as_deref().unwrap_or(other))
        } else if cfg!(target_os = "windows") {
            write!(f, "{}", self.windows.as_deref().unwrap_or(other))
        } else {
            write!(f, "{other}")
        }
    }
}
