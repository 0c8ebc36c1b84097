use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use eyre::{WrapErr, bail};
use indexmap::{IndexMap, IndexSet};
use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::hook::{Hook, HookReport, SkipReason};
use crate::hook_options::HookOptions;
use crate::scheduler::group_steps;
use crate::settings::Settings;
use crate::step::{CommandTemplate, Pattern, Step};
use crate::{Result, env, glob};

const CONFIG_FILES: &[&str] = &["hk.toml", "hk.yaml", "hk.yml", "hk.json"];

/// Resolved hook definitions.
///
/// ```toml
/// skip_steps = ["slow-lint"]
/// env = { NODE_OPTIONS = "--max-old-space-size=4096" }
///
/// [hooks.pre-commit.steps.prettier]
/// glob = ["*.ts"]
/// check = "prettier --check {{files}}"
/// fix = "prettier --write {{files}}"
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(debug_assertions, serde(deny_unknown_fields))]
pub struct Config {
    #[serde(skip)]
    pub path: PathBuf,
    #[serde(default)]
    pub hooks: IndexMap<String, Hook>,
    /// Merged under every step's own `env`
    #[serde(default)]
    pub env: IndexMap<String, String>,
    /// Skip reasons that are printed when a step is skipped
    pub display_skip_reasons: Option<Vec<String>>,
    #[serde(default)]
    pub skip_steps: Vec<String>,
    #[serde(default)]
    pub skip_hooks: Vec<String>,
    pub fail_fast: Option<bool>,
}

impl Config {
    /// Loads `HK_FILE` or the nearest `hk.toml`/`hk.yaml`/`hk.json` above the
    /// working directory. No file means no hooks.
    pub fn get() -> Result<Self> {
        let cwd = std::env::current_dir()?;
        let found = match env::HK_FILE.as_ref() {
            Some(path) => Some(cwd.join(path)),
            None => xx::file::find_up(&cwd, CONFIG_FILES),
        };
        match found {
            Some(path) => Self::load(&path),
            None => {
                debug!("no config file found, using default");
                Ok(Self::default())
            }
        }
    }

    #[tracing::instrument(level = "info", name = "config.load", fields(path = %path.display()))]
    pub fn load(path: &Path) -> Result<Self> {
        let raw = xx::file::read_to_string(path)
            .wrap_err_with(|| format!("failed to read config file: {}", path.display()))?;
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or_default();
        let mut config = Self::parse(&raw, ext)
            .wrap_err_with(|| format!("failed to parse config file: {}", path.display()))?;
        config.path = path.to_path_buf();
        Ok(config)
    }

    /// Parses config text in the format named by `ext` and validates it.
    pub fn parse(raw: &str, ext: &str) -> Result<Self> {
        let mut config: Config = match ext {
            "toml" => toml::from_str(raw)?,
            "yaml" | "yml" => serde_yaml::from_str(raw)?,
            "json" => serde_json::from_str(raw)?,
            _ => bail!("unsupported config file extension: {ext}"),
        };
        config.init();
        config.validate()?;
        Ok(config)
    }

    fn init(&mut self) {
        for (name, hook) in self.hooks.iter_mut() {
            hook.init(name);
        }
    }

    /// Rejects definitions that cannot run as written, before any step runs.
    pub fn validate(&self) -> Result<()> {
        for name in self.display_skip_reasons.iter().flatten() {
            if !SkipReason::KEYS.contains(&name.as_str()) {
                return Err(Error::config(
                    "display_skip_reasons",
                    format!("unknown skip reason `{name}`"),
                )
                .into());
            }
        }
        for hook in self.hooks.values() {
            for step in hook.steps.values() {
                validate_step(step)?;
            }
            validate_depends(&hook.steps)?;
        }
        Ok(())
    }

    pub fn display_skip_reasons(&self) -> IndexSet<String> {
        match &self.display_skip_reasons {
            Some(reasons) => reasons.iter().cloned().collect(),
            None => SkipReason::KEYS
                .iter()
                .filter(|k| **k != "no-files-to-process")
                .map(|k| k.to_string())
                .collect(),
        }
    }

    pub async fn run_hook(
        &self,
        name: &str,
        opts: HookOptions,
        settings: &Settings,
    ) -> Result<HookReport> {
        match self.hooks.get(name) {
            Some(hook) => hook.run(self, opts, settings).await,
            None => {
                let hook_names: Vec<&str> = self.hooks.keys().map(|s| s.as_str()).collect();
                match xx::suggest::did_you_mean(name, &hook_names) {
                    Some(suggestion) => bail!("hook `{name}` not found. {suggestion}"),
                    None => bail!("hook `{name}` not found"),
                }
            }
        }
    }
}

fn validate_step(step: &Step) -> Result<()> {
    let defect = |message: String| Error::config(&step.name, message);
    for (field, pattern) in [("glob", &step.glob), ("exclude", &step.exclude)] {
        match pattern {
            Some(Pattern::Globs(globs)) => {
                glob::GlobMatcher::new(globs).map_err(|e| defect(format!("bad {field}: {e}")))?;
            }
            Some(Pattern::Regex { pattern, .. }) => {
                regex::Regex::new(pattern).map_err(|e| defect(format!("bad {field}: {e}")))?;
            }
            None => {}
        }
    }
    if let Some(stage) = &step.stage {
        glob::GlobMatcher::new(stage).map_err(|e| defect(format!("bad stage glob: {e}")))?;
    }
    if step.check_first && (step.check_script().is_none() || step.fix.is_none()) {
        return Err(defect("check_first needs both a check and fix".into()).into());
    }
    let scripts = [&step.check, &step.check_list_files, &step.check_diff, &step.fix];
    for script in scripts.into_iter().flatten() {
        CommandTemplate::parse(&script.to_string()).map_err(|e| defect(e.to_string()))?;
    }
    Ok(())
}

/// Every `depends` must name another step of the same hook that can finish
/// first: not itself, not part of a cycle, and not behind an exclusive step
/// that only starts after this one.
fn validate_depends(steps: &IndexMap<String, Step>) -> Result<()> {
    let group_of: HashMap<&str, usize> = group_steps(steps.values())
        .into_iter()
        .enumerate()
        .flat_map(|(group, members)| members.into_iter().map(move |idx| (idx, group)))
        .filter_map(|(idx, group)| steps.get_index(idx).map(|(name, _)| (name.as_str(), group)))
        .collect();
    for step in steps.values() {
        for dep in &step.depends {
            let Some(dep_group) = group_of.get(dep.as_str()) else {
                let names = steps.keys().map(|s| s.as_str()).collect_vec();
                let hint = xx::suggest::did_you_mean(dep, &names).unwrap_or_default();
                let message = format!("depends on unknown step `{dep}`. {hint}");
                return Err(Error::config(&step.name, message.trim_end()).into());
            };
            if *dep_group > group_of[step.name.as_str()] {
                return Err(Error::config(
                    &step.name,
                    format!("depends on `{dep}`, which runs after an exclusive step that follows it"),
                )
                .into());
            }
        }
    }
    if let Some(cycle) = depends_cycle(steps) {
        let message = format!("depends cycle: {}", cycle.join(" -> "));
        return Err(Error::config(&cycle[0], message).into());
    }
    Ok(())
}

/// A path of step names that leads back to its first element, if any.
fn depends_cycle(steps: &IndexMap<String, Step>) -> Option<Vec<String>> {
    fn visit<'a>(
        name: &'a str,
        steps: &'a IndexMap<String, Step>,
        path: &mut Vec<&'a str>,
        done: &mut HashSet<&'a str>,
    ) -> Option<Vec<String>> {
        if let Some(pos) = path.iter().position(|n| *n == name) {
            let mut cycle = path[pos..].iter().map(|n| n.to_string()).collect_vec();
            cycle.push(name.to_string());
            return Some(cycle);
        }
        if !done.insert(name) {
            return None;
        }
        path.push(name);
        for dep in steps.get(name).into_iter().flat_map(|s| &s.depends) {
            if let Some(cycle) = visit(dep, steps, path, done) {
                return Some(cycle);
            }
        }
        path.pop();
        None
    }

    let mut done = HashSet::new();
    steps
        .keys()
        .find_map(|name| visit(name, steps, &mut vec![], &mut done))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_toml() {
        let config = Config::parse(
            r#"
            skip_steps = ["slow"]
            env = { SHARED = "1" }

            [hooks.pre-commit]
            fail_fast = false

            [hooks.pre-commit.steps.prettier]
            glob = ["*.ts"]
            check = "prettier --check {{files}}"
            fix = "prettier --write {{files}}"

            [hooks.pre-commit.steps.jq]
            glob = "*.json"
            check = "jq . {{files}}"
            "#,
            "toml",
        )
        .unwrap();
        let hook = &config.hooks["pre-commit"];
        assert_eq!(hook.name, "pre-commit");
        assert_eq!(hook.fail_fast, Some(false));
        assert_eq!(hook.steps.keys().collect::<Vec<_>>(), vec!["prettier", "jq"]);
        assert_eq!(hook.steps["jq"].name, "jq");
        assert_eq!(config.skip_steps, vec!["slow"]);
        assert_eq!(config.env["SHARED"], "1");
    }

    #[test]
    fn test_parse_yaml_and_json() {
        let yaml = Config::parse(
            "hooks:\n  check:\n    steps:\n      lint:\n        check: lint {{files}}\n",
            "yaml",
        )
        .unwrap();
        let json = Config::parse(
            r#"{"hooks": {"check": {"steps": {"lint": {"check": "lint {{files}}"}}}}}"#,
            "json",
        )
        .unwrap();
        assert_eq!(yaml.hooks, json.hooks);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hk.toml");
        std::fs::write(&path, "[hooks.check.steps.a]\ncheck = \"true\"\n").unwrap();
        let config = Config::load(&path).unwrap();
        assert_eq!(config.path, path);
        assert!(config.hooks["check"].steps.contains_key("a"));
    }

    fn defect(raw: &str) -> String {
        let err = Config::parse(raw, "toml").unwrap_err();
        let err = err.downcast_ref::<Error>().expect("configuration defect");
        assert!(matches!(err, Error::ConfigurationDefect { .. }));
        err.to_string()
    }

    #[test]
    fn test_defects() {
        let msg = defect("[hooks.check.steps.a]\nglob = \"[\"\ncheck = \"true\"\n");
        assert!(msg.contains("invalid step a"), "{msg}");

        let msg = defect("[hooks.fix.steps.b]\ncheck_first = true\ncheck = \"true\"\n");
        assert!(msg.contains("check_first"), "{msg}");

        let msg = defect("[hooks.fix.steps.c]\nfix = \"cp {{files}} {{files}}\"\n");
        assert!(msg.contains("placeholder"), "{msg}");

        let msg = defect("display_skip_reasons = [\"bogus\"]\n");
        assert!(msg.contains("bogus"), "{msg}");
    }

    #[test]
    fn test_depends_defects() {
        let msg = defect("[hooks.check.steps.a]\ncheck = \"true\"\ndepends = [\"lint\"]\n");
        assert!(msg.contains("unknown step `lint`"), "{msg}");

        let msg = defect(
            r#"
            [hooks.check.steps.a]
            check = "true"
            depends = ["b"]
            [hooks.check.steps.b]
            check = "true"
            depends = ["a"]
            "#,
        );
        assert!(msg.contains("a -> b -> a"), "{msg}");

        let msg = defect("[hooks.check.steps.a]\ncheck = \"true\"\ndepends = [\"a\"]\n");
        assert!(msg.contains("a -> a"), "{msg}");

        let msg = defect(
            r#"
            [hooks.check.steps.a]
            check = "true"
            depends = ["c"]
            [hooks.check.steps.b]
            check = "true"
            exclusive = true
            [hooks.check.steps.c]
            check = "true"
            "#,
        );
        assert!(msg.contains("runs after an exclusive step"), "{msg}");
    }

    #[test]
    fn test_depends_on_earlier_or_later_step_in_group() {
        Config::parse(
            r#"
            [hooks.check.steps.a]
            check = "true"
            depends = ["b"]
            [hooks.check.steps.b]
            check = "true"
            [hooks.check.steps.c]
            check = "true"
            exclusive = true
            depends = ["a"]
            "#,
            "toml",
        )
        .unwrap();
    }

    #[test]
    fn test_default_display_skip_reasons() {
        let reasons = Config::default().display_skip_reasons();
        assert!(reasons.contains("disabled-by-cli"));
        assert!(reasons.contains("condition-false"));
        assert!(!reasons.contains("no-files-to-process"));
    }
}
