//! File selection for a single step.
//!
//! - job files: candidates under the step's `dir` matching `glob` and not `exclude`
//! - stage files: job files the fix changed that also match `stage`
//! - profiles: whether the enabled profiles let the step run

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use indexmap::IndexSet;
use itertools::Itertools;

use crate::hook::SkipReason;
use crate::{Result, glob};

use super::types::{Pattern, Step};

impl Step {
    /// Job fileset for this run, repository-relative, in candidate order.
    ///
    /// A step without a `glob` takes every candidate under its `dir`.
    pub fn job_files(&self, candidates: &[PathBuf]) -> Result<Vec<PathBuf>> {
        let dir = self.dir.as_deref();
        let mut files = match &self.glob {
            Some(pattern) => glob::get_pattern_matches(pattern, candidates, dir)?,
            None => candidates
                .iter()
                .filter(|f| glob::relative_to(f, dir).is_some())
                .cloned()
                .collect_vec(),
        };
        if let Some(exclude) = &self.exclude {
            let excluded: HashSet<PathBuf> = glob::get_pattern_matches(exclude, &files, dir)?
                .into_iter()
                .collect();
            files.retain(|f| !excluded.contains(f));
        }
        Ok(files)
    }

    /// Paths as the step's commands see them, relative to `dir`.
    pub fn command_paths(&self, files: &[PathBuf]) -> Vec<PathBuf> {
        files
            .iter()
            .filter_map(|f| glob::relative_to(f, self.dir.as_deref()))
            .map(Path::to_path_buf)
            .collect()
    }

    /// Whether an empty job fileset means there is nothing for this step to do.
    /// Steps without a `glob` still run once with no files.
    pub fn has_filters(&self) -> bool {
        self.glob.is_some() || self.exclude.is_some()
    }

    /// Every plain name in `profiles` must be enabled and not also disabled;
    /// a `!name` entry skips the step while `name` is enabled.
    pub fn profile_skip_reason(
        &self,
        enabled: &IndexSet<String>,
        disabled: &IndexSet<String>,
    ) -> Option<SkipReason> {
        let profiles = self.profiles.as_ref()?;
        let (negated, required): (Vec<&String>, Vec<&String>) =
            profiles.iter().partition(|p| p.starts_with('!'));
        let missing = required
            .iter()
            .filter(|p| !enabled.contains(p.as_str()))
            .map(|p| p.to_string())
            .collect_vec();
        if !missing.is_empty() {
            return Some(SkipReason::ProfileNotEnabled(missing));
        }
        let blocked = required.iter().any(|p| disabled.contains(p.as_str()))
            || negated
                .iter()
                .filter_map(|p| p.strip_prefix('!'))
                .any(|p| enabled.contains(p));
        blocked.then_some(SkipReason::ProfileExplicitlyDisabled)
    }

    pub fn stage_files(&self, job_files: &[PathBuf], modified: &[PathBuf]) -> Result<Vec<PathBuf>> {
        restage_files(job_files, modified, self.stage.as_deref(), self.dir.as_deref())
    }
}

/// Paths to add back to the index after a fix.
///
/// Only files that are both in `job_files` and in `modified` are considered,
/// so a `stage` glob can never pull in files the step was not given. With no
/// `stage` globs every modified job file is staged. Globs that cannot name a
/// file (`**/`, `dist/`) are dropped and stage nothing.
pub fn restage_files(
    job_files: &[PathBuf],
    modified: &[PathBuf],
    stage: Option<&[String]>,
    dir: Option<&str>,
) -> Result<Vec<PathBuf>> {
    let modified: HashSet<&PathBuf> = modified.iter().collect();
    let touched = job_files
        .iter()
        .filter(|f| modified.contains(f))
        .cloned()
        .collect_vec();
    let Some(stage) = stage else {
        return Ok(touched);
    };
    let globs = stage
        .iter()
        .filter(|g| glob::names_files(g))
        .cloned()
        .collect_vec();
    if globs.is_empty() {
        return Ok(vec![]);
    }
    glob::get_pattern_matches(&Pattern::Globs(globs), &touched, dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::rel;

    fn step(glob: &[&str], dir: Option<&str>) -> Step {
        Step {
            name: "test".into(),
            glob: Some(Pattern::Globs(glob.iter().map(|s| s.to_string()).collect())),
            dir: dir.map(String::from),
            ..Default::default()
        }
    }

    #[test]
    fn test_dir_scoped_job_files() {
        let candidates = rel(&[
            "index.ts",
            "ui/app.ts",
            "ui/page.html",
            "ui/nested/deep.ts",
            "ui-kit/button.ts",
            "server/main.ts",
        ]);
        let step = step(&["*.ts", "*.html"], Some("ui"));
        assert_eq!(
            step.job_files(&candidates).unwrap(),
            rel(&["ui/app.ts", "ui/page.html", "ui/nested/deep.ts"])
        );
        assert_eq!(
            step.command_paths(&rel(&["ui/app.ts", "ui/nested/deep.ts"])),
            rel(&["app.ts", "nested/deep.ts"])
        );
    }

    #[test]
    fn test_no_glob_takes_everything_under_dir() {
        let candidates = rel(&["a.rs", "crate/b.rs", "crate/c.toml"]);
        let step = Step {
            dir: Some("crate".into()),
            ..Default::default()
        };
        assert_eq!(
            step.job_files(&candidates).unwrap(),
            rel(&["crate/b.rs", "crate/c.toml"])
        );
        assert!(!step.has_filters());
    }

    #[test]
    fn test_exclude_wins() {
        let candidates = rel(&["src/a.js", "src/a.min.js", "dist/b.js"]);
        let mut step = step(&["**/*.js"], None);
        step.exclude = Some(Pattern::Globs(vec!["*.min.js".into(), "dist/**".into()]));
        assert_eq!(step.job_files(&candidates).unwrap(), rel(&["src/a.js"]));
    }

    #[test]
    fn test_profiles() {
        let enabled: IndexSet<String> = ["slow".to_string()].into_iter().collect();
        let disabled: IndexSet<String> = ["docs".to_string()].into_iter().collect();
        let mut step = step(&["*"], None);
        assert_eq!(step.profile_skip_reason(&enabled, &disabled), None);

        step.profiles = Some(vec!["slow".into()]);
        assert_eq!(step.profile_skip_reason(&enabled, &disabled), None);

        step.profiles = Some(vec!["slow".into(), "ci".into()]);
        assert_eq!(
            step.profile_skip_reason(&enabled, &disabled),
            Some(SkipReason::ProfileNotEnabled(vec!["ci".into()]))
        );

        step.profiles = Some(vec!["!slow".into()]);
        assert_eq!(
            step.profile_skip_reason(&enabled, &disabled),
            Some(SkipReason::ProfileExplicitlyDisabled)
        );
        assert_eq!(step.profile_skip_reason(&IndexSet::new(), &disabled), None);
    }

    #[test]
    fn test_restage_defaults_to_modified_job_files() {
        let job = rel(&["a.ts", "b.ts"]);
        let modified = rel(&["b.ts", "unrelated.ts"]);
        assert_eq!(restage_files(&job, &modified, None, None).unwrap(), rel(&["b.ts"]));
    }

    #[test]
    fn test_restage_never_leaves_job_fileset() {
        let job = rel(&["src/a.rs"]);
        let modified = rel(&["src/a.rs", "src/generated.rs", "README.md"]);
        let stage = vec!["*.rs".to_string(), "*.md".to_string()];
        assert_eq!(
            restage_files(&job, &modified, Some(&stage), None).unwrap(),
            rel(&["src/a.rs"])
        );
    }

    #[test]
    fn test_directory_only_stage_glob_stages_nothing() {
        let job = rel(&["src/a.rs", "b.rs"]);
        let stage = vec!["**/".to_string()];
        assert!(
            restage_files(&job, &job, Some(&stage), None)
                .unwrap()
                .is_empty()
        );
    }

    #[test]
    fn test_stage_globs_relative_to_dir() {
        let job = rel(&["ui/app.ts", "ui/style.css"]);
        let stage = vec!["*.ts".to_string()];
        assert_eq!(
            restage_files(&job, &job, Some(&stage), Some("ui")).unwrap(),
            rel(&["ui/app.ts"])
        );
    }
}
