//! Files named in the output of `check_list_files` and `check_diff`.
//!
//! - `check_list_files`: one path per line
//! - `check_diff`: a unified diff, paths taken from its `---` and `+++` lines
//!
//! Paths in the output are relative to the step's `dir`, where the command
//! ran. Both parsers return the job files that were named, in job order, and
//! the named paths that are not job files.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use indexmap::IndexSet;

use super::types::Step;

/// Canonical form for comparing paths; a path that does not exist is kept
/// as it is.
fn try_canonicalize(path: &Path) -> PathBuf {
    match path.canonicalize() {
        Ok(p) => p,
        Err(err) => {
            trace!("failed to canonicalize {}: {err}", path.display());
            path.to_path_buf()
        }
    }
}

impl Step {
    fn command_dir(&self, root: &Path) -> PathBuf {
        match &self.dir {
            Some(dir) => root.join(dir),
            None => root.to_path_buf(),
        }
    }

    pub(crate) fn files_from_check_list(
        &self,
        root: &Path,
        job_files: &[PathBuf],
        stdout: &str,
    ) -> (Vec<PathBuf>, Vec<PathBuf>) {
        let paths = stdout.lines().map(str::trim).filter(|l| !l.is_empty());
        self.select_named(root, job_files, paths)
    }

    pub(crate) fn files_from_check_diff(
        &self,
        root: &Path,
        job_files: &[PathBuf],
        stdout: &str,
    ) -> (Vec<PathBuf>, Vec<PathBuf>) {
        self.select_named(root, job_files, diff_paths(stdout))
    }

    fn select_named<'a>(
        &self,
        root: &Path,
        job_files: &[PathBuf],
        named: impl IntoIterator<Item = &'a str>,
    ) -> (Vec<PathBuf>, Vec<PathBuf>) {
        let base = self.command_dir(root);
        let named: IndexSet<PathBuf> = named
            .into_iter()
            .map(|p| try_canonicalize(&base.join(p)))
            .collect();
        let files = job_files
            .iter()
            .filter(|f| named.contains(&try_canonicalize(&root.join(f))))
            .cloned()
            .collect::<Vec<_>>();
        let matched: HashSet<PathBuf> = files
            .iter()
            .map(|f| try_canonicalize(&root.join(f)))
            .collect();
        let extras = named
            .into_iter()
            .filter(|p| !matched.contains(p))
            .map(|p| p.strip_prefix(root).map(Path::to_path_buf).unwrap_or(p))
            .collect();
        (files, extras)
    }
}

/// Paths from the `---`/`+++` headers of a unified diff. Timestamps after a
/// tab are dropped, as is `/dev/null`. The `a/` and `b/` prefixes are only
/// stripped when the diff uses both, as git does.
fn diff_paths(stdout: &str) -> Vec<&str> {
    let git_style = stdout.lines().any(|l| l.starts_with("--- a/"))
        && stdout.lines().any(|l| l.starts_with("+++ b/"));
    stdout
        .lines()
        .filter_map(|line| {
            line.strip_prefix("--- ")
                .or_else(|| line.strip_prefix("+++ "))
        })
        .map(|path| path.split_once('\t').map_or(path, |(path, _)| path).trim())
        .filter(|path| !path.is_empty() && *path != "/dev/null")
        .map(|path| match git_style {
            true => path
                .strip_prefix("a/")
                .or_else(|| path.strip_prefix("b/"))
                .unwrap_or(path),
            false => path,
        })
        .collect()
}
