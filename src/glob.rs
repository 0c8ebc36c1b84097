//! Glob and regex matching over repository-relative paths.
//!
//! `*` and `?` never cross a `/`, `**` spans any number of directories, and a
//! glob without any `/` is matched against the file name so `Cargo.toml`
//! finds every `Cargo.toml` in the tree including the root one.

use std::path::{Path, PathBuf};

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use itertools::Itertools;
use regex::Regex;

use crate::Result;
use crate::step::Pattern;

pub struct GlobMatcher {
    set: GlobSet,
}

impl GlobMatcher {
    pub fn new<S: AsRef<str>>(globs: &[S]) -> Result<Self> {
        let mut gb = GlobSetBuilder::new();
        for g in globs {
            let g = normalize(g.as_ref());
            let glob = GlobBuilder::new(&g)
                .literal_separator(true)
                .empty_alternates(true)
                .build()?;
            gb.add(glob);
        }
        Ok(Self { set: gb.build()? })
    }

    pub fn is_match(&self, path: &Path) -> bool {
        self.set.is_match(path)
    }
}

fn normalize(glob: &str) -> String {
    let glob = glob.trim_start_matches("./");
    if glob.contains('/') {
        glob.trim_start_matches('/').to_string()
    } else {
        format!("**/{glob}")
    }
}

/// Whether a glob can name a file at all. Empty globs and globs ending in a
/// directory separator (`**/`, `dist/`) match directories only.
pub fn names_files(glob: &str) -> bool {
    let glob = glob.trim();
    !glob.is_empty() && !glob.ends_with('/')
}

pub fn get_matches<P: AsRef<Path>>(globs: &[String], files: &[P]) -> Result<Vec<PathBuf>> {
    let matcher = GlobMatcher::new(globs)?;
    Ok(files
        .iter()
        .map(|f| f.as_ref())
        .filter(|f| matcher.is_match(f))
        .map(Path::to_path_buf)
        .collect_vec())
}

/// Strips `dir` from `path`, or `None` when `path` lies outside it.
pub fn relative_to<'a>(path: &'a Path, dir: Option<&str>) -> Option<&'a Path> {
    match dir.map(|d| d.trim_matches('/')).filter(|d| !d.is_empty() && *d != ".") {
        Some(dir) => path.strip_prefix(dir).ok(),
        None => Some(path),
    }
}

/// Files under `dir` whose dir-relative path matches `pattern`. The returned
/// paths stay repository-relative.
pub fn get_pattern_matches<P: AsRef<Path>>(
    pattern: &Pattern,
    files: &[P],
    dir: Option<&str>,
) -> Result<Vec<PathBuf>> {
    let scoped = files
        .iter()
        .map(|f| f.as_ref())
        .filter_map(|f| relative_to(f, dir).map(|rel| (f, rel)))
        .collect_vec();

    let matches = match pattern {
        Pattern::Globs(globs) => {
            let matcher = GlobMatcher::new(globs)?;
            scoped
                .into_iter()
                .filter(|(_, rel)| matcher.is_match(rel))
                .map(|(f, _)| f.to_path_buf())
                .collect_vec()
        }
        Pattern::Regex { pattern, .. } => {
            let re = Regex::new(pattern)?;
            scoped
                .into_iter()
                .filter(|(_, rel)| rel.to_str().is_some_and(|s| re.is_match(s)))
                .map(|(f, _)| f.to_path_buf())
                .collect_vec()
        }
    };
    Ok(matches)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::rel;

    fn globs(g: &[&str]) -> Pattern {
        Pattern::Globs(g.iter().map(|s| s.to_string()).collect())
    }

    #[test]
    fn test_bare_name_matches_any_depth() {
        let files = rel(&["package.json", "web/package.json", "web/a/package.json", "web/x.json"]);
        let matches = get_matches(&["package.json".to_string()], &files).unwrap();
        assert_eq!(matches, rel(&["package.json", "web/package.json", "web/a/package.json"]));
    }

    #[test]
    fn test_single_level_and_recursive_wildcards() {
        let files = rel(&["src/a.rs", "src/sub/b.rs", "c.rs"]);
        let single = get_matches(&["src/*.rs".to_string()], &files).unwrap();
        assert_eq!(single, rel(&["src/a.rs"]));
        let recursive = get_matches(&["src/**/*.rs".to_string()], &files).unwrap();
        assert_eq!(recursive, rel(&["src/a.rs", "src/sub/b.rs"]));
    }

    #[test]
    fn test_dir_scope_excludes_outside_files() {
        let files = rel(&["a.ts", "ui/b.ts", "ui/c.html", "ui/d.md", "api/e.ts"]);
        let matches =
            get_pattern_matches(&globs(&["*.ts", "*.html"]), &files, Some("ui")).unwrap();
        assert_eq!(matches, rel(&["ui/b.ts", "ui/c.html"]));
    }

    #[test]
    fn test_dir_scope_does_not_match_prefix_siblings() {
        let files = rel(&["ui/a.ts", "ui-kit/b.ts"]);
        let matches = get_pattern_matches(&globs(&["*.ts"]), &files, Some("ui/")).unwrap();
        assert_eq!(matches, rel(&["ui/a.ts"]));
    }

    #[test]
    fn test_regex_is_relative_to_dir() {
        let pattern = Pattern::Regex {
            _type: "regex".into(),
            pattern: r"^[^/]+\.py$".into(),
        };
        let files = rel(&["tools/a.py", "tools/lib/b.py", "c.py"]);
        let matches = get_pattern_matches(&pattern, &files, Some("tools")).unwrap();
        assert_eq!(matches, rel(&["tools/a.py"]));
    }

    #[test]
    fn test_names_files() {
        assert!(names_files("*.rs"));
        assert!(names_files("**/*"));
        assert!(!names_files("**/"));
        assert!(!names_files("dist/"));
        assert!(!names_files(""));
    }
}
