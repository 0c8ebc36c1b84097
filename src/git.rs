use std::{
    collections::BTreeSet,
    ffi::OsString,
    path::{Path, PathBuf},
};

use eyre::{WrapErr, eyre};
use git2::{Repository, StatusOptions, StatusShow};
use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::Result;
use crate::env;

/// How unstaged changes are hidden from steps while a hook runs.
#[derive(
    Debug, Clone, Copy, Eq, PartialEq, Deserialize, Serialize, strum::EnumString, strum::Display,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum StashMethod {
    /// `git stash push --keep-index`
    Git,
    /// `git diff --binary` written to a patch file
    PatchFile,
    None,
}

/// Paths are relative to the repository root.
#[derive(Debug, Clone, Serialize, Default, PartialEq, Eq)]
pub struct GitStatus {
    pub staged_files: BTreeSet<PathBuf>,
    pub unstaged_files: BTreeSet<PathBuf>,
    pub untracked_files: BTreeSet<PathBuf>,
    pub modified_files: BTreeSet<PathBuf>,
    pub staged_added_files: BTreeSet<PathBuf>,
    pub staged_modified_files: BTreeSet<PathBuf>,
    pub staged_deleted_files: BTreeSet<PathBuf>,
    pub unstaged_modified_files: BTreeSet<PathBuf>,
    pub unstaged_deleted_files: BTreeSet<PathBuf>,
}

pub struct Git {
    root: PathBuf,
    repo: Repository,
}

impl Git {
    /// Finds the repository containing `cwd`.
    pub fn discover(cwd: &Path) -> Result<Self> {
        let root = xx::file::find_up(cwd, &[".git"])
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
            .ok_or(eyre!("failed to find git repository"))?;
        Self::open(&root)
    }

    pub fn open(root: &Path) -> Result<Self> {
        let repo = Repository::open(root).wrap_err("failed to open repository")?;
        if let Some(index_file) = &*env::GIT_INDEX_FILE {
            // `git commit -a` points hooks at .git/index.lock
            let index_file = root.join(index_file);
            let mut index = git2::Index::open(&index_file).wrap_err("failed to get index")?;
            repo.set_index(&mut index)?;
        }
        Ok(Self {
            root: root.to_path_buf(),
            repo,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn cmd<I, S>(&self, args: I) -> xx::process::XXExpression
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        let mut all: Vec<OsString> = vec!["-C".into(), self.root.clone().into()];
        all.extend(args.into_iter().map(Into::into));
        xx::process::cmd("git", all).on_stderr_line(|line| debug!("git: {line}"))
    }

    fn read<I, S>(&self, args: I) -> Result<String>
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        Ok(self.cmd(args).read()?)
    }

    fn run<I, S>(&self, args: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.cmd(args).run()?;
        Ok(())
    }

    fn exists(&self, path: &Path) -> bool {
        let path = self.root.join(path);
        path.exists() || std::fs::symlink_metadata(&path).is_ok()
    }

    #[tracing::instrument(level = "info", name = "git.status", skip(self))]
    pub fn status(&self) -> Result<GitStatus> {
        // stale stat info makes libgit2 report untouched files as modified
        let _ = self.run(["update-index", "-q", "--refresh"]);
        let mut status = GitStatus::default();
        let mut options = StatusOptions::new();
        options.include_untracked(true);
        options.recurse_untracked_dirs(true);
        options.renames_head_to_index(true);

        options.show(StatusShow::Index);
        let staged = self
            .repo
            .statuses(Some(&mut options))
            .wrap_err("failed to get staged statuses")?;
        for s in staged.iter() {
            let Some(path) = s.path().map(PathBuf::from) else {
                continue;
            };
            let st = s.status();
            if st.is_index_new() {
                status.staged_added_files.insert(path.clone());
            }
            if st.is_index_modified() || st.is_index_typechange() || st.is_index_renamed() {
                status.staged_modified_files.insert(path.clone());
            }
            if st.is_index_deleted() {
                status.staged_deleted_files.insert(path.clone());
            }
            if self.exists(&path) {
                status.modified_files.insert(path.clone());
                status.staged_files.insert(path);
            }
        }

        options.show(StatusShow::Workdir);
        let unstaged = self
            .repo
            .statuses(Some(&mut options))
            .wrap_err("failed to get unstaged statuses")?;
        for s in unstaged.iter() {
            let Some(path) = s.path().map(PathBuf::from) else {
                continue;
            };
            let st = s.status();
            if st.is_wt_new() {
                status.untracked_files.insert(path.clone());
            }
            if st.is_wt_modified() || st.is_wt_typechange() {
                status.unstaged_modified_files.insert(path.clone());
            }
            if st.is_wt_deleted() {
                status.unstaged_deleted_files.insert(path.clone());
            }
            if self.exists(&path) {
                status.modified_files.insert(path.clone());
                status.unstaged_files.insert(path);
            }
        }
        Ok(status)
    }

    /// Tracked and untracked (but not ignored) files that exist on disk.
    pub fn all_files(&self) -> Result<BTreeSet<PathBuf>> {
        let output = self.read(["ls-files", "-z", "--cached", "--others", "--exclude-standard"])?;
        Ok(output
            .split('\0')
            .filter(|p| !p.is_empty())
            .map(PathBuf::from)
            .filter(|p| self.exists(p))
            .collect())
    }

    #[tracing::instrument(level = "info", name = "git.add", skip_all, fields(count = paths.len()))]
    pub fn add(&self, paths: &[PathBuf]) -> Result<()> {
        if paths.is_empty() {
            return Ok(());
        }
        trace!("adding files: {:?}", paths);
        self.cmd(["add", "--"]).args(paths).run()?;
        Ok(())
    }

    /// Content of `path` as currently staged; `None` when it is not in the index.
    pub fn index_content(&self, path: &Path) -> Result<Option<Vec<u8>>> {
        let mut index = self.repo.index().wrap_err("failed to get index")?;
        index.read(true).wrap_err("failed to read index")?;
        let Some(entry) = index.get_path(path, 0) else {
            return Ok(None);
        };
        let blob = self.repo.find_blob(entry.id)?;
        Ok(Some(blob.content().to_vec()))
    }

    /// The newest stash commit, if any.
    pub fn stash_head(&self) -> Option<String> {
        self.read(["rev-parse", "-q", "--verify", "refs/stash"])
            .ok()
            .filter(|s| !s.is_empty())
    }

    /// Stashes unstaged changes while keeping the index. An empty `paths`
    /// stashes the whole worktree. Returns the stash commit, or `None` when
    /// git found nothing to save.
    ///
    /// Untracked files must not be named in `paths`: git stashes and cleans
    /// them before rejecting the pathspec.
    #[tracing::instrument(level = "info", name = "git.stash.push", skip_all, fields(count = paths.len(), include_untracked = include_untracked))]
    pub fn stash_push(
        &self,
        paths: &[PathBuf],
        include_untracked: bool,
        message: &str,
    ) -> Result<Option<String>> {
        let before = self.stash_head();
        let mut args: Vec<OsString> = vec!["stash".into(), "push".into(), "--keep-index".into()];
        if include_untracked {
            args.push("--include-untracked".into());
        }
        args.extend(["-m".into(), message.into()]);
        if !paths.is_empty() {
            args.push("--".into());
        }
        self.cmd(args)
            .args(paths)
            .run()
            .wrap_err("failed to stash unstaged changes")?;
        let after = self.stash_head();
        Ok(after.filter(|a| Some(a) != before.as_ref()))
    }

    #[tracing::instrument(level = "info", name = "git.stash.drop", skip(self))]
    pub fn stash_drop(&self, commit: &str) -> Result<()> {
        let list = self.read(["stash", "list", "--format=%H"])?;
        match list.lines().position(|l| l.trim() == commit) {
            Some(idx) => self.run(["stash", "drop", "-q", &format!("stash@{{{idx}}}")]),
            None => {
                warn!("stash {commit} no longer exists");
                Ok(())
            }
        }
    }

    /// Writes a binary diff of the unstaged changes to `paths` into `out`.
    #[tracing::instrument(level = "info", name = "git.diff", skip_all, fields(out = %out.display()))]
    pub fn diff_to_file(&self, paths: &[PathBuf], out: &Path) -> Result<()> {
        let mut args: Vec<OsString> = vec![
            "diff".into(),
            "--binary".into(),
            "--no-color".into(),
            "--no-ext-diff".into(),
            "--ignore-submodules".into(),
        ];
        let mut output = OsString::from("--output=");
        output.push(out);
        args.push(output);
        args.push("--".into());
        self.cmd(args)
            .args(paths)
            .run()
            .wrap_err("failed to write patch")?;
        Ok(())
    }

    /// Replaces the index with `treeish`; the worktree is left alone.
    pub fn read_tree(&self, treeish: &str) -> Result<()> {
        self.run(["read-tree", treeish])
            .wrap_err_with(|| format!("failed to read tree {treeish}"))
    }

    /// Resets the worktree copies of `paths` to their staged content.
    pub fn checkout_index(&self, paths: &[PathBuf]) -> Result<()> {
        if paths.is_empty() {
            return Ok(());
        }
        self.cmd(["checkout", "--"]).args(paths).run()?;
        Ok(())
    }
}

impl std::fmt::Debug for Git {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Git").field("root", &self.root).finish()
    }
}

pub fn display_paths(paths: &[PathBuf]) -> String {
    paths.iter().map(|p| p.display().to_string()).join(", ")
}
