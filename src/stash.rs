//! Hides unstaged work from steps and puts it back afterwards.
//!
//! Before steps run, every file whose worktree content differs from the index
//! is recorded (index bytes plus worktree bytes) and reset to its staged
//! content by one of two [`StashStrategy`] implementations: a native
//! `git stash` entry or a binary patch file. Whichever strategy hid the
//! changes, putting them back is the same: each recorded file is three-way
//! merged from the staged content (base), whatever a fixer left on disk
//! (ours) and the hidden worktree content (theirs). Overlapping edits are
//! written with conflict markers instead of dropping either side. The stash
//! entry or patch file is a backup only: files are written back from the
//! recorded bytes, and the backup is removed once every file has been
//! written. If hiding fails part way, the recorded bytes are written back
//! before the error is returned so a failed snapshot never loses work.

use std::path::{Path, PathBuf};

use eyre::{WrapErr, bail, eyre};
use itertools::Itertools;

use crate::Result;
use crate::error::Error;
use crate::git::{Git, GitStatus, StashMethod};
use crate::hash;
use crate::merge;

/// One hidden file.
#[derive(Debug, Clone)]
pub struct SavedFile {
    pub path: PathBuf,
    /// Staged content; `None` for untracked files.
    pub base: Option<Vec<u8>>,
    /// Worktree content at snapshot time; `None` if it was deleted.
    pub theirs: Option<Vec<u8>>,
}

#[derive(Debug)]
pub enum Backing {
    Stash { commit: String },
    PatchFile { path: PathBuf },
}

impl std::fmt::Display for Backing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Backing::Stash { commit } => write!(f, "git stash entry {commit}"),
            Backing::PatchFile { path } => write!(f, "{}", path.display()),
        }
    }
}

/// What a snapshot hid. Consumed by [`WorkingTreeGuard::restore`].
#[derive(Debug)]
pub struct StashEntry {
    pub method: StashMethod,
    pub files: Vec<SavedFile>,
    pub backing: Backing,
}

#[derive(Debug, Default)]
pub struct RestoreReport {
    pub restored: Vec<PathBuf>,
    pub conflicts: Vec<PathBuf>,
}

/// A push that failed, possibly after it had already saved a backup.
#[derive(Debug)]
pub struct PushError {
    pub error: eyre::Report,
    pub backing: Option<Backing>,
}

impl From<eyre::Report> for PushError {
    fn from(error: eyre::Report) -> Self {
        Self {
            error,
            backing: None,
        }
    }
}

/// A way of removing changes from the worktree durably.
pub trait StashStrategy: Send + Sync {
    fn method(&self) -> StashMethod;

    /// Paths of `status` this strategy is able to hide.
    fn hideable(&self, status: &GitStatus) -> Vec<PathBuf>;

    /// Resets `paths` to their staged content, keeping a backup.
    fn push(&self, git: &Git, paths: &[PathBuf]) -> std::result::Result<Backing, PushError>;

    /// Puts the index back after a failed push left `backing` behind.
    fn rollback(&self, _git: &Git, _backing: &Backing) -> Result<()> {
        Ok(())
    }

    /// Removes the backup once everything has been written back.
    fn discard(&self, git: &Git, backing: &Backing) -> Result<()>;
}

fn tracked_changes(status: &GitStatus) -> impl Iterator<Item = &PathBuf> {
    status
        .unstaged_modified_files
        .iter()
        .chain(status.unstaged_deleted_files.iter())
}

pub struct NativeStash {
    pub include_untracked: bool,
}

impl StashStrategy for NativeStash {
    fn method(&self) -> StashMethod {
        StashMethod::Git
    }

    fn hideable(&self, status: &GitStatus) -> Vec<PathBuf> {
        let untracked = status
            .untracked_files
            .iter()
            .filter(|_| self.include_untracked);
        tracked_changes(status)
            .chain(untracked)
            .cloned()
            .sorted()
            .dedup()
            .collect()
    }

    fn push(&self, git: &Git, paths: &[PathBuf]) -> std::result::Result<Backing, PushError> {
        // `hideable` already covers every unstaged change, so with untracked
        // files the whole worktree is stashed and no pathspec is needed
        let pathspec = if self.include_untracked { &[][..] } else { paths };
        let before = git.stash_head();
        match git.stash_push(pathspec, self.include_untracked, "hk-engine") {
            Ok(Some(commit)) => Ok(Backing::Stash { commit }),
            Ok(None) => Err(eyre!("git stash did not record any changes").into()),
            Err(error) => Err(PushError {
                error,
                backing: git
                    .stash_head()
                    .filter(|head| Some(head) != before.as_ref())
                    .map(|commit| Backing::Stash { commit }),
            }),
        }
    }

    /// The stash commit's second parent records the index as it was.
    fn rollback(&self, git: &Git, backing: &Backing) -> Result<()> {
        if let Backing::Stash { commit } = backing {
            git.read_tree(&format!("{commit}^2"))?;
            git.checkout_index(&[PathBuf::from(".")])?;
        }
        Ok(())
    }

    fn discard(&self, git: &Git, backing: &Backing) -> Result<()> {
        if let Backing::Stash { commit } = backing {
            git.stash_drop(commit)?;
        }
        Ok(())
    }
}

pub struct PatchFileStash {
    pub patches_dir: PathBuf,
}

impl PatchFileStash {
    fn patch_path(&self, git: &Git) -> PathBuf {
        let repo = git
            .root()
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("repo");
        let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S%.3f");
        let key = &hash::hash_to_str(git.root())[..8];
        self.patches_dir
            .join(format!("{repo}-{key}-{stamp}-{}.patch", std::process::id()))
    }
}

impl StashStrategy for PatchFileStash {
    fn method(&self) -> StashMethod {
        StashMethod::PatchFile
    }

    fn hideable(&self, status: &GitStatus) -> Vec<PathBuf> {
        tracked_changes(status).cloned().sorted().dedup().collect()
    }

    #[tracing::instrument(level = "info", name = "git.stash.push", skip_all, fields(method = "patch-file", count = paths.len()))]
    fn push(&self, git: &Git, paths: &[PathBuf]) -> std::result::Result<Backing, PushError> {
        xx::file::mkdirp(&self.patches_dir).map_err(eyre::Report::from)?;
        let path = self.patch_path(git);
        git.diff_to_file(paths, &path)?;
        debug!("saved unstaged changes to {}", path.display());
        let backing = Backing::PatchFile { path };
        match git.checkout_index(paths) {
            Ok(()) => Ok(backing),
            Err(error) => Err(PushError {
                error,
                backing: Some(backing),
            }),
        }
    }

    fn discard(&self, _git: &Git, backing: &Backing) -> Result<()> {
        if let Backing::PatchFile { path } = backing {
            std::fs::remove_file(path)
                .wrap_err_with(|| format!("failed to remove {}", path.display()))?;
        }
        Ok(())
    }
}

/// Chooses the strategy for a stash method; `None` for [`StashMethod::None`].
pub fn strategy(
    method: StashMethod,
    include_untracked: bool,
    state_dir: &Path,
) -> Option<Box<dyn StashStrategy>> {
    match method {
        StashMethod::Git => Some(Box::new(NativeStash { include_untracked })),
        StashMethod::PatchFile => Some(Box::new(PatchFileStash {
            patches_dir: state_dir.join("patches"),
        })),
        StashMethod::None => None,
    }
}

pub struct WorkingTreeGuard {
    strategy: Box<dyn StashStrategy>,
}

impl WorkingTreeGuard {
    pub fn new(strategy: Box<dyn StashStrategy>) -> Self {
        Self { strategy }
    }

    /// Hides unstaged changes. Returns `None` when there is nothing to hide.
    pub fn snapshot(&self, git: &Git, status: &GitStatus) -> Result<Option<StashEntry>> {
        let paths = self.strategy.hideable(status);
        if paths.is_empty() {
            return Ok(None);
        }
        let files = paths
            .iter()
            .map(|path| {
                Ok(SavedFile {
                    path: path.clone(),
                    base: git.index_content(path)?,
                    theirs: read_optional(&git.root().join(path))?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        info!("stashing unstaged changes");
        debug!("stashing: {}", paths.iter().map(|p| p.display()).join(", "));
        let backing = match self.strategy.push(git, &paths) {
            Ok(backing) => backing,
            Err(PushError { error, backing }) => {
                self.recover(git, &files, backing);
                return Err(error);
            }
        };
        Ok(Some(StashEntry {
            method: self.strategy.method(),
            files,
            backing,
        }))
    }

    /// Undoes a failed push: the index comes back from the backup, every
    /// recorded file is rewritten from its snapshot bytes, and the backup is
    /// dropped only if all of that worked.
    fn recover(&self, git: &Git, files: &[SavedFile], backing: Option<Backing>) {
        let mut intact = match &backing {
            Some(backing) => match self.strategy.rollback(git, backing) {
                Ok(()) => true,
                Err(err) => {
                    warn!("failed to restore the index: {err:#}");
                    false
                }
            },
            None => true,
        };
        for file in files {
            if let Err(err) = put_back(git.root(), file) {
                warn!("failed to restore {}: {err:#}", file.path.display());
                intact = false;
            }
        }
        match backing {
            Some(backing) if intact => {
                if let Err(err) = self.strategy.discard(git, &backing) {
                    warn!("failed to remove {backing}: {err:#}");
                }
            }
            Some(backing) => warn!("unstaged changes are preserved in {backing}"),
            None => {}
        }
    }

    /// Writes hidden changes back over whatever steps left in the worktree.
    ///
    /// The backup is kept if any file could not be written so nothing is
    /// lost; the error then names where it lives.
    #[tracing::instrument(level = "info", name = "git.stash.pop", skip_all, fields(method = %entry.method, count = entry.files.len()))]
    pub fn restore(&self, git: &Git, entry: StashEntry) -> Result<RestoreReport> {
        let mut report = RestoreReport::default();
        let mut failed = vec![];
        for file in &entry.files {
            match restore_file(git.root(), file) {
                Ok(clean) => {
                    if !clean {
                        report.conflicts.push(file.path.clone());
                    }
                    report.restored.push(file.path.clone());
                }
                Err(err) => {
                    warn!("failed to restore {}: {err:#}", file.path.display());
                    failed.push(file.path.clone());
                }
            }
        }
        if !failed.is_empty() {
            bail!(
                "failed to restore unstaged changes to {}; they are preserved in {}",
                failed.iter().map(|p| p.display()).join(", "),
                entry.backing
            );
        }
        self.strategy.discard(git, &entry.backing)?;
        if !report.conflicts.is_empty() {
            warn!(
                "{}",
                Error::WorkingTreeConflict {
                    files: report.conflicts.clone()
                }
            );
        }
        Ok(report)
    }
}

fn read_optional(path: &Path) -> Result<Option<Vec<u8>>> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).wrap_err_with(|| format!("failed to read {}", path.display())),
    }
}

/// Rewrites `file` exactly as it was recorded.
fn put_back(root: &Path, file: &SavedFile) -> Result<()> {
    let path = root.join(&file.path);
    match &file.theirs {
        Some(theirs) => write_file(&path, theirs),
        None => match std::fs::remove_file(&path) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => {
                Err(e).wrap_err_with(|| format!("failed to remove {}", path.display()))
            }
            _ => Ok(()),
        },
    }
}

fn write_file(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        xx::file::mkdirp(parent)?;
    }
    std::fs::write(path, contents).wrap_err_with(|| format!("failed to write {}", path.display()))
}

/// Returns false when conflict markers had to be written.
fn restore_file(root: &Path, file: &SavedFile) -> Result<bool> {
    let path = root.join(&file.path);
    let ours = read_optional(&path)?;
    if ours == file.theirs {
        return Ok(true);
    }
    // untouched by steps (or removed by git stash -u)
    if ours == file.base {
        match &file.theirs {
            Some(theirs) => write_file(&path, theirs)?,
            None => std::fs::remove_file(&path)?,
        }
        return Ok(true);
    }
    let (Some(ours), Some(theirs)) = (ours, &file.theirs) else {
        // deleted on one side and edited on the other: keep the edit
        match &file.theirs {
            Some(theirs) => write_file(&path, theirs)?,
            None => warn!(
                "{} was deleted but a step rewrote it; keeping the rewritten file",
                file.path.display()
            ),
        }
        return Ok(false);
    };
    let base = file.base.clone().unwrap_or_default();
    match (
        std::str::from_utf8(&base),
        std::str::from_utf8(&ours),
        std::str::from_utf8(theirs),
    ) {
        (Ok(base), Ok(ours), Ok(theirs)) => {
            let merged = merge::merge3(base, ours, theirs);
            write_file(&path, merged.content.as_bytes())?;
            Ok(merged.is_clean())
        }
        _ => {
            // binary: the fixed copy is already staged, so the worktree keeps the hidden edit
            warn!(
                "{} is binary and was changed by a step; restoring the unstaged version",
                file.path.display()
            );
            write_file(&path, theirs)?;
            Ok(false)
        }
    }
}
