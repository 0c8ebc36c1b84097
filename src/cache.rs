//! Content-addressed step result cache.
//!
//! Entries live at `<cache_dir>/results/<hash of repo root>/<key>.json` and
//! survive across invocations until `cache clear`. A key covers the step
//! name, the exact argument vector, the working directory, the content
//! fingerprint of every job file and the effective step environment, so an
//! identical rewrite of a file still hits while any byte change misses.
//! Fixes that changed files are never stored, so an entry can always be
//! replayed by reporting its outcome.

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::Result;
use crate::error::Error;
use crate::hash;

#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub struct CacheKey {
    pub step: String,
    pub argv: Vec<String>,
    pub dir: Option<String>,
    /// `(path, content fingerprint)` for each job file; `None` for missing files
    pub inputs: Vec<(PathBuf, Option<String>)>,
    pub env: Vec<(String, String)>,
}

impl CacheKey {
    pub fn new(
        step: &str,
        argv: &[String],
        dir: Option<&str>,
        root: &Path,
        files: &[PathBuf],
        env: &IndexMap<String, String>,
    ) -> Result<Self> {
        let inputs = files
            .iter()
            .map(|f| Ok((f.clone(), hash::file_fingerprint(&root.join(f))?)))
            .collect::<Result<Vec<_>>>()?;
        let mut env = env
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect::<Vec<_>>();
        env.sort();
        Ok(Self {
            step: step.to_string(),
            argv: argv.to_vec(),
            dir: dir.map(String::from),
            inputs,
            env,
        })
    }

    pub fn digest(&self) -> String {
        hash::hash_to_str(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub passed: bool,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub combined: String,
    pub created_at: DateTime<Utc>,
}

/// Handle passed into the scheduler; cheap to share behind an `Arc`.
#[derive(Debug, Default)]
pub struct ResultCache {
    /// `None` when caching is disabled
    dir: Option<PathBuf>,
    memory: DashMap<String, CacheEntry>,
}

impl ResultCache {
    pub fn new(cache_dir: &Path, repo_root: &Path) -> Self {
        Self {
            dir: Some(
                cache_dir
                    .join("results")
                    .join(hash::hash_to_str(repo_root)),
            ),
            memory: DashMap::new(),
        }
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn is_enabled(&self) -> bool {
        self.dir.is_some()
    }

    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    fn entry_path(&self, digest: &str) -> Option<PathBuf> {
        self.dir.as_ref().map(|d| d.join(format!("{digest}.json")))
    }

    /// A prior result for `key`, if one was stored. Unreadable or corrupt
    /// entries are reported and treated as a miss.
    pub fn lookup(&self, key: &CacheKey) -> Option<CacheEntry> {
        let digest = key.digest();
        let path = self.entry_path(&digest)?;
        let found = match self.memory.get(&digest) {
            Some(entry) => Some(entry.clone()),
            None => match read_entry(&path) {
                Ok(entry) => entry,
                Err(err) => {
                    warn!("{}: {err}", key.step);
                    None
                }
            },
        };
        match found {
            Some(entry) => {
                let _span =
                    tracing::info_span!("cache.hit", step = %key.step, key = %digest).entered();
                debug!("{}: cache hit {digest}", key.step);
                self.memory.insert(digest, entry.clone());
                Some(entry)
            }
            None => {
                let _span =
                    tracing::info_span!("cache.miss", step = %key.step, key = %digest).entered();
                debug!("{}: cache miss {digest}", key.step);
                None
            }
        }
    }

    /// Persists `entry`. Failures are logged, never returned: a broken cache
    /// must not fail a run.
    pub fn store(&self, key: &CacheKey, entry: CacheEntry) {
        let digest = key.digest();
        let Some(path) = self.entry_path(&digest) else {
            return;
        };
        if let Err(err) = write_entry(&path, &entry) {
            warn!("{}: {err}", key.step);
        }
        self.memory.insert(digest, entry);
    }

    pub fn clear(&self) -> Result<()> {
        self.memory.clear();
        if let Some(dir) = &self.dir
            && dir.exists()
        {
            xx::file::remove_dir_all(dir)?;
        }
        Ok(())
    }
}

fn read_entry(path: &Path) -> std::result::Result<Option<CacheEntry>, Error> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(Error::CacheStoreFailure {
                path: path.to_path_buf(),
                message: e.to_string(),
            });
        }
    };
    serde_json::from_str(&raw)
        .map(Some)
        .map_err(|e| Error::CacheStoreFailure {
            path: path.to_path_buf(),
            message: format!("corrupt entry: {e}"),
        })
}

fn write_entry(path: &Path, entry: &CacheEntry) -> std::result::Result<(), Error> {
    let fail = |message: String| Error::CacheStoreFailure {
        path: path.to_path_buf(),
        message,
    };
    let dir = path
        .parent()
        .ok_or_else(|| fail("no parent directory".into()))?;
    std::fs::create_dir_all(dir).map_err(|e| fail(e.to_string()))?;
    let json = serde_json::to_vec(entry).map_err(|e| fail(e.to_string()))?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| fail(e.to_string()))?;
    tmp.write_all(&json).map_err(|e| fail(e.to_string()))?;
    tmp.persist(path).map_err(|e| fail(e.to_string()))?;
    Ok(())
}
