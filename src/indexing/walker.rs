//! Candidate file enumeration
//!
//! Inside a git work tree the candidates are the tracked files (including
//! uncommitted edits) plus untracked files git does not ignore. Elsewhere a
//! plain directory walk is used. Either way the configured ignore globs and
//! the size ceiling apply.

use crate::config::Config;
use crate::error::{Result, SiftError};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// A file that may need indexing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateFile {
    pub absolute: PathBuf,
    /// Path relative to the root, `/`-separated; the manifest key
    pub relative: String,
    pub size: u64,
}

/// Result of one enumeration pass
#[derive(Debug, Default)]
pub struct Discovery {
    /// Files to hash and index, sorted by relative path
    pub candidates: Vec<CandidateFile>,
    /// Files present on disk but over the size ceiling
    pub oversized: Vec<String>,
}

pub struct FileWalker {
    root: PathBuf,
    prefer_git: bool,
    ignore: GlobSet,
    max_file_size: u64,
}

impl FileWalker {
    pub fn new(
        root: impl Into<PathBuf>,
        prefer_git: bool,
        ignore_patterns: &[String],
        max_file_size: u64,
    ) -> Result<Self> {
        Ok(Self {
            root: root.into(),
            prefer_git,
            ignore: build_globset(ignore_patterns)?,
            max_file_size,
        })
    }

    /// Walker for `root` using the walker and storage sections of `config`.
    /// The data directory itself is always excluded.
    pub fn from_config(root: &Path, config: &Config) -> Result<Self> {
        let mut patterns = config.walker.ignore_patterns.clone();
        let data_dir = &config.storage.data_dir_name;
        patterns.push(format!("{}/**", data_dir));
        patterns.push(format!("**/{}/**", data_dir));

        Self::new(
            root,
            config.walker.prefer_git,
            &patterns,
            config.storage.max_file_size_bytes()?,
        )
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Enumerate candidates, sorted by relative path
    pub fn discover(&self) -> Result<Discovery> {
        if !self.root.is_dir() {
            return Err(SiftError::io(
                std::io::Error::new(std::io::ErrorKind::NotFound, "not a directory"),
                format!("Index root is not a directory: {}", self.root.display()),
            ));
        }

        let relative_paths = match self.git_files() {
            Some(paths) => paths,
            None => self.walk_files(),
        };

        let mut discovery = Discovery::default();
        for relative in relative_paths {
            if self.ignore.is_match(&relative) {
                continue;
            }

            let absolute = self.root.join(&relative);
            let metadata = match std::fs::metadata(&absolute) {
                Ok(m) if m.is_file() => m,
                Ok(_) => continue,
                Err(e) => {
                    // Tracked but deleted from the work tree, or unreadable
                    debug!("Skipping {}: {}", relative, e);
                    continue;
                }
            };

            if metadata.len() > self.max_file_size {
                warn!(
                    "Skipping {}: {} bytes exceeds the {} byte limit",
                    relative,
                    metadata.len(),
                    self.max_file_size
                );
                discovery.oversized.push(relative);
                continue;
            }

            discovery.candidates.push(CandidateFile {
                absolute,
                relative,
                size: metadata.len(),
            });
        }

        Ok(discovery)
    }

    /// Tracked and untracked-but-not-ignored files, or `None` when git is
    /// unavailable or the root is not inside a work tree
    fn git_files(&self) -> Option<BTreeSet<String>> {
        if !self.prefer_git {
            return None;
        }

        let inside = self.git(&["rev-parse", "--is-inside-work-tree"])?;
        if inside.trim() != "true" {
            return None;
        }

        let tracked = self.git(&["ls-files", "-z", "--cached", "--modified"])?;
        let untracked = self.git(&["ls-files", "-z", "--others", "--exclude-standard"])?;

        let files: BTreeSet<String> = tracked
            .split('\0')
            .chain(untracked.split('\0'))
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect();
        debug!("git reported {} candidate files", files.len());
        Some(files)
    }

    fn git(&self, args: &[&str]) -> Option<String> {
        let output = Command::new("git")
            .arg("-C")
            .arg(&self.root)
            .args(args)
            .output()
            .ok()?;
        if !output.status.success() {
            return None;
        }
        Some(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn walk_files(&self) -> BTreeSet<String> {
        let mut files = BTreeSet::new();
        for entry in WalkDir::new(&self.root).follow_links(false) {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    warn!("Directory walk error: {}", e);
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(&self.root)
                .unwrap_or(entry.path());
            files.insert(to_key(relative));
        }
        files
    }
}

/// Manifest key for a relative path
fn to_key(relative: &Path) -> String {
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|e| SiftError::InvalidConfigValue {
            path: "walker.ignore_patterns".to_string(),
            message: format!("{}: {}", pattern, e),
        })?;
        builder.add(glob);
    }
    builder.build().map_err(|e| SiftError::InvalidConfigValue {
        path: "walker.ignore_patterns".to_string(),
        message: e.to_string(),
    })
}
