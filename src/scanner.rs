use globset::{Glob, GlobBuilder, GlobSet, GlobSetBuilder};
use ignore::WalkBuilder;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::FileScanningConfig;
use crate::error::{BriefError, Result};
use crate::types::FileRecord;

pub const IGNORE_FILE: &str = ".repobriefignore";

/// File names that may hold credentials. They are never listed, so their
/// content can never reach the description service.
pub const SENSITIVE_FILE_PATTERNS: &[&str] = &[
    ".env",
    ".env.*",
    "*.pem",
    "*.key",
    "*.p12",
    "*.pfx",
    "id_rsa*",
    "id_ed25519*",
];

/// Templates matched by `.env.*` that hold no secrets
pub const SENSITIVE_FILE_EXCEPTIONS: &[&str] = &[".env.example", ".env.sample", ".env.template"];

#[derive(Debug, Clone)]
pub struct ScanResult {
    pub root: PathBuf,
    /// Sorted by path
    pub files: Vec<FileRecord>,
    pub skipped_large: usize,
    /// Files matching a credential pattern
    pub skipped_sensitive: usize,
    pub duration: Duration,
}

/// Lists the files of a project, honoring ignore files and configured globs.
#[derive(Debug)]
pub struct RepositoryScanner {
    include: Option<GlobSet>,
    exclude: GlobSet,
    sensitive: GlobSet,
    excluded_paths: Vec<String>,
    max_file_size: u64,
    follow_symlinks: bool,
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|source| BriefError::InvalidPattern {
            pattern: pattern.clone(),
            source,
        })?;
        builder.add(glob);
    }
    builder.build().map_err(|source| BriefError::InvalidPattern {
        pattern: patterns.join(", "),
        source,
    })
}

fn build_sensitive_globset() -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in SENSITIVE_FILE_PATTERNS {
        let glob = GlobBuilder::new(pattern)
            .case_insensitive(true)
            .literal_separator(true)
            .build()
            .map_err(|source| BriefError::InvalidPattern {
                pattern: pattern.to_string(),
                source,
            })?;
        builder.add(glob);
    }
    builder.build().map_err(|source| BriefError::InvalidPattern {
        pattern: SENSITIVE_FILE_PATTERNS.join(", "),
        source,
    })
}

impl RepositoryScanner {
    pub fn new(config: &FileScanningConfig) -> Result<Self> {
        let include = if config.include_patterns.is_empty() {
            None
        } else {
            Some(build_globset(&config.include_patterns)?)
        };

        Ok(Self {
            include,
            exclude: build_globset(&config.exclude_patterns)?,
            sensitive: build_sensitive_globset()?,
            excluded_paths: vec![".git".to_string()],
            max_file_size: config.max_file_size,
            follow_symlinks: config.follow_symlinks,
        })
    }

    /// Never list `relative` or anything beneath it
    pub fn exclude_path(mut self, relative: impl AsRef<Path>) -> Self {
        let path = normalize(relative.as_ref());
        if !path.is_empty() {
            self.excluded_paths.push(path);
        }
        self
    }

    pub fn scan(&self, root: &Path) -> Result<ScanResult> {
        let start = Instant::now();
        if !root.is_dir() {
            return Err(BriefError::Scan {
                path: root.to_path_buf(),
                message: "not a directory".to_string(),
            });
        }

        let walker = WalkBuilder::new(root)
            .hidden(false)
            .git_ignore(true)
            .git_exclude(true)
            .git_global(false)
            .require_git(false)
            .follow_links(self.follow_symlinks)
            .add_custom_ignore_filename(IGNORE_FILE)
            .filter_entry(|entry| entry.file_name() != ".git")
            .build();

        let mut files = Vec::new();
        let mut skipped_large = 0;
        let mut skipped_sensitive = 0;

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping unreadable entry: {}", e);
                    continue;
                }
            };
            if !entry.file_type().is_some_and(|t| t.is_file()) {
                continue;
            }

            let relative = match entry.path().strip_prefix(root) {
                Ok(relative) => normalize(relative),
                Err(_) => continue,
            };
            if self.is_excluded(&relative) {
                continue;
            }
            if self.is_sensitive(&relative) {
                debug!("Skipping {} (may contain credentials)", relative);
                skipped_sensitive += 1;
                continue;
            }

            let size = match entry.metadata() {
                Ok(metadata) => metadata.len(),
                Err(e) => {
                    warn!("Skipping {}: {}", relative, e);
                    continue;
                }
            };
            if size > self.max_file_size {
                debug!("Skipping {} ({} bytes over limit)", relative, size);
                skipped_large += 1;
                continue;
            }

            files.push(FileRecord::new(relative, size));
        }

        files.sort_by(|a, b| a.path.cmp(&b.path));
        let duration = start.elapsed();
        info!("Discovered {} files under {} in {:?}", files.len(), root.display(), duration);

        Ok(ScanResult {
            root: root.to_path_buf(),
            files,
            skipped_large,
            skipped_sensitive,
            duration,
        })
    }

    /// Matched on the file name, so nested copies are caught too
    pub fn is_sensitive(&self, relative: &str) -> bool {
        let name = relative.rsplit('/').next().unwrap_or(relative);
        let lowered = name.to_lowercase();
        if SENSITIVE_FILE_EXCEPTIONS.contains(&lowered.as_str()) {
            return false;
        }
        self.sensitive.is_match(name)
    }

    fn is_excluded(&self, relative: &str) -> bool {
        let under_excluded = self
            .excluded_paths
            .iter()
            .any(|p| relative == p || relative.starts_with(&format!("{}/", p)));
        if under_excluded || self.exclude.is_match(relative) {
            return true;
        }
        match &self.include {
            Some(include) => !include.is_match(relative),
            None => false,
        }
    }
}

/// Repo-relative path with `/` separators and no leading `./`
fn normalize(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            std::path::Component::Normal(part) => Some(part.to_string_lossy().to_string()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}
