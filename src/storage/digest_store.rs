use crate::error::{BriefError, DigestError, Result};
use crate::types::{DigestMap, FileRecord};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const STORE_VERSION: u32 = 1;

/// On-disk envelope for the digest map
#[derive(Debug, Serialize, Deserialize)]
struct StoreFile {
    version: u32,
    files: DigestMap,
}

/// Persisted mapping from path to last-known digest, tier and description.
///
/// The store is loaded once per run, mutated as an in-memory `DigestMap`, and
/// written back with a single atomic replace.
#[derive(Debug, Clone)]
pub struct DigestStore {
    path: PathBuf,
}

impl DigestStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the prior state. Missing, unreadable or unparsable stores all
    /// come back as an empty map, which forces a full run.
    pub fn load(&self) -> DigestMap {
        let raw = match std::fs::read(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No digest store at {}", self.path.display());
                return DigestMap::new();
            }
            Err(e) => {
                warn!("Digest store {} unreadable, starting fresh: {}", self.path.display(), e);
                return DigestMap::new();
            }
        };

        match serde_json::from_slice::<StoreFile>(&raw) {
            Ok(store) if store.version == STORE_VERSION => store.files,
            Ok(store) => {
                warn!(
                    "Digest store {} has version {}, expected {}; starting fresh",
                    self.path.display(),
                    store.version,
                    STORE_VERSION
                );
                DigestMap::new()
            }
            Err(e) => {
                warn!("Digest store {} is corrupt, starting fresh: {}", self.path.display(), e);
                DigestMap::new()
            }
        }
    }

    /// Replace the persisted state with `files`.
    ///
    /// Writes to a sibling temp file, fsyncs it and renames it over the target,
    /// so readers only ever see the old or the new store.
    pub fn save(&self, files: &DigestMap) -> Result<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir).map_err(|source| self.persist_error(source))?;

        let body = serde_json::to_vec_pretty(&StoreFile {
            version: STORE_VERSION,
            files: files.clone(),
        })?;

        let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(|source| self.persist_error(source))?;
        tmp.write_all(&body).map_err(|source| self.persist_error(source))?;
        tmp.as_file().sync_all().map_err(|source| self.persist_error(source))?;
        tmp.persist(&self.path).map_err(|e| self.persist_error(e.error))?;

        debug!("Saved {} digest entries to {}", files.len(), self.path.display());
        Ok(())
    }

    fn persist_error(&self, source: std::io::Error) -> BriefError {
        BriefError::StorePersist {
            path: self.path.clone(),
            source,
        }
    }
}

/// SHA-256 of `contents` as lowercase hex.
///
/// Content that is not text (NUL bytes or invalid UTF-8) is rejected.
pub fn digest_of(contents: &[u8]) -> std::result::Result<String, DigestError> {
    if contents.contains(&0) || std::str::from_utf8(contents).is_err() {
        return Err(DigestError::Binary);
    }
    Ok(format!("{:x}", Sha256::digest(contents)))
}

/// Read and fingerprint a single file under `root`.
pub fn digest_file(root: &Path, relative: &str) -> std::result::Result<String, DigestError> {
    let contents = std::fs::read(root.join(relative))?;
    digest_of(&contents)
}

/// Fingerprint every listed file, excluding the ones that fail.
///
/// Each exclusion is logged and passed to `on_excluded` so callers can audit
/// what dropped out of the digest universe.
pub fn compute_digests(
    root: &Path,
    files: &[FileRecord],
    mut on_excluded: impl FnMut(&str, &DigestError),
) -> BTreeMap<String, String> {
    let mut digests = BTreeMap::new();
    for file in files {
        match digest_file(root, &file.path) {
            Ok(digest) => {
                digests.insert(file.path.clone(), digest);
            }
            Err(e) => {
                warn!("Excluding {}: {}", file.path, e);
                on_excluded(&file.path, &e);
            }
        }
    }
    digests
}
