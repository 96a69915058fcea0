//! Common utilities for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use repobrief::{
    AnalysisSettings, DescribeError, DescriptionService, FileContent, FileDescription, FileExcerpt, FileRecord,
};

/// Scripted description service that counts calls and can simulate outages.
#[derive(Default)]
pub struct FakeService {
    batch_calls: AtomicUsize,
    deep_calls: AtomicUsize,
    outage: AtomicBool,
    failing: Mutex<HashSet<String>>,
}

impl FakeService {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_outage(&self, down: bool) {
        self.outage.store(down, Ordering::SeqCst);
    }

    /// Any request touching `path` fails until cleared
    pub fn fail_on(&self, path: &str) {
        self.failing.lock().insert(path.to_string());
    }

    pub fn clear_failures(&self) {
        self.failing.lock().clear();
    }

    pub fn calls(&self) -> usize {
        self.batch_calls() + self.deep_calls()
    }

    pub fn batch_calls(&self) -> usize {
        self.batch_calls.load(Ordering::SeqCst)
    }

    pub fn deep_calls(&self) -> usize {
        self.deep_calls.load(Ordering::SeqCst)
    }

    fn check(&self, paths: &[&str]) -> Result<(), DescribeError> {
        if self.outage.load(Ordering::SeqCst) {
            return Err(DescribeError::Status {
                status: 503,
                body: "service unavailable".to_string(),
            });
        }
        let failing = self.failing.lock();
        if paths.iter().any(|p| failing.contains(*p)) {
            return Err(DescribeError::Malformed("scripted failure".to_string()));
        }
        Ok(())
    }
}

pub fn describe(path: &str) -> String {
    format!("Describes {}", path)
}

#[async_trait]
impl DescriptionService for FakeService {
    async fn describe_batch(&self, files: &[FileExcerpt]) -> Result<Vec<FileDescription>, DescribeError> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        let paths: Vec<&str> = files.iter().map(|f| f.path.as_str()).collect();
        self.check(&paths)?;
        Ok(files.iter().map(|f| FileDescription::new(f.path.clone(), describe(&f.path))).collect())
    }

    async fn describe_file(&self, file: &FileContent) -> Result<FileDescription, DescribeError> {
        self.deep_calls.fetch_add(1, Ordering::SeqCst);
        self.check(&[file.path.as_str()])?;
        Ok(FileDescription::new(file.path.clone(), describe(&file.path)))
    }
}

/// Temporary project tree built from `(path, content)` pairs
pub struct TestProject {
    pub dir: TempDir,
}

impl TestProject {
    pub fn new(files: &[(&str, &str)]) -> Self {
        let project = Self {
            dir: TempDir::new().unwrap(),
        };
        for (path, content) in files {
            project.write(path, content);
        }
        project
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn write(&self, path: &str, content: &str) {
        let full = self.dir.path().join(path);
        std::fs::create_dir_all(full.parent().unwrap()).unwrap();
        std::fs::write(full, content).unwrap();
    }

    pub fn remove(&self, path: &str) {
        std::fs::remove_file(self.dir.path().join(path)).unwrap();
    }

    /// Current listing, the way the scanner would report it
    pub fn records(&self, paths: &[&str]) -> Vec<FileRecord> {
        paths
            .iter()
            .map(|p| {
                let size = std::fs::metadata(self.dir.path().join(p)).unwrap().len();
                FileRecord::new(*p, size)
            })
            .collect()
    }
}

pub fn fast_settings() -> AnalysisSettings {
    AnalysisSettings {
        rpm_limit: 0,
        retry_base_delay: Duration::from_millis(1),
        ..AnalysisSettings::default()
    }
}
