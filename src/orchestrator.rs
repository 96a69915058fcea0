use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::classifier::GENERIC_SKIP_DESCRIPTION;
use crate::describer::{DescriptionService, FileContent, FileExcerpt};
use crate::error::DescribeError;
use crate::rate_limit::RateLimiter;
use crate::types::{AnalysisOutcome, ClassifiedFile, Tier};

/// Receives `(completed_units, total_units)` after each unit finishes.
pub type ProgressObserver = Arc<dyn Fn(usize, usize) + Send + Sync>;

#[derive(Debug, Clone)]
pub struct AnalysisSettings {
    pub batch_size: usize,
    /// Leading characters sent per batch-tier file
    pub excerpt_chars: usize,
    /// Content budget for deep-tier files; the rest is truncated
    pub deep_max_chars: usize,
    pub max_concurrent: usize,
    /// Request starts per rolling minute, 0 for unlimited
    pub rpm_limit: u32,
    pub max_retries: u32,
    pub retry_base_delay: Duration,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            batch_size: 15,
            excerpt_chars: 1500,
            deep_max_chars: 12_000,
            max_concurrent: 4,
            rpm_limit: 50,
            max_retries: 2,
            retry_base_delay: Duration::from_secs(2),
        }
    }
}

/// Per-tier counts for a set of classified files
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnalysisPlan {
    pub skip: usize,
    pub batch: usize,
    pub deep: usize,
    pub chunks: usize,
}

impl AnalysisPlan {
    pub fn new(files: &[ClassifiedFile], batch_size: usize) -> Self {
        let mut plan = Self::default();
        for file in files {
            match file.tier {
                Tier::Skip => plan.skip += 1,
                Tier::Batch => plan.batch += 1,
                Tier::Deep => plan.deep += 1,
            }
        }
        plan.chunks = plan.batch.div_ceil(batch_size.max(1));
        plan
    }

    /// Request units, not counting retries
    pub fn units(&self) -> usize {
        self.chunks + self.deep
    }

    pub fn needs_service(&self) -> bool {
        self.units() > 0
    }
}

#[derive(Debug)]
enum WorkUnit {
    Chunk(Vec<String>),
    Deep(String),
}

#[derive(Debug, Default)]
struct UnitResult {
    descriptions: Vec<(String, String)>,
    failed: Vec<String>,
    calls: usize,
}

/// Drives description requests for classified files.
///
/// Skip-tier files are answered locally. Batch-tier files go out in chunks
/// and deep-tier files one at a time, through a fixed pool of workers
/// draining a shared queue. Every request start passes the rate limiter
/// first, so the limiter is the binding constraint and the pool only keeps
/// its allowance busy.
pub struct AnalysisOrchestrator {
    runner: Arc<UnitRunner>,
    observer: Option<ProgressObserver>,
}

struct UnitRunner {
    service: Arc<dyn DescriptionService>,
    limiter: Arc<RateLimiter>,
    settings: AnalysisSettings,
    root: PathBuf,
}

impl AnalysisOrchestrator {
    pub fn new(service: Arc<dyn DescriptionService>, settings: AnalysisSettings, root: impl Into<PathBuf>) -> Self {
        let limiter = Arc::new(RateLimiter::new(settings.rpm_limit));
        Self::with_limiter(service, settings, root, limiter)
    }

    pub fn with_limiter(
        service: Arc<dyn DescriptionService>,
        settings: AnalysisSettings,
        root: impl Into<PathBuf>,
        limiter: Arc<RateLimiter>,
    ) -> Self {
        Self {
            runner: Arc::new(UnitRunner {
                service,
                limiter,
                settings,
                root: root.into(),
            }),
            observer: None,
        }
    }

    pub fn with_observer(mut self, observer: ProgressObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    pub async fn analyze(&self, files: Vec<ClassifiedFile>) -> AnalysisOutcome {
        let settings = &self.runner.settings;
        let mut outcome = AnalysisOutcome::default();
        let mut submitted = BTreeSet::new();
        let mut batch = Vec::new();
        let mut queue = VecDeque::new();

        for file in files {
            submitted.insert(file.record.path.clone());
            match file.tier {
                Tier::Skip => {
                    let description = file
                        .auto_description
                        .unwrap_or_else(|| GENERIC_SKIP_DESCRIPTION.to_string());
                    outcome.descriptions.insert(file.record.path, description);
                }
                Tier::Batch => batch.push(file.record.path),
                Tier::Deep => queue.push_back(WorkUnit::Deep(file.record.path)),
            }
        }
        for chunk in batch.chunks(settings.batch_size.max(1)) {
            queue.push_back(WorkUnit::Chunk(chunk.to_vec()));
        }

        let total = queue.len();
        info!(
            "Analyzing {} files: {} static, {} units ({} workers, {} rpm)",
            submitted.len(),
            outcome.descriptions.len(),
            total,
            settings.max_concurrent.max(1),
            settings.rpm_limit
        );
        if total == 0 {
            return outcome;
        }

        let queue = Arc::new(Mutex::new(queue));
        let (tx, mut rx) = mpsc::unbounded_channel::<UnitResult>();
        let mut workers = JoinSet::new();

        for worker in 0..settings.max_concurrent.max(1).min(total) {
            let queue = queue.clone();
            let tx = tx.clone();
            let runner = self.runner.clone();
            workers.spawn(async move {
                while let Some(unit) = next_unit(&queue) {
                    let result = runner.run(unit).await;
                    if tx.send(result).is_err() {
                        break;
                    }
                }
                debug!("Worker {} drained the queue", worker);
            });
        }
        drop(tx);

        let mut completed = 0;
        while let Some(result) = rx.recv().await {
            completed += 1;
            outcome.service_calls += result.calls;
            outcome.descriptions.extend(result.descriptions);
            outcome.pending.extend(result.failed);
            if let Some(observer) = &self.observer {
                observer(completed, total);
            }
        }

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!("Analysis worker failed: {}", e);
            }
        }

        // A unit lost to a worker panic never reported back; its files are pending
        let answered: BTreeSet<&String> = outcome.descriptions.keys().chain(outcome.pending.iter()).collect();
        let lost: Vec<String> = submitted.iter().filter(|p| !answered.contains(p)).cloned().collect();
        outcome.pending.extend(lost);

        outcome.pending.sort();
        outcome.pending.dedup();
        outcome
    }
}

fn next_unit(queue: &Mutex<VecDeque<WorkUnit>>) -> Option<WorkUnit> {
    queue.lock().pop_front()
}

/// Leading `max` characters of `text` and whether anything was cut
fn leading_chars(text: &str, max: usize) -> (&str, bool) {
    match text.char_indices().nth(max) {
        Some((idx, _)) => (&text[..idx], true),
        None => (text, false),
    }
}

async fn read_text(root: &Path, path: &str) -> Result<String, DescribeError> {
    tokio::fs::read_to_string(root.join(path))
        .await
        .map_err(|source| DescribeError::Read {
            path: path.to_string(),
            source,
        })
}

impl UnitRunner {
    async fn run(&self, unit: WorkUnit) -> UnitResult {
        match unit {
            WorkUnit::Chunk(paths) => self.run_chunk(paths).await,
            WorkUnit::Deep(path) => self.run_deep(path).await,
        }
    }

    async fn run_chunk(&self, paths: Vec<String>) -> UnitResult {
        let mut result = UnitResult::default();
        let mut excerpts = Vec::with_capacity(paths.len());

        for path in paths {
            match read_text(&self.root, &path).await {
                Ok(text) => {
                    let (excerpt, _) = leading_chars(&text, self.settings.excerpt_chars);
                    excerpts.push(FileExcerpt {
                        path,
                        excerpt: excerpt.to_string(),
                    });
                }
                Err(e) => {
                    warn!("{}", e);
                    result.failed.push(path);
                }
            }
        }
        if excerpts.is_empty() {
            return result;
        }

        let (reply, calls) = self
            .with_retries(|| self.service.describe_batch(&excerpts))
            .await;
        result.calls = calls;

        let matched = reply.and_then(|descriptions| {
            let mut by_path: HashMap<String, String> = descriptions
                .into_iter()
                .filter(|d| !d.description.trim().is_empty())
                .map(|d| (d.path, d.description.trim().to_string()))
                .collect();

            let missing: Vec<&str> = excerpts
                .iter()
                .filter(|e| !by_path.contains_key(&e.path))
                .map(|e| e.path.as_str())
                .collect();
            if !missing.is_empty() {
                return Err(DescribeError::Malformed(format!("no description for {}", missing.join(", "))));
            }

            Ok(excerpts
                .iter()
                .filter_map(|e| by_path.remove(&e.path).map(|d| (e.path.clone(), d)))
                .collect::<Vec<_>>())
        });

        match matched {
            Ok(descriptions) => {
                debug!("Chunk of {} files described", descriptions.len());
                result.descriptions = descriptions;
            }
            Err(e) => {
                warn!("Chunk of {} files failed: {}", excerpts.len(), e);
                result.failed.extend(excerpts.into_iter().map(|e| e.path));
            }
        }
        result
    }

    async fn run_deep(&self, path: String) -> UnitResult {
        let mut result = UnitResult::default();

        let text = match read_text(&self.root, &path).await {
            Ok(text) => text,
            Err(e) => {
                warn!("{}", e);
                result.failed.push(path);
                return result;
            }
        };

        let (content, truncated) = leading_chars(&text, self.settings.deep_max_chars);
        let file = FileContent {
            path: path.clone(),
            content: content.to_string(),
            truncated,
        };

        let (reply, calls) = self.with_retries(|| self.service.describe_file(&file)).await;
        result.calls = calls;

        match reply {
            Ok(described) if !described.description.trim().is_empty() => {
                debug!("Deep analysis of {} done", path);
                result.descriptions.push((path, described.description.trim().to_string()));
            }
            Ok(_) => {
                warn!("Deep analysis of {} returned an empty description", path);
                result.failed.push(path);
            }
            Err(e) => {
                warn!("Deep analysis of {} failed: {}", path, e);
                result.failed.push(path);
            }
        }
        result
    }

    /// Run `call` under the rate limiter, retrying retryable failures with
    /// exponential backoff. Returns the final result and the attempts made.
    async fn with_retries<T, F, Fut>(&self, mut call: F) -> (Result<T, DescribeError>, usize)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, DescribeError>>,
    {
        let mut attempts = 0;
        loop {
            self.limiter.acquire().await;
            attempts += 1;
            match call().await {
                Ok(value) => return (Ok(value), attempts),
                Err(e) if e.is_retryable() && attempts <= self.settings.max_retries as usize => {
                    let delay = self.settings.retry_base_delay * 2u32.pow(attempts as u32 - 1);
                    warn!("Attempt {} failed ({}), retrying in {:?}", attempts, e, delay);
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return (Err(e), attempts),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::describer::{FileDescription, MockDescriptionService};
    use crate::types::FileRecord;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn fixture(files: &[(&str, &str)]) -> TempDir {
        let dir = TempDir::new().unwrap();
        for (path, content) in files {
            let full = dir.path().join(path);
            std::fs::create_dir_all(full.parent().unwrap()).unwrap();
            std::fs::write(full, content).unwrap();
        }
        dir
    }

    fn classified(path: &str, tier: Tier) -> ClassifiedFile {
        ClassifiedFile {
            record: FileRecord::new(path, 10),
            tier,
            auto_description: (tier == Tier::Skip).then(|| format!("static {}", path)),
        }
    }

    fn settings(batch_size: usize, max_concurrent: usize) -> AnalysisSettings {
        AnalysisSettings {
            batch_size,
            max_concurrent,
            rpm_limit: 0,
            retry_base_delay: Duration::from_millis(1),
            ..AnalysisSettings::default()
        }
    }

    fn echo_batch(files: &[FileExcerpt]) -> Result<Vec<FileDescription>, DescribeError> {
        Ok(files.iter().map(|f| FileDescription::new(f.path.clone(), format!("about {}", f.path))).collect())
    }

    #[tokio::test]
    async fn test_skip_files_make_no_calls() {
        let mock = MockDescriptionService::new();
        let orchestrator = AnalysisOrchestrator::new(Arc::new(mock), settings(10, 2), "/nonexistent");

        let outcome = orchestrator
            .analyze(vec![classified("package-lock.json", Tier::Skip)])
            .await;

        assert_eq!(outcome.descriptions["package-lock.json"], "static package-lock.json");
        assert!(outcome.pending.is_empty());
        assert_eq!(outcome.service_calls, 0);
    }

    #[tokio::test]
    async fn test_failed_chunk_marks_every_file_pending() {
        let dir = fixture(&[("a.ts", "a"), ("b.ts", "b"), ("c.ts", "c")]);
        let mut mock = MockDescriptionService::new();
        mock.expect_describe_batch()
            .times(1)
            .returning(|_| Err(DescribeError::Status { status: 400, body: "bad".to_string() }));

        let orchestrator = AnalysisOrchestrator::new(Arc::new(mock), settings(10, 2), dir.path());
        let outcome = orchestrator
            .analyze(vec![
                classified("a.ts", Tier::Batch),
                classified("b.ts", Tier::Batch),
                classified("c.ts", Tier::Batch),
            ])
            .await;

        assert!(outcome.descriptions.is_empty());
        assert_eq!(outcome.pending, vec!["a.ts", "b.ts", "c.ts"]);
    }

    #[tokio::test]
    async fn test_partial_batch_reply_fails_whole_chunk() {
        let dir = fixture(&[("a.ts", "a"), ("b.ts", "b")]);
        let mut mock = MockDescriptionService::new();
        mock.expect_describe_batch()
            .returning(|_| Ok(vec![FileDescription::new("a.ts", "Alpha")]));

        let orchestrator = AnalysisOrchestrator::new(Arc::new(mock), settings(10, 1), dir.path());
        let outcome = orchestrator
            .analyze(vec![classified("a.ts", Tier::Batch), classified("b.ts", Tier::Batch)])
            .await;

        assert!(outcome.descriptions.is_empty());
        assert_eq!(outcome.pending, vec!["a.ts", "b.ts"]);
    }

    #[tokio::test]
    async fn test_batch_reply_matched_by_path_not_order() {
        let dir = fixture(&[("a.ts", "a"), ("b.ts", "b")]);
        let mut mock = MockDescriptionService::new();
        mock.expect_describe_batch().returning(|_| {
            Ok(vec![
                FileDescription::new("b.ts", "Beta"),
                FileDescription::new("a.ts", "Alpha"),
            ])
        });

        let orchestrator = AnalysisOrchestrator::new(Arc::new(mock), settings(10, 1), dir.path());
        let outcome = orchestrator
            .analyze(vec![classified("a.ts", Tier::Batch), classified("b.ts", Tier::Batch)])
            .await;

        assert_eq!(outcome.descriptions["a.ts"], "Alpha");
        assert_eq!(outcome.descriptions["b.ts"], "Beta");
        assert_eq!(outcome.service_calls, 1);
    }

    #[tokio::test]
    async fn test_chunks_respect_batch_size_and_fail_independently() {
        let dir = fixture(&[("1.ts", "1"), ("2.ts", "2"), ("3.ts", "3"), ("4.ts", "4"), ("5.ts", "5")]);
        let mut mock = MockDescriptionService::new();
        mock.expect_describe_batch().times(3).returning(|files| {
            assert!(files.len() <= 2);
            if files.iter().any(|f| f.path == "3.ts") {
                Err(DescribeError::Malformed("nope".to_string()))
            } else {
                echo_batch(files)
            }
        });

        let orchestrator = AnalysisOrchestrator::new(Arc::new(mock), settings(2, 3), dir.path());
        let files = ["1.ts", "2.ts", "3.ts", "4.ts", "5.ts"]
            .iter()
            .map(|p| classified(p, Tier::Batch))
            .collect();
        let outcome = orchestrator.analyze(files).await;

        assert_eq!(outcome.pending, vec!["3.ts", "4.ts"]);
        assert_eq!(outcome.descriptions.len(), 3);
    }

    #[tokio::test]
    async fn test_deep_failure_is_isolated() {
        let dir = fixture(&[("src/main.rs", "fn main() {}"), ("src/lib.rs", "pub mod x;")]);
        let mut mock = MockDescriptionService::new();
        mock.expect_describe_file().times(2).returning(|file| {
            if file.path == "src/lib.rs" {
                Err(DescribeError::Malformed("garbage".to_string()))
            } else {
                Ok(FileDescription::new(file.path.clone(), "Binary entry point"))
            }
        });

        let orchestrator = AnalysisOrchestrator::new(Arc::new(mock), settings(10, 2), dir.path());
        let outcome = orchestrator
            .analyze(vec![classified("src/main.rs", Tier::Deep), classified("src/lib.rs", Tier::Deep)])
            .await;

        assert_eq!(outcome.descriptions["src/main.rs"], "Binary entry point");
        assert_eq!(outcome.pending, vec!["src/lib.rs"]);
    }

    #[tokio::test]
    async fn test_deep_content_is_truncated_to_budget() {
        let long = "é".repeat(50);
        let dir = fixture(&[("main.py", long.as_str())]);
        let mut mock = MockDescriptionService::new();
        mock.expect_describe_file().returning(|file| {
            assert_eq!(file.content.chars().count(), 10);
            assert!(file.truncated);
            Ok(FileDescription::new(file.path.clone(), "Entry"))
        });

        let settings = AnalysisSettings {
            deep_max_chars: 10,
            ..settings(10, 1)
        };
        let orchestrator = AnalysisOrchestrator::new(Arc::new(mock), settings, dir.path());
        let outcome = orchestrator.analyze(vec![classified("main.py", Tier::Deep)]).await;
        assert!(outcome.is_complete());
    }

    #[tokio::test]
    async fn test_unreadable_batch_file_does_not_sink_chunk() {
        let dir = fixture(&[("a.ts", "a")]);
        let mut mock = MockDescriptionService::new();
        mock.expect_describe_batch().times(1).returning(|files| {
            assert_eq!(files.len(), 1);
            echo_batch(files)
        });

        let orchestrator = AnalysisOrchestrator::new(Arc::new(mock), settings(10, 1), dir.path());
        let outcome = orchestrator
            .analyze(vec![classified("a.ts", Tier::Batch), classified("gone.ts", Tier::Batch)])
            .await;

        assert!(outcome.descriptions.contains_key("a.ts"));
        assert_eq!(outcome.pending, vec!["gone.ts"]);
    }

    #[tokio::test]
    async fn test_retryable_errors_are_retried() {
        let dir = fixture(&[("main.go", "package main")]);
        let attempts = Arc::new(AtomicUsize::new(0));
        let seen = attempts.clone();
        let mut mock = MockDescriptionService::new();
        mock.expect_describe_file().times(3).returning(move |file| {
            if seen.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(DescribeError::Status { status: 529, body: "overloaded".to_string() })
            } else {
                Ok(FileDescription::new(file.path.clone(), "Go entry point"))
            }
        });

        let orchestrator = AnalysisOrchestrator::new(Arc::new(mock), settings(10, 1), dir.path());
        let outcome = orchestrator.analyze(vec![classified("main.go", Tier::Deep)]).await;

        assert_eq!(outcome.descriptions["main.go"], "Go entry point");
        assert_eq!(outcome.service_calls, 3);
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let dir = fixture(&[("main.go", "package main")]);
        let mut mock = MockDescriptionService::new();
        mock.expect_describe_file()
            .times(3)
            .returning(|_| Err(DescribeError::Status { status: 503, body: String::new() }));

        let orchestrator = AnalysisOrchestrator::new(Arc::new(mock), settings(10, 1), dir.path());
        let outcome = orchestrator.analyze(vec![classified("main.go", Tier::Deep)]).await;

        assert_eq!(outcome.pending, vec!["main.go"]);
        assert_eq!(outcome.service_calls, 3);
    }

    /// Tracks the highest number of simultaneous requests
    struct SlowService {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl DescriptionService for SlowService {
        async fn describe_batch(&self, files: &[FileExcerpt]) -> Result<Vec<FileDescription>, DescribeError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            echo_batch(files)
        }

        async fn describe_file(&self, file: &FileContent) -> Result<FileDescription, DescribeError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(FileDescription::new(file.path.clone(), "deep"))
        }
    }

    #[tokio::test]
    async fn test_concurrency_limit_is_enforced_and_progress_reported() {
        let names: Vec<String> = (0..12).map(|i| format!("f{}.ts", i)).collect();
        let contents: Vec<(&str, &str)> = names.iter().map(|n| (n.as_str(), "x")).collect();
        let dir = fixture(&contents);

        let service = Arc::new(SlowService {
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let progress = Arc::new(Mutex::new(Vec::new()));
        let recorded = progress.clone();

        let orchestrator = AnalysisOrchestrator::new(service.clone(), settings(1, 3), dir.path())
            .with_observer(Arc::new(move |done: usize, total: usize| recorded.lock().push((done, total))));

        let files = names.iter().map(|n| classified(n, Tier::Batch)).collect();
        let outcome = orchestrator.analyze(files).await;

        assert_eq!(outcome.descriptions.len(), 12);
        assert!(service.peak.load(Ordering::SeqCst) <= 3);
        assert!(service.peak.load(Ordering::SeqCst) >= 2);

        let progress = progress.lock();
        assert_eq!(progress.len(), 12);
        assert_eq!(progress.last(), Some(&(12, 12)));
        assert!(progress.windows(2).all(|w| w[0].0 < w[1].0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_binds_over_concurrency() {
        let dir = fixture(&[("a.rs", "a"), ("b.rs", "b"), ("c.rs", "c")]);
        let mut mock = MockDescriptionService::new();
        mock.expect_describe_file()
            .times(3)
            .returning(|file| Ok(FileDescription::new(file.path.clone(), "ok")));

        let settings = AnalysisSettings {
            rpm_limit: 2,
            ..settings(10, 8)
        };
        let orchestrator = AnalysisOrchestrator::new(Arc::new(mock), settings, dir.path());

        let start = tokio::time::Instant::now();
        let files = ["a.rs", "b.rs", "c.rs"].iter().map(|p| classified(p, Tier::Deep)).collect();
        let outcome = orchestrator.analyze(files).await;

        assert!(outcome.is_complete());
        assert!(start.elapsed() >= Duration::from_secs(60));
    }

    #[test]
    fn test_plan_counts_units() {
        let files = vec![
            classified("a", Tier::Batch),
            classified("b", Tier::Batch),
            classified("c", Tier::Batch),
            classified("d", Tier::Deep),
            classified("e", Tier::Skip),
        ];
        let plan = AnalysisPlan::new(&files, 2);
        assert_eq!(plan, AnalysisPlan { skip: 1, batch: 3, deep: 1, chunks: 2 });
        assert_eq!(plan.units(), 3);
        assert!(plan.needs_service());
        assert!(!AnalysisPlan::new(&files[4..], 2).needs_service());
    }

    #[test]
    fn test_leading_chars_respects_char_boundaries() {
        assert_eq!(leading_chars("héllo", 2), ("hé", true));
        assert_eq!(leading_chars("hi", 5), ("hi", false));
    }
}
