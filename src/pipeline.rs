use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::classifier::{ClassificationRules, TierClassifier};
use crate::describer::{DescriptionService, HeuristicDescriber};
use crate::diff::DiffEngine;
use crate::error::{BriefError, DigestError, Result};
use crate::orchestrator::{AnalysisOrchestrator, AnalysisPlan, AnalysisSettings, ProgressObserver};
use crate::storage::{compute_digests, DigestStore};
use crate::types::{ClassifiedFile, DiffResult, DigestEntry, DigestMap, FileRecord, Tier};

pub const DEFAULT_CACHE_PATH: &str = ".repobrief/digests.json";

/// Called for each file dropped from the digest universe
pub type ExclusionObserver = Arc<dyn Fn(&str, &DigestError) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// No usable prior store: every file is analyzed
    Full,
    /// Only added and changed files are analyzed
    Incremental,
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub mode: RunMode,
    pub diff: DiffResult,
    pub plan: AnalysisPlan,
    /// Published descriptions, sorted by path
    pub descriptions: BTreeMap<String, String>,
    /// Files that failed this run, sorted
    pub pending: Vec<String>,
    /// Files that could not be fingerprinted
    pub excluded: Vec<String>,
    pub service_calls: usize,
    pub persisted: bool,
    pub duration: Duration,
}

impl RunReport {
    pub fn is_soft_failure(&self) -> bool {
        !self.pending.is_empty()
    }
}

/// Composes digesting, diffing, classification and analysis into one run.
pub struct Pipeline {
    root: PathBuf,
    store: DigestStore,
    classifier: TierClassifier,
    settings: AnalysisSettings,
    service: Option<Arc<dyn DescriptionService>>,
    heuristic: bool,
    dry_run: bool,
    force_full: bool,
    observer: Option<ProgressObserver>,
    on_excluded: Option<ExclusionObserver>,
}

impl Pipeline {
    pub fn builder(root: impl Into<PathBuf>) -> PipelineBuilder {
        PipelineBuilder::new(root)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn store(&self) -> &DigestStore {
        &self.store
    }

    /// Run over the current listing and publish the new state.
    ///
    /// The store on disk is only touched by the single save at the end, and
    /// not at all on a dry run or when the run fails before that point.
    pub async fn run(&self, files: Vec<FileRecord>) -> Result<RunReport> {
        let start = Instant::now();

        let prior = if self.force_full {
            DigestMap::new()
        } else {
            self.store.load()
        };
        let mode = if prior.is_empty() { RunMode::Full } else { RunMode::Incremental };
        info!("Starting {:?} run over {} files", mode, files.len());

        let mut excluded = Vec::new();
        let digests = compute_digests(&self.root, &files, |path, err| {
            excluded.push(path.to_string());
            if let Some(on_excluded) = &self.on_excluded {
                on_excluded(path, err);
            }
        });

        let diff = DiffEngine::diff(&digests, &prior);
        info!("Diff: {}", diff.summary());

        // Unchanged but analyzed again: no description yet, or an offline
        // description that a real service can now replace
        let requeued: BTreeSet<&String> = diff
            .unchanged
            .iter()
            .filter(|path| {
                prior
                    .get(*path)
                    .map_or(true, |e| e.description.is_none() || (e.heuristic && !self.heuristic))
            })
            .collect();
        if !requeued.is_empty() {
            debug!("{} unchanged entries are requeued for a fresh description", requeued.len());
        }

        let records: HashMap<&str, &FileRecord> = files.iter().map(|f| (f.path.as_str(), f)).collect();
        let classified: Vec<ClassifiedFile> = diff
            .stale()
            .chain(requeued.iter().copied())
            .filter_map(|path| records.get(path.as_str()))
            .map(|record| self.classifier.classify_file((*record).clone()))
            .collect();

        let plan = AnalysisPlan::new(&classified, self.settings.batch_size);
        info!(
            "Plan: {} skip, {} batch in {} chunks, {} deep",
            plan.skip, plan.batch, plan.chunks, plan.deep
        );

        let mut descriptions = BTreeMap::new();
        let mut next = DigestMap::new();
        for path in &diff.unchanged {
            if requeued.contains(path) {
                continue;
            }
            if let Some(entry) = prior.get(path) {
                if let Some(description) = &entry.description {
                    descriptions.insert(path.clone(), description.clone());
                }
                next.insert(path.clone(), entry.clone());
            }
        }

        if self.dry_run {
            info!("Dry run: {} request units would be issued", plan.units());
            return Ok(RunReport {
                mode,
                diff,
                plan,
                descriptions,
                pending: Vec::new(),
                excluded,
                service_calls: 0,
                persisted: false,
                duration: start.elapsed(),
            });
        }

        let service: Arc<dyn DescriptionService> = match (&self.service, plan.needs_service()) {
            (Some(service), _) => service.clone(),
            // Only skip-tier files left; nothing will reach the service
            (None, false) => Arc::new(HeuristicDescriber::new()),
            (None, true) => return Err(BriefError::MissingCredential),
        };

        let mut orchestrator = AnalysisOrchestrator::new(service, self.settings.clone(), &self.root);
        if let Some(observer) = &self.observer {
            orchestrator = orchestrator.with_observer(observer.clone());
        }

        let tiers: HashMap<String, _> = classified.iter().map(|c| (c.record.path.clone(), c.tier)).collect();
        let outcome = orchestrator.analyze(classified).await;

        let analyzed_at = Utc::now();
        for (path, description) in &outcome.descriptions {
            let (Some(digest), Some(tier)) = (digests.get(path), tiers.get(path)) else {
                continue;
            };
            next.insert(
                path.clone(),
                DigestEntry {
                    digest: digest.clone(),
                    tier: *tier,
                    description: Some(description.clone()),
                    last_analyzed_at: Some(analyzed_at),
                    heuristic: self.heuristic && *tier != Tier::Skip,
                },
            );
            descriptions.insert(path.clone(), description.clone());
        }

        if !outcome.pending.is_empty() {
            warn!(
                "{} files pending; they will be retried on the next run",
                outcome.pending.len()
            );
        }

        self.store.save(&next)?;
        info!("Persisted {} entries to {}", next.len(), self.store.path().display());

        Ok(RunReport {
            mode,
            diff,
            plan,
            descriptions,
            pending: outcome.pending,
            excluded,
            service_calls: outcome.service_calls,
            persisted: true,
            duration: start.elapsed(),
        })
    }
}

pub struct PipelineBuilder {
    root: PathBuf,
    cache_path: Option<PathBuf>,
    rules: ClassificationRules,
    settings: AnalysisSettings,
    service: Option<Arc<dyn DescriptionService>>,
    heuristic: bool,
    dry_run: bool,
    force_full: bool,
    observer: Option<ProgressObserver>,
    on_excluded: Option<ExclusionObserver>,
}

impl PipelineBuilder {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            cache_path: None,
            rules: ClassificationRules::builtin(),
            settings: AnalysisSettings::default(),
            service: None,
            heuristic: false,
            dry_run: false,
            force_full: false,
            observer: None,
            on_excluded: None,
        }
    }

    /// Store location; relative paths resolve against the root
    pub fn cache_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.cache_path = Some(path.into());
        self
    }

    pub fn rules(mut self, rules: ClassificationRules) -> Self {
        self.rules = rules;
        self
    }

    pub fn settings(mut self, settings: AnalysisSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.settings.batch_size = batch_size.max(1);
        self
    }

    pub fn service(mut self, service: Arc<dyn DescriptionService>) -> Self {
        self.service = Some(service);
        self
    }

    /// The service writes offline descriptions. Entries it produces are
    /// flagged so a later run with a real service redoes them.
    pub fn heuristic_descriptions(mut self, heuristic: bool) -> Self {
        self.heuristic = heuristic;
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn force_full(mut self, force_full: bool) -> Self {
        self.force_full = force_full;
        self
    }

    pub fn observer(mut self, observer: ProgressObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn on_excluded(mut self, on_excluded: ExclusionObserver) -> Self {
        self.on_excluded = Some(on_excluded);
        self
    }

    pub fn build(self) -> Result<Pipeline> {
        let cache_path = self.root.join(
            self.cache_path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CACHE_PATH)),
        );

        Ok(Pipeline {
            classifier: TierClassifier::new(&self.rules)?,
            store: DigestStore::new(cache_path),
            root: self.root,
            settings: self.settings,
            service: self.service,
            heuristic: self.heuristic,
            dry_run: self.dry_run,
            force_full: self.force_full,
            observer: self.observer,
            on_excluded: self.on_excluded,
        })
    }
}
