pub mod types;
pub mod error;
pub mod storage;
pub mod diff;
pub mod classifier;
pub mod rate_limit;
pub mod anthropic;
pub mod describer;
pub mod orchestrator;
pub mod pipeline;
pub mod scanner;
pub mod report;
pub mod config;
pub mod cli;
pub mod cli_types;

// Re-export commonly used types
pub use types::*;
pub use error::{BriefError, DescribeError, DigestError, Result};
pub use storage::{digest_of, DigestStore};
pub use diff::DiffEngine;
pub use classifier::{ClassificationRules, SkipRule, TierClassifier};
pub use rate_limit::RateLimiter;
pub use anthropic::AnthropicClient;
pub use describer::{ClaudeDescriber, DescriptionService, FileContent, FileDescription, FileExcerpt, HeuristicDescriber};
pub use orchestrator::{AnalysisOrchestrator, AnalysisPlan, AnalysisSettings, ProgressObserver};
pub use pipeline::{Pipeline, PipelineBuilder, RunMode, RunReport};
pub use scanner::{RepositoryScanner, ScanResult};
pub use report::ReportWriter;
pub use config::CliConfig;
pub use cli::CliApp;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
