use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::classifier::{ClassificationRules, SkipRule};
use crate::orchestrator::AnalysisSettings;

pub const PROJECT_CONFIG_FILE: &str = "repobrief.toml";
pub const ENV_PREFIX: &str = "REPOBRIEF";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    pub ai: AiConfig,
    pub analysis: AnalysisConfig,
    pub file_scanning: FileScanningConfig,
    pub cache: CacheConfig,
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AiConfig {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub batch_model: String,
    pub deep_model: String,
    pub max_tokens: u32,
    pub timeout_seconds: u64,
    pub max_concurrent: usize,
    pub rpm_limit: u32,
    pub max_retries: u32,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: None,
            batch_model: "claude-3-5-haiku-latest".to_string(),
            deep_model: "claude-3-5-sonnet-latest".to_string(),
            max_tokens: 4096,
            timeout_seconds: 120,
            max_concurrent: 4,
            rpm_limit: 50,
            max_retries: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub batch_size: usize,
    pub excerpt_chars: usize,
    pub deep_max_chars: usize,
    /// Added to the built-in entry points (`main`, `index`, ...)
    pub key_entry_points: Vec<String>,
    pub deep_patterns: Vec<String>,
    /// Added after the built-in skip table
    pub skip_rules: Vec<SkipRule>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            batch_size: 15,
            excerpt_chars: 1500,
            deep_max_chars: 12_000,
            key_entry_points: Vec::new(),
            deep_patterns: Vec::new(),
            skip_rules: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FileScanningConfig {
    pub include_patterns: Vec<String>,
    pub exclude_patterns: Vec<String>,
    pub max_file_size: u64,
    pub follow_symlinks: bool,
}

impl Default for FileScanningConfig {
    fn default() -> Self {
        Self {
            include_patterns: Vec::new(),
            exclude_patterns: vec![
                "**/node_modules/**".to_string(),
                "**/target/**".to_string(),
                "**/dist/**".to_string(),
                "**/build/**".to_string(),
                "**/.venv/**".to_string(),
            ],
            max_file_size: 1024 * 1024,
            follow_symlinks: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Relative paths resolve against the project root
    pub path: PathBuf,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(".repobrief/digests.json"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub path: PathBuf,
    pub project_name: Option<String>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("CODEBASE.md"),
            project_name: None,
        }
    }
}

impl CliConfig {
    /// Layer defaults, the user config, the project config, an explicit
    /// file and `REPOBRIEF__SECTION__KEY` environment variables.
    pub fn load(project_root: &Path, explicit: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(user_config) = Self::user_config_path() {
            builder = builder.add_source(config::File::from(user_config).required(false));
        }
        builder = builder.add_source(config::File::from(project_root.join(PROJECT_CONFIG_FILE)).required(false));
        if let Some(path) = explicit {
            builder = builder.add_source(config::File::from(path.to_path_buf()).required(true));
        }
        builder = builder.add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"));

        let mut loaded: CliConfig = builder
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("Invalid configuration")?;

        if loaded.ai.api_key.as_deref().map_or(true, str::is_empty) {
            loaded.ai.api_key = std::env::var("ANTHROPIC_API_KEY").ok().filter(|k| !k.is_empty());
        }
        Ok(loaded)
    }

    pub fn user_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("dev", "repobrief", "repobrief").map(|dirs| dirs.config_dir().join("config.toml"))
    }

    pub fn anthropic_api_key(&self) -> Option<&str> {
        self.ai.api_key.as_deref().filter(|k| !k.is_empty())
    }

    pub fn cache_path(&self, project_root: &Path) -> PathBuf {
        project_root.join(&self.cache.path)
    }

    pub fn output_path(&self, project_root: &Path) -> PathBuf {
        project_root.join(&self.output.path)
    }

    pub fn classification_rules(&self) -> ClassificationRules {
        ClassificationRules::builtin().extend(
            &self.analysis.key_entry_points,
            &self.analysis.deep_patterns,
            self.analysis.skip_rules.clone(),
        )
    }

    pub fn analysis_settings(&self) -> AnalysisSettings {
        AnalysisSettings {
            batch_size: self.analysis.batch_size.max(1),
            excerpt_chars: self.analysis.excerpt_chars,
            deep_max_chars: self.analysis.deep_max_chars,
            max_concurrent: self.ai.max_concurrent.max(1),
            rpm_limit: self.ai.rpm_limit,
            max_retries: self.ai.max_retries,
            retry_base_delay: Duration::from_secs(2),
        }
    }

    /// TOML rendering with the API key masked
    pub fn to_display_toml(&self) -> Result<String> {
        let mut shown = self.clone();
        if let Some(key) = shown.ai.api_key.as_mut() {
            let tail: String = key.chars().rev().take(4).collect::<Vec<_>>().into_iter().rev().collect();
            *key = format!("****{}", tail);
        }
        toml::to_string_pretty(&shown).context("Failed to render configuration")
    }
}
