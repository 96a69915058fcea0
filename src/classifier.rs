use crate::error::{BriefError, Result};
use crate::types::{ClassifiedFile, FileRecord, Tier};
use globset::{GlobBuilder, GlobMatcher, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};

pub const GENERIC_SKIP_DESCRIPTION: &str = "Configuration file";

/// A skip pattern and the static description attached to files it matches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkipRule {
    /// Exact name, `*.ext`, or glob with `*`/`?`, matched against the basename
    pub pattern: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl SkipRule {
    pub fn new(pattern: &str, description: &str) -> Self {
        Self {
            pattern: pattern.to_string(),
            description: Some(description.to_string()),
        }
    }

    pub fn undescribed(pattern: &str) -> Self {
        Self {
            pattern: pattern.to_string(),
            description: None,
        }
    }
}

/// Inputs to the classifier. Order within `skip_rules` is significant: the
/// first matching rule supplies the description.
#[derive(Debug, Clone, Default)]
pub struct ClassificationRules {
    pub key_entry_points: Vec<String>,
    pub deep_patterns: Vec<String>,
    pub skip_rules: Vec<SkipRule>,
}

impl ClassificationRules {
    pub fn builtin() -> Self {
        Self {
            key_entry_points: default_key_entry_points(),
            deep_patterns: Vec::new(),
            skip_rules: builtin_skip_rules(),
        }
    }

    /// Append configured rules after the built-in ones
    pub fn extend(mut self, key_entry_points: &[String], deep_patterns: &[String], skip_rules: Vec<SkipRule>) -> Self {
        self.key_entry_points.extend(key_entry_points.iter().cloned());
        self.deep_patterns.extend(deep_patterns.iter().cloned());
        self.skip_rules.extend(skip_rules);
        self
    }
}

pub fn default_key_entry_points() -> Vec<String> {
    ["main", "index", "app", "server", "lib", "cli"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

pub fn builtin_skip_rules() -> Vec<SkipRule> {
    vec![
        SkipRule::new("package-lock.json", "npm dependency lockfile"),
        SkipRule::new("yarn.lock", "Yarn dependency lockfile"),
        SkipRule::new("pnpm-lock.yaml", "pnpm dependency lockfile"),
        SkipRule::new("Cargo.lock", "Cargo dependency lockfile"),
        SkipRule::new("Gemfile.lock", "Bundler dependency lockfile"),
        SkipRule::new("poetry.lock", "Poetry dependency lockfile"),
        SkipRule::new("composer.lock", "Composer dependency lockfile"),
        SkipRule::new("go.sum", "Go module checksums"),
        SkipRule::new(".gitignore", "Git ignore rules"),
        SkipRule::new(".gitattributes", "Git attributes"),
        SkipRule::new(".editorconfig", "Editor formatting settings"),
        SkipRule::new(".npmrc", "npm configuration"),
        SkipRule::new(".nvmrc", "Node.js version pin"),
        SkipRule::new(".prettierrc*", "Prettier formatting configuration"),
        SkipRule::new(".eslintrc*", "ESLint configuration"),
        SkipRule::new("tsconfig*.json", "TypeScript compiler configuration"),
        SkipRule::new(".env.example", "Example environment variables"),
        SkipRule::new("LICENSE*", "License text"),
        SkipRule::new("*.min.js", "Minified JavaScript bundle"),
        SkipRule::new("*.min.css", "Minified stylesheet"),
        SkipRule::new("*.map", "Source map"),
        SkipRule::new("*.lock", "Dependency lockfile"),
        SkipRule::new("*.svg", "SVG image asset"),
    ]
}

fn compile(pattern: &str) -> Result<globset::Glob> {
    GlobBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .map_err(|source| BriefError::InvalidPattern {
            pattern: pattern.to_string(),
            source,
        })
}

/// Assigns each file a processing tier.
///
/// Priority is fixed: deep beats skip, skip beats the batch default.
#[derive(Debug)]
pub struct TierClassifier {
    key_entry_points: Vec<String>,
    deep: GlobSet,
    skip: Vec<(GlobMatcher, String)>,
}

impl TierClassifier {
    pub fn new(rules: &ClassificationRules) -> Result<Self> {
        let mut deep = GlobSetBuilder::new();
        for pattern in &rules.deep_patterns {
            deep.add(compile(pattern)?);
        }
        let deep = deep.build().map_err(|source| BriefError::InvalidPattern {
            pattern: rules.deep_patterns.join(", "),
            source,
        })?;

        let skip = rules
            .skip_rules
            .iter()
            .map(|rule| {
                let matcher = compile(&rule.pattern)?.compile_matcher();
                let description = rule
                    .description
                    .clone()
                    .unwrap_or_else(|| GENERIC_SKIP_DESCRIPTION.to_string());
                Ok((matcher, description))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            key_entry_points: rules.key_entry_points.iter().map(|k| k.to_lowercase()).collect(),
            deep,
            skip,
        })
    }

    pub fn classify(&self, file: &FileRecord) -> Tier {
        self.classify_with_description(file).0
    }

    pub fn classify_file(&self, file: FileRecord) -> ClassifiedFile {
        let (tier, auto_description) = self.classify_with_description(&file);
        ClassifiedFile {
            record: file,
            tier,
            auto_description,
        }
    }

    fn classify_with_description(&self, file: &FileRecord) -> (Tier, Option<String>) {
        if self.is_deep(file) {
            return (Tier::Deep, None);
        }

        let name = file.file_name();
        match self.skip.iter().find(|(matcher, _)| matcher.is_match(name)) {
            Some((_, description)) => (Tier::Skip, Some(description.clone())),
            None => (Tier::Batch, None),
        }
    }

    fn is_deep(&self, file: &FileRecord) -> bool {
        let path = file.path.to_lowercase();
        let name = file.file_name().to_lowercase();
        let stem = file.file_stem().to_lowercase();

        let key_entry = self.key_entry_points.iter().any(|key| {
            if key.contains('/') {
                *key == path
            } else if key.contains('.') {
                *key == name
            } else {
                *key == stem
            }
        });

        key_entry || self.deep.is_match(&file.path) || self.deep.is_match(file.file_name())
    }
}
