use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::anthropic::{AnthropicClient, Message};
use crate::error::DescribeError;

/// Leading slice of a batch-tier file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileExcerpt {
    pub path: String,
    pub excerpt: String,
}

/// Full (possibly truncated) content of a deep-tier file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileContent {
    pub path: String,
    pub content: String,
    pub truncated: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDescription {
    pub path: String,
    pub description: String,
}

impl FileDescription {
    pub fn new(path: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            description: description.into(),
        }
    }
}

/// Backend that turns file content into short natural-language descriptions.
///
/// A batch reply is matched to its inputs by path; order is not significant.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DescriptionService: Send + Sync {
    async fn describe_batch(&self, files: &[FileExcerpt]) -> Result<Vec<FileDescription>, DescribeError>;

    async fn describe_file(&self, file: &FileContent) -> Result<FileDescription, DescribeError>;
}

const SYSTEM_PROMPT: &str = "You write terse, factual one-line descriptions of source files for a codebase index. \
Describe what the file is for, not how it is written. Never invent behavior that is not visible in the content.";

/// Description service backed by Claude models: a cheaper model for batches
/// and a stronger one for deep files.
#[derive(Debug, Clone)]
pub struct ClaudeDescriber {
    client: AnthropicClient,
    batch_model: String,
    deep_model: String,
}

impl ClaudeDescriber {
    pub fn new(client: AnthropicClient, batch_model: impl Into<String>, deep_model: impl Into<String>) -> Self {
        Self {
            client,
            batch_model: batch_model.into(),
            deep_model: deep_model.into(),
        }
    }

    fn batch_prompt(files: &[FileExcerpt]) -> String {
        let mut prompt = String::from(
            "Describe each file below in one sentence of at most 20 words.\n\
             Respond with ONLY a JSON array, one object per file, each with \"path\" and \"description\" keys. \
             Use the paths exactly as given.\n\n",
        );
        for file in files {
            prompt.push_str(&format!("=== FILE: {} ===\n{}\n\n", file.path, file.excerpt));
        }
        prompt
    }

    fn deep_prompt(file: &FileContent) -> String {
        let note = if file.truncated { " (truncated)" } else { "" };
        format!(
            "Describe the purpose of this file in one or two sentences. \
             Mention its key responsibilities. Respond with the description only.\n\n\
             === FILE: {}{} ===\n{}\n",
            file.path, note, file.content
        )
    }

    /// Pull the JSON array out of a reply that may wrap it in prose or fences.
    ///
    /// Each `[` is tried in order and exactly one JSON value is read from it,
    /// so brackets in surrounding prose do not matter.
    pub fn parse_batch_reply(text: &str) -> Result<Vec<FileDescription>, DescribeError> {
        let mut last_error = None;
        for (start, _) in text.match_indices('[') {
            match serde_json::Deserializer::from_str(&text[start..])
                .into_iter::<Vec<FileDescription>>()
                .next()
            {
                Some(Ok(descriptions)) => return Ok(descriptions),
                Some(Err(e)) => last_error = Some(e),
                None => break,
            }
        }

        Err(match last_error {
            Some(e) => DescribeError::Malformed(format!("batch reply: {}", e)),
            None => DescribeError::Malformed("no JSON array in reply".to_string()),
        })
    }
}

#[async_trait]
impl DescriptionService for ClaudeDescriber {
    async fn describe_batch(&self, files: &[FileExcerpt]) -> Result<Vec<FileDescription>, DescribeError> {
        let messages = [Message::user(Self::batch_prompt(files))];
        let response = self
            .client
            .send_message(&self.batch_model, Some(SYSTEM_PROMPT), &messages)
            .await?;
        Self::parse_batch_reply(&response.text())
    }

    async fn describe_file(&self, file: &FileContent) -> Result<FileDescription, DescribeError> {
        let messages = [Message::user(Self::deep_prompt(file))];
        let response = self
            .client
            .send_message(&self.deep_model, Some(SYSTEM_PROMPT), &messages)
            .await?;

        let description = response.text().trim().trim_matches('"').trim().to_string();
        if description.is_empty() {
            return Err(DescribeError::Malformed(format!("empty description for {}", file.path)));
        }
        Ok(FileDescription::new(file.path.clone(), description))
    }
}

/// Zero-network describer used in free mode.
///
/// Uses the file's leading comment when there is one, otherwise a phrase
/// built from its language and directory.
#[derive(Debug, Clone, Default)]
pub struct HeuristicDescriber;

impl HeuristicDescriber {
    pub fn new() -> Self {
        Self
    }

    pub fn describe(path: &str, text: &str) -> String {
        if let Some(comment) = leading_comment(text) {
            return comment;
        }

        let p = Path::new(path);
        let kind = language_for(
            &p.extension()
                .map(|e| e.to_string_lossy().to_lowercase())
                .unwrap_or_default(),
        );
        match p.parent().map(|d| d.to_string_lossy().to_string()) {
            Some(dir) if !dir.is_empty() => format!("{} in {}/", kind, dir),
            _ => kind,
        }
    }
}

#[async_trait]
impl DescriptionService for HeuristicDescriber {
    async fn describe_batch(&self, files: &[FileExcerpt]) -> Result<Vec<FileDescription>, DescribeError> {
        Ok(files
            .iter()
            .map(|f| FileDescription::new(f.path.clone(), Self::describe(&f.path, &f.excerpt)))
            .collect())
    }

    async fn describe_file(&self, file: &FileContent) -> Result<FileDescription, DescribeError> {
        Ok(FileDescription::new(file.path.clone(), Self::describe(&file.path, &file.content)))
    }
}

static COMMENT_LINE: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(r#"^\s*(?://[/!]?|#|/\*\*?|\*|"""|'''|--)\s*(.*?)\s*(?:\*/|"""|''')?\s*$"#).ok()
});

fn leading_comment(text: &str) -> Option<String> {
    let marker = COMMENT_LINE.as_ref()?;

    for line in text.lines().take(20) {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with("#!") {
            continue;
        }
        let body = marker.captures(line)?.get(1)?.as_str().trim();
        if body.is_empty() || body.chars().all(|c| !c.is_alphanumeric()) {
            continue;
        }
        if body.to_lowercase().contains("copyright") || body.starts_with("SPDX") || body.starts_with('@') {
            continue;
        }
        return Some(body.to_string());
    }
    None
}

fn language_for(extension: &str) -> String {
    let kind = match extension {
        "rs" => "Rust source file",
        "ts" => "TypeScript module",
        "tsx" => "TypeScript React component",
        "js" | "mjs" | "cjs" => "JavaScript module",
        "jsx" => "JavaScript React component",
        "py" => "Python module",
        "go" => "Go source file",
        "java" => "Java source file",
        "kt" => "Kotlin source file",
        "rb" => "Ruby source file",
        "c" | "h" => "C source file",
        "cpp" | "cc" | "hpp" => "C++ source file",
        "cs" => "C# source file",
        "swift" => "Swift source file",
        "sh" | "bash" => "Shell script",
        "sql" => "SQL script",
        "md" => "Markdown document",
        "json" => "JSON data file",
        "yml" | "yaml" => "YAML configuration",
        "toml" => "TOML configuration",
        "html" => "HTML page",
        "css" | "scss" => "Stylesheet",
        "" => "File",
        other => return format!("{} file", other.to_uppercase()),
    };
    kind.to_string()
}
