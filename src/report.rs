use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;

use crate::error::{BriefError, Result};

/// Renders the final index as markdown.
pub struct ReportWriter {
    generated_at: DateTime<Utc>,
}

impl Default for ReportWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl ReportWriter {
    pub fn new() -> Self {
        Self {
            generated_at: Utc::now(),
        }
    }

    pub fn at(generated_at: DateTime<Utc>) -> Self {
        Self { generated_at }
    }

    /// Files are grouped by directory; both levels are sorted.
    pub fn render(&self, project: &str, descriptions: &BTreeMap<String, String>, pending: &[String]) -> String {
        let mut out = String::new();
        out.push_str(&format!("# {}\n\n", project));
        out.push_str(&format!(
            "_{} files indexed on {}_\n",
            descriptions.len(),
            self.generated_at.format("%Y-%m-%d %H:%M UTC")
        ));

        let mut by_dir: BTreeMap<&str, Vec<(&str, &str)>> = BTreeMap::new();
        for (path, description) in descriptions {
            let (dir, name) = match path.rfind('/') {
                Some(idx) => (&path[..idx], &path[idx + 1..]),
                None => ("", path.as_str()),
            };
            by_dir.entry(dir).or_default().push((name, description.as_str()));
        }

        for (dir, files) in by_dir {
            let heading = if dir.is_empty() { "(root)" } else { dir };
            out.push_str(&format!("\n## {}\n\n", heading));
            for (name, description) in files {
                out.push_str(&format!("- `{}`: {}\n", name, description.replace('\n', " ")));
            }
        }

        if !pending.is_empty() {
            let mut pending = pending.to_vec();
            pending.sort();
            out.push_str(&format!("\n## Pending ({})\n\n", pending.len()));
            out.push_str("These files could not be described on this run. Run again to retry them.\n\n");
            for path in pending {
                out.push_str(&format!("- `{}`\n", path));
            }
        }

        out
    }

    pub fn write_to(&self, path: &Path, contents: &str) -> Result<()> {
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => std::path::PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)?;

        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        tmp.write_all(contents.as_bytes())?;
        tmp.persist(path).map_err(|e| BriefError::Io(e.error))?;
        Ok(())
    }
}
