//! Append-only rules file written by the `evolve` operation
//!
//! Each rule is one line, `- [<RFC 3339 timestamp>] <text>`. The file is only
//! ever opened for append; earlier lines are never rewritten.

use crate::error::{StrataError, StrataResult};
use chrono::Utc;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// Handle to a host-managed rules file
#[derive(Debug, Clone)]
pub struct RulesFile {
    path: PathBuf,
}

impl RulesFile {
    /// Point at a rules file; nothing is created until the first append
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one rule and return the line written (without newline).
    ///
    /// Internal whitespace, including newlines, is collapsed so a rule always
    /// occupies exactly one line.
    pub async fn append(&self, text: &str) -> StrataResult<String> {
        let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
        if text.is_empty() {
            return Err(StrataError::invalid_params("evolve", "rule text is empty"));
        }
        let line = format!("- [{}] {}", Utc::now().to_rfc3339(), text);

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StrataError::rules_file(&self.path, e))?;
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| StrataError::rules_file(&self.path, e))?;
        file.write_all(format!("{line}\n").as_bytes())
            .await
            .map_err(|e| StrataError::rules_file(&self.path, e))?;
        file.flush()
            .await
            .map_err(|e| StrataError::rules_file(&self.path, e))?;

        tracing::info!(path = %self.path.display(), "Rule appended");
        Ok(line)
    }

    /// Every rule line currently in the file; empty if it does not exist yet
    pub async fn read_rules(&self) -> StrataResult<Vec<String>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => Ok(contents
                .lines()
                .filter(|line| line.starts_with("- ["))
                .map(str::to_string)
                .collect()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(StrataError::rules_file(&self.path, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_append_keeps_earlier_lines() {
        let dir = tempfile::tempdir().unwrap();
        let rules = RulesFile::new(dir.path().join("nested").join("RULES.md"));

        assert!(rules.read_rules().await.unwrap().is_empty());
        let first = rules.append("Prefer short answers").await.unwrap();
        let second = rules.append("Always cite\nthe source").await.unwrap();

        let lines = rules.read_rules().await.unwrap();
        assert_eq!(lines, vec![first, second.clone()]);
        assert!(second.ends_with("] Always cite the source"));
        assert!(lines[0].starts_with("- ["));
    }

    #[tokio::test]
    async fn test_empty_rule_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let rules = RulesFile::new(dir.path().join("RULES.md"));
        let err = rules.append("  \n ").await.unwrap_err();
        assert!(matches!(err, StrataError::InvalidParams { .. }));
        assert!(!rules.path().exists());
    }
}
