//! Evaluation criteria loader.
//!
//! One YAML document per content type (`*.yaml` / `*.yml`) in the criteria
//! directory. Files are read in name order; a later file for the same content
//! type replaces an earlier one.

use std::path::{Path, PathBuf};

use draftline_types::evaluation::{CriteriaRegistry, EvaluationCriteria};

/// Load every criteria file under `dir`.
///
/// A missing directory yields an empty registry. Files that fail to read,
/// parse or validate are logged and skipped.
pub async fn load_criteria(dir: &Path) -> Result<CriteriaRegistry, std::io::Error> {
    let mut registry = CriteriaRegistry::new();

    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(dir = %dir.display(), "no criteria directory, registry is empty");
            return Ok(registry);
        }
        Err(e) => return Err(e),
    };

    let mut paths: Vec<PathBuf> = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let is_yaml = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext == "yaml" || ext == "yml");
        if is_yaml && entry.file_type().await?.is_file() {
            paths.push(path);
        }
    }
    paths.sort();

    for path in paths {
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "skipping unreadable criteria file");
                continue;
            }
        };
        match EvaluationCriteria::from_yaml_str(&content).and_then(|c| registry.insert(c)) {
            Ok(()) => tracing::debug!(path = %path.display(), "loaded evaluation criteria"),
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "skipping invalid criteria file"),
        }
    }

    tracing::info!(count = registry.len(), "evaluation criteria loaded");
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    const SECTION: &str = r#"
content_type: section
passing_threshold: 0.7
criteria:
  - name: clarity
    description: Reads cleanly
    weight: 2
  - name: evidence
    description: Claims are supported
    weight: 1
"#;

    #[tokio::test]
    async fn test_missing_dir_is_empty() {
        let tmp = TempDir::new().unwrap();
        let registry = load_criteria(&tmp.path().join("criteria")).await.unwrap();
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_loads_valid_and_skips_invalid() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(tmp.path().join("section.yaml"), SECTION).await.unwrap();
        tokio::fs::write(
            tmp.path().join("research.yml"),
            "content_type: research\npassing_threshold: 0.5\ncriteria:\n  - name: depth\n    description: Covers sources\n    weight: 1\n",
        )
        .await
        .unwrap();
        // threshold outside the score range
        tokio::fs::write(
            tmp.path().join("broken.yaml"),
            "content_type: broken\npassing_threshold: 7\ncriteria:\n  - name: x\n    description: x\n    weight: 1\n",
        )
        .await
        .unwrap();
        tokio::fs::write(tmp.path().join("notes.txt"), "not criteria").await.unwrap();

        let registry = load_criteria(tmp.path()).await.unwrap();
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get("section").unwrap().criteria.len(), 2);
        assert!(registry.get("research").is_some());
        assert!(registry.get("broken").is_none());
    }
}
