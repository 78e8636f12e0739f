//! Evaluation results and the criteria they are scored against.
//!
//! Scores are normalized to `0.0..=1.0`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Outcome of an automated or human evaluation. Replaced wholesale, never patched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub score: f64,
    pub passed: bool,
    pub feedback: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub criteria: Option<BTreeMap<String, f64>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Criterion {
    pub name: String,
    pub description: String,
    pub weight: f64,
}

/// Weighted criteria for one content type, loaded once at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationCriteria {
    pub content_type: String,
    pub criteria: Vec<Criterion>,
    pub passing_threshold: f64,
}

#[derive(Debug, Error)]
pub enum CriteriaError {
    #[error("criteria for '{0}' are empty")]
    Empty(String),

    #[error("criterion '{name}' has non-positive weight {weight}")]
    InvalidWeight { name: String, weight: f64 },

    #[error("duplicate criterion '{0}'")]
    Duplicate(String),

    #[error("passing threshold {0} is outside 0.0..=1.0")]
    InvalidThreshold(f64),

    #[error("invalid criteria document: {0}")]
    Parse(String),
}

impl EvaluationCriteria {
    /// Parse and validate a YAML criteria document.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, CriteriaError> {
        let criteria: EvaluationCriteria =
            serde_yaml_ng::from_str(yaml).map_err(|e| CriteriaError::Parse(e.to_string()))?;
        criteria.validate()?;
        Ok(criteria)
    }

    pub fn validate(&self) -> Result<(), CriteriaError> {
        if self.criteria.is_empty() {
            return Err(CriteriaError::Empty(self.content_type.clone()));
        }
        if !(0.0..=1.0).contains(&self.passing_threshold) {
            return Err(CriteriaError::InvalidThreshold(self.passing_threshold));
        }
        let mut seen = std::collections::BTreeSet::new();
        for c in &self.criteria {
            if c.weight <= 0.0 || !c.weight.is_finite() {
                return Err(CriteriaError::InvalidWeight {
                    name: c.name.clone(),
                    weight: c.weight,
                });
            }
            if !seen.insert(c.name.as_str()) {
                return Err(CriteriaError::Duplicate(c.name.clone()));
            }
        }
        Ok(())
    }

    /// Combine per-criterion scores into a weighted result.
    ///
    /// Missing criteria score zero. Individual scores are clamped to `0.0..=1.0`.
    pub fn aggregate(&self, scores: &BTreeMap<String, f64>, feedback: impl Into<String>) -> EvaluationResult {
        let total_weight: f64 = self.criteria.iter().map(|c| c.weight).sum();
        let weighted: f64 = self
            .criteria
            .iter()
            .map(|c| scores.get(&c.name).copied().unwrap_or(0.0).clamp(0.0, 1.0) * c.weight)
            .sum();
        let score = if total_weight > 0.0 { weighted / total_weight } else { 0.0 };

        let breakdown = self
            .criteria
            .iter()
            .map(|c| (c.name.clone(), scores.get(&c.name).copied().unwrap_or(0.0)))
            .collect();

        EvaluationResult {
            score,
            passed: score >= self.passing_threshold,
            feedback: feedback.into(),
            criteria: Some(breakdown),
        }
    }
}

/// Criteria keyed by content type.
#[derive(Debug, Clone, Default)]
pub struct CriteriaRegistry {
    by_content_type: std::collections::HashMap<String, EvaluationCriteria>,
}

impl CriteriaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and register. A later entry for the same content type replaces the earlier one.
    pub fn insert(&mut self, criteria: EvaluationCriteria) -> Result<(), CriteriaError> {
        criteria.validate()?;
        self.by_content_type.insert(criteria.content_type.clone(), criteria);
        Ok(())
    }

    pub fn get(&self, content_type: &str) -> Option<&EvaluationCriteria> {
        self.by_content_type.get(content_type)
    }

    pub fn len(&self) -> usize {
        self.by_content_type.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_content_type.is_empty()
    }

    pub fn content_types(&self) -> impl Iterator<Item = &str> {
        self.by_content_type.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn criteria() -> EvaluationCriteria {
        EvaluationCriteria::from_yaml_str(
            r#"
content_type: section
passing_threshold: 0.7
criteria:
  - name: clarity
    description: Reads cleanly
    weight: 3
  - name: relevance
    description: Addresses the request
    weight: 1
"#,
        )
        .unwrap()
    }

    #[test]
    fn test_aggregate_weighted() {
        let c = criteria();
        let scores = BTreeMap::from([("clarity".to_string(), 1.0), ("relevance".to_string(), 0.0)]);
        let result = c.aggregate(&scores, "ok");
        assert!((result.score - 0.75).abs() < 1e-9);
        assert!(result.passed);
        assert_eq!(result.criteria.unwrap().len(), 2);
    }

    #[test]
    fn test_aggregate_missing_scores_fail() {
        let result = criteria().aggregate(&BTreeMap::new(), "");
        assert_eq!(result.score, 0.0);
        assert!(!result.passed);
    }

    #[test]
    fn test_validate_rejects_bad_documents() {
        let mut c = criteria();
        c.passing_threshold = 1.5;
        assert!(matches!(c.validate(), Err(CriteriaError::InvalidThreshold(_))));

        let mut c = criteria();
        c.criteria[1].weight = 0.0;
        assert!(matches!(c.validate(), Err(CriteriaError::InvalidWeight { .. })));

        let mut c = criteria();
        c.criteria[1].name = "clarity".into();
        assert!(matches!(c.validate(), Err(CriteriaError::Duplicate(_))));

        let mut c = criteria();
        c.criteria.clear();
        assert!(matches!(c.validate(), Err(CriteriaError::Empty(_))));
    }

    #[test]
    fn test_registry_rejects_invalid() {
        let mut registry = CriteriaRegistry::new();
        registry.insert(criteria()).unwrap();
        assert!(registry.get("section").is_some());

        let mut bad = criteria();
        bad.content_type = "budget".into();
        bad.passing_threshold = -0.1;
        assert!(registry.insert(bad).is_err());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_parse_error() {
        assert!(matches!(
            EvaluationCriteria::from_yaml_str("content_type: [unclosed"),
            Err(CriteriaError::Parse(_))
        ));
    }
}
