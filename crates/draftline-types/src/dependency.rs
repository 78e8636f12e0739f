use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// Artifact id -> ids of artifacts built from it. Loaded once, read-only at runtime.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DependencyMap(BTreeMap<String, BTreeSet<String>>);

impl DependencyMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from `(upstream, dependent)` pairs. Self-edges are dropped.
    pub fn from_pairs<I, A, B>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (A, B)>,
        A: Into<String>,
        B: Into<String>,
    {
        let mut map: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for (upstream, dependent) in pairs {
            let (upstream, dependent) = (upstream.into(), dependent.into());
            if upstream != dependent {
                map.entry(upstream).or_default().insert(dependent);
            }
        }
        Self(map)
    }

    /// Direct dependents only.
    pub fn dependents_of(&self, artifact: &str) -> impl Iterator<Item = &str> {
        self.0
            .get(artifact)
            .into_iter()
            .flat_map(|set| set.iter().map(String::as_str))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &BTreeSet<String>)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dependents_of() {
        let deps = DependencyMap::from_pairs([
            ("research", "solution_analysis"),
            ("research", "introduction"),
            ("solution_analysis", "approach"),
            ("introduction", "introduction"),
        ]);
        let direct: Vec<&str> = deps.dependents_of("research").collect();
        assert_eq!(direct, vec!["introduction", "solution_analysis"]);
        assert_eq!(deps.dependents_of("introduction").count(), 0);
        assert_eq!(deps.dependents_of("missing").count(), 0);
    }

    #[test]
    fn test_toml_shape() {
        let deps: DependencyMap = toml::from_str(
            r#"
research = ["solution_analysis"]
solution_analysis = ["approach", "budget"]
"#,
        )
        .unwrap();
        assert_eq!(deps.dependents_of("solution_analysis").count(), 2);
    }
}
