//! Human review feedback applied on resume.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Closed set of review commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackAction {
    /// Accept the artifact under review.
    Approve,
    /// Send the artifact back with comments.
    Revise,
    /// Rebuild a stale artifact from its current inputs.
    Regenerate,
    /// Accept a stale artifact as-is.
    KeepCurrent,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unrecognized feedback action: '{0}'")]
pub struct UnknownFeedbackAction(pub String);

impl FeedbackAction {
    /// Map free-form reviewer input onto an action.
    ///
    /// Case and separators (`-`, space) are ignored.
    pub fn normalize(raw: &str) -> Result<FeedbackAction, UnknownFeedbackAction> {
        let key: String = raw
            .trim()
            .chars()
            .map(|c| match c {
                '-' | ' ' => '_',
                c => c.to_ascii_lowercase(),
            })
            .collect();

        match key.as_str() {
            "approve" | "approved" | "accept" | "accepted" | "ok" | "lgtm" => Ok(FeedbackAction::Approve),
            "revise" | "revision" | "edit" | "modify" | "changes" | "request_changes" | "reject" => {
                Ok(FeedbackAction::Revise)
            }
            "regenerate" | "regen" | "rerun" | "redo" => Ok(FeedbackAction::Regenerate),
            "keep" | "keep_current" | "keep_as_is" => Ok(FeedbackAction::KeepCurrent),
            _ => Err(UnknownFeedbackAction(raw.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FeedbackAction::Approve => "approve",
            FeedbackAction::Revise => "revise",
            FeedbackAction::Regenerate => "regenerate",
            FeedbackAction::KeepCurrent => "keep_current",
        }
    }
}

impl std::str::FromStr for FeedbackAction {
    type Err = UnknownFeedbackAction;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FeedbackAction::normalize(s)
    }
}

impl std::fmt::Display for FeedbackAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload submitted by a reviewer when resuming an interrupted thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HumanFeedback {
    pub target_artifact: String,
    pub action: FeedbackAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comments: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scores: Option<BTreeMap<String, f64>>,
}

impl HumanFeedback {
    pub fn approve(target: impl Into<String>) -> Self {
        Self {
            target_artifact: target.into(),
            action: FeedbackAction::Approve,
            comments: None,
            scores: None,
        }
    }

    pub fn revise(target: impl Into<String>, comments: impl Into<String>) -> Self {
        Self {
            target_artifact: target.into(),
            action: FeedbackAction::Revise,
            comments: Some(comments.into()),
            scores: None,
        }
    }

    pub fn with_scores(mut self, scores: BTreeMap<String, f64>) -> Self {
        self.scores = Some(scores);
        self
    }
}
