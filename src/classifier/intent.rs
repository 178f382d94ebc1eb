//! Intent identifiers and classifier output validation.
//!
//! The classifier is an untrusted collaborator: its output is free text
//! that usually contains a JSON object naming an action and a confidence.
//! This module validates that output against the closed [`ActionId`] set —
//! anything outside the known set is ignored rather than trusted.

use serde::{Deserialize, Serialize};

use super::extract::{extract_json, Extraction};

/// The closed set of actions the router can dispatch to.
///
/// Known at startup; classifier output naming anything else is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionId {
    /// Multi-step "send a message to a group" flow
    SendToGroup,
    /// Poll creation and voting
    Poll,
    /// Conversation summarization
    Summary,
    /// Group member report
    MemberReport,
    /// Unanswered-questions digest
    UnansweredQuestions,
    /// Group rules lookup and moderation
    GroupRules,
    /// Catch-all default reply
    Fallback,
}

impl ActionId {
    /// Parse a classifier-produced action name.
    ///
    /// Accepts the canonical snake_case names and the upper-case variants
    /// models tend to emit. Unknown names yield `None`.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "send_to_group" | "sendtogroup" | "send" => Some(Self::SendToGroup),
            "poll" => Some(Self::Poll),
            "summary" | "summarize" => Some(Self::Summary),
            "member_report" | "memberreport" => Some(Self::MemberReport),
            "unanswered_questions" | "unansweredquestions" => Some(Self::UnansweredQuestions),
            "group_rules" | "grouprules" | "rules" => Some(Self::GroupRules),
            "fallback" | "none" => Some(Self::Fallback),
            _ => None,
        }
    }

    /// Canonical name used in catalogue prompts and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SendToGroup => "send_to_group",
            Self::Poll => "poll",
            Self::Summary => "summary",
            Self::MemberReport => "member_report",
            Self::UnansweredQuestions => "unanswered_questions",
            Self::GroupRules => "group_rules",
            Self::Fallback => "fallback",
        }
    }
}

impl std::fmt::Display for ActionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated nomination from the classifier.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntentGuess {
    /// The nominated action
    pub action: ActionId,
    /// Model-reported confidence in [0, 1]
    pub confidence: f64,
}

/// Parse raw classifier output into at most one validated nomination.
///
/// Returns `None` for: unparsable output, unknown action names, a missing
/// or non-numeric confidence, or more than one nomination (the contract
/// promises a single best guess; a list is treated as no usable signal).
pub fn parse_intent(raw: &str) -> Option<IntentGuess> {
    let value = match extract_json(raw) {
        Extraction::Json(v) => v,
        Extraction::Unparsable => return None,
    };

    // A list of nominations violates the single-best-guess contract.
    if value.get("actions").is_some_and(|v| v.is_array()) {
        return None;
    }

    let action = match value.get("action") {
        Some(serde_json::Value::String(name)) => ActionId::parse(name)?,
        _ => return None,
    };

    let confidence = value.get("confidence").and_then(|v| v.as_f64())?;
    if !(0.0..=1.0).contains(&confidence) {
        return None;
    }

    Some(IntentGuess { action, confidence })
}
