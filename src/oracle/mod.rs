//! Decision oracle seam.
//!
//! The oracle is asked once per loop iteration for a single next action,
//! given the goal, the rendered DOM summary, and the transcript so far. The
//! response format is a fixed three-line convention:
//!
//! ```text
//! ACTION: [A-F]
//! PARAM: [parameter text]
//! DOM: [CSS selector or "N/A"]
//! ```
//!
//! Parsing that convention is this module's job; untrusted oracle output
//! never reaches the executor unvalidated. The line format is a known
//! compatibility risk, kept because the deployed prompt contract depends on
//! it, and confined to [`parse_response`] so a replacement touches one seam.

pub mod chat;

use std::collections::HashMap;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::PilotResult;
use crate::session::StepRecord;

pub use chat::{ChatOracle, ChatOracleConfig};

/// Closed set of actions the pilot can execute. `Extract` is not in the
/// oracle's A-F menu but remains part of the executor contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Navigate,
    Search,
    Click,
    Input,
    Extract,
    Wait,
    Complete,
}

impl ActionKind {
    pub fn label(&self) -> &'static str {
        match self {
            ActionKind::Navigate => "navigate",
            ActionKind::Search => "search",
            ActionKind::Click => "click",
            ActionKind::Input => "input",
            ActionKind::Extract => "extract",
            ActionKind::Wait => "wait",
            ActionKind::Complete => "complete",
        }
    }

    /// True for kinds whose target is an element the page may have lost.
    pub fn targets_element(&self) -> bool {
        matches!(
            self,
            ActionKind::Click | ActionKind::Input | ActionKind::Extract
        )
    }
}

/// One proposed step. Immutable once parsed; at most one is in flight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProposedAction {
    pub kind: ActionKind,
    pub params: HashMap<String, String>,
    /// Structural selector hint from the oracle; `None` encodes "N/A".
    pub dom_hint: Option<String>,
}

impl ProposedAction {
    pub fn new(kind: ActionKind) -> Self {
        Self {
            kind,
            params: HashMap::new(),
            dom_hint: None,
        }
    }

    pub fn with_param(mut self, key: &str, value: impl Into<String>) -> Self {
        self.params.insert(key.to_string(), value.into());
        self
    }

    pub fn with_dom_hint(mut self, hint: impl Into<String>) -> Self {
        self.dom_hint = Some(hint.into());
        self
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// Explicit screen coordinates, when a vision layer supplied them.
    pub fn coordinates(&self) -> Option<(i64, i64)> {
        let x = self.param("x")?.trim().parse().ok()?;
        let y = self.param("y")?.trim().parse().ok()?;
        Some((x, y))
    }

    /// Descriptive target text ("Add to cart") used by the optical and
    /// descriptive-selector resolution tiers.
    pub fn descriptive_target(&self) -> Option<&str> {
        self.param("selector").map(str::trim).filter(|s| !s.is_empty())
    }
}

/// Asks for the next step toward a goal. Implementations must confine their
/// own failures: transport errors surface as `PilotError::Oracle` (which
/// aborts the session), unparsable responses as `Ok(None)`.
#[async_trait]
pub trait DecisionOracle: Send + Sync {
    async fn next_step(
        &self,
        goal: &str,
        dom_summary: &str,
        transcript: &[StepRecord],
    ) -> PilotResult<Option<ProposedAction>>;
}

static ACTION_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"ACTION:\s*([A-F])").unwrap());
static PARAM_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"PARAM:\s*(.*?)(?:\n|$)").unwrap());
static DOM_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"DOM:\s*(.*?)(?:\n|$)").unwrap());
static DOM_COMMENT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s*\(.*\)$").unwrap());
static DIGITS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").unwrap());

/// Parse the three-line oracle response into a validated action.
/// Returns `None` when the response does not follow the convention.
pub fn parse_response(text: &str) -> Option<ProposedAction> {
    let letter = ACTION_RE.captures(text)?.get(1)?.as_str().to_string();
    let param = PARAM_RE
        .captures(text)?
        .get(1)
        .map(|m| m.as_str().trim().to_string())?;

    let kind = match letter.as_str() {
        "A" => ActionKind::Navigate,
        "B" => ActionKind::Search,
        "C" => ActionKind::Click,
        "D" => ActionKind::Input,
        "E" => ActionKind::Wait,
        "F" => ActionKind::Complete,
        other => {
            debug!(letter = other, "oracle proposed an unknown action letter");
            return None;
        }
    };

    let dom_hint = DOM_RE
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| DOM_COMMENT_RE.replace(m.as_str().trim(), "").to_string())
        .filter(|hint| !hint.is_empty() && !hint.eq_ignore_ascii_case("n/a"));

    let mut action = ProposedAction::new(kind);
    action.dom_hint = dom_hint;

    match kind {
        ActionKind::Navigate => {
            action
                .params
                .insert("url".to_string(), normalize_url(&param));
        }
        ActionKind::Search => {
            action.params.insert("query".to_string(), param);
        }
        ActionKind::Click => {
            // Descriptive target text, not necessarily a real selector.
            action.params.insert("selector".to_string(), param);
        }
        ActionKind::Input => {
            match param.split_once(',') {
                Some((selector, text)) => {
                    action
                        .params
                        .insert("selector".to_string(), selector.trim().to_string());
                    action
                        .params
                        .insert("text".to_string(), text.trim().to_string());
                }
                None => {
                    action
                        .params
                        .insert("selector".to_string(), "input field".to_string());
                    action.params.insert("text".to_string(), param);
                }
            }
        }
        ActionKind::Wait => {
            let seconds = DIGITS_RE
                .find(&param)
                .map(|m| m.as_str().to_string())
                .unwrap_or_else(|| "3".to_string());
            action.params.insert("seconds".to_string(), seconds);
        }
        ActionKind::Complete => {
            action.params.insert("message".to_string(), param);
        }
        ActionKind::Extract => unreachable!("extract is not in the A-F menu"),
    }

    Some(action)
}

/// Bare hosts become https URLs; anything already schemed is left alone.
pub fn normalize_url(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty()
        || trimmed.starts_with("http://")
        || trimmed.starts_with("https://")
    {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_click_with_dom_hint() {
        let action = parse_response(
            "ACTION: C\nPARAM: Add to cart\nDOM: button.add-to-cart",
        )
        .unwrap();
        assert_eq!(action.kind, ActionKind::Click);
        assert_eq!(action.param("selector"), Some("Add to cart"));
        assert_eq!(action.dom_hint.as_deref(), Some("button.add-to-cart"));
    }

    #[test]
    fn dom_na_becomes_none_and_trailing_comment_is_stripped() {
        let action = parse_response("ACTION: C\nPARAM: Sign in\nDOM: N/A").unwrap();
        assert!(action.dom_hint.is_none());

        let action =
            parse_response("ACTION: C\nPARAM: Sign in\nDOM: #login (top right corner)").unwrap();
        assert_eq!(action.dom_hint.as_deref(), Some("#login"));
    }

    #[test]
    fn navigate_param_gets_https_prefix() {
        let action = parse_response("ACTION: A\nPARAM: example.com\nDOM: N/A").unwrap();
        assert_eq!(action.param("url"), Some("https://example.com"));

        let action =
            parse_response("ACTION: A\nPARAM: http://example.com\nDOM: N/A").unwrap();
        assert_eq!(action.param("url"), Some("http://example.com"));
    }

    #[test]
    fn input_param_splits_on_first_comma() {
        let action =
            parse_response("ACTION: D\nPARAM: #email, user@host.com\nDOM: N/A").unwrap();
        assert_eq!(action.param("selector"), Some("#email"));
        assert_eq!(action.param("text"), Some("user@host.com"));

        let action = parse_response("ACTION: D\nPARAM: just some text\nDOM: N/A").unwrap();
        assert_eq!(action.param("selector"), Some("input field"));
        assert_eq!(action.param("text"), Some("just some text"));
    }

    #[test]
    fn wait_scrapes_first_number_with_default() {
        let action = parse_response("ACTION: E\nPARAM: wait 5 seconds\nDOM: N/A").unwrap();
        assert_eq!(action.param("seconds"), Some("5"));

        let action = parse_response("ACTION: E\nPARAM: a moment\nDOM: N/A").unwrap();
        assert_eq!(action.param("seconds"), Some("3"));
    }

    #[test]
    fn complete_carries_message() {
        let action = parse_response(
            "ACTION: F\nPARAM: Task completed (current URL: https://example.com/new)\nDOM: N/A",
        )
        .unwrap();
        assert_eq!(action.kind, ActionKind::Complete);
        assert_eq!(
            action.param("message"),
            Some("Task completed (current URL: https://example.com/new)")
        );
    }

    #[test]
    fn malformed_responses_yield_none() {
        assert!(parse_response("I think you should click the button").is_none());
        assert!(parse_response("ACTION: Z\nPARAM: what\nDOM: N/A").is_none());
        assert!(parse_response("ACTION: C").is_none());
    }

    #[test]
    fn coordinates_parse_from_params() {
        let action = ProposedAction::new(ActionKind::Click)
            .with_param("x", "125")
            .with_param("y", "210");
        assert_eq!(action.coordinates(), Some((125, 210)));

        let action = ProposedAction::new(ActionKind::Click).with_param("x", "abc");
        assert_eq!(action.coordinates(), None);
    }
}
