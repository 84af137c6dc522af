//! Failure recovery rules.
//!
//! Diagnosis is pure: given the failed action, its outcome, and where in the
//! session it happened, decide whether one retry is worth it and what to do
//! before retrying. The loop applies at most one directive per step and
//! never recurses into recovery.
//!
//! Both rules key on outcome message substrings. That coupling to wording
//! is deliberate and the executor owns the phrasing; a structured failure
//! kind would be the obvious evolution if a third rule ever appears.

use tracing::info;

use crate::config::RecoveryConfig;
use crate::oracle::{ActionKind, ProposedAction};
use crate::session::Outcome;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryDirective {
    /// Let the page settle, then run the same action once more. Covers
    /// targets that exist but had not rendered yet.
    RetryAfterSettle,
    /// Load the search engine, then run the search again there. Only makes
    /// sense before anything else happened in the session.
    SearchEngineDetour { url: String },
}

pub struct RecoveryPolicy {
    config: RecoveryConfig,
}

impl RecoveryPolicy {
    pub fn new(config: RecoveryConfig) -> Self {
        Self { config }
    }

    /// Decide whether `outcome` warrants a single retry of `action`.
    /// `step_index` is the zero-based position of the step in the session.
    pub fn diagnose(
        &self,
        action: &ProposedAction,
        outcome: &Outcome,
        step_index: usize,
    ) -> Option<RecoveryDirective> {
        if outcome.is_success() {
            return None;
        }

        if action.kind.targets_element() && outcome.message.contains("not found") {
            info!(kind = action.kind.label(), "target missing, retrying after settle");
            return Some(RecoveryDirective::RetryAfterSettle);
        }

        if action.kind == ActionKind::Search
            && outcome.message.contains("search box")
            && step_index == 0
        {
            info!(url = %self.config.search_engine, "no search box on first step, detouring");
            return Some(RecoveryDirective::SearchEngineDetour {
                url: self.config.search_engine.clone(),
            });
        }

        None
    }
}
