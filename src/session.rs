//! Session state and the execution transcript.
//!
//! A [`Session`] owns the single driver connection for the whole command
//! loop plus the step and consecutive-failure counters. Outcomes are
//! append-only for the lifetime of a command run; recovery may replace the
//! most recent entry but never removes history beyond that.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::driver::BrowserDriver;
use crate::oracle::ActionKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Success,
    Error,
}

/// Result of one execution attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome {
    pub status: OutcomeStatus,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

impl Outcome {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            status: OutcomeStatus::Success,
            message: message.into(),
            data: None,
        }
    }

    pub fn success_with_data(message: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            status: OutcomeStatus::Success,
            message: message.into(),
            data: Some(data.into()),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: OutcomeStatus::Error,
            message: message.into(),
            data: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == OutcomeStatus::Success
    }
}

/// One transcript entry: the action kind that ran and what came of it.
/// The kind is kept because the final session status depends on whether a
/// `complete` action was ever recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    pub kind: ActionKind,
    pub outcome: Outcome,
}

impl StepRecord {
    pub fn new(kind: ActionKind, outcome: Outcome) -> Self {
        Self { kind, outcome }
    }
}

/// Exclusive owner of the browser connection for one command loop.
pub struct Session {
    driver: Arc<dyn BrowserDriver>,
    steps_taken: u32,
    consecutive_failures: u32,
}

impl Session {
    pub fn new(driver: Arc<dyn BrowserDriver>) -> Self {
        Self {
            driver,
            steps_taken: 0,
            consecutive_failures: 0,
        }
    }

    pub fn driver(&self) -> &Arc<dyn BrowserDriver> {
        &self.driver
    }

    pub fn steps_taken(&self) -> u32 {
        self.steps_taken
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn begin_step(&mut self) {
        self.steps_taken += 1;
    }

    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
    }

    pub fn record_failure(&mut self) -> u32 {
        self.consecutive_failures += 1;
        self.consecutive_failures
    }

    /// Counters survive between goals on the same connection only as zeroes.
    pub fn reset_counters(&mut self) {
        self.steps_taken = 0;
        self.consecutive_failures = 0;
    }

    /// Tear down the remote session. Failures are logged, not surfaced; the
    /// process is exiting anyway when this runs.
    pub async fn disconnect(self) {
        if let Err(err) = self.driver.disconnect().await {
            warn!(%err, "failed to close browser session cleanly");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockDriver;

    #[test]
    fn outcome_constructors() {
        let ok = Outcome::success("Navigated to https://example.com");
        assert!(ok.is_success());
        assert!(ok.data.is_none());

        let extracted = Outcome::success_with_data("Extracted content", "hello");
        assert_eq!(extracted.data.as_deref(), Some("hello"));

        let failed = Outcome::error("Element not found: #missing");
        assert!(!failed.is_success());
    }

    #[test]
    fn failure_counter_resets_on_success() {
        let mut session = Session::new(Arc::new(MockDriver::new()));
        session.begin_step();
        assert_eq!(session.record_failure(), 1);
        assert_eq!(session.record_failure(), 2);
        session.record_success();
        assert_eq!(session.consecutive_failures(), 0);
        assert_eq!(session.steps_taken(), 1);
    }
}
