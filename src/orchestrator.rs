//! The command loop.
//!
//! One natural-language goal runs as a bounded observe/decide/resolve/
//! execute cycle. Each iteration snapshots the page, asks the oracle for the
//! single next action, resolves click targets, executes, and records the
//! outcome. Failures get at most one recovery attempt; a recovered step
//! replaces its failed record so the transcript reflects what finally
//! happened.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};

use crate::config::PilotConfig;
use crate::driver::BrowserDriver;
use crate::executor::ActionExecutor;
use crate::locator::TextLocator;
use crate::oracle::{ActionKind, DecisionOracle, ProposedAction};
use crate::recovery::{RecoveryDirective, RecoveryPolicy};
use crate::resolver::TargetResolver;
use crate::session::{Outcome, OutcomeStatus, Session, StepRecord};
use crate::snapshot::DomSnapshot;

/// Final report for one goal: the overall verdict plus the full transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandReport {
    pub status: OutcomeStatus,
    pub steps_completed: usize,
    pub total_steps: usize,
    pub results: Vec<StepRecord>,
}

impl CommandReport {
    /// Success means the oracle declared completion, or every recorded step
    /// succeeded. An empty transcript counts as success; the oracle bailing
    /// out on the first decision is indistinguishable from "nothing to do".
    fn from_records(records: Vec<StepRecord>) -> Self {
        let completed = records
            .iter()
            .any(|r| r.kind == ActionKind::Complete && r.outcome.is_success());
        let all_ok = records.iter().all(|r| r.outcome.is_success());
        Self {
            status: if completed || all_ok {
                OutcomeStatus::Success
            } else {
                OutcomeStatus::Error
            },
            steps_completed: records.len(),
            total_steps: records.len(),
            results: records,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == OutcomeStatus::Success
    }
}

pub struct Orchestrator {
    session: Session,
    oracle: Arc<dyn DecisionOracle>,
    resolver: TargetResolver,
    executor: ActionExecutor,
    recovery: RecoveryPolicy,
    config: PilotConfig,
}

impl Orchestrator {
    pub fn new(
        driver: Arc<dyn BrowserDriver>,
        oracle: Arc<dyn DecisionOracle>,
        locator: Arc<dyn TextLocator>,
        config: PilotConfig,
    ) -> Self {
        let resolver = TargetResolver::new(
            driver.clone(),
            locator,
            config.ocr.confidence_threshold,
        );
        let executor = ActionExecutor::new(driver.clone(), config.timing.clone());
        let recovery = RecoveryPolicy::new(config.recovery.clone());
        Self {
            session: Session::new(driver),
            oracle,
            resolver,
            executor,
            recovery,
            config,
        }
    }

    /// Drive one goal to completion or exhaustion.
    pub async fn run(&mut self, goal: &str) -> CommandReport {
        self.session.reset_counters();
        let mut records: Vec<StepRecord> = Vec::new();

        for step_index in 0..self.config.budgets.max_steps as usize {
            self.session.begin_step();

            let snapshot =
                DomSnapshot::capture(self.session.driver().as_ref(), self.config.budgets.max_elements)
                    .await;
            let url = self
                .session
                .driver()
                .current_url()
                .await
                .unwrap_or_else(|_| "unknown".to_string());
            info!(step = step_index + 1, %url, elements = snapshot.len(), "observing page");

            let proposal = match self
                .oracle
                .next_step(goal, &snapshot.render_summary(), &records)
                .await
            {
                Ok(Some(action)) => action,
                Ok(None) => {
                    warn!("oracle could not determine a next step");
                    break;
                }
                Err(err) => {
                    warn!(%err, "oracle failed, ending session");
                    break;
                }
            };
            info!(kind = proposal.kind.label(), params = ?proposal.params, "executing");

            if proposal.kind == ActionKind::Complete {
                let message = proposal
                    .param("message")
                    .unwrap_or("Task completed")
                    .to_string();
                info!(%message, "oracle declared completion");
                records.push(StepRecord::new(ActionKind::Complete, Outcome::success(message)));
                break;
            }

            let outcome = self.attempt(&proposal).await;
            let succeeded = outcome.is_success();
            records.push(StepRecord::new(proposal.kind, outcome));

            if succeeded {
                self.session.record_success();
                self.settle(self.config.timing.step_settle_ms).await;
                continue;
            }

            let failures = self.session.record_failure();
            if failures >= self.config.budgets.max_consecutive_failures {
                warn!(failures, "consecutive failure budget exhausted, stopping");
                break;
            }

            if let Some(recovered) = self.try_recover(&proposal, &records, step_index).await {
                debug!(message = %recovered.message, "recovery succeeded");
                if let Some(last) = records.last_mut() {
                    last.outcome = recovered;
                }
                self.session.record_success();
                self.settle(self.config.timing.step_settle_ms).await;
            }
        }

        debug!(steps = self.session.steps_taken(), "command loop finished");
        CommandReport::from_records(records)
    }

    /// Resolve (clicks only) and execute one action.
    async fn attempt(&self, action: &ProposedAction) -> Outcome {
        let target = if action.kind == ActionKind::Click {
            match self.resolver.resolve(action).await {
                Ok(target) => Some(target),
                Err(failure) => return Outcome::error(failure.to_string()),
            }
        } else {
            None
        };
        self.executor.execute(action, target.as_ref()).await
    }

    /// One recovery attempt for the most recent failure. Returns the
    /// replacement outcome only when the retry actually succeeded.
    async fn try_recover(
        &self,
        action: &ProposedAction,
        records: &[StepRecord],
        step_index: usize,
    ) -> Option<Outcome> {
        let failed = &records.last()?.outcome;
        match self.recovery.diagnose(action, failed, step_index)? {
            RecoveryDirective::RetryAfterSettle => {
                self.settle(self.config.timing.recovery_settle_ms).await;
                let retried = self.attempt(action).await;
                retried.is_success().then_some(retried)
            }
            RecoveryDirective::SearchEngineDetour { url } => {
                let detour = ProposedAction::new(ActionKind::Navigate).with_param("url", url);
                let nav = self.executor.execute(&detour, None).await;
                if !nav.is_success() {
                    debug!(message = %nav.message, "search engine detour failed");
                    return None;
                }
                let retried = self.attempt(action).await;
                retried.is_success().then_some(retried)
            }
        }
    }

    /// Close the browser session.
    pub async fn shutdown(self) {
        self.session.disconnect().await;
    }

    async fn settle(&self, ms: u64) {
        if ms > 0 {
            sleep(Duration::from_millis(ms)).await;
        }
    }
}
