//! Action execution.
//!
//! Each action kind maps to one browser operation sequence. Internals
//! propagate typed errors; [`ActionExecutor::execute`] is the boundary that
//! turns every failure into an error [`Outcome`], so the loop above deals in
//! transcripts rather than error types. Outcome wording is part of the
//! contract with the recovery policy and must not drift.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{debug, info};

use crate::config::TimingConfig;
use crate::driver::marionette::KEY_RETURN;
use crate::driver::{BrowserDriver, ElementRef};
use crate::errors::{PilotError, PilotResult};
use crate::oracle::{ActionKind, ProposedAction};
use crate::resolver::ResolvedTarget;
use crate::session::Outcome;

/// Search inputs to probe, most specific first. A match still has to pass
/// the type filter below before it counts.
const SEARCH_INPUT_SELECTORS: &[&str] = &[
    "input[name='q']",
    "input[type='search']",
    "input[placeholder*='search' i]",
    "input[aria-label*='search' i]",
    ".search-input",
    "textarea[name='q']",
    "#search",
    "[name='s']",
    "[name='search']",
    "input[name='query']",
    "[role='search'] input[type='text']",
    "[role='search'] input:not([type='submit'])",
    "form input[type='text']",
];

/// Submit buttons to try when sending Enter did not take.
const SEARCH_BUTTON_SELECTORS: &[&str] = &[
    "button[type='submit']",
    "input[type='submit']",
    ".search-button",
    "[aria-label*='search' i]",
    "button[name='btnK']",
    "#search-button",
    "form button",
];

const SCROLL_CENTER_SCRIPT: &str =
    "arguments[0].scrollIntoView({block: 'center', inline: 'center', behavior: 'smooth'});";

const CLICK_AT_POINT_SCRIPT: &str = r#"
var elem = document.elementFromPoint(arguments[0], arguments[1]);
if (elem) {
    elem.click();
    return true;
} else {
    return false;
}
"#;

pub struct ActionExecutor {
    driver: Arc<dyn BrowserDriver>,
    timing: TimingConfig,
}

impl ActionExecutor {
    pub fn new(driver: Arc<dyn BrowserDriver>, timing: TimingConfig) -> Self {
        Self { driver, timing }
    }

    /// Run one action to completion. `target` is required for clicks and
    /// ignored by every other kind.
    pub async fn execute(&self, action: &ProposedAction, target: Option<&ResolvedTarget>) -> Outcome {
        let result = match action.kind {
            ActionKind::Navigate => self.navigate(action).await,
            ActionKind::Search => self.search(action).await,
            ActionKind::Click => self.click(target).await,
            ActionKind::Input => self.input(action).await,
            ActionKind::Extract => self.extract(action).await,
            ActionKind::Wait => self.wait(action).await,
            ActionKind::Complete => Ok(Outcome::success(
                action.param("message").unwrap_or("Task completed"),
            )),
        };
        match result {
            Ok(outcome) => outcome,
            Err(err) => {
                debug!(kind = action.kind.label(), %err, "action failed");
                Outcome::error(err.to_string())
            }
        }
    }

    async fn navigate(&self, action: &ProposedAction) -> PilotResult<Outcome> {
        let url = action
            .param("url")
            .filter(|u| !u.is_empty())
            .ok_or_else(|| PilotError::Oracle("navigate proposed without a URL".into()))?;
        // Normalized at the parse boundary too; direct callers get the same
        // treatment.
        let url = crate::oracle::normalize_url(url);

        info!(%url, "navigating");
        self.driver.navigate(&url).await?;
        self.wait_for_ready(&url).await?;
        Ok(Outcome::success(format!("Navigated to {url}")))
    }

    /// Poll `document.readyState` until the page settles or the load budget
    /// runs out.
    async fn wait_for_ready(&self, url: &str) -> PilotResult<()> {
        let deadline = Instant::now() + Duration::from_millis(self.timing.page_load_timeout_ms);
        loop {
            let state = self
                .driver
                .execute_script("return document.readyState", Vec::new())
                .await?;
            if state.as_str() == Some("complete") {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(PilotError::timeout(
                    format!("navigation to {url}"),
                    self.timing.page_load_timeout_ms,
                ));
            }
            self.settle(self.timing.ready_poll_interval_ms).await;
        }
    }

    async fn click(&self, target: Option<&ResolvedTarget>) -> PilotResult<Outcome> {
        match target {
            Some(ResolvedTarget::Selector(selector)) => self.click_selector(selector).await,
            Some(ResolvedTarget::Coordinates(point)) => {
                self.click_at(point.x, point.y).await
            }
            None => Err(PilotError::not_found(
                "Element not found: click had no resolved target",
            )),
        }
    }

    async fn click_selector(&self, selector: &str) -> PilotResult<Outcome> {
        let element = self
            .driver
            .find_element(selector)
            .await?
            .ok_or_else(|| PilotError::not_found(format!("Element not found: {selector}")))?;

        self.driver
            .execute_script(
                SCROLL_CENTER_SCRIPT,
                vec![self.driver.script_arg(&element)],
            )
            .await?;
        self.settle(self.timing.scroll_settle_ms).await;

        self.driver.click(&element).await?;
        Ok(Outcome::success(format!("Clicked element: {selector}")))
    }

    async fn click_at(&self, x: i64, y: i64) -> PilotResult<Outcome> {
        let hit = self
            .driver
            .execute_script(
                CLICK_AT_POINT_SCRIPT,
                vec![Value::from(x), Value::from(y)],
            )
            .await?;
        if hit.as_bool() == Some(true) {
            Ok(Outcome::success(format!(
                "Clicked at coordinates ({x}, {y})"
            )))
        } else {
            Err(PilotError::not_found(format!(
                "No element found at coordinates ({x}, {y})"
            )))
        }
    }

    async fn input(&self, action: &ProposedAction) -> PilotResult<Outcome> {
        let selector = action
            .dom_hint
            .as_deref()
            .or_else(|| action.param("selector"))
            .ok_or_else(|| PilotError::Oracle("input proposed without a selector".into()))?;
        let text = action.param("text").unwrap_or_default();

        let element = self
            .driver
            .find_element(selector)
            .await?
            .ok_or_else(|| PilotError::not_found(format!("Element not found: {selector}")))?;
        self.driver.clear(&element).await?;
        self.driver.type_text(&element, text).await?;
        Ok(Outcome::success(format!(
            "Entered text in element: {selector}"
        )))
    }

    async fn extract(&self, action: &ProposedAction) -> PilotResult<Outcome> {
        let selector = action
            .dom_hint
            .as_deref()
            .or_else(|| action.param("selector"))
            .ok_or_else(|| PilotError::Oracle("extract proposed without a selector".into()))?;

        let element = self
            .driver
            .find_element(selector)
            .await?
            .ok_or_else(|| PilotError::not_found(format!("Element not found: {selector}")))?;
        let text = self.driver.element_text(&element).await?;
        Ok(Outcome::success_with_data("Extracted content", text))
    }

    async fn wait(&self, action: &ProposedAction) -> PilotResult<Outcome> {
        let seconds: i64 = action
            .param("seconds")
            .and_then(|s| s.parse().ok())
            .unwrap_or(2);
        let seconds = seconds.clamp(0, self.timing.max_wait_secs);
        self.settle(seconds as u64 * 1_000).await;
        Ok(Outcome::success(format!("Waited {seconds} seconds")))
    }

    /// Site-agnostic search: probe for a usable input, fill it, submit, and
    /// let the results settle. Every stage has a script fallback because
    /// search boxes are where pages get creative.
    async fn search(&self, action: &ProposedAction) -> PilotResult<Outcome> {
        let query = action
            .param("query")
            .filter(|q| !q.is_empty())
            .ok_or_else(|| PilotError::Oracle("search proposed without a query".into()))?;

        let current_url = self.driver.current_url().await.unwrap_or_default();
        let Some(input) = self.find_search_input().await? else {
            return Err(PilotError::not_found(format!(
                "Could not find search box on {current_url}"
            )));
        };

        self.focus(&input).await;
        self.clear_input(&input).await;
        self.fill_input(&input, query).await?;
        self.submit_search(&input).await?;
        self.settle(self.timing.search_settle_ms).await;

        Ok(Outcome::success(format!("Performed search for: {query}")))
    }

    async fn find_search_input(&self) -> PilotResult<Option<ElementRef>> {
        for selector in SEARCH_INPUT_SELECTORS {
            let candidates = match self.driver.find_elements(selector).await {
                Ok(candidates) => candidates,
                Err(err) => {
                    debug!(selector, %err, "search selector probe failed");
                    continue;
                }
            };
            for candidate in candidates {
                let kind = self
                    .driver
                    .element_attribute(&candidate, "type")
                    .await
                    .unwrap_or(None);
                if matches!(kind.as_deref(), Some("submit") | Some("button")) {
                    continue;
                }
                debug!(selector, "search input found");
                return Ok(Some(candidate));
            }
        }
        Ok(None)
    }

    async fn focus(&self, input: &ElementRef) {
        let arg = self.driver.script_arg(input);
        if self
            .driver
            .execute_script("arguments[0].focus();", vec![arg.clone()])
            .await
            .is_err()
        {
            let _ = self
                .driver
                .execute_script(
                    "window.scrollTo(0, 0); arguments[0].scrollIntoView(false);",
                    vec![arg],
                )
                .await;
        }
        self.settle(self.timing.focus_settle_ms).await;
    }

    async fn clear_input(&self, input: &ElementRef) {
        if self.driver.clear(input).await.is_err() {
            let _ = self
                .driver
                .execute_script(
                    "arguments[0].value = '';",
                    vec![self.driver.script_arg(input)],
                )
                .await;
        }
    }

    async fn fill_input(&self, input: &ElementRef, query: &str) -> PilotResult<()> {
        if self.driver.type_text(input, query).await.is_ok() {
            return Ok(());
        }
        self.driver
            .execute_script(
                "arguments[0].value = arguments[1];",
                vec![self.driver.script_arg(input), Value::from(query)],
            )
            .await?;
        Ok(())
    }

    /// Enter first; a submit button second; `form.submit()` as the last
    /// resort.
    async fn submit_search(&self, input: &ElementRef) -> PilotResult<()> {
        if self.driver.type_text(input, KEY_RETURN).await.is_ok() {
            return Ok(());
        }
        for selector in SEARCH_BUTTON_SELECTORS {
            if let Ok(buttons) = self.driver.find_elements(selector).await {
                if let Some(button) = buttons.first() {
                    if self.driver.click(button).await.is_ok() {
                        debug!(selector, "search submitted via button");
                        return Ok(());
                    }
                }
            }
        }
        self.driver
            .execute_script(
                "arguments[0].form.submit();",
                vec![self.driver.script_arg(input)],
            )
            .await?;
        Ok(())
    }

    async fn settle(&self, ms: u64) {
        if ms > 0 {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
    }
}
