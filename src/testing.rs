//! Test doubles for the pilot's seams.
//!
//! Shipped as a regular module so integration tests and downstream users
//! can script the loop without a live browser or model endpoint.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::driver::{BrowserDriver, DriverError, ElementRef};
use crate::errors::PilotResult;
use crate::locator::{Point, TextLocator};
use crate::oracle::{DecisionOracle, ProposedAction};
use crate::session::StepRecord;

#[derive(Default)]
struct MockDriverState {
    elements: HashMap<String, Vec<ElementRef>>,
    attributes: HashMap<(String, String), String>,
    texts: HashMap<String, String>,
    current_url: String,
    screenshot: Vec<u8>,
    point_click_hit: bool,
    script_results: VecDeque<Value>,
    script_failure: Option<String>,
    navigations: Vec<String>,
    clicked: Vec<String>,
    cleared: Vec<String>,
    typed: Vec<(String, String)>,
    script_calls: Vec<String>,
    disconnected: bool,
}

/// Scriptable in-memory browser. Selector lookups hit a configured map;
/// scripts answer from a queue, except for the two sources the executor
/// branches on (`document.readyState` and `elementFromPoint`), which get
/// built-in answers so loop tests do not have to queue boilerplate.
pub struct MockDriver {
    state: Mutex<MockDriverState>,
}

impl Default for MockDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDriver {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockDriverState {
                current_url: "about:blank".to_string(),
                point_click_hit: true,
                ..Default::default()
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockDriverState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn add_element(&self, selector: &str, element: ElementRef) {
        self.lock()
            .elements
            .entry(selector.to_string())
            .or_default()
            .push(element);
    }

    pub fn remove_elements(&self, selector: &str) {
        self.lock().elements.remove(selector);
    }

    pub fn set_attribute(&self, element_id: &str, name: &str, value: &str) {
        self.lock()
            .attributes
            .insert((element_id.to_string(), name.to_string()), value.to_string());
    }

    pub fn set_element_text(&self, element_id: &str, text: &str) {
        self.lock().texts.insert(element_id.to_string(), text.to_string());
    }

    pub fn set_current_url(&self, url: &str) {
        self.lock().current_url = url.to_string();
    }

    pub fn set_screenshot(&self, bytes: Vec<u8>) {
        self.lock().screenshot = bytes;
    }

    pub fn set_point_click_hit(&self, hit: bool) {
        self.lock().point_click_hit = hit;
    }

    pub fn push_script_result(&self, value: Value) {
        self.lock().script_results.push_back(value);
    }

    pub fn fail_scripts(&self, message: &str) {
        self.lock().script_failure = Some(message.to_string());
    }

    pub fn navigations(&self) -> Vec<String> {
        self.lock().navigations.clone()
    }

    pub fn clicked(&self) -> Vec<String> {
        self.lock().clicked.clone()
    }

    pub fn cleared(&self) -> Vec<String> {
        self.lock().cleared.clone()
    }

    pub fn typed(&self) -> Vec<(String, String)> {
        self.lock().typed.clone()
    }

    pub fn script_calls(&self) -> Vec<String> {
        self.lock().script_calls.clone()
    }

    pub fn disconnected(&self) -> bool {
        self.lock().disconnected
    }
}

#[async_trait]
impl BrowserDriver for MockDriver {
    async fn navigate(&self, url: &str) -> Result<(), DriverError> {
        let mut state = self.lock();
        state.navigations.push(url.to_string());
        state.current_url = url.to_string();
        Ok(())
    }

    async fn find_element(&self, selector: &str) -> Result<Option<ElementRef>, DriverError> {
        Ok(self
            .lock()
            .elements
            .get(selector)
            .and_then(|found| found.first().cloned()))
    }

    async fn find_elements(&self, selector: &str) -> Result<Vec<ElementRef>, DriverError> {
        Ok(self.lock().elements.get(selector).cloned().unwrap_or_default())
    }

    async fn click(&self, element: &ElementRef) -> Result<(), DriverError> {
        self.lock().clicked.push(element.0.clone());
        Ok(())
    }

    async fn clear(&self, element: &ElementRef) -> Result<(), DriverError> {
        self.lock().cleared.push(element.0.clone());
        Ok(())
    }

    async fn type_text(&self, element: &ElementRef, text: &str) -> Result<(), DriverError> {
        self.lock().typed.push((element.0.clone(), text.to_string()));
        Ok(())
    }

    async fn element_text(&self, element: &ElementRef) -> Result<String, DriverError> {
        Ok(self.lock().texts.get(&element.0).cloned().unwrap_or_default())
    }

    async fn element_attribute(
        &self,
        element: &ElementRef,
        name: &str,
    ) -> Result<Option<String>, DriverError> {
        Ok(self
            .lock()
            .attributes
            .get(&(element.0.clone(), name.to_string()))
            .cloned())
    }

    async fn execute_script(&self, source: &str, _args: Vec<Value>) -> Result<Value, DriverError> {
        let mut state = self.lock();
        state.script_calls.push(source.to_string());
        if let Some(message) = &state.script_failure {
            return Err(DriverError::Command {
                command: "WebDriver:ExecuteScript".to_string(),
                message: message.clone(),
            });
        }
        if source.contains("document.readyState") {
            return Ok(json!("complete"));
        }
        if source.contains("elementFromPoint") {
            return Ok(json!(state.point_click_hit));
        }
        Ok(state.script_results.pop_front().unwrap_or(Value::Null))
    }

    async fn screenshot(&self) -> Result<Vec<u8>, DriverError> {
        Ok(self.lock().screenshot.clone())
    }

    async fn current_url(&self) -> Result<String, DriverError> {
        Ok(self.lock().current_url.clone())
    }

    async fn disconnect(&self) -> Result<(), DriverError> {
        self.lock().disconnected = true;
        Ok(())
    }
}

/// Oracle that replays a fixed sequence of decisions, then reports that it
/// has nothing further to suggest.
pub struct ScriptedOracle {
    decisions: Mutex<VecDeque<Option<ProposedAction>>>,
    summaries: Mutex<Vec<String>>,
}

impl ScriptedOracle {
    pub fn new(decisions: impl IntoIterator<Item = Option<ProposedAction>>) -> Self {
        Self {
            decisions: Mutex::new(decisions.into_iter().collect()),
            summaries: Mutex::new(Vec::new()),
        }
    }

    /// DOM summaries the loop presented, in order.
    pub fn seen_summaries(&self) -> Vec<String> {
        self.summaries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl DecisionOracle for ScriptedOracle {
    async fn next_step(
        &self,
        _goal: &str,
        dom_summary: &str,
        _transcript: &[StepRecord],
    ) -> PilotResult<Option<ProposedAction>> {
        self.summaries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(dom_summary.to_string());
        Ok(self
            .decisions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop_front()
            .flatten())
    }
}

/// Locator that answers every lookup with the same point, or always misses.
pub struct FixedLocator {
    point: Option<Point>,
}

impl FixedLocator {
    pub fn at(x: i64, y: i64) -> Self {
        Self {
            point: Some(Point { x, y }),
        }
    }

    pub fn miss() -> Self {
        Self { point: None }
    }
}

#[async_trait]
impl TextLocator for FixedLocator {
    async fn locate(&self, _target: &str, _confidence_threshold: i64) -> PilotResult<Option<Point>> {
        Ok(self.point)
    }
}
