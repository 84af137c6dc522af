//! Chat-completion oracle backed by an OpenAI-compatible API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::OracleConfig;
use crate::errors::{PilotError, PilotResult};
use crate::session::StepRecord;

use super::{parse_response, DecisionOracle, ProposedAction};

const SYSTEM_PROMPT: &str = "You are a helpful assistant for browser automation.";

#[derive(Debug, Clone)]
pub struct ChatOracleConfig {
    pub api_key: String,
    pub api_base: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout: Duration,
}

impl ChatOracleConfig {
    pub fn from_settings(settings: &OracleConfig) -> PilotResult<Self> {
        let api_key = settings
            .api_key
            .clone()
            .ok_or_else(|| PilotError::Oracle("missing API key for the decision model".into()))?;
        Ok(Self {
            api_key,
            api_base: settings.api_base.clone(),
            model: settings.model.clone(),
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
            timeout: Duration::from_secs(settings.timeout_secs),
        })
    }
}

pub struct ChatOracle {
    client: Client,
    config: ChatOracleConfig,
}

impl ChatOracle {
    pub fn new(config: ChatOracleConfig) -> PilotResult<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|err| PilotError::Oracle(format!("failed to build HTTP client: {err}")))?;
        Ok(Self { client, config })
    }

    /// The deployed prompt. Layout matters more than prose here; the parser
    /// in the parent module relies on the ACTION/PARAM/DOM response block
    /// this prompt demands.
    fn build_prompt(goal: &str, dom_summary: &str, transcript: &[StepRecord]) -> String {
        let mut current_url = "Unknown".to_string();
        let mut last_action = "None".to_string();
        if let Some(last) = transcript.last() {
            if let Some(url) = last.outcome.message.strip_prefix("Navigated to ") {
                current_url = url.to_string();
            }
            last_action = last.outcome.message.clone();
        }

        format!(
            r#"GOAL: {goal}

CURRENT URL: {current_url}
LAST ACTION: {last_action}

Below is a summary of key interactive elements on the page:
{dom_summary}

IMPORTANT: The task is only considered complete when the page's final state confirms redirection or the desired change.
For example, if the goal is to click a button on the Google homepage ("https://www.google.com") that redirects you to another URL,
then the final state is achieved only if the current URL is different from "https://www.google.com".

Based solely on the above context, decide the next single action needed to achieve the goal.
Choose exactly one action from:
A) navigate - Navigate to a URL.
B) search - Enter a search query.
C) click - Click on a specific element.
D) input - Type text into a field.
E) wait - Wait for a specified duration.
F) complete - No further action is needed; the desired final state is achieved (i.e. the current URL or state confirms redirection).

For your chosen action, please provide:
- The necessary parameter(s) (e.g., URL for navigate, query for search, text for input).
- The exact CSS selector (DOM element) from the above summary on which to perform the action, or "N/A" if not applicable.
- If the final state is confirmed (e.g., the current URL is different from the original), return action F ("complete") with an appropriate message including the new URL.

Format your response exactly as follows:
ACTION: [Letter]
PARAM: [Parameter(s)]
DOM: [Exact CSS selector or "N/A"]
"#
        )
    }

    async fn invoke(&self, prompt: String) -> PilotResult<String> {
        let url = format!(
            "{}/chat/completions",
            self.config.api_base.trim_end_matches('/')
        );
        let body = ChatCompletionRequest {
            model: self.config.model.clone(),
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
            stream: false,
            stop: vec!["Input:".to_string(), "##".to_string()],
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: prompt,
                },
            ],
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|err| PilotError::Oracle(format!("request failed: {err}")))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(PilotError::Oracle(format!(
                "API returned {status}: {detail}"
            )));
        }

        let completion: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|err| PilotError::Oracle(format!("malformed completion payload: {err}")))?;
        completion
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content.trim().to_string())
            .ok_or_else(|| PilotError::Oracle("completion had no choices".into()))
    }
}

#[async_trait]
impl DecisionOracle for ChatOracle {
    async fn next_step(
        &self,
        goal: &str,
        dom_summary: &str,
        transcript: &[StepRecord],
    ) -> PilotResult<Option<ProposedAction>> {
        let prompt = Self::build_prompt(goal, dom_summary, transcript);
        let text = self.invoke(prompt).await?;
        debug!(response = %text, "oracle decision");
        let action = parse_response(&text);
        if action.is_none() {
            warn!(response = %text, "oracle response did not follow the action format");
        }
        Ok(action)
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    temperature: f32,
    max_tokens: u32,
    stream: bool,
    stop: Vec<String>,
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}
