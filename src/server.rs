//! Observation endpoint.
//!
//! A small HTTP surface alongside the REPL: `GET /extract` dumps the full
//! DOM of whatever page the shared browser session is on, appends the dump
//! to a JSON-lines log for later analysis, and returns it to the caller.
//! Unbounded and unfiltered on purpose; the curated snapshot the loop uses
//! lives in [`crate::snapshot`].

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use axum::Router;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use crate::driver::BrowserDriver;

/// Every element on the page with all of its attributes and box geometry.
const FULL_DOM_SCRIPT: &str = r#"
function extractAllElements() {
    const elements = Array.from(document.querySelectorAll("*"));
    return elements.map(el => {
        const rect = el.getBoundingClientRect();
        let attrs = {};
        for (let attr of el.attributes) {
            attrs[attr.name] = attr.value;
        }
        return {
            tag: el.tagName.toLowerCase(),
            text: el.textContent.trim(),
            attributes: attrs,
            position: {
                top: rect.top,
                left: rect.left,
                width: rect.width,
                height: rect.height
            }
        };
    });
}
return extractAllElements();
"#;

#[derive(Clone)]
pub struct ObserveState {
    driver: Arc<dyn BrowserDriver>,
    log_path: Arc<str>,
}

impl ObserveState {
    pub fn new(driver: Arc<dyn BrowserDriver>, log_path: impl Into<Arc<str>>) -> Self {
        Self {
            driver,
            log_path: log_path.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ExtractQuery {
    #[serde(default = "default_max_elements")]
    max_elements: usize,
}

fn default_max_elements() -> usize {
    200
}

pub fn router(state: ObserveState) -> Router {
    Router::new()
        .route("/extract", get(extract_dom))
        .with_state(state)
}

/// Bind and serve until the process exits.
pub async fn serve(addr: &str, state: ObserveState) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "observation endpoint listening");
    axum::serve(listener, router(state)).await
}

async fn extract_dom(
    State(state): State<ObserveState>,
    Query(query): Query<ExtractQuery>,
) -> impl IntoResponse {
    let dom_context = match state.driver.execute_script(FULL_DOM_SCRIPT, Vec::new()).await {
        Ok(value) => value,
        Err(err) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "status": "error", "message": err.to_string() })),
            );
        }
    };
    let url = state
        .driver
        .current_url()
        .await
        .unwrap_or_else(|_| "Unknown".to_string());

    let entry = json!({
        "timestamp": chrono::Utc::now().timestamp_millis() as f64 / 1000.0,
        "url": url,
        "max_elements": query.max_elements,
        "dom_context": dom_context,
    });
    append_log(&state.log_path, &entry).await;

    (
        StatusCode::OK,
        Json(json!({ "status": "success", "dom_context": dom_context })),
    )
}

/// Best-effort append; a broken log never fails the request.
async fn append_log(path: &str, entry: &Value) {
    let line = format!("{entry}\n");
    let result = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await;
    match result {
        Ok(mut file) => {
            if let Err(err) = file.write_all(line.as_bytes()).await {
                warn!(%err, path, "failed to append snapshot log entry");
            } else if let Err(err) = file.flush().await {
                warn!(%err, path, "failed to flush snapshot log entry");
            }
        }
        Err(err) => warn!(%err, path, "failed to open snapshot log"),
    }
}
