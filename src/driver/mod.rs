//! Browser remote-control seam.
//!
//! The pilot loop only ever talks to [`BrowserDriver`]; the Marionette
//! client below is the production implementation and the `testing` module
//! provides a scriptable double.

pub mod marionette;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

pub use marionette::MarionetteDriver;

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("no such element: {0}")]
    NoSuchElement(String),

    #[error("{command} failed: {message}")]
    Command { command: String, message: String },
}

/// Opaque handle to a DOM element held by the remote browser. Valid only as
/// long as the page it was found on; a fresh lookup is cheaper than chasing
/// staleness.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementRef(pub String);

impl ElementRef {
    pub fn id(&self) -> &str {
        &self.0
    }
}

/// Commands the pilot loop needs from a remote browser session.
///
/// One connection per session, exclusively owned for the lifetime of a
/// command run; no concurrent callers.
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    async fn navigate(&self, url: &str) -> Result<(), DriverError>;

    /// CSS lookup; `Ok(None)` when the page has no match.
    async fn find_element(&self, selector: &str) -> Result<Option<ElementRef>, DriverError>;

    async fn find_elements(&self, selector: &str) -> Result<Vec<ElementRef>, DriverError>;

    async fn click(&self, element: &ElementRef) -> Result<(), DriverError>;

    async fn clear(&self, element: &ElementRef) -> Result<(), DriverError>;

    async fn type_text(&self, element: &ElementRef, text: &str) -> Result<(), DriverError>;

    async fn element_text(&self, element: &ElementRef) -> Result<String, DriverError>;

    async fn element_attribute(
        &self,
        element: &ElementRef,
        name: &str,
    ) -> Result<Option<String>, DriverError>;

    /// Run script in page context; `arguments[n]` receives `args[n]`.
    async fn execute_script(&self, source: &str, args: Vec<Value>) -> Result<Value, DriverError>;

    /// Full-page screenshot as encoded image bytes (PNG).
    async fn screenshot(&self) -> Result<Vec<u8>, DriverError>;

    async fn current_url(&self) -> Result<String, DriverError>;

    /// Tear down the remote session. The driver is unusable afterwards.
    async fn disconnect(&self) -> Result<(), DriverError>;

    /// How an [`ElementRef`] is spelled inside `execute_script` arguments.
    fn script_arg(&self, element: &ElementRef) -> Value {
        Value::String(element.0.clone())
    }
}
