//! webpilot library
//!
//! Drives a remote Firefox session toward a natural-language goal:
//! snapshot the DOM, ask the decision oracle for the next action, resolve
//! the target through a fallback chain, execute, recover, repeat.

pub mod config;
pub mod driver;
pub mod errors;
pub mod executor;
pub mod locator;
pub mod oracle;
pub mod orchestrator;
pub mod recovery;
pub mod resolver;
pub mod server;
pub mod session;
pub mod snapshot;
pub mod testing;

// Re-export commonly used types for external use
pub use config::PilotConfig;
pub use driver::{BrowserDriver, ElementRef};
pub use errors::{PilotError, PilotResult};
pub use oracle::{ActionKind, DecisionOracle, ProposedAction};
pub use orchestrator::{CommandReport, Orchestrator};
pub use session::{Outcome, OutcomeStatus, StepRecord};
