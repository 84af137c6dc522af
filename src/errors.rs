//! Error taxonomy shared across the pilot loop.
//!
//! Every component converts its own failures into an error `Outcome` at its
//! boundary; these variants exist so the conversion sites stay typed until
//! that edge. Only an oracle failure (or an exhausted budget) ends a whole
//! session; everything else is step-local.

use thiserror::Error;

use crate::driver::DriverError;

#[derive(Debug, Error)]
pub enum PilotError {
    /// A selector or element could not be located. The payload is the full
    /// user-facing message; the recovery policy keys on its wording, so call
    /// sites phrase it ("Element not found: ...", "Could not find search
    /// box on ...") rather than this variant adding a prefix.
    #[error("{0}")]
    NotFound(String),

    #[error("{operation} timed out after {waited_ms}ms")]
    Timeout { operation: String, waited_ms: u64 },

    #[error("driver failure: {0}")]
    Driver(#[from] DriverError),

    #[error("oracle failure: {0}")]
    Oracle(String),

    /// Screenshot handling or text recognition failed outright. Distinct
    /// from a clean miss, which is `Ok(None)` from the locator.
    #[error("vision failure: {0}")]
    Vision(String),
}

impl PilotError {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn timeout(operation: impl Into<String>, waited_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            waited_ms,
        }
    }
}

pub type PilotResult<T> = Result<T, PilotError>;
