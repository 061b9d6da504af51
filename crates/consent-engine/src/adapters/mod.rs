//! Per-framework consent adapters.
//!
//! Each adapter detects one framework via the locator (wrapping it in a
//! surrogate channel when it is only reachable cross-frame), queries it
//! with its own protocol, and normalizes the answer into a partial
//! [`ConsentData`] touching only that framework's fields.
//!
//! Failure taxonomy, shared across adapters:
//!
//! - **not detected**: the framework is absent; informational, the
//!   adapter contributes an empty partial;
//! - **malformed response**: the framework answered but the payload
//!   fails shape validation; logged as an error, empty partial;
//! - **unsuccessful callback**: the framework explicitly reported
//!   failure; logged as an error, empty partial.
//!
//! No adapter failure ever propagates: a broken framework degrades to
//! "no data from that framework" and never crashes the others.

use std::sync::Arc;

use consent_core::ConsentData;
use thiserror::Error;
use tracing::{debug, error};

use crate::locator::locate_framework;
use crate::page::{CmpFunction, PageContext};
use crate::surrogate::{MessageEnvelope, SurrogateChannel};
use crate::telemetry::{TelemetryEvent, TelemetrySink};

pub mod gpp;
pub mod tcf;
pub mod usp;

/// What went wrong inside one adapter's detection attempt.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AdapterError {
    /// The framework is absent from the page.
    #[error("framework not detected")]
    NotDetected,

    /// The framework answered with a payload that fails validation.
    #[error("malformed {framework} response: {reason}")]
    MalformedResponse {
        /// Framework entry-point name.
        framework: &'static str,
        /// What failed validation.
        reason: String,
    },

    /// The framework explicitly reported failure (`success == false`).
    #[error("{framework} reported an unsuccessful callback")]
    UnsuccessfulCallback {
        /// Framework entry-point name.
        framework: &'static str,
    },
}

impl AdapterError {
    /// Creates a malformed-response error.
    #[must_use]
    pub fn malformed(framework: &'static str, reason: impl Into<String>) -> Self {
        Self::MalformedResponse {
            framework,
            reason: reason.into(),
        }
    }
}

/// Resolves a framework to a callable function: the direct entry point
/// when same-origin, a [`SurrogateChannel`] when only a locator
/// sentinel was found, `None` when absent.
pub(crate) fn resolve_function(
    page: &PageContext,
    name: &str,
    envelope: MessageEnvelope,
) -> Option<Arc<dyn CmpFunction>> {
    let located = locate_framework(&page.frame, name);
    match (located.direct, located.frame) {
        (Some(direct), _) => Some(direct),
        (None, Some(frame)) => {
            debug!(framework = %name, frame = %frame, "using cross-frame surrogate");
            Some(SurrogateChannel::new(Arc::clone(&page.bus), frame, envelope))
        }
        (None, None) => None,
    }
}

/// Maps an adapter outcome to its partial contribution, logging and
/// recording telemetry for real failures.
pub(crate) fn settle(
    framework: &'static str,
    telemetry: &Arc<dyn TelemetrySink>,
    outcome: Result<ConsentData, AdapterError>,
) -> ConsentData {
    match outcome {
        Ok(partial) => partial,
        Err(AdapterError::NotDetected) => {
            debug!(framework, "framework not present");
            ConsentData::default()
        }
        Err(err) => {
            error!(framework, error = %err, "consent framework detection failed");
            telemetry.record(TelemetryEvent::AdapterFailure {
                framework,
                reason: err.to_string(),
            });
            ConsentData::default()
        }
    }
}
