//! # consent-engine
//!
//! Async consent-framework detection and resolution. The engine probes
//! a page's frame hierarchy for TCF v2, USP v1, and GPP hosts, talks to
//! each through its own protocol (proxying over the page's message
//! channel when the host lives in a cross-origin frame), and merges the
//! partial answers into one [`consent_core::ConsentData`] per
//! resolution cycle.
//!
//! Everything is driven through the [`page`] traits, so the whole
//! pipeline runs under test against the deterministic doubles in
//! [`fakes`] with no browser in sight.
//!
//! ## Modules
//!
//! - [`page`]: host-page abstraction (frames, entry points, message bus)
//! - [`locator`]: ancestor-walking framework discovery
//! - [`surrogate`]: correlation-id call channel for cross-frame hosts
//! - [`adapters`]: per-framework detection and normalization
//! - [`orchestrator`]: strategy selection and single-flight resolution
//! - [`telemetry`]: observability seam
//! - [`fakes`]: scriptable test doubles for the page abstraction

pub mod adapters;
pub mod fakes;
pub mod locator;
pub mod orchestrator;
pub mod page;
pub mod surrogate;
pub mod telemetry;

pub use adapters::AdapterError;
pub use orchestrator::{ConsentOrchestrator, OrchestratorError};
pub use page::{CmpCallback, CmpFunction, Frame, FrameHandle, MessageBus, PageContext};
pub use telemetry::{NoopTelemetry, TelemetryEvent, TelemetrySink};
