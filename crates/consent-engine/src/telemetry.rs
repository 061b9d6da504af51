//! Telemetry seam.
//!
//! Observability events the engine emits as a side effect. Integrators
//! plug in their own sink; nothing in the resolution path ever depends
//! on what a sink does, and the default sink discards everything.

use consent_core::ApiType;

/// A telemetry event emitted by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TelemetryEvent {
    /// Comparison between partner-supplied static data and what live
    /// detection would have found. Emitted only by the static strategy's
    /// background side channel; never affects the resolved data.
    DetectionComparison {
        /// Frameworks the static data represented.
        static_api_types: Vec<ApiType>,
        /// Frameworks live detection found.
        live_api_types: Vec<ApiType>,
        /// Whether the two sets agree.
        matched: bool,
    },
    /// An adapter detected a framework but could not get usable data
    /// from it.
    AdapterFailure {
        /// Framework entry-point name.
        framework: &'static str,
        /// Failure description.
        reason: String,
    },
    /// A GPP host advertised a protocol version this engine does not
    /// support.
    UnsupportedGppVersion {
        /// The advertised version string.
        version: String,
    },
}

/// Consumer of engine telemetry.
pub trait TelemetrySink: Send + Sync {
    /// Records one event. Must not block.
    fn record(&self, event: TelemetryEvent);
}

/// Sink that discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTelemetry;

impl TelemetrySink for NoopTelemetry {
    fn record(&self, _event: TelemetryEvent) {}
}
