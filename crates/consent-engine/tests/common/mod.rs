//! Shared helpers for the integration suites.

use std::sync::{Arc, Mutex};

use consent_core::ConsentConfig;
use consent_engine::fakes::{FakeCmpFunction, FakeFrame, FakeMessageBus};
use consent_engine::{PageContext, TelemetryEvent, TelemetrySink};

/// Telemetry sink retaining every event for assertions.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<TelemetryEvent>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<TelemetryEvent> {
        self.events.lock().expect("events lock").clone()
    }
}

impl TelemetrySink for RecordingSink {
    fn record(&self, event: TelemetryEvent) {
        self.events.lock().expect("events lock").push(event);
    }
}

/// Installs a test subscriber honoring `RUST_LOG`; repeated calls are
/// harmless.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A page whose top-level frame exposes the given entry points directly.
pub fn page_with_entry_points(entries: Vec<(&str, Arc<FakeCmpFunction>)>) -> PageContext {
    let top = FakeFrame::top("top");
    for (name, function) in entries {
        top.install_entry_point(name, function);
    }
    PageContext::new(top, FakeMessageBus::new())
}

/// Default configuration with the live detection strategy.
pub fn live_config() -> ConsentConfig {
    ConsentConfig::default()
}
