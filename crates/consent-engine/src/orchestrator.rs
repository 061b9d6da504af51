//! Resolution orchestrator.
//!
//! One `refresh` call runs one resolution cycle: pick a strategy from
//! configuration, run it, settle. Overlapping calls never run a second
//! cycle; they await the outcome of the one in flight through a `watch`
//! channel. A cycle, once started, runs to settlement even if every
//! caller that awaited it has gone away.
//!
//! Strategies:
//!
//! - **Bypass**: configuration forces the grant; no detection at all.
//! - **Static**: a partner-supplied object is normalized by shape
//!   sniffing, without touching any frame state. Optionally a
//!   background task runs live detection purely to compare what it
//!   would have found, feeding telemetry.
//! - **Live**: the three framework adapters run concurrently and their
//!   partial contributions are shallow-merged. There is no overall
//!   deadline; only the GPP v1.1 path carries an internal timer, so a
//!   CMP that never answers holds the cycle open.

use std::sync::Arc;

use consent_core::{
    ApiType, ConsentConfig, ConsentData, ConsentSource, SOURCE_IAB, SOURCE_STATIC,
};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use crate::adapters::{gpp, tcf, usp};
use crate::page::PageContext;
use crate::telemetry::{NoopTelemetry, TelemetryEvent, TelemetrySink};

/// A cycle's settlement slot: `None` while in flight.
type CycleSlot = Option<Result<Arc<ConsentData>, OrchestratorError>>;

/// Why a resolution cycle could not produce data.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OrchestratorError {
    /// The configured strategy name is not recognized.
    #[error("unknown consent source strategy '{0}'")]
    UnknownStrategy(String),

    /// The static strategy was selected without a static object.
    #[error("static consent source configured without static data")]
    MissingStaticData,

    /// The in-flight cycle's task went away before settling.
    #[error("resolution cycle aborted before settling")]
    CycleAborted,
}

/// Single-flight state.
enum FlightState {
    /// No cycle running.
    Idle,
    /// A cycle is running; its settlement lands in the receiver.
    InFlight(watch::Receiver<CycleSlot>),
}

/// Drives consent resolution for one page.
pub struct ConsentOrchestrator {
    page: PageContext,
    config: ConsentConfig,
    telemetry: Arc<dyn TelemetrySink>,
    flight: Arc<Mutex<FlightState>>,
}

impl ConsentOrchestrator {
    /// Creates an orchestrator with the given telemetry sink.
    #[must_use]
    pub fn new(page: PageContext, config: ConsentConfig, telemetry: Arc<dyn TelemetrySink>) -> Self {
        Self {
            page,
            config,
            telemetry,
            flight: Arc::new(Mutex::new(FlightState::Idle)),
        }
    }

    /// Creates an orchestrator that discards telemetry.
    #[must_use]
    pub fn without_telemetry(page: PageContext, config: ConsentConfig) -> Self {
        Self::new(page, config, Arc::new(NoopTelemetry))
    }

    /// Runs one resolution cycle, or joins the cycle already in flight.
    ///
    /// Nothing is cached across cycles: once a cycle settles, the next
    /// call starts a fresh one.
    pub async fn refresh(&self) -> Result<Arc<ConsentData>, OrchestratorError> {
        let rx = {
            let mut flight = self.flight.lock().await;
            match &*flight {
                // Join only a cycle that has not yet settled.
                FlightState::InFlight(rx) if rx.borrow().is_none() => rx.clone(),
                _ => {
                    let (tx, rx) = watch::channel(None);
                    *flight = FlightState::InFlight(rx.clone());
                    self.spawn_cycle(tx, rx.clone());
                    rx
                }
            }
        };
        await_settlement(rx).await
    }

    /// Starts the cycle as a detached task so it settles even if every
    /// awaiting caller is dropped mid-flight.
    fn spawn_cycle(&self, tx: watch::Sender<CycleSlot>, rx: watch::Receiver<CycleSlot>) {
        let page = self.page.clone();
        let config = self.config.clone();
        let telemetry = Arc::clone(&self.telemetry);
        let flight = Arc::clone(&self.flight);
        tokio::spawn(async move {
            let outcome = run_cycle(&page, &config, &telemetry).await.map(Arc::new);
            let _ = tx.send(Some(outcome));
            settle_flight(&flight, &rx).await;
        });
    }
}

/// Returns the flight to `Idle` after a cycle settles, but only while
/// the stored receiver still belongs to that cycle's channel. A caller
/// that already observed the settlement may have installed a fresh
/// flight between the publication and this reset; that newer cycle must
/// not be stomped back to `Idle`.
async fn settle_flight(flight: &Mutex<FlightState>, settled: &watch::Receiver<CycleSlot>) {
    let mut flight = flight.lock().await;
    if let FlightState::InFlight(current) = &*flight {
        if current.same_channel(settled) {
            *flight = FlightState::Idle;
        }
    }
}

async fn await_settlement(
    mut rx: watch::Receiver<CycleSlot>,
) -> Result<Arc<ConsentData>, OrchestratorError> {
    let slot = rx
        .wait_for(Option::is_some)
        .await
        .map_err(|_| OrchestratorError::CycleAborted)?;
    match &*slot {
        Some(outcome) => outcome.clone(),
        None => Err(OrchestratorError::CycleAborted),
    }
}

async fn run_cycle(
    page: &PageContext,
    config: &ConsentConfig,
    telemetry: &Arc<dyn TelemetrySink>,
) -> Result<ConsentData, OrchestratorError> {
    if config.force_consent_grant {
        info!("consent grant forced by configuration; skipping detection");
        return Ok(ConsentData::forced_by_config());
    }
    match config.consent_source.as_str() {
        SOURCE_IAB => Ok(detect_live(page, telemetry).await),
        SOURCE_STATIC => resolve_static(page, config, telemetry),
        other => {
            warn!(strategy = %other, "unknown consent source strategy");
            Err(OrchestratorError::UnknownStrategy(other.to_string()))
        }
    }
}

/// Runs the three adapters concurrently and shallow-merges whatever
/// each one contributed.
async fn detect_live(page: &PageContext, telemetry: &Arc<dyn TelemetrySink>) -> ConsentData {
    let (tcf_part, usp_part, gpp_part) = tokio::join!(
        tcf::detect(page, telemetry),
        usp::detect(page, telemetry),
        gpp::detect(page, telemetry),
    );
    let mut data = ConsentData::with_source(ConsentSource::Cmp);
    data.merge(tcf_part);
    data.merge(usp_part);
    data.merge(gpp_part);
    debug!(api_types = ?data.api_types, "live detection settled");
    data
}

/// Normalizes the partner-supplied static object by sniffing for the
/// conventional answer shapes. Unrecognized or malformed members are
/// skipped with a warning; there is no partial failure.
fn resolve_static(
    page: &PageContext,
    config: &ConsentConfig,
    telemetry: &Arc<dyn TelemetrySink>,
) -> Result<ConsentData, OrchestratorError> {
    let Some(value) = config.static_data.as_ref() else {
        return Err(OrchestratorError::MissingStaticData);
    };

    let mut data = ConsentData::with_source(ConsentSource::Partner);
    if let Some(tc_data) = value.get("getTCData") {
        match tcf::normalize_static(tc_data) {
            Ok(partial) => data.merge(partial),
            Err(err) => warn!(error = %err, "static TCF object rejected"),
        }
    }
    if let Some(usp_data) = value.get("getUSPData") {
        match usp::normalize_static(usp_data) {
            Ok(partial) => data.merge(partial),
            Err(err) => warn!(error = %err, "static USP object rejected"),
        }
    }
    if let Some(vendors) = value.get("allowedVendors") {
        match normalize_allowed_vendors(vendors) {
            Some(partial) => data.merge(partial),
            None => warn!("static allowedVendors is not an array"),
        }
    }

    if config.detection_comparison_telemetry {
        spawn_comparison(page, telemetry, data.api_types.iter().copied().collect());
    }
    Ok(data)
}

/// An allow-list entry may be a string or a number; numbers are carried
/// as their decimal string form so the grant check sees one shape.
fn normalize_allowed_vendors(value: &Value) -> Option<ConsentData> {
    let ids = value.as_array()?;
    let mut data = ConsentData::default();
    data.api_types.insert(ApiType::Id5AllowedVendors);
    data.allowed_vendors = Some(
        ids.iter()
            .map(|id| match id {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect(),
    );
    Some(data)
}

/// Fires a background live detection whose only effect is one
/// [`TelemetryEvent::DetectionComparison`] record. The inner detection
/// runs against a discard sink so its own failures stay invisible.
fn spawn_comparison(
    page: &PageContext,
    telemetry: &Arc<dyn TelemetrySink>,
    static_api_types: Vec<ApiType>,
) {
    let page = page.clone();
    let telemetry = Arc::clone(telemetry);
    tokio::spawn(async move {
        let discard: Arc<dyn TelemetrySink> = Arc::new(NoopTelemetry);
        let live = detect_live(&page, &discard).await;
        let live_api_types: Vec<ApiType> = live.api_types.iter().copied().collect();
        let matched = static_api_types == live_api_types;
        debug!(matched, "static/live detection comparison settled");
        telemetry.record(TelemetryEvent::DetectionComparison {
            static_api_types,
            live_api_types,
            matched,
        });
    });
}
