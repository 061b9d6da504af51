//! GPP adapter (v1.0 and v1.1 sub-protocols).
//!
//! Detection starts with a `ping`; the answer may arrive as the entry
//! point's direct return value or through the callback, and whichever
//! resolves first is accepted. Dispatch is strict on the advertised
//! `gppVersion` string: anything other than `1.0` or `1.1` is a hard
//! failure.
//!
//! The v1.1 path carries the engine's only internal timeout: when the
//! initial ping is not ready, the adapter waits for a ready event but
//! arms a one-second escape hatch; if the timer fires first it pings
//! once more and accepts a still-`stub` host's degenerate answer as
//! final. Events arriving after resolution are logged for diagnostics
//! and never alter the result.

use std::sync::Arc;
use std::time::Duration;

use consent_core::{
    ConsentData, GppData, GppVersion, TcfSectionConsent, GPP_SECTION_TCF_CA, GPP_SECTION_TCF_EU,
    GVL_VENDOR_ID,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use super::{resolve_function, settle, AdapterError};
use crate::page::{CmpCallback, CmpFunction, ListenerControl, PageContext};
use crate::surrogate::GPP_ENVELOPE;
use crate::telemetry::{TelemetryEvent, TelemetrySink};

/// Well-known GPP entry-point name.
pub const GPP_API: &str = "__gpp";

/// Escape-hatch timer for a v1.1 host that never signals readiness.
const V1_1_ESCAPE_HATCH: Duration = Duration::from_secs(1);

/// GPP section key for the embedded EU TCF section.
const SECTION_TCF_EU: &str = "tcfeuv2";

/// GPP section key for the embedded Canada TCF section.
const SECTION_TCF_CA: &str = "tcfcav1";

/// Loosely-typed ping answer.
#[derive(Debug, Clone, Default, Deserialize)]
struct PingData {
    #[serde(rename = "gppVersion")]
    gpp_version: Option<String>,
    #[serde(rename = "cmpStatus")]
    cmp_status: Option<String>,
    #[serde(rename = "cmpDisplayStatus")]
    cmp_display_status: Option<String>,
    #[serde(rename = "signalStatus")]
    signal_status: Option<String>,
    #[serde(rename = "applicableSections")]
    applicable_sections: Option<Vec<i32>>,
    #[serde(rename = "gppString")]
    gpp_string: Option<String>,
    #[serde(rename = "parsedSections")]
    parsed_sections: Option<serde_json::Map<String, Value>>,
}

/// Shape of a `getGPPData` answer (v1.0 only).
#[derive(Debug, Deserialize)]
struct GppPayload {
    #[serde(rename = "gppString")]
    gpp_string: Option<String>,
    #[serde(rename = "applicableSections")]
    applicable_sections: Option<Vec<i32>>,
}

/// Detects and queries the GPP framework, returning its partial
/// contribution (empty on absence or failure).
pub async fn detect(page: &PageContext, telemetry: &Arc<dyn TelemetrySink>) -> ConsentData {
    settle(GPP_API, telemetry, run(page, telemetry).await)
}

async fn run(
    page: &PageContext,
    telemetry: &Arc<dyn TelemetrySink>,
) -> Result<ConsentData, AdapterError> {
    let function = resolve_function(page, GPP_API, GPP_ENVELOPE).ok_or(AdapterError::NotDetected)?;

    let ping_data = ping(&function).await?;
    match ping_data.gpp_version.as_deref() {
        Some("1.0") => resolve_v1_0(&function, ping_data).await,
        Some("1.1") => resolve_v1_1(&function, ping_data).await,
        other => {
            let version = other.unwrap_or("<missing>").to_string();
            telemetry.record(TelemetryEvent::UnsupportedGppVersion {
                version: version.clone(),
            });
            Err(AdapterError::malformed(
                GPP_API,
                format!("unsupported gppVersion '{version}'"),
            ))
        }
    }
}

/// Issues a `ping`, accepting whichever of direct return and callback
/// resolves first.
async fn ping(function: &Arc<dyn CmpFunction>) -> Result<PingData, AdapterError> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let callback: CmpCallback = Arc::new(move |payload, success| {
        let _ = tx.send((payload, success));
        ListenerControl::Deregister
    });
    if let Some(direct) = function.call("ping", Value::Null, callback) {
        if !direct.is_null() {
            return parse_ping(&direct);
        }
    }
    match rx.recv().await {
        Some((payload, true)) => parse_ping(&payload),
        Some((_, false)) => Err(AdapterError::UnsuccessfulCallback { framework: GPP_API }),
        None => Err(AdapterError::malformed(
            GPP_API,
            "ping released its callback without answering",
        )),
    }
}

fn parse_ping(payload: &Value) -> Result<PingData, AdapterError> {
    serde_json::from_value(payload.clone())
        .map_err(|e| AdapterError::malformed(GPP_API, format!("invalid ping answer: {e}")))
}

/// Subscribes to the host's change events. The callback stays
/// registered for the page's lifetime; events delivered after the
/// adapter resolves are traced and dropped.
fn subscribe_events(function: &Arc<dyn CmpFunction>) -> mpsc::UnboundedReceiver<(Value, bool)> {
    let (tx, rx) = mpsc::unbounded_channel();
    let callback: CmpCallback = Arc::new(move |payload, success| {
        if tx.send((payload, success)).is_err() {
            // Post-resolution event: diagnostics only.
            trace!("late GPP event discarded");
        }
        ListenerControl::Keep
    });
    function.call("addEventListener", Value::Null, callback);
    rx
}

/// Pulls the embedded ping data out of a change event, tolerating
/// hosts that pass the ping object bare instead of wrapped.
fn event_ping(payload: &Value) -> Option<PingData> {
    let wrapped = payload.get("pingData").unwrap_or(payload);
    serde_json::from_value(wrapped.clone()).ok()
}

/// One-shot command helper.
async fn call_once(
    function: &Arc<dyn CmpFunction>,
    command: &'static str,
    parameter: Value,
) -> Result<Value, AdapterError> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let callback: CmpCallback = Arc::new(move |payload, success| {
        let _ = tx.send((payload, success));
        ListenerControl::Deregister
    });
    function.call(command, parameter, callback);
    match rx.recv().await {
        Some((payload, true)) => Ok(payload),
        Some((_, false)) => Err(AdapterError::UnsuccessfulCallback { framework: GPP_API }),
        None => Err(AdapterError::malformed(
            GPP_API,
            format!("{command} released its callback without answering"),
        )),
    }
}

// =============================================================================
// v1.0
// =============================================================================

/// A v1.0 host is ready once loaded and not currently showing its UI.
fn v1_0_ready(ping: &PingData) -> bool {
    ping.cmp_status.as_deref() == Some("loaded")
        && ping.cmp_display_status.as_deref() != Some("visible")
}

async fn resolve_v1_0(
    function: &Arc<dyn CmpFunction>,
    initial: PingData,
) -> Result<ConsentData, AdapterError> {
    if !v1_0_ready(&initial) {
        debug!("GPP v1.0 host not ready; waiting for change events");
        let mut events = subscribe_events(function);
        loop {
            let Some((payload, success)) = events.recv().await else {
                warn!("GPP v1.0 event stream ended before the host became ready");
                return Ok(ConsentData::default());
            };
            if !success {
                trace!("unsuccessful GPP event ignored");
                continue;
            }
            if event_ping(&payload).as_ref().is_some_and(v1_0_ready) {
                break;
            }
        }
    }

    // Both fetches run concurrently and both must land before the
    // adapter produces its result.
    let (payload, section) = tokio::join!(
        call_once(function, "getGPPData", Value::Null),
        call_once(function, "getSection", json!(SECTION_TCF_EU)),
    );
    let payload: GppPayload = serde_json::from_value(payload?)
        .map_err(|e| AdapterError::malformed(GPP_API, format!("invalid getGPPData: {e}")))?;
    let Some(gpp_string) = payload.gpp_string else {
        return Err(AdapterError::malformed(GPP_API, "getGPPData without gppString"));
    };

    let applicable_sections = payload.applicable_sections.unwrap_or_default();
    let eu_tcf_section = if applicable_sections.contains(&GPP_SECTION_TCF_EU) {
        Some(parse_section_consent(&section?))
    } else {
        None
    };

    Ok(contribution(GppData {
        version: GppVersion::V1_0,
        applicable_sections,
        gpp_string,
        eu_tcf_section,
        canada_tcf_section: None,
    }))
}

// =============================================================================
// v1.1
// =============================================================================

fn v1_1_ready(ping: &PingData) -> bool {
    ping.signal_status.as_deref() == Some("ready")
}

async fn resolve_v1_1(
    function: &Arc<dyn CmpFunction>,
    initial: PingData,
) -> Result<ConsentData, AdapterError> {
    if v1_1_ready(&initial) {
        return Ok(from_ping_v1_1(&initial));
    }

    debug!("GPP v1.1 host not ready; waiting with a 1s escape hatch");
    let mut events = subscribe_events(function);
    let mut events_open = true;
    let mut escape_used = false;
    let timer = tokio::time::sleep(V1_1_ESCAPE_HATCH);
    tokio::pin!(timer);

    loop {
        tokio::select! {
            event = events.recv(), if events_open => {
                match event {
                    Some((payload, true)) => {
                        if let Some(ping_data) = event_ping(&payload) {
                            if v1_1_ready(&ping_data) {
                                return Ok(from_ping_v1_1(&ping_data));
                            }
                        }
                        trace!("GPP v1.1 change event without ready signal");
                    }
                    Some((_, false)) => trace!("unsuccessful GPP event ignored"),
                    None => {
                        events_open = false;
                        if escape_used {
                            warn!("GPP v1.1 event stream ended after escape hatch; giving up");
                            return Ok(ConsentData::default());
                        }
                    }
                }
            }
            () = &mut timer, if !escape_used => {
                escape_used = true;
                let final_ping = ping(function).await?;
                if v1_1_ready(&final_ping) {
                    return Ok(from_ping_v1_1(&final_ping));
                }
                if final_ping.cmp_status.as_deref() == Some("stub") {
                    // The page never loaded a real implementation; the
                    // degenerate stub answer is final.
                    debug!("GPP v1.1 host still in stub state; accepting stub answer");
                    return Ok(from_ping_v1_1(&final_ping));
                }
                if !events_open {
                    warn!("GPP v1.1 host loaded but never signalled ready; giving up");
                    return Ok(ConsentData::default());
                }
                // Host is loading for real: keep waiting on events.
            }
        }
    }
}

/// Builds the v1.1 contribution from a ping answer, interpreting only
/// the sections whose ids the host declared applicable.
fn from_ping_v1_1(ping: &PingData) -> ConsentData {
    let applicable_sections = ping.applicable_sections.clone().unwrap_or_default();
    let sections = ping.parsed_sections.as_ref();

    let section = |key: &str, id: i32| -> Option<TcfSectionConsent> {
        if !applicable_sections.contains(&id) {
            return None;
        }
        sections?.get(key).map(parse_section_consent)
    };

    let eu_tcf_section = section(SECTION_TCF_EU, GPP_SECTION_TCF_EU);
    let canada_tcf_section = section(SECTION_TCF_CA, GPP_SECTION_TCF_CA);

    contribution(GppData {
        version: GppVersion::V1_1,
        applicable_sections,
        gpp_string: ping.gpp_string.clone().unwrap_or_default(),
        eu_tcf_section,
        canada_tcf_section,
    })
}

fn contribution(gpp: GppData) -> ConsentData {
    let mut data = ConsentData::default();
    data.api_types.insert(gpp.version.api_type());
    data.gpp = Some(gpp);
    data
}

// =============================================================================
// Section decoding
// =============================================================================

/// Decodes the two booleans of a TCF-style section payload.
///
/// Non-conformant hosts return the section either as a one-element
/// collection (the core segment, possibly followed by optional
/// segments) or as a bare object; both are accepted. The purpose bit is
/// `PurposeConsent[0]`; the vendor bit is membership of this library's
/// vendor id in `VendorConsent`, which itself may be an id array or a
/// keyed map.
fn parse_section_consent(payload: &Value) -> TcfSectionConsent {
    let core = match payload {
        Value::Array(items) => items.first().unwrap_or(&Value::Null),
        other => other,
    };

    let local_storage_purpose_consent = core
        .get("PurposeConsent")
        .and_then(|p| p.get(0))
        .and_then(Value::as_bool);

    let vendor_consent = core.get("VendorConsent").and_then(|v| match v {
        Value::Array(ids) => Some(ids.iter().any(|id| {
            id.as_u64() == Some(u64::from(GVL_VENDOR_ID))
                || id.as_str().is_some_and(|s| s.trim().parse::<u32>() == Ok(GVL_VENDOR_ID))
        })),
        Value::Object(map) => map.get(&GVL_VENDOR_ID.to_string()).and_then(Value::as_bool),
        _ => None,
    });

    TcfSectionConsent {
        local_storage_purpose_consent,
        vendor_consent,
    }
}
