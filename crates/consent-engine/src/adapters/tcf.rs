//! TCF v2 adapter.
//!
//! Subscribes to the CMP's `addEventListener` call and waits for a
//! stable event: either GDPR does not apply at all, or the event status
//! signals that the user has loaded existing consent (`tcloaded`) or
//! just completed a consent action (`useractioncomplete`). Intermediate
//! statuses (the consent UI being shown, for instance) are ignored and
//! the adapter keeps waiting.

use std::sync::Arc;

use consent_core::{tcf_string, ApiType, ConsentData, GVL_VENDOR_ID};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{trace, warn};

use super::{resolve_function, settle, AdapterError};
use crate::page::{CmpCallback, ListenerControl, PageContext};
use crate::surrogate::TCF_ENVELOPE;
use crate::telemetry::TelemetrySink;

/// Well-known TCF v2 entry-point name.
pub const TCF_API: &str = "__tcfapi";

/// Protocol version passed to every TCF call.
const TCF_VERSION: u32 = 2;

/// Event statuses at which a TCData payload is authoritative.
const STABLE_EVENT_STATUSES: &[&str] = &["tcloaded", "useractioncomplete"];

/// Loosely-typed TCData payload as CMPs actually send it.
#[derive(Debug, Deserialize)]
struct TcData {
    #[serde(rename = "tcString")]
    tc_string: Option<String>,
    #[serde(rename = "gdprApplies")]
    gdpr_applies: Option<Value>,
    #[serde(rename = "eventStatus")]
    event_status: Option<String>,
    purpose: Option<TcSignals>,
    vendor: Option<TcSignals>,
}

/// A `{consents: {...}}` sub-object of a TCData payload.
#[derive(Debug, Deserialize)]
struct TcSignals {
    consents: Option<serde_json::Map<String, Value>>,
}

/// Detects and queries the TCF v2 framework, returning its partial
/// contribution (empty on absence or failure).
pub async fn detect(page: &PageContext, telemetry: &Arc<dyn TelemetrySink>) -> ConsentData {
    settle(TCF_API, telemetry, run(page).await)
}

async fn run(page: &PageContext) -> Result<ConsentData, AdapterError> {
    let function = resolve_function(page, TCF_API, TCF_ENVELOPE).ok_or(AdapterError::NotDetected)?;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let callback: CmpCallback = Arc::new(move |payload, success| {
        let _ = tx.send((payload, success));
        // Stability filtering happens on the receiving side; the
        // listener itself stays registered for repeated events.
        ListenerControl::Keep
    });
    function.call("addEventListener", json!(TCF_VERSION), callback);

    while let Some((payload, success)) = rx.recv().await {
        if !success {
            return Err(AdapterError::UnsuccessfulCallback { framework: TCF_API });
        }
        match evaluate_event(&payload)? {
            Some(partial) => return Ok(partial),
            // Intermediate event status: leave the subscription pending.
            None => trace!("intermediate TCF event ignored"),
        }
    }
    // The entry point released its callback without ever reaching a
    // stable status; nothing more can arrive.
    warn!("TCF event stream ended without a stable status");
    Ok(ConsentData::default())
}

/// Validates one TCData event. `Ok(None)` means "not stable yet, keep
/// waiting"; `Ok(Some(_))` is the authoritative contribution.
fn evaluate_event(payload: &Value) -> Result<Option<ConsentData>, AdapterError> {
    let tc_data: TcData = serde_json::from_value(payload.clone())
        .map_err(|e| AdapterError::malformed(TCF_API, e.to_string()))?;

    let gdpr_applies = match tc_data.gdpr_applies {
        Some(Value::Bool(b)) => b,
        Some(other) => {
            return Err(AdapterError::malformed(
                TCF_API,
                format!("gdprApplies must be a boolean, got {other}"),
            ))
        }
        None => {
            return Err(AdapterError::malformed(TCF_API, "gdprApplies missing"));
        }
    };

    let stable = !gdpr_applies
        || tc_data
            .event_status
            .as_deref()
            .is_some_and(|s| STABLE_EVENT_STATUSES.contains(&s));
    if !stable {
        return Ok(None);
    }

    Ok(Some(normalize(gdpr_applies, &tc_data)))
}

/// Normalizes an authoritative TCData payload into a partial
/// [`ConsentData`].
fn normalize(gdpr_applies: bool, tc_data: &TcData) -> ConsentData {
    let mut data = ConsentData::default();
    data.api_types.insert(ApiType::TcfV2);
    data.gdpr_applies = Some(gdpr_applies);
    data.consent_string.clone_from(&tc_data.tc_string);

    data.local_storage_purpose_consent = tc_data
        .purpose
        .as_ref()
        .and_then(|p| consent_bit(p, 1))
        .or_else(|| decode_purpose_from_string(tc_data.tc_string.as_deref()));

    data.vendors_consent_granted = tc_data
        .vendor
        .as_ref()
        .and_then(|v| consent_bit(v, GVL_VENDOR_ID));
    data
}

/// Looks up a consent bit by numeric id, tolerating CMPs that key the
/// map with padded or otherwise loosely-encoded numeric strings.
fn consent_bit(signals: &TcSignals, id: u32) -> Option<bool> {
    let consents = signals.consents.as_ref()?;
    if let Some(value) = consents.get(&id.to_string()) {
        return value.as_bool();
    }
    consents
        .iter()
        .find(|(key, _)| key.trim().parse::<u32>() == Ok(id))
        .and_then(|(_, value)| value.as_bool())
}

/// Fallback for non-conformant CMPs that omit the decoded purpose map:
/// extract purpose 1 straight from the consent string's core segment.
fn decode_purpose_from_string(tc_string: Option<&str>) -> Option<bool> {
    let tc_string = tc_string?;
    match tcf_string::purpose_consent(tc_string, 1) {
        Ok(bit) => Some(bit),
        Err(err) => {
            warn!(error = %err, "could not decode purpose 1 from tcString");
            None
        }
    }
}

/// Normalizes a partner-supplied static `getTCData` object. Static data
/// has no event status; the payload is taken as already stable, but the
/// same shape validation applies.
pub(crate) fn normalize_static(tc_data: &Value) -> Result<ConsentData, AdapterError> {
    let parsed: TcData = serde_json::from_value(tc_data.clone())
        .map_err(|e| AdapterError::malformed(TCF_API, e.to_string()))?;
    let gdpr_applies = match parsed.gdpr_applies {
        Some(Value::Bool(b)) => b,
        _ => {
            return Err(AdapterError::malformed(
                TCF_API,
                "gdprApplies missing or not a boolean",
            ))
        }
    };
    Ok(normalize(gdpr_applies, &parsed))
}

#[cfg(test)]
mod tests {
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;
    use serde_json::json;

    use super::*;
    use crate::fakes::{FakeCmpFunction, FakeFrame, FakeMessageBus};
    use crate::telemetry::test_sink::RecordingTelemetry;
    use crate::telemetry::TelemetryEvent;

    fn page_with_cmp(cmp: Arc<FakeCmpFunction>) -> PageContext {
        let top = FakeFrame::top("top");
        top.install_entry_point(TCF_API, cmp);
        PageContext::new(top, FakeMessageBus::new())
    }

    fn sink() -> (Arc<RecordingTelemetry>, Arc<dyn TelemetrySink>) {
        let recording = RecordingTelemetry::new();
        let erased = Arc::clone(&recording) as Arc<dyn TelemetrySink>;
        (recording, erased)
    }

    #[tokio::test]
    async fn absent_framework_contributes_nothing() {
        let page = PageContext::new(FakeFrame::top("top"), FakeMessageBus::new());
        let (recording, telemetry) = sink();
        let data = detect(&page, &telemetry).await;
        assert!(data.is_empty());
        assert!(recording.events().is_empty(), "absence is not a failure");
    }

    #[tokio::test]
    async fn stable_tcloaded_event_is_normalized() {
        let cmp = FakeCmpFunction::new();
        cmp.on_command(
            "addEventListener",
            json!({
                "tcString": "COtest",
                "gdprApplies": true,
                "eventStatus": "tcloaded",
                "purpose": {"consents": {"1": true}},
                "vendor": {"consents": {"131": true}},
            }),
            true,
        );
        let (_, telemetry) = sink();
        let data = detect(&page_with_cmp(cmp), &telemetry).await;

        assert!(data.api_types.contains(&ApiType::TcfV2));
        assert_eq!(data.consent_string.as_deref(), Some("COtest"));
        assert_eq!(data.gdpr_applies, Some(true));
        assert_eq!(data.local_storage_purpose_consent, Some(true));
        assert_eq!(data.vendors_consent_granted, Some(true));
    }

    #[tokio::test]
    async fn intermediate_status_is_skipped_until_stable() {
        let cmp = FakeCmpFunction::new();
        cmp.on_command_events(
            "addEventListener",
            vec![
                (
                    json!({"gdprApplies": true, "eventStatus": "cmpuishown"}),
                    true,
                ),
                (
                    json!({
                        "gdprApplies": true,
                        "eventStatus": "useractioncomplete",
                        "tcString": "COtest",
                        "purpose": {"consents": {"1": false}},
                    }),
                    true,
                ),
            ],
        );
        let (_, telemetry) = sink();
        let data = detect(&page_with_cmp(cmp), &telemetry).await;
        assert_eq!(data.local_storage_purpose_consent, Some(false));
    }

    #[tokio::test]
    async fn gdpr_not_applying_is_stable_without_event_status() {
        let cmp = FakeCmpFunction::new();
        cmp.on_command("addEventListener", json!({"gdprApplies": false}), true);
        let (_, telemetry) = sink();
        let data = detect(&page_with_cmp(cmp), &telemetry).await;
        assert_eq!(data.gdpr_applies, Some(false));
        assert!(data.api_types.contains(&ApiType::TcfV2));
    }

    #[tokio::test]
    async fn unsuccessful_callback_contributes_nothing() {
        let cmp = FakeCmpFunction::new();
        cmp.on_command("addEventListener", json!({}), false);
        let (recording, telemetry) = sink();
        let data = detect(&page_with_cmp(cmp), &telemetry).await;
        assert!(data.is_empty());
        assert!(matches!(
            recording.events().as_slice(),
            [TelemetryEvent::AdapterFailure { framework: TCF_API, .. }]
        ));
    }

    #[tokio::test]
    async fn malformed_gdpr_applies_contributes_nothing() {
        let cmp = FakeCmpFunction::new();
        cmp.on_command(
            "addEventListener",
            json!({"gdprApplies": "yes", "eventStatus": "tcloaded"}),
            true,
        );
        let (recording, telemetry) = sink();
        let data = detect(&page_with_cmp(cmp), &telemetry).await;
        assert!(data.is_empty());
        assert_eq!(recording.events().len(), 1);
    }

    #[tokio::test]
    async fn purpose_bit_falls_back_to_string_decoding() {
        // Core segment with purpose 1 granted, version 2, no decoded
        // purpose map in the payload.
        let total_bits = 176;
        let mut bytes = vec![0u8; total_bits / 8];
        bytes[0] = 2 << 2; // version 2 in the top 6 bits
        bytes[19] = 0x80; // bit 152: purpose 1
        let tc_string = URL_SAFE_NO_PAD.encode(&bytes);

        let cmp = FakeCmpFunction::new();
        cmp.on_command(
            "addEventListener",
            json!({
                "tcString": tc_string,
                "gdprApplies": true,
                "eventStatus": "tcloaded",
            }),
            true,
        );
        let (_, telemetry) = sink();
        let data = detect(&page_with_cmp(cmp), &telemetry).await;
        assert_eq!(data.local_storage_purpose_consent, Some(true));
    }

    #[test]
    fn vendor_lookup_uses_loose_equality() {
        let signals: TcSignals =
            serde_json::from_value(json!({"consents": {" 131": true}})).unwrap();
        assert_eq!(consent_bit(&signals, 131), Some(true));

        let signals: TcSignals =
            serde_json::from_value(json!({"consents": {"999": true}})).unwrap();
        assert_eq!(consent_bit(&signals, 131), None);
    }

    #[test]
    fn static_normalization_validates_shape() {
        let ok = normalize_static(&json!({
            "gdprApplies": true,
            "tcString": "COtest",
            "purpose": {"consents": {"1": true}},
        }))
        .unwrap();
        assert_eq!(ok.local_storage_purpose_consent, Some(true));

        assert!(normalize_static(&json!({"tcString": "COtest"})).is_err());
    }
}
