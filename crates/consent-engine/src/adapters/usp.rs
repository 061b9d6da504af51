//! USP v1 adapter.
//!
//! CCPA has no purpose analogous to GDPR purpose 1, so USP never gates
//! storage access: when it answers, the adapter contributes only the
//! privacy string, and the grant decision's USP gate always passes.
//! The purpose-consent field belongs to the TCF adapters and is never
//! written here, so a co-present TCF refusal survives the merge.

use std::sync::Arc;

use consent_core::{ApiType, ConsentData};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::warn;

use super::{resolve_function, settle, AdapterError};
use crate::page::{CmpCallback, ListenerControl, PageContext};
use crate::surrogate::USP_ENVELOPE;
use crate::telemetry::TelemetrySink;

/// Well-known USP v1 entry-point name.
pub const USP_API: &str = "__uspapi";

/// Protocol version passed to `getUSPData`.
const USP_VERSION: u32 = 1;

/// Shape of a valid `getUSPData` answer.
#[derive(Debug, Deserialize)]
struct UspData {
    #[serde(rename = "uspString")]
    usp_string: Option<Value>,
}

/// Detects and queries the USP framework, returning its partial
/// contribution (empty on absence or failure).
pub async fn detect(page: &PageContext, telemetry: &Arc<dyn TelemetrySink>) -> ConsentData {
    settle(USP_API, telemetry, run(page).await)
}

async fn run(page: &PageContext) -> Result<ConsentData, AdapterError> {
    let function = resolve_function(page, USP_API, USP_ENVELOPE).ok_or(AdapterError::NotDetected)?;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let callback: CmpCallback = Arc::new(move |payload, success| {
        let _ = tx.send((payload, success));
        ListenerControl::Deregister
    });
    function.call("getUSPData", json!(USP_VERSION), callback);

    let Some((payload, success)) = rx.recv().await else {
        warn!("USP entry point released its callback without answering");
        return Ok(ConsentData::default());
    };
    if !success {
        return Err(AdapterError::UnsuccessfulCallback { framework: USP_API });
    }
    normalize(&payload)
}

/// Validates and normalizes a `getUSPData` payload.
fn normalize(payload: &Value) -> Result<ConsentData, AdapterError> {
    let parsed: UspData = serde_json::from_value(payload.clone())
        .map_err(|e| AdapterError::malformed(USP_API, e.to_string()))?;
    let usp_string = match parsed.usp_string {
        Some(Value::String(s)) => s,
        other => {
            return Err(AdapterError::malformed(
                USP_API,
                format!("uspString must be a string, got {other:?}"),
            ))
        }
    };

    let mut data = ConsentData::default();
    data.api_types.insert(ApiType::UspV1);
    data.ccpa_string = Some(usp_string);
    Ok(data)
}

/// Normalizes a partner-supplied static `getUSPData` object.
pub(crate) fn normalize_static(usp_data: &Value) -> Result<ConsentData, AdapterError> {
    normalize(usp_data)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::fakes::{FakeCmpFunction, FakeFrame, FakeMessageBus};
    use crate::telemetry::test_sink::RecordingTelemetry;

    fn page_with_cmp(cmp: Arc<FakeCmpFunction>) -> PageContext {
        let top = FakeFrame::top("top");
        top.install_entry_point(USP_API, cmp);
        PageContext::new(top, FakeMessageBus::new())
    }

    fn sink() -> Arc<dyn TelemetrySink> {
        RecordingTelemetry::new()
    }

    #[tokio::test]
    async fn valid_usp_string_is_contributed() {
        let cmp = FakeCmpFunction::new();
        cmp.on_command("getUSPData", json!({"uspString": "1YYN"}), true);
        let data = detect(&page_with_cmp(cmp), &sink()).await;

        assert!(data.api_types.contains(&ApiType::UspV1));
        assert_eq!(data.ccpa_string.as_deref(), Some("1YYN"));
        assert!(data.has_ccpa_string());
        // The purpose field is TCF's to write, never USP's.
        assert_eq!(data.local_storage_purpose_consent, None);
    }

    #[tokio::test]
    async fn missing_usp_string_is_malformed() {
        let cmp = FakeCmpFunction::new();
        cmp.on_command("getUSPData", json!({"version": 1}), true);
        let data = detect(&page_with_cmp(cmp), &sink()).await;
        assert!(data.is_empty());
    }

    #[tokio::test]
    async fn non_string_usp_string_is_malformed() {
        let cmp = FakeCmpFunction::new();
        cmp.on_command("getUSPData", json!({"uspString": 17}), true);
        let data = detect(&page_with_cmp(cmp), &sink()).await;
        assert!(data.is_empty());
    }

    #[tokio::test]
    async fn unsuccessful_callback_contributes_nothing() {
        let cmp = FakeCmpFunction::new();
        cmp.on_command("getUSPData", json!({"uspString": "1YYN"}), false);
        let data = detect(&page_with_cmp(cmp), &sink()).await;
        assert!(data.is_empty());
    }

    #[tokio::test]
    async fn absent_framework_contributes_nothing() {
        let page = PageContext::new(FakeFrame::top("top"), FakeMessageBus::new());
        let data = detect(&page, &sink()).await;
        assert!(data.is_empty());
    }
}
