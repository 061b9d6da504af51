//! Surrogate channel: cross-frame request/response bridge.
//!
//! When a framework lives behind an origin boundary, the locator only
//! yields the hosting frame's handle. A [`SurrogateChannel`] then
//! imitates the direct entry point: it posts envelope-keyed requests
//! with a random correlation id to the target frame and demultiplexes
//! inbound bus messages back to the matching caller.
//!
//! Outstanding requests live in a correlation-id-keyed table drained by
//! a single demux task. An entry is removed on match (unless the
//! callback asks to keep listening) or left dangling forever when the
//! target never replies; that leak is accepted at this layer, not
//! mitigated.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::{Map, Value};
use tokio::sync::broadcast;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::page::{CmpCallback, CmpFunction, FrameHandle, ListenerControl, MessageBus};

/// Envelope naming convention of one framework's cross-frame protocol.
#[derive(Debug, Clone, Copy)]
pub struct MessageEnvelope {
    /// Key wrapping outbound requests.
    pub request_object: &'static str,
    /// Names of the two positional parameters inside the request.
    pub request_keys: [&'static str; 2],
    /// Key wrapping inbound responses.
    pub response_object: &'static str,
}

/// TCF v2 cross-frame envelope.
pub const TCF_ENVELOPE: MessageEnvelope = MessageEnvelope {
    request_object: "__tcfapiCall",
    request_keys: ["command", "version"],
    response_object: "__tcfapiReturn",
};

/// USP v1 cross-frame envelope.
pub const USP_ENVELOPE: MessageEnvelope = MessageEnvelope {
    request_object: "__uspapiCall",
    request_keys: ["command", "version"],
    response_object: "__uspapiReturn",
};

/// GPP cross-frame envelope.
pub const GPP_ENVELOPE: MessageEnvelope = MessageEnvelope {
    request_object: "__gppCall",
    request_keys: ["command", "parameter"],
    response_object: "__gppReturn",
};

/// Correlation-keyed table of callbacks awaiting a response.
type PendingTable = Arc<Mutex<HashMap<String, CmpCallback>>>;

/// A [`CmpFunction`] that proxies calls over the page's message bus.
pub struct SurrogateChannel {
    bus: Arc<dyn MessageBus>,
    target: FrameHandle,
    envelope: MessageEnvelope,
    pending: PendingTable,
}

impl SurrogateChannel {
    /// Builds a channel to `target` and spawns its demux task.
    ///
    /// The subscription is taken before this returns, so responses to
    /// requests posted immediately afterwards cannot be missed.
    #[must_use]
    pub fn new(
        bus: Arc<dyn MessageBus>,
        target: FrameHandle,
        envelope: MessageEnvelope,
    ) -> Arc<Self> {
        let pending: PendingTable = Arc::new(Mutex::new(HashMap::new()));
        let rx = bus.subscribe();
        tokio::spawn(demux_loop(
            rx,
            Arc::clone(&pending),
            envelope.response_object,
        ));
        Arc::new(Self {
            bus,
            target,
            envelope,
            pending,
        })
    }

    /// Number of requests still awaiting a response.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.lock().expect("pending lock").len()
    }
}

impl CmpFunction for SurrogateChannel {
    fn call(&self, command: &str, parameter: Value, callback: CmpCallback) -> Option<Value> {
        let call_id = Uuid::new_v4().to_string();
        self.pending
            .lock()
            .expect("pending lock")
            .insert(call_id.clone(), callback);

        let mut request = Map::new();
        request.insert(
            self.envelope.request_keys[0].to_string(),
            Value::String(command.to_string()),
        );
        request.insert(self.envelope.request_keys[1].to_string(), parameter);
        request.insert("callId".to_string(), Value::String(call_id.clone()));

        let mut message = Map::new();
        message.insert(
            self.envelope.request_object.to_string(),
            Value::Object(request),
        );

        debug!(
            target_frame = %self.target,
            envelope = self.envelope.request_object,
            command,
            call_id = %call_id,
            "posting cross-frame request"
        );
        // Target frames are discovered, not configured, so no origin
        // restriction can be applied here.
        self.bus.post(&self.target, Value::Object(message));
        None
    }
}

/// Drains inbound messages and routes correlated responses.
async fn demux_loop(
    mut rx: broadcast::Receiver<Value>,
    pending: PendingTable,
    response_object: &'static str,
) {
    loop {
        match rx.recv().await {
            Ok(message) => dispatch_response(&pending, response_object, &message),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "surrogate demux lagged; responses may be lost");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Routes one inbound message to its awaiting callback, if correlated.
fn dispatch_response(pending: &PendingTable, response_object: &str, message: &Value) {
    let Some(response) = message.get(response_object) else {
        return;
    };
    let Some(call_id) = response.get("callId").and_then(Value::as_str) else {
        trace!(envelope = response_object, "response without callId ignored");
        return;
    };

    // Remove before invoking so a re-entrant callback cannot deadlock
    // on the table; re-insert only when asked to keep listening.
    let Some(callback) = pending.lock().expect("pending lock").remove(call_id) else {
        trace!(call_id, "uncorrelated response ignored");
        return;
    };

    let return_value = response.get("returnValue").cloned().unwrap_or(Value::Null);
    let success = response
        .get("success")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    if callback(return_value, success) == ListenerControl::Keep {
        pending
            .lock()
            .expect("pending lock")
            .insert(call_id.to_string(), callback);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use serde_json::json;
    use tokio::sync::mpsc;

    use super::*;
    use crate::fakes::FakeMessageBus;

    fn channel_callback() -> (CmpCallback, mpsc::UnboundedReceiver<(Value, bool)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let callback: CmpCallback = Arc::new(move |payload, success| {
            let _ = tx.send((payload, success));
            ListenerControl::Deregister
        });
        (callback, rx)
    }

    #[tokio::test]
    async fn correlated_response_reaches_callback() {
        let bus = FakeMessageBus::new();
        bus.respond_with(|_, message| {
            let call = message.get("__tcfapiCall")?;
            Some(json!({
                "__tcfapiReturn": {
                    "callId": call.get("callId")?.clone(),
                    "returnValue": {"gdprApplies": true},
                    "success": true,
                }
            }))
        });

        let channel = SurrogateChannel::new(bus, FrameHandle::new("cmp"), TCF_ENVELOPE);
        let (callback, mut rx) = channel_callback();
        channel.call("getTCData", json!(2), callback);

        let (payload, success) = rx.recv().await.expect("response");
        assert!(success);
        assert_eq!(payload["gdprApplies"], json!(true));
        // Settled one-shot calls leave no dangling entry.
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(channel.pending_count(), 0);
    }

    #[tokio::test]
    async fn mismatched_call_id_never_invokes_callback() {
        let bus = FakeMessageBus::new();
        let channel =
            SurrogateChannel::new(Arc::clone(&bus) as _, FrameHandle::new("cmp"), USP_ENVELOPE);
        let (callback, mut rx) = channel_callback();
        channel.call("getUSPData", json!(1), callback);

        bus.inject(json!({
            "__uspapiReturn": {
                "callId": "not-the-right-id",
                "returnValue": {"uspString": "1YYN"},
                "success": true,
            }
        }));
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(rx.try_recv().is_err(), "uncorrelated response must be dropped");
        // The request stays dangling; that leak is by design.
        assert_eq!(channel.pending_count(), 1);
    }

    #[tokio::test]
    async fn keep_listening_callback_receives_multiple_events() {
        let bus = FakeMessageBus::new();
        let channel =
            SurrogateChannel::new(Arc::clone(&bus) as _, FrameHandle::new("cmp"), TCF_ENVELOPE);

        let hits = Arc::new(AtomicUsize::new(0));
        let hits_cb = Arc::clone(&hits);
        let callback: CmpCallback = Arc::new(move |_, _| {
            hits_cb.fetch_add(1, Ordering::SeqCst);
            ListenerControl::Keep
        });
        channel.call("addEventListener", json!(2), callback);

        let posted = bus.posted();
        let call_id = posted[0].1["__tcfapiCall"]["callId"].clone();
        for _ in 0..3 {
            bus.inject(json!({
                "__tcfapiReturn": {"callId": call_id.clone(), "returnValue": {}, "success": true}
            }));
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 3);
        assert_eq!(channel.pending_count(), 1, "listener must stay registered");
    }

    #[tokio::test]
    async fn request_wire_shape_matches_envelope() {
        let bus = FakeMessageBus::new();
        let channel =
            SurrogateChannel::new(Arc::clone(&bus) as _, FrameHandle::new("gpp"), GPP_ENVELOPE);
        let (callback, _rx) = channel_callback();
        channel.call("ping", Value::Null, callback);

        let posted = bus.posted();
        assert_eq!(posted.len(), 1);
        assert_eq!(posted[0].0.id(), "gpp");
        let call = &posted[0].1["__gppCall"];
        assert_eq!(call["command"], json!("ping"));
        assert_eq!(call["parameter"], Value::Null);
        assert!(call["callId"].is_string());
    }
}
