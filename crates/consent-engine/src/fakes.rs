//! Deterministic in-memory test doubles for the page abstraction.
//!
//! Shared by this crate's unit tests and the integration suites under
//! `tests/`. Fakes are scriptable (per-command responses, injectable
//! bus messages, origin-boundary simulation) and observable (call
//! counters, recorded posts) so detection scenarios can be driven
//! without a browser.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::sync::broadcast;

use crate::page::{
    CmpCallback, CmpFunction, Frame, FrameHandle, ListenerControl, MessageBus, ProbeOutcome,
};

/// Capacity of the fake bus's broadcast channel.
const BUS_CAPACITY: usize = 64;

// =============================================================================
// FakeFrame
// =============================================================================

/// A frame with installable entry points and child-frame sentinels.
pub struct FakeFrame {
    id: String,
    parent: Option<Arc<dyn Frame>>,
    entry_points: Mutex<HashMap<String, Arc<dyn CmpFunction>>>,
    child_frames: Mutex<HashMap<String, FrameHandle>>,
    inaccessible: AtomicBool,
}

impl FakeFrame {
    /// Creates a top-level frame (no parent).
    #[must_use]
    pub fn top(id: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            parent: None,
            entry_points: Mutex::new(HashMap::new()),
            child_frames: Mutex::new(HashMap::new()),
            inaccessible: AtomicBool::new(false),
        })
    }

    /// Creates a child of `parent`.
    #[must_use]
    pub fn child(id: impl Into<String>, parent: &Arc<Self>) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            parent: Some(Arc::clone(parent) as Arc<dyn Frame>),
            entry_points: Mutex::new(HashMap::new()),
            child_frames: Mutex::new(HashMap::new()),
            inaccessible: AtomicBool::new(false),
        })
    }

    /// Installs a callable entry point under the given global name.
    pub fn install_entry_point(&self, name: &str, function: Arc<dyn CmpFunction>) {
        self.entry_points
            .lock()
            .expect("entry point lock")
            .insert(name.to_string(), function);
    }

    /// Installs a named child frame (a locator sentinel).
    pub fn install_child_frame(&self, name: &str, handle: FrameHandle) {
        self.child_frames
            .lock()
            .expect("child frame lock")
            .insert(name.to_string(), handle);
    }

    /// Makes every probe of this frame report an origin violation.
    pub fn set_inaccessible(&self) {
        self.inaccessible.store(true, Ordering::SeqCst);
    }
}

impl Frame for FakeFrame {
    fn probe_entry_point(&self, name: &str) -> ProbeOutcome {
        if self.inaccessible.load(Ordering::SeqCst) {
            return ProbeOutcome::NotAccessible;
        }
        self.entry_points
            .lock()
            .expect("entry point lock")
            .get(name)
            .map_or(ProbeOutcome::NotFound, |f| {
                ProbeOutcome::Callable(Arc::clone(f))
            })
    }

    fn probe_child_frame(&self, name: &str) -> ProbeOutcome {
        if self.inaccessible.load(Ordering::SeqCst) {
            return ProbeOutcome::NotAccessible;
        }
        self.child_frames
            .lock()
            .expect("child frame lock")
            .get(name)
            .map_or(ProbeOutcome::NotFound, |h| {
                ProbeOutcome::ChildFrame(h.clone())
            })
    }

    fn parent(&self) -> Option<Arc<dyn Frame>> {
        self.parent.clone()
    }

    fn handle(&self) -> FrameHandle {
        FrameHandle::new(self.id.clone())
    }
}

// =============================================================================
// FakeCmpFunction
// =============================================================================

/// One scripted answer to a command.
#[derive(Clone, Default)]
struct ScriptedResponse {
    /// Value returned directly from the call, if any.
    direct: Option<Value>,
    /// `(payload, success)` pairs delivered to the callback in order,
    /// stopping early if the callback deregisters.
    callback_events: Vec<(Value, bool)>,
}

/// A scriptable CMP entry point with call counters.
///
/// Successive calls to the same command consume queued responses; the
/// last queued response repeats once the queue is down to one entry.
/// Registered callbacks are retained so tests can fire late events via
/// [`emit`](Self::emit).
#[derive(Default)]
pub struct FakeCmpFunction {
    responses: Mutex<HashMap<String, VecDeque<ScriptedResponse>>>,
    registered: Mutex<Vec<(String, CmpCallback)>>,
    calls: Mutex<Vec<String>>,
}

impl FakeCmpFunction {
    /// A function that answers nothing and never invokes callbacks.
    /// Registered callbacks are retained, so callers waiting on them
    /// wait forever (the hung-CMP scenario).
    #[must_use]
    pub fn unresponsive() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Builder wrapper around an empty function.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Scripts a callback-delivered answer for `command`.
    pub fn on_command(&self, command: &str, payload: Value, success: bool) {
        self.responses
            .lock()
            .expect("responses lock")
            .entry(command.to_string())
            .or_default()
            .push_back(ScriptedResponse {
                direct: None,
                callback_events: vec![(payload, success)],
            });
    }

    /// Scripts a sequence of callback events for one call to `command`.
    pub fn on_command_events(&self, command: &str, events: Vec<(Value, bool)>) {
        self.responses
            .lock()
            .expect("responses lock")
            .entry(command.to_string())
            .or_default()
            .push_back(ScriptedResponse {
                direct: None,
                callback_events: events,
            });
    }

    /// Scripts a direct-return answer for `command`.
    pub fn on_command_direct(&self, command: &str, value: Value) {
        self.responses
            .lock()
            .expect("responses lock")
            .entry(command.to_string())
            .or_default()
            .push_back(ScriptedResponse {
                direct: Some(value),
                callback_events: Vec::new(),
            });
    }

    /// Fires a late event at every callback registered for `command`.
    pub fn emit(&self, command: &str, payload: Value, success: bool) {
        let registered = self.registered.lock().expect("registered lock");
        for (cmd, callback) in registered.iter() {
            if cmd == command {
                let _ = callback(payload.clone(), success);
            }
        }
    }

    /// Number of times `command` was invoked.
    #[must_use]
    pub fn call_count(&self, command: &str) -> usize {
        self.calls
            .lock()
            .expect("calls lock")
            .iter()
            .filter(|c| c.as_str() == command)
            .count()
    }

    fn next_response(&self, command: &str) -> Option<ScriptedResponse> {
        let mut responses = self.responses.lock().expect("responses lock");
        let queue = responses.get_mut(command)?;
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }
}

impl CmpFunction for FakeCmpFunction {
    fn call(&self, command: &str, _parameter: Value, callback: CmpCallback) -> Option<Value> {
        self.calls
            .lock()
            .expect("calls lock")
            .push(command.to_string());
        self.registered
            .lock()
            .expect("registered lock")
            .push((command.to_string(), Arc::clone(&callback)));

        let Some(scripted) = self.next_response(command) else {
            return None;
        };
        for (payload, success) in scripted.callback_events {
            if callback(payload, success) == ListenerControl::Deregister {
                break;
            }
        }
        scripted.direct
    }
}

// =============================================================================
// FakeMessageBus
// =============================================================================

/// Responder invoked for every posted message; a returned value is put
/// back on the bus as an inbound message (simulating the far frame).
type Responder = Box<dyn Fn(&FrameHandle, &Value) -> Option<Value> + Send + Sync>;

/// An in-memory shared message channel.
pub struct FakeMessageBus {
    tx: broadcast::Sender<Value>,
    posts: Mutex<Vec<(FrameHandle, Value)>>,
    responders: Mutex<Vec<Responder>>,
}

impl Default for FakeMessageBus {
    fn default() -> Self {
        let (tx, _) = broadcast::channel(BUS_CAPACITY);
        Self {
            tx,
            posts: Mutex::new(Vec::new()),
            responders: Mutex::new(Vec::new()),
        }
    }
}

impl FakeMessageBus {
    /// Creates an empty bus.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Registers a responder simulating a frame on the far side of the
    /// bus.
    pub fn respond_with(
        &self,
        responder: impl Fn(&FrameHandle, &Value) -> Option<Value> + Send + Sync + 'static,
    ) {
        self.responders
            .lock()
            .expect("responders lock")
            .push(Box::new(responder));
    }

    /// Injects a raw inbound message, bypassing any responder.
    pub fn inject(&self, message: Value) {
        let _ = self.tx.send(message);
    }

    /// Messages posted so far, in order.
    #[must_use]
    pub fn posted(&self) -> Vec<(FrameHandle, Value)> {
        self.posts.lock().expect("posts lock").clone()
    }
}

impl MessageBus for FakeMessageBus {
    fn post(&self, target: &FrameHandle, message: Value) {
        self.posts
            .lock()
            .expect("posts lock")
            .push((target.clone(), message.clone()));
        let responders = self.responders.lock().expect("responders lock");
        for responder in responders.iter() {
            if let Some(reply) = responder(target, &message) {
                let _ = self.tx.send(reply);
            }
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<Value> {
        self.tx.subscribe()
    }
}
