//! Host-page abstraction.
//!
//! The engine never touches ambient globals. Everything it knows about
//! the page (the ancestor frame chain, the global entry points a CMP may
//! have installed, and the shared message channel) comes in through the
//! traits defined here, passed explicitly as a [`PageContext`]. This
//! keeps the whole detection pipeline drivable by deterministic fakes.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::broadcast;

/// Opaque identifier of one frame in the page.
///
/// Handles are how cross-origin frames are addressed: the engine cannot
/// reach into such a frame, but it can post messages to it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FrameHandle(String);

impl FrameHandle {
    /// Creates a handle with the given frame id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The frame id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FrameHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Whether a registered callback stays subscribed after an invocation.
///
/// Most calls are one-shot: the callback fires once and the listener is
/// dropped. The TCF `addEventListener` call fires repeatedly as consent
/// state changes; such callers return [`Keep`](Self::Keep) to stay
/// registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerControl {
    /// Keep the listener registered for further events.
    Keep,
    /// Deregister after this invocation (the default for one-shot calls).
    Deregister,
}

/// Callback handed to a CMP entry point: `(payload, success)`.
pub type CmpCallback = Arc<dyn Fn(Value, bool) -> ListenerControl + Send + Sync>;

/// A callable consent-framework entry point.
///
/// Mirrors the conventional call shape `(command, parameter, callback)`.
/// The optional return value carries direct-return answers; the GPP
/// `ping` command may answer either way, and callers accept whichever
/// resolves first.
pub trait CmpFunction: Send + Sync {
    /// Invokes the framework entry point.
    fn call(&self, command: &str, parameter: Value, callback: CmpCallback) -> Option<Value>;
}

/// Outcome of probing one frame for a framework.
#[derive(Clone)]
pub enum ProbeOutcome {
    /// A callable entry point exists at this level.
    Callable(Arc<dyn CmpFunction>),
    /// A named child frame exists (a `<name>Locator` presence sentinel).
    ChildFrame(FrameHandle),
    /// An origin boundary blocked the probe; treated as not-found at
    /// this level, never as a fatal error.
    NotAccessible,
    /// Nothing matching at this level.
    NotFound,
}

impl fmt::Debug for ProbeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Callable(_) => write!(f, "Callable(..)"),
            Self::ChildFrame(handle) => write!(f, "ChildFrame({handle})"),
            Self::NotAccessible => write!(f, "NotAccessible"),
            Self::NotFound => write!(f, "NotFound"),
        }
    }
}

/// One frame in the page's ancestor chain.
///
/// Implementations must report cross-origin access violations as
/// [`ProbeOutcome::NotAccessible`] rather than panicking or erroring.
pub trait Frame: Send + Sync {
    /// Probes this frame's global scope for a callable entry point with
    /// the given well-known name.
    fn probe_entry_point(&self, name: &str) -> ProbeOutcome;

    /// Probes this frame for a child frame with the given name.
    fn probe_child_frame(&self, name: &str) -> ProbeOutcome;

    /// The parent frame, or `None` if this is the top-level frame.
    fn parent(&self) -> Option<Arc<dyn Frame>>;

    /// This frame's handle.
    fn handle(&self) -> FrameHandle;
}

/// The shared global message channel all frames post to and read from.
///
/// Posting carries no origin restriction: targets are discovered by the
/// locator, not configured, so the engine cannot know their origin.
pub trait MessageBus: Send + Sync {
    /// Posts a message to the given frame.
    fn post(&self, target: &FrameHandle, message: Value);

    /// Subscribes to all inbound messages on this page's channel.
    fn subscribe(&self) -> broadcast::Receiver<Value>;
}

/// Everything the engine needs to know about the hosting page.
#[derive(Clone)]
pub struct PageContext {
    /// The frame this integration runs in; detection walks upward from
    /// here.
    pub frame: Arc<dyn Frame>,
    /// The page's shared message channel.
    pub bus: Arc<dyn MessageBus>,
}

impl PageContext {
    /// Creates a page context rooted at the given frame.
    #[must_use]
    pub fn new(frame: Arc<dyn Frame>, bus: Arc<dyn MessageBus>) -> Self {
        Self { frame, bus }
    }
}
