//! Frame locator: finds which ancestor frame hosts a consent framework.
//!
//! The scan is explicit and ordered: starting at the integration's own
//! frame and walking the ancestor chain up to and including the top
//! frame, each level is probed for (a) a directly callable entry point
//! and (b) a `<name>Locator` child frame whose mere presence signals
//! that the framework lives in a cross-origin ancestor. The innermost
//! direct match wins; an inaccessible level counts as not-found there.

use std::sync::Arc;

use tracing::debug;

use crate::page::{CmpFunction, Frame, FrameHandle, ProbeOutcome};

/// Suffix of the presence-sentinel child frame (`__tcfapiLocator` etc.).
const LOCATOR_SUFFIX: &str = "Locator";

/// Where a framework was found, if anywhere.
#[derive(Clone, Default)]
pub struct LocatedFramework {
    /// The frame hosting the framework. `None` means the framework is
    /// absent from the page.
    pub frame: Option<FrameHandle>,
    /// The directly callable entry point, when the hosting frame is
    /// same-origin. `None` with `frame` set means the framework is
    /// reachable only through cross-frame messaging.
    pub direct: Option<Arc<dyn CmpFunction>>,
}

impl LocatedFramework {
    /// Returns `true` if the framework was not found at any level.
    #[must_use]
    pub fn is_absent(&self) -> bool {
        self.frame.is_none()
    }
}

/// Walks the ancestor chain looking for `name`.
///
/// At each level the entry-point probe runs first (a direct function is
/// always preferred over a sentinel), then the `<name>Locator` child
/// probe. The walk stops at the first match or after the top frame.
#[must_use]
pub fn locate_framework(start: &Arc<dyn Frame>, name: &str) -> LocatedFramework {
    let locator_name = format!("{name}{LOCATOR_SUFFIX}");
    let mut current = Arc::clone(start);
    loop {
        match current.probe_entry_point(name) {
            ProbeOutcome::Callable(function) => {
                debug!(framework = %name, frame = %current.handle(), "direct entry point found");
                return LocatedFramework {
                    frame: Some(current.handle()),
                    direct: Some(function),
                };
            }
            ProbeOutcome::NotAccessible => {
                debug!(framework = %name, frame = %current.handle(), "entry point probe blocked by origin boundary");
            }
            ProbeOutcome::ChildFrame(_) | ProbeOutcome::NotFound => {}
        }

        match current.probe_child_frame(&locator_name) {
            ProbeOutcome::ChildFrame(handle) => {
                debug!(framework = %name, frame = %handle, "locator sentinel found");
                return LocatedFramework {
                    frame: Some(handle),
                    direct: None,
                };
            }
            ProbeOutcome::NotAccessible => {
                debug!(framework = %name, frame = %current.handle(), "locator probe blocked by origin boundary");
            }
            ProbeOutcome::Callable(_) | ProbeOutcome::NotFound => {}
        }

        match current.parent() {
            Some(parent) => current = parent,
            None => break,
        }
    }
    debug!(framework = %name, "framework absent from page");
    LocatedFramework::default()
}

#[cfg(test)]
mod tests {
    use serde_json::Value;

    use super::*;
    use crate::fakes::{FakeCmpFunction, FakeFrame};
    use crate::page::CmpCallback;

    struct Nop;
    impl CmpFunction for Nop {
        fn call(&self, _: &str, _: Value, _: CmpCallback) -> Option<Value> {
            None
        }
    }

    #[test]
    fn absent_framework_has_no_frame() {
        let top = FakeFrame::top("top");
        let child: Arc<dyn Frame> = FakeFrame::child("child", &top);
        let located = locate_framework(&child, "__tcfapi");
        assert!(located.is_absent());
        assert!(located.direct.is_none());
    }

    #[test]
    fn innermost_direct_match_wins() {
        let top = FakeFrame::top("top");
        top.install_entry_point("__tcfapi", Arc::new(Nop));
        let child = FakeFrame::child("child", &top);
        child.install_entry_point("__tcfapi", FakeCmpFunction::unresponsive());

        let start: Arc<dyn Frame> = child;
        let located = locate_framework(&start, "__tcfapi");
        assert_eq!(located.frame.unwrap().id(), "child");
        assert!(located.direct.is_some());
    }

    #[test]
    fn walk_reaches_top_frame() {
        let top = FakeFrame::top("top");
        top.install_entry_point("__uspapi", Arc::new(Nop));
        let mid = FakeFrame::child("mid", &top);
        let leaf: Arc<dyn Frame> = FakeFrame::child("leaf", &mid);

        let located = locate_framework(&leaf, "__uspapi");
        assert_eq!(located.frame.unwrap().id(), "top");
    }

    #[test]
    fn locator_sentinel_yields_frame_without_function() {
        let top = FakeFrame::top("top");
        top.install_child_frame("__gppLocator", FrameHandle::new("gpp-host"));
        let leaf: Arc<dyn Frame> = FakeFrame::child("leaf", &top);

        let located = locate_framework(&leaf, "__gpp");
        assert_eq!(located.frame.unwrap().id(), "gpp-host");
        assert!(located.direct.is_none());
    }

    #[test]
    fn direct_function_beats_sentinel_at_same_level() {
        let top = FakeFrame::top("top");
        top.install_entry_point("__tcfapi", Arc::new(Nop));
        top.install_child_frame("__tcfapiLocator", FrameHandle::new("elsewhere"));
        let start: Arc<dyn Frame> = top;

        let located = locate_framework(&start, "__tcfapi");
        assert!(located.direct.is_some());
        assert_eq!(located.frame.unwrap().id(), "top");
    }

    #[test]
    fn inaccessible_level_is_skipped_not_fatal() {
        let top = FakeFrame::top("top");
        top.install_entry_point("__tcfapi", Arc::new(Nop));
        let blocked = FakeFrame::child("blocked", &top);
        blocked.set_inaccessible();
        let leaf: Arc<dyn Frame> = FakeFrame::child("leaf", &blocked);

        let located = locate_framework(&leaf, "__tcfapi");
        assert_eq!(located.frame.unwrap().id(), "top");
    }
}
