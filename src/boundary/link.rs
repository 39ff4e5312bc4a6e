//! Outbound half of the controller boundary.
//!
//! The controller hands the host a set of callbacks at attach time; this
//! trait is their host-side shape. Implementations must never unwind into
//! the caller; the router wraps every call.

use tracing::{info, trace};

use crate::boundary::codec::{status, WireString};

/// Callbacks into the controller. One message callback is mandatory; the
/// rest have no-op defaults because older controllers do not provide them.
pub trait ControllerLink: Send + Sync {
    /// Deliver one outbound message. Returns a boundary status code.
    fn send_message(&self, payload: &WireString, topic: &WireString, session: i32) -> i32;

    /// Forward one log line to the controller's sink.
    fn on_log(&self, _line: &str) {}

    /// Report load/startup progress, 0..=100.
    fn on_progress(&self, _percent: u8) -> i32 {
        status::OK
    }
}

/// Link that drops everything. Stands in until a controller attaches and
/// in tests that do not care about outbound traffic.
#[derive(Default)]
pub struct NullLink;

impl ControllerLink for NullLink {
    fn send_message(&self, _payload: &WireString, _topic: &WireString, _session: i32) -> i32 {
        status::OK
    }
}

/// Link that traces outbound traffic instead of delivering it. Useful when
/// running the host standalone from the command line.
#[derive(Default)]
pub struct TraceLink;

impl ControllerLink for TraceLink {
    fn send_message(&self, payload: &WireString, topic: &WireString, _session: i32) -> i32 {
        trace!(
            payload_encoding = ?payload.encoding(),
            topic_encoding = ?topic.encoding(),
            "outbound message (no controller attached)"
        );
        status::OK
    }

    fn on_log(&self, line: &str) {
        info!(target: "controller", "{line}");
    }
}

/// Whether the current process image is one of the allowed controller
/// binaries. An empty allow-list means unrestricted hosting.
pub fn hosted_by(allowed_images: &[String]) -> bool {
    if allowed_images.is_empty() {
        return true;
    }
    let Ok(exe) = std::env::current_exe() else {
        return false;
    };
    let Some(name) = exe.file_name().map(|n| n.to_string_lossy().to_lowercase()) else {
        return false;
    };
    allowed_images
        .iter()
        .any(|allowed| allowed.to_lowercase() == name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boundary::codec::BoundaryCodec;

    #[test]
    fn empty_allow_list_is_unrestricted() {
        assert!(hosted_by(&[]));
    }

    #[test]
    fn foreign_image_is_rejected() {
        assert!(!hosted_by(&["some-other-binary.exe".to_string()]));
    }

    #[test]
    fn null_link_accepts_everything() {
        let codec = BoundaryCodec::native();
        let payload = codec.encode("{}");
        let topic = codec.encode("{00000000-0000-0000-0000-000000000000}");
        assert_eq!(NullLink.send_message(&payload, &topic, -1), status::OK);
    }
}
