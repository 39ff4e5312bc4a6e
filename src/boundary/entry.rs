//! The inbound boundary entry point.
//!
//! The controller calls one exported function to deliver a message. The
//! endpoint guards it with an initialization gate so calls that race host
//! startup block until routing is ready, and a panic guard so nothing ever
//! unwinds across the boundary.

use std::ffi::c_void;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use once_cell::sync::OnceCell;
use tracing::{error, warn};

use crate::boundary::codec::{status, BoundaryCodec};
use crate::gate::Gate;
use crate::router::MessageRouter;

/// Process-wide endpoint the exported symbol dispatches through.
pub static ENDPOINT: BoundaryEndpoint = BoundaryEndpoint::new();

pub struct BoundaryEndpoint {
    ready: Gate,
    router: OnceCell<Arc<MessageRouter>>,
    codec: BoundaryCodec,
}

impl BoundaryEndpoint {
    pub const fn new() -> Self {
        Self {
            ready: Gate::new(),
            router: OnceCell::new(),
            codec: BoundaryCodec::native(),
        }
    }

    /// Attach the router and open the gate. Callers blocked in `deliver`
    /// proceed once this returns. Installing twice is a no-op.
    pub fn install(&self, router: Arc<MessageRouter>) {
        if self.router.set(router).is_err() {
            warn!("boundary endpoint already installed");
            return;
        }
        self.ready.open();
    }

    pub fn is_ready(&self) -> bool {
        self.ready.is_open()
    }

    /// Deliver one raw boundary call. Blocks until the host is initialized.
    ///
    /// # Safety
    ///
    /// `msg` and `topic` must be NUL-terminated buffers in the native wire
    /// encoding, valid for the duration of the call.
    pub unsafe fn deliver(&self, msg: *const c_void, topic: *const c_void, session: i32) -> i32 {
        self.ready.wait();
        // install() opened the gate, so the router is set.
        let Some(router) = self.router.get() else {
            return status::ROUTE_FAILED;
        };

        let message = self
            .codec
            .capture(msg)
            .and_then(|m| {
                let t = self.codec.capture(topic)?;
                self.codec.decode_message(&m, &t, session)
            });
        match message {
            Ok(message) => router.route_inbound(&message),
            Err(e) => {
                warn!(error = %e, "undecodable boundary message");
                status::DECODE_FAILED
            }
        }
    }
}

/// Inbound message entry point, called by the controller.
///
/// Returns 0 on success and a non-zero status code on failure; never
/// unwinds.
///
/// # Safety
///
/// `msg` and `topic` must be NUL-terminated buffers in the platform wire
/// encoding (UTF-16 on Windows, UTF-8 elsewhere), valid for the duration
/// of the call.
#[no_mangle]
pub unsafe extern "C" fn MessageFromHostToModule(
    msg: *const c_void,
    topic: *const c_void,
    session: i32,
) -> i32 {
    match catch_unwind(AssertUnwindSafe(|| ENDPOINT.deliver(msg, topic, session))) {
        Ok(code) => code,
        Err(_) => {
            error!("panic reached the boundary entry point");
            status::FAULT
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boundary::codec::WireString;
    use crate::boundary::link::NullLink;
    use crate::gate::Gate as TermGate;
    use crate::ipc::protocol::HostCommand;
    use crate::module::registry::ModuleRegistry;
    use crate::services::ConfStoreService;
    use std::time::Duration;

    fn fresh_endpoint_with_router() -> (BoundaryEndpoint, Arc<MessageRouter>) {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(ModuleRegistry::new(dir.path().join("modules")).unwrap());
        let conf = ConfStoreService::open(dir.path().join("conf")).unwrap();
        std::mem::forget(dir);
        let router = MessageRouter::shared(
            registry,
            conf,
            Arc::new(NullLink),
            BoundaryCodec::native(),
            Arc::new(TermGate::new()),
        );
        let endpoint = BoundaryEndpoint::new();
        endpoint.install(Arc::clone(&router));
        (endpoint, router)
    }

    fn wire(codec: &BoundaryCodec, s: &str) -> WireString {
        codec.encode(s)
    }

    #[test]
    fn terminate_round_trips_through_the_raw_boundary() {
        let (endpoint, router) = fresh_endpoint_with_router();
        let codec = BoundaryCodec::native();
        let payload = wire(&codec, &serde_json::to_string(&HostCommand::terminate()).unwrap());
        let topic = wire(&codec, &crate::ipc::HOST_CONTROL.to_string());

        let code = unsafe { endpoint.deliver(payload.as_ptr(), topic.as_ptr(), -1) };
        assert_eq!(code, status::OK);
        assert!(router.termination().is_open());
    }

    #[test]
    fn null_pointer_is_a_decode_failure_not_a_fault() {
        let (endpoint, _router) = fresh_endpoint_with_router();
        let codec = BoundaryCodec::native();
        let topic = wire(&codec, &crate::ipc::HOST_CONTROL.to_string());
        let code = unsafe { endpoint.deliver(std::ptr::null(), topic.as_ptr(), -1) };
        assert_eq!(code, status::DECODE_FAILED);
    }

    #[test]
    fn bad_topic_is_a_decode_failure() {
        let (endpoint, _router) = fresh_endpoint_with_router();
        let codec = BoundaryCodec::native();
        let payload = wire(&codec, "{}");
        let topic = wire(&codec, "not-a-guid");
        let code = unsafe { endpoint.deliver(payload.as_ptr(), topic.as_ptr(), -1) };
        assert_eq!(code, status::DECODE_FAILED);
    }

    #[test]
    fn delivery_blocks_until_installed() {
        let endpoint = Arc::new(BoundaryEndpoint::new());
        let waiter = Arc::clone(&endpoint);

        let handle = std::thread::spawn(move || {
            let codec = BoundaryCodec::native();
            let payload = codec.encode(&serde_json::to_string(&HostCommand::terminate()).unwrap());
            let topic = codec.encode(&crate::ipc::HOST_CONTROL.to_string());
            unsafe { waiter.deliver(payload.as_ptr(), topic.as_ptr(), -1) }
        });

        std::thread::sleep(Duration::from_millis(50));
        assert!(!handle.is_finished());

        let (_ep, router) = fresh_endpoint_with_router();
        endpoint.install(router);
        assert_eq!(handle.join().unwrap(), status::OK);
    }
}
