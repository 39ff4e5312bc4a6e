//! Demo module: subscribes to a request topic and echoes every payload
//! back on a reply topic, preserving the session.

use std::sync::Arc;

use tracing::info;
use umh::ipc::Topic;
use umh::module::contract::{EventContract, HostApi, ModuleRegistrar};

/// Requests land here.
const ECHO_REQUEST: Topic = Topic::from_u128(0xD8A4C3F0_1F52_4A7E_9B0D_5E7F3C2A9B11);
/// Replies go out here.
const ECHO_REPLY: Topic = Topic::from_u128(0xD8A4C3F0_1F52_4A7E_9B0D_5E7F3C2A9B12);

#[derive(Default)]
struct EchoModule {
    host: Option<Arc<dyn HostApi>>,
    request_event: u64,
    echoed: u64,
}

impl EventContract for EchoModule {
    fn initialize(&mut self, host: Arc<dyn HostApi>) -> bool {
        match host.subscribe(ECHO_REQUEST) {
            Ok(id) => {
                self.request_event = id;
                self.host = Some(host);
                info!(topic = %ECHO_REQUEST, "echo module listening");
                true
            }
            Err(_) => false,
        }
    }

    fn dispatch_event(&mut self, id: u64, payload: &[u8]) -> bool {
        if id != self.request_event {
            return false;
        }
        let Some(host) = &self.host else {
            return false;
        };
        let Ok(text) = std::str::from_utf8(payload) else {
            return false;
        };
        self.echoed += 1;
        host.publish(ECHO_REPLY, text, umh::ipc::NO_SESSION).is_ok()
    }

    fn uninitialize(&mut self) -> bool {
        info!(echoed = self.echoed, "echo module stopping");
        self.host = None;
        true
    }
}

fn register(registrar: &mut dyn ModuleRegistrar) {
    registrar.register_event("echo", Box::new(EchoModule::default()));
}

umh::declare_module!(register);
