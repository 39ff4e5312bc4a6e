//! Shared fixtures for host integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use parking_lot::Mutex;
use umh::boundary::codec::{status, BoundaryCodec, WireString};
use umh::boundary::ControllerLink;
use umh::ipc::{Message, Topic};
use umh::module::contract::{BroadcastContract, EventContract, HostApi};
use umh::{HostContext, HostSettings};

/// Controller link that decodes and records everything the host sends.
pub struct RecordingLink {
    codec: BoundaryCodec,
    pub sent: Mutex<Vec<Message>>,
    pub progress: Mutex<Vec<u8>>,
    pub logs: Mutex<Vec<String>>,
}

impl RecordingLink {
    pub fn new() -> Self {
        Self {
            codec: BoundaryCodec::native(),
            sent: Mutex::new(Vec::new()),
            progress: Mutex::new(Vec::new()),
            logs: Mutex::new(Vec::new()),
        }
    }

    pub fn sent_on(&self, topic: Topic) -> Vec<Message> {
        self.sent
            .lock()
            .iter()
            .filter(|m| m.topic == topic)
            .cloned()
            .collect()
    }
}

impl ControllerLink for RecordingLink {
    fn send_message(&self, payload: &WireString, topic: &WireString, session: i32) -> i32 {
        match self.codec.decode_message(payload, topic, session) {
            Ok(msg) => {
                self.sent.lock().push(msg);
                status::OK
            }
            Err(_) => status::DECODE_FAILED,
        }
    }

    fn on_log(&self, line: &str) {
        self.logs.lock().push(line.to_string());
    }

    fn on_progress(&self, percent: u8) -> i32 {
        self.progress.lock().push(percent);
        status::OK
    }
}

/// A bootstrapped host over temporary directories.
pub struct TestHost {
    pub context: HostContext,
    pub link: Arc<RecordingLink>,
    _dir: tempfile::TempDir,
}

impl TestHost {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let settings = HostSettings {
            modules_dir: dir.path().join("modules").to_string_lossy().into_owned(),
            conf_dir: dir.path().join("conf").to_string_lossy().into_owned(),
            ..HostSettings::default()
        };
        let link = Arc::new(RecordingLink::new());
        let context = HostContext::bootstrap(settings, Arc::clone(&link) as Arc<dyn ControllerLink>)
            .expect("bootstrap");
        Self {
            context,
            link,
            _dir: dir,
        }
    }

    pub fn route(&self, msg: &Message) -> i32 {
        self.context.router().route_inbound(msg)
    }
}

/// Broadcast module that records everything it receives.
pub struct SpongeModule {
    pub seen: Arc<Mutex<Vec<Message>>>,
}

impl BroadcastContract for SpongeModule {
    fn initialize(&mut self, _host: Arc<dyn HostApi>) -> bool {
        true
    }

    fn on_message(&mut self, payload: &str, topic: Topic, session: i32) -> bool {
        self.seen.lock().push(Message::new(payload, topic, session));
        true
    }

    fn dispose(&mut self) {}
}

/// Filtered module that counts dispatches for one topic and can publish a
/// reply.
pub struct ReplyModule {
    pub listen: Topic,
    pub reply_on: Option<Topic>,
    pub hits: Arc<Mutex<usize>>,
    host: Option<Arc<dyn HostApi>>,
}

impl ReplyModule {
    pub fn new(listen: Topic, reply_on: Option<Topic>, hits: Arc<Mutex<usize>>) -> Self {
        Self {
            listen,
            reply_on,
            hits,
            host: None,
        }
    }
}

impl EventContract for ReplyModule {
    fn initialize(&mut self, host: Arc<dyn HostApi>) -> bool {
        if host.subscribe(self.listen).is_err() {
            return false;
        }
        self.host = Some(host);
        true
    }

    fn dispatch_event(&mut self, _id: u64, payload: &[u8]) -> bool {
        *self.hits.lock() += 1;
        if let (Some(host), Some(reply_on)) = (&self.host, self.reply_on) {
            let text = String::from_utf8_lossy(payload).into_owned();
            return host.publish(reply_on, &text, umh::ipc::NO_SESSION).is_ok();
        }
        true
    }

    fn uninitialize(&mut self) -> bool {
        self.host = None;
        true
    }
}
