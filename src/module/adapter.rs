//! Host-side half of the module contract.
//!
//! One adapter per loaded instance. The adapter exclusively owns the
//! instance and (a share of) its loading context, mediates every call in
//! both directions, and guarantees the disposal hook runs exactly once.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::ipc::{Message, Topic};
use crate::module::contract::{
    ContractInstance, DeliveryMode, HostApi, HostApiError,
};
use crate::module::loader::LoadingContext;
use crate::router::MessageSink;

/// Topic -> event id table for the filtered contract. Ids are assigned
/// densely per adapter and stay stable for the adapter's lifetime.
#[derive(Default)]
struct SubscriptionTable {
    by_topic: HashMap<Topic, u64>,
    next_id: u64,
}

impl SubscriptionTable {
    fn subscribe(&mut self, topic: Topic) -> u64 {
        if let Some(&id) = self.by_topic.get(&topic) {
            return id;
        }
        let id = self.next_id;
        self.next_id += 1;
        self.by_topic.insert(topic, id);
        id
    }
}

/// Host adapter bound 1:1 to a module instance.
pub struct ModuleHostAdapter {
    identity: String,
    mode: DeliveryMode,
    subs: Mutex<SubscriptionTable>,
    /// The live instance; taken (and dropped) exactly once on disposal.
    instance: Mutex<Option<ContractInstance>>,
    /// Keeps the module's binary mapped while the instance is alive. Must be
    /// released only after the instance has been dropped.
    context: Mutex<Option<Arc<LoadingContext>>>,
    sink: Weak<dyn MessageSink>,
    disposed: AtomicBool,
}

impl ModuleHostAdapter {
    pub fn new(
        identity: impl Into<String>,
        instance: ContractInstance,
        context: Option<Arc<LoadingContext>>,
        sink: Weak<dyn MessageSink>,
    ) -> Self {
        Self {
            identity: identity.into(),
            mode: instance.delivery_mode(),
            subs: Mutex::new(SubscriptionTable::default()),
            instance: Mutex::new(Some(instance)),
            context: Mutex::new(context),
            sink,
            disposed: AtomicBool::new(false),
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn delivery_mode(&self) -> DeliveryMode {
        self.mode
    }

    /// Run the module's `initialize` with this adapter as its host
    /// capability. Returns the module's verdict.
    pub fn initialize(self: &Arc<Self>) -> bool {
        let host: Arc<dyn HostApi> = Arc::clone(self) as Arc<dyn HostApi>;
        let mut guard = self.instance.lock();
        match guard.as_mut() {
            Some(ContractInstance::Broadcast(m)) => m.initialize(host),
            Some(ContractInstance::Event(m)) => m.initialize(host),
            None => false,
        }
    }

    /// Whether an inbound message on `topic` should be delivered here.
    pub fn wants(&self, topic: Topic) -> bool {
        match self.mode {
            DeliveryMode::Broadcast => true,
            DeliveryMode::Filtered => self.subs.lock().by_topic.contains_key(&topic),
        }
    }

    /// Hand one inbound message to the module, synchronously. The router
    /// blocks on this call; a module that stalls here stalls routing for
    /// this message (documented limitation, no timeout is imposed).
    pub fn dispatch(&self, msg: &Message) -> bool {
        let mut guard = self.instance.lock();
        let Some(instance) = guard.as_mut() else {
            return false;
        };
        match instance {
            ContractInstance::Broadcast(m) => m.on_message(&msg.payload, msg.topic, msg.session),
            ContractInstance::Event(m) => {
                let id = self.subs.lock().by_topic.get(&msg.topic).copied();
                match id {
                    Some(id) => m.dispatch_event(id, msg.payload.as_bytes()),
                    // Filtered delivery should never reach here; subscription
                    // was removed between the wants() check and dispatch.
                    None => false,
                }
            }
        }
    }

    /// Topics the module has explicitly subscribed to.
    pub fn subscribed_topics(&self) -> Vec<Topic> {
        self.subs.lock().by_topic.keys().copied().collect()
    }

    /// Dispose the module and release its loading context. Idempotent;
    /// returns `true` only for the call that actually disposed. The hook
    /// runs exactly once, and the instance is dropped before the library.
    pub fn dispose(&self) -> bool {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return false;
        }

        if let Some(instance) = self.instance.lock().take() {
            match instance {
                ContractInstance::Broadcast(mut m) => m.dispose(),
                ContractInstance::Event(mut m) => {
                    if !m.uninitialize() {
                        warn!(module = %self.identity, "module reported uninitialize failure");
                    }
                }
            }
            // instance dropped here, while the library is still mapped
        }

        if let Some(context) = self.context.lock().take() {
            debug!(module = %self.identity, "releasing loading context");
            drop(context);
        }
        true
    }
}

impl HostApi for ModuleHostAdapter {
    fn subscribe(&self, topic: Topic) -> Result<u64, HostApiError> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(HostApiError::Disposed);
        }
        let id = self.subs.lock().subscribe(topic);
        debug!(module = %self.identity, %topic, id, "subscribed");
        Ok(id)
    }

    fn unsubscribe(&self, topic: Topic) -> Result<(), HostApiError> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(HostApiError::Disposed);
        }
        match self.subs.lock().by_topic.remove(&topic) {
            Some(_) => {
                debug!(module = %self.identity, %topic, "unsubscribed");
                Ok(())
            }
            None => Err(HostApiError::NotSubscribed(topic)),
        }
    }

    fn publish(&self, topic: Topic, payload: &str, session: i32) -> Result<(), HostApiError> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(HostApiError::Disposed);
        }
        let sink = self.sink.upgrade().ok_or(HostApiError::HostUnavailable)?;
        let msg = Message::new(payload, topic, session);
        sink.route_outbound(&msg)
            .map_err(|e| HostApiError::Outbound(e.to_string()))
    }
}

impl Drop for ModuleHostAdapter {
    fn drop(&mut self) {
        // Last line of defense; the registry disposes explicitly.
        self.dispose();
    }
}
