//! Registry of module metadata announcements.
//!
//! Every announcement on the module-meta topic is recorded here before it
//! is forwarded, so the host can answer "what is loaded where" without a
//! round trip.

use std::collections::HashMap;

use parking_lot::RwLock;
use tracing::debug;

use crate::error::HostError;
use crate::ipc::protocol::ModuleMeta;
use crate::ipc::Message;

#[derive(Default)]
pub struct MetadataService {
    entries: RwLock<HashMap<String, ModuleMeta>>,
}

impl MetadataService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one announcement. The payload must be a `ModuleMeta`
    /// document; anything else is a decode failure the router reports.
    pub fn record(&self, msg: &Message) -> Result<(), HostError> {
        let meta: ModuleMeta = serde_json::from_str(&msg.payload)?;
        debug!(module = %meta.name, pid = meta.pid, "recorded module metadata");
        self.entries.write().insert(meta.name.clone(), meta);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<ModuleMeta> {
        self.entries.read().get(name).cloned()
    }

    pub fn snapshot(&self) -> Vec<ModuleMeta> {
        let mut all: Vec<_> = self.entries.read().values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    pub fn forget(&self, name: &str) {
        self.entries.write().remove(name);
    }
}
