//! File-backed configuration store.
//!
//! The store is one JSON document on disk. Updates are RFC 7386 merge
//! patches; queries address a top-level section by name or an arbitrary
//! location by JSON pointer. Every mutation and every query answer goes
//! out as a push on the configuration broadcast topic.

use std::path::PathBuf;

use parking_lot::Mutex;
use serde_json::Value;
use tracing::{error, info, warn};

use crate::error::HostError;
use crate::ipc::protocol::{ConfStoreKind, ConfStoreRequest};
use crate::ipc::{Message, CONF_BROADCAST};

const STORE_FILE: &str = "store.json";

pub struct ConfStoreService {
    path: PathBuf,
    doc: Mutex<Value>,
}

impl ConfStoreService {
    /// Open (or create) the store under `conf_dir`. A corrupt store is
    /// reset to an empty document rather than keeping the host down.
    pub fn open(conf_dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let conf_dir = conf_dir.into();
        std::fs::create_dir_all(&conf_dir)?;
        let path = conf_dir.join(STORE_FILE);

        let doc = match std::fs::read_to_string(&path) {
            Ok(text) => match serde_json::from_str::<Value>(&text) {
                Ok(v @ Value::Object(_)) => v,
                Ok(_) | Err(_) => {
                    error!(path = %path.display(), "configuration store is corrupt, resetting");
                    Value::Object(Default::default())
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Value::Object(Default::default())
            }
            Err(e) => return Err(e),
        };

        Ok(Self {
            path,
            doc: Mutex::new(doc),
        })
    }

    /// Process one request from the store topic. Returns the pushes to
    /// deliver on the broadcast topic.
    pub fn handle(&self, msg: &Message) -> Result<Vec<Message>, HostError> {
        let request: ConfStoreRequest = serde_json::from_str(&msg.payload)?;
        match request.cmd {
            ConfStoreKind::Query => {
                let answer = self.query(&request.args);
                let payload = serde_json::to_string(&answer)?;
                Ok(vec![Message::new(payload, CONF_BROADCAST, msg.session)])
            }
            ConfStoreKind::Update => {
                let patch: Value = serde_json::from_str(&request.args)?;
                let snapshot = self.update(&patch)?;
                info!("configuration store updated");
                let payload = serde_json::to_string(&snapshot)?;
                Ok(vec![Message::new(payload, CONF_BROADCAST, msg.session)])
            }
        }
    }

    /// Look up a section. An empty target returns the whole document; a
    /// target starting with `/` is a JSON pointer; anything else is a
    /// top-level key.
    pub fn query(&self, target: &str) -> Value {
        let doc = self.doc.lock();
        if target.is_empty() {
            return doc.clone();
        }
        let found = if target.starts_with('/') {
            doc.pointer(target)
        } else {
            doc.get(target)
        };
        found.cloned().unwrap_or(Value::Null)
    }

    /// Apply a merge patch and persist. Returns the resulting document.
    pub fn update(&self, patch: &Value) -> Result<Value, HostError> {
        let mut doc = self.doc.lock();
        merge_patch(&mut doc, patch);
        let pretty = serde_json::to_string_pretty(&*doc)?;
        if let Err(e) = std::fs::write(&self.path, pretty) {
            warn!(path = %self.path.display(), error = %e, "failed to persist configuration store");
            return Err(e.into());
        }
        Ok(doc.clone())
    }
}

/// RFC 7386 JSON merge patch: objects merge recursively, `null` removes,
/// everything else replaces.
pub fn merge_patch(target: &mut Value, patch: &Value) {
    match patch {
        Value::Object(entries) => {
            if !target.is_object() {
                *target = Value::Object(Default::default());
            }
            let map = target.as_object_mut().unwrap();
            for (key, value) in entries {
                if value.is_null() {
                    map.remove(key);
                } else {
                    merge_patch(map.entry(key.clone()).or_insert(Value::Null), value);
                }
            }
        }
        other => *target = other.clone(),
    }
}
