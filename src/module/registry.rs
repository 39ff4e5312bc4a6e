//! Module registry: discovery, lifecycle, and the set of live adapters.
//!
//! Discovery follows the directory convention: a subdirectory `X` of the
//! modules root is a module candidate if it contains a dynamic library
//! named after itself. The registry drives each module through its
//! lifecycle and hands the router the adapters eligible for delivery.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::{Arc, Weak};

use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::ipc::{Message, MODULE_META, NO_SESSION};
use crate::ipc::protocol::ModuleMeta;
use crate::module::adapter::ModuleHostAdapter;
use crate::module::contract::ContractInstance;
use crate::module::loader::{self, LoadError};
use crate::router::MessageSink;

#[derive(Debug, Error)]
pub enum UnloadError {
    #[error("module already unloaded: {0}")]
    AlreadyUnloaded(String),

    #[error("module is being loaded: {0}")]
    LoadInProgress(String),
}

/// Lifecycle states a registered module moves through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleState {
    Discovered,
    Loading,
    Initialized,
    Active,
    Unloading,
    Unloaded,
    /// Terminal. A failed module stays failed until the host restarts.
    Failed,
}

struct ModuleRecord {
    state: ModuleState,
    adapters: Vec<Arc<ModuleHostAdapter>>,
}

impl ModuleRecord {
    fn empty(state: ModuleState) -> Self {
        Self {
            state,
            adapters: Vec::new(),
        }
    }
}

pub struct ModuleRegistry {
    modules_dir: PathBuf,
    modules: RwLock<HashMap<String, ModuleRecord>>,
    /// Bound once after the router exists; weak to break the cycle
    /// router -> registry -> adapter -> router.
    sink: OnceCell<Weak<dyn MessageSink>>,
}

impl ModuleRegistry {
    pub fn new(modules_dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let modules_dir = modules_dir.into();
        std::fs::create_dir_all(&modules_dir)?;
        Ok(Self {
            modules_dir,
            modules: RwLock::new(HashMap::new()),
            sink: OnceCell::new(),
        })
    }

    pub fn modules_dir(&self) -> &PathBuf {
        &self.modules_dir
    }

    /// Bind the outbound sink. Must happen before the first load; later
    /// calls are ignored.
    pub fn bind_sink(&self, sink: Weak<dyn MessageSink>) {
        let _ = self.sink.set(sink);
    }

    fn sink(&self) -> Option<Arc<dyn MessageSink>> {
        self.sink.get().and_then(Weak::upgrade)
    }

    /// Scan the modules directory and register every candidate that is not
    /// already known. Returns the names discovered in this pass.
    pub fn discover(&self) -> std::io::Result<Vec<String>> {
        let mut found = Vec::new();
        for entry in std::fs::read_dir(&self.modules_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            let has_binary = loader::candidate_binaries(&entry.path(), &name)
                .iter()
                .any(|p| p.is_file());
            if !has_binary {
                debug!(module = %name, "skipping directory without a matching binary");
                continue;
            }
            let mut modules = self.modules.write();
            if !modules.contains_key(&name) {
                modules.insert(name.clone(), ModuleRecord::empty(ModuleState::Discovered));
                found.push(name);
            }
        }
        if !found.is_empty() {
            info!(count = found.len(), "discovered modules");
        }
        Ok(found)
    }

    /// Load and activate the named module.
    ///
    /// On success the module has moved `Loading` -> `Initialized` ->
    /// `Active` and its metadata has been announced. Load, activation, and
    /// initialization failures leave the module `Failed`; a missing binary
    /// leaves no record at all. The record never stays `Loading`, not even
    /// when module code panics somewhere in the pipeline.
    pub fn load(&self, name: &str) -> Result<(), LoadError> {
        {
            let mut modules = self.modules.write();
            match modules.get(name).map(|r| r.state) {
                Some(ModuleState::Loading) | Some(ModuleState::Initialized)
                | Some(ModuleState::Active) => {
                    return Err(LoadError::AlreadyLoaded(name.to_string()));
                }
                Some(ModuleState::Failed) => {
                    return Err(LoadError::Failed(name.to_string()));
                }
                _ => {}
            }
            modules.insert(name.to_string(), ModuleRecord::empty(ModuleState::Loading));
        }

        // Activation runs without the registry lock so module code can call
        // back into the host; a panic must still resolve the record.
        let activated = catch_unwind(AssertUnwindSafe(|| self.activate(name))).unwrap_or_else(
            |_| Err(LoadError::ActivationFailed(format!("{name}: activation panicked"))),
        );
        let adapters = match activated {
            Ok(adapters) => adapters,
            Err(e) => {
                let mut modules = self.modules.write();
                if matches!(e, LoadError::NotFound(_)) {
                    modules.remove(name);
                } else {
                    modules.insert(name.to_string(), ModuleRecord::empty(ModuleState::Failed));
                }
                warn!(module = %name, error = %e, "module load failed");
                return Err(e);
            }
        };

        self.set_record(name, ModuleState::Initialized, adapters.clone());
        debug!(module = %name, instances = adapters.len(), "module initializing");

        let verdict = catch_unwind(AssertUnwindSafe(|| {
            for adapter in &adapters {
                if !adapter.initialize() {
                    return Some(adapter.identity().to_string());
                }
            }
            None
        }));
        let refusal = match verdict {
            Ok(refusal) => refusal,
            Err(_) => Some(format!("{name}: initialization panicked")),
        };
        if let Some(who) = refusal {
            for adapter in &adapters {
                if catch_unwind(AssertUnwindSafe(|| adapter.dispose())).is_err() {
                    warn!(module = %adapter.identity(), "disposal panicked during load rollback");
                }
            }
            self.set_record(name, ModuleState::Failed, Vec::new());
            warn!(module = %name, "module refused initialization");
            return Err(LoadError::InitFailed(who));
        }

        let topics: Vec<_> = adapters
            .iter()
            .flat_map(|a| a.subscribed_topics())
            .collect();
        self.set_record(name, ModuleState::Active, adapters);
        info!(module = %name, "module active");
        self.announce(name, &topics);
        Ok(())
    }

    /// Resolve the module's binary and activate the instances it registers.
    /// Instances are adapted but not yet initialized.
    fn activate(&self, name: &str) -> Result<Vec<Arc<ModuleHostAdapter>>, LoadError> {
        let dir = self.modules_dir.join(name);
        let binary = loader::candidate_binaries(&dir, name)
            .into_iter()
            .find(|p| p.is_file())
            .ok_or_else(|| LoadError::NotFound(dir.join(name)))?;

        let (context, activated) = loader::load_binary(&binary)?;
        let context = Arc::new(context);
        let sink = self.sink.get().cloned().unwrap_or_else(unbound_sink);

        let mut adapters = Vec::with_capacity(activated.len());
        for module in activated {
            adapters.push(Arc::new(ModuleHostAdapter::new(
                module.name,
                module.instance,
                Some(Arc::clone(&context)),
                sink.clone(),
            )));
        }
        Ok(adapters)
    }

    fn set_record(&self, name: &str, state: ModuleState, adapters: Vec<Arc<ModuleHostAdapter>>) {
        self.modules
            .write()
            .insert(name.to_string(), ModuleRecord { state, adapters });
    }

    /// Register an instance constructed in-process, bypassing the binary
    /// loader. Used by built-in modules and tests.
    pub fn register_inproc(
        &self,
        name: &str,
        instance: ContractInstance,
    ) -> Result<(), LoadError> {
        {
            let modules = self.modules.read();
            if let Some(r) = modules.get(name) {
                if r.state == ModuleState::Active {
                    return Err(LoadError::AlreadyLoaded(name.to_string()));
                }
            }
        }
        let sink = self.sink.get().cloned().unwrap_or_else(unbound_sink);
        // In-process instances get the same panic containment as loaded
        // binaries.
        let adapter = Arc::new(ModuleHostAdapter::new(name, instance.guarded(), None, sink));
        if !adapter.initialize() {
            adapter.dispose();
            return Err(LoadError::InitFailed(name.to_string()));
        }
        let topics = adapter.subscribed_topics();
        self.modules.write().insert(
            name.to_string(),
            ModuleRecord {
                state: ModuleState::Active,
                adapters: vec![adapter],
            },
        );
        info!(module = %name, "in-process module active");
        self.announce(name, &topics);
        Ok(())
    }

    /// Unload the named module, disposing every instance exactly once.
    /// Unloading a module that is not loaded is an error the caller may
    /// choose to tolerate. The record moves through `Unloading` and ends
    /// `Unloaded`, or `Failed` when a disposal hook panics; an `Unloaded`
    /// module can be loaded again.
    pub fn unload(&self, name: &str) -> Result<(), UnloadError> {
        let adapters = {
            let mut modules = self.modules.write();
            match modules.get(name).map(|r| r.state) {
                None
                | Some(ModuleState::Discovered)
                | Some(ModuleState::Unloading)
                | Some(ModuleState::Unloaded)
                | Some(ModuleState::Failed) => {
                    return Err(UnloadError::AlreadyUnloaded(name.to_string()));
                }
                Some(ModuleState::Loading) | Some(ModuleState::Initialized) => {
                    return Err(UnloadError::LoadInProgress(name.to_string()));
                }
                Some(ModuleState::Active) => {}
            }
            let Some(record) = modules.get_mut(name) else {
                return Err(UnloadError::AlreadyUnloaded(name.to_string()));
            };
            record.state = ModuleState::Unloading;
            debug!(module = %name, "module unloading");
            std::mem::take(&mut record.adapters)
        };

        let mut clean = true;
        for adapter in &adapters {
            if catch_unwind(AssertUnwindSafe(|| adapter.dispose())).is_err() {
                warn!(module = %adapter.identity(), "disposal panicked during unload");
                clean = false;
            }
        }
        // adapters (and with them the loading context) drop here
        drop(adapters);

        let state = if clean {
            ModuleState::Unloaded
        } else {
            ModuleState::Failed
        };
        self.set_record(name, state, Vec::new());
        info!(module = %name, ?state, "module unloaded");
        Ok(())
    }

    /// Adapters of every `Active` module, for fan-out.
    pub fn active_adapters(&self) -> Vec<Arc<ModuleHostAdapter>> {
        self.modules
            .read()
            .values()
            .filter(|r| r.state == ModuleState::Active)
            .flat_map(|r| r.adapters.iter().cloned())
            .collect()
    }

    pub fn state_of(&self, name: &str) -> Option<ModuleState> {
        self.modules.read().get(name).map(|r| r.state)
    }

    pub fn loaded_names(&self) -> Vec<String> {
        self.modules
            .read()
            .iter()
            .filter(|(_, r)| r.state == ModuleState::Active)
            .map(|(n, _)| n.clone())
            .collect()
    }

    /// Dispose everything. Per-module failures are logged, not propagated;
    /// shutdown must finish.
    pub fn shutdown_all(&self) {
        let records: Vec<(String, ModuleRecord)> = self.modules.write().drain().collect();
        for (name, record) in records {
            if record.adapters.is_empty() {
                continue;
            }
            debug!(module = %name, "unloading at shutdown");
            for adapter in &record.adapters {
                if catch_unwind(AssertUnwindSafe(|| adapter.dispose())).is_err() {
                    warn!(module = %adapter.identity(), "disposal panicked at shutdown");
                }
            }
        }
    }

    fn announce(&self, name: &str, topics: &[crate::ipc::Topic]) {
        let Some(sink) = self.sink() else {
            return;
        };
        let meta = ModuleMeta::for_module(name, topics);
        match serde_json::to_string(&meta) {
            Ok(payload) => {
                let msg = Message::new(payload, MODULE_META, NO_SESSION);
                if let Err(e) = sink.route_outbound(&msg) {
                    warn!(module = %name, error = %e, "metadata announcement failed");
                }
            }
            Err(e) => warn!(module = %name, error = %e, "metadata serialization failed"),
        }
    }
}

/// Dangling sink used before the router is bound; publishes go nowhere.
fn unbound_sink() -> Weak<dyn MessageSink> {
    struct NullSink;

    impl MessageSink for NullSink {
        fn route_outbound(&self, _msg: &Message) -> Result<(), crate::error::HostError> {
            Ok(())
        }
    }

    let weak: Weak<dyn MessageSink> = Weak::<NullSink>::new();
    weak
}
