//! Loading contexts for module binaries.
//!
//! Every module binary gets its own `libloading::Library`, so modules can be
//! unloaded independently and symbol collisions between modules cannot
//! occur. The loader resolves the binary's contract declaration, verifies
//! the contract version, and activates the instances the binary registers.

use std::path::{Path, PathBuf};

use libloading::Library;
use thiserror::Error;
use tracing::{debug, info};

use crate::module::contract::{
    BroadcastContract, ContractInstance, EventContract, ModuleDeclaration, ModuleRegistrar,
    CONTRACT_VERSION, DECLARATION_SYMBOL,
};

/// Load failures, in the order the load pipeline can hit them.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("module binary not found: {0}")]
    NotFound(PathBuf),

    #[error("module already loaded: {0}")]
    AlreadyLoaded(String),

    #[error("module previously failed and is not reloadable: {0}")]
    Failed(String),

    #[error("failed to load module binary: {0}")]
    LoadFailed(String),

    #[error("failed to activate module instance: {0}")]
    ActivationFailed(String),

    #[error("module refused initialization: {0}")]
    InitFailed(String),
}

/// An isolated loading context: one mapped library per module binary.
///
/// Instances created from the library must be dropped before this struct;
/// the adapter enforces that ordering.
pub struct LoadingContext {
    path: PathBuf,
    // Held for its Drop; no symbols are resolved after activation.
    _library: Library,
}

impl LoadingContext {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl std::fmt::Debug for LoadingContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadingContext")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

/// A contract instance activated from a binary, with its declared name.
pub struct ActivatedModule {
    pub name: String,
    pub instance: ContractInstance,
}

#[derive(Default)]
struct Collector {
    modules: Vec<ActivatedModule>,
}

impl ModuleRegistrar for Collector {
    fn register_broadcast(&mut self, name: &str, module: Box<dyn BroadcastContract>) {
        self.modules.push(ActivatedModule {
            name: name.to_string(),
            instance: ContractInstance::Broadcast(module),
        });
    }

    fn register_event(&mut self, name: &str, module: Box<dyn EventContract>) {
        self.modules.push(ActivatedModule {
            name: name.to_string(),
            instance: ContractInstance::Event(module),
        });
    }
}

/// Load one module binary and activate everything it registers.
///
/// The returned `LoadingContext` keeps the binary mapped; dropping it after
/// all instances are gone reclaims the underlying resources.
pub fn load_binary(path: &Path) -> Result<(LoadingContext, Vec<ActivatedModule>), LoadError> {
    if !path.is_file() {
        return Err(LoadError::NotFound(path.to_path_buf()));
    }

    info!(path = %path.display(), "loading module binary");

    // Safety: loading foreign code is inherently trusted; the modules
    // directory is operator-controlled, and the declaration symbol is
    // verified before any module code runs.
    let library = unsafe { Library::new(path) }
        .map_err(|e| LoadError::LoadFailed(format!("{}: {e}", path.display())))?;

    let declaration: ModuleDeclaration = unsafe {
        let symbol = library
            .get::<*mut ModuleDeclaration>(DECLARATION_SYMBOL)
            .map_err(|_| {
                LoadError::LoadFailed(format!(
                    "{}: no module contract declaration exported",
                    path.display()
                ))
            })?;
        symbol.read()
    };

    if declaration.contract_version != CONTRACT_VERSION {
        return Err(LoadError::LoadFailed(format!(
            "{}: contract version {} (host speaks {})",
            path.display(),
            declaration.contract_version,
            CONTRACT_VERSION
        )));
    }
    if declaration.host_version != crate::VERSION {
        return Err(LoadError::LoadFailed(format!(
            "{}: built against umh {} (host is {})",
            path.display(),
            declaration.host_version,
            crate::VERSION
        )));
    }

    let mut collector = Collector::default();
    // The declaration's register shim catches panics on its own side of the
    // library boundary and reports them as a refusal.
    if !(declaration.register)(&mut collector) {
        return Err(LoadError::ActivationFailed(format!(
            "{}: registration panicked inside the module",
            path.display()
        )));
    }

    if collector.modules.is_empty() {
        return Err(LoadError::LoadFailed(format!(
            "{}: registered no contract instances",
            path.display()
        )));
    }

    debug!(
        path = %path.display(),
        count = collector.modules.len(),
        "module binary activated"
    );

    Ok((
        LoadingContext {
            path: path.to_path_buf(),
            _library: library,
        },
        collector.modules,
    ))
}

/// Candidate binary paths for module `name` inside `dir`, following the
/// naming convention: the binary is named after its directory, with the
/// platform dynamic-library decoration.
pub fn candidate_binaries(dir: &Path, name: &str) -> Vec<PathBuf> {
    let suffix = std::env::consts::DLL_SUFFIX;
    let prefix = std::env::consts::DLL_PREFIX;
    vec![
        dir.join(format!("{name}{suffix}")),
        dir.join(format!("{prefix}{name}{suffix}")),
    ]
}
