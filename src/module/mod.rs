//! Module subsystem: the contract surface, per-instance adapters, the
//! binary loader, and the registry that ties them together.

pub mod adapter;
pub mod contract;
pub mod loader;
pub mod registry;

pub use adapter::ModuleHostAdapter;
pub use contract::{
    BroadcastContract, ContractInstance, DeliveryMode, EventContract, HostApi, HostApiError,
    ModuleDeclaration, ModuleRegistrar, CONTRACT_VERSION,
};
pub use loader::{LoadError, LoadingContext};
pub use registry::{ModuleRegistry, ModuleState, UnloadError};
