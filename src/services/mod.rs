//! In-process services behind the system topics.

pub mod conf_store;
pub mod metadata;
pub mod shell_exec;

pub use conf_store::ConfStoreService;
pub use metadata::MetadataService;
pub use shell_exec::ShellExecService;
