//! Host-level error type.
//!
//! Individual subsystems carry their own error enums; this umbrella exists
//! for the paths that cross subsystem seams, chiefly message routing.

use thiserror::Error;

use crate::boundary::codec::CodecError;
use crate::config::ConfigError;
use crate::module::loader::LoadError;
use crate::module::registry::UnloadError;

#[derive(Debug, Error)]
pub enum HostError {
    #[error("boundary codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("module load error: {0}")]
    Load(#[from] LoadError),

    #[error("module unload error: {0}")]
    Unload(#[from] UnloadError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("malformed payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("controller link rejected message with status {0}")]
    LinkRejected(i32),

    #[error("host is shutting down")]
    ShuttingDown,

    #[error("process image is not an allowed controller")]
    ForbiddenImage,

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
