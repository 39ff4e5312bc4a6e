//! Universal module host.
//!
//! A long-lived process that loads plug-in binaries ("modules"), bridges
//! them to an external controller across an FFI boundary, and routes
//! topic-addressed messages between the two sides.
//!
//! ## Architecture
//!
//! - **Boundary**: wire codec, the exported entry point, and the
//!   controller link. Nothing unwinds across it; failures come back as
//!   non-zero status codes.
//! - **Modules**: discovery, loading, and lifecycle. Each binary gets an
//!   isolated loading context; each instance gets a host adapter that
//!   owns it and mediates every call.
//! - **Router**: one inbound message at a time. Host control and the
//!   system topics are handled in-process; everything else fans out to
//!   the loaded modules.
//! - **Services**: configuration store, module metadata, shell-exec
//!   relay, behind their well-known topics.

pub mod boundary;
pub mod config;
pub mod context;
pub mod error;
pub mod gate;
pub mod ipc;
pub mod logging;
pub mod module;
pub mod router;
pub mod services;

pub use boundary::{BoundaryCodec, ControllerLink};
pub use config::HostSettings;
pub use context::HostContext;
pub use error::HostError;
pub use ipc::{Message, Topic};
pub use router::{MessageRouter, MessageSink};

/// Host version, compared against what module binaries were built with.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Exit code reported when the host dies on an unhandled failure, so the
/// controller can tell a crash from a clean exit.
pub const FAILURE_EXIT_CODE: i32 = 213;
