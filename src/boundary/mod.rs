//! The controller boundary: wire codec, outbound link, inbound entry.

pub mod codec;
pub mod entry;
pub mod link;

pub use codec::{BoundaryCodec, CodecError, WireEncoding, WireString};
pub use entry::{BoundaryEndpoint, ENDPOINT};
pub use link::{ControllerLink, NullLink, TraceLink};
