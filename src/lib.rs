//! Transport-agnostic client implementation of the Mumble voice-chat protocol.
//!
//! The crate maintains a live model of a Mumble server (users, channel tree,
//! membership, per-user voice transmissions) on top of caller-supplied
//! transports: the embedder decodes bytes with the wire codec, feeds typed
//! packets and timer ticks into [`MumbleClient`], and drains observable
//! events from it. No runtime or socket is owned by the core; a blocking
//! transport and a TLS connect helper are bundled for embedders that want
//! batteries.

pub mod error;
pub mod mumble;

pub use error::ClientError;
pub use mumble::{MumbleClient, MumbleConfig};
