//! stackguard: guarded command execution and state hand-off for the media
//! stack deployment scripts.
//!
//! The core lives in [`stackguard_runner`]; this crate adds the remote host
//! checks used by the `stackguard` binary.

pub mod remote;

pub use remote::{RemoteError, RemoteTarget, check_ssh, open_session};
