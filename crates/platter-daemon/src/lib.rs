//! # platter-daemon
//!
//! Serves the configured filesystem stack over the peer protocol.

pub mod server;
pub mod stack;

pub use server::{open_status, Registry, Server, ServerOptions};
pub use stack::{build_default_stack, build_registry};
