//! Asynchronous LSP base-protocol transport and client session.
//!
//! This crate knows nothing about workspaces, language detection, or pools
//! of servers — it owns exactly one subprocess per [`client::Client`] and
//! speaks LSP 3.x over its stdio.

pub mod client;
pub mod error;
pub mod transport;
pub mod types;
pub mod wire;

pub use client::{Client, ClientState, ServerRequestHandler, TransportEvent};
pub use error::{Error, Result};
pub use types::ServerConfig;

pub use lsp_types;
