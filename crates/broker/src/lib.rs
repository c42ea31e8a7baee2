//! Multi-language code-intelligence broker: drives LSP server subprocesses
//! behind a small uniform tool surface.

pub mod cache;
pub mod config;
pub mod edits;
pub mod error;
pub mod pool;
pub mod tools;

pub use cache::Cache;
pub use config::BrokerConfig;
pub use error::{Error, ErrorCode, Result};
pub use pool::ConnectionPool;
pub use tools::{Tool, ToolKind, ToolRegistry};
