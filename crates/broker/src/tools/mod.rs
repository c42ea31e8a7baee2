//! Tool dispatch layer: one validated `(params) -> result` function per
//! code-intelligence tool, registered by name for the CLI/serve loop.

pub mod apply_edit;
pub mod code_action;
pub mod code_intelligence;
pub mod execute_transaction;
pub mod find_symbols;
pub mod find_usages;
pub mod navigate;
pub mod related_apis;
pub mod symbol_context;

mod execute_command;
mod shared;

pub use execute_command::{ExecuteCommandParams, ExecuteCommandResult, ExecuteCommandTool};
pub use shared::{grep_fallback, one_line_preview};

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::pool::ConnectionPool;

/// Whether a tool's results are safe to memoize. Only `ReadOnly` tools are
/// eligible for the shared `Cache`; `Mutating` tools bypass it and must
/// invalidate it on completion instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolKind {
	ReadOnly,
	Mutating,
}

/// One dispatchable tool. `params`/result travel as `serde_json::Value` at
/// this boundary so the registry stays uniform; each implementation owns
/// its own typed (de)serialization.
#[async_trait]
pub trait Tool: Send + Sync {
	fn name(&self) -> &'static str;
	fn kind(&self) -> ToolKind;
	async fn call(&self, pool: &Arc<ConnectionPool>, params: Value) -> Result<Value>;

	/// Every uri a `Mutating` call with these params will touch, so the
	/// registry can drop the affected entries from every read-only tool's
	/// cache after the call succeeds. `ReadOnly` tools never need this.
	/// Tools whose edit is only discovered server-side (e.g.
	/// `applyCodeAction`) cannot report this from params alone and keep the
	/// default empty list — their cached siblings fall back to TTL expiry.
	fn touched_uris(&self, _params: &Value) -> Vec<String> {
		Vec::new()
	}

	/// Drops this tool's own cache entries indexed under `uri`, if it caches
	/// at all.
	fn invalidate(&self, _uri: &str) {}
}

/// Name -> boxed tool. Built once at startup and shared by the CLI's
/// subcommand dispatch and its `serve` JSON-RPC loop.
#[derive(Default)]
pub struct ToolRegistry {
	tools: HashMap<&'static str, Box<dyn Tool>>,
}

impl ToolRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn register(&mut self, tool: Box<dyn Tool>) {
		self.tools.insert(tool.name(), tool);
	}

	pub fn get(&self, name: &str) -> Option<&dyn Tool> {
		self.tools.get(name).map(|b| b.as_ref())
	}

	pub fn names(&self) -> Vec<&'static str> {
		let mut names: Vec<_> = self.tools.keys().copied().collect();
		names.sort_unstable();
		names
	}

	pub async fn execute(&self, name: &str, pool: &Arc<ConnectionPool>, params: Value) -> Result<Value> {
		let tool = self.get(name).ok_or_else(|| crate::error::Error::NotSupported(format!("unknown tool: {name}")))?;
		let touched = if tool.kind() == ToolKind::Mutating { tool.touched_uris(&params) } else { Vec::new() };
		let result = tool.call(pool, params).await?;
		if !touched.is_empty() {
			self.invalidate_uris(&touched);
		}
		Ok(result)
	}

	/// Drops every read-only tool's cache entries for `uris`, called after a
	/// `Mutating` tool reports which uris it touched.
	pub fn invalidate_uris(&self, uris: &[String]) {
		for tool in self.tools.values() {
			for uri in uris {
				tool.invalidate(uri);
			}
		}
	}

	/// Dispatches a `{ batch: [ {tool, params}, ... ] }` envelope by running
	/// `execute` over each entry in order and collecting the results,
	/// per spec.md §6's batch routing.
	pub async fn execute_batch(&self, pool: &Arc<ConnectionPool>, requests: Vec<(String, Value)>) -> Vec<Result<Value>> {
		let mut out = Vec::with_capacity(requests.len());
		for (name, params) in requests {
			out.push(self.execute(&name, pool, params).await);
		}
		out
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use parking_lot::Mutex;

	struct FakeReadOnly {
		invalidated: Arc<Mutex<Vec<String>>>,
	}

	#[async_trait]
	impl Tool for FakeReadOnly {
		fn name(&self) -> &'static str {
			"fakeReadOnly"
		}
		fn kind(&self) -> ToolKind {
			ToolKind::ReadOnly
		}
		async fn call(&self, _pool: &Arc<ConnectionPool>, _params: Value) -> Result<Value> {
			Ok(Value::Null)
		}
		fn invalidate(&self, uri: &str) {
			self.invalidated.lock().push(uri.to_string());
		}
	}

	struct FakeMutator;

	#[async_trait]
	impl Tool for FakeMutator {
		fn name(&self) -> &'static str {
			"fakeMutator"
		}
		fn kind(&self) -> ToolKind {
			ToolKind::Mutating
		}
		async fn call(&self, _pool: &Arc<ConnectionPool>, _params: Value) -> Result<Value> {
			Ok(Value::Null)
		}
		fn touched_uris(&self, params: &Value) -> Vec<String> {
			params.get("uri").and_then(|v| v.as_str()).map(|s| vec![s.to_string()]).unwrap_or_default()
		}
	}

	#[test]
	fn names_are_sorted() {
		let mut registry = ToolRegistry::new();
		registry.register(Box::new(FakeMutator));
		let invalidated = Arc::new(Mutex::new(Vec::new()));
		registry.register(Box::new(FakeReadOnly { invalidated: invalidated.clone() }));
		assert_eq!(registry.names(), vec!["fakeMutator", "fakeReadOnly"]);
	}

	#[tokio::test]
	async fn executing_a_mutating_tool_invalidates_reported_uris() {
		let mut registry = ToolRegistry::new();
		let invalidated = Arc::new(Mutex::new(Vec::new()));
		registry.register(Box::new(FakeReadOnly { invalidated: invalidated.clone() }));
		registry.register(Box::new(FakeMutator));

		let pool = ConnectionPool::new(crate::config::PoolConfig::default(), std::collections::HashMap::new());
		registry.execute("fakeMutator", &pool, serde_json::json!({"uri": "file:///a.rs"})).await.unwrap();

		assert_eq!(invalidated.lock().as_slice(), &["file:///a.rs".to_string()]);
	}

	#[tokio::test]
	async fn executing_a_mutating_tool_with_no_touched_uris_skips_invalidation() {
		let mut registry = ToolRegistry::new();
		let invalidated = Arc::new(Mutex::new(Vec::new()));
		registry.register(Box::new(FakeReadOnly { invalidated: invalidated.clone() }));
		registry.register(Box::new(FakeMutator));

		let pool = ConnectionPool::new(crate::config::PoolConfig::default(), std::collections::HashMap::new());
		registry.execute("fakeMutator", &pool, serde_json::json!({})).await.unwrap();

		assert!(invalidated.lock().is_empty());
	}

	#[tokio::test]
	async fn execute_batch_runs_every_request_in_order() {
		let mut registry = ToolRegistry::new();
		registry.register(Box::new(FakeMutator));
		let pool = ConnectionPool::new(crate::config::PoolConfig::default(), std::collections::HashMap::new());
		let requests = vec![("fakeMutator".to_string(), serde_json::json!({})), ("missing".to_string(), serde_json::json!({}))];
		let results = registry.execute_batch(&pool, requests).await;
		assert!(results[0].is_ok());
		assert!(results[1].is_err());
	}
}

/// Builds a registry with every code-intelligence tool.
pub fn default_registry() -> ToolRegistry {
	let mut registry = ToolRegistry::new();
	registry.register(Box::new(navigate::NavigateTool::default()));
	registry.register(Box::new(find_usages::FindUsagesTool));
	registry.register(Box::new(find_symbols::FindSymbolsTool::default()));
	registry.register(Box::new(code_intelligence::CodeIntelligenceTool::default()));
	registry.register(Box::new(code_action::ApplyCodeActionTool));
	registry.register(Box::new(apply_edit::ApplyEditTool));
	registry.register(Box::new(symbol_context::SymbolContextTool));
	registry.register(Box::new(execute_command::ExecuteCommandTool));
	registry.register(Box::new(related_apis::RelatedApisTool));
	registry.register(Box::new(execute_transaction::ExecuteTransactionTool));
	registry
}
