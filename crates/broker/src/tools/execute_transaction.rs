//! `executeTransaction`: the Edit Transaction Manager's dispatchable
//! surface — atomic apply with backup/rollback, or a dry run.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use lsp_types::{Url, WorkspaceEdit};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::edits::transaction::{EditTransactionManager, FileChangeSummary, TransactionOptions};
use crate::error::Result;
use crate::pool::ConnectionPool;
use crate::tools::{Tool, ToolKind};

fn default_true() -> bool {
	true
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteTransactionParams {
	/// Workspace root every touched uri must resolve inside.
	pub workspace: PathBuf,
	pub edit: WorkspaceEdit,
	#[serde(default = "default_true")]
	pub atomic: bool,
	#[serde(default)]
	pub dry_run: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileChange {
	pub uri: Url,
	pub edits_applied: usize,
}

impl From<FileChangeSummary> for FileChange {
	fn from(f: FileChangeSummary) -> Self {
		Self { uri: f.uri, edits_applied: f.edits_applied }
	}
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteTransactionResult {
	pub transaction_id: String,
	pub files_modified: usize,
	pub total_changes: usize,
	pub per_file: Vec<FileChange>,
	pub dry_run: bool,
}

pub struct ExecuteTransactionTool;

#[async_trait]
impl Tool for ExecuteTransactionTool {
	fn name(&self) -> &'static str {
		"executeTransaction"
	}

	fn kind(&self) -> ToolKind {
		ToolKind::Mutating
	}

	async fn call(&self, _pool: &Arc<ConnectionPool>, params: Value) -> Result<Value> {
		let params: ExecuteTransactionParams = serde_json::from_value(params)?;
		let manager = EditTransactionManager::new(&params.workspace);
		let options = TransactionOptions { atomic: params.atomic, dry_run: params.dry_run };
		let result = manager.execute_transaction(&params.edit, options).await?;

		Ok(serde_json::to_value(ExecuteTransactionResult {
			transaction_id: result.transaction_id,
			files_modified: result.files_modified,
			total_changes: result.total_changes,
			per_file: result.per_file.into_iter().map(FileChange::from).collect(),
			dry_run: params.dry_run,
		})?)
	}

	/// Every uri this transaction touched, so the registry can drop the
	/// read-tool cache entries indexed against them.
	fn touched_uris(&self, params: &Value) -> Vec<String> {
		let Ok(params) = serde_json::from_value::<ExecuteTransactionParams>(params.clone()) else { return Vec::new() };
		crate::edits::resolve::resolve(&params.edit).uris().into_iter().map(|u| u.as_str().to_string()).collect()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use lsp_types::{Position, Range, TextEdit};
	use std::collections::HashMap;
	use tempfile::tempdir;

	#[tokio::test]
	async fn dry_run_reports_counts_without_mutating_disk() {
		let dir = tempdir().unwrap();
		let file = dir.path().join("a.ts");
		std::fs::write(&file, "world").unwrap();
		let uri = Url::from_file_path(&file).unwrap();

		let mut changes = HashMap::new();
		changes.insert(uri, vec![TextEdit { range: Range { start: Position { line: 0, character: 0 }, end: Position { line: 0, character: 5 } }, new_text: "hello".to_string() }]);
		let edit = WorkspaceEdit { changes: Some(changes), document_changes: None, change_annotations: None };

		let params = serde_json::json!({"workspace": dir.path(), "edit": edit, "dryRun": true});
		let pool = ConnectionPool::new(crate::config::PoolConfig::default(), HashMap::new());
		let tool = ExecuteTransactionTool;
		let value = tool.call(&pool, params).await.unwrap();
		let result: ExecuteTransactionResult = serde_json::from_value(value).unwrap();
		assert_eq!(result.files_modified, 1);
		assert_eq!(result.total_changes, 1);
		assert_eq!(std::fs::read_to_string(&file).unwrap(), "world");
	}

	#[tokio::test]
	async fn touched_uris_reports_every_uri_in_the_edit() {
		let uri = Url::parse("file:///tmp/a.ts").unwrap();
		let mut changes = HashMap::new();
		changes.insert(uri.clone(), vec![TextEdit { range: Range { start: Position { line: 0, character: 0 }, end: Position { line: 0, character: 1 } }, new_text: "x".to_string() }]);
		let edit = WorkspaceEdit { changes: Some(changes), document_changes: None, change_annotations: None };
		let params = serde_json::json!({"workspace": "/tmp", "edit": edit});

		let tool = ExecuteTransactionTool;
		assert_eq!(tool.touched_uris(&params), vec![uri.as_str().to_string()]);
	}
}
