//! Non-transactional `WorkspaceEdit` applier, used by code-action paths
//! that don't need backup/rollback.

use lsp_types::WorkspaceEdit;

use crate::edits::resolve::{edits_by_uri, resolve, EditStep};
use crate::edits::transaction::{apply_resource_op, apply_text_edits_to_file};
use crate::error::Error;

#[derive(Debug, Clone)]
pub struct DirectApplyResult {
	pub applied: bool,
	pub failure_reason: Option<String>,
	/// Zero-based index of the first failed operation, mirroring the
	/// donor's `ApplyEditFailure::failed_change` (`None` for `changes`-map
	/// edits, which carry no indexed operations).
	pub failed_change: Option<u32>,
}

/// Applies every step of `edit` directly to disk, in document order,
/// stopping at the first failure. No backups are taken; callers that need
/// rollback should use [`crate::edits::transaction::EditTransactionManager`].
pub async fn apply_direct(edit: &WorkspaceEdit) -> DirectApplyResult {
	let resolved = resolve(edit);
	let by_uri = edits_by_uri(&resolved);
	let mut applied_text_uris = std::collections::HashSet::new();

	for (index, step) in resolved.steps.iter().enumerate() {
		let result = match step {
			EditStep::TextEdits { uri, .. } => {
				if !applied_text_uris.insert(uri.clone()) {
					continue;
				}
				let edits = by_uri.get(uri).cloned().unwrap_or_default();
				apply_text_edits_to_file(uri, &edits).await.map(|_| ())
			}
			EditStep::Resource(op) => apply_resource_op(op).await,
		};

		if let Err(e) = result {
			let failed_change = matches!(step, EditStep::Resource(_)).then_some(index as u32);
			return DirectApplyResult { applied: false, failure_reason: Some(render_failure(&e)), failed_change };
		}
	}

	DirectApplyResult { applied: true, failure_reason: None, failed_change: None }
}

fn render_failure(e: &Error) -> String {
	e.to_string()
}

#[cfg(test)]
mod tests {
	use super::*;
	use lsp_types::{Position, Range, TextEdit, Url};
	use std::collections::HashMap;
	use tempfile::tempdir;

	#[tokio::test]
	async fn applies_a_single_text_edit() {
		let dir = tempdir().unwrap();
		let file = dir.path().join("a.ts");
		std::fs::write(&file, "world").unwrap();
		let uri = Url::from_file_path(&file).unwrap();

		let mut changes = HashMap::new();
		changes.insert(uri, vec![TextEdit { range: Range { start: Position { line: 0, character: 0 }, end: Position { line: 0, character: 5 } }, new_text: "hello".to_string() }]);
		let edit = WorkspaceEdit { changes: Some(changes), document_changes: None, change_annotations: None };

		let result = apply_direct(&edit).await;
		assert!(result.applied);
		assert_eq!(std::fs::read_to_string(&file).unwrap(), "hello");
	}

	#[tokio::test]
	async fn failure_reports_reason_without_rollback() {
		let dir = tempdir().unwrap();
		let file = dir.path().join("a.ts");
		std::fs::write(&file, "hello world").unwrap();
		let uri = Url::from_file_path(&file).unwrap();

		let mut changes = HashMap::new();
		changes.insert(
			uri,
			vec![
				TextEdit { range: Range { start: Position { line: 0, character: 0 }, end: Position { line: 0, character: 5 } }, new_text: "a".to_string() },
				TextEdit { range: Range { start: Position { line: 0, character: 2 }, end: Position { line: 0, character: 7 } }, new_text: "b".to_string() },
			],
		);
		let edit = WorkspaceEdit { changes: Some(changes), document_changes: None, change_annotations: None };

		let result = apply_direct(&edit).await;
		assert!(!result.applied);
		assert!(result.failure_reason.is_some());
	}
}
