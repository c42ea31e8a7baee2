//! Human-readable summary and unified-diff rendering for a `WorkspaceEdit`.
//! Read-only: reads each touched file's current content to render a
//! before/after diff, but never mutates disk.

use lsp_types::WorkspaceEdit;
use similar::TextDiff;

use crate::edits::resolve::{edits_by_uri, resolve, EditStep, ResourceOperation};
use crate::edits::transaction::{apply_text_edits, uri_to_path};

#[derive(Debug, Clone)]
pub struct EditPreview {
	/// `"N edits in M files"`.
	pub summary: String,
	pub unified_diff: String,
}

/// Renders `edit` against the files currently on disk under `workspace_root`.
/// A missing file diffs against an empty "before"; resource operations
/// render pseudo-diff headers instead of a line diff.
pub async fn render(edit: &WorkspaceEdit) -> EditPreview {
	let resolved = resolve(edit);
	let by_uri = edits_by_uri(&resolved);
	let mut sections = Vec::new();
	let mut seen_text_uris = std::collections::HashSet::new();

	for step in &resolved.steps {
		match step {
			EditStep::TextEdits { uri, .. } => {
				if !seen_text_uris.insert(uri.clone()) {
					continue;
				}
				let edits = by_uri.get(uri).cloned().unwrap_or_default();
				sections.push(render_text_section(uri, &edits).await);
			}
			EditStep::Resource(op) => sections.push(render_resource_section(op)),
		}
	}

	let total_changes = resolved.total_changes();
	let files = resolved.files_modified();
	let summary = format!("{} edit{} in {} file{}", total_changes, if total_changes == 1 { "" } else { "s" }, files, if files == 1 { "" } else { "s" });

	EditPreview { summary, unified_diff: sections.join("\n") }
}

async fn render_text_section(uri: &lsp_types::Url, edits: &[lsp_types::TextEdit]) -> String {
	let path = match uri_to_path(uri) {
		Ok(p) => p,
		Err(_) => return format!("--- {uri} (unreadable uri)"),
	};
	let original = tokio::fs::read_to_string(&path).await.unwrap_or_default();
	let updated = apply_text_edits(&original, edits).unwrap_or_else(|_| original.clone());

	let label = path.display().to_string();
	let diff = TextDiff::from_lines(&original, &updated);
	diff.unified_diff().context_radius(3).header(&format!("a/{label}"), &format!("b/{label}")).to_string()
}

fn render_resource_section(op: &ResourceOperation) -> String {
	match op {
		ResourceOperation::Create { uri, .. } => format!("--- /dev/null\n+++ b/{uri} (new file)"),
		ResourceOperation::Delete { uri, .. } => format!("--- a/{uri} (deleted)\n+++ /dev/null"),
		ResourceOperation::Rename { old_uri, new_uri, .. } => format!("--- a/{old_uri}\n+++ b/{new_uri} (renamed)"),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use lsp_types::{Position, Range, TextEdit, Url};
	use std::collections::HashMap;
	use tempfile::tempdir;

	#[tokio::test]
	async fn summary_counts_edits_and_files() {
		let dir = tempdir().unwrap();
		let file = dir.path().join("a.ts");
		std::fs::write(&file, "world\n").unwrap();
		let uri = Url::from_file_path(&file).unwrap();

		let mut changes = HashMap::new();
		changes.insert(uri, vec![TextEdit { range: Range { start: Position { line: 0, character: 0 }, end: Position { line: 0, character: 5 } }, new_text: "hello".to_string() }]);
		let edit = WorkspaceEdit { changes: Some(changes), document_changes: None, change_annotations: None };

		let preview = render(&edit).await;
		assert_eq!(preview.summary, "1 edit in 1 file");
		assert!(preview.unified_diff.contains("-world"));
		assert!(preview.unified_diff.contains("+hello"));
	}
}
