//! Normalizes a wire [`WorkspaceEdit`]'s tagged-union shapes
//! (`documentChanges` as either a flat edit list or an operation list, vs
//! the legacy `changes` map) into one ordered list of steps. Shared by the
//! transaction manager, the non-transactional applier, and the diff
//! renderer instead of being reimplemented three times (SPEC_FULL.md §2).

use std::collections::HashMap;

use lsp_types::{DocumentChangeOperation, DocumentChanges, ResourceOp, TextDocumentEdit, TextEdit, Url, WorkspaceEdit};

#[derive(Debug, Clone)]
pub enum ResourceOperation {
	Create { uri: Url, overwrite: bool, ignore_if_exists: bool },
	Rename { old_uri: Url, new_uri: Url, overwrite: bool, ignore_if_exists: bool },
	Delete { uri: Url, recursive: bool, ignore_if_not_exists: bool },
}

#[derive(Debug, Clone)]
pub enum EditStep {
	TextEdits { uri: Url, edits: Vec<TextEdit> },
	Resource(ResourceOperation),
}

#[derive(Debug, Clone, Default)]
pub struct ResolvedEdit {
	pub steps: Vec<EditStep>,
}

impl ResolvedEdit {
	/// All uris touched by this edit, in step order, de-duplicated by first
	/// occurrence.
	pub fn uris(&self) -> Vec<Url> {
		let mut seen = Vec::new();
		for step in &self.steps {
			match step {
				EditStep::TextEdits { uri, .. } => push_unique(&mut seen, uri.clone()),
				EditStep::Resource(ResourceOperation::Create { uri, .. } | ResourceOperation::Delete { uri, .. }) => push_unique(&mut seen, uri.clone()),
				EditStep::Resource(ResourceOperation::Rename { old_uri, new_uri, .. }) => {
					push_unique(&mut seen, old_uri.clone());
					push_unique(&mut seen, new_uri.clone());
				}
			}
		}
		seen
	}

	pub fn total_changes(&self) -> usize {
		self.steps
			.iter()
			.map(|s| match s {
				EditStep::TextEdits { edits, .. } => edits.len(),
				EditStep::Resource(_) => 1,
			})
			.sum()
	}

	pub fn files_modified(&self) -> usize {
		self.uris().len()
	}
}

fn push_unique(seen: &mut Vec<Url>, uri: Url) {
	if !seen.contains(&uri) {
		seen.push(uri);
	}
}

fn text_document_edit_step(edit: TextDocumentEdit) -> EditStep {
	let edits = edit
		.edits
		.into_iter()
		.map(|e| match e {
			lsp_types::OneOf::Left(text_edit) => text_edit,
			lsp_types::OneOf::Right(annotated) => annotated.text_edit,
		})
		.collect();
	EditStep::TextEdits { uri: edit.text_document.uri, edits }
}

fn resource_op_step(op: ResourceOp) -> ResourceOperation {
	match op {
		ResourceOp::Create(create) => {
			let options = create.options.unwrap_or_default();
			ResourceOperation::Create { uri: create.uri, overwrite: options.overwrite.unwrap_or(false), ignore_if_exists: options.ignore_if_exists.unwrap_or(false) }
		}
		ResourceOp::Rename(rename) => {
			let options = rename.options.unwrap_or_default();
			ResourceOperation::Rename { old_uri: rename.old_uri, new_uri: rename.new_uri, overwrite: options.overwrite.unwrap_or(false), ignore_if_exists: options.ignore_if_exists.unwrap_or(false) }
		}
		ResourceOp::Delete(delete) => {
			let options = delete.options.unwrap_or_default();
			ResourceOperation::Delete { uri: delete.uri, recursive: options.recursive.unwrap_or(false), ignore_if_not_exists: options.ignore_if_not_exists.unwrap_or(false) }
		}
	}
}

/// `documentChanges` takes precedence over `changes` per the LSP spec
/// (a compliant server never sends both for the same workspace edit; if it
/// does, `documentChanges` wins since it's strictly more expressive).
pub fn resolve(edit: &WorkspaceEdit) -> ResolvedEdit {
	let mut steps = Vec::new();

	match &edit.document_changes {
		Some(DocumentChanges::Edits(edits)) => {
			for edit in edits.clone() {
				steps.push(text_document_edit_step(edit));
			}
		}
		Some(DocumentChanges::Operations(ops)) => {
			for op in ops.clone() {
				match op {
					DocumentChangeOperation::Edit(edit) => steps.push(text_document_edit_step(edit)),
					DocumentChangeOperation::Op(op) => steps.push(EditStep::Resource(resource_op_step(op))),
				}
			}
		}
		None => {
			if let Some(changes) = &edit.changes {
				let mut ordered: Vec<(&Url, &Vec<TextEdit>)> = changes.iter().collect();
				ordered.sort_by_key(|(uri, _)| uri.as_str().to_string());
				for (uri, edits) in ordered {
					steps.push(EditStep::TextEdits { uri: uri.clone(), edits: edits.clone() });
				}
			}
		}
	}

	ResolvedEdit { steps }
}

/// Groups a resolved edit's `TextEdits` steps by uri, merging duplicates —
/// used by the transaction manager, which applies all edits for one uri in
/// a single pass.
pub fn edits_by_uri(resolved: &ResolvedEdit) -> HashMap<Url, Vec<TextEdit>> {
	let mut map: HashMap<Url, Vec<TextEdit>> = HashMap::new();
	for step in &resolved.steps {
		if let EditStep::TextEdits { uri, edits } = step {
			map.entry(uri.clone()).or_default().extend(edits.clone());
		}
	}
	map
}

#[cfg(test)]
mod tests {
	use super::*;
	use lsp_types::{Position, Range};
	use std::collections::HashMap as StdHashMap;

	fn url(s: &str) -> Url {
		Url::parse(s).unwrap()
	}

	fn text_edit(line: u32, new_text: &str) -> TextEdit {
		TextEdit { range: Range { start: Position { line, character: 0 }, end: Position { line, character: 5 } }, new_text: new_text.to_string() }
	}

	#[test]
	fn changes_map_resolves_to_text_edit_steps() {
		let mut changes = StdHashMap::new();
		changes.insert(url("file:///a.ts"), vec![text_edit(0, "hello")]);
		let edit = WorkspaceEdit { changes: Some(changes), document_changes: None, change_annotations: None };
		let resolved = resolve(&edit);
		assert_eq!(resolved.files_modified(), 1);
		assert_eq!(resolved.total_changes(), 1);
	}

	#[test]
	fn document_changes_operations_preserve_order() {
		let new_uri = url("file:///new.ts");
		let ops = vec![
			DocumentChangeOperation::Op(ResourceOp::Create(lsp_types::CreateFile { uri: new_uri.clone(), options: None, annotation_id: None })),
			DocumentChangeOperation::Edit(TextDocumentEdit {
				text_document: lsp_types::OptionalVersionedTextDocumentIdentifier { uri: new_uri.clone(), version: None },
				edits: vec![lsp_types::OneOf::Left(text_edit(0, "export const X=1"))],
			}),
		];
		let edit = WorkspaceEdit { changes: None, document_changes: Some(DocumentChanges::Operations(ops)), change_annotations: None };
		let resolved = resolve(&edit);
		assert_eq!(resolved.steps.len(), 2);
		assert!(matches!(resolved.steps[0], EditStep::Resource(ResourceOperation::Create { .. })));
		assert!(matches!(resolved.steps[1], EditStep::TextEdits { .. }));
	}
}
