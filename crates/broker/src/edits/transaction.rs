//! The Edit Transaction Manager: applies a [`WorkspaceEdit`] with
//! all-or-nothing semantics, backup, and rollback.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use lsp_types::{Position, TextEdit, Url, WorkspaceEdit};
use uuid::Uuid;

use crate::edits::resolve::{edits_by_uri, resolve, EditStep, ResolvedEdit, ResourceOperation};
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy)]
pub struct TransactionOptions {
	pub atomic: bool,
	pub dry_run: bool,
}

impl Default for TransactionOptions {
	fn default() -> Self {
		Self { atomic: true, dry_run: false }
	}
}

/// `(uri, originalContent, originalExists)` captured before any writes so a
/// failed step can restore every file touched so far.
struct FileBackup {
	original_content: Option<Vec<u8>>,
	original_exists: bool,
}

#[derive(Debug, Clone)]
pub struct FileChangeSummary {
	pub uri: Url,
	pub edits_applied: usize,
}

#[derive(Debug, Clone)]
pub struct TransactionResult {
	pub transaction_id: String,
	pub files_modified: usize,
	pub total_changes: usize,
	pub per_file: Vec<FileChangeSummary>,
}

#[derive(Debug, Clone)]
pub struct DryRunResult {
	pub files_modified: usize,
	pub total_changes: usize,
	pub per_file: Vec<FileChangeSummary>,
}

/// Applies `WorkspaceEdit`s against the filesystem under `workspace_root`,
/// with backup-and-rollback on atomic failure. One instance is reusable
/// across calls; it holds no per-transaction state between calls.
pub struct EditTransactionManager {
	workspace_root: PathBuf,
}

impl EditTransactionManager {
	pub fn new(workspace_root: impl Into<PathBuf>) -> Self {
		Self { workspace_root: workspace_root.into() }
	}

	pub fn dry_run(&self, edit: &WorkspaceEdit) -> Result<DryRunResult> {
		let resolved = resolve(edit);
		let per_file = per_file_counts(&resolved);
		Ok(DryRunResult { files_modified: resolved.files_modified(), total_changes: resolved.total_changes(), per_file })
	}

	/// Runs the full apply algorithm. `dry_run` short-circuits before any
	/// backup or mutation; otherwise every uri gets a [`FileBackup`] before
	/// the first byte is written, so atomic failures can always be rolled
	/// back.
	pub async fn execute_transaction(&self, edit: &WorkspaceEdit, options: TransactionOptions) -> Result<TransactionResult> {
		let transaction_id = Uuid::new_v4().to_string();
		let resolved = resolve(edit);

		if options.dry_run {
			let dry = self.dry_run(edit)?;
			return Ok(TransactionResult { transaction_id, files_modified: dry.files_modified, total_changes: dry.total_changes, per_file: dry.per_file });
		}

		for uri in resolved.uris() {
			self.validate_in_workspace(&uri)?;
		}
		self.pre_validate_creates(&resolved)?;

		let mut backups: HashMap<Url, FileBackup> = HashMap::new();
		for uri in resolved.uris() {
			let backup = self.backup_file(&uri).await?;
			backups.insert(uri, backup);
		}

		match self.apply_steps(&resolved).await {
			Ok(per_file) => Ok(TransactionResult {
				transaction_id,
				files_modified: per_file.len(),
				total_changes: per_file.iter().map(|f| f.edits_applied).sum(),
				per_file,
			}),
			Err(apply_err) => {
				if !options.atomic {
					return Err(Error::TransactionFailed { reason: apply_err.to_string(), rolled_back: false });
				}
				match self.rollback(&backups).await {
					Ok(()) => Err(Error::TransactionFailed { reason: apply_err.to_string(), rolled_back: true }),
					Err(rollback_errs) => Err(Error::RollbackFailed { reason: rollback_errs, cause: apply_err.to_string() }),
				}
			}
		}
	}

	fn validate_in_workspace(&self, uri: &Url) -> Result<()> {
		let path = uri_to_path(uri)?;
		let root = self.workspace_root.canonicalize().unwrap_or_else(|_| self.workspace_root.clone());
		let candidate_parent = path.parent().map(Path::to_path_buf).unwrap_or_else(|| path.clone());
		let canonical_parent = candidate_parent.canonicalize().unwrap_or(candidate_parent);
		if !canonical_parent.starts_with(&root) {
			return Err(Error::InvalidParams(format!("uri escapes workspace root: {uri}")));
		}
		Ok(())
	}

	fn pre_validate_creates(&self, resolved: &ResolvedEdit) -> Result<()> {
		for step in &resolved.steps {
			if let EditStep::Resource(ResourceOperation::Create { uri, .. }) = step {
				let path = uri_to_path(uri)?;
				let parent = path.parent().ok_or_else(|| Error::InvalidParams(format!("create target has no parent: {uri}")))?;
				if !parent.exists() {
					return Err(Error::InvalidParams(format!("parent directory does not exist for create: {}", parent.display())));
				}
			}
		}
		Ok(())
	}

	async fn backup_file(&self, uri: &Url) -> Result<FileBackup> {
		let path = uri_to_path(uri)?;
		match tokio::fs::read(&path).await {
			Ok(content) => Ok(FileBackup { original_content: Some(content), original_exists: true }),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(FileBackup { original_content: None, original_exists: false }),
			Err(e) => Err(Error::Io(e)),
		}
	}

	async fn apply_steps(&self, resolved: &ResolvedEdit) -> Result<Vec<FileChangeSummary>> {
		let mut per_file = Vec::new();
		let by_uri = edits_by_uri(resolved);

		// Text edits for one uri are merged and applied in one pass even if
		// the uri appears in several steps; resource ops run in document
		// order, interleaved with any text-edit step at that position.
		let mut applied_text_uris = std::collections::HashSet::new();

		for step in &resolved.steps {
			match step {
				EditStep::TextEdits { uri, .. } => {
					if applied_text_uris.contains(uri) {
						continue;
					}
					applied_text_uris.insert(uri.clone());
					let edits = by_uri.get(uri).cloned().unwrap_or_default();
					let applied = self.apply_text_edits_to_file(uri, &edits).await?;
					per_file.push(FileChangeSummary { uri: uri.clone(), edits_applied: applied });
				}
				EditStep::Resource(op) => {
					apply_resource_op(op).await?;
					per_file.push(FileChangeSummary { uri: resource_primary_uri(op), edits_applied: 1 });
				}
			}
		}

		Ok(per_file)
	}

	async fn apply_text_edits_to_file(&self, uri: &Url, edits: &[TextEdit]) -> Result<usize> {
		apply_text_edits_to_file(uri, edits).await
	}

	/// Best-effort restoration of every backed-up file. Collects per-file
	/// errors instead of stopping at the first one, so a partial rollback
	/// still restores everything it can.
	async fn rollback(&self, backups: &HashMap<Url, FileBackup>) -> std::result::Result<(), String> {
		let mut errors = Vec::new();
		for (uri, backup) in backups {
			let path = match uri_to_path(uri) {
				Ok(p) => p,
				Err(e) => {
					errors.push(format!("{uri}: {e}"));
					continue;
				}
			};
			let result = if backup.original_exists {
				let content = backup.original_content.clone().unwrap_or_default();
				async {
					if let Some(parent) = path.parent() {
						tokio::fs::create_dir_all(parent).await?;
					}
					tokio::fs::write(&path, content).await
				}
				.await
			} else {
				match tokio::fs::remove_file(&path).await {
					Ok(()) => Ok(()),
					Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
					Err(e) => Err(e),
				}
			};
			if let Err(e) = result {
				errors.push(format!("{uri}: {e}"));
			}
		}
		if errors.is_empty() {
			Ok(())
		} else {
			Err(errors.join("; "))
		}
	}
}

/// Reads `path`, applies `edits`, writes it back. Shared by the
/// transactional and non-transactional (`applier.rs`) apply paths.
pub(crate) async fn apply_text_edits_to_file(uri: &Url, edits: &[TextEdit]) -> Result<usize> {
	let path = uri_to_path(uri)?;
	let original = match tokio::fs::read_to_string(&path).await {
		Ok(content) => content,
		Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
		Err(e) => return Err(Error::Io(e)),
	};
	let applied = apply_text_edits(&original, edits)?;
	tokio::fs::write(&path, applied).await.map_err(Error::Io)?;
	Ok(edits.len())
}

/// Create/rename/delete, without any backup bookkeeping — the primitive
/// `applier.rs`'s non-transactional path shares with the transaction
/// manager's `apply_steps`.
pub(crate) async fn apply_resource_op(op: &ResourceOperation) -> Result<()> {
	match op {
		ResourceOperation::Create { uri, overwrite, ignore_if_exists } => {
			let path = uri_to_path(uri)?;
			if path.exists() {
				if *ignore_if_exists {
					return Ok(());
				}
				if !overwrite {
					return Err(Error::InvalidParams(format!("create target already exists: {}", path.display())));
				}
			}
			if let Some(parent) = path.parent() {
				tokio::fs::create_dir_all(parent).await.map_err(Error::Io)?;
			}
			tokio::fs::write(&path, b"").await.map_err(Error::Io)?;
			Ok(())
		}
		ResourceOperation::Delete { uri, ignore_if_not_exists, .. } => {
			let path = uri_to_path(uri)?;
			match tokio::fs::remove_file(&path).await {
				Ok(()) => Ok(()),
				Err(e) if e.kind() == std::io::ErrorKind::NotFound && *ignore_if_not_exists => Ok(()),
				Err(e) => Err(Error::Io(e)),
			}
		}
		ResourceOperation::Rename { old_uri, new_uri, overwrite, ignore_if_exists } => {
			let old_path = uri_to_path(old_uri)?;
			let new_path = uri_to_path(new_uri)?;
			if new_path.exists() {
				if *ignore_if_exists {
					return Ok(());
				}
				if !overwrite {
					return Err(Error::InvalidParams(format!("rename target already exists: {}", new_path.display())));
				}
			}
			if let Some(parent) = new_path.parent() {
				tokio::fs::create_dir_all(parent).await.map_err(Error::Io)?;
			}
			tokio::fs::rename(&old_path, &new_path).await.map_err(Error::Io)?;
			Ok(())
		}
	}
}

fn resource_primary_uri(op: &ResourceOperation) -> Url {
	match op {
		ResourceOperation::Create { uri, .. } | ResourceOperation::Delete { uri, .. } => uri.clone(),
		ResourceOperation::Rename { new_uri, .. } => new_uri.clone(),
	}
}

fn per_file_counts(resolved: &ResolvedEdit) -> Vec<FileChangeSummary> {
	let by_uri = edits_by_uri(resolved);
	let mut per_file = Vec::new();
	let mut seen = std::collections::HashSet::new();
	for step in &resolved.steps {
		let uri = match step {
			EditStep::TextEdits { uri, .. } => uri.clone(),
			EditStep::Resource(op) => resource_primary_uri(op),
		};
		if !seen.insert(uri.clone()) {
			continue;
		}
		let count = by_uri.get(&uri).map(Vec::len).unwrap_or(1);
		per_file.push(FileChangeSummary { uri, edits_applied: count });
	}
	per_file
}

pub fn uri_to_path(uri: &Url) -> Result<PathBuf> {
	if uri.scheme() != "file" {
		return Err(Error::InvalidParams(format!("non-local uri not supported: {uri}")));
	}
	uri.to_file_path().map_err(|()| Error::InvalidParams(format!("invalid file uri: {uri}")))
}

/// Converts a UTF-16-code-unit LSP [`Position`] within `line` (the line's
/// text, terminator stripped) into a byte offset. Returns `None` if
/// `character` falls outside the line's length.
fn utf16_position_to_byte_offset(line: &str, character: u32) -> Option<usize> {
	let mut utf16_count = 0u32;
	let mut byte_offset = 0usize;
	if character == 0 {
		return Some(0);
	}
	for ch in line.chars() {
		if utf16_count == character {
			return Some(byte_offset);
		}
		utf16_count += ch.len_utf16() as u32;
		byte_offset += ch.len_utf8();
	}
	if utf16_count == character {
		Some(byte_offset)
	} else {
		None
	}
}

/// Converts an LSP [`Position`] into an absolute byte offset into `content`,
/// validating it against the file's actual line/column bounds.
fn position_to_offset(content: &str, lines: &[&str], pos: Position) -> Result<usize> {
	let line_idx = pos.line as usize;
	if line_idx >= lines.len() {
		// One past the last line, column 0, is a valid EOF marker only if it
		// lands exactly at the end of the content (no trailing newline case).
		if line_idx == lines.len() && pos.character == 0 {
			return Ok(content.len());
		}
		return Err(Error::InvalidParams(format!("position line {} out of bounds ({} lines)", pos.line, lines.len())));
	}

	let line_start: usize = lines[..line_idx].iter().map(|l| l.len()).sum();
	let line = lines[line_idx];
	let stripped = line.trim_end_matches(['\n', '\r']);
	let within = utf16_position_to_byte_offset(stripped, pos.character).ok_or_else(|| Error::InvalidParams(format!("position character {} out of bounds on line {}", pos.character, pos.line)))?;
	Ok(line_start + within)
}

/// Applies `edits` to `content`: sorts strictly descending by
/// `(startLine, startChar)`, rejects overlap, and applies in that order so
/// earlier (in document order) edits are unaffected by later ones'
/// position shifts.
pub fn apply_text_edits(content: &str, edits: &[TextEdit]) -> Result<String> {
	if edits.is_empty() {
		return Ok(content.to_string());
	}

	let lines: Vec<&str> = split_inclusive_lines(content);

	let mut resolved: Vec<(usize, usize, &str)> = Vec::with_capacity(edits.len());
	for edit in edits {
		let start = position_to_offset(content, &lines, edit.range.start)?;
		let end = position_to_offset(content, &lines, edit.range.end)?;
		if end < start {
			return Err(Error::InvalidParams("edit end position precedes start position".to_string()));
		}
		resolved.push((start, end, edit.new_text.as_str()));
	}

	resolved.sort_by(|a, b| b.0.cmp(&a.0).then(b.1.cmp(&a.1)));

	for pair in resolved.windows(2) {
		let (cur_start, _, _) = pair[0];
		let (_, next_end, _) = pair[1];
		if next_end > cur_start {
			return Err(Error::InvalidParams("overlapping edits".to_string()));
		}
	}

	let mut buf = content.to_string();
	for (start, end, new_text) in resolved {
		buf.replace_range(start..end, new_text);
	}
	Ok(buf)
}

fn split_inclusive_lines(content: &str) -> Vec<&str> {
	if content.is_empty() {
		return vec![""];
	}
	content.split_inclusive('\n').collect()
}

#[cfg(test)]
mod tests {
	use super::*;
	use lsp_types::Range;
	use std::collections::HashMap as StdHashMap;
	use tempfile::tempdir;

	fn pos(line: u32, character: u32) -> Position {
		Position { line, character }
	}

	fn edit(sl: u32, sc: u32, el: u32, ec: u32, text: &str) -> TextEdit {
		TextEdit { range: Range { start: pos(sl, sc), end: pos(el, ec) }, new_text: text.to_string() }
	}

	#[test]
	fn single_edit_replaces_range() {
		let out = apply_text_edits("world", &[edit(0, 0, 0, 5, "hello")]).unwrap();
		assert_eq!(out, "hello");
	}

	#[test]
	fn descending_order_keeps_earlier_offsets_valid() {
		let content = "line one\nline two\nline three\n";
		let edits = vec![edit(0, 0, 0, 4, "LINE"), edit(2, 0, 2, 4, "LINE")];
		let out = apply_text_edits(content, &edits).unwrap();
		assert_eq!(out, "LINE one\nline two\nLINE three\n");
	}

	#[test]
	fn overlapping_edits_are_rejected() {
		let edits = vec![edit(0, 0, 0, 5, "a"), edit(0, 2, 0, 7, "b")];
		let err = apply_text_edits("hello world", &edits).unwrap_err();
		assert!(matches!(err, Error::InvalidParams(_)));
	}

	#[test]
	fn edit_at_last_character_of_last_line_without_trailing_newline() {
		let content = "abc";
		let out = apply_text_edits(content, &[edit(0, 3, 0, 3, "!")]).unwrap();
		assert_eq!(out, "abc!");
	}

	#[test]
	fn multi_line_edit_spanning_eof() {
		let content = "a\nb";
		let out = apply_text_edits(content, &[edit(0, 1, 1, 1, "X")]).unwrap();
		assert_eq!(out, "aX");
	}

	#[test]
	fn out_of_bounds_position_is_rejected() {
		let err = apply_text_edits("short", &[edit(5, 0, 5, 1, "x")]).unwrap_err();
		assert!(matches!(err, Error::InvalidParams(_)));
	}

	#[tokio::test]
	async fn dry_run_reports_counts_without_touching_disk() {
		let dir = tempdir().unwrap();
		let file = dir.path().join("a.ts");
		std::fs::write(&file, "world").unwrap();
		let uri = Url::from_file_path(&file).unwrap();

		let mut changes = StdHashMap::new();
		changes.insert(uri, vec![edit(0, 0, 0, 5, "hello")]);
		let workspace_edit = WorkspaceEdit { changes: Some(changes), document_changes: None, change_annotations: None };

		let manager = EditTransactionManager::new(dir.path());
		let result = manager.execute_transaction(&workspace_edit, TransactionOptions { atomic: true, dry_run: true }).await.unwrap();
		assert_eq!(result.files_modified, 1);
		assert_eq!(result.total_changes, 1);
		assert_eq!(std::fs::read_to_string(&file).unwrap(), "world");
	}

	#[tokio::test]
	async fn applies_single_edit_to_disk() {
		let dir = tempdir().unwrap();
		let file = dir.path().join("x.ts");
		std::fs::write(&file, "world").unwrap();
		let uri = Url::from_file_path(&file).unwrap();

		let mut changes = StdHashMap::new();
		changes.insert(uri, vec![edit(0, 0, 0, 5, "hello")]);
		let workspace_edit = WorkspaceEdit { changes: Some(changes), document_changes: None, change_annotations: None };

		let manager = EditTransactionManager::new(dir.path());
		let result = manager.execute_transaction(&workspace_edit, TransactionOptions::default()).await.unwrap();
		assert_eq!(result.files_modified, 1);
		assert_eq!(std::fs::read_to_string(&file).unwrap(), "hello");
	}

	#[tokio::test]
	async fn create_without_existing_parent_is_rejected_before_mutation() {
		let dir = tempdir().unwrap();
		let file = dir.path().join("missing_dir").join("new.ts");
		let uri = Url::from_file_path(&file).unwrap();

		let ops = vec![lsp_types::DocumentChangeOperation::Op(lsp_types::ResourceOp::Create(lsp_types::CreateFile { uri, options: None, annotation_id: None }))];
		let workspace_edit = WorkspaceEdit { changes: None, document_changes: Some(lsp_types::DocumentChanges::Operations(ops)), change_annotations: None };

		let manager = EditTransactionManager::new(dir.path());
		let err = manager.execute_transaction(&workspace_edit, TransactionOptions::default()).await.unwrap_err();
		assert!(matches!(err, Error::InvalidParams(_)));
		assert!(!file.exists());
	}

	#[tokio::test]
	async fn create_then_edit_applies_both_steps_in_document_order() {
		let dir = tempdir().unwrap();
		let new_file = dir.path().join("new.ts");
		let uri = Url::from_file_path(&new_file).unwrap();

		let ops = vec![
			lsp_types::DocumentChangeOperation::Op(lsp_types::ResourceOp::Create(lsp_types::CreateFile { uri: uri.clone(), options: None, annotation_id: None })),
			lsp_types::DocumentChangeOperation::Edit(lsp_types::TextDocumentEdit {
				text_document: lsp_types::OptionalVersionedTextDocumentIdentifier { uri: uri.clone(), version: None },
				edits: vec![lsp_types::OneOf::Left(edit(0, 0, 0, 0, "export const X=1"))],
			}),
		];
		let workspace_edit = WorkspaceEdit { changes: None, document_changes: Some(lsp_types::DocumentChanges::Operations(ops)), change_annotations: None };

		let manager = EditTransactionManager::new(dir.path());
		let result = manager.execute_transaction(&workspace_edit, TransactionOptions::default()).await.unwrap();
		assert_eq!(std::fs::read_to_string(&new_file).unwrap(), "export const X=1");
		assert_eq!(result.files_modified, 1);
	}

	#[tokio::test]
	async fn overlapping_edits_leave_filesystem_untouched() {
		let dir = tempdir().unwrap();
		let file = dir.path().join("a.ts");
		std::fs::write(&file, "hello world").unwrap();
		let uri = Url::from_file_path(&file).unwrap();

		let mut changes = StdHashMap::new();
		changes.insert(uri, vec![edit(0, 0, 0, 5, "a"), edit(0, 2, 0, 7, "b")]);
		let workspace_edit = WorkspaceEdit { changes: Some(changes), document_changes: None, change_annotations: None };

		let manager = EditTransactionManager::new(dir.path());
		let err = manager.execute_transaction(&workspace_edit, TransactionOptions::default()).await.unwrap_err();
		assert!(matches!(err, Error::TransactionFailed { .. }));
		assert_eq!(std::fs::read_to_string(&file).unwrap(), "hello world");
	}

	#[tokio::test]
	async fn rename_target_exists_without_overwrite_errors() {
		let dir = tempdir().unwrap();
		let old = dir.path().join("old.ts");
		let target = dir.path().join("target.ts");
		std::fs::write(&old, "a").unwrap();
		std::fs::write(&target, "b").unwrap();

		let ops = vec![lsp_types::DocumentChangeOperation::Op(lsp_types::ResourceOp::Rename(lsp_types::RenameFile {
			old_uri: Url::from_file_path(&old).unwrap(),
			new_uri: Url::from_file_path(&target).unwrap(),
			options: None,
			annotation_id: None,
		}))];
		let workspace_edit = WorkspaceEdit { changes: None, document_changes: Some(lsp_types::DocumentChanges::Operations(ops)), change_annotations: None };

		let manager = EditTransactionManager::new(dir.path());
		let err = manager.execute_transaction(&workspace_edit, TransactionOptions::default()).await.unwrap_err();
		assert!(matches!(err, Error::TransactionFailed { .. }));
		assert!(old.exists());
	}

	#[tokio::test]
	async fn rename_with_ignore_if_exists_is_a_no_op() {
		let dir = tempdir().unwrap();
		let old = dir.path().join("old.ts");
		let target = dir.path().join("target.ts");
		std::fs::write(&old, "a").unwrap();
		std::fs::write(&target, "b").unwrap();

		let ops = vec![lsp_types::DocumentChangeOperation::Op(lsp_types::ResourceOp::Rename(lsp_types::RenameFile {
			old_uri: Url::from_file_path(&old).unwrap(),
			new_uri: Url::from_file_path(&target).unwrap(),
			options: Some(lsp_types::RenameFileOptions { overwrite: Some(false), ignore_if_exists: Some(true) }),
			annotation_id: None,
		}))];
		let workspace_edit = WorkspaceEdit { changes: None, document_changes: Some(lsp_types::DocumentChanges::Operations(ops)), change_annotations: None };

		let manager = EditTransactionManager::new(dir.path());
		manager.execute_transaction(&workspace_edit, TransactionOptions::default()).await.unwrap();
		assert!(old.exists());
		assert_eq!(std::fs::read_to_string(&target).unwrap(), "b");
	}
}
