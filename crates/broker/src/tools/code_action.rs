//! `applyCodeAction`: discover and optionally apply a `textDocument/codeAction`
//! response.

use std::sync::Arc;

use async_trait::async_trait;
use lsp_types::request::{CodeActionRequest, ExecuteCommand};
use lsp_types::{
	CodeAction, CodeActionContext, CodeActionKind, CodeActionOrCommand, CodeActionParams, CodeActionResponse, Command,
	Diagnostic, PartialResultParams, Range, TextDocumentIdentifier, Url, WorkDoneProgressParams, WorkspaceEdit,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::edits::applier::apply_direct;
use crate::edits::diff::render as render_diff;
use crate::error::{Error, Result};
use crate::pool::ConnectionPool;
use crate::tools::shared::call;
use crate::tools::{Tool, ToolKind};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyCodeActionParams {
	pub uri: Url,
	pub range: Range,
	#[serde(default)]
	pub diagnostics: Vec<Diagnostic>,
	pub kind_filter: Option<CodeActionKind>,
	/// Restricts candidates to titles containing this substring.
	pub title_filter: Option<String>,
	#[serde(default)]
	pub include_all: bool,
	#[serde(default = "default_true")]
	pub auto_apply: bool,
}

fn default_true() -> bool {
	true
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeActionCandidate {
	pub title: String,
	pub kind: Option<CodeActionKind>,
	pub is_preferred: bool,
}

#[derive(Debug, Clone, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ApplyCodeActionResult {
	pub candidates: Vec<CodeActionCandidate>,
	pub applied: bool,
	pub failure_reason: Option<String>,
	pub diff: Option<String>,
	pub command_result: Option<Value>,
}

pub struct ApplyCodeActionTool;

fn title_of(item: &CodeActionOrCommand) -> &str {
	match item {
		CodeActionOrCommand::CodeAction(a) => &a.title,
		CodeActionOrCommand::Command(c) => &c.title,
	}
}

fn is_preferred(item: &CodeActionOrCommand) -> bool {
	matches!(item, CodeActionOrCommand::CodeAction(a) if a.is_preferred.unwrap_or(false))
}

fn kind_of(item: &CodeActionOrCommand) -> Option<CodeActionKind> {
	match item {
		CodeActionOrCommand::CodeAction(a) => a.kind.clone(),
		CodeActionOrCommand::Command(_) => None,
	}
}

#[async_trait]
impl Tool for ApplyCodeActionTool {
	fn name(&self) -> &'static str {
		"applyCodeAction"
	}

	fn kind(&self) -> ToolKind {
		ToolKind::Mutating
	}

	async fn call(&self, pool: &Arc<ConnectionPool>, params: Value) -> Result<Value> {
		let params: ApplyCodeActionParams = serde_json::from_value(params)?;
		let path = params.uri.to_file_path().map_err(|_| Error::InvalidParams("uri is not a file:// path".to_string()))?;
		let workspace = path.parent().unwrap_or(&path).to_path_buf();
		let Some(client) = pool.get_for_file(&path, &workspace).await else {
			return Ok(serde_json::to_value(ApplyCodeActionResult::default())?);
		};

		let request_params = CodeActionParams {
			text_document: TextDocumentIdentifier { uri: params.uri.clone() },
			range: params.range,
			context: CodeActionContext { diagnostics: params.diagnostics.clone(), only: params.kind_filter.clone().map(|k| vec![k]), trigger_kind: None },
			work_done_progress_params: WorkDoneProgressParams::default(),
			partial_result_params: PartialResultParams::default(),
		};
		let response: Option<CodeActionResponse> = call::<CodeActionRequest>(&client, request_params).await?;
		let mut items = response.unwrap_or_default();

		if let Some(title) = &params.title_filter {
			items.retain(|i| title_of(i).contains(title.as_str()));
		}
		if !params.include_all && items.iter().any(is_preferred) {
			items.retain(is_preferred);
		}

		let candidates: Vec<CodeActionCandidate> = items.iter().map(|i| CodeActionCandidate { title: title_of(i).to_string(), kind: kind_of(i), is_preferred: is_preferred(i) }).collect();

		if !params.auto_apply {
			return Ok(serde_json::to_value(ApplyCodeActionResult { candidates, ..Default::default() })?);
		}

		let Some(chosen) = items.into_iter().next() else {
			return Ok(serde_json::to_value(ApplyCodeActionResult { candidates, ..Default::default() })?);
		};

		let (edit, command): (Option<WorkspaceEdit>, Option<Command>) = match chosen {
			CodeActionOrCommand::CodeAction(CodeAction { edit, command, .. }) => (edit, command),
			CodeActionOrCommand::Command(c) => (None, Some(c)),
		};

		let mut applied = false;
		let mut failure_reason = None;
		let mut diff = None;

		if let Some(edit) = &edit {
			diff = Some(render_diff(edit).await.unified_diff);
			let result = apply_direct(edit).await;
			applied = result.applied;
			failure_reason = result.failure_reason;
		}

		let mut command_result = None;
		if let Some(command) = command {
			let exec_params = lsp_types::ExecuteCommandParams { command: command.command, arguments: command.arguments.unwrap_or_default(), work_done_progress_params: WorkDoneProgressParams::default() };
			match call::<ExecuteCommand>(&client, exec_params).await {
				Ok(v) => {
					command_result = v;
					applied = true;
				}
				Err(e) => {
					failure_reason.get_or_insert_with(|| e.to_string());
				}
			};
		}

		Ok(serde_json::to_value(ApplyCodeActionResult { candidates, applied, failure_reason, diff, command_result })?)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn action(title: &str, preferred: bool) -> CodeActionOrCommand {
		CodeActionOrCommand::CodeAction(CodeAction {
			title: title.to_string(),
			kind: None,
			diagnostics: None,
			edit: None,
			command: None,
			is_preferred: Some(preferred),
			disabled: None,
			data: None,
		})
	}

	#[test]
	fn title_of_reads_action_and_command_titles() {
		let a = action("Extract variable", false);
		assert_eq!(title_of(&a), "Extract variable");
		let c = CodeActionOrCommand::Command(Command { title: "Run fixer".to_string(), command: "fixer.run".to_string(), arguments: None });
		assert_eq!(title_of(&c), "Run fixer");
	}

	#[test]
	fn is_preferred_reads_the_code_action_flag_only() {
		assert!(is_preferred(&action("Fix", true)));
		assert!(!is_preferred(&action("Fix", false)));
		let c = CodeActionOrCommand::Command(Command { title: "Run".to_string(), command: "run".to_string(), arguments: None });
		assert!(!is_preferred(&c));
	}

	#[test]
	fn preferred_filtering_policy_keeps_only_preferred_when_any_exist() {
		let mut items = vec![action("A", false), action("B", true), action("C", false)];
		if items.iter().any(is_preferred) {
			items.retain(is_preferred);
		}
		assert_eq!(items.len(), 1);
		assert_eq!(title_of(&items[0]), "B");
	}

	#[test]
	fn title_filter_matches_by_substring() {
		let mut items = vec![action("Extract variable", false), action("Inline variable", false), action("Add import", false)];
		let filter = "variable";
		items.retain(|i| title_of(i).contains(filter));
		assert_eq!(items.len(), 2);
	}
}
