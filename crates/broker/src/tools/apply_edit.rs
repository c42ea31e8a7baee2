//! `applyEdit`: formats a diff, then forwards a `WorkspaceEdit` to a chosen
//! server's own `workspace/applyEdit` handling.

use std::sync::Arc;

use async_trait::async_trait;
use lsp_types::request::ApplyWorkspaceEdit;
use lsp_types::{ApplyWorkspaceEditParams, Url, WorkspaceEdit};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::edits::diff::render as render_diff;
use crate::edits::resolve::resolve;
use crate::error::{Error, Result};
use crate::pool::ConnectionPool;
use crate::tools::shared::call;
use crate::tools::{Tool, ToolKind};

#[derive(Debug, Clone, Deserialize)]
pub struct ApplyEditParams {
	pub language: String,
	pub workspace: std::path::PathBuf,
	pub edit: WorkspaceEdit,
	pub label: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyEditResult {
	pub applied: bool,
	pub failure_reason: Option<String>,
	pub failed_change: Option<u32>,
	pub summary: String,
	pub diff: String,
}

pub struct ApplyEditTool;

fn non_file_uri(uris: &[Url]) -> Option<&Url> {
	uris.iter().find(|u| u.scheme() != "file")
}

#[async_trait]
impl Tool for ApplyEditTool {
	fn name(&self) -> &'static str {
		"applyEdit"
	}

	fn kind(&self) -> ToolKind {
		ToolKind::Mutating
	}

	async fn call(&self, pool: &Arc<ConnectionPool>, params: Value) -> Result<Value> {
		let params: ApplyEditParams = serde_json::from_value(params)?;

		let resolved = resolve(&params.edit);
		let uris = resolved.uris();
		if let Some(bad) = non_file_uri(&uris) {
			return Err(Error::InvalidParams(format!("edit touches non-file:// uri {bad}")));
		}

		let client = pool.get(&params.language, &params.workspace).await?;
		let preview = render_diff(&params.edit).await;

		let request_params = ApplyWorkspaceEditParams { label: params.label, edit: params.edit };
		let response: lsp_types::ApplyWorkspaceEditResponse = call::<ApplyWorkspaceEdit>(&client, request_params).await?;

		Ok(serde_json::to_value(ApplyEditResult {
			applied: response.applied,
			failure_reason: response.failure_reason,
			failed_change: response.failed_change,
			summary: preview.summary,
			diff: preview.unified_diff,
		})?)
	}

	fn touched_uris(&self, params: &Value) -> Vec<String> {
		let Ok(params) = serde_json::from_value::<ApplyEditParams>(params.clone()) else { return Vec::new() };
		resolve(&params.edit).uris().into_iter().map(|u| u.as_str().to_string()).collect()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn non_file_uri_finds_the_first_offending_uri() {
		let file = Url::parse("file:///a.rs").unwrap();
		let http = Url::parse("http://example.com/a.rs").unwrap();
		assert!(non_file_uri(&[file.clone()]).is_none());
		assert_eq!(non_file_uri(&[file, http.clone()]), Some(&http));
	}
}
