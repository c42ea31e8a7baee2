//! `executeCommand`: single-server dispatch, or a broadcast to every
//! active server that resolves on first success.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lsp_types::request::{ExecuteCommand as ExecuteCommandRequest, Request};
use lsp_types::{ExecuteCommandParams as LspExecuteCommandParams, WorkDoneProgressParams};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::pool::ConnectionPool;
use crate::tools::shared::call;
use crate::tools::{Tool, ToolKind};

const PER_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(4);

#[derive(Debug, Clone, Deserialize)]
pub struct ExecuteCommandParams {
	pub command: String,
	#[serde(default)]
	pub arguments: Vec<Value>,
	/// Targets exactly one `(language, workspace)` pair; omit to broadcast.
	pub language: Option<String>,
	pub workspace: Option<std::path::PathBuf>,
}

#[derive(Debug, Clone, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteCommandResult {
	pub result: Option<Value>,
	pub failed_languages: Vec<String>,
}

pub struct ExecuteCommandTool;

async fn run_one(client: Arc<polylsp_lsp::Client>, command: String, arguments: Vec<Value>, cancel: CancellationToken) -> Result<Value> {
	let request = LspExecuteCommandParams { command, arguments, work_done_progress_params: WorkDoneProgressParams::default() };
	let value = serde_json::to_value(request)?;
	tokio::select! {
		_ = cancel.cancelled() => Err(Error::Cancelled),
		outcome = tokio::time::timeout(PER_ATTEMPT_TIMEOUT, client.send_request(ExecuteCommandRequest::METHOD, Some(value), Some(cancel.clone()))) => {
			match outcome {
				Err(_) => Err(Error::Timeout),
				Ok(inner) => inner.map_err(Error::from),
			}
		}
	}
}

#[async_trait]
impl Tool for ExecuteCommandTool {
	fn name(&self) -> &'static str {
		"executeCommand"
	}

	fn kind(&self) -> ToolKind {
		ToolKind::Mutating
	}

	async fn call(&self, pool: &Arc<ConnectionPool>, params: Value) -> Result<Value> {
		let params: ExecuteCommandParams = serde_json::from_value(params)?;

		if let Some(language) = &params.language {
			let workspace = params.workspace.clone().ok_or_else(|| Error::InvalidParams("workspace is required when language is specified".to_string()))?;
			let client = pool.get(language, &workspace).await?;
			let request = LspExecuteCommandParams { command: params.command.clone(), arguments: params.arguments.clone(), work_done_progress_params: WorkDoneProgressParams::default() };
			let result = call::<ExecuteCommandRequest>(&client, request).await?;
			return Ok(serde_json::to_value(ExecuteCommandResult { result, failed_languages: Vec::new() })?);
		}

		let entries = pool.active_entries();
		if entries.is_empty() {
			return Err(Error::NotSupportedByAny);
		}

		let cancel = CancellationToken::new();
		let mut tasks = tokio::task::JoinSet::new();
		for (key, client) in entries {
			let command = params.command.clone();
			let arguments = params.arguments.clone();
			let cancel = cancel.clone();
			tasks.spawn(async move {
				let outcome = run_one(client, command, arguments, cancel).await;
				(key.language_id, outcome)
			});
		}

		let mut failed_languages = Vec::new();
		let mut winner = None;
		while let Some(joined) = tasks.join_next().await {
			let Ok((language, outcome)) = joined else { continue };
			match outcome {
				Ok(value) => {
					winner = Some(value);
					cancel.cancel();
					break;
				}
				Err(_) => failed_languages.push(language),
			}
		}
		// Dropping the JoinSet aborts whatever is still in flight.
		drop(tasks);

		match winner {
			Some(value) => Ok(serde_json::to_value(ExecuteCommandResult { result: Some(value), failed_languages })?),
			None => Err(Error::NotSupportedByAny),
		}
	}
}
