//! `findUsages`: references and call-hierarchy traversal with cycle
//! detection.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use lsp_types::request::{CallHierarchyIncomingCalls, CallHierarchyOutgoingCalls, CallHierarchyPrepare, References};
use lsp_types::{
	CallHierarchyIncomingCall, CallHierarchyIncomingCallsParams, CallHierarchyItem, CallHierarchyOutgoingCall,
	CallHierarchyOutgoingCallsParams, CallHierarchyPrepareParams, Location, PartialResultParams, Position, Range,
	ReferenceContext, ReferenceParams, TextDocumentIdentifier, TextDocumentPositionParams, Url, WorkDoneProgressParams,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::pool::ConnectionPool;
use crate::tools::shared::{call, grep_fallback, one_line_preview_at};
use crate::tools::{Tool, ToolKind};

const DEFAULT_MAX_DEPTH: u32 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum UsageKind {
	References,
	CallHierarchy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CallDirection {
	Incoming,
	Outgoing,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FindUsagesParams {
	pub uri: Url,
	pub position: Position,
	#[serde(rename = "type")]
	pub kind: UsageKind,
	#[serde(default)]
	pub direction: Option<CallDirection>,
	#[serde(default)]
	pub include_declaration: bool,
	pub max_depth: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UsageHit {
	pub uri: Url,
	pub range: Range,
	pub preview: Option<String>,
	pub name: Option<String>,
	pub depth: u32,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct FindUsagesResult {
	pub usages: Vec<UsageHit>,
	pub fallback: Option<String>,
}

pub struct FindUsagesTool;

impl FindUsagesTool {
	async fn references(&self, client: &polylsp_lsp::Client, p: &FindUsagesParams) -> Result<Vec<UsageHit>> {
		let params = ReferenceParams {
			text_document_position: TextDocumentPositionParams {
				text_document: TextDocumentIdentifier { uri: p.uri.clone() },
				position: p.position,
			},
			work_done_progress_params: WorkDoneProgressParams::default(),
			partial_result_params: PartialResultParams::default(),
			context: ReferenceContext { include_declaration: p.include_declaration },
		};
		let locations: Vec<Location> = call::<References>(client, params).await?.unwrap_or_default();
		Ok(locations
			.iter()
			.map(|loc| UsageHit { uri: loc.uri.clone(), range: loc.range, preview: one_line_preview_at(loc), name: None, depth: 0 })
			.collect())
	}

	async fn call_hierarchy(&self, client: &polylsp_lsp::Client, p: &FindUsagesParams) -> Result<Vec<UsageHit>> {
		let direction = p.direction.unwrap_or(CallDirection::Incoming);
		let max_depth = p.max_depth.unwrap_or(DEFAULT_MAX_DEPTH);

		let prepare_params = CallHierarchyPrepareParams {
			text_document_position_params: TextDocumentPositionParams {
				text_document: TextDocumentIdentifier { uri: p.uri.clone() },
				position: p.position,
			},
			work_done_progress_params: WorkDoneProgressParams::default(),
		};
		let roots: Vec<CallHierarchyItem> = call::<CallHierarchyPrepare>(client, prepare_params).await?.unwrap_or_default();

		let mut visited: HashSet<(Url, Position)> = HashSet::new();
		let mut out = Vec::new();
		let mut frontier: Vec<(CallHierarchyItem, u32)> = roots.into_iter().map(|item| (item, 0)).collect();

		while let Some((item, depth)) = frontier.pop() {
			let dedup_key = (item.uri.clone(), item.selection_range.start);
			let already_visited = !visited.insert(dedup_key);
			out.push(UsageHit {
				uri: item.uri.clone(),
				range: item.selection_range,
				preview: None,
				name: Some(item.name.clone()),
				depth,
			});
			if already_visited || depth >= max_depth {
				continue;
			}

			let children = match direction {
				CallDirection::Incoming => {
					let params = CallHierarchyIncomingCallsParams { item, work_done_progress_params: WorkDoneProgressParams::default(), partial_result_params: PartialResultParams::default() };
					let calls: Vec<CallHierarchyIncomingCall> = call::<CallHierarchyIncomingCalls>(client, params).await?.unwrap_or_default();
					calls.into_iter().map(|c| c.from).collect::<Vec<_>>()
				}
				CallDirection::Outgoing => {
					let params = CallHierarchyOutgoingCallsParams { item, work_done_progress_params: WorkDoneProgressParams::default(), partial_result_params: PartialResultParams::default() };
					let calls: Vec<CallHierarchyOutgoingCall> = call::<CallHierarchyOutgoingCalls>(client, params).await?.unwrap_or_default();
					calls.into_iter().map(|c| c.to).collect::<Vec<_>>()
				}
			};
			for child in children {
				frontier.push((child, depth + 1));
			}
		}

		Ok(out)
	}
}

#[async_trait]
impl Tool for FindUsagesTool {
	fn name(&self) -> &'static str {
		"findUsages"
	}

	fn kind(&self) -> ToolKind {
		ToolKind::ReadOnly
	}

	async fn call(&self, pool: &Arc<ConnectionPool>, params: Value) -> Result<Value> {
		let params: FindUsagesParams = serde_json::from_value(params)?;
		let path = params.uri.to_file_path().map_err(|_| Error::InvalidParams("uri is not a file:// path".to_string()))?;
		let workspace = path.parent().unwrap_or(&path).to_path_buf();
		let Some(client) = pool.get_for_file(&path, &workspace).await else {
			return Ok(serde_json::to_value(FindUsagesResult::default())?);
		};

		let usages = match params.kind {
			UsageKind::References => self.references(&client, &params).await?,
			UsageKind::CallHierarchy => self.call_hierarchy(&client, &params).await?,
		};
		let symbol_hint = path.file_stem().and_then(|s| s.to_str()).unwrap_or("symbol").to_string();
		let fallback = usages.is_empty().then(|| grep_fallback("findUsages", &symbol_hint));
		Ok(serde_json::to_value(FindUsagesResult { usages, fallback })?)
	}
}
