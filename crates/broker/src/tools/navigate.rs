//! `navigate`: definition / implementation / typeDefinition lookup, with
//! relevance ranking, disk previews, and a grep fallback.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lsp_types::request::{GotoDefinition, GotoImplementation, GotoTypeDefinition};
use lsp_types::{
	GotoDefinitionParams, GotoDefinitionResponse, Location, PartialResultParams, Position, TextDocumentIdentifier,
	TextDocumentPositionParams, Url, WorkDoneProgressParams,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cache::Cache;
use crate::error::{Error, Result};
use crate::pool::ConnectionPool;
use crate::tools::shared::{call, grep_fallback, one_line_preview_at, sort_by_relevance};
use crate::tools::{Tool, ToolKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NavigateTarget {
	Definition,
	Implementation,
	TypeDefinition,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigateParams {
	pub uri: Url,
	pub position: Position,
	pub target: NavigateTarget,
	pub max_results: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NavigateResult {
	pub locations: Vec<NavigateHit>,
	pub fallback: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NavigateHit {
	pub uri: Url,
	pub range: lsp_types::Range,
	pub preview: Option<String>,
}

type CacheKey = (Url, u32, u32, NavigateTarget);

pub struct NavigateTool {
	cache: Cache<CacheKey, Vec<NavigateHit>>,
}

impl Default for NavigateTool {
	fn default() -> Self {
		Self { cache: Cache::new(1024, Duration::from_secs(30)) }
	}
}

fn normalize(response: Option<GotoDefinitionResponse>) -> Vec<Location> {
	match response {
		None => Vec::new(),
		Some(GotoDefinitionResponse::Scalar(loc)) => vec![loc],
		Some(GotoDefinitionResponse::Array(locs)) => locs,
		Some(GotoDefinitionResponse::Link(links)) => links
			.into_iter()
			.map(|l| Location { uri: l.target_uri, range: l.target_selection_range })
			.collect(),
	}
}

impl NavigateTool {
	async fn navigate_one(&self, pool: &Arc<ConnectionPool>, p: &NavigateParams) -> Result<Vec<NavigateHit>> {
		let key: CacheKey = (p.uri.clone(), p.position.line, p.position.character, p.target);
		if let Some(hit) = self.cache.get(&key) {
			return Ok(hit);
		}

		let path = p.uri.to_file_path().map_err(|_| Error::InvalidParams("uri is not a file:// path".to_string()))?;
		let workspace = path.parent().unwrap_or(&path).to_path_buf();
		let Some(client) = pool.get_for_file(&path, &workspace).await else {
			return Ok(Vec::new());
		};

		let params = GotoDefinitionParams {
			text_document_position_params: TextDocumentPositionParams {
				text_document: TextDocumentIdentifier { uri: p.uri.clone() },
				position: p.position,
			},
			work_done_progress_params: WorkDoneProgressParams::default(),
			partial_result_params: PartialResultParams::default(),
		};

		let locations = match p.target {
			NavigateTarget::Definition => normalize(call::<GotoDefinition>(&client, params).await?),
			NavigateTarget::Implementation => normalize(call::<GotoImplementation>(&client, params).await?),
			NavigateTarget::TypeDefinition => normalize(call::<GotoTypeDefinition>(&client, params).await?),
		};

		let mut hits: Vec<NavigateHit> = locations
			.iter()
			.map(|loc| NavigateHit { uri: loc.uri.clone(), range: loc.range, preview: one_line_preview_at(loc) })
			.collect();
		sort_by_relevance(&mut hits, &p.uri, |h| &h.uri);
		if let Some(max) = p.max_results {
			hits.truncate(max);
		}

		self.cache.insert(key, hits.clone(), std::iter::once(p.uri.as_str().to_string()));
		Ok(hits)
	}
}

#[async_trait]
impl Tool for NavigateTool {
	fn name(&self) -> &'static str {
		"navigate"
	}

	fn kind(&self) -> ToolKind {
		ToolKind::ReadOnly
	}

	async fn call(&self, pool: &Arc<ConnectionPool>, params: Value) -> Result<Value> {
		let params: NavigateParams = serde_json::from_value(params)?;
		let symbol_hint = params.uri.path().rsplit('/').next().unwrap_or("symbol").to_string();
		let locations = self.navigate_one(pool, &params).await?;
		let fallback = locations.is_empty().then(|| grep_fallback("navigate", &symbol_hint));
		Ok(serde_json::to_value(NavigateResult { locations, fallback })?)
	}

	fn invalidate(&self, uri: &str) {
		self.cache.invalidate_uri(uri);
	}
}
