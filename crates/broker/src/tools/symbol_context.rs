//! `getSymbolContext`: hover + signatureHelp + references + documentSymbol
//! (+ optional call hierarchy), run concurrently so one slow/failing
//! subrequest doesn't fail the whole call.

use std::sync::Arc;

use async_trait::async_trait;
use lsp_types::{Position, Range, SymbolKind, Url};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::pool::ConnectionPool;
use crate::tools::code_intelligence::{HoverResult, SignatureResult};
use crate::tools::find_usages::{CallDirection, FindUsagesParams, FindUsagesTool, UsageHit, UsageKind};
use crate::tools::find_symbols::{FindSymbolsTool, SymbolHit};
use crate::tools::{Tool, ToolKind};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolContextParams {
	pub uri: Url,
	pub position: Position,
	#[serde(default)]
	pub include_call_hierarchy: bool,
	pub max_hierarchy_depth: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SymbolContextResult {
	pub hover: Option<HoverResult>,
	pub signature: Option<SignatureResult>,
	pub references: Vec<UsageHit>,
	pub container_name: Option<String>,
	pub siblings: Vec<SymbolHit>,
	pub incoming_calls: Vec<UsageHit>,
	pub outgoing_calls: Vec<UsageHit>,
	pub errors: Vec<String>,
}

pub struct SymbolContextTool;

fn containing_symbol<'a>(symbols: &'a [SymbolHit], position: Position) -> Option<&'a SymbolHit> {
	symbols
		.iter()
		.filter(|s| range_contains(s.range, position))
		.min_by_key(|s| range_len(s.range))
}

fn range_contains(range: Range, position: Position) -> bool {
	(range.start.line, range.start.character) <= (position.line, position.character) && (position.line, position.character) <= (range.end.line, range.end.character)
}

fn range_len(range: Range) -> (u32, u32) {
	(range.end.line.saturating_sub(range.start.line), range.end.character.saturating_sub(range.start.character))
}

#[async_trait]
impl Tool for SymbolContextTool {
	fn name(&self) -> &'static str {
		"getSymbolContext"
	}

	fn kind(&self) -> ToolKind {
		ToolKind::ReadOnly
	}

	async fn call(&self, pool: &Arc<ConnectionPool>, params: Value) -> Result<Value> {
		let params: SymbolContextParams = serde_json::from_value(params)?;
		let _path = params.uri.to_file_path().map_err(|_| Error::InvalidParams("uri is not a file:// path".to_string()))?;

		let intelligence = crate::tools::code_intelligence::CodeIntelligenceTool::default();
		let usages = FindUsagesTool;
		let symbols = FindSymbolsTool::default();

		let hover_params = serde_json::json!({"uri": params.uri, "position": params.position, "type": "hover"});
		let signature_params = serde_json::json!({"uri": params.uri, "position": params.position, "type": "signature"});
		let references_params = serde_json::json!({"uri": params.uri, "position": params.position, "type": "references", "includeDeclaration": false});
		let document_symbols_params = serde_json::json!({"scope": "document", "uri": params.uri, "query": ""});

		let (hover_res, signature_res, references_res, symbols_res) = tokio::join!(
			intelligence.call(pool, hover_params),
			intelligence.call(pool, signature_params),
			usages.call(pool, references_params),
			symbols.call(pool, document_symbols_params),
		);

		let mut result = SymbolContextResult::default();

		match hover_res {
			Ok(v) => result.hover = serde_json::from_value(v).ok(),
			Err(e) => result.errors.push(format!("hover: {e}")),
		}
		match signature_res {
			Ok(v) => result.signature = serde_json::from_value(v).ok(),
			Err(e) => result.errors.push(format!("signature: {e}")),
		}
		match references_res {
			Ok(v) => {
				if let Ok(parsed) = serde_json::from_value::<crate::tools::find_usages::FindUsagesResult>(v) {
					result.references = parsed.usages;
				}
			}
			Err(e) => result.errors.push(format!("references: {e}")),
		}

		let mut document_symbols = Vec::new();
		match symbols_res {
			Ok(v) => {
				if let Ok(parsed) = serde_json::from_value::<crate::tools::find_symbols::FindSymbolsResult>(v) {
					document_symbols = parsed.symbols;
				}
			}
			Err(e) => result.errors.push(format!("documentSymbol: {e}")),
		}
		if let Some(container) = containing_symbol(&document_symbols, params.position) {
			result.container_name = Some(container.name.clone());
		}
		result.siblings = document_symbols;

		if params.include_call_hierarchy {
			let depth = params.max_hierarchy_depth;
			let incoming_params = FindUsagesParams { uri: params.uri.clone(), position: params.position, kind: UsageKind::CallHierarchy, direction: Some(CallDirection::Incoming), include_declaration: false, max_depth: depth };
			let outgoing_params = FindUsagesParams { uri: params.uri.clone(), position: params.position, kind: UsageKind::CallHierarchy, direction: Some(CallDirection::Outgoing), include_declaration: false, max_depth: depth };
			let (incoming_res, outgoing_res) = tokio::join!(
				usages.call(pool, serde_json::to_value(&incoming_params)?),
				usages.call(pool, serde_json::to_value(&outgoing_params)?),
			);
			match incoming_res {
				Ok(v) => result.incoming_calls = serde_json::from_value::<crate::tools::find_usages::FindUsagesResult>(v).map(|r| r.usages).unwrap_or_default(),
				Err(e) => result.errors.push(format!("incomingCalls: {e}")),
			}
			match outgoing_res {
				Ok(v) => result.outgoing_calls = serde_json::from_value::<crate::tools::find_usages::FindUsagesResult>(v).map(|r| r.usages).unwrap_or_default(),
				Err(e) => result.errors.push(format!("outgoingCalls: {e}")),
			}
		}

		Ok(serde_json::to_value(result)?)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn hit(name: &str, sl: u32, sc: u32, el: u32, ec: u32) -> SymbolHit {
		SymbolHit {
			name: name.to_string(),
			kind: SymbolKind::FUNCTION,
			container_name: None,
			uri: Url::parse("file:///a.rs").unwrap(),
			range: Range { start: Position { line: sl, character: sc }, end: Position { line: el, character: ec } },
			score: 0,
		}
	}

	#[test]
	fn containing_symbol_picks_the_smallest_enclosing_range() {
		let outer = hit("outer_fn", 0, 0, 20, 0);
		let inner = hit("inner_fn", 5, 0, 10, 0);
		let symbols = vec![outer, inner];
		let found = containing_symbol(&symbols, Position { line: 7, character: 2 }).unwrap();
		assert_eq!(found.name, "inner_fn");
	}

	#[test]
	fn containing_symbol_returns_none_when_position_outside_all_ranges() {
		let symbols = vec![hit("f", 0, 0, 5, 0)];
		assert!(containing_symbol(&symbols, Position { line: 10, character: 0 }).is_none());
	}

	#[test]
	fn range_contains_is_inclusive_of_both_endpoints() {
		let range = Range { start: Position { line: 1, character: 0 }, end: Position { line: 3, character: 5 } };
		assert!(range_contains(range, Position { line: 1, character: 0 }));
		assert!(range_contains(range, Position { line: 3, character: 5 }));
		assert!(!range_contains(range, Position { line: 0, character: 0 }));
		assert!(!range_contains(range, Position { line: 3, character: 6 }));
	}
}
