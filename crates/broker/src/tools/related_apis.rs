//! `getRelatedAPIs`: seeded symbol traversal across workspace/symbol,
//! documentSymbol, hover, semanticTokens, and definition, producing a
//! Markdown report.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use lsp_types::request::{DocumentSymbolRequest, GotoDefinition, HoverRequest, SemanticTokensFullRequest, WorkspaceSymbolRequest};
use lsp_types::{
	DocumentSymbol, DocumentSymbolParams, DocumentSymbolResponse, GotoDefinitionParams, GotoDefinitionResponse,
	HoverParams, Location, PartialResultParams, Position, Range, SemanticTokensParams, SemanticTokensResult,
	SymbolKind, TextDocumentIdentifier, TextDocumentPositionParams, Url, WorkDoneProgressParams, WorkspaceSymbolParams,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::pool::ConnectionPool;
use crate::tools::code_intelligence::hover_to_result;
use crate::tools::shared::{call, validate_query_len};
use crate::tools::{Tool, ToolKind};

const DEFAULT_MAX_SYMBOLS: usize = 40;
const DEFAULT_DEPTH: u32 = 2;

/// Well-known platform/stdlib path fragments skipped while traversing, so
/// the report stays focused on the workspace's own types.
const SKIP_PATH_FRAGMENTS: &[&str] = &[".cargo/registry", "node_modules", "/usr/lib", "/usr/share", ".rustup/toolchains"];

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelatedApisParams {
	pub symbols: Vec<String>,
	pub max_symbols: Option<usize>,
	pub depth: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
struct ReportEntry {
	name: String,
	kind: SymbolKind,
	uri: Url,
	summary: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelatedApisResult {
	pub report_markdown: String,
	pub truncated: bool,
}

pub struct RelatedApisTool;

fn is_platform_path(uri: &Url) -> bool {
	let path = uri.path();
	SKIP_PATH_FRAGMENTS.iter().any(|frag| path.contains(frag))
}

fn is_type_kind(kind: SymbolKind) -> bool {
	matches!(kind, SymbolKind::CLASS | SymbolKind::INTERFACE | SymbolKind::ENUM | SymbolKind::STRUCT | SymbolKind::TYPE_PARAMETER | SymbolKind::NAMESPACE)
}

fn range_contains(range: Range, position: Position) -> bool {
	(range.start.line, range.start.character) <= (position.line, position.character) && (position.line, position.character) <= (range.end.line, range.end.character)
}

fn range_len(range: Range) -> (u32, u32) {
	(range.end.line.saturating_sub(range.start.line), range.end.character.saturating_sub(range.start.character))
}

fn flatten_symbol_ranges(symbols: Vec<DocumentSymbol>, out: &mut Vec<(String, Range)>) {
	for symbol in symbols {
		out.push((symbol.name.clone(), symbol.selection_range));
		if let Some(children) = symbol.children {
			flatten_symbol_ranges(children, out);
		}
	}
}

impl RelatedApisTool {
	async fn hover_summary(&self, pool: &Arc<ConnectionPool>, uri: &Url, position: Position) -> Option<String> {
		let path = uri.to_file_path().ok()?;
		let workspace = path.parent().unwrap_or(&path).to_path_buf();
		let client = pool.get_for_file(&path, &workspace).await?;
		let params = HoverParams {
			text_document_position_params: TextDocumentPositionParams { text_document: TextDocumentIdentifier { uri: uri.clone() }, position },
			work_done_progress_params: WorkDoneProgressParams::default(),
		};
		let hover = call::<HoverRequest>(&client, params).await.ok().flatten()?;
		hover_to_result(hover).documentation
	}

	/// Finds referenced type definitions in `uri` by resolving each
	/// semantic token's definition and keeping type-like kinds.
	async fn referenced_types(&self, pool: &Arc<ConnectionPool>, uri: &Url) -> Vec<Location> {
		let path = match uri.to_file_path() {
			Ok(p) => p,
			Err(_) => return Vec::new(),
		};
		let workspace = path.parent().unwrap_or(&path).to_path_buf();
		let Some(client) = pool.get_for_file(&path, &workspace).await else { return Vec::new() };

		let params = SemanticTokensParams { text_document: TextDocumentIdentifier { uri: uri.clone() }, work_done_progress_params: WorkDoneProgressParams::default(), partial_result_params: PartialResultParams::default() };
		let Ok(Some(tokens)) = call::<SemanticTokensFullRequest>(&client, params).await else { return Vec::new() };
		let data = match tokens {
			SemanticTokensResult::Tokens(t) => t.data,
			SemanticTokensResult::Partial(p) => p.data,
		};

		let mut locations = Vec::new();
		let (mut line, mut character) = (0u32, 0u32);
		for token in data.iter().take(200) {
			if token.delta_line > 0 {
				line += token.delta_line;
				character = token.delta_start;
			} else {
				character += token.delta_start;
			}
			let position = Position { line, character };
			let def_params = GotoDefinitionParams {
				text_document_position_params: TextDocumentPositionParams { text_document: TextDocumentIdentifier { uri: uri.clone() }, position },
				work_done_progress_params: WorkDoneProgressParams::default(),
				partial_result_params: PartialResultParams::default(),
			};
			if let Ok(Some(response)) = call::<GotoDefinition>(&client, def_params).await {
				locations.extend(match response {
					GotoDefinitionResponse::Scalar(l) => vec![l],
					GotoDefinitionResponse::Array(l) => l,
					GotoDefinitionResponse::Link(links) => links.into_iter().map(|l| Location { uri: l.target_uri, range: l.target_selection_range }).collect(),
				});
			}
		}
		locations
	}

	/// Resolves the name of the innermost symbol enclosing `location`, via
	/// `textDocument/documentSymbol` on its own file — used to turn a
	/// referenced type's `Location` back into a seed name for the next
	/// traversal depth.
	async fn symbol_name_at(&self, pool: &Arc<ConnectionPool>, location: &Location) -> Option<String> {
		let path = location.uri.to_file_path().ok()?;
		let workspace = path.parent().unwrap_or(&path).to_path_buf();
		let client = pool.get_for_file(&path, &workspace).await?;
		let params = DocumentSymbolParams {
			text_document: TextDocumentIdentifier { uri: location.uri.clone() },
			work_done_progress_params: WorkDoneProgressParams::default(),
			partial_result_params: PartialResultParams::default(),
		};
		let response = call::<DocumentSymbolRequest>(&client, params).await.ok().flatten()?;

		let mut flat = Vec::new();
		match response {
			DocumentSymbolResponse::Flat(items) => {
				#[allow(deprecated)]
				flat.extend(items.into_iter().map(|i| (i.name, i.location.range)));
			}
			DocumentSymbolResponse::Nested(items) => flatten_symbol_ranges(items, &mut flat),
		}

		flat.into_iter().filter(|(_, range)| range_contains(*range, location.range.start)).min_by_key(|(_, range)| range_len(*range)).map(|(name, _)| name)
	}
}

#[async_trait]
impl Tool for RelatedApisTool {
	fn name(&self) -> &'static str {
		"getRelatedAPIs"
	}

	fn kind(&self) -> ToolKind {
		ToolKind::ReadOnly
	}

	async fn call(&self, pool: &Arc<ConnectionPool>, params: Value) -> Result<Value> {
		let params: RelatedApisParams = serde_json::from_value(params)?;
		for s in &params.symbols {
			validate_query_len(s)?;
		}
		let max_symbols = params.max_symbols.unwrap_or(DEFAULT_MAX_SYMBOLS);
		let depth = params.depth.unwrap_or(DEFAULT_DEPTH);

		let mut seen: HashSet<(String, u32)> = HashSet::new();
		let mut entries: Vec<ReportEntry> = Vec::new();
		let mut frontier: Vec<(String, u32)> = params.symbols.iter().map(|s| (s.clone(), 0)).collect();
		let mut truncated = false;

		while let Some((name, current_depth)) = frontier.pop() {
			if entries.len() >= max_symbols {
				truncated = true;
				break;
			}

			for (_key, client) in pool.active_entries() {
				let ws_params = WorkspaceSymbolParams { query: name.clone(), work_done_progress_params: WorkDoneProgressParams::default(), partial_result_params: PartialResultParams::default() };
				let Ok(Some(response)) = call::<WorkspaceSymbolRequest>(&client, ws_params).await else { continue };
				let items = match response {
					lsp_types::WorkspaceSymbolResponse::Flat(items) => items.into_iter().map(|i| (i.name, i.kind, i.location.uri, i.location.range)).collect::<Vec<_>>(),
					lsp_types::WorkspaceSymbolResponse::Nested(items) => items
						.into_iter()
						.filter_map(|i| match i.location {
							lsp_types::OneOf::Left(loc) => Some((i.name, i.kind, loc.uri, loc.range)),
							lsp_types::OneOf::Right(_) => None,
						})
						.collect(),
				};

				for (sym_name, kind, uri, range) in items {
					if is_platform_path(&uri) {
						continue;
					}
					let dedup_key = (uri.as_str().to_string(), range.start.line);
					if !seen.insert(dedup_key) {
						continue;
					}
					let summary = self.hover_summary(pool, &uri, range.start).await;
					entries.push(ReportEntry { name: sym_name, kind, uri: uri.clone(), summary });

					if current_depth < depth && is_type_kind(kind) {
						for location in self.referenced_types(pool, &uri).await {
							if is_platform_path(&location.uri) {
								continue;
							}
							if let Some(next_name) = self.symbol_name_at(pool, &location).await {
								frontier.push((next_name, current_depth + 1));
							}
						}
					}
					if entries.len() >= max_symbols {
						truncated = true;
						break;
					}
				}
			}
		}

		let mut markdown = String::from("# Related APIs\n\n");
		for entry in &entries {
			markdown.push_str(&format!("## {} (`{:?}`)\n\n", entry.name, entry.kind));
			markdown.push_str(&format!("- location: {}\n", entry.uri));
			if let Some(summary) = &entry.summary {
				markdown.push_str(&format!("\n{summary}\n"));
			}
			markdown.push('\n');
		}
		if truncated {
			markdown.push_str(&format!("\n_truncated at {max_symbols} symbols / depth {depth}_\n"));
		}

		Ok(serde_json::to_value(RelatedApisResult { report_markdown: markdown, truncated })?)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn is_platform_path_flags_registry_and_node_modules_paths() {
		assert!(is_platform_path(&Url::parse("file:///home/user/.cargo/registry/src/foo.rs").unwrap()));
		assert!(is_platform_path(&Url::parse("file:///repo/node_modules/lodash/index.js").unwrap()));
		assert!(!is_platform_path(&Url::parse("file:///repo/src/lib.rs").unwrap()));
	}

	#[test]
	fn is_type_kind_accepts_structural_kinds_only() {
		assert!(is_type_kind(SymbolKind::CLASS));
		assert!(is_type_kind(SymbolKind::STRUCT));
		assert!(is_type_kind(SymbolKind::INTERFACE));
		assert!(!is_type_kind(SymbolKind::FUNCTION));
		assert!(!is_type_kind(SymbolKind::VARIABLE));
	}

	fn pos(line: u32, character: u32) -> Position {
		Position { line, character }
	}

	fn range(sl: u32, sc: u32, el: u32, ec: u32) -> Range {
		Range { start: pos(sl, sc), end: pos(el, ec) }
	}

	#[test]
	fn range_contains_is_inclusive_of_both_endpoints() {
		let r = range(1, 0, 3, 5);
		assert!(range_contains(r, pos(1, 0)));
		assert!(range_contains(r, pos(3, 5)));
		assert!(!range_contains(r, pos(0, 0)));
		assert!(!range_contains(r, pos(3, 6)));
	}

	#[test]
	fn flatten_symbol_ranges_walks_nested_children() {
		#[allow(deprecated)]
		let child = DocumentSymbol {
			name: "inner".to_string(),
			detail: None,
			kind: SymbolKind::FUNCTION,
			tags: None,
			deprecated: None,
			range: range(2, 0, 2, 5),
			selection_range: range(2, 0, 2, 5),
			children: None,
		};
		#[allow(deprecated)]
		let parent = DocumentSymbol {
			name: "outer".to_string(),
			detail: None,
			kind: SymbolKind::CLASS,
			tags: None,
			deprecated: None,
			range: range(0, 0, 5, 0),
			selection_range: range(0, 0, 0, 5),
			children: Some(vec![child]),
		};
		let mut out = Vec::new();
		flatten_symbol_ranges(vec![parent], &mut out);
		assert_eq!(out.len(), 2);
		assert_eq!(out[0].0, "outer");
		assert_eq!(out[1].0, "inner");
	}
}
