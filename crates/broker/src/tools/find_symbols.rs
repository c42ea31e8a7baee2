//! `findSymbols`: document/workspace symbol search with glob/abbreviation
//! scoring and kind-bucket filtering.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lsp_types::request::{DocumentSymbolRequest, WorkspaceSymbolRequest};
use lsp_types::{
	DocumentSymbol, DocumentSymbolParams, DocumentSymbolResponse, PartialResultParams, SymbolInformation, SymbolKind,
	TextDocumentIdentifier, Url, WorkDoneProgressParams, WorkspaceSymbolParams,
};
use regex::{escape, Regex};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cache::Cache;
use crate::error::{Error, Result};
use crate::pool::ConnectionPool;
use crate::tools::shared::validate_query_len;
use crate::tools::{Tool, ToolKind};

const MAX_FLATTEN_DEPTH: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SymbolScope {
	Document,
	Workspace,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SymbolKindBucket {
	Function,
	Class,
	Interface,
	Variable,
	Constant,
	Method,
	Property,
	Enum,
}

impl SymbolKindBucket {
	fn matches(self, kind: SymbolKind) -> bool {
		match self {
			SymbolKindBucket::Function => kind == SymbolKind::FUNCTION,
			SymbolKindBucket::Class => kind == SymbolKind::CLASS || kind == SymbolKind::STRUCT,
			SymbolKindBucket::Interface => kind == SymbolKind::INTERFACE,
			SymbolKindBucket::Variable => kind == SymbolKind::VARIABLE,
			SymbolKindBucket::Constant => kind == SymbolKind::CONSTANT,
			SymbolKindBucket::Method => kind == SymbolKind::METHOD,
			SymbolKindBucket::Property => kind == SymbolKind::PROPERTY || kind == SymbolKind::FIELD,
			SymbolKindBucket::Enum => kind == SymbolKind::ENUM || kind == SymbolKind::ENUM_MEMBER,
		}
	}
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FindSymbolsParams {
	pub scope: SymbolScope,
	/// Required for `document` scope.
	pub uri: Option<Url>,
	pub query: String,
	#[serde(default)]
	pub kinds: Vec<SymbolKindBucket>,
	pub max_results: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolHit {
	pub name: String,
	pub kind: SymbolKind,
	pub container_name: Option<String>,
	pub uri: Url,
	pub range: lsp_types::Range,
	pub score: i32,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct FindSymbolsResult {
	pub symbols: Vec<SymbolHit>,
}

type CacheKey = String;

pub struct FindSymbolsTool {
	cache: Cache<CacheKey, Vec<SymbolHit>>,
}

impl Default for FindSymbolsTool {
	fn default() -> Self {
		Self { cache: Cache::new(1024, Duration::from_secs(30)) }
	}
}

fn flatten_document_symbols(symbols: Vec<DocumentSymbol>, container: Option<String>, uri: &Url, depth: u32, out: &mut Vec<SymbolHit>) {
	if depth > MAX_FLATTEN_DEPTH {
		return;
	}
	for symbol in symbols {
		out.push(SymbolHit {
			name: symbol.name.clone(),
			kind: symbol.kind,
			container_name: container.clone(),
			uri: uri.clone(),
			range: symbol.selection_range,
			score: 0,
		});
		if let Some(children) = symbol.children {
			flatten_document_symbols(children, Some(symbol.name), uri, depth + 1, out);
		}
	}
}

fn from_symbol_information(items: Vec<SymbolInformation>) -> Vec<SymbolHit> {
	#[allow(deprecated)]
	items
		.into_iter()
		.map(|s| SymbolHit { name: s.name, kind: s.kind, container_name: s.container_name, uri: s.location.uri, range: s.location.range, score: 0 })
		.collect()
}

/// Concatenated capital letters of `name`, optionally with its first
/// letter prefixed — the camelCase abbreviation used for scoring.
fn camel_abbreviation(name: &str) -> String {
	let caps: String = name.chars().filter(|c| c.is_uppercase()).collect();
	caps
}

fn score(query: &str, name: &str) -> i32 {
	let query_lower = query.to_lowercase();
	let name_lower = name.to_lowercase();

	if name_lower == query_lower {
		return 100;
	}
	if name_lower.starts_with(&query_lower) {
		return 80;
	}

	let abbrev = camel_abbreviation(name);
	let abbrev_lower = abbrev.to_lowercase();
	let first_prefixed = format!("{}{}", name.chars().next().map(|c| c.to_lowercase().to_string()).unwrap_or_default(), abbrev_lower);
	if abbrev_lower == query_lower || first_prefixed == query_lower {
		return 70;
	}
	if abbrev_lower.contains(&query_lower) && !query_lower.is_empty() {
		return 65;
	}

	if name_lower.contains(&query_lower) {
		return 50;
	}

	0
}

/// Compiles a `*`-pattern into a regex: `*X*` substring, `X*` prefix, `*X`
/// suffix. Returns `None` for a plain (non-glob) query.
fn glob_pattern(query: &str) -> Option<Regex> {
	if !query.contains('*') {
		return None;
	}
	let starts = query.starts_with('*');
	let ends = query.ends_with('*');
	let core = query.trim_matches('*');
	let escaped = escape(core);
	let pattern = match (starts, ends) {
		(true, true) => format!("(?i).*{escaped}.*"),
		(false, true) => format!("(?i)^{escaped}.*"),
		(true, false) => format!("(?i).*{escaped}$"),
		(false, false) => format!("(?i)^{}$", escape(query)),
	};
	Regex::new(&pattern).ok()
}

fn apply_scoring(mut hits: Vec<SymbolHit>, query: &str) -> Vec<SymbolHit> {
	if let Some(re) = glob_pattern(query) {
		hits.retain(|h| re.is_match(&h.name));
		for h in &mut hits {
			h.score = 100;
		}
	} else {
		for h in &mut hits {
			h.score = score(query, &h.name);
		}
		hits.retain(|h| h.score > 0);
	}
	hits
}

impl FindSymbolsTool {
	async fn document_symbols(&self, pool: &Arc<ConnectionPool>, uri: &Url) -> Result<Vec<SymbolHit>> {
		let path = uri.to_file_path().map_err(|_| Error::InvalidParams("uri is not a file:// path".to_string()))?;
		let workspace = path.parent().unwrap_or(&path).to_path_buf();
		let Some(client) = pool.get_for_file(&path, &workspace).await else {
			return Ok(Vec::new());
		};
		let params = DocumentSymbolParams {
			text_document: TextDocumentIdentifier { uri: uri.clone() },
			work_done_progress_params: WorkDoneProgressParams::default(),
			partial_result_params: PartialResultParams::default(),
		};
		let response = crate::tools::shared::call::<DocumentSymbolRequest>(&client, params).await?;
		let mut out = Vec::new();
		match response {
			Some(DocumentSymbolResponse::Flat(items)) => out.extend(from_symbol_information(items)),
			Some(DocumentSymbolResponse::Nested(items)) => flatten_document_symbols(items, None, uri, 0, &mut out),
			None => {}
		}
		Ok(out)
	}

	async fn workspace_symbols(&self, pool: &Arc<ConnectionPool>, query: &str) -> Result<Vec<SymbolHit>> {
		let mut out = Vec::new();
		for (_key, client) in pool.active_entries() {
			let params = WorkspaceSymbolParams { query: query.to_string(), work_done_progress_params: WorkDoneProgressParams::default(), partial_result_params: PartialResultParams::default() };
			if let Ok(Some(response)) = crate::tools::shared::call::<WorkspaceSymbolRequest>(&client, params).await {
				match response {
					lsp_types::WorkspaceSymbolResponse::Flat(items) => out.extend(from_symbol_information(items)),
					lsp_types::WorkspaceSymbolResponse::Nested(items) => {
						for item in items {
							let (uri, range) = match &item.location {
								lsp_types::OneOf::Left(loc) => (loc.uri.clone(), loc.range),
								lsp_types::OneOf::Right(loc) => (loc.uri.clone(), lsp_types::Range::default()),
							};
							out.push(SymbolHit { name: item.name, kind: item.kind, container_name: item.container_name, uri, range, score: 0 });
						}
					}
				}
			}
		}
		Ok(out)
	}
}

#[async_trait]
impl Tool for FindSymbolsTool {
	fn name(&self) -> &'static str {
		"findSymbols"
	}

	fn kind(&self) -> ToolKind {
		ToolKind::ReadOnly
	}

	async fn call(&self, pool: &Arc<ConnectionPool>, params: Value) -> Result<Value> {
		let params: FindSymbolsParams = serde_json::from_value(params)?;
		validate_query_len(&params.query)?;

		let cache_key = format!("{:?}|{:?}|{}|{:?}|{:?}", params.scope, params.uri, params.query, params.kinds, params.max_results);
		if let Some(hits) = self.cache.get(&cache_key) {
			return Ok(serde_json::to_value(FindSymbolsResult { symbols: hits })?);
		}

		let raw = match params.scope {
			SymbolScope::Document => {
				let uri = params.uri.clone().ok_or_else(|| Error::InvalidParams("uri is required for document scope".to_string()))?;
				self.document_symbols(pool, &uri).await?
			}
			SymbolScope::Workspace => self.workspace_symbols(pool, &params.query).await?,
		};

		let mut hits = apply_scoring(raw, &params.query);
		if !params.kinds.is_empty() {
			hits.retain(|h| params.kinds.iter().any(|k| k.matches(h.kind)));
		}
		hits.sort_by(|a, b| b.score.cmp(&a.score).then_with(|| a.name.cmp(&b.name)));
		if let Some(max) = params.max_results {
			hits.truncate(max);
		}

		let uris: Vec<String> = hits.iter().map(|h| h.uri.as_str().to_string()).collect();
		self.cache.insert(cache_key, hits.clone(), uris);
		Ok(serde_json::to_value(FindSymbolsResult { symbols: hits })?)
	}

	fn invalidate(&self, uri: &str) {
		self.cache.invalidate_uri(uri);
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn score_ranks_exact_prefix_abbreviation_then_substring() {
		assert_eq!(score("getuser", "getUser"), 100);
		assert_eq!(score("get", "getUser"), 80);
		assert_eq!(score("fbb", "fooBarBaz"), 70);
		assert_eq!(score("u", "getUserById"), 65);
		assert_eq!(score("user", "getUserById"), 50);
		assert_eq!(score("zzz", "getUserById"), 0);
	}

	#[test]
	fn score_order_is_stable_across_input_permutations() {
		let names = ["getUser", "fetchUser", "userGetter"];
		let mut scores: Vec<i32> = names.iter().map(|n| score("get", n)).collect();
		let forward = scores.clone();
		scores.reverse();
		let reversed_back: Vec<i32> = scores.into_iter().rev().collect();
		assert_eq!(forward, reversed_back);
	}

	#[test]
	fn glob_pattern_compiles_substring_prefix_and_suffix_forms() {
		let substring = glob_pattern("*User*").unwrap();
		assert!(substring.is_match("getUserById"));
		assert!(!substring.is_match("getPostById"));

		let prefix = glob_pattern("get*").unwrap();
		assert!(prefix.is_match("getUser"));
		assert!(!prefix.is_match("setUser"));

		let suffix = glob_pattern("*ById").unwrap();
		assert!(suffix.is_match("getUserById"));
		assert!(!suffix.is_match("getUserByName"));

		assert!(glob_pattern("plainQuery").is_none());
	}

	#[test]
	fn apply_scoring_drops_zero_score_hits() {
		let hits = vec![
			SymbolHit { name: "getUser".to_string(), kind: SymbolKind::FUNCTION, container_name: None, uri: Url::parse("file:///a.rs").unwrap(), range: Default::default(), score: 0 },
			SymbolHit { name: "irrelevant".to_string(), kind: SymbolKind::FUNCTION, container_name: None, uri: Url::parse("file:///a.rs").unwrap(), range: Default::default(), score: 0 },
		];
		let scored = apply_scoring(hits, "getUser");
		assert_eq!(scored.len(), 1);
		assert_eq!(scored[0].name, "getUser");
		assert_eq!(scored[0].score, 100);
	}

	#[test]
	fn symbol_kind_bucket_matches_struct_as_class_and_field_as_property() {
		assert!(SymbolKindBucket::Class.matches(SymbolKind::STRUCT));
		assert!(SymbolKindBucket::Property.matches(SymbolKind::FIELD));
		assert!(!SymbolKindBucket::Function.matches(SymbolKind::VARIABLE));
	}
}
