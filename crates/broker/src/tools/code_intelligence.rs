//! `getCodeIntelligence`: hover / signature / completion.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lsp_types::request::{Completion, HoverRequest, SignatureHelpRequest};
use lsp_types::{
	CompletionContext, CompletionItem, CompletionParams, CompletionResponse, Hover, HoverContents, HoverParams,
	MarkedString, MarkupContent, Position, SignatureHelp, SignatureHelpParams, TextDocumentIdentifier,
	TextDocumentPositionParams, Url, WorkDoneProgressParams,
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::OnceLock;

use crate::cache::Cache;
use crate::error::{Error, Result};
use crate::pool::ConnectionPool;
use crate::tools::shared::call;
use crate::tools::{Tool, ToolKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum IntelligenceType {
	Hover,
	Signature,
	Completion,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CodeIntelligenceParams {
	pub uri: Url,
	pub position: Position,
	#[serde(rename = "type")]
	pub kind: IntelligenceType,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct HoverResult {
	pub type_signature: Option<String>,
	pub documentation: Option<String>,
	pub example: Option<String>,
}

#[derive(Debug, Clone, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SignatureResult {
	pub label: String,
	pub active_parameter_label: Option<String>,
	pub parameter_labels: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct CompletionHit {
	pub label: String,
	pub kind: Option<i32>,
	pub detail: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum IntelligenceResult {
	Hover(HoverResult),
	Signature(SignatureResult),
	Completion(Vec<CompletionHit>),
}

type CacheKey = (Url, u32, u32, IntelligenceType);

pub struct CodeIntelligenceTool {
	cache: Cache<CacheKey, IntelligenceResult>,
}

impl Clone for IntelligenceResult {
	fn clone(&self) -> Self {
		match self {
			IntelligenceResult::Hover(h) => IntelligenceResult::Hover(h.clone()),
			IntelligenceResult::Signature(s) => IntelligenceResult::Signature(s.clone()),
			IntelligenceResult::Completion(c) => IntelligenceResult::Completion(c.clone()),
		}
	}
}

impl Default for CodeIntelligenceTool {
	fn default() -> Self {
		Self { cache: Cache::new(1024, Duration::from_secs(30)) }
	}
}

fn hover_contents_to_markdown(contents: HoverContents) -> String {
	match contents {
		HoverContents::Scalar(MarkedString::String(s)) => s,
		HoverContents::Scalar(MarkedString::LanguageString(ls)) => format!("```{}\n{}\n```", ls.language, ls.value),
		HoverContents::Array(items) => items
			.into_iter()
			.map(|item| match item {
				MarkedString::String(s) => s,
				MarkedString::LanguageString(ls) => format!("```{}\n{}\n```", ls.language, ls.value),
			})
			.collect::<Vec<_>>()
			.join("\n\n"),
		HoverContents::Markup(MarkupContent { value, .. }) => value,
	}
}

/// Splits hover Markdown into a leading fenced code block (the type
/// signature) and the remaining prose; pulls a second fenced block out as
/// an "example" if one follows the prose.
fn parse_hover_markdown(markdown: &str) -> HoverResult {
	static CODE_BLOCK: OnceLock<Regex> = OnceLock::new();
	let re = CODE_BLOCK.get_or_init(|| Regex::new(r"(?s)```[a-zA-Z0-9_+-]*\n(.*?)\n```").unwrap());

	let mut blocks: Vec<(usize, usize, String)> = re.captures_iter(markdown).map(|c| (c.get(0).unwrap().start(), c.get(0).unwrap().end(), c[1].to_string())).collect();
	if blocks.is_empty() {
		return HoverResult { type_signature: None, documentation: Some(markdown.trim().to_string()).filter(|s| !s.is_empty()), example: None };
	}

	let (_, first_end, first_code) = blocks.remove(0);
	let type_signature = Some(first_code);
	let prose_end = blocks.first().map(|(s, _, _)| *s).unwrap_or(markdown.len());
	let documentation = markdown[first_end..prose_end].trim().to_string();
	let example = blocks.first().map(|(_, _, code)| code.clone());

	HoverResult { type_signature, documentation: Some(documentation).filter(|s| !s.is_empty()), example }
}

/// Parses a full `Hover` response into its type-signature/prose/example
/// split. Exposed for `getRelatedAPIs`, which wants the same prose
/// extraction without going through the cache-backed tool entry point.
pub fn hover_to_result(hover: Hover) -> HoverResult {
	parse_hover_markdown(&hover_contents_to_markdown(hover.contents))
}

fn is_test_utility(label: &str) -> bool {
	static TEST_PATTERN: OnceLock<Regex> = OnceLock::new();
	let re = TEST_PATTERN.get_or_init(|| Regex::new(r"(?i)^(mock|fake|stub|test)([_A-Z].*)?$").unwrap());
	re.is_match(label)
}

fn completion_kind_priority(kind: Option<lsp_types::CompletionItemKind>) -> u32 {
	use lsp_types::CompletionItemKind as K;
	match kind {
		Some(K::METHOD) => 0,
		Some(K::FUNCTION) => 1,
		Some(K::PROPERTY) => 2,
		Some(K::FIELD) => 3,
		Some(K::VARIABLE) => 4,
		Some(K::CLASS) => 5,
		Some(K::INTERFACE) => 6,
		Some(K::MODULE) => 7,
		Some(K::CONSTANT) => 8,
		_ => 9,
	}
}

impl CodeIntelligenceTool {
	async fn hover(&self, client: &polylsp_lsp::Client, uri: &Url, position: Position) -> Result<HoverResult> {
		let params = HoverParams {
			text_document_position_params: TextDocumentPositionParams { text_document: TextDocumentIdentifier { uri: uri.clone() }, position },
			work_done_progress_params: WorkDoneProgressParams::default(),
		};
		let hover: Option<Hover> = call::<HoverRequest>(client, params).await?;
		Ok(hover.map(|h| parse_hover_markdown(&hover_contents_to_markdown(h.contents))).unwrap_or_default())
	}

	async fn signature(&self, client: &polylsp_lsp::Client, uri: &Url, position: Position) -> Result<SignatureResult> {
		let params = SignatureHelpParams {
			text_document_position_params: TextDocumentPositionParams { text_document: TextDocumentIdentifier { uri: uri.clone() }, position },
			work_done_progress_params: WorkDoneProgressParams::default(),
			context: None,
		};
		let help: Option<SignatureHelp> = call::<SignatureHelpRequest>(client, params).await?;
		let Some(help) = help else { return Ok(SignatureResult::default()) };
		let active = help.active_signature.unwrap_or(0) as usize;
		let Some(sig) = help.signatures.get(active) else { return Ok(SignatureResult::default()) };

		let parameter_labels: Vec<String> = sig
			.parameters
			.clone()
			.unwrap_or_default()
			.into_iter()
			.map(|p| match p.label {
				lsp_types::ParameterLabel::Simple(s) => s,
				lsp_types::ParameterLabel::LabelOffsets([start, end]) => {
					let (start, end) = (start as usize, end as usize);
					sig.label.get(start..end).unwrap_or_default().to_string()
				}
			})
			.collect();

		let active_parameter_label = sig.active_parameter.or(help.active_parameter).and_then(|i| parameter_labels.get(i as usize).cloned());

		Ok(SignatureResult { label: sig.label.clone(), active_parameter_label, parameter_labels })
	}

	async fn completion(&self, client: &polylsp_lsp::Client, uri: &Url, position: Position) -> Result<Vec<CompletionHit>> {
		let params = CompletionParams {
			text_document_position: TextDocumentPositionParams { text_document: TextDocumentIdentifier { uri: uri.clone() }, position },
			work_done_progress_params: WorkDoneProgressParams::default(),
			partial_result_params: lsp_types::PartialResultParams::default(),
			context: Some(CompletionContext { trigger_kind: lsp_types::CompletionTriggerKind::INVOKED, trigger_character: None }),
		};
		let response: Option<CompletionResponse> = call::<Completion>(client, params).await?;
		let items: Vec<CompletionItem> = match response {
			Some(CompletionResponse::Array(items)) => items,
			Some(CompletionResponse::List(list)) => list.items,
			None => Vec::new(),
		};

		let mut items: Vec<CompletionItem> = items
			.into_iter()
			.filter(|i| !i.deprecated.unwrap_or(false))
			.filter(|i| !i.label.starts_with('_') && !i.label.starts_with('$'))
			.filter(|i| !is_test_utility(&i.label))
			.collect();

		items.sort_by(|a, b| completion_kind_priority(a.kind).cmp(&completion_kind_priority(b.kind)).then_with(|| a.sort_text.cmp(&b.sort_text)));

		Ok(items
			.into_iter()
			.map(|i| CompletionHit { label: i.label, kind: i.kind.and_then(|k| serde_json::to_value(k).ok()).and_then(|v| v.as_i64()).map(|v| v as i32), detail: i.detail })
			.collect())
	}
}

#[async_trait]
impl Tool for CodeIntelligenceTool {
	fn name(&self) -> &'static str {
		"getCodeIntelligence"
	}

	fn kind(&self) -> ToolKind {
		ToolKind::ReadOnly
	}

	async fn call(&self, pool: &Arc<ConnectionPool>, params: Value) -> Result<Value> {
		let params: CodeIntelligenceParams = serde_json::from_value(params)?;
		let cache_key: CacheKey = (params.uri.clone(), params.position.line, params.position.character, params.kind);
		let cacheable = !matches!(params.kind, IntelligenceType::Completion);
		if cacheable {
			if let Some(cached) = self.cache.get(&cache_key) {
				return Ok(serde_json::to_value(cached)?);
			}
		}

		let path = params.uri.to_file_path().map_err(|_| Error::InvalidParams("uri is not a file:// path".to_string()))?;
		let workspace = path.parent().unwrap_or(&path).to_path_buf();
		let Some(client) = pool.get_for_file(&path, &workspace).await else {
			return Ok(serde_json::to_value(Value::Null)?);
		};

		let result = match params.kind {
			IntelligenceType::Hover => IntelligenceResult::Hover(self.hover(&client, &params.uri, params.position).await?),
			IntelligenceType::Signature => IntelligenceResult::Signature(self.signature(&client, &params.uri, params.position).await?),
			IntelligenceType::Completion => IntelligenceResult::Completion(self.completion(&client, &params.uri, params.position).await?),
		};

		if cacheable {
			self.cache.insert(cache_key, result.clone(), std::iter::once(params.uri.as_str().to_string()));
		}
		Ok(serde_json::to_value(result)?)
	}

	fn invalidate(&self, uri: &str) {
		self.cache.invalidate_uri(uri);
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parse_hover_markdown_splits_signature_prose_and_example() {
		let md = "```rust\nfn foo() -> i32\n```\n\nDoes a thing.\n\n```rust\nfoo();\n```";
		let result = parse_hover_markdown(md);
		assert_eq!(result.type_signature.as_deref(), Some("fn foo() -> i32"));
		assert_eq!(result.documentation.as_deref(), Some("Does a thing."));
		assert_eq!(result.example.as_deref(), Some("foo();"));
	}

	#[test]
	fn parse_hover_markdown_with_no_code_block_is_all_prose() {
		let result = parse_hover_markdown("just some prose");
		assert_eq!(result.type_signature, None);
		assert_eq!(result.documentation.as_deref(), Some("just some prose"));
		assert_eq!(result.example, None);
	}

	#[test]
	fn parse_hover_markdown_with_only_signature_has_no_example() {
		let md = "```rust\nfn foo()\n```";
		let result = parse_hover_markdown(md);
		assert_eq!(result.type_signature.as_deref(), Some("fn foo()"));
		assert_eq!(result.documentation, None);
		assert_eq!(result.example, None);
	}

	#[test]
	fn is_test_utility_matches_mock_fake_stub_test_prefixes() {
		assert!(is_test_utility("mockServer"));
		assert!(is_test_utility("FakeClient"));
		assert!(is_test_utility("stub_response"));
		assert!(is_test_utility("Test"));
		assert!(!is_test_utility("testimony"));
		assert!(!is_test_utility("contest"));
		assert!(!is_test_utility("realFunction"));
	}

	#[test]
	fn completion_kind_priority_orders_methods_before_classes_before_unknown() {
		use lsp_types::CompletionItemKind as K;
		assert!(completion_kind_priority(Some(K::METHOD)) < completion_kind_priority(Some(K::FUNCTION)));
		assert!(completion_kind_priority(Some(K::FUNCTION)) < completion_kind_priority(Some(K::CLASS)));
		assert!(completion_kind_priority(Some(K::CLASS)) < completion_kind_priority(None));
	}
}
