//! Helpers shared by several tools: typed LSP request dispatch, one-line
//! disk previews, and the grep-based fallback suggested on an empty result.

use lsp_types::request::Request;
use lsp_types::{Location, Position, Url};

use crate::error::{Error, Result};
use polylsp_lsp::Client;

/// Sends a typed LSP request and decodes its typed result, so each tool
/// builds a `lsp_types` params struct instead of hand-assembling JSON.
pub async fn call<R: Request>(client: &Client, params: R::Params) -> Result<R::Result> {
	let value = serde_json::to_value(params)?;
	let response = client.send_request(R::METHOD, Some(value), None).await?;
	Ok(serde_json::from_value(response)?)
}

/// Maximum query/pattern length accepted by any tool that builds a regex
/// or globs user input, per spec.md §4.5's DoS note.
pub const MAX_QUERY_LEN: usize = 256;

pub fn validate_query_len(query: &str) -> Result<()> {
	if query.len() > MAX_QUERY_LEN {
		return Err(Error::InvalidParams(format!("query exceeds {MAX_QUERY_LEN} characters")));
	}
	Ok(())
}

/// Reads the line at `position` (if the file and line exist) for a short
/// preview, trimmed of leading/trailing whitespace.
pub fn one_line_preview(uri: &Url, position: Position) -> Option<String> {
	let path = uri.to_file_path().ok()?;
	let content = std::fs::read_to_string(path).ok()?;
	content.lines().nth(position.line as usize).map(|l| l.trim().to_string())
}

pub fn one_line_preview_at(location: &Location) -> Option<String> {
	one_line_preview(&location.uri, location.range.start)
}

/// A tailored `grep -n` suggestion for when a server returns no results,
/// e.g. `grep -n 'class\|interface\|type Foo'`.
pub fn grep_fallback(tool: &str, symbol: &str) -> String {
	match tool {
		"navigate" => format!("grep -rn 'class\\|interface\\|type {symbol}'"),
		"findUsages" => format!("grep -rn '\\b{symbol}\\b'"),
		_ => format!("grep -rn '{symbol}'"),
	}
}

/// Sorts locations by relevance relative to `source_uri`: same file first,
/// then same directory, then everything else; order within a bucket is
/// preserved (a stable sort keeps server order).
pub fn sort_by_relevance<T>(items: &mut [T], source_uri: &Url, uri_of: impl Fn(&T) -> &Url) {
	let source_dir = source_uri.as_str().rsplit_once('/').map(|(dir, _)| dir.to_string());
	items.sort_by_key(|item| {
		let uri = uri_of(item);
		if uri == source_uri {
			0
		} else if source_dir.as_deref() == uri.as_str().rsplit_once('/').map(|(dir, _)| dir) {
			1
		} else {
			2
		}
	});
}

#[cfg(test)]
mod tests {
	use super::*;

	fn url(s: &str) -> Url {
		Url::parse(s).unwrap()
	}

	#[test]
	fn validate_query_len_rejects_past_limit() {
		assert!(validate_query_len(&"a".repeat(MAX_QUERY_LEN)).is_ok());
		assert!(validate_query_len(&"a".repeat(MAX_QUERY_LEN + 1)).is_err());
	}

	#[test]
	fn grep_fallback_tailors_by_tool() {
		assert_eq!(grep_fallback("navigate", "Foo"), "grep -rn 'class\\|interface\\|type Foo'");
		assert_eq!(grep_fallback("findUsages", "Foo"), "grep -rn '\\bFoo\\b'");
		assert_eq!(grep_fallback("other", "Foo"), "grep -rn 'Foo'");
	}

	#[test]
	fn sort_by_relevance_buckets_same_file_then_same_dir_then_rest() {
		let source = url("file:///a/b/source.rs");
		let mut items = vec![url("file:///a/c/other.rs"), url("file:///a/b/sibling.rs"), url("file:///a/b/source.rs")];
		sort_by_relevance(&mut items, &source, |u| u);
		assert_eq!(items[0], url("file:///a/b/source.rs"));
		assert_eq!(items[1], url("file:///a/b/sibling.rs"));
		assert_eq!(items[2], url("file:///a/c/other.rs"));
	}

	#[test]
	fn sort_by_relevance_is_stable_within_a_bucket() {
		let source = url("file:///a/b/source.rs");
		let mut items = vec![url("file:///x/one.rs"), url("file:///x/two.rs")];
		sort_by_relevance(&mut items, &source, |u| u);
		assert_eq!(items[0], url("file:///x/one.rs"));
		assert_eq!(items[1], url("file:///x/two.rs"));
	}
}
