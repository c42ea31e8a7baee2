//! JSON-RPC 2.0 message shapes carried over the LSP base protocol.
//!
//! These are deliberately untyped at the `params`/`result` level (`JsonValue`)
//! — the client only needs to route and correlate messages; the tool layer
//! above knows how to interpret a given method's payload via `lsp_types`.

use std::fmt;

use serde::{Deserialize, Serialize};

pub type JsonValue = serde_json::Value;

/// JSON-RPC request id — either a number or a string, per spec.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
	Number(i64),
	String(String),
}

impl fmt::Display for RequestId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			RequestId::Number(n) => write!(f, "{n}"),
			RequestId::String(s) => write!(f, "{s}"),
		}
	}
}

impl From<i64> for RequestId {
	fn from(n: i64) -> Self {
		RequestId::Number(n)
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseError {
	pub code: i64,
	pub message: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub data: Option<JsonValue>,
}

impl ResponseError {
	pub const METHOD_NOT_FOUND: i64 = -32601;
	pub const REQUEST_CANCELLED: i64 = -32800;

	pub fn is_method_not_found(&self) -> bool {
		self.code == Self::METHOD_NOT_FOUND
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnyRequest {
	pub jsonrpc: JsonRpcVersion,
	pub id: RequestId,
	pub method: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub params: Option<JsonValue>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnyNotification {
	pub jsonrpc: JsonRpcVersion,
	pub method: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub params: Option<JsonValue>,
}

impl AnyNotification {
	pub fn new(method: impl Into<String>, params: JsonValue) -> Self {
		Self {
			jsonrpc: JsonRpcVersion,
			method: method.into(),
			params: Some(params),
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnyResponse {
	pub jsonrpc: JsonRpcVersion,
	pub id: RequestId,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub result: Option<JsonValue>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub error: Option<ResponseError>,
}

impl AnyResponse {
	pub fn new_ok(id: RequestId, result: JsonValue) -> Self {
		Self {
			jsonrpc: JsonRpcVersion,
			id,
			result: Some(result),
			error: None,
		}
	}

	pub fn new_err(id: RequestId, error: ResponseError) -> Self {
		Self {
			jsonrpc: JsonRpcVersion,
			id,
			result: None,
			error: Some(error),
		}
	}

	pub fn into_result(self) -> Result<JsonValue, ResponseError> {
		match self.error {
			Some(e) => Err(e),
			None => Ok(self.result.unwrap_or(JsonValue::Null)),
		}
	}
}

/// `"2.0"` — a zero-sized marker so we never have to thread the literal
/// through call sites, but still (de)serialize the field wire format expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JsonRpcVersion;

impl Serialize for JsonRpcVersion {
	fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.serialize_str("2.0")
	}
}

impl<'de> Deserialize<'de> for JsonRpcVersion {
	fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		let s = String::deserialize(deserializer)?;
		if s != "2.0" {
			return Err(serde::de::Error::custom(format!("unsupported jsonrpc version: {s}")));
		}
		Ok(JsonRpcVersion)
	}
}

/// A decoded base-protocol frame, before we know which of the three JSON-RPC
/// shapes it is. Distinguished by presence of `id`/`method`/`result`/`error`.
#[derive(Debug, Clone)]
pub enum Message {
	Request(AnyRequest),
	Response(AnyResponse),
	Notification(AnyNotification),
}

impl Message {
	pub fn from_value(value: JsonValue) -> Result<Self, serde_json::Error> {
		let has_id = value.get("id").is_some();
		let has_method = value.get("method").is_some();
		if has_id && has_method {
			Ok(Message::Request(serde_json::from_value(value)?))
		} else if has_id {
			Ok(Message::Response(serde_json::from_value(value)?))
		} else {
			Ok(Message::Notification(serde_json::from_value(value)?))
		}
	}

	pub fn to_value(&self) -> Result<JsonValue, serde_json::Error> {
		match self {
			Message::Request(r) => serde_json::to_value(r),
			Message::Response(r) => serde_json::to_value(r),
			Message::Notification(n) => serde_json::to_value(n),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn classifies_request_response_notification() {
		let req = json!({"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {}});
		assert!(matches!(Message::from_value(req).unwrap(), Message::Request(_)));

		let resp = json!({"jsonrpc": "2.0", "id": 1, "result": {}});
		assert!(matches!(Message::from_value(resp).unwrap(), Message::Response(_)));

		let notif = json!({"jsonrpc": "2.0", "method": "textDocument/publishDiagnostics", "params": {}});
		assert!(matches!(Message::from_value(notif).unwrap(), Message::Notification(_)));
	}

	#[test]
	fn request_id_display_matches_variant() {
		assert_eq!(RequestId::Number(42).to_string(), "42");
		assert_eq!(RequestId::String("abc".into()).to_string(), "abc");
	}
}
