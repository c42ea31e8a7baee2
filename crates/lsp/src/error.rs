use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the transport and client layers.
///
/// This is the narrow slice of error kinds that belongs to one LSP
/// session: validation and orchestration errors (`NoLanguageServer`,
/// `TransactionFailed`, ...) live one layer up, in `polylsp-broker`.
#[derive(Debug, Error)]
pub enum Error {
	/// The subprocess could not be spawned or its stdio could not be wired up.
	#[error("i/o error: {0}")]
	Io(#[from] std::io::Error),

	/// A message could not be framed or decoded as JSON-RPC.
	#[error("protocol error: {0}")]
	Protocol(String),

	/// A response or notification payload failed to (de)serialize.
	#[error("json error: {0}")]
	Json(#[from] serde_json::Error),

	/// `initialize` did not complete within the configured deadline.
	#[error("initialize handshake did not complete: {0}")]
	InitializeFailed(String),

	/// A request was cancelled by its caller before a response arrived.
	#[error("request cancelled")]
	Cancelled,

	/// A request exceeded its deadline.
	#[error("request timed out")]
	Timeout,

	/// The subprocess exited or the client was stopped while a request was
	/// in flight, or a new request was issued against a non-`Ready` client.
	#[error("client closed")]
	ClientClosed,

	/// The server returned a JSON-RPC error for a request.
	#[error("server error {code}: {message}")]
	Server { code: i64, message: String },

	/// The requested method is not advertised in the server's capabilities.
	#[error("not supported by server: {0}")]
	NotSupported(String),
}
