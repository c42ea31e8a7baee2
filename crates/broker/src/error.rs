use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Broker-level error kinds. `InvalidParams` through `InternalError` are
/// the caller-visible codes the tool dispatch layer converts structured
/// results or raised errors into.
#[derive(Debug, Error)]
pub enum Error {
	#[error("invalid params: {0}")]
	InvalidParams(String),

	#[error("no language server available for {language}{}", .hint.as_deref().map(|h| format!(" ({h})")).unwrap_or_default())]
	NoLanguageServer { language: String, hint: Option<String> },

	#[error("client closed")]
	ClientClosed,

	#[error("request cancelled")]
	Cancelled,

	#[error("operation timed out")]
	Timeout,

	#[error("initialize handshake did not complete: {0}")]
	InitializeFailed(String),

	#[error("not supported: {0}")]
	NotSupported(String),

	#[error("not supported by any active server")]
	NotSupportedByAny,

	#[error("transaction failed: {reason}{}", if *.rolled_back { " (rolled back)" } else { "" })]
	TransactionFailed { reason: String, rolled_back: bool },

	#[error("rollback failed: {reason}; original failure: {cause}")]
	RollbackFailed { reason: String, cause: String },

	#[error("internal error: {0}")]
	Internal(String),

	#[error(transparent)]
	Lsp(#[from] polylsp_lsp::Error),

	#[error(transparent)]
	Language(#[from] polylsp_language::Error),

	#[error("io error: {0}")]
	Io(#[from] std::io::Error),

	#[error("json error: {0}")]
	Json(#[from] serde_json::Error),
}

/// The machine-readable code, independent of the human-readable message —
/// what `applyEdit`/`applyCodeAction` convert a raised [`Error`] into for
/// callers that need to branch on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
	InvalidParams,
	NoLanguageServer,
	ClientClosed,
	Cancelled,
	Timeout,
	InitializeFailed,
	NotSupported,
	NotSupportedByAny,
	TransactionFailed,
	RollbackFailed,
	InternalError,
}

impl From<&Error> for ErrorCode {
	fn from(e: &Error) -> Self {
		match e {
			Error::InvalidParams(_) => ErrorCode::InvalidParams,
			Error::NoLanguageServer { .. } => ErrorCode::NoLanguageServer,
			Error::ClientClosed => ErrorCode::ClientClosed,
			Error::Cancelled => ErrorCode::Cancelled,
			Error::Timeout => ErrorCode::Timeout,
			Error::InitializeFailed(_) => ErrorCode::InitializeFailed,
			Error::NotSupported(_) => ErrorCode::NotSupported,
			Error::NotSupportedByAny => ErrorCode::NotSupportedByAny,
			Error::TransactionFailed { .. } => ErrorCode::TransactionFailed,
			Error::RollbackFailed { .. } => ErrorCode::RollbackFailed,
			Error::Internal(_) => ErrorCode::InternalError,
			Error::Lsp(inner) => match inner {
				polylsp_lsp::Error::ClientClosed => ErrorCode::ClientClosed,
				polylsp_lsp::Error::Cancelled => ErrorCode::Cancelled,
				polylsp_lsp::Error::Timeout => ErrorCode::Timeout,
				polylsp_lsp::Error::InitializeFailed(_) => ErrorCode::InitializeFailed,
				polylsp_lsp::Error::NotSupported(_) => ErrorCode::NotSupported,
				_ => ErrorCode::InternalError,
			},
			Error::Language(_) => ErrorCode::NoLanguageServer,
			Error::Io(_) | Error::Json(_) => ErrorCode::InternalError,
		}
	}
}
