use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors from language detection and provider install strategies.
#[derive(Debug, Error)]
pub enum Error {
	/// No recipe matched during detection, or the matched recipe's server
	/// binary is not available. Carries an install hint when one exists.
	#[error("no language server available for {language}{}", .hint.as_deref().map(|h| format!(" ({h})")).unwrap_or_default())]
	NoLanguageServer { language: String, hint: Option<String> },

	/// `install()` was called without the explicit user-consent flag.
	#[error("install of {0} requires explicit user consent")]
	InstallNotConsented(String),

	/// `install()` was called while running inside a container, where
	/// servers are assumed pre-installed.
	#[error("install of {0} is refused inside a container")]
	InstallRefusedInContainer(String),

	/// The install strategy itself failed (subprocess, network, filesystem).
	#[error("install of {language} failed: {reason}")]
	InstallFailed { language: String, reason: String },

	#[error("io error: {0}")]
	Io(#[from] std::io::Error),

	#[cfg(feature = "provider-install")]
	#[error("http error: {0}")]
	Http(#[from] reqwest::Error),
}
