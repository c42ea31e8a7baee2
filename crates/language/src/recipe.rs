use std::path::PathBuf;

use polylsp_lsp::ServerConfig;
use serde_json::Value as JsonValue;

/// An immutable, shared description of one language's server launch and
/// identification rules.
#[derive(Debug, Clone)]
pub struct LanguageRecipe {
	/// Stable identity, e.g. `"typescript"`, `"go"`, `"rust"`.
	pub id: &'static str,
	pub display_name: &'static str,
	pub extensions: &'static [&'static str],
	pub command: &'static str,
	pub args: &'static [&'static str],
	pub container_command: Option<(&'static str, &'static [&'static str])>,
	pub initialization_options: Option<JsonValue>,
	/// A hint consumed only by `Provider::install`, e.g. `"npm"`, `"gem"`.
	pub package_manager_hint: Option<&'static str>,
}

impl LanguageRecipe {
	pub fn server_config(&self) -> ServerConfig {
		ServerConfig {
			command: self.command.to_string(),
			args: self.args.iter().map(|s| s.to_string()).collect(),
			env: Default::default(),
			initialization_options: self.initialization_options.clone(),
			container_command: self.container_command.map(|(cmd, args)| (cmd.to_string(), args.iter().map(|s| s.to_string()).collect())),
		}
	}
}

/// A `LanguageRecipe` resolved against a concrete workspace root.
#[derive(Debug, Clone)]
pub struct DetectedLanguage {
	pub recipe: LanguageRecipe,
	pub workspace: PathBuf,
}

impl DetectedLanguage {
	pub fn id(&self) -> &'static str {
		self.recipe.id
	}

	pub fn server_command(&self) -> Vec<String> {
		std::iter::once(self.recipe.command.to_string()).chain(self.recipe.args.iter().map(|s| s.to_string())).collect()
	}

	pub fn server_config(&self) -> ServerConfig {
		self.recipe.server_config()
	}
}

/// Identifies at most one live `Client`: `(languageId, workspacePath)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionKey {
	pub language_id: String,
	pub workspace: PathBuf,
}

impl ConnectionKey {
	pub fn new(language_id: impl Into<String>, workspace: impl Into<PathBuf>) -> Self {
		Self { language_id: language_id.into(), workspace: workspace.into() }
	}
}

