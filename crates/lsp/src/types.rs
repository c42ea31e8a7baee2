use std::collections::HashMap;

use serde_json::Value as JsonValue;

/// The launch-time view of a language recipe, produced by
/// `polylsp-language`'s detector or supplied directly by a caller's
/// defaults.
#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
	pub command: String,
	pub args: Vec<String>,
	pub env: HashMap<String, String>,
	pub initialization_options: Option<JsonValue>,
	/// Overrides `command`/`args` when running inside a container, where the
	/// server is assumed pre-installed under a different entry point.
	pub container_command: Option<(String, Vec<String>)>,
}

impl ServerConfig {
	/// Picks `container_command` over `command`/`args` when `in_container` is
	/// set and a container override is present.
	pub fn resolved_argv(&self, in_container: bool) -> (&str, &[String]) {
		if in_container {
			if let Some((command, args)) = &self.container_command {
				return (command.as_str(), args.as_slice());
			}
		}
		(self.command.as_str(), self.args.as_slice())
	}
}
