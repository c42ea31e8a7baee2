//! The static table of `LanguageRecipe`s built once at process start.

use crate::recipe::LanguageRecipe;

/// A read-mostly registry of `LanguageRecipe`s, keyed by `id`.
///
/// Built once from [`LanguageTable::default`]; `Detector::with_recipes` lets
/// tests inject a fake table instead.
#[derive(Debug, Clone)]
pub struct LanguageTable {
	recipes: Vec<LanguageRecipe>,
}

impl LanguageTable {
	pub fn new(recipes: Vec<LanguageRecipe>) -> Self {
		Self { recipes }
	}

	pub fn get(&self, id: &str) -> Option<&LanguageRecipe> {
		self.recipes.iter().find(|r| r.id == id)
	}

	pub fn recipes(&self) -> impl Iterator<Item = &LanguageRecipe> {
		self.recipes.iter()
	}
}

impl Default for LanguageTable {
	fn default() -> Self {
		Self::new(vec![
			LanguageRecipe {
				id: "rust",
				display_name: "Rust",
				extensions: &["rs"],
				command: "rust-analyzer",
				args: &[],
				container_command: None,
				initialization_options: None,
				package_manager_hint: Some("github-release"),
			},
			LanguageRecipe {
				id: "go",
				display_name: "Go",
				extensions: &["go"],
				command: "gopls",
				args: &[],
				container_command: None,
				initialization_options: None,
				package_manager_hint: Some("go-install"),
			},
			LanguageRecipe {
				id: "csharp",
				display_name: "C#",
				extensions: &["cs", "csx"],
				command: "csharp-ls",
				args: &[],
				container_command: None,
				initialization_options: None,
				package_manager_hint: Some("dotnet"),
			},
			LanguageRecipe {
				id: "java",
				display_name: "Java",
				extensions: &["java"],
				command: "jdtls",
				args: &[],
				container_command: None,
				initialization_options: None,
				package_manager_hint: None,
			},
			LanguageRecipe {
				id: "kotlin",
				display_name: "Kotlin",
				extensions: &["kt", "kts"],
				command: "kotlin-language-server",
				args: &[],
				container_command: None,
				initialization_options: None,
				package_manager_hint: None,
			},
			LanguageRecipe {
				id: "swift",
				display_name: "Swift",
				extensions: &["swift"],
				command: "sourcekit-lsp",
				args: &[],
				container_command: None,
				initialization_options: None,
				package_manager_hint: None,
			},
			LanguageRecipe {
				id: "cpp",
				display_name: "C/C++",
				extensions: &["c", "h", "cc", "cpp", "cxx", "hh", "hpp", "hxx"],
				command: "clangd",
				args: &["--background-index"],
				container_command: None,
				initialization_options: None,
				package_manager_hint: Some("system-package-manager"),
			},
			LanguageRecipe {
				id: "ruby",
				display_name: "Ruby",
				extensions: &["rb", "rake", "gemspec"],
				command: "solargraph",
				args: &["stdio"],
				container_command: None,
				initialization_options: None,
				package_manager_hint: Some("gem"),
			},
			LanguageRecipe {
				id: "php",
				display_name: "PHP",
				extensions: &["php"],
				command: "intelephense",
				args: &["--stdio"],
				container_command: None,
				initialization_options: None,
				package_manager_hint: Some("npm"),
			},
			LanguageRecipe {
				id: "python",
				display_name: "Python",
				extensions: &["py", "pyi"],
				command: "pyright-langserver",
				args: &["--stdio"],
				container_command: None,
				initialization_options: None,
				package_manager_hint: Some("npm"),
			},
			LanguageRecipe {
				id: "typescript",
				display_name: "TypeScript",
				extensions: &["ts", "tsx", "mts", "cts"],
				command: "typescript-language-server",
				args: &["--stdio"],
				container_command: None,
				initialization_options: None,
				package_manager_hint: Some("npm"),
			},
			LanguageRecipe {
				id: "javascript",
				display_name: "JavaScript",
				extensions: &["js", "jsx", "mjs", "cjs"],
				command: "typescript-language-server",
				args: &["--stdio"],
				container_command: None,
				initialization_options: None,
				package_manager_hint: Some("npm"),
			},
		])
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn default_table_covers_every_detector_target() {
		let table = LanguageTable::default();
		for id in [
			"rust", "go", "csharp", "java", "kotlin", "swift", "cpp", "ruby", "php", "python", "typescript", "javascript",
		] {
			assert!(table.get(id).is_some(), "missing recipe for {id}");
		}
	}

	#[test]
	fn unknown_id_is_none() {
		assert!(LanguageTable::default().get("cobol").is_none());
	}
}
