//! Marker-file and extension-based language detection.

use std::path::Path;

use serde_json::Value as JsonValue;

use crate::recipe::{DetectedLanguage, LanguageRecipe};
use crate::table::LanguageTable;

/// Holds a table of `LanguageRecipe`s and runs detection against it.
pub struct Detector {
	table: LanguageTable,
}

impl Detector {
	pub fn new() -> Self {
		Self { table: LanguageTable::default() }
	}

	/// Injects a fake recipe table for tests.
	pub fn with_recipes(table: LanguageTable) -> Self {
		Self { table }
	}

	pub fn recipe(&self, id: &str) -> Option<&LanguageRecipe> {
		self.table.get(id)
	}

	/// Probes marker files in a fixed priority order and returns the first
	/// match.
	pub fn detect(&self, workspace_root: &Path) -> Option<DetectedLanguage> {
		let id = self.detect_id(workspace_root)?;
		let recipe = self.table.get(id)?.clone();
		Some(DetectedLanguage { recipe, workspace: workspace_root.to_path_buf() })
	}

	fn detect_id(&self, root: &Path) -> Option<&'static str> {
		let exists = |name: &str| root.join(name).exists();
		let any_glob_suffix = |suffixes: &[&str]| -> bool {
			let Ok(entries) = std::fs::read_dir(root) else { return false };
			entries.flatten().any(|entry| {
				let name = entry.file_name();
				let name = name.to_string_lossy();
				suffixes.iter().any(|suf| name.ends_with(suf))
			})
		};

		if exists("Cargo.toml") {
			return Some("rust");
		}
		if exists("go.mod") {
			return Some("go");
		}
		if any_glob_suffix(&[".csproj", ".sln", ".fsproj", ".vbproj"]) {
			return Some("csharp");
		}
		if exists("pom.xml") || exists("build.gradle") || exists("build.gradle.kts") {
			if exists("build.gradle.kts") || exists("settings.gradle.kts") {
				return Some("kotlin");
			}
			return Some("java");
		}
		if exists("Package.swift") || exists(".swiftpm") {
			return Some("swift");
		}
		if exists("CMakeLists.txt") || exists("Makefile") || exists(".clang-format") || exists("compile_commands.json") {
			return Some("cpp");
		}
		if exists("Gemfile") || exists("Rakefile") || exists(".ruby-version") || exists(".rvmrc") {
			return Some("ruby");
		}
		if exists("composer.json") || exists("composer.lock") || exists(".php-version") {
			return Some("php");
		}
		if exists("setup.py") || exists("pyproject.toml") || exists("requirements.txt") || exists("Pipfile") || exists("poetry.lock") {
			return Some("python");
		}
		if any_glob_suffix(&[".py"]) {
			return Some("python");
		}
		if exists("tsconfig.json") {
			return Some("typescript");
		}
		if exists("jsconfig.json") {
			return Some("javascript");
		}
		if exists("package.json") {
			return Some(classify_package_json(root));
		}

		None
	}

	/// Looks up a path's extension in the recipe table. Files with no
	/// extension, including dotfiles such as `.gitignore`, return `None`.
	pub fn detect_by_extension(&self, path: &Path) -> Option<LanguageRecipe> {
		let ext = path.extension()?.to_str()?;
		self.table.recipes().find(|r| r.extensions.iter().any(|e| e.eq_ignore_ascii_case(ext))).cloned()
	}
}

impl Default for Detector {
	fn default() -> Self {
		Self::new()
	}
}

const TS_MARKERS: &[&str] = &["typescript", "ts-node", "tsx", "ts-jest", "@swc/core", "esbuild"];

fn classify_package_json(root: &Path) -> &'static str {
	let Ok(contents) = std::fs::read_to_string(root.join("package.json")) else {
		return "javascript";
	};
	let Ok(value) = serde_json::from_str::<JsonValue>(&contents) else {
		return "javascript";
	};

	let deps_mention_typescript = ["dependencies", "devDependencies"].iter().any(|section| {
		let Some(deps) = value.get(section).and_then(JsonValue::as_object) else { return false };
		deps.keys().any(|name| name == "typescript" || name.starts_with("@types/") || TS_MARKERS.contains(&name.as_str()))
	});

	if deps_mention_typescript {
		"typescript"
	} else {
		"javascript"
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::fs;
	use tempfile::tempdir;

	#[test]
	fn detects_go_from_go_mod_alone() {
		let dir = tempdir().unwrap();
		fs::write(dir.path().join("go.mod"), "module example\n").unwrap();
		let detector = Detector::new();
		let detected = detector.detect(dir.path()).unwrap();
		assert_eq!(detected.id(), "go");
		assert_eq!(detected.server_command(), vec!["gopls".to_string()]);
	}

	#[test]
	fn cargo_toml_beats_everything_else() {
		let dir = tempdir().unwrap();
		fs::write(dir.path().join("Cargo.toml"), "[package]\n").unwrap();
		fs::write(dir.path().join("package.json"), "{}").unwrap();
		let detector = Detector::new();
		assert_eq!(detector.detect(dir.path()).unwrap().id(), "rust");
	}

	#[test]
	fn package_json_with_typescript_dependency_classifies_as_typescript() {
		let dir = tempdir().unwrap();
		fs::write(dir.path().join("package.json"), r#"{"devDependencies": {"typescript": "^5.0.0"}}"#).unwrap();
		let detector = Detector::new();
		assert_eq!(detector.detect(dir.path()).unwrap().id(), "typescript");
	}

	#[test]
	fn package_json_without_typescript_markers_classifies_as_javascript() {
		let dir = tempdir().unwrap();
		fs::write(dir.path().join("package.json"), r#"{"dependencies": {"express": "^4.0.0"}}"#).unwrap();
		let detector = Detector::new();
		assert_eq!(detector.detect(dir.path()).unwrap().id(), "javascript");
	}

	#[test]
	fn no_markers_detects_nothing() {
		let dir = tempdir().unwrap();
		let detector = Detector::new();
		assert!(detector.detect(dir.path()).is_none());
	}

	#[test]
	fn detect_by_extension_ignores_dotfiles() {
		let detector = Detector::new();
		assert!(detector.detect_by_extension(Path::new(".gitignore")).is_none());
	}

	#[test]
	fn detect_by_extension_handles_dotted_config_files() {
		let detector = Detector::new();
		assert_eq!(detector.detect_by_extension(Path::new(".eslintrc.js")).unwrap().id, "javascript");
		assert_eq!(detector.detect_by_extension(Path::new("file.test.ts")).unwrap().id, "typescript");
	}
}
