//! Per-language availability/install strategies.
//!
//! `Provider` is a trait object, not a closed enum (see DESIGN.md's Open
//! Question decisions): `install()` varies wildly by ecosystem (a GitHub
//! release tarball for rust, `gem`/`npm` for others, the system package
//! manager for clangd) and the Pool and Tool layer must stay ignorant of
//! which strategy backs a given recipe.

use std::process::Stdio;

use tokio::process::Command;
use tracing::{info, warn};

use crate::error::{Error, Result};

/// Caller-supplied consent for a `Provider::install` call. Installing is
/// rejected without an explicit user-consent flag, and always rejected
/// when running inside a container.
#[derive(Debug, Clone, Copy, Default)]
pub struct InstallOptions {
	pub user_consent: bool,
	pub force: bool,
}

/// `{isAvailable(), install(force?), getCommand()}` — the polymorphic
/// capability set every language provider backs.
#[async_trait::async_trait]
pub trait Provider: Send + Sync {
	/// Stable recipe id this provider backs, e.g. `"rust"`.
	fn id(&self) -> &'static str;

	/// Probes whether the server binary is reachable on `PATH` (or however
	/// this strategy defines availability).
	fn is_available(&self) -> bool;

	/// Human-readable install suggestion surfaced in `NoLanguageServer`.
	fn install_hint(&self) -> String;

	/// Attempts to install the server. Always fails fast (without
	/// attempting anything) when `opts.user_consent` is false or when
	/// [`running_in_container`] is true.
	async fn install(&self, opts: InstallOptions) -> Result<()>;
}

/// Shared consent/container gate every concrete provider calls first.
fn guard_install(language: &str, opts: InstallOptions) -> Result<()> {
	if running_in_container() {
		return Err(Error::InstallRefusedInContainer(language.to_string()));
	}
	if !opts.user_consent {
		return Err(Error::InstallNotConsented(language.to_string()));
	}
	Ok(())
}

/// `CONTAINER=true`, `DOCKER=true`, or `/.dockerenv` existing.
pub fn running_in_container() -> bool {
	let env_flag = |name: &str| std::env::var(name).map(|v| v == "true" || v == "1").unwrap_or(false);
	env_flag("CONTAINER") || env_flag("DOCKER") || std::path::Path::new("/.dockerenv").exists()
}

async fn run_command(language: &str, program: &str, args: &[&str]) -> Result<()> {
	let status = Command::new(program)
		.args(args)
		.stdin(Stdio::null())
		.stdout(Stdio::inherit())
		.stderr(Stdio::inherit())
		.status()
		.await
		.map_err(|e| Error::InstallFailed { language: language.to_string(), reason: e.to_string() })?;

	if status.success() {
		Ok(())
	} else {
		Err(Error::InstallFailed { language: language.to_string(), reason: format!("{program} exited with {status}") })
	}
}

/// A provider whose availability is a plain `which` lookup and whose
/// install is "run this one subcommand" — covers `gem`, `npm`, `go install`.
pub struct CommandInstallProvider {
	pub language: &'static str,
	pub binary: &'static str,
	pub install_program: &'static str,
	pub install_args: &'static [&'static str],
}

#[async_trait::async_trait]
impl Provider for CommandInstallProvider {
	fn id(&self) -> &'static str {
		self.language
	}

	fn is_available(&self) -> bool {
		which::which(self.binary).is_ok()
	}

	fn install_hint(&self) -> String {
		format!("{} {}", self.install_program, self.install_args.join(" "))
	}

	async fn install(&self, opts: InstallOptions) -> Result<()> {
		guard_install(self.language, opts)?;
		if self.is_available() && !opts.force {
			info!(language = self.language, "server already available, skipping install");
			return Ok(());
		}
		run_command(self.language, self.install_program, self.install_args).await
	}
}

/// No install strategy at all — the core only exposes availability and an
/// instructional hint (jdtls, kotlin-language-server, sourcekit-lsp,
/// csharp-ls: each ships through its own toolchain installer).
pub struct ManualInstallProvider {
	pub language: &'static str,
	pub binary: &'static str,
	pub hint: &'static str,
}

#[async_trait::async_trait]
impl Provider for ManualInstallProvider {
	fn id(&self) -> &'static str {
		self.language
	}

	fn is_available(&self) -> bool {
		which::which(self.binary).is_ok()
	}

	fn install_hint(&self) -> String {
		self.hint.to_string()
	}

	async fn install(&self, opts: InstallOptions) -> Result<()> {
		guard_install(self.language, opts)?;
		Err(Error::InstallFailed { language: self.language.to_string(), reason: format!("no automated installer; {}", self.hint) })
	}
}

/// clangd via the system package manager — tries `apt-get`, `yum`, then
/// `brew`, in that order, stopping at the first one present on `PATH`.
pub struct SystemPackageManagerProvider {
	pub language: &'static str,
	pub binary: &'static str,
	pub package: &'static str,
}

#[async_trait::async_trait]
impl Provider for SystemPackageManagerProvider {
	fn id(&self) -> &'static str {
		self.language
	}

	fn is_available(&self) -> bool {
		which::which(self.binary).is_ok()
	}

	fn install_hint(&self) -> String {
		format!("apt-get install {0} | yum install {0} | brew install {0}", self.package)
	}

	async fn install(&self, opts: InstallOptions) -> Result<()> {
		guard_install(self.language, opts)?;
		if self.is_available() && !opts.force {
			return Ok(());
		}
		if which::which("apt-get").is_ok() {
			return run_command(self.language, "apt-get", &["install", "-y", self.package]).await;
		}
		if which::which("yum").is_ok() {
			return run_command(self.language, "yum", &["install", "-y", self.package]).await;
		}
		if which::which("brew").is_ok() {
			return run_command(self.language, "brew", &["install", self.package]).await;
		}
		Err(Error::InstallFailed { language: self.language.to_string(), reason: "none of apt-get/yum/brew found on PATH".to_string() })
	}
}

/// rust-analyzer: downloads a prebuilt release binary over HTTPS from an
/// allow-listed host, following at most a handful of redirects. Behind the
/// `provider-install` feature (off by default) since it's the only provider
/// in this crate that needs an HTTP client.
#[cfg(feature = "provider-install")]
pub struct GithubReleaseProvider {
	pub language: &'static str,
	pub binary: &'static str,
	pub asset_url: &'static str,
	pub install_dir: std::path::PathBuf,
}

#[cfg(feature = "provider-install")]
const ALLOWED_HOSTS: &[&str] = &["github.com", "objects.githubusercontent.com", "release-assets.githubusercontent.com"];

/// Release assets ship gzip-compressed; unwrap that before writing the
/// binary to disk and chmod-ing it executable.
#[cfg(feature = "provider-install")]
fn decompress_gzip(bytes: &[u8], language: &str) -> Result<Vec<u8>> {
	use std::io::Read;
	let mut out = Vec::new();
	flate2::read::GzDecoder::new(bytes).read_to_end(&mut out).map_err(|e| Error::InstallFailed { language: language.to_string(), reason: format!("failed to decompress release asset: {e}") })?;
	Ok(out)
}

#[cfg(feature = "provider-install")]
#[async_trait::async_trait]
impl Provider for GithubReleaseProvider {
	fn id(&self) -> &'static str {
		self.language
	}

	fn is_available(&self) -> bool {
		which::which(self.binary).is_ok() || self.install_dir.join(self.binary).exists()
	}

	fn install_hint(&self) -> String {
		format!("download {} from {}", self.binary, self.asset_url)
	}

	async fn install(&self, opts: InstallOptions) -> Result<()> {
		guard_install(self.language, opts)?;
		if self.is_available() && !opts.force {
			return Ok(());
		}

		let url = url::Url::parse(self.asset_url).map_err(|e| Error::InstallFailed { language: self.language.to_string(), reason: e.to_string() })?;
		if !url.host_str().is_some_and(|h| ALLOWED_HOSTS.contains(&h)) {
			return Err(Error::InstallFailed { language: self.language.to_string(), reason: format!("host not allow-listed: {:?}", url.host_str()) });
		}

		let client = reqwest::Client::builder()
			.redirect(reqwest::redirect::Policy::limited(5))
			.build()
			.map_err(Error::Http)?;
		let bytes = client.get(url).send().await.map_err(Error::Http)?.error_for_status().map_err(Error::Http)?.bytes().await.map_err(Error::Http)?;
		let binary = decompress_gzip(&bytes, &self.language.to_string())?;

		tokio::fs::create_dir_all(&self.install_dir).await.map_err(Error::Io)?;
		let dest = self.install_dir.join(self.binary);
		tokio::fs::write(&dest, &binary).await.map_err(Error::Io)?;

		#[cfg(unix)]
		{
			use std::os::unix::fs::PermissionsExt;
			let mut perms = tokio::fs::metadata(&dest).await.map_err(Error::Io)?.permissions();
			perms.set_mode(0o755);
			tokio::fs::set_permissions(&dest, perms).await.map_err(Error::Io)?;
		}

		info!(language = self.language, path = %dest.display(), "installed language server");
		Ok(())
	}
}

/// Builds the default `Provider` for a recipe id, matching `LanguageTable`'s
/// defaults. Returns `None` for unrecognized ids (callers fall back to a
/// bare `which` check or surface `NoLanguageServer` directly).
pub fn default_provider(id: &str) -> Option<std::sync::Arc<dyn Provider>> {
	use std::sync::Arc;

	let provider: Arc<dyn Provider> = match id {
		"rust" => rust_provider(),
		"go" => Arc::new(CommandInstallProvider { language: "go", binary: "gopls", install_program: "go", install_args: &["install", "golang.org/x/tools/gopls@latest"] }),
		"csharp" => Arc::new(ManualInstallProvider { language: "csharp", binary: "csharp-ls", hint: "dotnet tool install --global csharp-ls" }),
		"java" => Arc::new(ManualInstallProvider { language: "java", binary: "jdtls", hint: "install eclipse.jdt.ls and put its jdtls launcher on PATH" }),
		"kotlin" => Arc::new(ManualInstallProvider { language: "kotlin", binary: "kotlin-language-server", hint: "install kotlin-language-server via your package manager" }),
		"swift" => Arc::new(ManualInstallProvider { language: "swift", binary: "sourcekit-lsp", hint: "install the Swift toolchain (ships sourcekit-lsp)" }),
		"cpp" => Arc::new(SystemPackageManagerProvider { language: "cpp", binary: "clangd", package: "clangd" }),
		"ruby" => Arc::new(CommandInstallProvider { language: "ruby", binary: "solargraph", install_program: "gem", install_args: &["install", "solargraph"] }),
		"php" => Arc::new(CommandInstallProvider { language: "php", binary: "intelephense", install_program: "npm", install_args: &["install", "-g", "intelephense"] }),
		"python" => Arc::new(CommandInstallProvider { language: "python", binary: "pyright-langserver", install_program: "npm", install_args: &["install", "-g", "pyright"] }),
		"typescript" => Arc::new(CommandInstallProvider { language: "typescript", binary: "typescript-language-server", install_program: "npm", install_args: &["install", "-g", "typescript-language-server", "typescript"] }),
		"javascript" => Arc::new(CommandInstallProvider { language: "javascript", binary: "typescript-language-server", install_program: "npm", install_args: &["install", "-g", "typescript-language-server", "typescript"] }),
		_ => {
			warn!(id, "no default provider registered");
			return None;
		}
	};
	Some(provider)
}

/// rust-analyzer's real provider is [`GithubReleaseProvider`] behind
/// `provider-install`; without that feature it falls back to a manual hint
/// so the crate still builds with its default feature set.
#[cfg(not(feature = "provider-install"))]
struct ManualRustProvider;

#[cfg(not(feature = "provider-install"))]
#[async_trait::async_trait]
impl Provider for ManualRustProvider {
	fn id(&self) -> &'static str {
		"rust"
	}

	fn is_available(&self) -> bool {
		which::which("rust-analyzer").is_ok()
	}

	fn install_hint(&self) -> String {
		"download rust-analyzer from https://github.com/rust-lang/rust-analyzer/releases (enable the provider-install feature to automate this)".to_string()
	}

	async fn install(&self, opts: InstallOptions) -> Result<()> {
		guard_install("rust", opts)?;
		Err(Error::InstallFailed { language: "rust".to_string(), reason: "provider-install feature not enabled".to_string() })
	}
}

#[cfg(not(feature = "provider-install"))]
fn rust_provider() -> std::sync::Arc<dyn Provider> {
	std::sync::Arc::new(ManualRustProvider)
}

#[cfg(feature = "provider-install")]
fn rust_provider() -> std::sync::Arc<dyn Provider> {
	std::sync::Arc::new(GithubReleaseProvider {
		language: "rust",
		binary: "rust-analyzer",
		asset_url: "https://github.com/rust-lang/rust-analyzer/releases/latest/download/rust-analyzer-x86_64-unknown-linux-gnu.gz",
		install_dir: dirs::data_local_dir().unwrap_or_else(std::env::temp_dir).join("polylsp").join("bin"),
	})
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn container_detection_reads_env_flags() {
		// SAFETY: test-only, single-threaded access to process env.
		unsafe {
			std::env::set_var("CONTAINER", "true");
		}
		assert!(running_in_container());
		unsafe {
			std::env::remove_var("CONTAINER");
		}
	}

	#[tokio::test]
	async fn install_without_consent_is_rejected() {
		let provider = CommandInstallProvider { language: "ruby", binary: "solargraph-definitely-missing", install_program: "true", install_args: &[] };
		let err = provider.install(InstallOptions { user_consent: false, force: false }).await.unwrap_err();
		assert!(matches!(err, Error::InstallNotConsented(_)));
	}

	#[tokio::test]
	async fn every_default_provider_id_round_trips() {
		for id in [
			"rust", "go", "csharp", "java", "kotlin", "swift", "cpp", "ruby", "php", "python", "typescript", "javascript",
		] {
			let provider = default_provider(id).unwrap_or_else(|| panic!("no provider for {id}"));
			assert_eq!(provider.id(), id);
		}
	}
}
