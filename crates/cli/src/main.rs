//! polylsp command-line entry point: one subcommand per registered tool,
//! plus `health` and `serve`. Thin by design — all behavior lives in
//! `polylsp-broker`.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use polylsp_broker::config::BrokerConfig;
use polylsp_broker::pool::ConnectionPool;
use polylsp_broker::tools::default_registry;
use tracing_subscriber::EnvFilter;

mod serve;

#[derive(Parser, Debug)]
#[command(name = "polylsp")]
#[command(about = "Multi-language code-intelligence broker")]
struct Cli {
	/// Verbose logging (overridden by RUST_LOG if set).
	#[arg(short, long, global = true)]
	verbose: bool,

	/// Path to polylsp.toml. Defaults to ./polylsp.toml.
	#[arg(long, global = true, value_name = "PATH")]
	config: Option<PathBuf>,

	#[command(subcommand)]
	command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
	/// Go to definition / implementation / type definition.
	Navigate {
		uri: String,
		line: u32,
		character: u32,
		#[arg(long, default_value = "definition")]
		target: String,
		#[arg(long)]
		max_results: Option<usize>,
	},
	/// Find references or walk the call hierarchy from a position.
	FindUsages {
		uri: String,
		line: u32,
		character: u32,
		#[arg(long, default_value = "references")]
		r#type: String,
		#[arg(long)]
		include_declaration: bool,
	},
	/// Search document or workspace symbols.
	FindSymbols {
		query: String,
		#[arg(long, default_value = "workspace")]
		scope: String,
		#[arg(long)]
		uri: Option<String>,
		#[arg(long)]
		max_results: Option<usize>,
	},
	/// Hover / signature help / completion at a position.
	Intelligence {
		uri: String,
		line: u32,
		character: u32,
		#[arg(long, default_value = "hover")]
		r#type: String,
	},
	/// Run any registered tool by name with raw JSON params, for tools
	/// whose shape (a `WorkspaceEdit`, a command's argument list) doesn't
	/// map cleanly onto flags.
	Run {
		tool: String,
		/// JSON params object, e.g. '{"uri": "file:///a.rs", ...}'.
		params: String,
	},
	/// List every registered tool name.
	ListTools,
	/// Report pool health for every currently live connection.
	Health,
	/// Run the line-delimited JSON-RPC loop over stdin/stdout.
	Serve,
}

fn init_tracing(verbose: bool) {
	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "info" }));
	tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

fn load_config(path: Option<&PathBuf>) -> Result<BrokerConfig> {
	let path = path.cloned().unwrap_or_else(|| PathBuf::from("polylsp.toml"));
	BrokerConfig::load(&path).with_context(|| format!("loading {}", path.display()))
}

fn file_uri(raw: &str) -> Result<lsp_types::Url> {
	if let Ok(url) = lsp_types::Url::parse(raw) {
		if url.scheme() == "file" {
			return Ok(url);
		}
	}
	let path = std::fs::canonicalize(raw).with_context(|| format!("resolving path {raw}"))?;
	lsp_types::Url::from_file_path(&path).map_err(|_| anyhow::anyhow!("cannot build a file:// uri from {raw}"))
}

fn print_json(value: &serde_json::Value) -> Result<()> {
	println!("{}", serde_json::to_string_pretty(value)?);
	Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
	let cli = Cli::parse();
	init_tracing(cli.verbose);

	let config = load_config(cli.config.as_ref())?;
	let pool = ConnectionPool::new(config.pool, config.servers);
	let registry = default_registry();

	let result = run(&cli.command, &pool, &registry).await;

	pool.dispose_all().await;
	result
}

async fn run(command: &Command, pool: &Arc<ConnectionPool>, registry: &polylsp_broker::tools::ToolRegistry) -> Result<()> {
	match command {
		Command::Navigate { uri, line, character, target, max_results } => {
			let params = serde_json::json!({
				"uri": file_uri(uri)?,
				"position": {"line": line, "character": character},
				"target": target,
				"maxResults": max_results,
			});
			let value = registry.execute("navigate", pool, params).await?;
			print_json(&value)
		}
		Command::FindUsages { uri, line, character, r#type, include_declaration } => {
			let params = serde_json::json!({
				"uri": file_uri(uri)?,
				"position": {"line": line, "character": character},
				"type": r#type,
				"includeDeclaration": include_declaration,
			});
			let value = registry.execute("findUsages", pool, params).await?;
			print_json(&value)
		}
		Command::FindSymbols { query, scope, uri, max_results } => {
			let resolved_uri = uri.as_deref().map(file_uri).transpose()?;
			let params = serde_json::json!({
				"scope": scope,
				"uri": resolved_uri,
				"query": query,
				"maxResults": max_results,
			});
			let value = registry.execute("findSymbols", pool, params).await?;
			print_json(&value)
		}
		Command::Intelligence { uri, line, character, r#type } => {
			let params = serde_json::json!({
				"uri": file_uri(uri)?,
				"position": {"line": line, "character": character},
				"type": r#type,
			});
			let value = registry.execute("getCodeIntelligence", pool, params).await?;
			print_json(&value)
		}
		Command::Run { tool, params } => {
			let parsed: serde_json::Value = serde_json::from_str(params).context("parsing --params as JSON")?;
			let value = registry.execute(tool, pool, parsed).await?;
			print_json(&value)
		}
		Command::ListTools => {
			for name in registry.names() {
				println!("{name}");
			}
			Ok(())
		}
		Command::Health => {
			let health = pool.get_health();
			if health.is_empty() {
				println!("no active connections");
				return Ok(());
			}
			for (key, status) in health {
				println!("{} @ {}: {:?} (crashes={})", key.language_id, key.workspace.display(), status.status, status.crashes);
			}
			Ok(())
		}
		Command::Serve => {
			serve::serve(pool, registry).await?;
			Ok(())
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn file_uri_resolves_relative_paths() {
		let cwd = std::env::current_dir().unwrap();
		let uri = file_uri("Cargo.toml").unwrap();
		assert_eq!(uri.scheme(), "file");
		assert!(uri.path().contains(cwd.file_name().unwrap().to_str().unwrap()) || uri.path().ends_with("Cargo.toml"));
	}
}
