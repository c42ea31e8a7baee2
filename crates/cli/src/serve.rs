//! `polylsp serve`: a line-delimited JSON request/response loop over
//! stdin/stdout, for editors that want to drive the broker as a
//! long-lived subprocess instead of spawning the CLI per call.

use std::sync::Arc;

use anyhow::Result;
use polylsp_broker::pool::ConnectionPool;
use polylsp_broker::tools::ToolRegistry;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{error, warn};

#[derive(Debug, Deserialize)]
struct ServeRequest {
	id: serde_json::Value,
	tool: String,
	#[serde(default)]
	params: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct ServeResponse {
	id: serde_json::Value,
	#[serde(skip_serializing_if = "Option::is_none")]
	result: Option<serde_json::Value>,
	#[serde(skip_serializing_if = "Option::is_none")]
	error: Option<String>,
}

pub async fn serve(pool: &Arc<ConnectionPool>, registry: &ToolRegistry) -> Result<()> {
	let stdin = tokio::io::stdin();
	let mut stdout = tokio::io::stdout();
	let mut lines = BufReader::new(stdin).lines();

	while let Some(line) = lines.next_line().await? {
		if line.trim().is_empty() {
			continue;
		}
		let response = match serde_json::from_str::<ServeRequest>(&line) {
			Ok(request) => match registry.execute(&request.tool, pool, request.params).await {
				Ok(value) => ServeResponse { id: request.id, result: Some(value), error: None },
				Err(e) => ServeResponse { id: request.id, result: None, error: Some(e.to_string()) },
			},
			Err(e) => {
				warn!(error = %e, "malformed serve request");
				ServeResponse { id: serde_json::Value::Null, result: None, error: Some(format!("malformed request: {e}")) }
			}
		};

		let encoded = match serde_json::to_string(&response) {
			Ok(s) => s,
			Err(e) => {
				error!(error = %e, "failed to encode serve response");
				continue;
			}
		};
		stdout.write_all(encoded.as_bytes()).await?;
		stdout.write_all(b"\n").await?;
		stdout.flush().await?;
	}

	Ok(())
}
