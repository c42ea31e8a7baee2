//! End-to-end checks of the `polylsp` binary's subcommands that don't need a
//! live language server: `list-tools` and `health` against an empty pool.

use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn list_tools_prints_every_registered_tool_sorted() {
	Command::cargo_bin("polylsp")
		.unwrap()
		.arg("list-tools")
		.assert()
		.success()
		.stdout(predicate::str::contains("navigate"))
		.stdout(predicate::str::contains("findSymbols"))
		.stdout(predicate::str::contains("executeTransaction"));
}

#[test]
fn health_reports_no_active_connections_before_anything_is_opened() {
	Command::cargo_bin("polylsp")
		.unwrap()
		.arg("health")
		.assert()
		.success()
		.stdout(predicate::str::contains("no active connections"));
}

#[test]
fn run_with_unknown_tool_name_fails() {
	Command::cargo_bin("polylsp")
		.unwrap()
		.args(["run", "notARealTool", "{}"])
		.assert()
		.failure();
}

#[test]
fn missing_subcommand_prints_usage_to_stderr() {
	Command::cargo_bin("polylsp")
		.unwrap()
		.assert()
		.failure()
		.stderr(predicate::str::contains("Usage"));
}
