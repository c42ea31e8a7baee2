//! `BrokerConfig`: `polylsp.toml` plus `POLYLSP_*` environment overrides.
//!
//! The ambient configuration layer giving the pool/cache tunables
//! (otherwise "all with defaults") somewhere real to live.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Pool tunables, all with defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
	pub health_check_interval_secs: u64,
	pub max_retries: u32,
	pub retry_delay_secs: u64,
	/// `None` disables idle reclamation outright (DESIGN.md's Open
	/// Question #2: the sweeper is enforced, but the knob to turn it off
	/// stays on the config surface).
	pub idle_timeout_secs: Option<u64>,
}

impl Default for PoolConfig {
	fn default() -> Self {
		Self { health_check_interval_secs: 30, max_retries: 3, retry_delay_secs: 2, idle_timeout_secs: Some(15 * 60) }
	}
}

impl PoolConfig {
	pub fn health_check_interval(&self) -> Duration {
		Duration::from_secs(self.health_check_interval_secs)
	}

	pub fn retry_delay(&self) -> Duration {
		Duration::from_secs(self.retry_delay_secs)
	}

	pub fn idle_timeout(&self) -> Option<Duration> {
		self.idle_timeout_secs.map(Duration::from_secs)
	}
}

/// Per-language command/args override, merged over the recipe table default.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerOverride {
	pub command: Option<String>,
	pub args: Option<Vec<String>>,
}

/// Cache tunables shared by every read-only tool's `Cache<K, V>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
	pub max_entries: usize,
	pub ttl_secs: u64,
}

impl Default for CacheConfig {
	fn default() -> Self {
		Self { max_entries: 1024, ttl_secs: 30 }
	}
}

impl CacheConfig {
	pub fn ttl(&self) -> Duration {
		Duration::from_secs(self.ttl_secs)
	}
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
	pub pool: PoolConfig,
	pub cache: CacheConfig,
	pub servers: HashMap<String, ServerOverride>,
}

impl BrokerConfig {
	/// Loads `polylsp.toml` if present (missing file is not an error; a
	/// malformed one is), then applies `POLYLSP_*` environment overrides.
	pub fn load(toml_path: &Path) -> Result<Self, ConfigError> {
		let mut config = match std::fs::read_to_string(toml_path) {
			Ok(contents) => toml::from_str(&contents).map_err(ConfigError::Parse)?,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Self::default(),
			Err(e) => return Err(ConfigError::Io(e)),
		};
		config.apply_env_overrides();
		Ok(config)
	}

	fn apply_env_overrides(&mut self) {
		if let Some(v) = env_u64("POLYLSP_HEALTH_CHECK_INTERVAL_SECS") {
			self.pool.health_check_interval_secs = v;
		}
		if let Some(v) = env_u32("POLYLSP_MAX_RETRIES") {
			self.pool.max_retries = v;
		}
		if let Some(v) = env_u64("POLYLSP_RETRY_DELAY_SECS") {
			self.pool.retry_delay_secs = v;
		}
		if let Ok(raw) = std::env::var("POLYLSP_IDLE_TIMEOUT_SECS") {
			self.pool.idle_timeout_secs = if raw.eq_ignore_ascii_case("none") { None } else { raw.parse().ok() };
		}
		if let Some(v) = env_u64("POLYLSP_CACHE_TTL_SECS") {
			self.cache.ttl_secs = v;
		}
		if let Some(v) = env_usize("POLYLSP_CACHE_MAX_ENTRIES") {
			self.cache.max_entries = v;
		}
	}
}

fn env_u64(name: &str) -> Option<u64> {
	std::env::var(name).ok().and_then(|v| v.parse().ok())
}

fn env_u32(name: &str) -> Option<u32> {
	std::env::var(name).ok().and_then(|v| v.parse().ok())
}

fn env_usize(name: &str) -> Option<usize> {
	std::env::var(name).ok().and_then(|v| v.parse().ok())
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
	#[error("failed to read config: {0}")]
	Io(std::io::Error),
	#[error("failed to parse polylsp.toml: {0}")]
	Parse(toml::de::Error),
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn missing_file_yields_defaults() {
		let config = BrokerConfig::load(Path::new("/nonexistent/polylsp.toml")).unwrap();
		assert_eq!(config.pool.max_retries, 3);
	}

	#[test]
	fn env_override_beats_default() {
		// SAFETY: test-only, single-threaded access to process env.
		unsafe {
			std::env::set_var("POLYLSP_MAX_RETRIES", "7");
		}
		let config = BrokerConfig::load(Path::new("/nonexistent/polylsp.toml")).unwrap();
		assert_eq!(config.pool.max_retries, 7);
		unsafe {
			std::env::remove_var("POLYLSP_MAX_RETRIES");
		}
	}
}
