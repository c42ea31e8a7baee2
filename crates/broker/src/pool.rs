//! Connection Pool / supervisor. Owns at most one [`Client`] per
//! [`ConnectionKey`], health-checks it, and recovers it after a crash.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use polylsp_language::provider::{default_provider, running_in_container};
use polylsp_language::{ConnectionKey, Detector};
use polylsp_lsp::client::{ClientState, TransportEvent};
use polylsp_lsp::{Client, ServerConfig};
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};

use crate::config::{PoolConfig, ServerOverride};
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
	Healthy,
	Unhealthy,
	Restarting,
}

/// `(status, lastCheck, crashes, uptime, capabilities?)` reported per
/// connection key.
#[derive(Debug, Clone)]
pub struct HealthStatus {
	pub status: HealthState,
	pub last_check: Option<Instant>,
	pub crashes: u32,
	pub uptime: Option<Duration>,
	pub capabilities: Option<lsp_types::ServerCapabilities>,
}

impl Default for HealthStatus {
	fn default() -> Self {
		Self { status: HealthState::Restarting, last_check: None, crashes: 0, uptime: None, capabilities: None }
	}
}

struct PoolEntry {
	client: Arc<Client>,
	health: HealthStatus,
	last_used: Instant,
	server_config: ServerConfig,
	workspace: PathBuf,
	health_timer: JoinHandle<()>,
	crash_watcher: JoinHandle<()>,
}

impl PoolEntry {
	fn abort_tasks(&self) {
		self.health_timer.abort();
		self.crash_watcher.abort();
	}
}

pub struct ConnectionPool {
	table: Mutex<HashMap<ConnectionKey, PoolEntry>>,
	init_locks: Mutex<HashMap<ConnectionKey, Arc<AsyncMutex<()>>>>,
	detector: Detector,
	overrides: HashMap<String, ServerOverride>,
	config: PoolConfig,
	in_container: bool,
	sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionPool {
	pub fn new(config: PoolConfig, overrides: HashMap<String, ServerOverride>) -> Arc<Self> {
		let pool = Arc::new(Self {
			table: Mutex::new(HashMap::new()),
			init_locks: Mutex::new(HashMap::new()),
			detector: Detector::new(),
			overrides,
			config,
			in_container: running_in_container(),
			sweeper: Mutex::new(None),
		});
		pool.start_sweeper();
		pool
	}

	fn init_lock(&self, key: &ConnectionKey) -> Arc<AsyncMutex<()>> {
		Arc::clone(self.init_locks.lock().entry(key.clone()).or_insert_with(|| Arc::new(AsyncMutex::new(()))))
	}

	fn resolve_language_id(&self, language: &str, workspace: &Path) -> Result<String> {
		if language == "auto" {
			let detected = self.detector.detect(workspace).ok_or_else(|| Error::NoLanguageServer { language: "auto".to_string(), hint: None })?;
			Ok(detected.id().to_string())
		} else {
			Ok(language.to_string())
		}
	}

	fn resolved_server_config(&self, language_id: &str) -> Result<ServerConfig> {
		let recipe = self
			.detector
			.recipe(language_id)
			.ok_or_else(|| Error::NoLanguageServer { language: language_id.to_string(), hint: None })?;
		let mut config = recipe.server_config();
		if let Some(over) = self.overrides.get(language_id) {
			if let Some(command) = &over.command {
				config.command = command.clone();
			}
			if let Some(args) = &over.args {
				config.args = args.clone();
			}
		}
		Ok(config)
	}

	/// `get(languageId | "auto", workspace) -> Client`. Lazily creates the
	/// session, serialized per [`ConnectionKey`] so concurrent callers never
	/// produce two live Clients under one key.
	#[instrument(skip(self), fields(language, workspace = %workspace.display()))]
	pub async fn get(self: &Arc<Self>, language: &str, workspace: &Path) -> Result<Arc<Client>> {
		let language_id = self.resolve_language_id(language, workspace)?;
		let key = ConnectionKey::new(language_id.clone(), workspace.to_path_buf());

		if let Some(client) = self.live_ready_client(&key) {
			return Ok(client);
		}

		let lock = self.init_lock(&key);
		let _guard = lock.lock().await;

		if let Some(client) = self.live_ready_client(&key) {
			return Ok(client);
		}
		self.dispose_stale(&key).await;

		let provider = default_provider(&language_id);
		if let Some(provider) = &provider {
			if !provider.is_available() {
				return Err(Error::NoLanguageServer { language: language_id, hint: Some(provider.install_hint()) });
			}
		}

		let server_config = self.resolved_server_config(&language_id)?;
		let client = self.create_entry(&key, server_config, workspace, 0).await?;
		Ok(client)
	}

	/// Extension-based detection path used by file-scoped tools. Never
	/// raises; on an unavailable server it logs a warning with the install
	/// hint and returns `None`.
	pub async fn get_for_file(self: &Arc<Self>, file_path: &Path, workspace: &Path) -> Option<Arc<Client>> {
		let recipe = self.detector.detect_by_extension(file_path)?;
		match self.get(recipe.id, workspace).await {
			Ok(client) => Some(client),
			Err(Error::NoLanguageServer { language, hint }) => {
				warn!(language, hint = hint.as_deref().unwrap_or("none"), "no language server available for file");
				None
			}
			Err(e) => {
				warn!(error = %e, "failed to acquire language server for file");
				None
			}
		}
	}

	fn live_ready_client(&self, key: &ConnectionKey) -> Option<Arc<Client>> {
		let mut table = self.table.lock();
		let entry = table.get_mut(key)?;
		if entry.client.is_connected() {
			entry.last_used = Instant::now();
			Some(Arc::clone(&entry.client))
		} else {
			None
		}
	}

	async fn dispose_stale(&self, key: &ConnectionKey) {
		let entry = self.table.lock().remove(key);
		if let Some(entry) = entry {
			entry.abort_tasks();
			if !entry.client.is_connected() {
				entry.client.stop().await;
			}
		}
	}

	async fn create_entry(self: &Arc<Self>, key: &ConnectionKey, server_config: ServerConfig, workspace: &Path, preserved_crashes: u32) -> Result<Arc<Client>> {
		let mut last_err = None;
		for attempt in 0..=self.config.max_retries {
			let client = Client::new();
			match client.start(server_config.clone(), workspace, self.in_container).await {
				Ok(()) => {
					let capabilities = client.capabilities();
					let health_timer = self.spawn_health_timer(key.clone());
					let crash_watcher = self.spawn_crash_watcher(key.clone(), Arc::clone(&client));
					let entry = PoolEntry {
						client: Arc::clone(&client),
						health: HealthStatus { status: HealthState::Healthy, last_check: None, crashes: preserved_crashes, uptime: client.uptime(), capabilities },
						last_used: Instant::now(),
						server_config,
						workspace: workspace.to_path_buf(),
						health_timer,
						crash_watcher,
					};
					self.table.lock().insert(key.clone(), entry);
					return Ok(client);
				}
				Err(e) => {
					warn!(attempt, error = %e, "language server start attempt failed");
					last_err = Some(e);
					if attempt < self.config.max_retries {
						tokio::time::sleep(self.config.retry_delay()).await;
					}
				}
			}
		}
		Err(Error::InitializeFailed(last_err.map(|e| e.to_string()).unwrap_or_else(|| "unknown".to_string())))
	}

	fn spawn_health_timer(self: &Arc<Self>, key: ConnectionKey) -> JoinHandle<()> {
		let pool = Arc::clone(self);
		let interval = self.config.health_check_interval();
		tokio::spawn(async move {
			let mut ticker = tokio::time::interval(interval);
			ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
			loop {
				ticker.tick().await;
				pool.health_check_once(&key).await;
			}
		})
	}

	/// `ping()`s the entry's Client; success marks it healthy, failure
	/// unhealthy. Never itself tears the Client down — recovery only
	/// happens via the crash signal or the next `get()`.
	async fn health_check_once(&self, key: &ConnectionKey) {
		let client = {
			let table = self.table.lock();
			table.get(key).map(|e| Arc::clone(&e.client))
		};
		let Some(client) = client else { return };
		let alive = client.ping().await;

		let mut table = self.table.lock();
		if let Some(entry) = table.get_mut(key) {
			entry.health.last_check = Some(Instant::now());
			entry.health.uptime = client.uptime();
			entry.health.status = if alive { HealthState::Healthy } else { HealthState::Unhealthy };
		}
	}

	fn spawn_crash_watcher(self: &Arc<Self>, key: ConnectionKey, client: Arc<Client>) -> JoinHandle<()> {
		let pool = Arc::clone(self);
		let mut events = client.subscribe_events();
		tokio::spawn(async move {
			loop {
				match events.recv().await {
					Ok(TransportEvent::Crashed { .. }) => {
						pool.handle_crash(&key).await;
						break;
					}
					Ok(_) => continue,
					Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
					Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
				}
			}
		})
	}

	/// Crash recovery: bump `crashes`, and if still within `maxRetries`,
	/// restart with a fresh Client under the same key, preserving the crash
	/// counter.
	async fn handle_crash(self: &Arc<Self>, key: &ConnectionKey) {
		let snapshot = {
			let mut table = self.table.lock();
			let Some(entry) = table.get_mut(key) else { return };
			entry.health.crashes += 1;
			entry.health.status = HealthState::Unhealthy;
			(entry.server_config.clone(), entry.workspace.clone(), entry.health.crashes)
		};
		let (server_config, workspace, crashes) = snapshot;

		if crashes > self.config.max_retries {
			warn!(crashes, "language server exceeded max retries, leaving entry unhealthy");
			return;
		}

		{
			let mut table = self.table.lock();
			if let Some(entry) = table.get_mut(key) {
				entry.health.status = HealthState::Restarting;
			}
		}

		let old = self.table.lock().remove(key);
		if let Some(old) = old {
			old.abort_tasks();
		}

		match self.create_entry(key, server_config, &workspace, crashes).await {
			Ok(_) => info!(crashes, "language server restarted after crash"),
			Err(e) => warn!(error = %e, "restart after crash failed, entry remains unhealthy"),
		}
	}

	/// Cancels the health timer, stops the Client, and removes the entry.
	/// `Client::stop()` errors are swallowed.
	pub async fn dispose(&self, language_id: &str, workspace: &Path) {
		let key = ConnectionKey::new(language_id.to_string(), workspace.to_path_buf());
		let entry = self.table.lock().remove(&key);
		if let Some(entry) = entry {
			entry.abort_tasks();
			entry.client.stop().await;
		}
	}

	pub async fn dispose_all(&self) {
		if let Some(handle) = self.sweeper.lock().take() {
			handle.abort();
		}
		let entries: Vec<_> = self.table.lock().drain().map(|(_, e)| e).collect();
		for entry in entries {
			entry.abort_tasks();
			entry.client.stop().await;
		}
	}

	pub fn get_health(&self) -> HashMap<ConnectionKey, HealthStatus> {
		self.table.lock().iter().map(|(k, v)| (k.clone(), v.health.clone())).collect()
	}

	/// Every currently-`Ready` Client, for `executeCommand`'s broadcast path.
	pub fn active_entries(&self) -> Vec<(ConnectionKey, Arc<Client>)> {
		self.table
			.lock()
			.iter()
			.filter(|(_, e)| e.client.state() == ClientState::Ready)
			.map(|(k, e)| (k.clone(), Arc::clone(&e.client)))
			.collect()
	}

	fn start_sweeper(self: &Arc<Self>) {
		let Some(idle_timeout) = self.config.idle_timeout() else { return };
		let pool = Arc::clone(self);
		let tick = idle_timeout.clamp(Duration::from_secs(1), Duration::from_secs(60));
		let handle = tokio::spawn(async move {
			let mut ticker = tokio::time::interval(tick);
			loop {
				ticker.tick().await;
				pool.sweep_idle(idle_timeout).await;
			}
		});
		*self.sweeper.lock() = Some(handle);
	}

	/// Advisory idle reclamation, enforced by this sweeper rather than left
	/// inert (see DESIGN.md's Open Question #1).
	async fn sweep_idle(&self, idle_timeout: Duration) {
		let stale: Vec<ConnectionKey> = {
			let table = self.table.lock();
			table.iter().filter(|(_, e)| e.last_used.elapsed() > idle_timeout).map(|(k, _)| k.clone()).collect()
		};
		for key in stale {
			let entry = self.table.lock().remove(&key);
			if let Some(entry) = entry {
				entry.abort_tasks();
				entry.client.stop().await;
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn auto_detection_with_no_markers_fails_fast() {
		let pool = ConnectionPool::new(PoolConfig::default(), HashMap::new());
		let dir = tempfile::tempdir().unwrap();
		let err = pool.get("auto", dir.path()).await.unwrap_err();
		assert!(matches!(err, Error::NoLanguageServer { .. }));
	}

	#[tokio::test]
	async fn unavailable_server_surfaces_install_hint() {
		let pool = ConnectionPool::new(PoolConfig::default(), HashMap::new());
		let dir = tempfile::tempdir().unwrap();
		std::fs::write(dir.path().join("Gemfile"), "source 'https://rubygems.org'\n").unwrap();
		match pool.get("ruby", dir.path()).await {
			Err(Error::NoLanguageServer { language, hint }) => {
				assert_eq!(language, "ruby");
				assert!(hint.is_some());
			}
			other => panic!("expected NoLanguageServer, got {other:?}"),
		}
	}

	#[tokio::test]
	async fn disposing_an_absent_key_is_a_no_op() {
		let pool = ConnectionPool::new(PoolConfig::default(), HashMap::new());
		pool.dispose("rust", Path::new("/tmp/nonexistent")).await;
		assert!(pool.get_health().is_empty());
	}
}
