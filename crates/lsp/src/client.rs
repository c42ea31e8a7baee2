//! One LSP session against one subprocess.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use lsp_types::{
	CallHierarchyClientCapabilities, ClientCapabilities, HoverClientCapabilities, InitializeParams, InitializedParams,
	MarkupKind, ResourceOperationKind, ServerCapabilities, TextDocumentClientCapabilities, Url, WorkspaceClientCapabilities,
	WorkspaceEditClientCapabilities, WorkspaceFolder,
};
use parking_lot::{Mutex as SyncMutex, RwLock};
use serde_json::{json, Value as JsonValue};
use tokio::io::BufReader;
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{broadcast, oneshot, Mutex as AsyncMutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::error::{Error, Result};
use crate::transport::{FramedReader, FramedWriter};
use crate::types::ServerConfig;
use crate::wire::{AnyNotification, AnyRequest, AnyResponse, JsonRpcVersion, Message, RequestId, ResponseError};

const INITIALIZE_DEADLINE: Duration = Duration::from_secs(30);
const PING_DEADLINE: Duration = Duration::from_secs(5);
const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(5);
const SIGTERM_GRACE: Duration = Duration::from_secs(3);
const SIGKILL_GRACE: Duration = Duration::from_secs(2);

/// Lifecycle states: `Unstarted -> Starting -> Ready -> Stopping ->
/// Stopped`, plus the terminal `Crashed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
	Unstarted,
	Starting,
	Ready,
	Stopping,
	Stopped,
	Crashed,
}

/// Observable events a subscriber (the Pool's health loop, notification
/// handlers) can watch without owning the Client.
#[derive(Debug, Clone)]
pub enum TransportEvent {
	Notification(AnyNotification),
	StateChanged(ClientState),
	Crashed { code: Option<i32>, signal: Option<i32> },
}

/// A server-to-client request handler, e.g. `workspace/applyEdit`.
#[async_trait::async_trait]
pub trait ServerRequestHandler: Send + Sync {
	async fn handle(&self, method: &str, params: Option<JsonValue>) -> std::result::Result<JsonValue, ResponseError>;
}

type PendingResolver = oneshot::Sender<Result<JsonValue>>;

struct QueuedRequest {
	method: String,
	params: Option<JsonValue>,
	resolver: PendingResolver,
}

/// One LSP session against one subprocess. Never shared across
/// `ConnectionKey`s; owned by exactly one `PoolEntry`.
pub struct Client {
	state: RwLock<ClientState>,
	child: AsyncMutex<Option<Child>>,
	writer: SyncMutex<Option<Arc<FramedWriter<ChildStdin>>>>,
	reader_task: SyncMutex<Option<tokio::task::JoinHandle<()>>>,
	pending: SyncMutex<HashMap<RequestId, PendingResolver>>,
	queued: SyncMutex<Vec<QueuedRequest>>,
	next_id: AtomicI64,
	capabilities: RwLock<Option<ServerCapabilities>>,
	start_time: RwLock<Option<Instant>>,
	crashes: AtomicU32,
	stopping: AtomicBool,
	events: broadcast::Sender<TransportEvent>,
	request_handler: RwLock<Option<Arc<dyn ServerRequestHandler>>>,
}

impl Client {
	pub fn new() -> Arc<Self> {
		let (events, _rx) = broadcast::channel(256);
		Arc::new(Self {
			state: RwLock::new(ClientState::Unstarted),
			child: AsyncMutex::new(None),
			writer: SyncMutex::new(None),
			reader_task: SyncMutex::new(None),
			pending: SyncMutex::new(HashMap::new()),
			queued: SyncMutex::new(Vec::new()),
			next_id: AtomicI64::new(1),
			capabilities: RwLock::new(None),
			start_time: RwLock::new(None),
			crashes: AtomicU32::new(0),
			stopping: AtomicBool::new(false),
			events,
			request_handler: RwLock::new(None),
		})
	}

	pub fn state(&self) -> ClientState {
		*self.state.read()
	}

	pub fn is_connected(&self) -> bool {
		self.state() == ClientState::Ready
	}

	pub fn capabilities(&self) -> Option<ServerCapabilities> {
		self.capabilities.read().clone()
	}

	pub fn uptime(&self) -> Option<Duration> {
		self.start_time.read().map(|t| t.elapsed())
	}

	pub fn crash_count(&self) -> u32 {
		self.crashes.load(Ordering::SeqCst)
	}

	pub fn subscribe_events(&self) -> broadcast::Receiver<TransportEvent> {
		self.events.subscribe()
	}

	pub fn set_request_handler(&self, handler: Arc<dyn ServerRequestHandler>) {
		*self.request_handler.write() = Some(handler);
	}

	fn set_state(&self, state: ClientState) {
		*self.state.write() = state;
		let _ = self.events.send(TransportEvent::StateChanged(state));
	}

	/// Spawns the subprocess, performs the `initialize`/`initialized`
	/// handshake, and transitions `Starting -> Ready`.
	#[instrument(skip(self, config), fields(command = %config.command))]
	pub async fn start(self: &Arc<Self>, config: ServerConfig, root: &std::path::Path, in_container: bool) -> Result<()> {
		if self.state() != ClientState::Unstarted {
			return Err(Error::Protocol("client already started".into()));
		}
		self.set_state(ClientState::Starting);

		let (command, args) = config.resolved_argv(in_container);
		let mut cmd = Command::new(command);
		cmd.args(args)
			.envs(&config.env)
			.stdin(Stdio::piped())
			.stdout(Stdio::piped())
			.stderr(Stdio::piped())
			.kill_on_drop(true);

		let mut child = cmd.spawn().map_err(Error::Io)?;
		let stdin = child.stdin.take().expect("piped stdin");
		let stdout = child.stdout.take().expect("piped stdout");
		let stderr = child.stderr.take().expect("piped stderr");

		let writer = Arc::new(FramedWriter::new(stdin));
		*self.writer.lock() = Some(writer);
		*self.child.lock().await = Some(child);

		let reader = FramedReader::new(stdout);
		let this = Arc::clone(self);
		let reader_handle = tokio::spawn(async move { this.reader_loop(reader).await });
		*self.reader_task.lock() = Some(reader_handle);

		tokio::spawn(async move {
			let mut lines = tokio::io::AsyncBufReadExt::lines(BufReader::new(stderr));
			while let Ok(Some(line)) = lines.next_line().await {
				debug!(target: "polylsp_lsp::stderr", "{line}");
			}
		});

		let root_uri = Url::from_directory_path(root).map_err(|_| Error::InitializeFailed(format!("invalid workspace root: {}", root.display())))?;
		let workspace_folder = WorkspaceFolder { uri: root_uri.clone(), name: root.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default() };

		let init_params = InitializeParams {
			process_id: Some(std::process::id()),
			root_uri: Some(root_uri),
			workspace_folders: Some(vec![workspace_folder]),
			capabilities: client_capabilities(),
			initialization_options: config.initialization_options.clone(),
			..Default::default()
		};

		let init_result = tokio::time::timeout(INITIALIZE_DEADLINE, self.send_request_uncounted("initialize", Some(serde_json::to_value(init_params)?))).await;

		let result = match init_result {
			Ok(Ok(value)) => value,
			Ok(Err(e)) => {
				self.set_state(ClientState::Crashed);
				self.settle_all_pending();
				return Err(Error::InitializeFailed(e.to_string()));
			}
			Err(_elapsed) => {
				self.set_state(ClientState::Crashed);
				self.settle_all_pending();
				return Err(Error::InitializeFailed("deadline exceeded".into()));
			}
		};

		let capabilities: ServerCapabilities = serde_json::from_value(result.get("capabilities").cloned().unwrap_or(JsonValue::Null))?;
		*self.capabilities.write() = Some(capabilities);
		*self.start_time.write() = Some(Instant::now());

		self.send_notification("initialized", Some(serde_json::to_value(InitializedParams {})?)).await?;
		self.set_state(ClientState::Ready);
		self.flush_queued().await;

		Ok(())
	}

	async fn flush_queued(&self) {
		let queued = std::mem::take(&mut *self.queued.lock());
		for q in queued {
			let id = RequestId::Number(self.next_id.fetch_add(1, Ordering::SeqCst));
			self.pending.lock().insert(id.clone(), q.resolver);
			if let Err(e) = self.write_request(id.clone(), &q.method, q.params).await {
				if let Some(resolver) = self.pending.lock().remove(&id) {
					let _ = resolver.send(Err(e));
				}
			}
		}
	}

	async fn write_request(&self, id: RequestId, method: &str, params: Option<JsonValue>) -> Result<()> {
		let writer = self.writer.lock().clone().ok_or(Error::ClientClosed)?;
		let message = Message::Request(AnyRequest { jsonrpc: JsonRpcVersion, id, method: method.to_string(), params });
		writer.send(&message).await
	}

	/// Sends `initialize` itself: bypasses the `Ready`-gating that
	/// `send_request` enforces, since we are still `Starting`.
	async fn send_request_uncounted(&self, method: &str, params: Option<JsonValue>) -> Result<JsonValue> {
		let id = RequestId::Number(self.next_id.fetch_add(1, Ordering::SeqCst));
		let (tx, rx) = oneshot::channel();
		self.pending.lock().insert(id.clone(), tx);
		self.write_request(id.clone(), method, params).await?;
		match rx.await {
			Ok(result) => result,
			Err(_) => Err(Error::ClientClosed),
		}
	}

	/// Sends a request. Requests issued before `Ready` are queued and
	/// flushed (or rejected) on the next state transition.
	pub async fn send_request(&self, method: &str, params: Option<JsonValue>, cancel: Option<CancellationToken>) -> Result<JsonValue> {
		match self.state() {
			ClientState::Crashed | ClientState::Stopped | ClientState::Stopping => return Err(Error::ClientClosed),
			ClientState::Unstarted | ClientState::Starting => {
				let (tx, rx) = oneshot::channel();
				self.queued.lock().push(QueuedRequest { method: method.to_string(), params, resolver: tx });
				return self.await_response(rx, method, cancel).await;
			}
			ClientState::Ready => {}
		}

		let id = RequestId::Number(self.next_id.fetch_add(1, Ordering::SeqCst));
		let (tx, rx) = oneshot::channel();
		self.pending.lock().insert(id.clone(), tx);
		if let Err(e) = self.write_request(id.clone(), method, params).await {
			self.pending.lock().remove(&id);
			return Err(e);
		}

		if let Some(token) = cancel.clone() {
			let writer = self.writer.lock().clone();
			let pending = &self.pending;
			let id_for_cancel = id.clone();
			tokio::select! {
				_ = token.cancelled() => {
					if let Some(resolver) = pending.lock().remove(&id_for_cancel) {
						let _ = resolver.send(Err(Error::Cancelled));
					}
					if let Some(writer) = writer {
						let cancel_notif = Message::Notification(AnyNotification::new("$/cancelRequest", json!({"id": id_for_cancel})));
						let _ = writer.send(&cancel_notif).await;
					}
					return Err(Error::Cancelled);
				}
				result = rx => {
					return match result {
						Ok(result) => result,
						Err(_) => Err(Error::ClientClosed),
					};
				}
			}
		}

		match rx.await {
			Ok(result) => result,
			Err(_) => Err(Error::ClientClosed),
		}
	}

	async fn await_response(&self, rx: oneshot::Receiver<Result<JsonValue>>, _method: &str, cancel: Option<CancellationToken>) -> Result<JsonValue> {
		if let Some(token) = cancel {
			tokio::select! {
				_ = token.cancelled() => Err(Error::Cancelled),
				result = rx => match result {
					Ok(result) => result,
					Err(_) => Err(Error::ClientClosed),
				},
			}
		} else {
			match rx.await {
				Ok(result) => result,
				Err(_) => Err(Error::ClientClosed),
			}
		}
	}

	pub async fn send_notification(&self, method: &str, params: Option<JsonValue>) -> Result<()> {
		let writer = self.writer.lock().clone().ok_or(Error::ClientClosed)?;
		let message = Message::Notification(AnyNotification { jsonrpc: JsonRpcVersion, method: method.to_string(), params });
		writer.send(&message).await
	}

	/// `$/ping` if the server answers it at all (including `MethodNotFound`,
	/// which just means the extension isn't implemented); otherwise falls
	/// back to a harmless `workspace/symbol` with an empty query.
	pub async fn ping(&self) -> bool {
		match tokio::time::timeout(PING_DEADLINE, self.send_request("$/ping", None, None)).await {
			Ok(Ok(_)) => true,
			Ok(Err(Error::Server { code, .. })) if code == ResponseError::METHOD_NOT_FOUND => {
				matches!(
					tokio::time::timeout(PING_DEADLINE, self.send_request("workspace/symbol", Some(json!({"query": ""})), None)).await,
					Ok(Ok(_)) | Ok(Err(Error::Server { .. }))
				)
			}
			Ok(Err(Error::Server { .. })) => true,
			_ => false,
		}
	}

	/// `shutdown` / `exit`, then SIGTERM, then SIGKILL if the process
	/// outlives its grace periods. Settles every pending request with
	/// `ClientClosed`.
	pub async fn stop(&self) {
		if matches!(self.state(), ClientState::Stopped | ClientState::Crashed) {
			return;
		}
		self.stopping.store(true, Ordering::SeqCst);
		self.set_state(ClientState::Stopping);

		let _ = tokio::time::timeout(SHUTDOWN_DEADLINE, self.send_request("shutdown", None, None)).await;
		let _ = self.send_notification("exit", None).await;

		let mut guard = self.child.lock().await;
		if let Some(child) = guard.as_mut() {
			if tokio::time::timeout(SIGTERM_GRACE, child.wait()).await.is_err() {
				terminate_process(child, Signal::Term);
				if tokio::time::timeout(SIGKILL_GRACE, child.wait()).await.is_err() {
					terminate_process(child, Signal::Kill);
					let _ = child.wait().await;
				}
			}
		}
		drop(guard);

		if let Some(handle) = self.reader_task.lock().take() {
			handle.abort();
		}

		self.settle_all_pending();
		self.set_state(ClientState::Stopped);
	}

	fn settle_all_pending(&self) {
		let pending: Vec<_> = self.pending.lock().drain().collect();
		for (_, resolver) in pending {
			let _ = resolver.send(Err(Error::ClientClosed));
		}
		let queued: Vec<_> = self.queued.lock().drain(..).collect();
		for q in queued {
			let _ = q.resolver.send(Err(Error::ClientClosed));
		}
	}

	async fn reader_loop(self: Arc<Self>, mut reader: FramedReader<BufReader<tokio::process::ChildStdout>>) {
		loop {
			match reader.read_message().await {
				Ok(Some(Message::Response(resp))) => self.dispatch_response(resp),
				Ok(Some(Message::Notification(notif))) => {
					let _ = self.events.send(TransportEvent::Notification(notif));
				}
				Ok(Some(Message::Request(req))) => self.dispatch_server_request(req).await,
				Ok(None) => {
					debug!("transport closed cleanly");
					break;
				}
				Err(e) => {
					warn!(error = %e, "lsp transport read error");
					break;
				}
			}
		}

		if !self.stopping.load(Ordering::SeqCst) {
			self.set_state(ClientState::Crashed);
			self.settle_all_pending();
			let _ = self.events.send(TransportEvent::Crashed { code: None, signal: None });
		}
	}

	fn dispatch_response(&self, resp: AnyResponse) {
		let resolver = self.pending.lock().remove(&resp.id);
		match resolver {
			Some(resolver) => {
				let result = resp.into_result().map_err(|e| Error::Server { code: e.code, message: e.message });
				let _ = resolver.send(result);
			}
			None => warn!(id = %resp.id, "response to unknown request id"),
		}
	}

	async fn dispatch_server_request(&self, req: AnyRequest) {
		let handler = self.request_handler.read().clone();
		let writer = self.writer.lock().clone();
		let Some(writer) = writer else { return };

		let response = match handler {
			Some(handler) => match handler.handle(&req.method, req.params).await {
				Ok(result) => AnyResponse::new_ok(req.id, result),
				Err(e) => AnyResponse::new_err(req.id, e),
			},
			None => AnyResponse::new_err(req.id, ResponseError { code: ResponseError::METHOD_NOT_FOUND, message: format!("no handler for {}", req.method), data: None }),
		};
		let _ = writer.send(&Message::Response(response)).await;
	}
}

#[cfg(unix)]
enum Signal {
	Term,
	Kill,
}

#[cfg(unix)]
fn terminate_process(child: &tokio::process::Child, signal: Signal) {
	use nix::sys::signal::{self, Signal as NixSignal};
	use nix::unistd::Pid;

	let Some(pid) = child.id() else { return };
	let nix_signal = match signal {
		Signal::Term => NixSignal::SIGTERM,
		Signal::Kill => NixSignal::SIGKILL,
	};
	let _ = signal::kill(Pid::from_raw(pid as i32), nix_signal);
}

#[cfg(not(unix))]
enum Signal {
	Term,
	Kill,
}

#[cfg(not(unix))]
fn terminate_process(child: &mut tokio::process::Child, _signal: Signal) {
	let _ = child.start_kill();
}

fn client_capabilities() -> ClientCapabilities {
	ClientCapabilities {
		workspace: Some(WorkspaceClientCapabilities {
			apply_edit: Some(true),
			workspace_edit: Some(WorkspaceEditClientCapabilities {
				document_changes: Some(true),
				resource_operations: Some(vec![ResourceOperationKind::Create, ResourceOperationKind::Rename, ResourceOperationKind::Delete]),
				failure_handling: None,
				normalizes_line_endings: Some(false),
				change_annotation_support: None,
			}),
			..Default::default()
		}),
		text_document: Some(TextDocumentClientCapabilities {
			call_hierarchy: Some(CallHierarchyClientCapabilities { dynamic_registration: Some(false) }),
			hover: Some(HoverClientCapabilities { dynamic_registration: Some(false), content_format: Some(vec![MarkupKind::Markdown, MarkupKind::PlainText]) }),
			..Default::default()
		}),
		..Default::default()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn client_capabilities_advertise_apply_edit_and_call_hierarchy() {
		let caps = client_capabilities();
		assert_eq!(caps.workspace.unwrap().apply_edit, Some(true));
		assert!(caps.text_document.unwrap().call_hierarchy.is_some());
	}

	#[tokio::test]
	async fn fresh_client_is_unstarted_and_disconnected() {
		let client = Client::new();
		assert_eq!(client.state(), ClientState::Unstarted);
		assert!(!client.is_connected());
		assert_eq!(client.crash_count(), 0);
	}

	#[tokio::test]
	async fn stopping_a_never_started_client_settles_queued_requests() {
		let client = Client::new();
		// A request issued against an Unstarted client queues instead of
		// failing outright; stop() must still resolve it.
		let send = tokio::spawn({
			let client = Arc::clone(&client);
			async move { client.send_request("textDocument/hover", None, None).await }
		});
		tokio::task::yield_now().await;
		client.stop().await;
		let result = send.await.unwrap();
		assert!(matches!(result, Err(Error::ClientClosed)));
	}
}
