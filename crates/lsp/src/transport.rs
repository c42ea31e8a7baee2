//! LSP base protocol framing: `Header-Name: value\r\n` headers, a blank
//! line, then `Content-Length` bytes of UTF-8 JSON.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;

use crate::error::{Error, Result};
use crate::wire::Message;

/// Reads framed LSP messages off an `AsyncBufRead` stream.
///
/// Not `Clone`/`Sync` — exactly one reader task owns a stream.
pub struct FramedReader<R> {
	inner: R,
}

impl<R: AsyncRead + Unpin> FramedReader<BufReader<R>> {
	pub fn new(inner: R) -> Self {
		Self { inner: BufReader::new(inner) }
	}
}

impl<R: AsyncBufRead + Unpin> FramedReader<R> {
	/// Reads one framed message. Returns `Ok(None)` on clean EOF (the peer
	/// closed the stream between messages, not mid-frame).
	pub async fn read_message(&mut self) -> Result<Option<Message>> {
		let Some(content_length) = self.read_headers().await? else {
			return Ok(None);
		};

		let mut buf = vec![0u8; content_length];
		tokio::io::AsyncReadExt::read_exact(&mut self.inner, &mut buf)
			.await
			.map_err(Error::Io)?;

		let value: serde_json::Value = serde_json::from_slice(&buf)?;
		Ok(Some(Message::from_value(value)?))
	}

	/// Reads the `Header: value\r\n` block up to the terminating blank line
	/// and returns the parsed `Content-Length`. Header names are matched
	/// case-insensitively; unrecognized headers (e.g. `Content-Type`) are
	/// ignored. A missing `Content-Length` before the blank line is fatal.
	async fn read_headers(&mut self) -> Result<Option<usize>> {
		let mut content_length: Option<usize> = None;
		loop {
			let mut line = String::new();
			let n = self.inner.read_line(&mut line).await.map_err(Error::Io)?;
			if n == 0 {
				// Clean EOF before any header bytes means the peer hung up.
				return if content_length.is_none() {
					Ok(None)
				} else {
					Err(Error::Protocol("stream closed mid-frame".into()))
				};
			}

			let line = line.trim_end_matches(['\r', '\n']);
			if line.is_empty() {
				break;
			}

			let Some((name, value)) = line.split_once(':') else {
				return Err(Error::Protocol(format!("malformed header line: {line:?}")));
			};

			if name.trim().eq_ignore_ascii_case("content-length") {
				let parsed = value.trim().parse::<usize>().map_err(|_| Error::Protocol(format!("invalid Content-Length: {value:?}")))?;
				content_length = Some(parsed);
			}
			// Unknown headers (Content-Type, ...) are ignored.
		}

		content_length.map(Some).ok_or_else(|| Error::Protocol("frame missing Content-Length header".into()))
	}
}

/// Writes framed LSP messages to an `AsyncWrite` stream.
///
/// Wrapped in a mutex so concurrent senders never interleave one message's
/// header/body bytes with another's.
pub struct FramedWriter<W> {
	inner: Mutex<W>,
}

impl<W: AsyncWrite + Unpin> FramedWriter<W> {
	pub fn new(inner: W) -> Self {
		Self { inner: Mutex::new(inner) }
	}

	pub async fn send(&self, message: &Message) -> Result<()> {
		let body = serde_json::to_vec(&message.to_value()?)?;
		let header = format!("Content-Length: {}\r\n\r\n", body.len());

		let mut guard = self.inner.lock().await;
		guard.write_all(header.as_bytes()).await.map_err(Error::Io)?;
		guard.write_all(&body).await.map_err(Error::Io)?;
		guard.flush().await.map_err(Error::Io)?;
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::wire::{AnyNotification, JsonRpcVersion};
	use serde_json::json;

	fn frame(body: &str) -> Vec<u8> {
		let mut out = format!("Content-Length: {}\r\n\r\n", body.len()).into_bytes();
		out.extend_from_slice(body.as_bytes());
		out
	}

	#[tokio::test]
	async fn round_trips_notification() {
		let (client, server) = tokio::io::duplex(4096);
		let writer = FramedWriter::new(tokio::io::BufWriter::new(client));
		let mut reader = FramedReader::new(server);

		let notif = Message::Notification(AnyNotification {
			jsonrpc: JsonRpcVersion,
			method: "textDocument/didOpen".into(),
			params: Some(json!({"uri": "file:///a.rs"})),
		});
		writer.send(&notif).await.unwrap();

		let got = reader.read_message().await.unwrap().unwrap();
		match got {
			Message::Notification(n) => assert_eq!(n.method, "textDocument/didOpen"),
			other => panic!("expected notification, got {other:?}"),
		}
	}

	#[tokio::test]
	async fn header_names_are_case_insensitive_and_unknown_headers_ignored() {
		let body = json!({"jsonrpc": "2.0", "method": "ping", "params": {}}).to_string();
		let mut raw = format!("content-LENGTH: {}\r\nX-Custom: ignore-me\r\n\r\n", body.len()).into_bytes();
		raw.extend_from_slice(body.as_bytes());

		let mut reader = FramedReader::new(std::io::Cursor::new(raw));
		let msg = reader.read_message().await.unwrap().unwrap();
		assert!(matches!(msg, Message::Notification(_)));
	}

	#[tokio::test]
	async fn missing_content_length_is_fatal() {
		let raw = b"X-Custom: value\r\n\r\n{}".to_vec();
		let mut reader = FramedReader::new(std::io::Cursor::new(raw));
		let err = reader.read_message().await.unwrap_err();
		assert!(matches!(err, Error::Protocol(_)));
	}

	#[tokio::test]
	async fn clean_eof_before_any_bytes_yields_none() {
		let mut reader = FramedReader::new(std::io::Cursor::new(Vec::new()));
		assert!(reader.read_message().await.unwrap().is_none());
	}

	#[tokio::test]
	async fn eof_mid_frame_is_an_error() {
		let mut raw = frame(r#"{"jsonrpc":"2.0","method":"m","params":{}}"#);
		raw.truncate(raw.len() - 5);
		let mut reader = FramedReader::new(std::io::Cursor::new(raw));
		assert!(reader.read_message().await.is_err());
	}
}
