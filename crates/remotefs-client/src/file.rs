//! Remote file sessions.
//!
//! A [`RemoteFile`] owns one persistent socket and drives the file protocol
//! over it:
//!
//! ```text
//!   Unopened ──connect()──▶ Connecting ──handshake ok──▶ Open ──close()──▶ Closed
//!      ▲                        │
//!      └──── handshake failed ──┘
//! ```
//!
//! Every operation sends one JSON request frame and waits for exactly one
//! response frame. Operations take `&mut self`, so a request can never be
//! issued while another response is pending.

use std::fmt;
use std::io::SeekFrom;
use std::sync::Arc;
use std::time::Duration;

use futures::Stream;
use serde_json::{Map, Value};
use url::Url;

use crate::codec::{Codec, Payload};
use crate::constants::CLOSE_PROTOCOL_ERROR;
use crate::endpoint::ServiceEndpoint;
use crate::error::{ErrorEnvelope, RemoteFsError, Result};
use crate::options::{FileMode, OpenOptions};
use crate::response::{Reply, decode_response, handshake_error, parse_frame};
use crate::transport::{CloseFrame, FileSocket, Frame, SocketConnector, TransportError};

/// Lifecycle state of a [`RemoteFile`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileState {
    Unopened,
    Connecting,
    Open,
    /// Terminal.
    Closed,
}

impl fmt::Display for FileState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FileState::Unopened => "unopened",
            FileState::Connecting => "connecting",
            FileState::Open => "open",
            FileState::Closed => "closed",
        })
    }
}

enum Connection {
    Unopened,
    Connecting,
    Open(Box<dyn FileSocket>),
    Closed,
}

/// One open (or openable) file on the remote server.
pub struct RemoteFile {
    path: String,
    options: OpenOptions,
    codec: Codec,
    url: Url,
    connector: Arc<dyn SocketConnector>,
    conn: Connection,
}

impl fmt::Debug for RemoteFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteFile")
            .field("path", &self.path)
            .field("mode", &self.options.mode.as_str())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl RemoteFile {
    /// Prepare a handle for `path`. Nothing is sent until [`connect`](Self::connect).
    pub fn new(
        endpoint: &ServiceEndpoint,
        connector: Arc<dyn SocketConnector>,
        path: impl Into<String>,
        options: OpenOptions,
    ) -> Result<Self> {
        let path = path.into();
        let codec = Codec::for_label(options.mode.is_binary(), &options.encoding)
            .ok_or_else(|| RemoteFsError::UnknownEncoding(options.encoding.clone()))?;
        let url = endpoint.open(&path, &options.query())?;
        Ok(Self {
            path,
            options,
            codec,
            url,
            connector,
            conn: Connection::Unopened,
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn mode(&self) -> &FileMode {
        &self.options.mode
    }

    pub fn encoding(&self) -> &str {
        &self.options.encoding
    }

    pub fn is_atomic(&self) -> bool {
        self.options.atomic
    }

    pub fn is_locked(&self) -> bool {
        self.options.lock
    }

    /// The WebSocket URL the session is opened against.
    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn state(&self) -> FileState {
        match self.conn {
            Connection::Unopened => FileState::Unopened,
            Connection::Connecting => FileState::Connecting,
            Connection::Open(_) => FileState::Open,
            Connection::Closed => FileState::Closed,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.state() == FileState::Closed
    }

    /// Bound (or unbound) the wait for `read`, `readall`, `readline` and
    /// `readlines` responses. A timed-out session is not reliably usable.
    pub fn set_read_timeout(&mut self, timeout: Option<Duration>) {
        self.options.read_timeout = timeout;
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        self.options.read_timeout
    }

    // ========================================================================
    // Session lifecycle
    // ========================================================================

    /// Open the session. A no-op when already open.
    ///
    /// On handshake failure the socket is closed and the handle goes back to
    /// `Unopened`, so calling `connect` again starts a fresh handshake.
    pub async fn connect(&mut self) -> Result<()> {
        match self.conn {
            Connection::Open(_) => return Ok(()),
            Connection::Closed => return Err(RemoteFsError::NotOpen(FileState::Closed)),
            Connection::Unopened | Connection::Connecting => {}
        }

        self.conn = Connection::Connecting;
        tracing::debug!(path = %self.path, mode = %self.options.mode, "opening remote file");

        let mut socket = match self.connector.connect(&self.url).await {
            Ok(socket) => socket,
            Err(e) => {
                self.conn = Connection::Unopened;
                return Err(e.into());
            }
        };

        match check_connection(socket.as_mut()).await {
            Ok(()) => {
                tracing::debug!(path = %self.path, "remote file open");
                self.conn = Connection::Open(socket);
                Ok(())
            }
            Err(e) => {
                tracing::debug!(path = %self.path, error = %e, "open rejected");
                if let Err(close_err) = socket.close().await {
                    tracing::debug!(error = %close_err, "failed to close rejected socket");
                }
                self.conn = Connection::Unopened;
                Err(e)
            }
        }
    }

    /// Close the session. Closing a closed file is a no-op; closing a file
    /// that was never opened is an error.
    pub async fn close(&mut self) -> Result<()> {
        match std::mem::replace(&mut self.conn, Connection::Closed) {
            Connection::Open(mut socket) => {
                tracing::debug!(path = %self.path, "closing remote file");
                socket.close().await?;
                Ok(())
            }
            Connection::Closed => Ok(()),
            Connection::Unopened => {
                self.conn = Connection::Unopened;
                Err(RemoteFsError::NotOpen(FileState::Unopened))
            }
            Connection::Connecting => {
                self.conn = Connection::Connecting;
                Err(RemoteFsError::NotOpen(FileState::Connecting))
            }
        }
    }

    // ========================================================================
    // Reading
    // ========================================================================

    /// Read up to `size` bytes (binary) or characters (text); `None` reads to EOF.
    pub async fn read(&mut self, size: Option<usize>) -> Result<Payload> {
        let reply = self.read_call("read", "n", size).await?;
        Ok(reply.into_single()?.unwrap_or_else(|| self.codec.empty()))
    }

    pub async fn readall(&mut self) -> Result<Payload> {
        self.read(None).await
    }

    /// Read one line, including its terminator. Empty at EOF.
    pub async fn readline(&mut self, size: Option<usize>) -> Result<Payload> {
        let reply = self.read_call("readline", "size", size).await?;
        Ok(reply.into_single()?.unwrap_or_else(|| self.codec.empty()))
    }

    pub async fn readlines(&mut self, hint: Option<usize>) -> Result<Vec<Payload>> {
        Ok(self.read_call("readlines", "hint", hint).await?.into_many())
    }

    /// Not available on remote files, in any state.
    pub async fn readinto(&mut self, _buf: &mut [u8]) -> Result<usize> {
        Err(RemoteFsError::Unsupported("readinto"))
    }

    /// Iterate over lines. Each step is one `readline`; the stream ends at
    /// the first empty line and after the first error.
    pub fn lines(&mut self) -> impl Stream<Item = Result<Payload>> + '_ {
        futures::stream::try_unfold(self, |file| async move {
            let line = file.readline(None).await?;
            let next = if line.is_empty() { None } else { Some((line, file)) };
            Ok::<_, RemoteFsError>(next)
        })
    }

    // ========================================================================
    // Writing
    // ========================================================================

    /// Write `data`, returning the count the server reports.
    pub async fn write(&mut self, data: impl Into<Payload>) -> Result<u64> {
        let encoded = self.codec.encode(&data.into())?;
        let reply = self.call("write", vec![("data", encoded)], None).await?;
        expect_u64("write", reply)
    }

    pub async fn writelines<I>(&mut self, lines: I) -> Result<()>
    where
        I: IntoIterator,
        I::Item: Into<Payload>,
    {
        let encoded = lines
            .into_iter()
            .map(|line| self.codec.encode(&line.into()))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        self.call("writelines", vec![("lines", Value::Array(encoded))], None)
            .await?;
        Ok(())
    }

    pub async fn flush(&mut self) -> Result<()> {
        self.call("flush", Vec::new(), None).await?;
        Ok(())
    }

    /// Truncate to `size` bytes, or at the current position when `None`.
    pub async fn truncate(&mut self, size: Option<u64>) -> Result<u64> {
        let reply = self
            .call("truncate", vec![("size", size.map_or(Value::Null, Value::from))], None)
            .await?;
        expect_u64("truncate", reply)
    }

    // ========================================================================
    // Positioning and queries
    // ========================================================================

    pub async fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        let (offset, whence) = match pos {
            SeekFrom::Start(n) => (Value::from(n), 0),
            SeekFrom::Current(n) => (Value::from(n), 1),
            SeekFrom::End(n) => (Value::from(n), 2),
        };
        let reply = self
            .call("seek", vec![("offset", offset), ("whence", Value::from(whence))], None)
            .await?;
        expect_u64("seek", reply)
    }

    pub async fn tell(&mut self) -> Result<u64> {
        let reply = self.call("tell", Vec::new(), None).await?;
        expect_u64("tell", reply)
    }

    /// The server-side file descriptor number.
    pub async fn fileno(&mut self) -> Result<i64> {
        let reply = self.call("fileno", Vec::new(), None).await?;
        single_value(reply)
            .and_then(|v| v.as_i64())
            .ok_or_else(|| RemoteFsError::Protocol("fileno: expected an integer".into()))
    }

    pub async fn isatty(&mut self) -> Result<bool> {
        let reply = self.call("isatty", Vec::new(), None).await?;
        expect_bool("isatty", reply)
    }

    pub async fn readable(&mut self) -> Result<bool> {
        let reply = self.call("readable", Vec::new(), None).await?;
        expect_bool("readable", reply)
    }

    pub async fn writable(&mut self) -> Result<bool> {
        let reply = self.call("writable", Vec::new(), None).await?;
        expect_bool("writable", reply)
    }

    // ========================================================================
    // Request/response
    // ========================================================================

    async fn read_call(&mut self, method: &'static str, arg: &str, limit: Option<usize>) -> Result<Reply> {
        let limit = limit.map_or(Value::from(-1), Value::from);
        let timeout = self.options.read_timeout;
        self.call(method, vec![(arg, limit)], timeout).await
    }

    async fn call(
        &mut self,
        method: &'static str,
        args: Vec<(&str, Value)>,
        timeout: Option<Duration>,
    ) -> Result<Reply> {
        let state = self.state();
        let Connection::Open(socket) = &mut self.conn else {
            return Err(RemoteFsError::NotOpen(state));
        };

        let mut request = Map::new();
        request.insert("method".into(), Value::from(method));
        for (key, value) in args {
            request.insert(key.to_string(), value);
        }
        tracing::trace!(path = %self.path, method, "request");
        socket.send_text(Value::Object(request).to_string()).await?;

        let frame = match timeout {
            Some(limit) => tokio::time::timeout(limit, socket.receive())
                .await
                .map_err(|_| TransportError::Timeout)??,
            None => socket.receive().await?,
        };

        if let Frame::Close(frame) = &frame {
            tracing::debug!(path = %self.path, ?frame, "server closed the session");
            self.conn = Connection::Closed;
            return Err(TransportError::Closed.into());
        }

        let message = parse_frame(frame)?;
        let reply = decode_response(message, socket.url().as_str(), &self.codec);
        tracing::trace!(path = %self.path, method, ok = reply.is_ok(), "response");
        reply
    }
}

impl Drop for RemoteFile {
    fn drop(&mut self) {
        let Connection::Open(mut socket) = std::mem::replace(&mut self.conn, Connection::Closed)
        else {
            return;
        };
        tracing::warn!(path = %self.path, "remote file dropped while open");
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if let Err(e) = socket.close().await {
                    tracing::debug!(error = %e, "failed to close dropped remote file");
                }
            });
        }
    }
}

/// Wait for the server's first frame and decide whether the open succeeded.
async fn check_connection(socket: &mut dyn FileSocket) -> Result<()> {
    let frame = socket.receive().await?;
    let url = socket.url().as_str();
    match frame {
        Frame::Close(Some(CloseFrame { code, reason })) if code == CLOSE_PROTOCOL_ERROR => {
            match serde_json::from_str::<Value>(&reason) {
                Ok(body @ Value::Object(_)) => Err(handshake_error(&body, url).into()),
                _ => Err(ErrorEnvelope::open_failed(url).into()),
            }
        }
        Frame::Close(_) => Err(ErrorEnvelope::open_failed(url).into()),
        Frame::Text(_) | Frame::Binary(_) => Ok(()),
    }
}

fn single_value(reply: Reply) -> Option<Value> {
    match reply.into_single() {
        Ok(Some(Payload::Value(v))) => Some(v),
        _ => None,
    }
}

fn expect_u64(op: &str, reply: Reply) -> Result<u64> {
    single_value(reply)
        .and_then(|v| v.as_u64())
        .ok_or_else(|| RemoteFsError::Protocol(format!("{op}: expected a non-negative integer")))
}

fn expect_bool(op: &str, reply: Reply) -> Result<bool> {
    single_value(reply)
        .and_then(|v| v.as_bool())
        .ok_or_else(|| RemoteFsError::Protocol(format!("{op}: expected a boolean")))
}
