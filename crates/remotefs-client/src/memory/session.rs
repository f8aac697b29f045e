//! File sessions on the in-memory server.
//!
//! Sessions are byte-oriented: sizes and counts are in bytes whatever the
//! text encoding. Non-atomic sessions write through to the tree after every
//! mutation; atomic ones commit on close, and discard their changes if the
//! socket is dropped without closing.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde_json::{Value, json};
use url::Url;

use super::Shared;
use super::tree::{Failure, FsResult, display, errno};
use crate::codec::TextEncoding;
use crate::constants::CLOSE_PROTOCOL_ERROR;
use crate::constants::status::LOCKED;
use crate::options::{Access, FileMode};
use crate::transport::{CloseFrame, FileSocket, Frame, TransportError};

/// Close code sent when the server drops its sessions.
const CLOSE_GOING_AWAY: u16 = 1001;

/// Largest file a session may grow, in bytes.
const MAX_FILE_SIZE: usize = 1 << 30;

/// Parameters of an open request, as read from its query string.
pub(super) struct OpenRequest {
    pub path: PathBuf,
    pub mode: String,
    pub atomic: bool,
    pub lock: bool,
    pub encoding: String,
}

struct Session {
    path: PathBuf,
    mode: FileMode,
    atomic: bool,
    lock: bool,
    data: Vec<u8>,
    pos: usize,
    fd: i64,
}

pub(super) struct MemorySocket {
    shared: Arc<Shared>,
    url: Url,
    generation: u64,
    session: Option<Session>,
    outbox: VecDeque<Frame>,
    closed: bool,
}

impl MemorySocket {
    /// Run the open handshake. The result is always a socket; a rejected
    /// open queues a close frame instead of the greeting.
    pub fn open(shared: Arc<Shared>, url: Url, request: OpenRequest) -> Self {
        let generation = shared.generation.load(Ordering::SeqCst);
        let mut socket = Self {
            shared,
            url,
            generation,
            session: None,
            outbox: VecDeque::new(),
            closed: false,
        };

        match socket.start(request) {
            Ok(session) => {
                tracing::trace!(path = %super::tree::display(&session.path), fd = session.fd, "memory session open");
                socket.session = Some(session);
                socket.push(json!({"status": 200}));
            }
            Err(body) => {
                socket.outbox.push_back(Frame::Close(Some(CloseFrame {
                    code: CLOSE_PROTOCOL_ERROR,
                    reason: body.to_string(),
                })));
                socket.closed = true;
            }
        }
        socket
    }

    fn start(&self, request: OpenRequest) -> Result<Session, Value> {
        let mode = FileMode::parse(&request.mode).map_err(|_| {
            Failure::service("ValueError", format!("invalid mode: '{}'", request.mode)).body()
        })?;
        if TextEncoding::for_label(&request.encoding).is_none() {
            return Err(Failure::service(
                "LookupError",
                format!("unknown encoding: {}", request.encoding),
            )
            .body());
        }

        let mut state = self.shared.state.write();
        let path = request.path;
        if request.lock && state.locks.contains(&path) {
            return Err(json!({
                "status": LOCKED,
                "errno": errno::EAGAIN,
                "strerror": "Resource temporarily unavailable",
                "filename": display(&path),
            }));
        }

        let tree = &mut state.tree;
        let existing = match tree.read_file(&path) {
            Ok(data) => Some(data),
            Err(Failure::Os { errno: errno::ENOENT, .. }) => None,
            Err(other) => return Err(other.body()),
        };

        let (data, pos) = match (mode.access(), existing) {
            (Access::Read, Some(data)) => (data, 0),
            (Access::Read, None) => return Err(Failure::os(errno::ENOENT, &path).body()),
            (Access::Exclusive, Some(_)) => return Err(Failure::os(errno::EEXIST, &path).body()),
            (Access::Write | Access::Exclusive, _) => (Vec::new(), 0),
            (Access::Append, Some(data)) => {
                let end = data.len();
                (data, end)
            }
            (Access::Append, None) => (Vec::new(), 0),
        };

        if mode.access() != Access::Read {
            tree.require_parent(&path).map_err(|f| f.body())?;
            if !request.atomic {
                tree.write_file(&path, data.clone()).map_err(|f| f.body())?;
            }
        }

        if request.lock {
            state.locks.insert(path.clone());
        }
        Ok(Session {
            path,
            mode,
            atomic: request.atomic,
            lock: request.lock,
            data,
            pos,
            fd: self.shared.next_fd.fetch_add(1, Ordering::SeqCst),
        })
    }

    fn push(&mut self, message: Value) {
        self.outbox
            .push_back(Frame::Binary(message.to_string().into_bytes()));
    }

    /// Drop the session if the server disconnected everyone since it opened.
    fn check_disconnect(&mut self) {
        if self.closed || self.shared.generation.load(Ordering::SeqCst) == self.generation {
            return;
        }
        self.finish(false);
        self.closed = true;
        self.outbox.clear();
        self.outbox.push_back(Frame::Close(Some(CloseFrame {
            code: CLOSE_GOING_AWAY,
            reason: "server shutting down".into(),
        })));
    }

    /// End the session: commit atomic writes when `commit` is set, release
    /// the lock either way.
    fn finish(&mut self, commit: bool) {
        let Some(session) = self.session.take() else {
            return;
        };
        let mut state = self.shared.state.write();
        if commit && session.atomic && session.mode.is_writable() {
            if let Err(failure) = state.tree.write_file(&session.path, session.data) {
                tracing::warn!(path = %super::tree::display(&session.path), ?failure, "atomic commit failed");
            }
        }
        if session.lock {
            state.locks.remove(&session.path);
        }
    }

    fn handle(&mut self, text: &str) -> Value {
        let request: Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(e) => return Failure::service("ValueError", format!("bad request: {e}")).body(),
        };
        let method = request.get("method").and_then(Value::as_str).unwrap_or("");

        let Some(session) = self.session.as_mut() else {
            return Failure::service("ValueError", "I/O operation on closed file").body();
        };
        let result = session.dispatch(method, &request);
        if result.is_ok() && !session.atomic && session.dirty(method) {
            let mut state = self.shared.state.write();
            if let Err(failure) = state.tree.write_file(&session.path, session.data.clone()) {
                return failure.body();
            }
        }
        match result {
            Ok(data) => json!({"status": 200, "data": data}),
            Err(failure) => failure.body(),
        }
    }
}

impl Session {
    fn dispatch(&mut self, method: &str, request: &Value) -> FsResult<Value> {
        match method {
            "read" => {
                self.require_readable()?;
                let chunk = self.take(int_arg(request, "n"), |_| None);
                Ok(encode(&chunk))
            }
            "readline" => {
                self.require_readable()?;
                let line = self.take(int_arg(request, "size"), line_end);
                Ok(encode(&line))
            }
            "readlines" => {
                self.require_readable()?;
                let hint = int_arg(request, "hint").filter(|&h| h > 0);
                let mut lines = Vec::new();
                let mut total = 0usize;
                loop {
                    let line = self.take(None, line_end);
                    if line.is_empty() {
                        break;
                    }
                    total += line.len();
                    lines.push(encode(&line));
                    if hint.is_some_and(|h| total >= h as usize) {
                        break;
                    }
                }
                Ok(Value::Array(lines))
            }
            "write" => {
                self.require_writable()?;
                let data = decode(request.get("data"))?;
                Ok(Value::from(self.write(&data)?))
            }
            "writelines" => {
                self.require_writable()?;
                let lines = match request.get("lines") {
                    Some(Value::Array(lines)) => lines,
                    _ => return Err(Failure::service("TypeError", "lines must be a list")),
                };
                for line in lines {
                    let data = decode(Some(line))?;
                    self.write(&data)?;
                }
                Ok(Value::Null)
            }
            "seek" => {
                let offset = match request.get("offset") {
                    None | Some(Value::Null) => 0,
                    Some(v) => v
                        .as_i64()
                        .ok_or_else(|| Failure::os(errno::EINVAL, &self.path))?,
                };
                let base = match int_arg(request, "whence").unwrap_or(0) {
                    0 => 0,
                    1 => self.pos as i64,
                    2 => self.data.len() as i64,
                    whence => {
                        return Err(Failure::service(
                            "ValueError",
                            format!("invalid whence ({whence}, should be 0, 1 or 2)"),
                        ));
                    }
                };
                let target = base
                    .checked_add(offset)
                    .ok_or_else(|| Failure::os(errno::EINVAL, &self.path))?;
                if target < 0 {
                    return Err(Failure::service(
                        "ValueError",
                        format!("negative seek position {target}"),
                    ));
                }
                self.pos = usize::try_from(target)
                    .map_err(|_| Failure::os(errno::EINVAL, &self.path))?;
                Ok(Value::from(self.pos))
            }
            "tell" => Ok(Value::from(self.pos)),
            "truncate" => {
                self.require_writable()?;
                let size = match request.get("size") {
                    None | Some(Value::Null) => self.pos,
                    Some(v) => match v.as_u64() {
                        Some(n) => usize::try_from(n).unwrap_or(usize::MAX),
                        None => {
                            return Err(Failure::os(errno::EINVAL, &self.path));
                        }
                    },
                };
                if size > MAX_FILE_SIZE {
                    return Err(Failure::os(errno::EFBIG, &self.path));
                }
                self.data.resize(size, 0);
                Ok(Value::from(size))
            }
            "flush" => Ok(Value::Null),
            "fileno" => Ok(Value::from(self.fd)),
            "isatty" => Ok(Value::Bool(false)),
            "readable" => Ok(Value::Bool(self.mode.is_readable())),
            "writable" => Ok(Value::Bool(self.mode.is_writable())),
            other => Err(Failure::service(
                "AttributeError",
                format!("unknown method '{other}'"),
            )),
        }
    }

    /// Whether a successful `method` changed the contents.
    fn dirty(&self, method: &str) -> bool {
        matches!(method, "write" | "writelines" | "truncate")
    }

    fn require_readable(&self) -> FsResult<()> {
        if self.mode.is_readable() {
            Ok(())
        } else {
            Err(Failure::service("UnsupportedOperation", "not readable"))
        }
    }

    fn require_writable(&self) -> FsResult<()> {
        if self.mode.is_writable() {
            Ok(())
        } else {
            Err(Failure::service("UnsupportedOperation", "not writable"))
        }
    }

    /// Consume bytes from the cursor, up to `limit` (negative or absent is
    /// unlimited) and up to the end `stop` reports.
    fn take(&mut self, limit: Option<i64>, stop: fn(&[u8]) -> Option<usize>) -> Vec<u8> {
        let start = self.pos.min(self.data.len());
        let rest = &self.data[start..];
        let mut end = stop(rest).unwrap_or(rest.len());
        if let Some(n) = limit.filter(|&n| n >= 0) {
            end = end.min(n as usize);
        }
        let chunk = rest[..end].to_vec();
        if !chunk.is_empty() {
            self.pos = start + end;
        }
        chunk
    }

    fn write(&mut self, bytes: &[u8]) -> FsResult<usize> {
        if self.mode.access() == Access::Append {
            self.pos = self.data.len();
        }
        let end = self
            .pos
            .checked_add(bytes.len())
            .filter(|&end| end <= MAX_FILE_SIZE)
            .ok_or_else(|| Failure::os(errno::EFBIG, &self.path))?;
        if end > self.data.len() {
            self.data.resize(end, 0);
        }
        self.data[self.pos..end].copy_from_slice(bytes);
        self.pos = end;
        Ok(bytes.len())
    }
}

fn line_end(bytes: &[u8]) -> Option<usize> {
    bytes.iter().position(|&b| b == b'\n').map(|i| i + 1)
}

fn int_arg(request: &Value, key: &str) -> Option<i64> {
    request.get(key).and_then(Value::as_i64)
}

fn encode(bytes: &[u8]) -> Value {
    Value::String(STANDARD.encode(bytes))
}

fn decode(data: Option<&Value>) -> FsResult<Vec<u8>> {
    let Some(Value::String(encoded)) = data else {
        return Err(Failure::service("TypeError", "data must be a base64 string"));
    };
    STANDARD
        .decode(encoded.as_bytes())
        .map_err(|e| Failure::service("ValueError", format!("invalid base64 data: {e}")))
}

#[async_trait]
impl FileSocket for MemorySocket {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.check_disconnect();
        if self.closed {
            // A close frame still waiting to be read means the peer closed
            // first; the send itself goes nowhere.
            return if self.outbox.is_empty() {
                Err(TransportError::Closed)
            } else {
                Ok(())
            };
        }
        let response = self.handle(&text);
        self.push(response);
        Ok(())
    }

    async fn receive(&mut self) -> Result<Frame, TransportError> {
        self.check_disconnect();

        let delay = *self.shared.response_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        match self.outbox.pop_front() {
            Some(frame) => Ok(frame),
            None if self.closed => Ok(Frame::Close(None)),
            None => std::future::pending().await,
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if !self.closed {
            self.finish(true);
            self.closed = true;
        }
        Ok(())
    }

    fn url(&self) -> &Url {
        &self.url
    }
}

impl Drop for MemorySocket {
    fn drop(&mut self) {
        self.finish(false);
    }
}
