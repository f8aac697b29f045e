//! In-process implementation of the file services.
//!
//! [`MemoryServer`] answers both halves of the protocol, the one-shot
//! metadata calls ([`HttpTransport`]) and persistent file sessions
//! ([`SocketConnector`]), against an ephemeral file tree. It reports
//! failures with the same status codes and bodies as the real server, so
//! the whole client stack can be exercised without a network.
//!
//! ```no_run
//! # async fn demo() -> remotefs_client::Result<()> {
//! use remotefs_client::{MemoryServer, OpenOptions};
//!
//! let server = MemoryServer::new();
//! server.insert_file("/data/hello.txt", b"hello\n");
//!
//! let fs = server.services()?;
//! let mut file = fs.open("/data/hello.txt", OpenOptions::default()).await?;
//! let text = file.readall().await?;
//! # Ok(())
//! # }
//! ```

mod session;
mod tree;

use std::collections::{HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use percent_encoding::percent_decode_str;
use serde_json::{Value, json};
use url::Url;

use crate::constants::status::BAD_REQUEST;
use crate::constants::{
    DEFAULT_ENCODING, FILE_SCHEME_PREFIX, FSSPEC_SEGMENT, SERVICES_PLUGIN_NAME,
};
use crate::endpoint::ServiceEndpoint;
use crate::services::RemoteFileServices;
use crate::transport::{
    FileSocket, HttpRequest, HttpResponse, HttpTransport, Method, SocketConnector, TransportError,
};

use session::{MemorySocket, OpenRequest};
use tree::{Tree, normalize};

/// Base URL handed to clients of a memory server. Never resolved.
const MEMORY_BASE_URL: &str = "http://memory.invalid/";

const NOT_FOUND: u16 = 404;
const METHOD_NOT_ALLOWED: u16 = 405;

#[derive(Debug, Default)]
struct State {
    tree: Tree,
    /// Paths with an advisory lock held by an open session.
    locks: HashSet<PathBuf>,
}

#[derive(Debug, Default)]
struct Shared {
    state: RwLock<State>,
    /// Bumped by `disconnect_all`; sessions from an older generation are closed.
    generation: AtomicU64,
    next_fd: AtomicI64,
    connections: AtomicUsize,
    response_delay: Mutex<Option<Duration>>,
    injected: Mutex<VecDeque<(u16, Vec<u8>)>>,
}

/// Ephemeral file server. Clones share the same tree.
#[derive(Debug, Clone)]
pub struct MemoryServer {
    shared: Arc<Shared>,
}

impl Default for MemoryServer {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryServer {
    pub fn new() -> Self {
        let shared = Shared {
            next_fd: AtomicI64::new(3),
            ..Shared::default()
        };
        Self {
            shared: Arc::new(shared),
        }
    }

    /// A client wired to this server for both metadata calls and sessions.
    pub fn services(&self) -> Result<RemoteFileServices, TransportError> {
        let endpoint = ServiceEndpoint::new(MEMORY_BASE_URL)?;
        Ok(RemoteFileServices::new(
            endpoint,
            Arc::new(self.clone()),
            Arc::new(self.clone()),
        ))
    }

    // ========================================================================
    // Fixtures and inspection
    // ========================================================================

    /// Create (or replace) a file, creating missing parent directories.
    pub fn insert_file(&self, path: &str, data: &[u8]) {
        let path = normalize(path);
        let mut state = self.shared.state.write();
        if let Some(parent) = path.parent() {
            let _ = state.tree.mkdir(parent, true, true);
        }
        if let Err(failure) = state.tree.write_file(&path, data.to_vec()) {
            tracing::warn!(?failure, "insert_file failed");
        }
    }

    pub fn insert_dir(&self, path: &str) {
        let path = normalize(path);
        if let Err(failure) = self.shared.state.write().tree.mkdir(&path, true, true) {
            tracing::warn!(?failure, "insert_dir failed");
        }
    }

    /// Current contents of a file, if it exists.
    pub fn read_file(&self, path: &str) -> Option<Vec<u8>> {
        self.shared.state.read().tree.read_file(&normalize(path)).ok()
    }

    pub fn exists(&self, path: &str) -> bool {
        self.shared.state.read().tree.exists(&normalize(path))
    }

    /// Whether an open session holds the advisory lock on `path`.
    pub fn is_locked(&self, path: &str) -> bool {
        self.shared.state.read().locks.contains(&normalize(path))
    }

    /// Number of session connections accepted so far.
    pub fn connections(&self) -> usize {
        self.shared.connections.load(Ordering::SeqCst)
    }

    /// Delay every session response by `delay`.
    pub fn set_response_delay(&self, delay: Option<Duration>) {
        *self.shared.response_delay.lock() = delay;
    }

    /// Answer the next metadata call with a raw status and body instead of
    /// handling it.
    pub fn fail_next_request(&self, status: u16, body: impl Into<Vec<u8>>) {
        self.shared.injected.lock().push_back((status, body.into()));
    }

    /// Close every open session from the server side.
    pub fn disconnect_all(&self) {
        self.shared.generation.fetch_add(1, Ordering::SeqCst);
    }

    // ========================================================================
    // Metadata endpoints
    // ========================================================================

    fn handle(&self, request: &HttpRequest) -> (u16, Value) {
        let url = &request.url;
        let Some((op, path)) = route(url) else {
            return (NOT_FOUND, json!({"message": format!("no route for {url}")}));
        };

        let result = match (request.method, op.as_str()) {
            (Method::Get, "ls") => {
                let detail = query_flag(url, "detail").unwrap_or(true);
                self.shared.state.read().tree.ls(&path, detail)
            }
            (Method::Get, "info") => self.shared.state.read().tree.info(&path),
            (Method::Get, "exists") => Ok(Value::Bool(self.shared.state.read().tree.exists(&path))),
            (Method::Get, "isfile") => Ok(Value::Bool(self.shared.state.read().tree.is_file(&path))),
            (Method::Get, "isdir") => Ok(Value::Bool(self.shared.state.read().tree.is_dir(&path))),
            (Method::Post, "mkdir") => {
                let create_parents = query_flag(url, "create_parents").unwrap_or(true);
                let exist_ok = query_flag(url, "exist_ok").unwrap_or(false);
                self.shared
                    .state
                    .write()
                    .tree
                    .mkdir(&path, create_parents, exist_ok)
                    .map(|()| Value::Null)
            }
            (Method::Delete, "rmdir") => self.shared.state.write().tree.rmdir(&path).map(|()| Value::Null),
            (Method::Delete, "file") => {
                let missing_ok = query_flag(url, "missing_ok").unwrap_or(false);
                self.shared
                    .state
                    .write()
                    .tree
                    .unlink(&path, missing_ok)
                    .map(|()| Value::Null)
            }
            (Method::Post, "copy" | "move") => {
                let Some(dest) = query_path(url, "dest") else {
                    return (BAD_REQUEST, json!({"message": "missing or invalid dest"}));
                };
                let mut state = self.shared.state.write();
                let moved = if op == "copy" {
                    let metadata = query_flag(url, "metadata").unwrap_or(false);
                    state.tree.copy(&path, &dest, metadata)
                } else {
                    state.tree.rename(&path, &dest)
                };
                moved.map(|()| Value::Null)
            }
            (Method::Post, "touch") => {
                let truncate = query_flag(url, "truncate").unwrap_or(true);
                self.shared
                    .state
                    .write()
                    .tree
                    .touch(&path, truncate)
                    .map(|()| Value::Null)
            }
            (_, "ls" | "info" | "exists" | "isfile" | "isdir" | "mkdir" | "rmdir" | "file"
                | "copy" | "move" | "touch") => {
                return (
                    METHOD_NOT_ALLOWED,
                    json!({"message": format!("{} not allowed on {op}", request.method.as_str())}),
                );
            }
            _ => return (NOT_FOUND, json!({"message": format!("unknown operation {op}")})),
        };

        match result {
            Ok(value) => (200, value),
            Err(failure) => (failure.status(), failure.body()),
        }
    }
}

#[async_trait]
impl HttpTransport for MemoryServer {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let injected = self.shared.injected.lock().pop_front();
        let (status, body) = match injected {
            Some(canned) => canned,
            None => {
                let (status, body) = self.handle(&request);
                (status, body.to_string().into_bytes())
            }
        };
        tracing::trace!(method = request.method.as_str(), url = %request.url, status, "memory call");
        Ok(HttpResponse {
            status,
            url: request.url,
            body,
        })
    }
}

#[async_trait]
impl SocketConnector for MemoryServer {
    async fn connect(&self, url: &Url) -> Result<Box<dyn FileSocket>, TransportError> {
        let path = match route(url) {
            Some((op, path)) if op == "open" => path,
            _ => {
                return Err(TransportError::Status {
                    status: NOT_FOUND,
                    url: url.to_string(),
                });
            }
        };
        self.shared.connections.fetch_add(1, Ordering::SeqCst);

        let request = OpenRequest {
            path,
            mode: query_value(url, "mode").unwrap_or_else(|| "r".to_string()),
            atomic: query_flag(url, "atomic").unwrap_or(false),
            lock: query_flag(url, "lock").unwrap_or(false),
            encoding: query_value(url, "encoding")
                .unwrap_or_else(|| DEFAULT_ENCODING.to_string()),
        };
        Ok(Box::new(MemorySocket::open(
            self.shared.clone(),
            url.clone(),
            request,
        )))
    }
}

/// Split `.../fsspec/<op>/file://<path>` into the operation and the
/// normalized path.
fn route(url: &Url) -> Option<(String, PathBuf)> {
    let marker = format!("/{SERVICES_PLUGIN_NAME}/{FSSPEC_SEGMENT}/");
    let (_, rest) = url.path().split_once(&marker)?;
    let (op, target) = rest.split_once('/')?;
    let raw = target.strip_prefix(FILE_SCHEME_PREFIX)?;
    let path = percent_decode_str(raw).decode_utf8().ok()?;
    Some((op.to_string(), normalize(&path)))
}

fn query_value(url: &Url, key: &str) -> Option<String> {
    url.query_pairs()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.into_owned())
}

fn query_flag(url: &Url, key: &str) -> Option<bool> {
    query_value(url, key).map(|v| v == "true")
}

fn query_path(url: &Url, key: &str) -> Option<PathBuf> {
    let value = query_value(url, key)?;
    value.strip_prefix(FILE_SCHEME_PREFIX).map(normalize)
}
