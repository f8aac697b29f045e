//! Metadata operations.
//!
//! [`RemoteFileServices`] maps filesystem-style calls onto one HTTP request
//! each, and opens [`RemoteFile`] sessions on the same server. Calls take
//! `&self` and share no state, so they may run concurrently with each other
//! and with open sessions.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::config::ServerConfig;
use crate::endpoint::{ServiceEndpoint, file_uri, flag};
use crate::error::{RemoteFsError, Result};
use crate::file::RemoteFile;
use crate::options::OpenOptions;
use crate::response::decode_http;
use crate::transport::{
    HttpRequest, HttpTransport, Method, ReqwestTransport, SocketConnector, WsConnector,
};

/// Client for one server's file services.
#[derive(Clone)]
pub struct RemoteFileServices {
    endpoint: ServiceEndpoint,
    http: Arc<dyn HttpTransport>,
    sockets: Arc<dyn SocketConnector>,
    /// Applied to sessions opened without a timeout of their own.
    read_timeout: Option<Duration>,
}

impl std::fmt::Debug for RemoteFileServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteFileServices")
            .field("endpoint", &self.endpoint.api_url().as_str())
            .finish_non_exhaustive()
    }
}

impl RemoteFileServices {
    pub fn new(
        endpoint: ServiceEndpoint,
        http: Arc<dyn HttpTransport>,
        sockets: Arc<dyn SocketConnector>,
    ) -> Self {
        Self {
            endpoint,
            http,
            sockets,
            read_timeout: None,
        }
    }

    /// Default read timeout for sessions opened through this client.
    pub fn with_read_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout
    }

    /// Production transports (reqwest + tokio-tungstenite) for a server profile.
    pub fn from_config(server: &ServerConfig) -> Result<Self> {
        let endpoint = ServiceEndpoint::new(&server.url)?;
        let token = server.resolve_token();
        let connect_timeout = server.connect_timeout();
        let http = ReqwestTransport::with_connect_timeout(token.clone(), connect_timeout)?;
        let sockets = WsConnector::new(token).with_connect_timeout(connect_timeout);
        Ok(Self::new(endpoint, Arc::new(http), Arc::new(sockets))
            .with_read_timeout(server.read_timeout()))
    }

    pub fn endpoint(&self) -> &ServiceEndpoint {
        &self.endpoint
    }

    /// List a directory. With `detail` the server returns info objects,
    /// otherwise plain names.
    pub async fn ls(&self, path: &str, detail: bool) -> Result<Value> {
        self.request(Method::Get, "ls", path, &[("detail", flag(detail))])
            .await
    }

    /// Stat a path.
    pub async fn info(&self, path: &str) -> Result<Value> {
        self.request(Method::Get, "info", path, &[]).await
    }

    pub async fn exists(&self, path: &str) -> Result<bool> {
        let value = self.request(Method::Get, "exists", path, &[]).await?;
        as_bool("exists", value)
    }

    pub async fn is_file(&self, path: &str) -> Result<bool> {
        let value = self.request(Method::Get, "isfile", path, &[]).await?;
        as_bool("isfile", value)
    }

    pub async fn is_dir(&self, path: &str) -> Result<bool> {
        let value = self.request(Method::Get, "isdir", path, &[]).await?;
        as_bool("isdir", value)
    }

    pub async fn mkdir(&self, path: &str, create_parents: bool, exist_ok: bool) -> Result<Value> {
        let query = [
            ("create_parents", flag(create_parents)),
            ("exist_ok", flag(exist_ok)),
        ];
        self.request(Method::Post, "mkdir", path, &query).await
    }

    pub async fn rmdir(&self, path: &str) -> Result<Value> {
        self.request(Method::Delete, "rmdir", path, &[]).await
    }

    /// Delete a file.
    pub async fn unlink(&self, path: &str, missing_ok: bool) -> Result<Value> {
        self.request(Method::Delete, "file", path, &[("missing_ok", flag(missing_ok))])
            .await
    }

    pub async fn copy(&self, src: &str, dst: &str) -> Result<Value> {
        self.request(Method::Post, "copy", src, &[("dest", file_uri(dst))])
            .await
    }

    /// Copy, preserving timestamps and permissions.
    pub async fn copy_with_metadata(&self, src: &str, dst: &str) -> Result<Value> {
        let query = [("dest", file_uri(dst)), ("metadata", flag(true))];
        self.request(Method::Post, "copy", src, &query).await
    }

    /// Move `src` to `dst`, replacing it.
    pub async fn replace(&self, src: &str, dst: &str) -> Result<Value> {
        self.request(Method::Post, "move", src, &[("dest", file_uri(dst))])
            .await
    }

    pub async fn touch(&self, path: &str, truncate: bool) -> Result<Value> {
        self.request(Method::Post, "touch", path, &[("truncate", flag(truncate))])
            .await
    }

    /// Open a file session and complete the handshake.
    pub async fn open(&self, path: &str, mut options: OpenOptions) -> Result<RemoteFile> {
        if options.read_timeout.is_none() {
            options.read_timeout = self.read_timeout;
        }
        let mut file = RemoteFile::new(&self.endpoint, self.sockets.clone(), path, options)?;
        file.connect().await?;
        Ok(file)
    }

    async fn request(
        &self,
        method: Method,
        op: &'static str,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Value> {
        let url = self.endpoint.operation(op, path, query)?;
        tracing::debug!(op, path, method = method.as_str(), "metadata call");
        let response = self.http.send(HttpRequest { method, url }).await?;
        let status = response.status;
        decode_http(response).inspect_err(|e| {
            tracing::debug!(op, path, status, error = %e, "metadata call failed");
        })
    }
}

fn as_bool(op: &str, value: Value) -> Result<bool> {
    value
        .as_bool()
        .ok_or_else(|| RemoteFsError::Protocol(format!("{op}: expected a boolean, got {value}")))
}
