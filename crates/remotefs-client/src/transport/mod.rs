//! Transport seam.
//!
//! The protocol layers above only see these traits:
//!
//! - [`SocketConnector`] / [`FileSocket`] - the persistent, frame-based
//!   connection that backs one open file.
//! - [`HttpTransport`] - one-shot request/response calls for metadata.
//!
//! Production implementations live in [`ws`] (tokio-tungstenite) and
//! [`http`] (reqwest). [`crate::memory::MemoryServer`] implements both
//! in-process.

pub mod http;
pub mod ws;

use async_trait::async_trait;
use thiserror::Error;
use url::Url;

pub use http::ReqwestTransport;
pub use ws::WsConnector;

// ============================================================================
// Errors
// ============================================================================

/// Connection-level failures. These are never reinterpreted as protocol
/// errors.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// A non-success HTTP status the protocol does not decode.
    #[error("HTTP status {status} for {url}")]
    Status { status: u16, url: String },

    #[error("timed out waiting for the server")]
    Timeout,

    #[error("connection closed by peer")]
    Closed,

    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

// ============================================================================
// Persistent socket
// ============================================================================

/// A close frame as seen by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseFrame {
    pub code: u16,
    pub reason: String,
}

/// One frame received from a file socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
    /// The peer closed the connection, with or without a close frame.
    Close(Option<CloseFrame>),
}

/// Opens persistent file sockets.
#[async_trait]
pub trait SocketConnector: Send + Sync {
    /// Establish the transport-level link to `url`.
    async fn connect(&self, url: &Url) -> Result<Box<dyn FileSocket>, TransportError>;
}

/// A persistent bidirectional connection backing one remote file.
///
/// Implementations need not support concurrent use; callers alternate
/// strictly between one `send_text` and one `receive`.
#[async_trait]
pub trait FileSocket: Send {
    /// Send one text frame.
    async fn send_text(&mut self, text: String) -> Result<(), TransportError>;

    /// Wait for the next data or close frame. Ping/pong traffic is handled
    /// internally.
    async fn receive(&mut self) -> Result<Frame, TransportError>;

    /// Close the connection. Closing twice is a no-op.
    async fn close(&mut self) -> Result<(), TransportError>;

    /// The URL this socket was opened against.
    fn url(&self) -> &Url;
}

// ============================================================================
// One-shot HTTP
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Delete,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Delete => "DELETE",
        }
    }
}

/// A metadata request. Query parameters are already part of `url`.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: Url,
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    /// Final URL of the response (after redirects).
    pub url: Url,
    pub body: Vec<u8>,
}

/// Issues independent request/response calls.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}
