//! WebSocket file sockets over tokio-tungstenite.

use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use url::Url;

use super::{CloseFrame, FileSocket, Frame, SocketConnector, TransportError};
use crate::constants::CONNECT_TIMEOUT;

/// Opens one WebSocket per remote file, authenticating with a Jupyter token.
#[derive(Debug, Clone)]
pub struct WsConnector {
    token: Option<String>,
    connect_timeout: Duration,
}

impl Default for WsConnector {
    fn default() -> Self {
        Self::new(None)
    }
}

impl WsConnector {
    pub fn new(token: Option<String>) -> Self {
        Self {
            token,
            connect_timeout: CONNECT_TIMEOUT,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

#[async_trait]
impl SocketConnector for WsConnector {
    async fn connect(&self, url: &Url) -> Result<Box<dyn FileSocket>, TransportError> {
        let mut request = url.as_str().into_client_request().map_err(ws_error)?;
        if let Some(token) = &self.token {
            let value = HeaderValue::from_str(&format!("token {token}"))
                .map_err(|e| TransportError::WebSocket(e.to_string()))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        let (stream, response) = tokio::time::timeout(self.connect_timeout, connect_async(request))
            .await
            .map_err(|_| TransportError::Timeout)?
            .map_err(ws_error)?;
        tracing::trace!(%url, status = %response.status(), "websocket upgraded");

        Ok(Box::new(WsSocket {
            stream,
            url: url.clone(),
            closed: false,
        }))
    }
}

struct WsSocket {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    url: Url,
    closed: bool,
}

#[async_trait]
impl FileSocket for WsSocket {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        self.stream.send(Message::Text(text)).await.map_err(ws_error)
    }

    async fn receive(&mut self) -> Result<Frame, TransportError> {
        loop {
            let message = match self.stream.next().await {
                None => return Ok(Frame::Close(None)),
                Some(Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed)) => {
                    return Ok(Frame::Close(None));
                }
                Some(Err(e)) => return Err(ws_error(e)),
                Some(Ok(message)) => message,
            };

            match message {
                Message::Text(text) => return Ok(Frame::Text(text)),
                Message::Binary(bytes) => return Ok(Frame::Binary(bytes)),
                Message::Close(frame) => {
                    return Ok(Frame::Close(frame.map(|f| CloseFrame {
                        code: u16::from(f.code),
                        reason: f.reason.into_owned(),
                    })));
                }
                // tungstenite answers pings itself
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
            }
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        match self.stream.close(None).await {
            Ok(()) | Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
                Ok(())
            }
            Err(e) => Err(ws_error(e)),
        }
    }

    fn url(&self) -> &Url {
        &self.url
    }
}

fn ws_error(e: tungstenite::Error) -> TransportError {
    TransportError::WebSocket(e.to_string())
}
