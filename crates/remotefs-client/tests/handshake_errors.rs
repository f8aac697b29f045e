//! Open handshake outcomes with exact server frames.
//!
//! A scripted connector replays one frame per connection so every branch of
//! the handshake can be pinned down without a server.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use remotefs_client::transport::{CloseFrame, FileSocket, Frame};
use remotefs_client::{
    ErrorDetail, ErrorKind, FileState, OpenOptions, RemoteFile, ServiceEndpoint, SocketConnector,
    TransportError,
};
use serde_json::json;
use url::Url;

struct OneFrame(Mutex<Option<Frame>>);

struct OneFrameSocket {
    frame: Option<Frame>,
    url: Url,
}

#[async_trait]
impl SocketConnector for OneFrame {
    async fn connect(&self, url: &Url) -> Result<Box<dyn FileSocket>, TransportError> {
        Ok(Box::new(OneFrameSocket {
            frame: self.0.lock().take(),
            url: url.clone(),
        }))
    }
}

#[async_trait]
impl FileSocket for OneFrameSocket {
    async fn send_text(&mut self, _text: String) -> Result<(), TransportError> {
        Ok(())
    }

    async fn receive(&mut self) -> Result<Frame, TransportError> {
        Ok(self.frame.take().unwrap_or(Frame::Close(None)))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        Ok(())
    }

    fn url(&self) -> &Url {
        &self.url
    }
}

async fn open_with(frame: Frame) -> (RemoteFile, remotefs_client::Result<()>) {
    let endpoint = ServiceEndpoint::new("https://hub.example/user/amy/").unwrap();
    let connector = Arc::new(OneFrame(Mutex::new(Some(frame))));
    let mut file = RemoteFile::new(&endpoint, connector, "/x", OpenOptions::default()).unwrap();
    let result = file.connect().await;
    (file, result)
}

fn rejection(reason: serde_json::Value) -> Frame {
    Frame::Close(Some(CloseFrame {
        code: 1002,
        reason: reason.to_string(),
    }))
}

#[tokio::test]
async fn test_expectation_failed_close_reason() {
    let reason = json!({"status": 417, "errno": 2, "strerror": "No such file", "filename": "/x"});
    let (file, result) = open_with(rejection(reason)).await;

    let err = result.unwrap_err();
    let envelope = err.envelope().unwrap();
    assert_eq!(envelope.kind(), ErrorKind::Os);
    assert_eq!(envelope.errno(), Some(2));
    assert_eq!(
        envelope.url,
        "wss://hub.example/user/amy/spyder-services/fsspec/open/file:///x?mode=r&atomic=false&lock=false&encoding=utf-8"
    );
    assert_eq!(file.state(), FileState::Unopened);
}

#[tokio::test]
async fn test_service_close_reason_with_defaults() {
    let (_, result) = open_with(rejection(json!({"status": 500}))).await;
    let err = result.unwrap_err();
    let ErrorDetail::Service(detail) = &err.envelope().unwrap().detail else {
        panic!("expected a service error");
    };
    assert_eq!(detail.error_type, "UnknownError");
    assert_eq!(detail.message, "Unknown error");
}

#[tokio::test]
async fn test_service_close_reason_with_type() {
    let reason = json!({"status": 500, "type": "IsADirectoryError", "message": "is a dir", "tracebacks": []});
    let (_, result) = open_with(rejection(reason)).await;
    let envelope = result.unwrap_err().envelope().cloned().unwrap();
    assert_eq!(envelope.kind(), ErrorKind::Service);
    assert_eq!(envelope.message(), "is a dir");
}

#[tokio::test]
async fn test_other_close_codes_fail_generically() {
    let (_, result) = open_with(Frame::Close(Some(CloseFrame {
        code: 1011,
        reason: json!({"status": 417, "errno": 2}).to_string(),
    })))
    .await;
    assert_eq!(result.unwrap_err().envelope().unwrap().message(), "Failed to open file");
}

#[tokio::test]
async fn test_greeting_opens_session() {
    let (file, result) = open_with(Frame::Binary(br#"{"status":200}"#.to_vec())).await;
    result.unwrap();
    assert_eq!(file.state(), FileState::Open);
}
